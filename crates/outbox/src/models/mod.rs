//! Domain models for the outbound mail pipeline

mod conversation;
mod credential;
mod directory;
mod label;
mod outgoing;
mod recipient;
mod record;

pub use conversation::{ConversationKey, ConversationThread};
pub use credential::{Credential, EXPIRY_BUFFER_SECS};
pub use directory::{DirectoryUser, Role, Team, TenderInfo};
pub use label::{LabelBinding, TENDERING_ROOT, label_ancestors, sanitize_segment, tender_label_path};
pub use outgoing::OutgoingEmail;
pub use recipient::RecipientSource;
pub use record::{Attachment, Delivery, NewSendRecord, SendRecord, SendStatus};
