//! Outbox crate - transactional email delivery through users' Gmail mailboxes
//!
//! This crate provides:
//! - Domain models (send records, conversation threads, label bindings)
//! - Storage trait abstractions with SQLite and in-memory backends
//! - Gmail API client, token refresh, MIME construction and labels
//! - Recipient resolution against the user directory
//! - The email service with detached transmission and bounded retry
//!
//! The Gmail transport is synchronous (ureq) and executor-agnostic.

pub mod attachments;
pub mod config;
pub mod dispatch;
pub mod gmail;
pub mod models;
pub mod recipients;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod templates;

pub use attachments::{AttachmentRequest, resolve_attachments};
pub use config::{Environment, GmailCredentials, OutboxSettings};
pub use dispatch::{Dispatcher, InlineDispatcher, Task, ThreadDispatcher};
pub use gmail::{
    AccessToken, ApiError, AuthError, GmailApi, GmailClient, GmailTransport, LabelManager,
    LabelOutcome, SentMessage, TokenManager, TransportError,
};
pub use models::{
    Attachment, ConversationKey, ConversationThread, Credential, Delivery, DirectoryUser,
    LabelBinding, NewSendRecord, OutgoingEmail, RecipientSource, Role, SendRecord, SendStatus,
    Team, TenderInfo,
};
pub use recipients::{RecipientResolver, is_valid_email};
pub use scheduler::{RetryScheduler, SchedulerHandle};
pub use service::{EmailService, RetryStats, SendRejection, SendRequest, TenderEmailRequest};
pub use storage::{Directory, InMemoryOutboxStore, OutboxStore, SqliteOutboxStore};
pub use templates::{HandlebarsRenderer, TemplateRenderer};
