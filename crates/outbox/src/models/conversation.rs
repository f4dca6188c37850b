//! Conversation model: maps a business entity to its provider thread

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Correlation key for the business entity an email is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub reference_type: String,
    pub reference_id: i64,
}

impl ConversationKey {
    pub fn new(reference_type: impl Into<String>, reference_id: i64) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id,
        }
    }
}

/// The provider thread shared by every email about one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub key: ConversationKey,
    /// Provider thread ID to send replies into
    pub provider_thread_id: String,
    /// Message-ID header of the first email, used for In-Reply-To/References
    pub seed_message_id: String,
    pub updated_at: DateTime<Utc>,
}

impl ConversationThread {
    pub fn new(
        key: ConversationKey,
        provider_thread_id: impl Into<String>,
        seed_message_id: impl Into<String>,
    ) -> Self {
        Self {
            key,
            provider_thread_id: provider_thread_id.into(),
            seed_message_id: seed_message_id.into(),
            updated_at: Utc::now(),
        }
    }
}
