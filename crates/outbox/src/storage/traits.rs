//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{
    ConversationKey, ConversationThread, Credential, Delivery, DirectoryUser, LabelBinding,
    NewSendRecord, Role, SendRecord, Team, TenderInfo,
};

/// Trait for outbox storage operations
///
/// Holds the durable state owned by the mailer: send records, conversation
/// threads, the label-binding cache, and per-user OAuth credentials.
pub trait OutboxStore: Send + Sync {
    // === Send records ===

    /// Persist a new record in the `pending` state
    fn insert_record(&self, record: NewSendRecord) -> Result<SendRecord>;

    /// Get a record by ID
    fn get_record(&self, id: i64) -> Result<Option<SendRecord>>;

    /// Atomically move a `pending` or `failed` record to `sending`
    ///
    /// Increments `attempts` and stamps `last_attempt_at`. Returns the
    /// updated record, or `None` if the record is missing or not eligible
    /// (already sending or sent).
    fn mark_sending(&self, id: i64, at: DateTime<Utc>) -> Result<Option<SendRecord>>;

    /// Finalize a record as `sent`, clearing any previous error
    fn mark_sent(&self, id: i64, delivery: &Delivery) -> Result<()>;

    /// Finalize a record as `failed` with the given error
    fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    /// Failed records with fewer than `max_retries` attempts, oldest first
    fn list_retryable(&self, max_retries: u32) -> Result<Vec<SendRecord>>;

    // === Conversation threads ===

    fn get_conversation(&self, key: &ConversationKey) -> Result<Option<ConversationThread>>;

    /// Insert or update the thread for a conversation key
    fn upsert_conversation(&self, thread: ConversationThread) -> Result<()>;

    // === Label bindings ===

    fn get_label_binding(&self, user_id: i64, label_name: &str) -> Result<Option<LabelBinding>>;

    /// Insert or overwrite a cached binding
    fn save_label_binding(&self, binding: LabelBinding) -> Result<()>;

    // === Credentials ===

    fn get_credential(&self, user_id: i64) -> Result<Option<Credential>>;

    /// Insert or replace a user's credential
    fn save_credential(&self, credential: Credential) -> Result<()>;

    /// Store a refreshed access token
    ///
    /// The refresh token is only replaced when the provider issued a new one.
    fn update_access_token(
        &self,
        user_id: i64,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
        refresh_token: Option<&str>,
    ) -> Result<()>;

    /// IDs of users whose connected mailbox address matches any of `emails`
    ///
    /// Matching is case-insensitive.
    fn find_connected_user_ids(&self, emails: &[String]) -> Result<Vec<i64>>;
}

/// Read-only view of the application's user directory
pub trait Directory: Send + Sync {
    /// Get a user by ID, active or not
    fn get_user(&self, id: i64) -> Result<Option<DirectoryUser>>;

    fn list_roles(&self) -> Result<Vec<Role>>;

    fn list_teams(&self) -> Result<Vec<Team>>;

    /// Emails of active users holding `role_id` whose primary team is `team_id`
    fn active_emails_by_role(&self, role_id: i64, team_id: i64) -> Result<Vec<String>>;

    fn get_tender(&self, id: i64) -> Result<Option<TenderInfo>>;
}
