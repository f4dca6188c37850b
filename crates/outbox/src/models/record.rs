//! Send record model: one durable row per logical email and its attempts

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ConversationKey;

/// Lifecycle state of a send record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Pending => "pending",
            SendStatus::Sending => "sending",
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
        }
    }

    /// Whether a transmission attempt may start from this state
    pub fn can_transmit(&self) -> bool {
        matches!(self, SendStatus::Pending | SendStatus::Failed)
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SendStatus::Pending),
            "sending" => Ok(SendStatus::Sending),
            "sent" => Ok(SendStatus::Sent),
            "failed" => Ok(SendStatus::Failed),
            other => anyhow::bail!("Unknown send status: {}", other),
        }
    }
}

/// A file resolved under the uploads root, attached on every attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Filename shown to the recipient
    pub filename: String,
    /// Absolute path on disk
    pub path: PathBuf,
}

/// Fields supplied when a send record is first persisted
#[derive(Debug, Clone)]
pub struct NewSendRecord {
    pub conversation: ConversationKey,
    pub event_type: String,
    pub from_user_id: i64,
    pub from_email: String,
    pub to_emails: Vec<String>,
    pub cc_emails: Vec<String>,
    /// CC was recorded for audit but withheld from transmission
    pub cc_suppressed: bool,
    pub subject: String,
    pub template_name: String,
    pub template_data: serde_json::Value,
    pub body_html: String,
    pub label_path: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// A persisted send record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRecord {
    pub id: i64,
    pub conversation: ConversationKey,
    pub event_type: String,
    pub from_user_id: i64,
    pub from_email: String,
    pub to_emails: Vec<String>,
    pub cc_emails: Vec<String>,
    pub cc_suppressed: bool,
    pub subject: String,
    pub template_name: String,
    pub template_data: serde_json::Value,
    pub body_html: String,
    pub label_path: Option<String>,
    pub attachments: Vec<Attachment>,
    pub status: SendStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub provider_thread_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SendRecord {
    /// Materialize a freshly inserted record in the `pending` state
    pub fn from_new(id: i64, new: NewSendRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            conversation: new.conversation,
            event_type: new.event_type,
            from_user_id: new.from_user_id,
            from_email: new.from_email,
            to_emails: new.to_emails,
            cc_emails: new.cc_emails,
            cc_suppressed: new.cc_suppressed,
            subject: new.subject,
            template_name: new.template_name,
            template_data: new.template_data,
            body_html: new.body_html,
            label_path: new.label_path,
            attachments: new.attachments,
            status: SendStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            sent_at: None,
            provider_message_id: None,
            provider_thread_id: None,
            error_message: None,
            created_at,
        }
    }

    /// Whether the retry pass should pick this record up
    pub fn is_retryable(&self, max_retries: u32) -> bool {
        self.status == SendStatus::Failed && self.attempts < max_retries
    }

    pub(crate) fn apply_sending(&mut self, at: DateTime<Utc>) {
        self.status = SendStatus::Sending;
        self.attempts += 1;
        self.last_attempt_at = Some(at);
    }

    pub(crate) fn apply_sent(&mut self, delivery: &Delivery) {
        self.status = SendStatus::Sent;
        self.provider_message_id = Some(delivery.message_id.clone());
        self.provider_thread_id = delivery.thread_id.clone();
        self.sent_at = Some(delivery.sent_at);
        self.error_message = None;
    }

    pub(crate) fn apply_failed(&mut self, error: &str) {
        self.status = SendStatus::Failed;
        self.error_message = Some(error.to_string());
    }
}

/// Provider identifiers recorded when a transmission succeeds
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}
