//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 token refresh for connected user mailboxes
//! - Gmail API client for sending, searching and labeling messages
//! - MIME message construction
//! - Hierarchical label management
//! - The send protocol with stale-thread fallback

mod auth;
mod client;
mod error;
mod labels;
pub mod mime;
mod transport;

pub use auth::{AccessToken, AuthError, TokenManager};
pub use client::GmailClient;
pub use error::ApiError;
pub use labels::LabelManager;
pub use transport::{GmailTransport, LabelOutcome, SentMessage, TransportError};

use api::{Label, MessageRef, SendMessageRequest, SentMessageResponse, TokenResponse};

/// The subset of the Gmail API the outbox relies on
///
/// Every call takes the access token of the mailbox it acts on, so one
/// implementation serves all connected users.
pub trait GmailApi: Send + Sync {
    /// Exchange a refresh token for a new access token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, ApiError>;

    /// Send a raw (base64url) MIME message, optionally into an existing thread
    fn send_message(
        &self,
        access_token: &str,
        request: &SendMessageRequest,
    ) -> Result<SentMessageResponse, ApiError>;

    fn list_labels(&self, access_token: &str) -> Result<Vec<Label>, ApiError>;

    /// Create a label visible in both the label list and the message list
    fn create_label(&self, access_token: &str, name: &str) -> Result<Label, ApiError>;

    /// Add labels to a message
    fn modify_message(
        &self,
        access_token: &str,
        message_id: &str,
        add_label_ids: &[String],
    ) -> Result<(), ApiError>;

    /// Search the mailbox with Gmail query syntax
    fn search_messages(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageRef>, ApiError>;
}

/// Gmail API request and response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Body of `users.messages.send`
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SendMessageRequest {
        /// Base64url-encoded RFC 5322 message
        pub raw: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub thread_id: Option<String>,
    }

    /// Response from `users.messages.send`
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SentMessageResponse {
        pub id: String,
        pub thread_id: Option<String>,
        #[serde(default)]
        pub label_ids: Vec<String>,
    }

    /// A label in a user's mailbox
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Label {
        pub id: String,
        pub name: String,
        #[serde(rename = "type")]
        pub label_type: Option<String>,
    }

    /// Response from listing labels
    #[derive(Debug, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<Label>>,
    }

    /// Body of `users.labels.create`
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CreateLabelRequest<'a> {
        pub name: &'a str,
        pub label_list_visibility: &'a str,
        pub message_list_visibility: &'a str,
    }

    /// Body of `users.messages.modify`
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ModifyMessageRequest<'a> {
        pub add_label_ids: &'a [String],
    }

    /// Response from listing or searching messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: String,
    }

    /// Token response from Google
    #[derive(Debug, Clone, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        pub refresh_token: Option<String>,
        pub expires_in: Option<i64>,
        #[serde(default)]
        pub token_type: Option<String>,
    }
}
