//! Sending through a user's Gmail mailbox
//!
//! `send` implements the thread-aware protocol: a message goes into the
//! conversation's known thread, and if Gmail no longer knows that thread
//! the message is rebuilt once as the start of a new conversation.

use anyhow::Result;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use super::api::{SendMessageRequest, SentMessageResponse};
use super::mime::{AttachmentPart, bare_message_id, build_mime_message, encode_raw};
use super::{ApiError, AuthError, GmailApi, LabelManager, TokenManager};
use crate::models::OutgoingEmail;
use crate::storage::OutboxStore;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Attachment unavailable: {0}")]
    Attachment(String),
}

/// Provider identifiers of a delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    pub thread_id: Option<String>,
    /// The remembered thread was gone and the message opened a new one
    pub started_new_thread: bool,
}

/// Result of labeling a recipient's copy of a sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelOutcome {
    Applied,
    /// The search found nothing yet
    NotYetDelivered,
    /// The recipient's grant lacks the scope to modify labels
    PermissionDenied,
    /// The recipient has no usable Google connection
    NotConnected,
    Failed(String),
}

pub struct GmailTransport {
    api: Arc<dyn GmailApi>,
    store: Arc<dyn OutboxStore>,
    tokens: TokenManager,
    labels: LabelManager,
    settle_delay: Duration,
}

impl GmailTransport {
    /// Create a transport
    ///
    /// # Arguments
    /// * `settle_delay` - How long to wait before searching a recipient's
    ///   mailbox for a message that was just sent
    pub fn new(api: Arc<dyn GmailApi>, store: Arc<dyn OutboxStore>, settle_delay: Duration) -> Self {
        Self {
            tokens: TokenManager::new(api.clone(), store.clone()),
            labels: LabelManager::new(api.clone(), store.clone()),
            api,
            store,
            settle_delay,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Send `email` from `user_id`'s mailbox
    ///
    /// Applies `email.label_path` to the sender's copy on success. Label
    /// failures are logged and do not fail the send.
    pub fn send(&self, user_id: i64, email: &OutgoingEmail) -> Result<SentMessage, TransportError> {
        let token = self.tokens.get_valid_token(user_id)?;

        let attachments = email
            .attachments
            .iter()
            .map(AttachmentPart::load)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| TransportError::Attachment(format!("{:#}", e)))?;

        let (response, started_new_thread) =
            match self.send_once(&token.token, email, &attachments) {
                Ok(response) => (response, false),
                Err(e) if e.is_not_found() && email.thread_id.is_some() => {
                    warn!(
                        "Thread {} not found for user {}, starting a new conversation",
                        email.thread_id.as_deref().unwrap_or_default(),
                        user_id
                    );
                    let fresh = email.without_thread();
                    match self.send_once(&token.token, &fresh, &attachments) {
                        Ok(response) => (response, true),
                        Err(e) => {
                            error!("Gmail send failed after thread fallback: {}", e);
                            return Err(e.into());
                        }
                    }
                }
                Err(e) => {
                    error!("Gmail send failed: {}", e);
                    return Err(e.into());
                }
            };

        info!("Email sent: {}", response.id);

        if let Some(label_path) = &email.label_path
            && let Err(e) = self
                .labels
                .apply_label(user_id, &token.token, &response.id, label_path)
        {
            warn!("Failed to apply label {}: {:#}", label_path, e);
        }

        Ok(SentMessage {
            message_id: response.id,
            thread_id: response.thread_id,
            started_new_thread,
        })
    }

    fn send_once(
        &self,
        access_token: &str,
        email: &OutgoingEmail,
        attachments: &[AttachmentPart],
    ) -> Result<SentMessageResponse, ApiError> {
        let message = build_mime_message(email, attachments);
        let request = SendMessageRequest {
            raw: encode_raw(&message),
            thread_id: email.thread_id.clone(),
        };
        self.api.send_message(access_token, &request)
    }

    /// Connected users among the recipients of `email`, other than the sender
    pub fn find_internal_recipients(&self, sender_id: i64, email: &OutgoingEmail) -> Result<Vec<i64>> {
        let ids = self.store.find_connected_user_ids(&email.all_recipients())?;
        Ok(ids.into_iter().filter(|id| *id != sender_id).collect())
    }

    /// Label the copy of a sent message that landed in a recipient's mailbox
    ///
    /// Blocks for the settle delay before searching, so call it off the
    /// sending path. Nothing here is retried.
    pub fn label_recipient_copy(
        &self,
        recipient_id: i64,
        message_id_header: &str,
        label_path: &str,
    ) -> LabelOutcome {
        let token = match self.tokens.get_valid_token(recipient_id) {
            Ok(token) => token,
            Err(AuthError::Storage(e)) => return LabelOutcome::Failed(e),
            Err(_) => return LabelOutcome::NotConnected,
        };

        std::thread::sleep(self.settle_delay);

        let query = format!("rfc822msgid:{}", bare_message_id(message_id_header));
        let found = match self.api.search_messages(&token.token, &query, 1) {
            Ok(found) => found,
            Err(e) if e.is_permission_denied() => return LabelOutcome::PermissionDenied,
            Err(e) => return LabelOutcome::Failed(e.to_string()),
        };

        let Some(message) = found.first() else {
            return LabelOutcome::NotYetDelivered;
        };

        match self
            .labels
            .apply_label(recipient_id, &token.token, &message.id, label_path)
        {
            Ok(()) => LabelOutcome::Applied,
            Err(e) => match e.downcast_ref::<ApiError>() {
                Some(api) if api.is_permission_denied() => LabelOutcome::PermissionDenied,
                _ => LabelOutcome::Failed(format!("{:#}", e)),
            },
        }
    }
}
