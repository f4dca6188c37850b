//! Email service: accepts send requests and drives their transmission
//!
//! `send` does everything that can reject a request (credential, sender,
//! recipients, template) before persisting a `pending` record, then hands
//! the network work to the dispatcher and returns. `transmit` is the
//! detached task; it never fails outward and records every outcome on the
//! send record. `retry_failed` re-runs `transmit` for failed records under
//! the retry ceiling.

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::attachments::{AttachmentRequest, resolve_attachments};
use crate::config::OutboxSettings;
use crate::dispatch::Dispatcher;
use crate::gmail::mime::generate_message_id;
use crate::gmail::{AuthError, GmailTransport, LabelOutcome};
use crate::models::{
    ConversationKey, ConversationThread, Delivery, NewSendRecord, OutgoingEmail, RecipientSource,
    SendRecord, SendStatus, tender_label_path,
};
use crate::recipients::RecipientResolver;
use crate::storage::{Directory, OutboxStore};
use crate::templates::TemplateRenderer;

/// Reference type used for tender correspondence
pub const TENDER_REFERENCE: &str = "tender";

/// Why a send request was refused
///
/// The display string is the reason reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendRejection {
    #[error("Sender needs to authenticate with Google.")]
    NeedsAuthentication,

    #[error("Sender not found.")]
    UnknownSender,

    #[error("No valid recipients.")]
    NoRecipients,

    #[error("Tender not found.")]
    UnknownTender,

    #[error("Template error: {0}")]
    Template(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn internal(err: anyhow::Error) -> SendRejection {
    SendRejection::Internal(format!("{:#}", err))
}

/// A request to email about a business entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub reference_type: String,
    pub reference_id: i64,
    pub event_type: String,
    pub from_user_id: i64,
    pub to: Vec<RecipientSource>,
    #[serde(default)]
    pub cc: Vec<RecipientSource>,
    pub subject: String,
    pub template: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub label_path: Option<String>,
    pub attachments: Option<AttachmentRequest>,
}

/// A send about a tender; the label path and reference are derived
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderEmailRequest {
    pub tender_id: i64,
    pub event_type: String,
    pub from_user_id: i64,
    pub to: Vec<RecipientSource>,
    #[serde(default)]
    pub cc: Vec<RecipientSource>,
    pub subject: String,
    pub template: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub attachments: Option<AttachmentRequest>,
}

/// Outcome counts of one retry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct EmailService {
    store: Arc<dyn OutboxStore>,
    directory: Arc<dyn Directory>,
    resolver: Arc<RecipientResolver>,
    transport: Arc<GmailTransport>,
    renderer: Arc<dyn TemplateRenderer>,
    dispatcher: Arc<dyn Dispatcher>,
    settings: Arc<OutboxSettings>,
}

impl EmailService {
    /// Wire the service together, loading the recipient lookups
    pub fn new(
        store: Arc<dyn OutboxStore>,
        directory: Arc<dyn Directory>,
        transport: GmailTransport,
        renderer: Arc<dyn TemplateRenderer>,
        dispatcher: Arc<dyn Dispatcher>,
        settings: OutboxSettings,
    ) -> anyhow::Result<Self> {
        let resolver = RecipientResolver::load(directory.clone())?;

        Ok(Self {
            store,
            directory,
            resolver: Arc::new(resolver),
            transport: Arc::new(transport),
            renderer,
            dispatcher,
            settings: Arc::new(settings),
        })
    }

    pub fn resolver(&self) -> &RecipientResolver {
        &self.resolver
    }

    pub fn settings(&self) -> &OutboxSettings {
        &self.settings
    }

    /// Validate, render and persist an email, then dispatch its transmission
    ///
    /// Returns the send record ID as soon as the `pending` record exists.
    pub fn send(&self, request: SendRequest) -> Result<i64, SendRejection> {
        match self.transport.tokens().get_valid_token(request.from_user_id) {
            Ok(_) => {}
            Err(AuthError::Storage(e)) => return Err(SendRejection::Internal(e)),
            Err(_) => return Err(SendRejection::NeedsAuthentication),
        }

        let sender = self
            .directory
            .get_user(request.from_user_id)
            .map_err(internal)?
            .ok_or(SendRejection::UnknownSender)?;

        let to = self.resolver.resolve_all(&request.to).map_err(internal)?;
        if to.is_empty() {
            return Err(SendRejection::NoRecipients);
        }
        let cc = self.resolver.resolve_all(&request.cc).map_err(internal)?;

        let mut render_data = request.data.clone();
        render_data.insert("senderName".to_string(), Value::String(sender.name.clone()));
        let body_html = self
            .renderer
            .render(&request.template, &serde_json::json!({ "data": render_data }))
            .map_err(|e| SendRejection::Template(format!("{:#}", e)))?;

        let attachments = request
            .attachments
            .as_ref()
            .map(|files| resolve_attachments(&self.settings.uploads_root, files))
            .unwrap_or_default();

        let cc_suppressed = !self.settings.is_production() && !cc.is_empty();

        let record = self
            .store
            .insert_record(NewSendRecord {
                conversation: ConversationKey::new(request.reference_type, request.reference_id),
                event_type: request.event_type,
                from_user_id: sender.id,
                from_email: sender.email,
                to_emails: to,
                cc_emails: cc,
                cc_suppressed,
                subject: request.subject,
                template_name: request.template,
                template_data: Value::Object(request.data),
                body_html,
                label_path: request.label_path,
                attachments,
            })
            .map_err(internal)?;

        info!("Email {} queued ({})", record.id, record.event_type);

        let id = record.id;
        let service = self.clone();
        let dispatched = self
            .dispatcher
            .dispatch(&format!("outbox-send-{}", id), Box::new(move || service.transmit(id)));

        // Left pending, the record would never be picked up again
        if let Err(e) = dispatched {
            error!("Failed to start transmission of email {}: {:#}", id, e);
            let message = format!("Failed to start transmission: {:#}", e);
            if let Err(e) = self.store.mark_failed(id, &message) {
                error!("Failed to record failure of email {}: {:#}", id, e);
            }
        }

        Ok(id)
    }

    /// Send about a tender, labeled under `Tendering/<team>/<tender>`
    pub fn send_tender_email(&self, request: TenderEmailRequest) -> Result<i64, SendRejection> {
        let tender = self
            .directory
            .get_tender(request.tender_id)
            .map_err(internal)?
            .ok_or(SendRejection::UnknownTender)?;

        let team_name = self.resolver.team_name(tender.team_id);
        let label_path = tender_label_path(&team_name, &tender.name);

        let mut data = request.data;
        data.insert("teamName".to_string(), Value::String(team_name));
        data.insert("tenderName".to_string(), Value::String(tender.name));

        self.send(SendRequest {
            reference_type: TENDER_REFERENCE.to_string(),
            reference_id: tender.id,
            event_type: request.event_type,
            from_user_id: request.from_user_id,
            to: request.to,
            cc: request.cc,
            subject: request.subject,
            template: request.template,
            data,
            label_path: Some(label_path),
            attachments: request.attachments,
        })
    }

    /// Make one transmission attempt for a record
    ///
    /// Only records in `pending` or `failed` are picked up, so an attempt
    /// already in flight is never duplicated. Every outcome ends up on the
    /// record.
    pub fn transmit(&self, record_id: i64) {
        let record = match self.store.mark_sending(record_id, Utc::now()) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("Email {} is not awaiting transmission", record_id);
                return;
            }
            Err(e) => {
                error!("Failed to start transmission of email {}: {:#}", record_id, e);
                return;
            }
        };

        let conversation = self
            .store
            .get_conversation(&record.conversation)
            .unwrap_or_else(|e| {
                warn!("Failed to load thread for email {}: {:#}", record.id, e);
                None
            });

        let email = self.outgoing_email(&record, conversation.as_ref());

        match self.transport.send(record.from_user_id, &email) {
            Ok(sent) => {
                // A fallback thread belongs to the conversation, not to this record
                let delivery = Delivery {
                    message_id: sent.message_id.clone(),
                    thread_id: if sent.started_new_thread {
                        None
                    } else {
                        sent.thread_id.clone()
                    },
                    sent_at: Utc::now(),
                };
                if let Err(e) = self.store.mark_sent(record.id, &delivery) {
                    error!("Failed to record delivery of email {}: {:#}", record.id, e);
                }

                if (conversation.is_none() || sent.started_new_thread)
                    && let Some(thread_id) = &sent.thread_id
                {
                    let thread = ConversationThread::new(
                        record.conversation.clone(),
                        thread_id.as_str(),
                        email.message_id.as_str(),
                    );
                    if let Err(e) = self.store.upsert_conversation(thread) {
                        warn!("Failed to save thread for email {}: {:#}", record.id, e);
                    }
                }

                info!("Email {} sent (attempt {})", record.id, record.attempts);

                if let Some(label_path) = &record.label_path {
                    self.label_recipient_copies(record.from_user_id, &email, label_path);
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!(
                    "Email {} failed (attempt {}): {}",
                    record.id, record.attempts, message
                );
                if let Err(e) = self.store.mark_failed(record.id, &message) {
                    error!("Failed to record failure of email {}: {:#}", record.id, e);
                }
            }
        }
    }

    /// Retry failed records under the retry ceiling, one at a time
    pub fn retry_failed(&self) -> RetryStats {
        let records = match self.store.list_retryable(self.settings.max_retries) {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to load failed emails: {:#}", e);
                return RetryStats::default();
            }
        };

        let mut stats = RetryStats::default();
        if records.is_empty() {
            return stats;
        }

        info!("Retrying {} failed emails", records.len());

        for record in records {
            self.transmit(record.id);

            match self.store.get_record(record.id) {
                Ok(Some(record)) if record.status == SendStatus::Sent => stats.sent += 1,
                _ => stats.failed += 1,
            }
        }

        stats
    }

    fn outgoing_email(
        &self,
        record: &SendRecord,
        conversation: Option<&ConversationThread>,
    ) -> OutgoingEmail {
        let cc = if self.settings.is_production() || record.cc_emails.is_empty() {
            record.cc_emails.clone()
        } else {
            info!(
                "[NON-PROD] CC recipients (logged, not sent): {}",
                record.cc_emails.join(", ")
            );
            Vec::new()
        };

        OutgoingEmail {
            from_email: record.from_email.clone(),
            to: record.to_emails.clone(),
            cc,
            subject: record.subject.clone(),
            html_body: record.body_html.clone(),
            label_path: record.label_path.clone(),
            thread_id: conversation
                .map(|c| c.provider_thread_id.clone())
                .filter(|id| !id.is_empty()),
            in_reply_to: conversation
                .map(|c| c.seed_message_id.clone())
                .filter(|id| !id.is_empty()),
            message_id: generate_message_id(&self.settings.mail_domain),
            attachments: record.attachments.clone(),
        }
    }

    /// Label each connected recipient's copy, each on its own task
    fn label_recipient_copies(&self, sender_id: i64, email: &OutgoingEmail, label_path: &str) {
        let recipients = match self.transport.find_internal_recipients(sender_id, email) {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!("Failed to look up internal recipients: {:#}", e);
                return;
            }
        };

        for recipient_id in recipients {
            let transport = self.transport.clone();
            let message_id = email.message_id.clone();
            let label_path = label_path.to_string();

            let dispatched = self.dispatcher.dispatch(
                &format!("outbox-label-{}", recipient_id),
                Box::new(move || {
                    match transport.label_recipient_copy(recipient_id, &message_id, &label_path) {
                        LabelOutcome::Applied => {
                            debug!("Labeled {} for user {}", label_path, recipient_id)
                        }
                        LabelOutcome::NotYetDelivered => {
                            debug!("Message not yet in mailbox of user {}", recipient_id)
                        }
                        LabelOutcome::PermissionDenied => {
                            debug!("No label permission for user {}", recipient_id)
                        }
                        LabelOutcome::NotConnected => {
                            debug!("User {} has no usable Google connection", recipient_id)
                        }
                        LabelOutcome::Failed(e) => {
                            warn!("Could not label mailbox of user {}: {}", recipient_id, e)
                        }
                    }
                }),
            );
            if let Err(e) = dispatched {
                warn!("Skipped labeling for user {}: {:#}", recipient_id, e);
            }
        }
    }
}
