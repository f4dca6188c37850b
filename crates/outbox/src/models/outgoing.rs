//! A fully resolved email, ready to be turned into MIME and transmitted

use super::Attachment;

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub from_email: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub label_path: Option<String>,
    /// Provider thread to send into, when the conversation already exists
    pub thread_id: Option<String>,
    /// Seed Message-ID of the conversation, for In-Reply-To/References
    pub in_reply_to: Option<String>,
    /// Message-ID header for this attempt
    pub message_id: String,
    pub attachments: Vec<Attachment>,
}

impl OutgoingEmail {
    /// The same email detached from any existing conversation
    pub fn without_thread(&self) -> Self {
        Self {
            thread_id: None,
            in_reply_to: None,
            ..self.clone()
        }
    }

    /// Every address the message is delivered to
    pub fn all_recipients(&self) -> Vec<String> {
        self.to.iter().chain(self.cc.iter()).cloned().collect()
    }
}
