//! Recipient descriptors accepted by the send API

use serde::{Deserialize, Serialize};

/// One way of naming who should receive an email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum RecipientSource {
    /// A single directory user, by ID
    User { user_id: i64 },
    /// Every active user holding `role` whose primary team is `team_id`
    Role { role: String, team_id: i64 },
    /// Literal addresses
    Emails { emails: Vec<String> },
}

impl RecipientSource {
    pub fn user(user_id: i64) -> Self {
        RecipientSource::User { user_id }
    }

    pub fn role(role: impl Into<String>, team_id: i64) -> Self {
        RecipientSource::Role {
            role: role.into(),
            team_id,
        }
    }

    pub fn emails<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RecipientSource::Emails {
            emails: emails.into_iter().map(Into::into).collect(),
        }
    }
}
