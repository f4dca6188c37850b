//! Per-user Google OAuth credential

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are treated as expired this long before their actual expiry
pub const EXPIRY_BUFFER_SECS: i64 = 5 * 60;

/// Stored OAuth tokens for one user's mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// When the access token expires (None = unknown, treated as expired)
    pub expires_at: Option<DateTime<Utc>>,
    /// Address of the connected Google account
    pub provider_email: String,
}

impl Credential {
    pub fn new(
        user_id: i64,
        provider_email: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            provider_email: provider_email.into(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the access token must be refreshed before use at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at - Duration::seconds(EXPIRY_BUFFER_SECS),
            None => true,
        }
    }
}
