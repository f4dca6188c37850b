//! OAuth2 access-token management for connected mailboxes
//!
//! Tokens are stored per user. A token within five minutes of expiry is
//! refreshed with the stored refresh token before it is handed out; a stale
//! token is never returned.

use chrono::{Duration, Utc};
use log::{error, info, warn};
use std::sync::Arc;

use super::GmailApi;
use crate::models::Credential;
use crate::storage::OutboxStore;

/// A usable access token and the mailbox address it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("User {0} has not connected a Google account")]
    NotConnected(i64),

    #[error("User {0} needs to re-authenticate with Google")]
    NeedsReauth(i64),

    #[error("Credential storage failed: {0}")]
    Storage(String),
}

/// Hands out valid access tokens, refreshing them when needed
pub struct TokenManager {
    api: Arc<dyn GmailApi>,
    store: Arc<dyn OutboxStore>,
}

impl TokenManager {
    pub fn new(api: Arc<dyn GmailApi>, store: Arc<dyn OutboxStore>) -> Self {
        Self { api, store }
    }

    /// Get a valid access token for `user_id`, refreshing if needed
    pub fn get_valid_token(&self, user_id: i64) -> Result<AccessToken, AuthError> {
        let credential = self
            .store
            .get_credential(user_id)
            .map_err(|e| AuthError::Storage(format!("{:#}", e)))?;

        let Some(credential) = credential else {
            warn!("No OAuth account for user {}", user_id);
            return Err(AuthError::NotConnected(user_id));
        };

        if !credential.is_expired(Utc::now()) {
            return Ok(AccessToken {
                token: credential.access_token,
                email: credential.provider_email,
            });
        }

        self.refresh(credential)
    }

    fn refresh(&self, credential: Credential) -> Result<AccessToken, AuthError> {
        let user_id = credential.user_id;

        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            warn!("Token expired for user {} and no refresh token is stored", user_id);
            return Err(AuthError::NeedsReauth(user_id));
        };

        let response = match self.api.refresh_access_token(refresh_token) {
            Ok(response) => response,
            Err(e) => {
                error!("Token refresh failed for user {}: {}", user_id, e);
                return Err(AuthError::NeedsReauth(user_id));
            }
        };

        let expires_at = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));

        self.store
            .update_access_token(
                user_id,
                &response.access_token,
                expires_at,
                response.refresh_token.as_deref(),
            )
            .map_err(|e| AuthError::Storage(format!("{:#}", e)))?;

        info!("Refreshed access token for user {}", user_id);

        Ok(AccessToken {
            token: response.access_token,
            email: credential.provider_email,
        })
    }
}
