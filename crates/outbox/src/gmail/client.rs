//! Gmail API HTTP client
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic. Every request is
//! bounded by the agent's global timeout.

use serde::de::DeserializeOwned;
use std::time::Duration;
use ureq::Agent;
use ureq::http::Response;

use super::api::{
    CreateLabelRequest, Label, ListLabelsResponse, ListMessagesResponse, MessageRef,
    ModifyMessageRequest, SendMessageRequest, SentMessageResponse, TokenResponse,
};
use super::{ApiError, GmailApi};
use crate::config::GmailCredentials;

/// Gmail API client shared by every connected mailbox
pub struct GmailClient {
    agent: Agent,
    credentials: GmailCredentials,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Google OAuth2 token endpoint
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Create a new Gmail client
    ///
    /// # Arguments
    /// * `credentials` - OAuth client used for refresh-token grants
    /// * `timeout` - Upper bound on any single request
    pub fn new(credentials: GmailCredentials, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self { agent, credentials }
    }

    fn bearer(access_token: &str) -> String {
        format!("Bearer {}", access_token)
    }
}

impl GmailApi for GmailClient {
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, ApiError> {
        let response = self
            .agent
            .post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .map_err(transport_error)?;

        read_response(response)
    }

    fn send_message(
        &self,
        access_token: &str,
        request: &SendMessageRequest,
    ) -> Result<SentMessageResponse, ApiError> {
        let url = format!("{}/users/me/messages/send", Self::BASE_URL);

        let response = self
            .agent
            .post(&url)
            .header("Authorization", &Self::bearer(access_token))
            .send_json(request)
            .map_err(transport_error)?;

        read_response(response)
    }

    fn list_labels(&self, access_token: &str) -> Result<Vec<Label>, ApiError> {
        let url = format!("{}/users/me/labels", Self::BASE_URL);

        let response = self
            .agent
            .get(&url)
            .header("Authorization", &Self::bearer(access_token))
            .call()
            .map_err(transport_error)?;

        let list: ListLabelsResponse = read_response(response)?;
        Ok(list.labels.unwrap_or_default())
    }

    fn create_label(&self, access_token: &str, name: &str) -> Result<Label, ApiError> {
        let url = format!("{}/users/me/labels", Self::BASE_URL);

        let response = self
            .agent
            .post(&url)
            .header("Authorization", &Self::bearer(access_token))
            .send_json(&CreateLabelRequest {
                name,
                label_list_visibility: "labelShow",
                message_list_visibility: "show",
            })
            .map_err(transport_error)?;

        read_response(response)
    }

    fn modify_message(
        &self,
        access_token: &str,
        message_id: &str,
        add_label_ids: &[String],
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}/users/me/messages/{}/modify",
            Self::BASE_URL,
            urlencoding::encode(message_id)
        );

        let response = self
            .agent
            .post(&url)
            .header("Authorization", &Self::bearer(access_token))
            .send_json(&ModifyMessageRequest { add_label_ids })
            .map_err(transport_error)?;

        let _: serde_json::Value = read_response(response)?;
        Ok(())
    }

    fn search_messages(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<MessageRef>, ApiError> {
        let url = format!(
            "{}/users/me/messages?q={}&maxResults={}",
            Self::BASE_URL,
            urlencoding::encode(query),
            max_results.min(500)
        );

        let response = self
            .agent
            .get(&url)
            .header("Authorization", &Self::bearer(access_token))
            .call()
            .map_err(transport_error)?;

        let list: ListMessagesResponse = read_response(response)?;
        Ok(list.messages.unwrap_or_default())
    }
}

fn transport_error(err: ureq::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

/// Decode a success body, or turn an error status into `ApiError::Status`
fn read_response<T: DeserializeOwned>(mut response: Response<ureq::Body>) -> Result<T, ApiError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.body_mut().read_to_string().unwrap_or_default();
        return Err(ApiError::status(
            status.as_u16(),
            error_message(&body, status.canonical_reason()),
        ));
    }

    response
        .body_mut()
        .read_json()
        .map_err(|e| ApiError::Decode(e.to_string()))
}

/// Extract a human-readable message from a Google error body
///
/// Handles both API errors (`{"error": {"message": ...}}`) and OAuth errors
/// (`{"error": "invalid_grant", "error_description": ...}`).
fn error_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
        if let Some(description) = value.get("error_description").and_then(|d| d.as_str()) {
            return description.to_string();
        }
        if let Some(code) = value.get("error").and_then(|e| e.as_str()) {
            return code.to_string();
        }
    }

    let body = body.trim();
    if body.is_empty() {
        reason.unwrap_or("Unknown error").to_string()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_api_error_body() {
        let body = r#"{"error": {"code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND"}}"#;
        assert_eq!(error_message(body, None), "Requested entity was not found.");
    }

    #[test]
    fn test_error_message_from_oauth_error_body() {
        let body = r#"{"error": "invalid_grant", "error_description": "Token has been expired or revoked."}"#;
        assert_eq!(error_message(body, None), "Token has been expired or revoked.");

        let body = r#"{"error": "invalid_client"}"#;
        assert_eq!(error_message(body, None), "invalid_client");
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(error_message("upstream timeout", None), "upstream timeout");
        assert_eq!(error_message("", Some("Not Found")), "Not Found");
        assert_eq!(error_message("  ", None), "Unknown error");
    }

    #[test]
    fn test_send_request_omits_missing_thread() {
        let request = SendMessageRequest {
            raw: "abc".to_string(),
            thread_id: None,
        };
        assert_eq!(serde_json::to_string(&request).unwrap(), r#"{"raw":"abc"}"#);

        let request = SendMessageRequest {
            raw: "abc".to_string(),
            thread_id: Some("t1".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"raw":"abc","threadId":"t1"}"#
        );
    }
}
