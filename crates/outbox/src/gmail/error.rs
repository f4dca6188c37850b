//! Gmail API error classification

/// A failed call to the Gmail (or Google OAuth) API
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// The API answered with a non-success status
    #[error("Gmail API returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response (DNS, TLS, timeout, ...)
    #[error("Gmail request failed: {0}")]
    Transport(String),

    /// The response body could not be decoded
    #[error("Failed to decode Gmail response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// HTTP status code, when the API answered at all
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Status { message, .. } => message,
            Self::Transport(message) | Self::Decode(message) => message,
        }
    }

    /// A 404, or any error whose message says "not found"
    ///
    /// Gmail reports a deleted thread either way depending on the endpoint.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404) || self.message().to_lowercase().contains("not found")
    }

    /// The resource already exists
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// The token lacks the scope or access required for the call
    pub fn is_permission_denied(&self) -> bool {
        if self.status_code() == Some(403) {
            return true;
        }
        let message = self.message().to_lowercase();
        message.contains("insufficient permission")
            || message.contains("permission denied")
            || message.contains("insufficient authentication scopes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_by_status_or_message() {
        assert!(ApiError::status(404, "Requested entity was not found.").is_not_found());
        assert!(ApiError::status(400, "Thread Not Found").is_not_found());
        assert!(!ApiError::status(400, "Invalid thread id").is_not_found());
        assert!(!ApiError::Transport("connection reset".into()).is_not_found());
    }

    #[test]
    fn test_conflict_and_permission() {
        assert!(ApiError::status(409, "Label name exists or conflicts").is_conflict());
        assert!(!ApiError::status(400, "Label name exists").is_conflict());

        assert!(ApiError::status(403, "Forbidden").is_permission_denied());
        assert!(
            ApiError::status(400, "Request had insufficient authentication scopes.")
                .is_permission_denied()
        );
        assert!(!ApiError::status(500, "Backend Error").is_permission_denied());
    }
}
