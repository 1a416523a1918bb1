//! Error types for the vendor client

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// HTTP status carried by the error, if the server answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::HttpRequest(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Message suitable for showing to a user
    ///
    /// Understands the backend's error bodies: a bare string, a `message`
    /// field, or field-keyed lists of messages, which are joined with spaces.
    pub fn user_message(&self) -> String {
        let message = match self {
            ClientError::Status { body, .. } => message_from_body(body).unwrap_or_else(|| self.to_string()),
            other => other.to_string(),
        };

        if message.trim().is_empty() {
            "Something went wrong".to_string()
        } else {
            message
        }
    }
}

fn message_from_body(body: &str) -> Option<String> {
    let data: Value = match serde_json::from_str(body) {
        Ok(data) => data,
        Err(_) => return (!body.trim().is_empty()).then(|| body.to_string()),
    };

    match data {
        Value::String(s) => Some(s),
        Value::Object(fields) => {
            if let Some(Value::String(message)) = fields.get("message") {
                return Some(message.clone());
            }
            let parts: Vec<String> = fields
                .values()
                .flat_map(|value| match value {
                    Value::Array(items) => items.iter().map(plain_text).collect(),
                    other => vec![plain_text(other)],
                })
                .collect();
            Some(parts.join(" "))
        }
        _ => None,
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Why a refresh episode ended without a new access token.
///
/// Cloneable because a single outcome is handed to every queued waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Refresh rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Refresh response invalid: {0}")]
    InvalidResponse(String),

    #[error("Refresh timed out")]
    TimedOut,

    #[error("Refresh abandoned before completion")]
    Abandoned,
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(body: &str) -> ClientError {
        ClientError::Status {
            status: StatusCode::BAD_REQUEST,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_user_message_variants() {
        assert_eq!(status_error(r#""Account disabled""#).user_message(), "Account disabled");
        assert_eq!(
            status_error(r#"{"message":"Vendor not found","code":4}"#).user_message(),
            "Vendor not found"
        );
        assert_eq!(
            status_error(r#"{"username":["A user with that username already exists."],"email":["Enter a valid email."]}"#)
                .user_message(),
            "Enter a valid email. A user with that username already exists."
        );
        assert_eq!(status_error("Bad Gateway").user_message(), "Bad Gateway");
    }

    #[test]
    fn test_user_message_fallbacks() {
        assert_eq!(status_error("{}").user_message(), "Something went wrong");
        assert_eq!(
            ClientError::Refresh(RefreshError::MissingRefreshToken).user_message(),
            "Token refresh failed: No refresh token available"
        );
    }

    #[test]
    fn test_refresh_error_status() {
        let err = ClientError::from(RefreshError::TimedOut);
        assert!(err.status().is_none());
        assert!(!err.is_unauthorized());

        let err = ClientError::Status {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        assert!(err.is_unauthorized());
    }
}
