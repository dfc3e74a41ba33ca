//! Error taxonomy for the chat client core.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The socket closed or could not be reached. Handled by the reconnect policy.
    #[error("connection lost: {0}")]
    TransientConnection(String),

    /// Credential missing or rejected. Never retried.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Rejected locally before anything was sent.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The server refused an edit, delete or read request.
    #[error("server rejected request ({status}): {message}")]
    ServerRejection {
        status: u16,
        message: String,
        /// The server's `Retry-After`, when it sent one.
        retry_after: Option<Duration>,
    },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("connection is not open")]
    NotConnected,

    #[error("http error: {0}")]
    Http(String),

    /// A newer request for the same target was issued before this one completed.
    #[error("request superseded by a newer one")]
    Superseded,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        ChatError::ServerRejection {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Whether the reconnect policy should try again after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::TransientConnection(_) | ChatError::Http(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::Auth(_))
    }

    /// Errors that are reported to the user as a notice.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            ChatError::Superseded | ChatError::MalformedFrame(_) | ChatError::TransientConnection(_)
        )
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for ChatError {
    fn from(err: url::ParseError) -> Self {
        ChatError::Config(err.to_string())
    }
}
