//! Client error types.

use thiserror::Error;
use zmap_remote_control::ControlError;
use zmap_remote_protocol::ProtocolError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A command-line value could not be used.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("session error: {0}")]
    Session(#[from] ControlError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session gave up on our request.
    #[error("request {request_id} failed: {reason}")]
    RequestFailed { request_id: String, reason: String },

    /// Interrupted before the peer replied.
    #[error("interrupted while waiting for a reply to {0}")]
    Interrupted(String),
}

impl ClientError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
