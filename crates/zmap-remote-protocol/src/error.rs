//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while framing or parsing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: u32, max: u32 },

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended part way through a frame.
    #[error("incomplete frame: expected {expected} bytes, got {received}")]
    IncompleteFrame { expected: usize, received: usize },

    /// A header frame arrived without the body frame that must follow it.
    #[error("header frame received without a body frame")]
    ShortMessage,

    /// Frame content is not UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Header frame does not follow `<REQUEST|REPLY> <id>/<retry> <time>`.
    #[error("invalid header {header:?}: {reason}")]
    InvalidHeader { header: String, reason: String },

    /// Command body could not be (de)serialized.
    #[error("command serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Command body carries a protocol version we do not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),
}

impl ProtocolError {
    /// Creates an invalid header error.
    pub fn invalid_header(header: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            header: header.into(),
            reason: reason.into(),
        }
    }
}
