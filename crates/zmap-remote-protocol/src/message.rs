//! A complete two-frame message.

use crate::header::MessageHeader;

/// Header plus body, as carried over the wire.
///
/// The body is opaque to the session layer; only the command codec looks
/// inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub header: MessageHeader,
    pub body: String,
}

impl WireMessage {
    pub fn new(header: MessageHeader, body: impl Into<String>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.header.request_id
    }

    /// Copy of this message with the header's attempt number replaced.
    #[must_use]
    pub fn with_retry(&self, retry: u32) -> Self {
        Self {
            header: self.header.with_retry(retry),
            body: self.body.clone(),
        }
    }
}
