//! Command codec: the only component that looks inside message bodies.

use std::fmt;

use crate::types::CommandEnvelope;

/// Envelope attributes the session needs to read out of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeAttr {
    RequestId,
    Timestamp,
}

impl fmt::Display for EnvelopeAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestId => f.write_str("request_id"),
            Self::Timestamp => f.write_str("timestamp"),
        }
    }
}

/// Reads and compares command bodies on behalf of the session.
///
/// Mismatches are reported as a human readable reason.
pub trait CommandCodec {
    /// Extracts an envelope attribute as text, `None` if the body lacks it.
    fn envelope_attr(&self, body: &str, attr: EnvelopeAttr) -> Option<String>;

    /// Command name carried by a request or reply.
    fn command(&self, body: &str) -> Option<String>;

    /// Queueing priority of a request, higher goes first.
    fn priority(&self, _body: &str) -> i32 {
        0
    }

    /// `Ok` when the two requests are the same request.
    fn requests_identical(&self, first: &str, second: &str) -> Result<(), String>;

    /// `Ok` when `reply` answers `request`.
    fn validate_reply(&self, request: &str, reply: &str) -> Result<(), String>;
}

/// Codec for [`CommandEnvelope`] JSON bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCommandCodec;

impl JsonCommandCodec {
    fn parse(body: &str, what: &str) -> Result<CommandEnvelope, String> {
        CommandEnvelope::from_body(body).map_err(|e| format!("unreadable {what}: {e}"))
    }
}

impl CommandCodec for JsonCommandCodec {
    fn envelope_attr(&self, body: &str, attr: EnvelopeAttr) -> Option<String> {
        let envelope = CommandEnvelope::from_body(body).ok()?;
        match attr {
            EnvelopeAttr::RequestId => Some(envelope.request_id),
            EnvelopeAttr::Timestamp => Some(envelope.timestamp.to_string()),
        }
    }

    fn command(&self, body: &str) -> Option<String> {
        CommandEnvelope::from_body(body).ok().map(|e| e.command)
    }

    fn priority(&self, body: &str) -> i32 {
        CommandEnvelope::from_body(body)
            .map(|e| e.priority)
            .unwrap_or_default()
    }

    fn requests_identical(&self, first: &str, second: &str) -> Result<(), String> {
        let first = Self::parse(first, "request")?;
        let second = Self::parse(second, "request")?;

        if first.request_id != second.request_id {
            return Err(format!(
                "request ids differ: {} vs {}",
                first.request_id, second.request_id
            ));
        }
        if first.command != second.command {
            return Err(format!(
                "commands differ: {} vs {}",
                first.command, second.command
            ));
        }
        if first.payload != second.payload {
            return Err("payloads differ".to_string());
        }
        Ok(())
    }

    fn validate_reply(&self, request: &str, reply: &str) -> Result<(), String> {
        let request = Self::parse(request, "request")?;
        let reply = Self::parse(reply, "reply")?;

        if reply.is_request() {
            return Err(format!("{} is a request, not a reply", reply.request_id));
        }
        if !reply.is_compatible() {
            return Err(format!(
                "reply protocol version {} is not supported",
                reply.protocol_version
            ));
        }
        if reply.request_id != request.request_id {
            return Err(format!(
                "reply is for request {} but {} is in flight",
                reply.request_id, request.request_id
            ));
        }
        if reply.command != request.command {
            return Err(format!(
                "reply is for command {} but request was {}",
                reply.command, request.command
            ));
        }
        Ok(())
    }
}
