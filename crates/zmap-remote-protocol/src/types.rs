//! JSON command bodies.
//!
//! The session layer treats bodies as opaque text. Peers that do not bring
//! their own command format use [`CommandEnvelope`], a small JSON document
//! carrying the attributes the session needs (request id, timestamp,
//! command name, priority) around an arbitrary payload.

use serde::{Deserialize, Serialize};
use zmap_remote_core::RequestTime;

use crate::PROTOCOL_VERSION;
use crate::error::ProtocolResult;

/// Whether an envelope is a request or a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Request,
    Reply,
}

/// Outcome reported in a reply envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// Command executed.
    Ok,
    /// Command understood but failed.
    Failed,
    /// Command not known to the replying peer.
    Unknown,
}

/// A command request or reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub protocol_version: String,
    /// Application that produced this envelope.
    pub app_id: String,
    pub request_id: String,
    /// Time the request was issued. Replies carry their request's time.
    pub timestamp: RequestTime,
    pub kind: EnvelopeKind,
    pub command: String,
    /// Higher priority requests are sent first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReplyStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Creates a request stamped with the current time.
    pub fn request(
        app_id: impl Into<String>,
        request_id: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            app_id: app_id.into(),
            request_id: request_id.into(),
            timestamp: RequestTime::now(),
            kind: EnvelopeKind::Request,
            command: command.into(),
            priority: 0,
            status: None,
            message: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Creates the reply to `request`.
    pub fn reply_to(request: &CommandEnvelope, app_id: impl Into<String>, status: ReplyStatus) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            app_id: app_id.into(),
            request_id: request.request_id.clone(),
            timestamp: request.timestamp,
            kind: EnvelopeKind::Reply,
            command: request.command.clone(),
            priority: request.priority,
            status: Some(status),
            message: None,
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: RequestTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns true if this envelope speaks our protocol version.
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }

    pub fn is_request(&self) -> bool {
        self.kind == EnvelopeKind::Request
    }

    /// Serializes to a message body.
    pub fn to_body(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a message body.
    pub fn from_body(body: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(body)?)
    }
}
