//! Handles given to application callbacks.
//!
//! Callbacks never touch the session directly. They get a handle that sends
//! over a channel, and the session drains the channel on its next tick.

use tokio::sync::mpsc::UnboundedSender;

use crate::error::{ControlError, ControlResult};

#[derive(Debug)]
pub(crate) enum AppReply {
    Reply { request_id: String, body: String },
    Abort { request_id: String },
}

/// Pending reply to one incoming request.
///
/// Consumed by [`reply`](Self::reply) or [`abort`](Self::abort). Dropping it
/// without either leaves the request waiting.
#[derive(Debug)]
pub struct ReplyHandle {
    request_id: String,
    tx: UnboundedSender<AppReply>,
}

impl ReplyHandle {
    pub(crate) fn new(request_id: impl Into<String>, tx: UnboundedSender<AppReply>) -> Self {
        Self {
            request_id: request_id.into(),
            tx,
        }
    }

    /// Id of the request this handle answers.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn reply(self, body: impl Into<String>) -> ControlResult<()> {
        self.tx
            .send(AppReply::Reply {
                request_id: self.request_id,
                body: body.into(),
            })
            .map_err(|_| ControlError::SessionGone)
    }

    /// Gives up on the request; the session reports `AppAbort`.
    pub fn abort(self) -> ControlResult<()> {
        self.tx
            .send(AppReply::Abort {
                request_id: self.request_id,
            })
            .map_err(|_| ControlError::SessionGone)
    }
}

/// Queues requests from inside callbacks.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    tx: UnboundedSender<String>,
}

impl RequestHandle {
    pub(crate) fn new(tx: UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Queues `body` as if passed to `Session::send_request`.
    pub fn send(&self, body: impl Into<String>) -> ControlResult<()> {
        self.tx
            .send(body.into())
            .map_err(|_| ControlError::SessionGone)
    }
}
