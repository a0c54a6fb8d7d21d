//! Session error types.

use std::fmt;

use thiserror::Error;
use zmap_remote_protocol::ProtocolError;

use crate::report::Component;
use crate::state::SessionState;
use crate::timeout::TimeoutListError;
use crate::transport::TransportError;

/// Result type for session operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The session is `FAILED` or `DYING`; only destroy is allowed.
    #[error("session has failed")]
    Failed,

    #[error("{half} is already initialised")]
    AlreadyInitialised { half: &'static str },

    #[error("{half} is not initialised")]
    NotInitialised { half: &'static str },

    #[error("invalid endpoint {endpoint:?}")]
    InvalidEndpoint { endpoint: String },

    #[error(transparent)]
    InvalidTimeoutList(#[from] TimeoutListError),

    /// Request body lacks an attribute the session needs.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Reply body lacks an attribute the session needs.
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    /// The session behind a handle has been dropped.
    #[error("session is gone")]
    SessionGone,

    /// Operation not allowed in the current state.
    #[error("cannot {operation} in state {state}")]
    BadState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ControlError {
    pub fn bad_state(operation: &'static str, state: SessionState) -> Self {
        Self::BadState { operation, state }
    }

    pub fn invalid_endpoint(endpoint: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
        }
    }
}

/// Classification of errors passed to the application error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Session found in a state it cannot act on.
    BadState,
    /// Socket create, bind, send or receive failure.
    BadSocket,
    /// Final timeout reached; the request was discarded.
    TimedOut,
    /// Reply that does not answer the request it was matched against.
    OutOfBand,
    /// Application aborted its reply.
    AppAbort,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadState => "BAD_STATE",
            Self::BadSocket => "BAD_SOCKET",
            Self::TimedOut => "TIMED_OUT",
            Self::OutOfBand => "OUT_OF_BAND",
            Self::AppAbort => "APP_ABORT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error delivered to the application's error handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: ErrorKind,
    /// State at the time of the error.
    pub state: SessionState,
    pub component: Component,
    pub message: String,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error code: {}, state: {}, component: {}, error: {}",
            self.kind, self.state, self.component, self.message
        )
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_display() {
        let err = SessionError {
            kind: ErrorKind::TimedOut,
            state: SessionState::OutgoingRequestWaitingForReply,
            component: Component::Timeout,
            message: "request zmap-1 timed out after 3 attempts".to_string(),
        };
        insta::assert_snapshot!(err.to_string(), @"Error code: TIMED_OUT, state: OUTGOING_REQUEST_WAITING_FOR_REPLY, component: timeout, error: request zmap-1 timed out after 3 attempts");
    }

    #[test]
    fn control_error_messages() {
        let err = ControlError::bad_state("supply a reply", SessionState::Idle);
        assert_eq!(err.to_string(), "cannot supply a reply in state IDLE");
        assert_eq!(
            ControlError::invalid_endpoint("").to_string(),
            "invalid endpoint \"\""
        );
    }
}
