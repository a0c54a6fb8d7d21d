//! Session states.

use std::fmt;

/// Where a session is in its request/reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Neither half initialised.
    Inactive,
    Idle,
    OutgoingRequestToBeSent,
    OutgoingRequestWaitingForReply,
    IncomingRequestToBeReceived,
    IncomingRequestWaitingForOurReply,
    /// Unrecoverable error; only destroy is allowed.
    Failed,
    /// Being torn down.
    Dying,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Idle => "IDLE",
            Self::OutgoingRequestToBeSent => "OUTGOING_REQUEST_TO_BE_SENT",
            Self::OutgoingRequestWaitingForReply => "OUTGOING_REQUEST_WAITING_FOR_REPLY",
            Self::IncomingRequestToBeReceived => "INCOMING_REQUEST_TO_BE_RECEIVED",
            Self::IncomingRequestWaitingForOurReply => "INCOMING_REQUEST_WAITING_FOR_OUR_REPLY",
            Self::Failed => "FAILED",
            Self::Dying => "DYING",
        }
    }

    /// `Failed` and `Dying` never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Dying)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
