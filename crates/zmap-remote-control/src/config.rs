//! Session configuration.

use std::time::Duration;

use crate::error::ControlResult;
use crate::report::DebugLevel;
use crate::timeout::TimeoutList;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-attempt timeouts for outgoing requests.
    pub timeouts: TimeoutList,

    /// How often the driver polls the sockets.
    pub socket_poll_interval: Duration,

    /// How often the driver runs the state machine.
    pub queue_poll_interval: Duration,

    pub debug_level: DebugLevel,

    /// Number of state transitions remembered by `state_history`.
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutList::default(),
            socket_poll_interval: Duration::from_millis(10),
            queue_poll_interval: Duration::from_millis(20),
            debug_level: DebugLevel::Normal,
            history_limit: 64,
        }
    }
}

impl SessionConfig {
    /// Builder: set the timeout list from comma separated milliseconds.
    pub fn with_timeouts(mut self, csv: &str) -> ControlResult<Self> {
        self.timeouts = TimeoutList::parse(csv)?;
        Ok(self)
    }

    /// Builder: set both poll intervals.
    pub fn with_poll_intervals(mut self, socket: Duration, queue: Duration) -> Self {
        self.socket_poll_interval = socket;
        self.queue_poll_interval = queue;
        self
    }

    pub fn with_debug_level(mut self, level: DebugLevel) -> Self {
        self.debug_level = level;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}
