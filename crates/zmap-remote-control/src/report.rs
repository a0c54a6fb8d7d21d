//! Session log reporting.
//!
//! Everything the session wants to say goes through a [`LogSink`]. The
//! default sink forwards to `tracing`; applications can install their own to
//! route session messages into an application log window.

use std::fmt;

use tracing::{Level, debug, error, info, trace, warn};

use crate::state::SessionState;

/// Part of the session a message or error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Session,
    /// Socket that sends our requests and receives the peer's replies.
    Requestor,
    /// Socket that receives the peer's requests and sends our replies.
    Replier,
    Timeout,
    Collision,
    /// The application's callbacks and reply handles.
    Application,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Requestor => "requestor",
            Self::Replier => "replier",
            Self::Timeout => "timeout",
            Self::Collision => "collision",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the state machine's work is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    /// Errors and warnings only.
    Off,
    /// Plus state transitions and message summaries.
    #[default]
    Normal,
    /// Plus full message headers and bodies.
    Verbose,
}

impl DebugLevel {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "off" | "none" => Some(Self::Off),
            "normal" => Some(Self::Normal),
            "verbose" | "full" => Some(Self::Verbose),
            _ => None,
        }
    }
}

/// One log message from a session.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub level: Level,
    pub app_id: &'a str,
    pub state: SessionState,
    pub component: Component,
    pub message: &'a str,
}

/// Receives session log messages.
pub trait LogSink {
    fn log(&mut self, record: &LogRecord<'_>);
}

/// Forwards session messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&mut self, record: &LogRecord<'_>) {
        let LogRecord {
            level,
            app_id,
            state,
            component,
            message,
        } = *record;
        if level == Level::ERROR {
            error!(app_id, %state, %component, "{message}");
        } else if level == Level::WARN {
            warn!(app_id, %state, %component, "{message}");
        } else if level == Level::INFO {
            info!(app_id, %state, %component, "{message}");
        } else if level == Level::DEBUG {
            debug!(app_id, %state, %component, "{message}");
        } else {
            trace!(app_id, %state, %component, "{message}");
        }
    }
}

/// Sink that keeps formatted records, for tests and log windows.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines logged so far, shared with every clone of this sink.
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

impl LogSink for MemorySink {
    fn log(&mut self, record: &LogRecord<'_>) {
        self.lines.borrow_mut().push(format!(
            "{} [{}] {} {}: {}",
            record.level, record.app_id, record.state, record.component, record.message
        ));
    }
}
