//! Peer configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/zmap-remote/config.toml` by default. Every key is optional.
//!
//! ```toml
//! app_id = "viewer"
//!
//! [session]
//! timeouts = "333,1000,3000,9000"
//! socket_poll_ms = 10
//! queue_poll_ms = 20
//! debug_level = "normal"
//!
//! [peer]
//! transport = "tcp"
//! bind_host = "127.0.0.1"
//! reply_message = "handled"
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zmap_remote_control::{DEFAULT_TIMEOUTS, DebugLevel, SessionConfig, TcpTransport, Transport};

use crate::error::{ClientError, ClientResult};

/// Configuration for a `zmap-remote` peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Application id stamped on requests and replies.
    pub app_id: String,

    pub session: SessionSettings,

    pub peer: PeerSettings,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            app_id: "zmap-remote".to_string(),
            session: SessionSettings::default(),
            peer: PeerSettings::default(),
        }
    }
}

/// Session state machine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Comma separated per-attempt timeouts in milliseconds.
    pub timeouts: String,

    pub socket_poll_ms: u64,

    pub queue_poll_ms: u64,

    /// `off`, `normal` or `verbose`.
    pub debug_level: String,

    pub history_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeouts: DEFAULT_TIMEOUTS.to_string(),
            socket_poll_ms: 10,
            queue_poll_ms: 20,
            debug_level: "normal".to_string(),
            history_limit: 64,
        }
    }
}

/// Socket backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    /// Needs the `zmq` feature.
    Zmq,
}

/// Transport and reply settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSettings {
    pub transport: TransportKind,

    /// Address the replier binds to.
    pub bind_host: IpAddr,

    /// Message put in replies when `--reply-with` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_message: Option<String>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            bind_host: IpAddr::from([127, 0, 0, 1]),
            reply_message: None,
        }
    }
}

impl PeerConfig {
    /// Loads configuration from the default path, or defaults if there is
    /// no file.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| ClientError::config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zmap-remote")
    }

    /// Builds the session configuration from the `[session]` table.
    pub fn session_config(&self) -> ClientResult<SessionConfig> {
        let settings = &self.session;
        let debug_level = DebugLevel::parse(&settings.debug_level).ok_or_else(|| {
            ClientError::config(format!("unknown debug_level {:?}", settings.debug_level))
        })?;

        Ok(SessionConfig::default()
            .with_timeouts(&settings.timeouts)?
            .with_poll_intervals(
                Duration::from_millis(settings.socket_poll_ms),
                Duration::from_millis(settings.queue_poll_ms),
            )
            .with_debug_level(debug_level)
            .with_history_limit(settings.history_limit))
    }

    /// Creates the transport named in the `[peer]` table.
    pub fn transport(&self) -> ClientResult<Box<dyn Transport>> {
        match self.peer.transport {
            TransportKind::Tcp => Ok(Box::new(
                TcpTransport::new().with_bind_host(self.peer.bind_host),
            )),
            #[cfg(feature = "zmq")]
            TransportKind::Zmq => Ok(Box::new(zmap_remote_control::ZmqTransport::new())),
            #[cfg(not(feature = "zmq"))]
            TransportKind::Zmq => Err(ClientError::config(
                "transport \"zmq\" needs zmap-remote built with the zmq feature",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.app_id, "zmap-remote");
        assert_eq!(config.session.timeouts, "333,1000,3000,9000");
        assert_eq!(config.peer.transport, TransportKind::Tcp);

        let session = config.session_config().unwrap();
        assert_eq!(session.queue_poll_interval, Duration::from_millis(20));
        assert_eq!(session.debug_level, DebugLevel::Normal);
    }

    #[test]
    fn load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
app_id = "viewer"

[session]
timeouts = "5,50"
debug_level = "verbose"

[peer]
reply_message = "handled"
"#
        )
        .unwrap();

        let config = PeerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.app_id, "viewer");
        assert_eq!(config.session.socket_poll_ms, 10);
        assert_eq!(config.peer.reply_message.as_deref(), Some("handled"));

        let session = config.session_config().unwrap();
        assert_eq!(session.timeouts.to_string(), "5,50");
        assert_eq!(session.debug_level, DebugLevel::Verbose);
    }

    #[test]
    fn dump_parses_back() {
        let mut config = PeerConfig::default();
        config.peer.reply_message = Some("hi".to_string());
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: PeerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn bad_values_rejected() {
        let mut config = PeerConfig::default();
        config.session.debug_level = "loud".to_string();
        assert!(matches!(config.session_config(), Err(ClientError::Config(_))));

        let mut config = PeerConfig::default();
        config.session.timeouts = "later".to_string();
        assert!(matches!(config.session_config(), Err(ClientError::Session(_))));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(PeerConfig::load_from(&missing), Err(ClientError::Config(_))));
    }

    #[test]
    fn default_path_is_under_zmap_remote() {
        let path = PeerConfig::default_path();
        assert!(path.ends_with("zmap-remote/config.toml"));
    }

    #[cfg(not(feature = "zmq"))]
    #[test]
    fn zmq_needs_feature() {
        let mut config = PeerConfig::default();
        config.peer.transport = TransportKind::Zmq;
        assert!(matches!(config.transport(), Err(ClientError::Config(_))));
    }
}
