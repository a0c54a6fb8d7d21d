//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// zmap-remote - talk to a RemoteControl peer
#[derive(Debug, Parser)]
#[command(name = "zmap-remote")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "ZMAP_REMOTE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Request timeouts in milliseconds, comma separated (e.g. 333,1000,3000)
    #[arg(long)]
    pub timeouts: Option<String>,

    /// Application id stamped on requests and replies
    #[arg(long)]
    pub app_id: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bind a replier, print its endpoint and answer requests
    Listen {
        /// Message to put in every reply
        #[arg(long)]
        reply_with: Option<String>,

        /// Exit after the first reply has been sent
        #[arg(long)]
        once: bool,
    },

    /// Send one request and print the reply
    Send {
        /// Endpoint of the peer's replier, e.g. tcp://127.0.0.1:5555
        #[arg(long)]
        peer: String,

        /// Command name
        #[arg(long)]
        command: String,

        /// Queueing priority, higher goes first
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,

        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Dump,
    /// Print the configuration file path
    Path,
}
