//! CLI peer for a RemoteControl session.
//!
//! This crate provides the `zmap-remote` command-line tool, which can act as
//! either end of a session for testing the other end.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use config::PeerConfig;
pub use error::{ClientError, ClientResult};
