//! Configuration commands.

use crate::config::PeerConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the effective configuration to stdout.
pub fn dump(config: &PeerConfig) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::config(format!("failed to serialize config: {e}")))?;
    println!("# config.toml ({})", PeerConfig::default_path().display());
    println!("{toml_str}");
    Ok(())
}

/// Show the configuration file path.
pub fn path() -> ClientResult<()> {
    println!("config: {}", PeerConfig::default_path().display());
    Ok(())
}
