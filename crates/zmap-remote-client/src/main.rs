//! zmap-remote CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use zmap_remote_client::cli::{Cli, Command, ConfigAction};
use zmap_remote_client::commands;
use zmap_remote_client::config::PeerConfig;
use zmap_remote_client::error::ClientResult;
use zmap_remote_core::{TracingConfig, init_tracing};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = if cli.debug {
        TracingConfig::cli_debug()
    } else if cli.json_logs {
        TracingConfig::listener()
    } else {
        TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let mut config = match &cli.config {
        Some(path) => PeerConfig::load_from(path)?,
        None => PeerConfig::load()?,
    };
    if let Some(timeouts) = cli.timeouts {
        config.session.timeouts = timeouts;
    }
    if let Some(app_id) = cli.app_id {
        config.app_id = app_id;
    }

    match cli.command {
        Command::Listen { reply_with, once } => commands::listen::run(&config, reply_with, once).await,
        Command::Send {
            peer,
            command,
            priority,
            payload,
        } => commands::send::run(&config, &peer, &command, priority, payload.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
