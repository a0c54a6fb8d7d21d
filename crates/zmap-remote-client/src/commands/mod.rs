//! Command implementations.

pub mod config;
pub mod listen;
pub mod send;

use tracing::warn;

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
