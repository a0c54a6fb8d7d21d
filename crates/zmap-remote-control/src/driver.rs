//! Drives a session from tokio timers.
//!
//! Sockets are polled on one interval and the state machine runs on another,
//! both taken from the session's [`SessionConfig`](crate::SessionConfig).

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::ControlResult;
use crate::session::Session;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Polls and ticks `session` until `shutdown` completes.
///
/// Returns `Err(ControlError::Failed)` as soon as the session fails.
pub async fn run_until_shutdown<F>(session: &mut Session, shutdown: F) -> ControlResult<()>
where
    F: Future<Output = ()>,
{
    let socket_every = session.config().socket_poll_interval.max(MIN_INTERVAL);
    let queue_every = session.config().queue_poll_interval.max(MIN_INTERVAL);

    let mut sockets = tokio::time::interval(socket_every);
    sockets.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut queues = tokio::time::interval(queue_every);
    queues.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::pin!(shutdown);

    info!(
        app_id = session.app_id(),
        socket_poll_ms = socket_every.as_millis() as u64,
        queue_poll_ms = queue_every.as_millis() as u64,
        "Session driver started"
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!(app_id = session.app_id(), "Shutdown requested");
                break;
            }
            _ = sockets.tick() => {
                if let Err(e) = session.poll_replier().and_then(|()| session.poll_requestor()) {
                    warn!(app_id = session.app_id(), error = %e, "Socket poll failed");
                    return Err(e);
                }
            }
            _ = queues.tick() => {
                if let Err(e) = session.tick() {
                    warn!(app_id = session.app_id(), error = %e, "State machine stopped");
                    return Err(e);
                }
            }
        }
    }

    info!(app_id = session.app_id(), state = %session.state(), "Session driver stopped");
    Ok(())
}

/// Drives `session` for `duration`.
pub async fn run_for(session: &mut Session, duration: Duration) -> ControlResult<()> {
    run_until_shutdown(session, tokio::time::sleep(duration)).await
}
