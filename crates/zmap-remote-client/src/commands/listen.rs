//! `zmap-remote listen`: answer a peer's requests.

use tokio::sync::mpsc;
use tracing::{info, warn};
use zmap_remote_control::{Session, SessionError, driver};
use zmap_remote_protocol::{CommandEnvelope, ReplyStatus};

use super::shutdown_signal;
use crate::config::PeerConfig;
use crate::error::ClientResult;

/// Builds an `ok` reply to `request_body`, carrying `message` if given.
pub fn build_reply(app_id: &str, message: Option<&str>, request_body: &str) -> ClientResult<String> {
    let request = CommandEnvelope::from_body(request_body)?;
    let mut reply = CommandEnvelope::reply_to(&request, app_id, ReplyStatus::Ok);
    if let Some(message) = message {
        reply = reply.with_message(message);
    }
    Ok(reply.to_body()?)
}

/// Binds a replier, prints its endpoint and answers every request until
/// Ctrl-C, or after the first reply with `once`.
pub async fn run(config: &PeerConfig, reply_with: Option<String>, once: bool) -> ClientResult<()> {
    let mut session = Session::with_config(
        config.app_id.clone(),
        config.transport()?,
        config.session_config()?,
        |e: &SessionError| warn!(kind = %e.kind, component = %e.component, "{}", e.message),
    );

    let app_id = config.app_id.clone();
    let message = reply_with.or_else(|| config.peer.reply_message.clone());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

    let endpoint = session.receive_init(
        move |body, handle| {
            println!("{body}");
            match build_reply(&app_id, message.as_deref(), body) {
                Ok(reply) => {
                    if let Err(e) = handle.reply(reply) {
                        warn!(error = %e, "Reply not delivered");
                    }
                }
                Err(e) => {
                    warn!(request_id = handle.request_id(), error = %e, "Cannot answer request");
                    let _ = handle.abort();
                }
            }
        },
        move |_| {
            if once {
                let _ = done_tx.send(());
            }
        },
    )?;

    info!(endpoint = %endpoint, "Listening");
    println!("{endpoint}");

    let stop = async {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = done_rx.recv() => {}
        }
    };
    let result = driver::run_until_shutdown(&mut session, stop).await;
    session.destroy();
    Ok(result?)
}
