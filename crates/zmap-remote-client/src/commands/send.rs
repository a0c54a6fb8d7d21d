//! `zmap-remote send`: send one request and wait for the reply.

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;
use zmap_remote_control::{Session, SessionError, driver};
use zmap_remote_protocol::CommandEnvelope;

use super::shutdown_signal;
use crate::config::PeerConfig;
use crate::error::{ClientError, ClientResult};

#[derive(Debug)]
enum Outcome {
    Reply(String),
    Failed(String),
}

/// Builds a request body, returning its generated id alongside.
pub fn build_request(
    app_id: &str,
    command: &str,
    priority: i32,
    payload: Option<&str>,
) -> ClientResult<(String, String)> {
    let request_id = format!("{app_id}-{}", Uuid::new_v4());
    let mut request = CommandEnvelope::request(app_id, &request_id, command).with_priority(priority);
    if let Some(payload) = payload {
        let payload = serde_json::from_str(payload)
            .map_err(|e| ClientError::InvalidArgument(format!("payload is not JSON: {e}")))?;
        request = request.with_payload(payload);
    }
    let body = request.to_body()?;
    Ok((request_id, body))
}

/// Sends one request to `peer` and prints the reply body.
///
/// Fails if the session reports any error before the reply arrives, which
/// includes the last timeout expiring.
pub async fn run(
    config: &PeerConfig,
    peer: &str,
    command: &str,
    priority: i32,
    payload: Option<&str>,
) -> ClientResult<()> {
    let (request_id, body) = build_request(&config.app_id, command, priority, payload)?;

    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let error_tx = outcome_tx.clone();
    let mut session = Session::with_config(
        config.app_id.clone(),
        config.transport()?,
        config.session_config()?,
        move |e: &SessionError| {
            let _ = error_tx.send(Outcome::Failed(e.to_string()));
        },
    );

    session.send_init(
        peer,
        |body| debug!(bytes = body.len(), "Request sent"),
        move |reply| {
            let _ = outcome_tx.send(Outcome::Reply(reply.to_string()));
        },
    )?;
    session.send_request(body)?;
    debug!(request_id = %request_id, peer = %peer, "Request queued");

    let mut outcome = None;
    let wait = async {
        tokio::select! {
            received = outcome_rx.recv() => outcome = received,
            _ = shutdown_signal() => {}
        }
    };
    let result = driver::run_until_shutdown(&mut session, wait).await;
    session.destroy();

    match (outcome, result) {
        (Some(Outcome::Reply(reply)), _) => {
            println!("{reply}");
            Ok(())
        }
        (Some(Outcome::Failed(reason)), _) => Err(ClientError::RequestFailed { request_id, reason }),
        (None, Err(e)) => Err(e.into()),
        (None, Ok(())) => Err(ClientError::Interrupted(request_id)),
    }
}
