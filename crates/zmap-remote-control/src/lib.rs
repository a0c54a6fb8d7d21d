//! RemoteControl session layer.
//!
//! Two peers each run a [`Session`]. A session receives the peer's requests
//! on its replier socket and sends its own on a requestor socket connected
//! to the peer's replier. The state machine keeps one transaction in flight
//! at a time, resends on timeout, answers repeated requests from the last
//! reply and decides request collisions the same way on both sides.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use zmap_remote_control::{Session, TcpTransport, driver};
//! use zmap_remote_protocol::{CommandEnvelope, ReplyStatus};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::new("viewer", TcpTransport::new(), |e| eprintln!("{e}"));
//!     let endpoint = session.receive_init(
//!         |body, handle| {
//!             if let Ok(request) = CommandEnvelope::from_body(body)
//!                 && let Ok(reply) = CommandEnvelope::reply_to(&request, "viewer", ReplyStatus::Ok).to_body()
//!             {
//!                 let _ = handle.reply(reply);
//!             }
//!         },
//!         |_| {},
//!     )?;
//!     println!("listening on {endpoint}");
//!     driver::run_for(&mut session, Duration::from_secs(10)).await?;
//!     Ok(())
//! }
//! ```

mod collision;
mod config;
pub mod driver;
mod error;
mod handle;
mod queue;
mod report;
mod request;
mod session;
mod state;
mod timeout;
pub mod transport;

pub use collision::{CollisionSide, CollisionWinner, resolve as resolve_collision};
pub use config::SessionConfig;
pub use error::{ControlError, ControlResult, ErrorKind, SessionError};
pub use handle::{ReplyHandle, RequestHandle};
pub use queue::MessageQueue;
pub use report::{Component, DebugLevel, LogRecord, LogSink, MemorySink, TracingSink};
pub use request::{RequestReply, RequestType};
pub use session::Session;
pub use state::SessionState;
pub use timeout::{DEFAULT_TIMEOUTS, TimeoutController, TimeoutList, TimeoutListError, TimeoutStatus};
pub use transport::{MemoryNetwork, MemoryTransport, MessageSocket, TcpTransport, Transport, TransportError, TransportResult};
#[cfg(feature = "zmq")]
pub use transport::ZmqTransport;
