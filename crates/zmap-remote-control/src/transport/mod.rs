//! Point-to-point message sockets.
//!
//! A session owns up to two sockets: a replier bound to a local endpoint
//! that receives the peer's requests, and a requestor connected to the peer's
//! replier that carries our requests. All operations are non-blocking.
//!
//! - [`TcpTransport`]: plain TCP with length-prefixed frames (default).
//! - [`MemoryTransport`]: in-process loopback, for tests and embedding.
//! - `ZmqTransport`: libzmq REQ/REP sockets, behind the `zmq` feature.

mod memory;
mod tcp;
#[cfg(feature = "zmq")]
mod zeromq;

use thiserror::Error;
use zmap_remote_protocol::{ProtocolError, WireMessage};

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;
#[cfg(feature = "zmq")]
pub use zeromq::ZmqTransport;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket cannot accept a write right now.
    #[error("socket is not writable")]
    NotWritable,

    /// Header frame arrived without its body frame.
    #[error("header received without a body")]
    ShortMessage,

    /// Socket was closed.
    #[error("socket is closed")]
    Closed,

    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("cannot reach {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    #[cfg(feature = "zmq")]
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::ShortMessage => Self::ShortMessage,
            ProtocolError::Io(e) => Self::Io(e),
            other => Self::Protocol(other),
        }
    }
}

/// Creates the sockets a session uses.
pub trait Transport {
    /// Binds a replier to a fresh local endpoint.
    fn bind_replier(&mut self) -> TransportResult<Box<dyn MessageSocket>>;

    /// Connects a requestor to the peer's replier endpoint.
    fn connect_requestor(&mut self, endpoint: &str) -> TransportResult<Box<dyn MessageSocket>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn bind_replier(&mut self) -> TransportResult<Box<dyn MessageSocket>> {
        (**self).bind_replier()
    }

    fn connect_requestor(&mut self, endpoint: &str) -> TransportResult<Box<dyn MessageSocket>> {
        (**self).connect_requestor(endpoint)
    }
}

/// A non-blocking two-frame message socket.
pub trait MessageSocket {
    /// Endpoint this socket is bound or connected to.
    fn endpoint(&self) -> &str;

    /// Sends header and body, or fails without sending anything.
    fn try_send(&mut self, message: &WireMessage) -> TransportResult<()>;

    /// Fetches one message if one is available.
    fn try_fetch(&mut self) -> TransportResult<Option<WireMessage>>;

    /// Closes the socket, disconnecting first if asked. Closing twice is a
    /// no-op.
    fn close(&mut self, disconnect: bool) -> TransportResult<()>;
}
