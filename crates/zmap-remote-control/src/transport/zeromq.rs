//! libzmq REQ/REP transport.
//!
//! Every call uses `DONTWAIT`; `EAGAIN` on send means the socket cannot take
//! a message right now and on receive that nothing is waiting.

use tracing::debug;
use zmq::{Context, Socket};
use zmap_remote_protocol::{MessageHeader, WireMessage};

use super::{MessageSocket, Transport, TransportError, TransportResult};

const BIND_ENDPOINT: &str = "tcp://127.0.0.1:*";

/// Socket factory sharing one zmq context.
pub struct ZmqTransport {
    context: Context,
}

impl Default for ZmqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ZmqTransport {
    pub fn new() -> Self {
        Self {
            context: Context::new(),
        }
    }
}

impl Transport for ZmqTransport {
    fn bind_replier(&mut self) -> TransportResult<Box<dyn MessageSocket>> {
        let socket = self.context.socket(zmq::REP)?;
        socket.set_linger(0)?;
        socket.bind(BIND_ENDPOINT)?;
        let endpoint = socket
            .get_last_endpoint()?
            .map_err(|raw| TransportError::InvalidEndpoint(String::from_utf8_lossy(&raw).into_owned()))?;
        debug!(endpoint = %endpoint, "zmq replier bound");

        Ok(Box::new(ZmqSocket {
            socket: Some(socket),
            endpoint,
            connected: false,
        }))
    }

    fn connect_requestor(&mut self, endpoint: &str) -> TransportResult<Box<dyn MessageSocket>> {
        let socket = self.context.socket(zmq::REQ)?;
        socket.set_linger(0)?;
        socket
            .connect(endpoint)
            .map_err(|_| TransportError::InvalidEndpoint(endpoint.to_string()))?;

        Ok(Box::new(ZmqSocket {
            socket: Some(socket),
            endpoint: endpoint.to_string(),
            connected: true,
        }))
    }
}

struct ZmqSocket {
    socket: Option<Socket>,
    endpoint: String,
    /// Requestors connect, repliers bind.
    connected: bool,
}

impl ZmqSocket {
    fn socket(&self) -> TransportResult<&Socket> {
        self.socket.as_ref().ok_or(TransportError::Closed)
    }
}

impl MessageSocket for ZmqSocket {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn try_send(&mut self, message: &WireMessage) -> TransportResult<()> {
        let socket = self.socket()?;
        let header = message.header.to_string();
        let frames = [header.as_bytes(), message.body.as_bytes()];
        match socket.send_multipart(frames, zmq::DONTWAIT) {
            Ok(()) => Ok(()),
            Err(zmq::Error::EAGAIN) | Err(zmq::Error::EFSM) => Err(TransportError::NotWritable),
            Err(e) => Err(e.into()),
        }
    }

    fn try_fetch(&mut self) -> TransportResult<Option<WireMessage>> {
        let socket = self.socket()?;
        let header = match socket.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => bytes,
            Err(zmq::Error::EAGAIN) | Err(zmq::Error::EFSM) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !socket.get_rcvmore()? {
            return Err(TransportError::ShortMessage);
        }
        let body = match socket.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => bytes,
            Err(zmq::Error::EAGAIN) => return Err(TransportError::ShortMessage),
            Err(e) => return Err(e.into()),
        };

        let header = String::from_utf8(header).map_err(|e| TransportError::Protocol(e.into()))?;
        let body = String::from_utf8(body).map_err(|e| TransportError::Protocol(e.into()))?;
        let header = MessageHeader::parse(&header)?;
        Ok(Some(WireMessage::new(header, body)))
    }

    fn close(&mut self, disconnect: bool) -> TransportResult<()> {
        if let Some(socket) = self.socket.take() {
            if disconnect && self.connected {
                // Peer may already be gone.
                let _ = socket.disconnect(&self.endpoint);
            }
            debug!(endpoint = %self.endpoint, "zmq socket closed");
        }
        Ok(())
    }
}
