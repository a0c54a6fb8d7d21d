//! TCP transport.
//!
//! Endpoints are written `tcp://<host>:<port>`. The replier binds an
//! ephemeral port and accepts any number of requestor connections; a reply
//! goes back over the connection that delivered the last fetched request.
//!
//! The requestor connects lazily on its first send. The connect is started
//! without waiting for it: output is buffered and flushed once the
//! connection is up, so neither sending nor polling ever blocks. A
//! connection that fails is dropped and the request left to time out.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, ToSocketAddrs};

use mio::net::TcpStream;
use tracing::{debug, warn};
use zmap_remote_protocol::{FrameWriter, MessageDecoder, WireMessage};

use super::{MessageSocket, Transport, TransportError, TransportResult};

const SCHEME: &str = "tcp://";
const READ_CHUNK: usize = 8192;

/// Socket factory for plain TCP.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_host: IpAddr,
    /// Endpoints already resolved, so only the first connect can hit DNS.
    resolved: HashMap<String, SocketAddr>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            resolved: HashMap::new(),
        }
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: address repliers bind to.
    pub fn with_bind_host(mut self, host: IpAddr) -> Self {
        self.bind_host = host;
        self
    }

    fn resolve(&mut self, endpoint: &str) -> TransportResult<SocketAddr> {
        if let Some(addr) = self.resolved.get(endpoint) {
            return Ok(*addr);
        }
        let addr = parse_endpoint(endpoint)?;
        self.resolved.insert(endpoint.to_string(), addr);
        Ok(addr)
    }
}

/// Turns `tcp://host:port` into a socket address. Literal addresses are
/// parsed directly; anything else goes through the system resolver.
pub(crate) fn parse_endpoint(endpoint: &str) -> TransportResult<SocketAddr> {
    let invalid = || TransportError::InvalidEndpoint(endpoint.to_string());
    let address = endpoint.strip_prefix(SCHEME).ok_or_else(invalid)?;
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    address
        .to_socket_addrs()
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)
}

impl Transport for TcpTransport {
    fn bind_replier(&mut self) -> TransportResult<Box<dyn MessageSocket>> {
        let listener = TcpListener::bind(SocketAddr::new(self.bind_host, 0))?;
        listener.set_nonblocking(true)?;
        let endpoint = format!("{SCHEME}{}", listener.local_addr()?);
        debug!(endpoint = %endpoint, "TCP replier bound");

        Ok(Box::new(TcpReplier {
            listener: Some(listener),
            endpoint,
            connections: Vec::new(),
            next_id: 0,
            last_requester: None,
        }))
    }

    fn connect_requestor(&mut self, endpoint: &str) -> TransportResult<Box<dyn MessageSocket>> {
        let addr = self.resolve(endpoint)?;
        Ok(Box::new(TcpRequestor::new(endpoint, addr)))
    }
}

/// A non-blocking stream with its partial input and pending output.
struct Connection {
    id: u64,
    stream: TcpStream,
    /// False while an outgoing connect is still in progress.
    connected: bool,
    decoder: MessageDecoder,
    outbound: Vec<u8>,
}

impl Connection {
    fn new(id: u64, stream: TcpStream, connected: bool) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            id,
            stream,
            connected,
            decoder: MessageDecoder::new(),
            outbound: Vec::new(),
        })
    }

    fn accepted(id: u64, stream: std::net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Self::new(id, TcpStream::from_std(stream), true)
    }

    /// Checks on a pending connect. Errors if it failed.
    fn is_connected(&mut self) -> io::Result<bool> {
        if self.connected {
            return Ok(true);
        }
        if let Some(e) = self.stream.take_error()? {
            return Err(e);
        }
        match self.stream.peer_addr() {
            Ok(_) => {
                self.connected = true;
                Ok(true)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::NotConnected | io::ErrorKind::WouldBlock) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Reads everything available. Returns true once the peer has closed.
    fn fill(&mut self) -> io::Result<bool> {
        if !self.is_connected()? {
            return Ok(false);
        }
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => self.decoder.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetches the next complete message, reading first.
    ///
    /// `Ok(None)` with `closed` set means the peer went away cleanly.
    fn next_message(&mut self, closed: &mut bool) -> TransportResult<Option<WireMessage>> {
        *closed = self.fill()?;
        if let Some(message) = self.decoder.next_message()? {
            return Ok(Some(message));
        }
        if *closed {
            self.decoder.finish()?;
        }
        Ok(None)
    }

    fn queue(&mut self, message: &WireMessage) -> TransportResult<()> {
        FrameWriter::new(&mut self.outbound).write_message(message)?;
        self.flush()?;
        Ok(())
    }

    /// Writes as much pending output as the socket takes.
    fn flush(&mut self) -> io::Result<()> {
        if !self.is_connected()? {
            return Ok(());
        }
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

struct TcpReplier {
    listener: Option<TcpListener>,
    endpoint: String,
    connections: Vec<Connection>,
    next_id: u64,
    last_requester: Option<u64>,
}

impl TcpReplier {
    fn accept_pending(&mut self) -> TransportResult<()> {
        let listener = self.listener.as_ref().ok_or(TransportError::Closed)?;
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    self.next_id += 1;
                    debug!(endpoint = %self.endpoint, peer = %peer, "requestor connected");
                    self.connections.push(Connection::accepted(self.next_id, stream)?);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl MessageSocket for TcpReplier {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn try_send(&mut self, message: &WireMessage) -> TransportResult<()> {
        if self.listener.is_none() {
            return Err(TransportError::Closed);
        }
        let to = self.last_requester.ok_or(TransportError::NotWritable)?;
        let Some(index) = self.connections.iter().position(|c| c.id == to) else {
            debug!(endpoint = %self.endpoint, "requestor gone, reply dropped");
            return Ok(());
        };
        if let Err(e) = self.connections[index].queue(message) {
            self.connections.remove(index);
            return Err(e);
        }
        Ok(())
    }

    fn try_fetch(&mut self) -> TransportResult<Option<WireMessage>> {
        self.accept_pending()?;

        let mut index = 0;
        while index < self.connections.len() {
            let connection = &mut self.connections[index];
            if let Err(e) = connection.flush() {
                warn!(endpoint = %self.endpoint, error = %e, "dropping requestor connection");
                self.connections.remove(index);
                continue;
            }

            let mut closed = false;
            match connection.next_message(&mut closed) {
                Ok(Some(message)) => {
                    self.last_requester = Some(connection.id);
                    return Ok(Some(message));
                }
                Ok(None) if closed => {
                    self.connections.remove(index);
                }
                Ok(None) => index += 1,
                Err(TransportError::Io(e)) => {
                    warn!(endpoint = %self.endpoint, error = %e, "dropping requestor connection");
                    self.connections.remove(index);
                }
                Err(e) => {
                    self.connections.remove(index);
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self, _disconnect: bool) -> TransportResult<()> {
        if self.listener.take().is_some() {
            debug!(endpoint = %self.endpoint, "TCP replier closed");
        }
        self.connections.clear();
        self.last_requester = None;
        Ok(())
    }
}

struct TcpRequestor {
    endpoint: String,
    addr: SocketAddr,
    connection: Option<Connection>,
    closed: bool,
}

impl TcpRequestor {
    fn new(endpoint: &str, addr: SocketAddr) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            addr,
            connection: None,
            closed: false,
        }
    }

    fn drop_connection(&mut self, error: &io::Error) {
        warn!(endpoint = %self.endpoint, error = %error, "connection to replier lost");
        self.connection = None;
    }
}

impl MessageSocket for TcpRequestor {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn try_send(&mut self, message: &WireMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.connection.is_none() {
            let stream = TcpStream::connect(self.addr).map_err(|source| TransportError::Unreachable {
                endpoint: self.endpoint.clone(),
                source,
            })?;
            debug!(endpoint = %self.endpoint, "connecting to replier");
            self.connection = Some(Connection::new(0, stream, false)?);
        }
        let Some(connection) = self.connection.as_mut() else {
            return Err(TransportError::Closed);
        };
        if let Err(e) = connection.queue(message) {
            self.connection = None;
            return Err(e);
        }
        Ok(())
    }

    fn try_fetch(&mut self) -> TransportResult<Option<WireMessage>> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let Some(connection) = self.connection.as_mut() else {
            return Ok(None);
        };
        if let Err(e) = connection.flush() {
            self.drop_connection(&e);
            return Ok(None);
        }
        let mut closed = false;
        let message = match connection.next_message(&mut closed) {
            Err(TransportError::Io(e)) => {
                self.drop_connection(&e);
                return Ok(None);
            }
            other => other,
        };
        if closed {
            debug!(endpoint = %self.endpoint, "replier closed the connection");
            self.connection = None;
        }
        message
    }

    fn close(&mut self, disconnect: bool) -> TransportResult<()> {
        if let Some(connection) = self.connection.take()
            && disconnect
        {
            let _ = connection.stream.shutdown(std::net::Shutdown::Both);
        }
        self.closed = true;
        Ok(())
    }
}
