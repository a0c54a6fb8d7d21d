//! In-process loopback transport.
//!
//! Sessions sharing a [`MemoryNetwork`] talk to each other without touching
//! the OS. Delivery follows request/reply rules: a requestor's message lands
//! in the replier's mailbox, and the replier's answer goes back to whichever
//! requestor sent the last request it fetched. Replies to a requestor that
//! has since been closed are dropped.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use tracing::debug;
use zmap_remote_protocol::WireMessage;

use super::{MessageSocket, Transport, TransportError, TransportResult};

#[derive(Debug)]
enum Delivery {
    Message { from: u64, message: WireMessage },
    /// Header frame only.
    Truncated { from: u64 },
}

#[derive(Debug, Default)]
struct NetworkInner {
    next_id: u64,
    /// Pending requests, keyed by replier endpoint.
    mailboxes: HashMap<String, VecDeque<Delivery>>,
    /// Pending replies, keyed by requestor id.
    reply_boxes: HashMap<u64, VecDeque<WireMessage>>,
    bound: HashSet<String>,
    refuse_connections: bool,
}

impl NetworkInner {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared in-process network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Rc<RefCell<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `connect_requestor` fail, as if out of sockets.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner.borrow_mut().refuse_connections = refuse;
    }

    /// Queues a header frame with no body for the replier at `endpoint`.
    pub fn inject_truncated(&self, endpoint: &str) {
        self.inner
            .borrow_mut()
            .mailboxes
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Delivery::Truncated { from: 0 });
    }

    /// Number of requests waiting to be fetched at `endpoint`.
    pub fn pending_requests(&self, endpoint: &str) -> usize {
        self.inner
            .borrow()
            .mailboxes
            .get(endpoint)
            .map_or(0, VecDeque::len)
    }
}

/// Socket factory on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    name: String,
}

impl MemoryTransport {
    /// `name` prefixes the endpoints this transport binds.
    pub fn new(network: &MemoryNetwork, name: impl Into<String>) -> Self {
        Self {
            network: network.clone(),
            name: name.into(),
        }
    }
}

impl Transport for MemoryTransport {
    fn bind_replier(&mut self) -> TransportResult<Box<dyn MessageSocket>> {
        let mut inner = self.network.inner.borrow_mut();
        let endpoint = format!("inproc://{}-{}", self.name, inner.allocate_id());
        inner.bound.insert(endpoint.clone());
        inner.mailboxes.entry(endpoint.clone()).or_default();
        debug!(endpoint = %endpoint, "memory replier bound");

        Ok(Box::new(MemoryReplier {
            network: self.network.clone(),
            endpoint,
            last_requester: None,
            closed: false,
        }))
    }

    fn connect_requestor(&mut self, endpoint: &str) -> TransportResult<Box<dyn MessageSocket>> {
        if !endpoint.starts_with("inproc://") {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }
        let mut inner = self.network.inner.borrow_mut();
        if inner.refuse_connections {
            return Err(TransportError::Unreachable {
                endpoint: endpoint.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        let id = inner.allocate_id();
        inner.reply_boxes.insert(id, VecDeque::new());

        Ok(Box::new(MemoryRequestor {
            network: self.network.clone(),
            id,
            endpoint: endpoint.to_string(),
            closed: false,
        }))
    }
}

struct MemoryReplier {
    network: MemoryNetwork,
    endpoint: String,
    last_requester: Option<u64>,
    closed: bool,
}

impl MessageSocket for MemoryReplier {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn try_send(&mut self, message: &WireMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let to = self.last_requester.ok_or(TransportError::NotWritable)?;
        let mut inner = self.network.inner.borrow_mut();
        match inner.reply_boxes.get_mut(&to) {
            Some(queue) => queue.push_back(message.clone()),
            None => debug!(requester = to, "requestor gone, reply dropped"),
        }
        Ok(())
    }

    fn try_fetch(&mut self) -> TransportResult<Option<WireMessage>> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let delivery = self
            .network
            .inner
            .borrow_mut()
            .mailboxes
            .get_mut(&self.endpoint)
            .and_then(VecDeque::pop_front);
        match delivery {
            None => Ok(None),
            Some(Delivery::Message { from, message }) => {
                self.last_requester = Some(from);
                Ok(Some(message))
            }
            Some(Delivery::Truncated { from }) => {
                self.last_requester = Some(from);
                Err(TransportError::ShortMessage)
            }
        }
    }

    fn close(&mut self, _disconnect: bool) -> TransportResult<()> {
        if !self.closed {
            let mut inner = self.network.inner.borrow_mut();
            inner.bound.remove(&self.endpoint);
            inner.mailboxes.remove(&self.endpoint);
            self.closed = true;
        }
        Ok(())
    }
}

struct MemoryRequestor {
    network: MemoryNetwork,
    id: u64,
    endpoint: String,
    closed: bool,
}

impl MessageSocket for MemoryRequestor {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn try_send(&mut self, message: &WireMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.network
            .inner
            .borrow_mut()
            .mailboxes
            .entry(self.endpoint.clone())
            .or_default()
            .push_back(Delivery::Message {
                from: self.id,
                message: message.clone(),
            });
        Ok(())
    }

    fn try_fetch(&mut self) -> TransportResult<Option<WireMessage>> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(self
            .network
            .inner
            .borrow_mut()
            .reply_boxes
            .get_mut(&self.id)
            .and_then(VecDeque::pop_front))
    }

    fn close(&mut self, _disconnect: bool) -> TransportResult<()> {
        if !self.closed {
            self.network.inner.borrow_mut().reply_boxes.remove(&self.id);
            self.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zmap_remote_core::RequestTime;
    use zmap_remote_protocol::MessageHeader;

    fn message(kind_request: bool, id: &str) -> WireMessage {
        let time = RequestTime::new(1, 0);
        let header = if kind_request {
            MessageHeader::request(id, time)
        } else {
            MessageHeader::reply(id, time)
        };
        WireMessage::new(header, format!("body of {id}"))
    }

    #[test]
    fn request_reply_roundtrip() {
        let network = MemoryNetwork::new();
        let mut transport = MemoryTransport::new(&network, "zmap");
        let mut replier = transport.bind_replier().unwrap();
        assert!(replier.endpoint().starts_with("inproc://zmap-"));

        let mut requestor = transport.connect_requestor(replier.endpoint()).unwrap();
        assert!(replier.try_fetch().unwrap().is_none());
        assert!(matches!(
            replier.try_send(&message(false, "r1")),
            Err(TransportError::NotWritable)
        ));

        requestor.try_send(&message(true, "r1")).unwrap();
        assert_eq!(network.pending_requests(replier.endpoint()), 1);
        let request = replier.try_fetch().unwrap().unwrap();
        assert_eq!(request.request_id(), "r1");

        replier.try_send(&message(false, "r1")).unwrap();
        let reply = requestor.try_fetch().unwrap().unwrap();
        assert!(!reply.header.is_request());
        assert!(requestor.try_fetch().unwrap().is_none());
    }

    #[test]
    fn reply_to_closed_requestor_is_dropped() {
        let network = MemoryNetwork::new();
        let mut transport = MemoryTransport::new(&network, "peer");
        let mut replier = transport.bind_replier().unwrap();
        let mut old = transport.connect_requestor(replier.endpoint()).unwrap();

        old.try_send(&message(true, "r1")).unwrap();
        replier.try_fetch().unwrap().unwrap();
        old.close(true).unwrap();
        old.close(true).unwrap();

        assert!(replier.try_send(&message(false, "r1")).is_ok());
        assert!(matches!(old.try_fetch(), Err(TransportError::Closed)));
    }

    #[test]
    fn truncated_and_refused() {
        let network = MemoryNetwork::new();
        let mut transport = MemoryTransport::new(&network, "peer");
        let mut replier = transport.bind_replier().unwrap();

        network.inject_truncated(replier.endpoint());
        assert!(matches!(
            replier.try_fetch(),
            Err(TransportError::ShortMessage)
        ));

        network.set_refuse_connections(true);
        assert!(matches!(
            transport.connect_requestor(replier.endpoint()),
            Err(TransportError::Unreachable { .. })
        ));
        assert!(matches!(
            transport.connect_requestor("tcp://127.0.0.1:1"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }
}
