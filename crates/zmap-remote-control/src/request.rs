//! Request/reply records.

use zmap_remote_protocol::WireMessage;

/// Direction of a request relative to this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// Sent by the peer, answered by us.
    Incoming,
    /// Sent by us, answered by the peer.
    Outgoing,
}

/// A request and, once known, its reply.
#[derive(Debug, Clone)]
pub struct RequestReply {
    request_type: RequestType,
    /// Endpoint of the socket the request travelled over.
    endpoint: String,
    command: Option<String>,
    request: WireMessage,
    reply: Option<WireMessage>,
    /// Set once a reply has gone out, so resends can be told apart.
    answered: bool,
}

impl RequestReply {
    pub fn new(
        request_type: RequestType,
        endpoint: impl Into<String>,
        command: Option<String>,
        request: WireMessage,
    ) -> Self {
        Self {
            request_type,
            endpoint: endpoint.into(),
            command,
            request,
            reply: None,
            answered: false,
        }
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn request_id(&self) -> &str {
        self.request.request_id()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn request(&self) -> &WireMessage {
        &self.request
    }

    pub fn reply(&self) -> Option<&WireMessage> {
        self.reply.as_ref()
    }

    /// Removes the reply so it can be sent again.
    pub fn take_reply(&mut self) -> Option<WireMessage> {
        self.reply.take()
    }

    /// True if a reply to this request has already been sent once.
    pub fn answered(&self) -> bool {
        self.answered
    }

    pub fn set_reply(&mut self, reply: WireMessage) {
        self.reply = Some(reply);
        self.answered = true;
    }

    /// Gives up the request message, e.g. to queue it for resending.
    pub fn into_request(self) -> WireMessage {
        self.request
    }
}
