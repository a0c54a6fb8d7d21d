//! The RemoteControl session.
//!
//! A [`Session`] owns a replier socket for the peer's requests and a
//! requestor socket for its own, four message queues and the state machine
//! that moves messages between them. Only one transaction is in flight at a
//! time, in either direction.
//!
//! The session never blocks and never spawns. Something has to call
//! [`Session::poll_replier`], [`Session::poll_requestor`] and
//! [`Session::tick`] periodically; [`crate::driver`] does this on tokio
//! intervals.

use std::collections::VecDeque;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::Level;
use zmap_remote_core::RequestTime;
use zmap_remote_protocol::{CommandCodec, EnvelopeAttr, JsonCommandCodec, MessageHeader, WireMessage};

use crate::collision::{self, CollisionSide, CollisionWinner};
use crate::config::SessionConfig;
use crate::error::{ControlError, ControlResult, ErrorKind, SessionError};
use crate::handle::{AppReply, ReplyHandle, RequestHandle};
use crate::queue::MessageQueue;
use crate::report::{Component, DebugLevel, LogRecord, LogSink, TracingSink};
use crate::request::{RequestReply, RequestType};
use crate::state::SessionState;
use crate::timeout::{TimeoutController, TimeoutList, TimeoutStatus};
use crate::transport::{MessageSocket, Transport};

type ErrorHandler = Box<dyn FnMut(&SessionError)>;
type RequestHandler = Box<dyn FnMut(&str, ReplyHandle)>;
type BodyHandler = Box<dyn FnMut(&str)>;

struct ReceiveHalf {
    socket: Box<dyn MessageSocket>,
    request_handler: RequestHandler,
    reply_sent: BodyHandler,
}

struct SendHalf {
    socket: Box<dyn MessageSocket>,
    peer_endpoint: String,
    request_sent: BodyHandler,
    reply_handler: BodyHandler,
}

/// One end of a RemoteControl connection.
pub struct Session {
    app_id: String,
    config: SessionConfig,
    state: SessionState,
    history: VecDeque<SessionState>,

    transport: Box<dyn Transport>,
    codec: Box<dyn CommandCodec>,
    sink: Box<dyn LogSink>,
    error_handler: ErrorHandler,

    receive: Option<ReceiveHalf>,
    send: Option<SendHalf>,

    incoming_requests: MessageQueue,
    outgoing_requests: MessageQueue,
    incoming_replies: MessageQueue,
    outgoing_replies: MessageQueue,

    current: Option<RequestReply>,
    /// Our request, parked while a colliding peer request is serviced.
    stalled: Option<RequestReply>,
    /// Last serviced peer request, kept to answer retries of it.
    previous_incoming: Option<RequestReply>,
    /// Peer request already found to lose against `current`.
    deferred_peer_request: Option<String>,

    timeouts: TimeoutController,

    reply_tx: UnboundedSender<AppReply>,
    reply_rx: UnboundedReceiver<AppReply>,
    request_tx: UnboundedSender<String>,
    request_rx: UnboundedReceiver<String>,
}

impl Session {
    /// Creates an inactive session with the default configuration.
    ///
    /// `error_handler` is called for every error the state machine reports,
    /// including ones that do not fail the session.
    pub fn new<T, E>(app_id: impl Into<String>, transport: T, error_handler: E) -> Self
    where
        T: Transport + 'static,
        E: FnMut(&SessionError) + 'static,
    {
        Self::with_config(app_id, transport, SessionConfig::default(), error_handler)
    }

    pub fn with_config<T, E>(
        app_id: impl Into<String>,
        transport: T,
        config: SessionConfig,
        error_handler: E,
    ) -> Self
    where
        T: Transport + 'static,
        E: FnMut(&SessionError) + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let timeouts = TimeoutController::new(config.timeouts.clone());

        Self {
            app_id: app_id.into(),
            state: SessionState::Inactive,
            history: VecDeque::from([SessionState::Inactive]),
            config,
            transport: Box::new(transport),
            codec: Box::new(JsonCommandCodec),
            sink: Box::new(TracingSink),
            error_handler: Box::new(error_handler),
            receive: None,
            send: None,
            incoming_requests: MessageQueue::new(),
            outgoing_requests: MessageQueue::new(),
            incoming_replies: MessageQueue::new(),
            outgoing_replies: MessageQueue::new(),
            current: None,
            stalled: None,
            previous_incoming: None,
            deferred_peer_request: None,
            timeouts,
            reply_tx,
            reply_rx,
            request_tx,
            request_rx,
        }
    }

    /// Replaces the codec used to read message bodies.
    pub fn set_codec(&mut self, codec: impl CommandCodec + 'static) {
        self.codec = Box::new(codec);
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Most recent states, oldest first, including the current one.
    pub fn state_history(&self) -> Vec<SessionState> {
        self.history.iter().copied().collect()
    }

    pub fn has_failed(&self) -> bool {
        self.state == SessionState::Failed
    }

    /// Endpoint the peer should send requests to, once receiving.
    pub fn receive_endpoint(&self) -> Option<&str> {
        self.receive.as_ref().map(|r| r.socket.endpoint())
    }

    /// Endpoint our requests go to, once sending.
    pub fn peer_endpoint(&self) -> Option<&str> {
        self.send.as_ref().map(|s| s.peer_endpoint.as_str())
    }

    /// Requests queued and not yet sent.
    pub fn pending_outgoing(&self) -> usize {
        self.outgoing_requests.len()
    }

    pub fn debug_level(&self) -> DebugLevel {
        self.config.debug_level
    }

    pub fn set_debug_level(&mut self, level: DebugLevel) {
        self.config.debug_level = level;
    }

    pub fn set_log_sink(&mut self, sink: impl LogSink + 'static) {
        self.sink = Box::new(sink);
    }

    /// Sends log messages back to `tracing`.
    pub fn reset_log_sink(&mut self) {
        self.sink = Box::new(TracingSink);
    }

    /// Replaces the timeout list. A request in flight restarts on the first
    /// timeout of the new list.
    pub fn set_timeout_list(&mut self, csv: &str) -> ControlResult<()> {
        self.ensure_alive()?;
        let list = TimeoutList::parse(csv)?;
        self.config.timeouts = list.clone();
        self.timeouts.set_list(list);
        Ok(())
    }

    /// Handle for queueing requests from inside callbacks.
    pub fn request_handle(&self) -> RequestHandle {
        RequestHandle::new(self.request_tx.clone())
    }

    /// Binds the replier and starts accepting the peer's requests.
    ///
    /// `request_handler` gets each new request body and a [`ReplyHandle`] to
    /// answer it with. `reply_sent` is told after each reply leaves; a reply
    /// resent to answer a repeated request is not reported again.
    /// Returns the endpoint to give to the peer.
    pub fn receive_init<H, S>(&mut self, request_handler: H, reply_sent: S) -> ControlResult<String>
    where
        H: FnMut(&str, ReplyHandle) + 'static,
        S: FnMut(&str) + 'static,
    {
        self.ensure_alive()?;
        if self.receive.is_some() {
            return Err(ControlError::AlreadyInitialised { half: "receive" });
        }

        let socket = match self.transport.bind_replier() {
            Ok(socket) => socket,
            Err(e) => {
                self.report(
                    ErrorKind::BadSocket,
                    Component::Replier,
                    format!("could not bind replier: {e}"),
                );
                return Err(e.into());
            }
        };
        let endpoint = socket.endpoint().to_string();
        self.receive = Some(ReceiveHalf {
            socket,
            request_handler: Box::new(request_handler),
            reply_sent: Box::new(reply_sent),
        });

        self.log(Level::INFO, Component::Replier, &format!("receiving on {endpoint}"));
        if self.state == SessionState::Inactive {
            self.set_state(SessionState::Idle);
        }
        Ok(endpoint)
    }

    /// Connects the requestor to the peer's replier at `peer_endpoint`.
    ///
    /// `request_sent` is told after each new request leaves; resends of a
    /// timed out request are not reported. `reply_handler` gets each reply
    /// that matches our request.
    pub fn send_init<S, H>(
        &mut self,
        peer_endpoint: &str,
        request_sent: S,
        reply_handler: H,
    ) -> ControlResult<()>
    where
        S: FnMut(&str) + 'static,
        H: FnMut(&str) + 'static,
    {
        self.ensure_alive()?;
        if peer_endpoint.trim().is_empty() {
            return Err(ControlError::invalid_endpoint(peer_endpoint));
        }
        if self.send.is_some() {
            return Err(ControlError::AlreadyInitialised { half: "send" });
        }

        let socket = match self.transport.connect_requestor(peer_endpoint) {
            Ok(socket) => socket,
            Err(e) => {
                self.report(
                    ErrorKind::BadSocket,
                    Component::Requestor,
                    format!("could not connect to {peer_endpoint}: {e}"),
                );
                return Err(e.into());
            }
        };
        self.send = Some(SendHalf {
            socket,
            peer_endpoint: peer_endpoint.to_string(),
            request_sent: Box::new(request_sent),
            reply_handler: Box::new(reply_handler),
        });

        self.log(
            Level::INFO,
            Component::Requestor,
            &format!("sending to {peer_endpoint}"),
        );
        if self.state == SessionState::Inactive {
            self.set_state(SessionState::Idle);
        }
        Ok(())
    }

    /// Queues a request for the peer, ordered by the codec's priority.
    pub fn send_request(&mut self, body: impl Into<String>) -> ControlResult<()> {
        self.ensure_alive()?;
        if self.send.is_none() {
            return Err(ControlError::NotInitialised { half: "send" });
        }

        let body = body.into();
        let request_id = self
            .codec
            .envelope_attr(&body, EnvelopeAttr::RequestId)
            .ok_or_else(|| ControlError::InvalidRequest("request has no request id".to_string()))?;
        let timestamp = self
            .read_timestamp(&body)
            .ok_or_else(|| ControlError::InvalidRequest("request has no readable timestamp".to_string()))?;
        let priority = self.codec.priority(&body);

        let message = WireMessage::new(MessageHeader::request(request_id, timestamp), body);
        self.trace(Component::Application, &format!("queued {}", message.header));
        self.outgoing_requests.push_by_priority(message, priority);
        Ok(())
    }

    /// Answers the peer request currently being serviced.
    ///
    /// With `abort` set the body is ignored and the request is abandoned;
    /// the error handler is told with `AppAbort`.
    pub fn supply_reply(&mut self, body: &str, abort: bool) -> ControlResult<()> {
        self.ensure_alive()?;
        if self.state != SessionState::IncomingRequestWaitingForOurReply {
            return Err(ControlError::bad_state("supply a reply", self.state));
        }
        if abort {
            self.abort_reply();
            return Ok(());
        }
        self.queue_reply(body)
    }

    /// Fetches every request waiting on the replier.
    pub fn poll_replier(&mut self) -> ControlResult<()> {
        self.ensure_alive()?;
        loop {
            let Some(receive) = self.receive.as_mut() else {
                return Ok(());
            };
            match receive.socket.try_fetch() {
                Ok(None) => return Ok(()),
                Ok(Some(message)) if message.header.is_request() => {
                    self.verbose(Component::Replier, || {
                        format!("received {} {}", message.header, message.body)
                    });
                    self.incoming_requests.push_back(message);
                }
                Ok(Some(message)) => self.log(
                    Level::WARN,
                    Component::Replier,
                    &format!("dropping {} received on the replier", message.header),
                ),
                Err(e) => {
                    self.fail(
                        ErrorKind::BadSocket,
                        Component::Replier,
                        format!("could not fetch peer's request: {e}"),
                    );
                    return Err(ControlError::Failed);
                }
            }
        }
    }

    /// Fetches every reply waiting on the requestor.
    pub fn poll_requestor(&mut self) -> ControlResult<()> {
        self.ensure_alive()?;
        loop {
            let Some(send) = self.send.as_mut() else {
                return Ok(());
            };
            match send.socket.try_fetch() {
                Ok(None) => return Ok(()),
                Ok(Some(message)) if !message.header.is_request() => {
                    self.verbose(Component::Requestor, || {
                        format!("received {} {}", message.header, message.body)
                    });
                    self.incoming_replies.push_back(message);
                }
                Ok(Some(message)) => self.log(
                    Level::WARN,
                    Component::Requestor,
                    &format!("dropping {} received on the requestor", message.header),
                ),
                Err(e) => {
                    self.fail(
                        ErrorKind::BadSocket,
                        Component::Requestor,
                        format!("could not fetch peer's reply: {e}"),
                    );
                    return Err(ControlError::Failed);
                }
            }
        }
    }

    /// Runs the state machine until it has to wait for something.
    pub fn tick(&mut self) -> ControlResult<()> {
        self.ensure_alive()?;
        if self.state == SessionState::Inactive {
            return Ok(());
        }

        while let Ok(body) = self.request_rx.try_recv() {
            if let Err(e) = self.send_request(body) {
                self.log(
                    Level::WARN,
                    Component::Application,
                    &format!("request from handle rejected: {e}"),
                );
            }
        }
        self.drain_app_replies();

        while self.step() {}

        if self.state.is_terminal() {
            return Err(ControlError::Failed);
        }
        Ok(())
    }

    /// Closes both sockets, drops every queued message and goes back to
    /// `INACTIVE`. A failed session cannot be reset.
    pub fn reset(&mut self) -> ControlResult<()> {
        self.ensure_alive()?;
        self.teardown();
        self.set_state(SessionState::Inactive);
        Ok(())
    }

    /// Tears the session down. Dropping it does the same.
    pub fn destroy(mut self) {
        self.shutdown();
    }

    fn ensure_alive(&self) -> ControlResult<()> {
        if self.state.is_terminal() {
            return Err(ControlError::Failed);
        }
        Ok(())
    }

    /// One state machine step. `false` when nothing more can happen until
    /// new input arrives.
    fn step(&mut self) -> bool {
        match self.state {
            SessionState::Inactive | SessionState::Failed | SessionState::Dying => false,
            SessionState::Idle => self.step_idle(),
            SessionState::OutgoingRequestToBeSent => self.step_send_request(),
            SessionState::OutgoingRequestWaitingForReply => self.step_wait_reply(),
            SessionState::IncomingRequestToBeReceived => self.step_receive_request(),
            SessionState::IncomingRequestWaitingForOurReply => self.step_send_reply(),
        }
    }

    fn step_idle(&mut self) -> bool {
        if let Some(stalled) = self.stalled.take() {
            self.trace(
                Component::Collision,
                &format!("resuming {}", stalled.request().header),
            );
            let next = match stalled.request_type() {
                RequestType::Outgoing => {
                    self.timeouts.start();
                    SessionState::OutgoingRequestWaitingForReply
                }
                RequestType::Incoming => SessionState::IncomingRequestWaitingForOurReply,
            };
            self.current = Some(stalled);
            self.set_state(next);
            return true;
        }

        if !self.incoming_requests.is_empty() {
            self.set_state(SessionState::IncomingRequestToBeReceived);
            return true;
        }
        if !self.outgoing_requests.is_empty() {
            self.set_state(SessionState::OutgoingRequestToBeSent);
            return true;
        }
        false
    }

    fn step_send_request(&mut self) -> bool {
        let Some(message) = self.outgoing_requests.pop_front() else {
            self.set_state(SessionState::Idle);
            return true;
        };
        let Some(send) = self.send.as_mut() else {
            self.fail(
                ErrorKind::BadState,
                Component::Session,
                "request queued without a requestor".to_string(),
            );
            return false;
        };

        match send.socket.try_send(&message) {
            Ok(()) => {
                let endpoint = send.socket.endpoint().to_string();
                if message.header.retry == 1 {
                    (send.request_sent)(&message.body);
                }
                self.verbose(Component::Requestor, || {
                    format!("sent {} {}", message.header, message.body)
                });
                let command = self.codec.command(&message.body);
                self.current = Some(RequestReply::new(
                    RequestType::Outgoing,
                    endpoint,
                    command,
                    message,
                ));
                self.timeouts.start();
                self.set_state(SessionState::OutgoingRequestWaitingForReply);
            }
            Err(e) => {
                self.report(
                    ErrorKind::BadSocket,
                    Component::Requestor,
                    format!("could not send request {}: {e}", message.header),
                );
                self.timeouts.reset();
                self.set_state(SessionState::Idle);
            }
        }
        true
    }

    fn step_wait_reply(&mut self) -> bool {
        let Some(current) = self.current.take() else {
            self.fail(
                ErrorKind::BadState,
                Component::Session,
                "waiting for a reply with no request in flight".to_string(),
            );
            return false;
        };

        if let Some(reply) = self.incoming_replies.pop_front() {
            if reply.request_id() != current.request_id() {
                self.report(
                    ErrorKind::OutOfBand,
                    Component::Requestor,
                    format!(
                        "dropping stale reply {} while waiting on {}",
                        reply.header,
                        current.request().header
                    ),
                );
                self.current = Some(current);
                return true;
            }

            self.timeouts.reset();
            match self.codec.validate_reply(&current.request().body, &reply.body) {
                Ok(()) => {
                    self.trace(
                        Component::Requestor,
                        &format!("reply {} accepted", reply.header),
                    );
                    let discarded = self.incoming_replies.drain();
                    if discarded > 0 {
                        self.log(
                            Level::WARN,
                            Component::Requestor,
                            &format!("discarding {discarded} further replies to {}", reply.header),
                        );
                    }
                    if let Some(send) = self.send.as_mut() {
                        (send.reply_handler)(&reply.body);
                    }
                }
                Err(reason) => self.report(
                    ErrorKind::OutOfBand,
                    Component::Requestor,
                    format!(
                        "reply {} does not answer request {}: {reason}",
                        reply.header,
                        current.request().header
                    ),
                ),
            }
            self.set_state(SessionState::Idle);
            return true;
        }

        let collision = self.incoming_requests.peek_front().and_then(|peer| {
            if self.deferred_peer_request.as_deref() == Some(peer.request_id()) {
                return None;
            }
            let receive_endpoint = self
                .receive
                .as_ref()
                .map(|r| r.socket.endpoint())
                .unwrap_or_default();
            let ours = CollisionSide {
                timestamp: self.read_timestamp(&current.request().body),
                endpoint: current.endpoint(),
            };
            let theirs = CollisionSide {
                timestamp: self.read_timestamp(&peer.body),
                endpoint: receive_endpoint,
            };
            Some((
                collision::resolve(ours, theirs),
                peer.request_id().to_string(),
                peer.header.to_string(),
            ))
        });

        if let Some((winner, peer_id, peer_header)) = collision {
            let ours = current.request().header.to_string();
            match winner {
                CollisionWinner::Ours => {
                    self.log(
                        Level::INFO,
                        Component::Collision,
                        &format!("servicing our {ours} before peer's {peer_header}"),
                    );
                    self.deferred_peer_request = Some(peer_id);
                }
                CollisionWinner::Theirs => {
                    self.log(
                        Level::INFO,
                        Component::Collision,
                        &format!("servicing peer's {peer_header} before our {ours}"),
                    );
                    self.stalled = Some(current);
                    self.set_state(SessionState::IncomingRequestToBeReceived);
                    return true;
                }
            }
        }

        match self.timeouts.has_timed_out() {
            TimeoutStatus::Pending => {
                self.current = Some(current);
                false
            }
            TimeoutStatus::Retry => {
                let attempt = self.timeouts.attempt();
                self.log(
                    Level::WARN,
                    Component::Timeout,
                    &format!(
                        "request {} timed out, resending as attempt {attempt}",
                        current.request().header
                    ),
                );
                if !self.recreate_requestor() {
                    return false;
                }
                let message = current.into_request().with_retry(attempt);
                self.outgoing_requests.push_front(message);
                self.set_state(SessionState::OutgoingRequestToBeSent);
                true
            }
            TimeoutStatus::Final => {
                let (_, limit) = self.timeouts.current();
                self.report(
                    ErrorKind::TimedOut,
                    Component::Timeout,
                    format!(
                        "no reply to request {} after final timeout of {}ms, discarding it",
                        current.request().header,
                        limit.as_millis()
                    ),
                );
                self.timeouts.reset();
                if !self.recreate_requestor() {
                    return false;
                }
                self.set_state(SessionState::Idle);
                true
            }
        }
    }

    fn step_receive_request(&mut self) -> bool {
        let Some(request) = self.incoming_requests.pop_front() else {
            self.set_state(SessionState::Idle);
            return true;
        };

        let repeat = self.previous_incoming.as_ref().is_some_and(|previous| {
            previous.reply().is_some()
                && self
                    .codec
                    .requests_identical(&previous.request().body, &request.body)
                    .is_ok()
        });
        if repeat && let Some(mut previous) = self.previous_incoming.take() {
            self.log(
                Level::INFO,
                Component::Replier,
                &format!("{} repeats a serviced request, resending our reply", request.header),
            );
            if let Some(reply) = previous.take_reply() {
                self.outgoing_replies.push_front(reply);
            }
            self.current = Some(previous);
            self.set_state(SessionState::IncomingRequestWaitingForOurReply);
            return true;
        }

        let Some(receive) = self.receive.as_ref() else {
            self.fail(
                ErrorKind::BadState,
                Component::Session,
                "request received without a replier".to_string(),
            );
            return false;
        };
        let endpoint = receive.socket.endpoint().to_string();
        let command = self.codec.command(&request.body);
        let handle = ReplyHandle::new(request.request_id(), self.reply_tx.clone());
        let body = request.body.clone();

        self.trace(Component::Replier, &format!("servicing {}", request.header));
        self.current = Some(RequestReply::new(
            RequestType::Incoming,
            endpoint,
            command,
            request,
        ));
        self.set_state(SessionState::IncomingRequestWaitingForOurReply);

        if let Some(receive) = self.receive.as_mut() {
            (receive.request_handler)(&body, handle);
        }
        true
    }

    fn step_send_reply(&mut self) -> bool {
        self.drain_app_replies();
        if self.state != SessionState::IncomingRequestWaitingForOurReply {
            return true;
        }
        let Some(reply) = self.outgoing_replies.pop_front() else {
            return false;
        };
        let Some(mut current) = self.current.take() else {
            self.fail(
                ErrorKind::BadState,
                Component::Session,
                "reply queued with no request being serviced".to_string(),
            );
            return false;
        };

        if let Err(reason) = self.codec.validate_reply(&current.request().body, &reply.body) {
            self.report(
                ErrorKind::OutOfBand,
                Component::Application,
                format!(
                    "our reply does not answer request {}, discarding it: {reason}",
                    current.request().header
                ),
            );
            self.set_state(SessionState::Idle);
            return true;
        }

        let Some(receive) = self.receive.as_mut() else {
            self.fail(
                ErrorKind::BadState,
                Component::Session,
                "reply queued without a replier".to_string(),
            );
            return false;
        };
        match receive.socket.try_send(&reply) {
            Ok(()) => {
                if !current.answered() {
                    (receive.reply_sent)(&reply.body);
                }
                self.verbose(Component::Replier, || {
                    format!("sent {} {}", reply.header, reply.body)
                });
                current.set_reply(reply);
                self.previous_incoming = Some(current);
            }
            Err(e) => self.report(
                ErrorKind::BadSocket,
                Component::Replier,
                format!("could not send reply {}, discarding it: {e}", reply.header),
            ),
        }
        self.set_state(SessionState::Idle);
        true
    }

    /// Applies replies and aborts sent through [`ReplyHandle`]s.
    fn drain_app_replies(&mut self) {
        while let Ok(app_reply) = self.reply_rx.try_recv() {
            let awaiting = match (&self.current, self.state) {
                (Some(current), SessionState::IncomingRequestWaitingForOurReply) => {
                    Some(current.request_id().to_string())
                }
                _ => None,
            };

            match app_reply {
                AppReply::Reply { request_id, body } if awaiting.as_deref() == Some(request_id.as_str()) => {
                    if let Err(e) = self.queue_reply(&body) {
                        self.report(ErrorKind::OutOfBand, Component::Application, e.to_string());
                    }
                }
                AppReply::Abort { request_id } if awaiting.as_deref() == Some(request_id.as_str()) => {
                    self.abort_reply();
                }
                AppReply::Reply { request_id, .. } | AppReply::Abort { request_id } => self.log(
                    Level::WARN,
                    Component::Application,
                    &format!("ignoring reply to {request_id}, which is not awaiting one"),
                ),
            }
        }
    }

    fn queue_reply(&mut self, body: &str) -> ControlResult<()> {
        let request_id = self
            .codec
            .envelope_attr(body, EnvelopeAttr::RequestId)
            .ok_or_else(|| ControlError::InvalidReply("reply has no request id".to_string()))?;
        let timestamp = self
            .read_timestamp(body)
            .ok_or_else(|| ControlError::InvalidReply("reply has no readable timestamp".to_string()))?;

        self.outgoing_replies
            .push_back(WireMessage::new(MessageHeader::reply(request_id, timestamp), body));
        Ok(())
    }

    fn abort_reply(&mut self) {
        let request_id = self
            .current
            .take()
            .map(|current| current.request_id().to_string())
            .unwrap_or_default();
        self.report(
            ErrorKind::AppAbort,
            Component::Application,
            format!("application aborted its reply to {request_id}"),
        );
        self.set_state(SessionState::Idle);
    }

    fn read_timestamp(&self, body: &str) -> Option<RequestTime> {
        self.codec
            .envelope_attr(body, EnvelopeAttr::Timestamp)
            .and_then(|text| RequestTime::parse(&text).ok())
    }

    /// Replaces the requestor socket so a stale reply to an abandoned
    /// attempt can never arrive. Fails the session if that is impossible.
    fn recreate_requestor(&mut self) -> bool {
        let Some(send) = self.send.as_mut() else {
            return true;
        };
        let peer = send.peer_endpoint.clone();
        let closed = send.socket.close(true);
        if let Err(e) = closed {
            self.log(
                Level::WARN,
                Component::Requestor,
                &format!("closing requestor failed: {e}"),
            );
        }

        match self.transport.connect_requestor(&peer) {
            Ok(socket) => {
                if let Some(send) = self.send.as_mut() {
                    send.socket = socket;
                }
                self.incoming_replies.drain();
                true
            }
            Err(e) => {
                self.fail(
                    ErrorKind::BadSocket,
                    Component::Requestor,
                    format!("could not recreate requestor for {peer}: {e}"),
                );
                false
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if state == self.state {
            return;
        }
        let previous = self.state;
        self.state = state;
        if previous == SessionState::OutgoingRequestWaitingForReply {
            self.deferred_peer_request = None;
        }

        while self.history.len() >= self.config.history_limit.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(state);
        self.trace(Component::Session, &format!("{previous} -> {state}"));
    }

    fn log(&mut self, level: Level, component: Component, message: &str) {
        self.sink.log(&LogRecord {
            level,
            app_id: &self.app_id,
            state: self.state,
            component,
            message,
        });
    }

    /// State machine narration, hidden at `DebugLevel::Off`.
    fn trace(&mut self, component: Component, message: &str) {
        if self.config.debug_level >= DebugLevel::Normal {
            self.log(Level::DEBUG, component, message);
        }
    }

    /// Full messages, only at `DebugLevel::Verbose`.
    fn verbose(&mut self, component: Component, message: impl FnOnce() -> String) {
        if self.config.debug_level >= DebugLevel::Verbose {
            let message = message();
            self.log(Level::TRACE, component, &message);
        }
    }

    /// Logs an error and passes it to the application.
    fn report(&mut self, kind: ErrorKind, component: Component, message: String) {
        self.log(Level::ERROR, component, &format!("{kind}: {message}"));
        let error = SessionError {
            kind,
            state: self.state,
            component,
            message,
        };
        (self.error_handler)(&error);
    }

    /// Reports an error the session cannot recover from.
    fn fail(&mut self, kind: ErrorKind, component: Component, message: String) {
        self.report(kind, component, message);
        self.teardown();
        self.set_state(SessionState::Failed);
    }

    /// Closes sockets and empties every queue.
    fn teardown(&mut self) {
        let discarded = self.incoming_requests.drain()
            + self.outgoing_requests.drain()
            + self.incoming_replies.drain()
            + self.outgoing_replies.drain()
            + usize::from(self.current.take().is_some())
            + usize::from(self.stalled.take().is_some());
        self.previous_incoming = None;
        self.deferred_peer_request = None;
        self.timeouts.reset();
        while self.reply_rx.try_recv().is_ok() {}
        while self.request_rx.try_recv().is_ok() {}

        if let Some(mut receive) = self.receive.take()
            && let Err(e) = receive.socket.close(false)
        {
            self.log(Level::WARN, Component::Replier, &format!("closing replier failed: {e}"));
        }
        if let Some(mut send) = self.send.take()
            && let Err(e) = send.socket.close(true)
        {
            self.log(Level::WARN, Component::Requestor, &format!("closing requestor failed: {e}"));
        }

        if discarded > 0 {
            self.log(
                Level::WARN,
                Component::Session,
                &format!("{discarded} queued or in-flight messages discarded"),
            );
        }
    }

    fn shutdown(&mut self) {
        if let Some(current) = &self.current {
            let message = format!(
                "destroyed while {} was in flight, the transaction is lost",
                current.request().header
            );
            self.log(Level::WARN, Component::Session, &message);
        }
        self.set_state(SessionState::Dying);
        self.teardown();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Dying {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("app_id", &self.app_id)
            .field("state", &self.state)
            .field("receive_endpoint", &self.receive_endpoint())
            .field("peer_endpoint", &self.peer_endpoint())
            .field("pending_outgoing", &self.outgoing_requests.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use zmap_remote_protocol::{CommandEnvelope, ReplyStatus};

    use super::*;
    use crate::report::MemorySink;
    use crate::transport::{MemoryNetwork, MemoryTransport};

    type Shared<T> = Rc<RefCell<Vec<T>>>;

    struct Peer {
        session: Session,
        errors: Shared<ErrorKind>,
        serviced: Shared<String>,
        sent: Shared<String>,
        replies: Shared<String>,
        /// Bodies reported by the reply-sent callback.
        replied: Shared<String>,
        handles: Shared<ReplyHandle>,
    }

    fn request_body(id: &str, secs: i64, micros: u32, command: &str) -> String {
        CommandEnvelope::request("test", id, command)
            .with_timestamp(RequestTime::new(secs, micros))
            .to_body()
            .unwrap()
    }

    fn reply_body(request: &str) -> String {
        let request = CommandEnvelope::from_body(request).unwrap();
        CommandEnvelope::reply_to(&request, "test", ReplyStatus::Ok)
            .to_body()
            .unwrap()
    }

    fn peer(network: &MemoryNetwork, name: &str, timeouts: &str) -> Peer {
        let errors: Shared<ErrorKind> = Rc::default();
        let sink = errors.clone();
        let config = SessionConfig::default().with_timeouts(timeouts).unwrap();
        let session = Session::with_config(
            name,
            MemoryTransport::new(network, name),
            config,
            move |e: &SessionError| sink.borrow_mut().push(e.kind),
        );
        Peer {
            session,
            errors,
            serviced: Rc::default(),
            sent: Rc::default(),
            replies: Rc::default(),
            replied: Rc::default(),
            handles: Rc::default(),
        }
    }

    impl Peer {
        /// Starts receiving. Requests are answered at once unless `hold`.
        fn listen(&mut self, hold: bool, log: &Shared<String>) -> String {
            let serviced = self.serviced.clone();
            let handles = self.handles.clone();
            let replied = self.replied.clone();
            let log = log.clone();
            let name = self.session.app_id().to_string();
            self.session
                .receive_init(
                    move |body, handle| {
                        let id = handle.request_id().to_string();
                        serviced.borrow_mut().push(id.clone());
                        log.borrow_mut().push(format!("{name} serviced {id}"));
                        if hold {
                            handles.borrow_mut().push(handle);
                        } else {
                            handle.reply(reply_body(body)).unwrap();
                        }
                    },
                    move |body| replied.borrow_mut().push(body.to_string()),
                )
                .unwrap()
        }

        fn connect(&mut self, endpoint: &str) {
            let sent = self.sent.clone();
            let replies = self.replies.clone();
            self.session
                .send_init(
                    endpoint,
                    move |body| {
                        let request = CommandEnvelope::from_body(body).unwrap();
                        sent.borrow_mut().push(request.request_id);
                    },
                    move |body| {
                        let reply = CommandEnvelope::from_body(body).unwrap();
                        replies.borrow_mut().push(reply.request_id);
                    },
                )
                .unwrap();
        }

        fn pump(&mut self) {
            self.session.poll_replier().unwrap();
            self.session.poll_requestor().unwrap();
            self.session.tick().unwrap();
        }
    }

    /// A replier socket the test answers by hand.
    fn raw_replier(network: &MemoryNetwork) -> Box<dyn MessageSocket> {
        MemoryTransport::new(network, "raw").bind_replier().unwrap()
    }

    /// Socket that hands out queued messages but never accepts a write.
    struct Unwritable {
        endpoint: String,
        inbox: VecDeque<WireMessage>,
    }

    impl MessageSocket for Unwritable {
        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        fn try_send(&mut self, _message: &WireMessage) -> crate::transport::TransportResult<()> {
            Err(crate::transport::TransportError::NotWritable)
        }

        fn try_fetch(&mut self) -> crate::transport::TransportResult<Option<WireMessage>> {
            Ok(self.inbox.pop_front())
        }

        fn close(&mut self, _disconnect: bool) -> crate::transport::TransportResult<()> {
            Ok(())
        }
    }

    /// Transport whose sockets are all [`Unwritable`]. The replier starts
    /// with `requests` waiting.
    struct UnwritableTransport {
        requests: Vec<WireMessage>,
    }

    impl Transport for UnwritableTransport {
        fn bind_replier(&mut self) -> crate::transport::TransportResult<Box<dyn MessageSocket>> {
            Ok(Box::new(Unwritable {
                endpoint: "stuck://replier".to_string(),
                inbox: self.requests.drain(..).collect(),
            }))
        }

        fn connect_requestor(
            &mut self,
            endpoint: &str,
        ) -> crate::transport::TransportResult<Box<dyn MessageSocket>> {
            Ok(Box::new(Unwritable {
                endpoint: endpoint.to_string(),
                inbox: VecDeque::new(),
            }))
        }
    }

    fn stuck_session(requests: Vec<WireMessage>) -> (Session, Shared<ErrorKind>) {
        let errors: Shared<ErrorKind> = Rc::default();
        let sink = errors.clone();
        let session = Session::new("stuck", UnwritableTransport { requests }, move |e: &SessionError| {
            sink.borrow_mut().push(e.kind)
        });
        (session, errors)
    }

    #[test]
    fn request_reply_round_trip() {
        let network = MemoryNetwork::new();
        let log: Shared<String> = Rc::default();
        let mut a = peer(&network, "a", "1000");
        let mut b = peer(&network, "b", "1000");
        let endpoint = b.listen(false, &log);
        a.connect(&endpoint);

        a.session
            .send_request(request_body("req-1", 100, 0, "zoom_to"))
            .unwrap();
        a.pump();
        assert_eq!(a.session.state(), SessionState::OutgoingRequestWaitingForReply);
        assert_eq!(*a.sent.borrow(), ["req-1"]);

        b.pump();
        assert_eq!(*b.serviced.borrow(), ["req-1"]);
        assert_eq!(b.session.state(), SessionState::Idle);

        a.pump();
        assert_eq!(*a.replies.borrow(), ["req-1"]);
        assert_eq!(a.session.state(), SessionState::Idle);
        assert!(a.errors.borrow().is_empty());
        assert!(b.errors.borrow().is_empty());

        let history = a.session.state_history();
        assert_eq!(
            history[history.len() - 4..],
            [
                SessionState::Idle,
                SessionState::OutgoingRequestToBeSent,
                SessionState::OutgoingRequestWaitingForReply,
                SessionState::Idle,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_escalate_then_discard() {
        let network = MemoryNetwork::new();
        let mut replier = raw_replier(&network);
        let mut a = peer(&network, "a", "5,10,20");
        a.connect(replier.endpoint());

        a.session
            .send_request(request_body("req-1", 100, 0, "ping"))
            .unwrap();
        a.pump();

        let mut retries = Vec::new();
        retries.push(replier.try_fetch().unwrap().unwrap().header.retry);

        for wait in [6, 11] {
            tokio::time::advance(Duration::from_millis(wait)).await;
            a.pump();
            assert_eq!(a.session.state(), SessionState::OutgoingRequestWaitingForReply);
            retries.push(replier.try_fetch().unwrap().unwrap().header.retry);
        }
        assert_eq!(retries, [1, 2, 3]);
        assert!(a.errors.borrow().is_empty());

        tokio::time::advance(Duration::from_millis(21)).await;
        a.pump();
        assert_eq!(*a.errors.borrow(), [ErrorKind::TimedOut]);
        assert_eq!(a.session.state(), SessionState::Idle);
        assert!(replier.try_fetch().unwrap().is_none());
        assert!(a.replies.borrow().is_empty());
    }

    /// Both peers send at once; returns the order requests were serviced in.
    fn collide(a_time: (i64, u32), b_time: (i64, u32)) -> Vec<String> {
        let network = MemoryNetwork::new();
        let log: Shared<String> = Rc::default();
        let mut a = peer(&network, "a", "1000");
        let mut b = peer(&network, "b", "1000");
        let a_endpoint = a.listen(false, &log);
        let b_endpoint = b.listen(false, &log);
        a.connect(&b_endpoint);
        b.connect(&a_endpoint);

        a.session
            .send_request(request_body("a-1", a_time.0, a_time.1, "ping"))
            .unwrap();
        b.session
            .send_request(request_body("b-1", b_time.0, b_time.1, "ping"))
            .unwrap();
        a.session.tick().unwrap();
        b.session.tick().unwrap();

        for _ in 0..4 {
            a.pump();
            b.pump();
        }

        assert_eq!(*a.replies.borrow(), ["a-1"]);
        assert_eq!(*b.replies.borrow(), ["b-1"]);
        assert!(a.errors.borrow().is_empty());
        assert!(b.errors.borrow().is_empty());
        assert_eq!(a.session.state(), SessionState::Idle);
        assert_eq!(b.session.state(), SessionState::Idle);
        log.take()
    }

    #[test]
    fn collision_services_earlier_request_first() {
        assert_eq!(collide((100, 0), (100, 1)), ["b serviced a-1", "a serviced b-1"]);
        assert_eq!(collide((100, 1), (100, 0)), ["a serviced b-1", "b serviced a-1"]);
    }

    #[test]
    fn collision_with_equal_times_is_decided_by_endpoint() {
        // a binds inproc://a-1 and b binds inproc://b-2. At a the peer's
        // request arrived on the lower endpoint, so b's request goes first.
        assert_eq!(collide((100, 0), (100, 0)), ["a serviced b-1", "b serviced a-1"]);
    }

    #[test]
    fn repeated_request_gets_previous_reply() {
        let network = MemoryNetwork::new();
        let log: Shared<String> = Rc::default();
        let mut b = peer(&network, "b", "1000");
        let endpoint = b.listen(false, &log);
        let mut transport = MemoryTransport::new(&network, "raw");

        let request = request_body("req-1", 100, 0, "ping");
        let header = MessageHeader::request("req-1", RequestTime::new(100, 0));

        let mut first = transport.connect_requestor(&endpoint).unwrap();
        first
            .try_send(&WireMessage::new(header.clone(), request.clone()))
            .unwrap();
        b.pump();
        let reply = first.try_fetch().unwrap().unwrap();

        let mut second = transport.connect_requestor(&endpoint).unwrap();
        second
            .try_send(&WireMessage::new(header.with_retry(2), request))
            .unwrap();
        b.pump();
        assert_eq!(second.try_fetch().unwrap().unwrap(), reply);
        assert_eq!(*b.serviced.borrow(), ["req-1"]);

        second
            .try_send(&WireMessage::new(
                MessageHeader::request("req-2", RequestTime::new(101, 0)),
                request_body("req-2", 101, 0, "ping"),
            ))
            .unwrap();
        b.pump();
        assert_eq!(*b.serviced.borrow(), ["req-1", "req-2"]);
        assert!(b.errors.borrow().is_empty());
    }

    #[test]
    fn mismatched_reply_is_out_of_band() {
        let network = MemoryNetwork::new();
        let mut replier = raw_replier(&network);
        let mut a = peer(&network, "a", "1000");
        a.connect(replier.endpoint());

        a.session
            .send_request(request_body("req-1", 100, 0, "ping"))
            .unwrap();
        a.pump();
        replier.try_fetch().unwrap().unwrap();

        let other = reply_body(&request_body("other-9", 100, 0, "ping"));
        replier
            .try_send(&WireMessage::new(
                MessageHeader::reply("req-1", RequestTime::new(100, 0)),
                other,
            ))
            .unwrap();
        a.pump();

        assert_eq!(*a.errors.borrow(), [ErrorKind::OutOfBand]);
        assert!(a.replies.borrow().is_empty());
        assert_eq!(a.session.state(), SessionState::Idle);
    }

    #[test]
    fn held_reply_can_be_aborted_or_supplied() {
        let network = MemoryNetwork::new();
        let log: Shared<String> = Rc::default();
        let mut b = peer(&network, "b", "1000");
        let endpoint = b.listen(true, &log);
        let mut requestor = MemoryTransport::new(&network, "raw")
            .connect_requestor(&endpoint)
            .unwrap();

        assert!(matches!(
            b.session.supply_reply("{}", false),
            Err(ControlError::BadState { .. })
        ));

        requestor
            .try_send(&WireMessage::new(
                MessageHeader::request("req-1", RequestTime::new(100, 0)),
                request_body("req-1", 100, 0, "ping"),
            ))
            .unwrap();
        b.pump();
        assert_eq!(b.session.state(), SessionState::IncomingRequestWaitingForOurReply);

        let handle = b.handles.borrow_mut().remove(0);
        handle.abort().unwrap();
        b.pump();
        assert_eq!(*b.errors.borrow(), [ErrorKind::AppAbort]);
        assert_eq!(b.session.state(), SessionState::Idle);
        assert!(requestor.try_fetch().unwrap().is_none());

        let request = request_body("req-2", 101, 0, "ping");
        requestor
            .try_send(&WireMessage::new(
                MessageHeader::request("req-2", RequestTime::new(101, 0)),
                request.clone(),
            ))
            .unwrap();
        b.pump();
        b.session.supply_reply(&reply_body(&request), false).unwrap();
        b.pump();
        let reply = requestor.try_fetch().unwrap().unwrap();
        assert_eq!(reply.request_id(), "req-2");
        assert!(!reply.header.is_request());
    }

    #[test]
    fn short_message_fails_session() {
        let network = MemoryNetwork::new();
        let log: Shared<String> = Rc::default();
        let mut b = peer(&network, "b", "1000");
        let endpoint = b.listen(false, &log);

        network.inject_truncated(&endpoint);
        assert!(matches!(b.session.poll_replier(), Err(ControlError::Failed)));
        assert_eq!(*b.errors.borrow(), [ErrorKind::BadSocket]);
        assert!(b.session.has_failed());
        assert!(b.session.receive_endpoint().is_none());

        assert!(matches!(b.session.tick(), Err(ControlError::Failed)));
        assert!(matches!(b.session.reset(), Err(ControlError::Failed)));
        assert!(matches!(
            b.session.send_request("{}"),
            Err(ControlError::Failed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn requestor_that_cannot_be_recreated_fails_session() {
        let network = MemoryNetwork::new();
        let replier = raw_replier(&network);
        let mut a = peer(&network, "a", "5,10");
        a.connect(replier.endpoint());

        a.session
            .send_request(request_body("req-1", 100, 0, "ping"))
            .unwrap();
        a.pump();

        network.set_refuse_connections(true);
        tokio::time::advance(Duration::from_millis(6)).await;
        assert!(matches!(a.session.tick(), Err(ControlError::Failed)));
        assert_eq!(*a.errors.borrow(), [ErrorKind::BadSocket]);
        assert_eq!(a.session.state(), SessionState::Failed);
    }

    #[test]
    fn requests_leave_in_priority_order() {
        let network = MemoryNetwork::new();
        let mut replier = raw_replier(&network);
        let mut a = peer(&network, "a", "1000");
        a.connect(replier.endpoint());

        for (id, priority) in [("low", 0), ("high", 5), ("mid", 1)] {
            let body = CommandEnvelope::request("a", id, "ping")
                .with_timestamp(RequestTime::new(100, 0))
                .with_priority(priority)
                .to_body()
                .unwrap();
            a.session.send_request(body).unwrap();
        }
        assert_eq!(a.session.pending_outgoing(), 3);

        a.pump();
        assert_eq!(replier.try_fetch().unwrap().unwrap().request_id(), "high");
        assert_eq!(a.session.pending_outgoing(), 2);
    }

    #[test]
    fn request_handle_queues_on_next_tick() {
        let network = MemoryNetwork::new();
        let mut replier = raw_replier(&network);
        let mut a = peer(&network, "a", "1000");
        a.connect(replier.endpoint());

        let handle = a.session.request_handle();
        handle.send(request_body("req-1", 100, 0, "ping")).unwrap();
        assert_eq!(a.session.pending_outgoing(), 0);

        a.pump();
        assert_eq!(replier.try_fetch().unwrap().unwrap().request_id(), "req-1");
    }

    #[test]
    fn init_and_argument_errors() {
        let network = MemoryNetwork::new();
        let log: Shared<String> = Rc::default();
        let mut a = peer(&network, "a", "1000");

        a.session.tick().unwrap();
        assert_eq!(a.session.state(), SessionState::Inactive);
        assert!(matches!(
            a.session.send_request("{}"),
            Err(ControlError::NotInitialised { half: "send" })
        ));
        assert!(matches!(
            a.session.send_init("", |_| {}, |_| {}),
            Err(ControlError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            a.session.set_timeout_list("never"),
            Err(ControlError::InvalidTimeoutList(_))
        ));

        a.listen(false, &log);
        assert_eq!(a.session.state(), SessionState::Idle);
        assert!(matches!(
            a.session.receive_init(|_, _| {}, |_| {}),
            Err(ControlError::AlreadyInitialised { half: "receive" })
        ));

        let replier = raw_replier(&network);
        a.connect(replier.endpoint());
        assert!(matches!(
            a.session.send_request("not json"),
            Err(ControlError::InvalidRequest(_))
        ));
        assert!(a.errors.borrow().is_empty());
    }

    #[test]
    fn reset_returns_to_inactive() {
        let network = MemoryNetwork::new();
        let log: Shared<String> = Rc::default();
        let replier = raw_replier(&network);
        let mut a = peer(&network, "a", "1000");
        a.listen(false, &log);
        a.connect(replier.endpoint());
        a.session
            .send_request(request_body("req-1", 100, 0, "ping"))
            .unwrap();

        a.session.reset().unwrap();
        assert_eq!(a.session.state(), SessionState::Inactive);
        assert_eq!(a.session.pending_outgoing(), 0);
        assert!(a.session.receive_endpoint().is_none());
        assert!(a.session.peer_endpoint().is_none());

        a.listen(false, &log);
        assert_eq!(a.session.state(), SessionState::Idle);
    }

    #[test]
    fn log_sink_sees_transitions_unless_off() {
        let network = MemoryNetwork::new();
        let log: Shared<String> = Rc::default();
        let sink = MemorySink::new();
        let mut a = peer(&network, "a", "1000");
        a.session.set_log_sink(sink.clone());
        a.listen(false, &log);

        assert!(
            sink.lines()
                .iter()
                .any(|line| line == "DEBUG [a] IDLE session: INACTIVE -> IDLE")
        );

        let quiet = MemorySink::new();
        let mut b = peer(&network, "b", "1000");
        b.session.set_debug_level(DebugLevel::Off);
        b.session.set_log_sink(quiet.clone());
        b.listen(false, &log);
        assert!(quiet.lines().iter().all(|line| !line.contains("->")));

        b.session.reset_log_sink();
        b.session.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_reply_does_not_swallow_next_request() {
        let network = MemoryNetwork::new();
        let log: Shared<String> = Rc::default();
        let mut a = peer(&network, "a", "5,1000");
        let mut b = peer(&network, "b", "1000");
        let endpoint = b.listen(true, &log);
        a.connect(&endpoint);

        let first = request_body("req-1", 100, 0, "ping");
        a.session.send_request(first.clone()).unwrap();
        a.pump();
        b.pump();
        assert_eq!(*b.serviced.borrow(), ["req-1"]);

        // a gives up waiting and resends while b's application is still busy.
        tokio::time::advance(Duration::from_millis(6)).await;
        a.pump();
        b.pump();

        let handle = b.handles.borrow_mut().remove(0);
        handle.reply(reply_body(&first)).unwrap();
        b.pump();
        assert_eq!(b.replied.borrow().len(), 1);

        a.pump();
        assert_eq!(*a.replies.borrow(), ["req-1"]);
        assert_eq!(a.session.state(), SessionState::Idle);

        let second = request_body("req-2", 101, 0, "ping");
        a.session.send_request(second.clone()).unwrap();
        a.pump();
        b.pump();
        assert_eq!(*b.serviced.borrow(), ["req-1", "req-2"]);
        let handle = b.handles.borrow_mut().remove(0);
        handle.reply(reply_body(&second)).unwrap();
        b.pump();
        a.pump();

        assert_eq!(*a.replies.borrow(), ["req-1", "req-2"]);
        assert!(a.errors.borrow().is_empty());
        assert!(b.errors.borrow().is_empty());
        assert_eq!(a.session.state(), SessionState::Idle);
    }

    #[test]
    fn stale_reply_is_dropped_and_wait_continues() {
        let network = MemoryNetwork::new();
        let mut replier = raw_replier(&network);
        let mut a = peer(&network, "a", "1000");
        a.connect(replier.endpoint());

        let request = request_body("req-2", 101, 0, "ping");
        a.session.send_request(request.clone()).unwrap();
        a.pump();
        replier.try_fetch().unwrap().unwrap();

        let stale = request_body("req-1", 100, 0, "ping");
        replier
            .try_send(&WireMessage::new(
                MessageHeader::reply("req-1", RequestTime::new(100, 0)),
                reply_body(&stale),
            ))
            .unwrap();
        a.pump();
        assert_eq!(*a.errors.borrow(), [ErrorKind::OutOfBand]);
        assert_eq!(a.session.state(), SessionState::OutgoingRequestWaitingForReply);

        replier
            .try_send(&WireMessage::new(
                MessageHeader::reply("req-2", RequestTime::new(101, 0)),
                reply_body(&request),
            ))
            .unwrap();
        a.pump();
        assert_eq!(*a.replies.borrow(), ["req-2"]);
        assert_eq!(a.session.state(), SessionState::Idle);
    }

    #[test]
    fn unsendable_request_is_dropped_without_failing() {
        let (mut session, errors) = stuck_session(Vec::new());
        session.send_init("stuck://peer", |_| {}, |_| {}).unwrap();
        session
            .send_request(request_body("req-1", 100, 0, "ping"))
            .unwrap();

        session.tick().unwrap();
        assert_eq!(*errors.borrow(), [ErrorKind::BadSocket]);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.pending_outgoing(), 0);
        assert!(!session.has_failed());
    }

    #[test]
    fn unsendable_reply_is_dropped_without_failing() {
        let request = request_body("req-1", 100, 0, "ping");
        let incoming = WireMessage::new(
            MessageHeader::request("req-1", RequestTime::new(100, 0)),
            request,
        );
        let (mut session, errors) = stuck_session(vec![incoming]);
        let sent: Shared<String> = Rc::default();
        let replied = sent.clone();
        session
            .receive_init(
                |body, handle| handle.reply(reply_body(body)).unwrap(),
                move |body| replied.borrow_mut().push(body.to_string()),
            )
            .unwrap();

        session.poll_replier().unwrap();
        session.tick().unwrap();
        assert_eq!(*errors.borrow(), [ErrorKind::BadSocket]);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(sent.borrow().is_empty());
        assert!(!session.has_failed());
    }
}
