//! Loop-owned state and the connection state machine
//!
//! [`Core`] holds every session, listener and timer of a container. Its
//! methods are the state transitions; callbacks are only ever queued from
//! here (as [`Event::Notify`]) and delivered by the loop afterwards.

use super::dispatch::{Notification, Once};
use super::handler::{HandlerId, HandlerRegistry};
use super::link::{Delivery, LinkId, LinkRebinder};
use super::options::{parse_plain, plain_response, ConnectionOptions, ListenerOptions, MECH_PLAIN};
use super::scheduler::{BarrierId, Scheduler, TimerAction, TimerId, Work};
use super::session::{decide, ConnectionId, ConnectionState, Decision, Session, Side};
use super::LoopEvent;
use crate::endpoint::Endpoint;
use crate::error::{condition, ErrorCondition, FailureKind, LinkError, Result};
use crate::io::{Listener, ListenerEvent, TransportConfig, TransportEvent, TransportInstance};
use crate::protocol::{Frame, Outcome, SaslCode};
use crate::reconnect::{BackoffPolicy, EndpointResolver};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

/// Identifies a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Work queued on the loop
pub(crate) enum Event {
    Notify(HandlerId, Notification),
    Work(Work),
    ScheduleRetry(ConnectionId),
    AutoOpen(ConnectionId),
    AutoAttach(LinkId),
    AutoAccept(Delivery),
    Arrive(BarrierId),
    /// Drop a finished session once its final transport close was delivered
    Reap(ConnectionId),
}

pub(crate) struct ListenerEntry {
    listener: Listener,
    handler: HandlerId,
    options: ListenerOptions,
}

pub(crate) struct Core {
    pub(crate) container_id: String,
    pub(crate) tx: UnboundedSender<LoopEvent>,
    pub(crate) queue: VecDeque<Event>,
    pub(crate) sessions: BTreeMap<ConnectionId, Session>,
    pub(crate) listeners: BTreeMap<ListenerId, ListenerEntry>,
    pub(crate) scheduler: Scheduler,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) stopping: bool,
    next_connection: u64,
    next_listener: u64,
}

impl Core {
    pub(crate) fn new(container_id: String, tx: UnboundedSender<LoopEvent>) -> Self {
        Self {
            container_id,
            tx,
            queue: VecDeque::new(),
            sessions: BTreeMap::new(),
            listeners: BTreeMap::new(),
            scheduler: Scheduler::default(),
            handlers: HandlerRegistry::default(),
            stopping: false,
            next_connection: 0,
            next_listener: 0,
        }
    }

    pub(crate) fn notify(&mut self, handler: HandlerId, notification: Notification) {
        self.queue.push_back(Event::Notify(handler, notification));
    }

    /// Queue a notification for the handler of `conn`
    pub(crate) fn notify_conn(&mut self, conn: ConnectionId, notification: Notification) {
        if let Some(handler) = self.sessions.get(&conn).map(|s| s.handler) {
            self.notify(handler, notification);
        }
    }

    /// Nothing left that could ever produce another event
    pub(crate) fn is_idle(&self) -> bool {
        self.queue.is_empty()
            && self.listeners.is_empty()
            && self.scheduler.pending_timers() == 0
            && self.sessions.values().all(|s| s.state.is_terminal())
    }

    pub(crate) fn live_session_mut(
        &mut self,
        conn: ConnectionId,
        operation: &'static str,
    ) -> Result<&mut Session> {
        let session = self
            .sessions
            .get_mut(&conn)
            .ok_or(LinkError::UnknownConnection(conn))?;
        if session.state.is_terminal() {
            return Err(LinkError::InvalidState {
                operation,
                state: format!("{:?}", session.state),
            });
        }
        Ok(session)
    }

    fn check_running(&self, operation: &'static str) -> Result<()> {
        if self.stopping {
            return Err(LinkError::InvalidState {
                operation,
                state: "container stopping".to_string(),
            });
        }
        Ok(())
    }

    fn check_handler(&self, handler: HandlerId) -> Result<()> {
        if !self.handlers.contains(handler) {
            return Err(LinkError::InvalidConfig(format!("unknown handler {:?}", handler)));
        }
        Ok(())
    }

    // ---- Connections -------------------------------------------------------

    /// Create a client connection and start its first attempt (no delay)
    pub(crate) fn connect(
        &mut self,
        url: &str,
        options: ConnectionOptions,
    ) -> Result<ConnectionId> {
        self.check_running("connect")?;
        let primary = Endpoint::parse(url)?;
        if let Some(reconnect) = &options.reconnect {
            reconnect.validate()?;
        }
        let handler = options.handler.unwrap_or(HandlerId::ROOT);
        self.check_handler(handler)?;

        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        let backoff = options.reconnect.as_ref().map(BackoffPolicy::new);
        let failover = options
            .reconnect
            .as_ref()
            .map(|r| r.failover_urls.clone())
            .unwrap_or_default();

        info!(
            connection = %id,
            endpoint = %primary,
            failover = failover.len(),
            reconnect = backoff.is_some(),
            "Connecting"
        );

        let mut session = Session::new(
            id,
            handler,
            Side::Client {
                options,
                resolver: EndpointResolver::new(primary, failover),
                backoff,
            },
        );
        session.once.claim(Once::Start);
        self.sessions.insert(id, session);
        self.notify(handler, Notification::ConnectionStart(id));
        self.start_transport(id);
        Ok(id)
    }

    /// Open a transport to the resolver's current endpoint
    fn start_transport(&mut self, conn: ConnectionId) {
        let tx = self.tx.clone();
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        let (endpoint, config) = match &session.side {
            Side::Client {
                options, resolver, ..
            } => (
                resolver.current().clone(),
                TransportConfig {
                    connect_timeout: options.connect_timeout,
                    idle_timeout: options.idle_timeout,
                },
            ),
            Side::Server { .. } => return,
        };
        let generation = session.next_generation();
        session.state = ConnectionState::Connecting;
        debug!(
            connection = %conn,
            endpoint = %endpoint,
            attempt = session.attempt_count,
            generation = generation,
            "Opening transport"
        );
        let transport = TransportInstance::connect(&endpoint, config, move |event| {
            tx.send(LoopEvent::Transport {
                conn,
                generation,
                event,
            })
            .is_ok()
        });
        session.install(transport);
    }

    pub(crate) fn on_transport_event(
        &mut self,
        conn: ConnectionId,
        generation: u64,
        event: TransportEvent,
    ) {
        let Some(session) = self.sessions.get(&conn) else {
            return;
        };
        if session.generation != generation || session.transport.is_none() {
            trace!(
                connection = %conn,
                generation = generation,
                "Ignoring event from discarded transport"
            );
            return;
        }
        let closing = session.state == ConnectionState::Closing;

        match event {
            TransportEvent::Connected => {
                if let Side::Server { options, .. } = &session.side {
                    session.send(&Frame::SaslMechanisms {
                        mechanisms: options.sasl_mechanisms.clone(),
                    });
                }
            }
            TransportEvent::Frame(frame) => self.on_frame(conn, frame),
            TransportEvent::Closed if closing => self.finish_closed(conn),
            TransportEvent::Closed => self.on_failure(
                conn,
                ErrorCondition::new(condition::TRANSPORT_IO, "connection closed by peer"),
            ),
            TransportEvent::Failed(_) if closing => self.finish_closed(conn),
            TransportEvent::Failed(cond) => self.on_failure(conn, cond),
        }
    }

    fn on_frame(&mut self, conn: ConnectionId, frame: Frame) {
        trace!(connection = %conn, frame_type = ?frame.frame_type(), "Frame received");
        match frame {
            Frame::SaslMechanisms { mechanisms } => self.on_sasl_mechanisms(conn, mechanisms),
            Frame::SaslInit {
                mechanism,
                initial_response,
            } => self.on_sasl_init(conn, &mechanism, &initial_response),
            Frame::SaslOutcome { code } => self.on_sasl_outcome(conn, code),
            Frame::Open { idle_timeout_ms, .. } => self.on_remote_open(conn, idle_timeout_ms),
            Frame::Close { error } => self.on_remote_close(conn, error),
            Frame::Empty => {}
            link_frame => self.on_link_frame(conn, link_frame),
        }
    }

    /// Client side: pick a mechanism from the peer's offer
    fn on_sasl_mechanisms(&mut self, conn: ConnectionId, mechanisms: Vec<String>) {
        let Some(session) = self.sessions.get(&conn) else {
            return;
        };
        let Side::Client { options, .. } = &session.side else {
            warn!(connection = %conn, "Unexpected SASL mechanisms on accepted connection");
            return;
        };
        if session.wire.sasl_done {
            return;
        }

        let init = mechanisms.iter().find(|m| options.allows_mech(m)).map(|mech| {
            let response = if mech.eq_ignore_ascii_case(MECH_PLAIN) {
                plain_response(
                    options.user.as_deref().unwrap_or_default(),
                    options.password.as_deref().unwrap_or_default(),
                )
            } else {
                Vec::new()
            };
            Frame::SaslInit {
                mechanism: mech.clone(),
                initial_response: Bytes::from(response),
            }
        });

        match init {
            Some(frame) => {
                debug!(connection = %conn, frame = ?frame.frame_type(), "Selected SASL mechanism");
                session.send(&frame);
            }
            None => {
                let cond = ErrorCondition::new(
                    condition::SASL_AUTH,
                    format!("no acceptable SASL mechanism among {:?}", mechanisms),
                );
                self.on_failure(conn, cond);
            }
        }
    }

    /// Server side: check the client's choice and credentials
    fn on_sasl_init(&mut self, conn: ConnectionId, mechanism: &str, response: &[u8]) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        let Side::Server { options, .. } = &session.side else {
            warn!(connection = %conn, "Unexpected SASL init on outgoing connection");
            return;
        };

        let rejection = if !options.offers(mechanism) {
            Some(format!("mechanism {} not offered", mechanism))
        } else if mechanism.eq_ignore_ascii_case(MECH_PLAIN) {
            match parse_plain(response) {
                Some((user, password)) if options.check_plain(&user, &password) => None,
                _ => Some("invalid credentials".to_string()),
            }
        } else {
            None
        };

        match rejection {
            None => {
                session.send(&Frame::SaslOutcome { code: SaslCode::Ok });
                session.wire.sasl_done = true;
                debug!(connection = %conn, mechanism = %mechanism, "SASL accepted");
            }
            Some(reason) => {
                session.send(&Frame::SaslOutcome {
                    code: SaslCode::Auth,
                });
                session.release_transport(true);
                warn!(connection = %conn, reason = %reason, "SASL rejected");
                let error = ErrorCondition::new(condition::SASL_AUTH, reason);
                self.terminate(conn, FailureKind::FatalAuth, Some(error));
            }
        }
    }

    /// Client side: SASL finished
    fn on_sasl_outcome(&mut self, conn: ConnectionId, code: SaslCode) {
        match code {
            SaslCode::Ok => {
                if let Some(session) = self.sessions.get_mut(&conn) {
                    session.wire.sasl_done = true;
                }
                self.transport_ready(conn);
            }
            SaslCode::Auth => self.on_failure(
                conn,
                ErrorCondition::new(
                    condition::UNAUTHORIZED_ACCESS,
                    "authentication rejected by peer",
                ),
            ),
        }
    }

    /// Client side: send `Open` and replay links on the new transport
    fn transport_ready(&mut self, conn: ConnectionId) {
        let default_id = self.container_id.clone();
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if session.state != ConnectionState::Connecting {
            return;
        }
        let Side::Client {
            options, resolver, ..
        } = &session.side
        else {
            return;
        };
        let open = Frame::Open {
            container_id: options.container_id.clone().unwrap_or(default_id),
            hostname: resolver.current().connect_host().to_string(),
            idle_timeout_ms: millis(options.idle_timeout),
        };
        session.send(&open);
        session.wire.local_open = true;

        let frames = LinkRebinder::rebind(&mut session.links);
        if !frames.is_empty() {
            debug!(
                connection = %conn,
                reconnected = session.opened_once,
                frames = frames.len(),
                "Replaying links"
            );
        }
        for frame in &frames {
            session.send(frame);
        }
    }

    fn on_remote_open(&mut self, conn: ConnectionId, idle_timeout_ms: u32) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if session.wire.remote_open {
            return;
        }
        session.wire.remote_open = true;
        if idle_timeout_ms > 0 {
            if let Some(transport) = &session.transport {
                let interval = u64::from(idle_timeout_ms / 2).max(1);
                transport.set_heartbeat(Duration::from_millis(interval));
            }
        }
        if session.state != ConnectionState::Connecting {
            return;
        }
        if !session.wire.sasl_done {
            self.on_failure(
                conn,
                ErrorCondition::new(
                    condition::FRAMING_ERROR,
                    "Open received before SASL completed",
                ),
            );
            return;
        }

        session.mark_open();
        let server = !session.is_client();
        info!(
            connection = %conn,
            endpoint = %session.current_endpoint().map(|e| e.to_string()).unwrap_or_default(),
            reconnected = session.reconnected,
            "Connection open"
        );
        self.notify_conn(conn, Notification::ConnectionOpen(conn));
        if server {
            self.queue.push_back(Event::AutoOpen(conn));
        }
    }

    fn on_remote_close(&mut self, conn: ConnectionId, error: Option<ErrorCondition>) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if session.state == ConnectionState::Closing {
            self.finish_closed(conn);
            return;
        }

        if !session.wire.local_close {
            if !session.wire.local_open && session.wire.sasl_done {
                let open = open_frame(&self.container_id);
                session.send(&open);
                session.wire.local_open = true;
            }
            session.send(&Frame::Close { error: None });
            session.wire.local_close = true;
        }

        match error {
            None => {
                info!(connection = %conn, "Peer closed connection");
                self.finish_closed(conn);
            }
            Some(cond) => {
                debug!(connection = %conn, condition = %cond, "Peer closed connection with error");
                self.on_failure(conn, cond);
            }
        }
    }

    /// The current transport is gone; retry or give up
    fn on_failure(&mut self, conn: ConnectionId, failure: ErrorCondition) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        match session.state {
            ConnectionState::Closed | ConnectionState::Failed => return,
            ConnectionState::Closing => {
                self.finish_closed(conn);
                return;
            }
            _ => {}
        }

        let graceful = session.wire.local_close;
        session.release_transport(graceful);
        LinkRebinder::suspend(&mut session.links);

        let decision = if session.is_client() {
            decide(&failure, session.backoff(), session.attempt_count)
        } else {
            Decision::Fail(FailureKind::classify(&failure), failure.clone())
        };

        match decision {
            Decision::Reconnect => {
                session.state = ConnectionState::Reconnecting;
                info!(
                    connection = %conn,
                    attempt = session.attempt_count,
                    condition = %failure,
                    "Connection lost, reconnecting"
                );
                self.notify_conn(conn, Notification::ConnectionReconnecting(conn));
                self.queue.push_back(Event::ScheduleRetry(conn));
            }
            Decision::Fail(kind, error) => {
                warn!(connection = %conn, kind = ?kind, condition = %error, "Connection failed");
                self.terminate(conn, kind, Some(error));
            }
        }
    }

    /// Enter `Failed`; deliver the error (if `kind` surfaces one) and the
    /// final transport close
    fn terminate(&mut self, conn: ConnectionId, kind: FailureKind, error: Option<ErrorCondition>) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if session.once.has_fired(Once::TransportClose) {
            trace!(connection = %conn, state = ?session.state, "Connection already finished");
            return;
        }
        session.release_transport(false);
        session.state = ConnectionState::Failed;
        if let Some(timer) = session.retry_timer.take() {
            self.scheduler.cancel(timer);
        }

        let handler = session.handler;
        let report_error = error
            .filter(|_| kind.surfaces_error())
            .filter(|_| session.once.claim(Once::TransportError));
        let report_close = session.once.claim(Once::TransportClose);
        if let Some(error) = report_error {
            self.notify(handler, Notification::TransportError(conn, error));
        }
        if report_close {
            self.notify(handler, Notification::TransportClose(conn));
        }
    }

    /// Enter `Closed`; deliver connection close then transport close
    fn finish_closed(&mut self, conn: ConnectionId) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        session.release_transport(true);
        session.state = ConnectionState::Closed;
        if let Some(timer) = session.retry_timer.take() {
            self.scheduler.cancel(timer);
        }
        info!(connection = %conn, "Connection closed");

        let handler = session.handler;
        let report_close = session.once.claim(Once::Close);
        let report_transport_close = session.once.claim(Once::TransportClose);
        if report_close {
            self.notify(handler, Notification::ConnectionClose(conn));
        }
        if report_transport_close {
            self.notify(handler, Notification::TransportClose(conn));
        }
    }

    /// Arm the retry timer once the reconnecting callback has run
    pub(crate) fn schedule_retry(&mut self, conn: ConnectionId) {
        if self.stopping {
            return;
        }
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if session.state != ConnectionState::Reconnecting || session.retry_timer.is_some() {
            return;
        }
        let attempt = session.attempt_count;
        let Some((delay, max_attempts)) = session
            .backoff()
            .map(|b| (b.delay_for(attempt), b.max_attempts()))
        else {
            return;
        };
        let timer = self
            .scheduler
            .schedule(delay, TimerAction::Retry(conn), &self.tx);
        session.retry_timer = Some(timer);
        debug!(
            connection = %conn,
            attempt = attempt,
            max_attempts = ?max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );
    }

    /// The retry timer fired: advance the cursor and try the next endpoint
    fn retry(&mut self, conn: ConnectionId) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if session.state != ConnectionState::Reconnecting {
            return;
        }
        session.retry_timer = None;
        session.attempt_count = session.attempt_count.saturating_add(1);
        let attempt = session.attempt_count;
        if let Side::Client { resolver, .. } = &mut session.side {
            let endpoint = resolver.next().clone();
            info!(
                connection = %conn,
                endpoint = %endpoint,
                position = resolver.position(),
                attempt = attempt,
                "Reconnect attempt"
            );
        }
        self.start_transport(conn);
    }

    /// Send the local `Open` on an accepted connection
    pub(crate) fn open_connection(&mut self, conn: ConnectionId) -> Result<()> {
        let container_id = self.container_id.clone();
        let session = self.live_session_mut(conn, "open")?;
        if session.wire.local_open {
            return Ok(());
        }
        if session.transport.is_none() || !session.wire.sasl_done || session.wire.local_close {
            return Err(LinkError::InvalidState {
                operation: "open",
                state: format!("{:?}", session.state),
            });
        }
        session.send(&open_frame(&container_id));
        session.wire.local_open = true;
        Ok(())
    }

    /// Open an accepted connection the handler neither opened nor closed
    pub(crate) fn auto_open(&mut self, conn: ConnectionId) {
        let pending = self.sessions.get(&conn).is_some_and(|s| {
            s.state == ConnectionState::Open && !s.wire.local_open && !s.wire.local_close
        });
        if pending {
            if let Err(e) = self.open_connection(conn) {
                debug!(connection = %conn, error = %e, "Auto open skipped");
            }
        }
    }

    /// Close a connection, optionally with an error condition for the peer
    ///
    /// While reconnecting this abandons the reconnect cycle: the connection
    /// fails without an error and only the final transport close is
    /// delivered.
    pub(crate) fn close(
        &mut self,
        conn: ConnectionId,
        error: Option<ErrorCondition>,
    ) -> Result<()> {
        let container_id = self.container_id.clone();
        let session = self
            .sessions
            .get_mut(&conn)
            .ok_or(LinkError::UnknownConnection(conn))?;

        match session.state {
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed => Ok(()),
            ConnectionState::Reconnecting => {
                info!(
                    connection = %conn,
                    kind = ?FailureKind::UserAbort,
                    "Reconnect aborted by application"
                );
                self.terminate(conn, FailureKind::UserAbort, None);
                Ok(())
            }
            ConnectionState::Start | ConnectionState::Connecting | ConnectionState::Open => {
                let negotiated = session.transport.is_some()
                    && session.wire.sasl_done
                    && (session.wire.local_open || !session.is_client());
                if !negotiated {
                    debug!(connection = %conn, "Abandoning connect attempt");
                    session.release_transport(false);
                    self.finish_closed(conn);
                    return Ok(());
                }
                if !session.wire.local_open {
                    session.send(&open_frame(&container_id));
                    session.wire.local_open = true;
                }
                if let Some(cond) = &error {
                    debug!(connection = %conn, condition = %cond, "Closing with error");
                }
                session.send(&Frame::Close { error });
                session.wire.local_close = true;
                session.state = ConnectionState::Closing;
                debug!(connection = %conn, "Close sent");
                Ok(())
            }
        }
    }

    pub(crate) fn auto_accept(&mut self, delivery: Delivery) {
        if let Err(e) = self.settle(delivery, Outcome::Accepted) {
            trace!(link = %delivery.link, error = %e, "Auto accept skipped");
        }
    }

    // ---- Listeners ---------------------------------------------------------

    pub(crate) fn listen(&mut self, addr: &str, options: ListenerOptions) -> Result<ListenerId> {
        self.check_running("listen")?;
        let endpoint = Endpoint::parse(addr)?;
        let handler = options.handler.unwrap_or(HandlerId::ROOT);
        self.check_handler(handler)?;

        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        let tx = self.tx.clone();
        let listener = Listener::bind(&endpoint, move |event| {
            tx.send(LoopEvent::Listener { id, event }).is_ok()
        })?;
        info!(listener = %id, local_addr = %listener.local_addr(), "Listening");

        self.listeners.insert(
            id,
            ListenerEntry {
                listener,
                handler,
                options,
            },
        );
        self.notify(handler, Notification::ListenerOpen(id));
        Ok(id)
    }

    pub(crate) fn listener_addr(&self, id: ListenerId) -> Option<SocketAddr> {
        self.listeners.get(&id).map(|e| e.listener.local_addr())
    }

    pub(crate) fn stop_listener(&mut self, id: ListenerId) -> bool {
        match self.listeners.remove(&id) {
            Some(entry) => {
                info!(listener = %id, "Listener stopped");
                self.notify(entry.handler, Notification::ListenerClose(id));
                true
            }
            None => false,
        }
    }

    pub(crate) fn on_listener_event(&mut self, id: ListenerId, event: ListenerEvent) {
        match event {
            ListenerEvent::Accepted(stream, peer) => self.accept(id, stream, peer),
            ListenerEvent::Failed(e) => {
                if let Some(entry) = self.listeners.remove(&id) {
                    warn!(listener = %id, error = %e, "Listener failed");
                    let error = ErrorCondition::io(&e);
                    self.notify(entry.handler, Notification::ListenerError(id, error));
                    self.notify(entry.handler, Notification::ListenerClose(id));
                }
            }
        }
    }

    fn accept(&mut self, listener: ListenerId, stream: TcpStream, peer: SocketAddr) {
        if self.stopping {
            return;
        }
        let Some(entry) = self.listeners.get(&listener) else {
            trace!(
                listener = %listener,
                peer_addr = %peer,
                "Dropping connection for stopped listener"
            );
            return;
        };

        self.next_connection += 1;
        let conn = ConnectionId(self.next_connection);
        let mut session = Session::new(
            conn,
            entry.handler,
            Side::Server {
                listener,
                options: entry.options.clone(),
            },
        );
        let generation = session.next_generation();
        let tx = self.tx.clone();
        let transport = TransportInstance::accept(stream, TransportConfig::default(), move |event| {
            tx.send(LoopEvent::Transport {
                conn,
                generation,
                event,
            })
            .is_ok()
        });
        session.install(transport);
        session.state = ConnectionState::Connecting;
        info!(connection = %conn, listener = %listener, peer_addr = %peer, "Accepted connection");
        self.sessions.insert(conn, session);
    }

    // ---- Timers and barriers -----------------------------------------------

    pub(crate) fn schedule_work(&mut self, delay: Duration, work: Work) -> TimerId {
        self.scheduler.schedule(delay, TimerAction::Work(work), &self.tx)
    }

    pub(crate) fn on_timer(&mut self, id: TimerId) {
        match self.scheduler.fire(id) {
            Some(TimerAction::Work(work)) => self.queue.push_back(Event::Work(work)),
            Some(TimerAction::Retry(conn)) => self.retry(conn),
            None => trace!(timer = %id, "Ignoring cancelled timer"),
        }
    }

    pub(crate) fn arrive(&mut self, id: BarrierId) {
        if let Some(work) = self.scheduler.arrive(id) {
            self.queue.push_back(Event::Work(work));
        }
    }

    pub(crate) fn barrier_then(&mut self, id: BarrierId, work: Work) {
        if let Some(work) = self.scheduler.set_continuation(id, work) {
            self.queue.push_back(Event::Work(work));
        }
    }

    /// Forget a session that reached `Closed` or `Failed`
    ///
    /// Later calls naming the connection see it as unknown.
    pub(crate) fn reap(&mut self, conn: ConnectionId) {
        let terminal = self
            .sessions
            .get(&conn)
            .is_some_and(|s| s.state.is_terminal());
        if terminal {
            if let Some(session) = self.sessions.remove(&conn) {
                debug!(
                    connection = %conn,
                    state = ?session.state,
                    links = session.links.len(),
                    "Session reaped"
                );
            }
        }
    }

    // ---- Stop --------------------------------------------------------------

    /// Tear everything down; every live connection gets its final transport close
    pub(crate) fn shutdown(&mut self) {
        self.stopping = true;
        info!(
            connections = self.sessions.values().filter(|s| !s.state.is_terminal()).count(),
            listeners = self.listeners.len(),
            "Container stopping"
        );

        let mut notes = Vec::new();
        for session in self.sessions.values_mut() {
            if session.state.is_terminal() {
                continue;
            }
            session.release_transport(false);
            session.retry_timer = None;
            session.state = ConnectionState::Closed;
            if session.once.claim(Once::TransportClose) {
                notes.push((session.handler, Notification::TransportClose(session.id)));
            }
        }
        for (id, entry) in std::mem::take(&mut self.listeners) {
            notes.push((entry.handler, Notification::ListenerClose(id)));
        }
        self.scheduler.clear();

        for (handler, note) in notes {
            self.notify(handler, note);
        }
    }
}

fn millis(duration: Option<Duration>) -> u32 {
    duration
        .map(|d| u32::try_from(d.as_millis()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

fn open_frame(container_id: &str) -> Frame {
    Frame::Open {
        container_id: container_id.to_string(),
        hostname: String::new(),
        idle_timeout_ms: 0,
    }
}
