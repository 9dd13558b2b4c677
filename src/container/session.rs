//! Connection sessions
//!
//! A [`ConnectionState`] machine for one logical connection that outlives
//! any number of physical transports. The session owns at most one
//! [`TransportInstance`] at a time; every new transport gets a new
//! generation number so that late events from a discarded one are ignored.

use super::core::ListenerId;
use super::dispatch::OnceGuard;
use super::handler::HandlerId;
use super::link::Link;
use super::options::{ConnectionOptions, ListenerOptions};
use super::scheduler::TimerId;
use crate::endpoint::Endpoint;
use crate::error::{condition, ErrorCondition, FailureKind};
use crate::io::TransportInstance;
use crate::protocol::Frame;
use crate::reconnect::{BackoffPolicy, EndpointResolver};
use std::fmt;
use tracing::{debug, warn};

/// Identifies a connection for its whole lifetime, across reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, no attempt made yet
    Start,
    /// A transport is being established
    Connecting,
    /// Open at both ends
    Open,
    /// Transport lost; waiting for the retry timer
    Reconnecting,
    /// Close sent, waiting for the peer
    Closing,
    /// Closed cleanly (terminal)
    Closed,
    /// Ended by an unrecoverable failure or an aborted reconnect (terminal)
    Failed,
}

impl ConnectionState {
    /// No further transitions happen from a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

/// Which end of the connection this side is
pub(crate) enum Side {
    Client {
        options: ConnectionOptions,
        resolver: EndpointResolver,
        backoff: Option<BackoffPolicy>,
    },
    Server {
        listener: ListenerId,
        options: ListenerOptions,
    },
}

/// Handshake progress on the current transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Wire {
    pub(crate) sasl_done: bool,
    pub(crate) local_open: bool,
    pub(crate) remote_open: bool,
    pub(crate) local_close: bool,
}

/// What to do after a transport failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Reconnect,
    Fail(FailureKind, ErrorCondition),
}

/// Decide between another attempt and a terminal failure
///
/// Authentication failures are final. Without a backoff policy (reconnect
/// disabled) every failure is final. Otherwise the failure is retried until
/// `attempt_count` reaches the policy's limit.
pub(crate) fn decide(
    failure: &ErrorCondition,
    backoff: Option<&BackoffPolicy>,
    attempt_count: u32,
) -> Decision {
    match FailureKind::classify(failure) {
        FailureKind::FatalAuth => Decision::Fail(FailureKind::FatalAuth, failure.clone()),
        kind => match backoff {
            None => Decision::Fail(kind, failure.clone()),
            Some(policy) if policy.is_exhausted(attempt_count) => Decision::Fail(
                FailureKind::PolicyExhausted,
                ErrorCondition::new(
                    condition::RECONNECT_EXHAUSTED,
                    format!("gave up after {} attempts, last error: {}", attempt_count, failure),
                ),
            ),
            Some(_) => Decision::Reconnect,
        },
    }
}

pub(crate) struct Session {
    pub(crate) id: ConnectionId,
    pub(crate) handler: HandlerId,
    pub(crate) side: Side,
    pub(crate) state: ConnectionState,
    /// Consecutive failed retries; 0 after every successful open
    pub(crate) attempt_count: u32,
    /// False until the second successful open
    pub(crate) reconnected: bool,
    pub(crate) opened_once: bool,
    pub(crate) generation: u64,
    pub(crate) transport: Option<TransportInstance>,
    pub(crate) wire: Wire,
    pub(crate) retry_timer: Option<TimerId>,
    pub(crate) links: Vec<Option<Link>>,
    pub(crate) once: OnceGuard,
}

impl Session {
    pub(crate) fn new(id: ConnectionId, handler: HandlerId, side: Side) -> Self {
        Self {
            id,
            handler,
            side,
            state: ConnectionState::Start,
            attempt_count: 0,
            reconnected: false,
            opened_once: false,
            generation: 0,
            transport: None,
            wire: Wire::default(),
            retry_timer: None,
            links: Vec::new(),
            once: OnceGuard::default(),
        }
    }

    pub(crate) fn is_client(&self) -> bool {
        matches!(self.side, Side::Client { .. })
    }

    pub(crate) fn listener(&self) -> Option<ListenerId> {
        match &self.side {
            Side::Server { listener, .. } => Some(*listener),
            Side::Client { .. } => None,
        }
    }

    pub(crate) fn backoff(&self) -> Option<&BackoffPolicy> {
        match &self.side {
            Side::Client { backoff, .. } => backoff.as_ref(),
            Side::Server { .. } => None,
        }
    }

    /// Endpoint of the current or most recent attempt
    pub(crate) fn current_endpoint(&self) -> Option<&Endpoint> {
        match &self.side {
            Side::Client { resolver, .. } => Some(resolver.current()),
            Side::Server { .. } => None,
        }
    }

    /// Install a fresh transport, replacing (and releasing) any previous one
    pub(crate) fn install(&mut self, transport: TransportInstance) {
        self.transport = Some(transport);
        self.wire = Wire::default();
    }

    /// Bump and return the generation for the next transport
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Give up the current transport
    ///
    /// A graceful release lets queued frames (such as a final `Close`) reach
    /// the peer; otherwise the socket task is aborted.
    pub(crate) fn release_transport(&mut self, graceful: bool) {
        if let Some(transport) = self.transport.take() {
            debug!(
                connection = %self.id,
                peer = transport.peer(),
                graceful = graceful,
                "Releasing transport"
            );
            if graceful {
                transport.finish();
            }
        }
        self.wire = Wire::default();
    }

    /// Queue a frame on the current transport; false if there is none
    pub(crate) fn send(&self, frame: &Frame) -> bool {
        match &self.transport {
            Some(transport) => match transport.send(frame) {
                Ok(()) => true,
                Err(e) => {
                    warn!(connection = %self.id, error = %e, "Failed to queue frame");
                    false
                }
            },
            None => false,
        }
    }

    /// Record a successful open
    pub(crate) fn mark_open(&mut self) {
        self.state = ConnectionState::Open;
        self.attempt_count = 0;
        self.reconnected = self.opened_once;
        self.opened_once = true;
    }

    /// Link frames may be sent on the current transport
    pub(crate) fn links_ready(&self) -> bool {
        self.transport.is_some() && self.wire.local_open && !self.wire.local_close
    }

    /// Link frames from the peer are processed
    pub(crate) fn accepts_link_frames(&self) -> bool {
        self.transport.is_some()
            && self.wire.remote_open
            && matches!(self.state, ConnectionState::Open | ConnectionState::Connecting)
            && !self.wire.local_close
    }

    pub(crate) fn link(&self, handle: u32) -> Option<&Link> {
        self.links.get(handle as usize)?.as_ref()
    }

    pub(crate) fn link_mut(&mut self, handle: u32) -> Option<&mut Link> {
        self.links.get_mut(handle as usize)?.as_mut()
    }
}
