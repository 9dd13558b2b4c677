//! Handle given to every callback for acting on the container

use super::core::{Core, Event, ListenerId};
use super::handler::{HandlerId, MessagingHandler};
use super::link::{Delivery, LinkId, Tracker};
use super::options::{ConnectionOptions, LinkOptions, ListenerOptions};
use super::scheduler::{BarrierId, TimerId};
use super::session::{ConnectionId, ConnectionState};
use crate::endpoint::Endpoint;
use crate::error::{ErrorCondition, Result};
use crate::protocol::{Message, Outcome, Role};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Access to the container from inside a callback or scheduled work
///
/// Operations take effect immediately on the container's state; the
/// callbacks they cause are delivered after the current callback returns.
pub struct Context<'a> {
    core: &'a mut Core,
}

impl<'a> Context<'a> {
    pub(crate) fn new(core: &'a mut Core) -> Self {
        Self { core }
    }

    /// Container identifier sent in `Open`
    pub fn container_id(&self) -> &str {
        &self.core.container_id
    }

    /// Open a client connection to `url`
    ///
    /// The first attempt starts right away. With
    /// [`ConnectionOptions::reconnect`] set, failures are retried across the
    /// primary and failover endpoints in rotation.
    ///
    /// # Errors
    ///
    /// - [`LinkError::InvalidEndpoint`](crate::error::LinkError::InvalidEndpoint) - Bad `url`
    /// - [`LinkError::InvalidConfig`](crate::error::LinkError::InvalidConfig) - Bad policy
    /// - [`LinkError::InvalidState`](crate::error::LinkError::InvalidState) - Container stopping
    pub fn connect(&mut self, url: &str, options: ConnectionOptions) -> Result<ConnectionId> {
        self.core.connect(url, options)
    }

    /// Listen on `addr`; port 0 picks a free port
    ///
    /// # Errors
    ///
    /// - [`LinkError::Io`](crate::error::LinkError::Io) - Failed to bind
    /// - [`LinkError::InvalidState`](crate::error::LinkError::InvalidState) - Container stopping
    pub fn listen(&mut self, addr: &str, options: ListenerOptions) -> Result<ListenerId> {
        self.core.listen(addr, options)
    }

    /// Bound address of a listener
    pub fn listener_addr(&self, listener: ListenerId) -> Option<SocketAddr> {
        self.core.listener_addr(listener)
    }

    /// Stop accepting; false if the listener is already gone
    pub fn stop_listener(&mut self, listener: ListenerId) -> bool {
        self.core.stop_listener(listener)
    }

    /// Listener an accepted connection came in on
    pub fn listener_of(&self, conn: ConnectionId) -> Option<ListenerId> {
        self.core.sessions.get(&conn)?.listener()
    }

    /// Register another handler to attach to connections or listeners
    pub fn add_handler(&mut self, handler: Box<dyn MessagingHandler>) -> HandlerId {
        self.core.handlers.add(handler)
    }

    /// Open an accepted connection
    ///
    /// Accepted connections are opened automatically after
    /// `on_connection_open` unless the handler closed them first.
    pub fn open_connection(&mut self, conn: ConnectionId) -> Result<()> {
        self.core.open_connection(conn)
    }

    /// Close a connection
    ///
    /// Any close made while the connection waits for a retry, whether from
    /// `on_connection_reconnecting`, a timer or another connection's
    /// callback, cancels the pending retry. The connection then ends in
    /// `Failed` with only `on_transport_close`, never `on_connection_close`.
    pub fn close(&mut self, conn: ConnectionId) -> Result<()> {
        self.core.close(conn, None)
    }

    /// Close a connection, reporting `condition` to the peer
    pub fn close_with_error(
        &mut self,
        conn: ConnectionId,
        condition: ErrorCondition,
    ) -> Result<()> {
        self.core.close(conn, Some(condition))
    }

    /// Current state of a connection
    ///
    /// `None` once the connection has finished and its `on_transport_close`
    /// has returned; the container forgets finished connections then.
    pub fn connection_state(&self, conn: ConnectionId) -> Option<ConnectionState> {
        self.core.sessions.get(&conn).map(|s| s.state)
    }

    /// Whether the most recent open was a reconnect
    ///
    /// False until the connection has opened a second time.
    pub fn reconnected(&self, conn: ConnectionId) -> bool {
        self.core.sessions.get(&conn).is_some_and(|s| s.reconnected)
    }

    /// Consecutive failed retries since the last successful open
    pub fn attempt_count(&self, conn: ConnectionId) -> Option<u32> {
        self.core.sessions.get(&conn).map(|s| s.attempt_count)
    }

    /// Endpoint of the current (or most recent) attempt of a client connection
    pub fn current_endpoint(&self, conn: ConnectionId) -> Option<Endpoint> {
        self.core.sessions.get(&conn)?.current_endpoint().cloned()
    }

    /// Open a sending link
    ///
    /// The link survives reconnects: it is re-attached on every new
    /// transport until it is closed.
    pub fn open_sender(
        &mut self,
        conn: ConnectionId,
        address: &str,
        options: LinkOptions,
    ) -> Result<LinkId> {
        self.core.open_link(conn, Role::Sender, address, options)
    }

    /// Open a receiving link, granting `options.credit_window` credit
    pub fn open_receiver(
        &mut self,
        conn: ConnectionId,
        address: &str,
        options: LinkOptions,
    ) -> Result<LinkId> {
        self.core.open_link(conn, Role::Receiver, address, options)
    }

    /// Attach a link the peer opened, from `on_sender_open` or `on_receiver_open`
    ///
    /// Links not accepted explicitly are attached with default options once
    /// the callback returns.
    pub fn accept_link(&mut self, link: LinkId, options: LinkOptions) -> Result<()> {
        self.core.accept_link(link, options)
    }

    /// Grant additional credit on a receiver
    pub fn add_credit(&mut self, link: LinkId, credit: u32) -> Result<()> {
        self.core.add_credit(link, credit)
    }

    /// Send a message on a sender
    ///
    /// # Errors
    ///
    /// - [`LinkError::NoCredit`](crate::error::LinkError::NoCredit) - No credit from the peer
    /// - [`LinkError::InvalidState`](crate::error::LinkError::InvalidState) - The link is not open
    pub fn send(&mut self, link: LinkId, message: impl Into<Message>) -> Result<Tracker> {
        self.core.send_message(link, &message.into())
    }

    /// Remaining credit on a link
    pub fn link_credit(&self, link: LinkId) -> Option<u32> {
        self.core.link_credit(link)
    }

    pub fn accept(&mut self, delivery: Delivery) -> Result<()> {
        self.core.settle(delivery, Outcome::Accepted).map(|_| ())
    }

    pub fn reject(&mut self, delivery: Delivery) -> Result<()> {
        self.core.settle(delivery, Outcome::Rejected).map(|_| ())
    }

    pub fn release(&mut self, delivery: Delivery) -> Result<()> {
        self.core.settle(delivery, Outcome::Released).map(|_| ())
    }

    /// Detach a link; it will not be re-attached on reconnect
    pub fn close_link(&mut self, link: LinkId) -> Result<()> {
        self.core.close_link(link)
    }

    /// Run `work` on the loop after `delay`
    pub fn schedule<F>(&mut self, delay: Duration, work: F) -> TimerId
    where
        F: FnOnce(&mut Context<'_>) + Send + 'static,
    {
        self.core.schedule_work(delay, Box::new(work))
    }

    /// Run `work` on the loop after the current callback
    pub fn post<F>(&mut self, work: F)
    where
        F: FnOnce(&mut Context<'_>) + Send + 'static,
    {
        self.core.queue.push_back(Event::Work(Box::new(work)));
    }

    /// Cancel scheduled work; false if it already ran
    pub fn cancel(&mut self, timer: TimerId) -> bool {
        self.core.scheduler.cancel(timer)
    }

    /// Create a barrier released after `count` arrivals
    pub fn barrier(&mut self, count: usize) -> BarrierId {
        self.core.scheduler.barrier(count)
    }

    /// Count one arrival at a barrier
    pub fn arrive(&mut self, barrier: BarrierId) {
        self.core.queue.push_back(Event::Arrive(barrier));
    }

    /// Run `work` once the barrier is released
    pub fn barrier_then<F>(&mut self, barrier: BarrierId, work: F)
    where
        F: FnOnce(&mut Context<'_>) + Send + 'static,
    {
        self.core.barrier_then(barrier, Box::new(work));
    }

    /// Stop the container
    ///
    /// Every live connection is dropped with its final `on_transport_close`,
    /// listeners close and pending timers are cancelled. `run` returns once
    /// the resulting callbacks have been delivered.
    pub fn stop(&mut self) {
        if !self.core.stopping {
            info!("Stop requested");
        }
        self.core.stopping = true;
    }
}
