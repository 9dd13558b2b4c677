//! Application callback surface
//!
//! Implement [`MessagingHandler`] for the events you care about; every method
//! has a no-op default.

use super::context::Context;
use super::core::ListenerId;
use super::link::{Delivery, LinkId, Tracker};
use super::session::ConnectionId;
use crate::error::ErrorCondition;
use crate::protocol::Message;

/// Identifies a registered handler
///
/// [`HandlerId::ROOT`] is the handler the container was created with.
/// Further handlers are registered with
/// [`Context::add_handler`](super::Context::add_handler) and attached to
/// connections or listeners through their options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) usize);

impl HandlerId {
    /// The container's own handler
    pub const ROOT: HandlerId = HandlerId(0);
}

/// Trait for receiving container events
///
/// All callbacks run on the container's loop, one at a time, and must not
/// block. Work that has to happen later is scheduled through the
/// [`Context`], never by sleeping.
///
/// Per connection, a transition's connection-level callback always precedes
/// its link-level callbacks, `on_transport_error` (if any) precedes
/// `on_transport_close`, and `on_transport_close` is delivered exactly once.
///
/// # Examples
///
/// ```
/// use msglink::{ConnectionId, Context, MessagingHandler};
///
/// #[derive(Default)]
/// struct Counter {
///     opens: usize,
/// }
///
/// impl MessagingHandler for Counter {
///     fn on_connection_open(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
///         self.opens += 1;
///         if ctx.reconnected(conn) {
///             println!("{} is back", conn);
///         }
///     }
/// }
/// ```
#[allow(unused_variables)]
pub trait MessagingHandler: Send {
    /// The container has started running
    fn on_container_start(&mut self, ctx: &mut Context<'_>) {}

    /// A client connection was created; fires once per connection lifetime
    fn on_connection_start(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {}

    /// The peer opened the connection
    ///
    /// [`Context::reconnected`](super::Context::reconnected) tells whether
    /// this is the first open of the connection's lifetime.
    fn on_connection_open(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {}

    /// A transport failed and a retry is about to be scheduled
    ///
    /// Closing the connection from here abandons reconnection.
    fn on_connection_reconnecting(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {}

    /// The connection closed cleanly
    fn on_connection_close(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {}

    /// A sending link is attached at both ends
    fn on_sender_open(&mut self, ctx: &mut Context<'_>, link: LinkId) {}

    /// A receiving link is attached at both ends
    fn on_receiver_open(&mut self, ctx: &mut Context<'_>, link: LinkId) {}

    /// A sender has credit to transfer messages
    fn on_sendable(&mut self, ctx: &mut Context<'_>, link: LinkId) {}

    /// A message arrived on a receiver
    fn on_message(&mut self, ctx: &mut Context<'_>, delivery: Delivery, message: Message) {}

    /// The peer accepted a sent message
    fn on_tracker_accept(&mut self, ctx: &mut Context<'_>, tracker: Tracker) {}

    /// The peer rejected a sent message
    fn on_tracker_reject(&mut self, ctx: &mut Context<'_>, tracker: Tracker) {}

    /// The peer released a sent message
    fn on_tracker_release(&mut self, ctx: &mut Context<'_>, tracker: Tracker) {}

    /// A sending link was detached
    fn on_sender_close(&mut self, ctx: &mut Context<'_>, link: LinkId) {}

    /// A receiving link was detached
    fn on_receiver_close(&mut self, ctx: &mut Context<'_>, link: LinkId) {}

    /// The connection failed terminally
    ///
    /// Only fatal failures arrive here: authentication rejection, exhausted
    /// reconnect attempts, or any failure when reconnect is disabled.
    fn on_transport_error(
        &mut self,
        ctx: &mut Context<'_>,
        conn: ConnectionId,
        condition: &ErrorCondition,
    ) {
    }

    /// The connection is finished; no further events follow for it
    fn on_transport_close(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {}

    /// A listener is bound and accepting
    fn on_listener_open(&mut self, ctx: &mut Context<'_>, listener: ListenerId) {}

    /// A listener stopped accepting
    fn on_listener_close(&mut self, ctx: &mut Context<'_>, listener: ListenerId) {}

    /// A listener failed; `on_listener_close` follows
    fn on_listener_error(
        &mut self,
        ctx: &mut Context<'_>,
        listener: ListenerId,
        condition: &ErrorCondition,
    ) {
    }
}

/// Handlers registered after the container was created
///
/// A handler is taken out of its slot while it runs and put back afterwards,
/// so the context it receives can still register new handlers.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    slots: Vec<Option<Box<dyn MessagingHandler>>>,
}

impl HandlerRegistry {
    pub(crate) fn add(&mut self, handler: Box<dyn MessagingHandler>) -> HandlerId {
        self.slots.push(Some(handler));
        HandlerId(self.slots.len())
    }

    pub(crate) fn contains(&self, id: HandlerId) -> bool {
        id == HandlerId::ROOT || (id.0 >= 1 && id.0 <= self.slots.len())
    }

    pub(crate) fn take(&mut self, id: HandlerId) -> Option<Box<dyn MessagingHandler>> {
        let index = id.0.checked_sub(1)?;
        self.slots.get_mut(index)?.take()
    }

    pub(crate) fn put_back(&mut self, id: HandlerId, handler: Box<dyn MessagingHandler>) {
        if let Some(slot) = id.0.checked_sub(1).and_then(|i| self.slots.get_mut(i)) {
            *slot = Some(handler);
        }
    }
}
