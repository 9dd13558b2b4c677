//! Event dispatch
//!
//! State changes produce [`Notification`]s that are queued and delivered to
//! handlers later, in order, by the loop. Handlers therefore never run while
//! connection state is borrowed, and a handler acting on a connection never
//! re-enters another callback.

use super::context::Context;
use super::core::ListenerId;
use super::handler::MessagingHandler;
use super::link::{Delivery, LinkId, Tracker};
use super::session::ConnectionId;
use crate::error::ErrorCondition;
use crate::protocol::Message;

/// A callback waiting to be delivered
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Notification {
    ContainerStart,
    ConnectionStart(ConnectionId),
    ConnectionOpen(ConnectionId),
    ConnectionReconnecting(ConnectionId),
    ConnectionClose(ConnectionId),
    SenderOpen(LinkId),
    ReceiverOpen(LinkId),
    Sendable(LinkId),
    Message(Delivery, Message),
    TrackerAccept(Tracker),
    TrackerReject(Tracker),
    TrackerRelease(Tracker),
    SenderClose(LinkId),
    ReceiverClose(LinkId),
    TransportError(ConnectionId, ErrorCondition),
    TransportClose(ConnectionId),
    ListenerOpen(ListenerId),
    ListenerClose(ListenerId),
    ListenerError(ListenerId, ErrorCondition),
}

impl Notification {
    pub(crate) fn deliver(self, handler: &mut dyn MessagingHandler, ctx: &mut Context<'_>) {
        match self {
            Notification::ContainerStart => handler.on_container_start(ctx),
            Notification::ConnectionStart(c) => handler.on_connection_start(ctx, c),
            Notification::ConnectionOpen(c) => handler.on_connection_open(ctx, c),
            Notification::ConnectionReconnecting(c) => handler.on_connection_reconnecting(ctx, c),
            Notification::ConnectionClose(c) => handler.on_connection_close(ctx, c),
            Notification::SenderOpen(l) => handler.on_sender_open(ctx, l),
            Notification::ReceiverOpen(l) => handler.on_receiver_open(ctx, l),
            Notification::Sendable(l) => handler.on_sendable(ctx, l),
            Notification::Message(d, m) => handler.on_message(ctx, d, m),
            Notification::TrackerAccept(t) => handler.on_tracker_accept(ctx, t),
            Notification::TrackerReject(t) => handler.on_tracker_reject(ctx, t),
            Notification::TrackerRelease(t) => handler.on_tracker_release(ctx, t),
            Notification::SenderClose(l) => handler.on_sender_close(ctx, l),
            Notification::ReceiverClose(l) => handler.on_receiver_close(ctx, l),
            Notification::TransportError(c, cond) => handler.on_transport_error(ctx, c, &cond),
            Notification::TransportClose(c) => handler.on_transport_close(ctx, c),
            Notification::ListenerOpen(l) => handler.on_listener_open(ctx, l),
            Notification::ListenerClose(l) => handler.on_listener_close(ctx, l),
            Notification::ListenerError(l, cond) => handler.on_listener_error(ctx, l, &cond),
        }
    }
}

/// Notifications a connection may receive at most once per lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Once {
    Start,
    Close,
    TransportError,
    TransportClose,
}

impl Once {
    fn bit(self) -> u8 {
        match self {
            Once::Start => 1,
            Once::Close => 1 << 1,
            Once::TransportError => 1 << 2,
            Once::TransportClose => 1 << 3,
        }
    }
}

/// Records which once-only notifications a connection has been given
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct OnceGuard {
    fired: u8,
}

impl OnceGuard {
    /// True the first time `kind` is claimed, false ever after
    pub(crate) fn claim(&mut self, kind: Once) -> bool {
        let bit = kind.bit();
        if self.fired & bit != 0 {
            return false;
        }
        self.fired |= bit;
        true
    }

    pub(crate) fn has_fired(&self, kind: Once) -> bool {
        self.fired & kind.bit() != 0
    }
}
