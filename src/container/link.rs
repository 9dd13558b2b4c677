//! Links, deliveries and link replay
//!
//! A link is identified by its connection and the handle this side assigned
//! to it. Handles are slot indices in the connection's link table and stay
//! valid across reconnects; slots of closed links are left empty.
//!
//! Every link frame carries the handle chosen by the side that sent it, so
//! incoming frames are matched on the peer's handle learned from its
//! `Attach`.

use super::core::{Core, Event};
use super::dispatch::Notification;
use super::options::{LinkOptions, DEFAULT_CREDIT_WINDOW};
use super::session::ConnectionId;
use crate::error::{LinkError, Result};
use crate::protocol::{Frame, Message, Outcome, Role};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, trace, warn};

/// Identifies a sender or receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId {
    /// Owning connection
    pub connection: ConnectionId,
    /// Local handle
    pub handle: u32,
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/link-{}", self.connection, self.handle)
    }
}

/// A message received on a receiver, awaiting settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delivery {
    /// Receiving link
    pub link: LinkId,
    /// Delivery id assigned by the sender
    pub id: u32,
}

impl Delivery {
    /// Connection the delivery arrived on
    pub fn connection(&self) -> ConnectionId {
        self.link.connection
    }
}

/// A message sent on a sender, awaiting the peer's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tracker {
    /// Sending link
    pub link: LinkId,
    /// Delivery id
    pub id: u32,
}

impl Tracker {
    /// Connection the message was sent on
    pub fn connection(&self) -> ConnectionId {
        self.link.connection
    }
}

/// Construction parameters of a link, replayed after a reconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkSpec {
    pub(crate) role: Role,
    pub(crate) name: String,
    pub(crate) address: String,
    pub(crate) credit_window: u32,
    pub(crate) auto_accept: bool,
    /// Opened by this side rather than by the peer
    pub(crate) local: bool,
}

/// A link plus the protocol state of its current transport
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub(crate) spec: LinkSpec,
    /// Sender: credit granted by the peer. Receiver: credit outstanding.
    pub(crate) credit: u32,
    pub(crate) next_delivery: u32,
    pub(crate) unsettled: BTreeSet<u32>,
    pub(crate) remote_handle: Option<u32>,
    pub(crate) local_attached: bool,
    pub(crate) local_detached: bool,
}

impl Link {
    pub(crate) fn new(spec: LinkSpec) -> Self {
        Self {
            spec,
            credit: 0,
            next_delivery: 0,
            unsettled: BTreeSet::new(),
            remote_handle: None,
            local_attached: false,
            local_detached: false,
        }
    }

    pub(crate) fn is_sender(&self) -> bool {
        self.spec.role == Role::Sender
    }

    /// Attached at both ends and not being closed
    pub(crate) fn is_open(&self) -> bool {
        self.local_attached && self.remote_handle.is_some() && !self.local_detached
    }

    /// Forget everything that belonged to the previous transport
    pub(crate) fn reset_transient(&mut self) {
        self.credit = 0;
        self.unsettled.clear();
        self.remote_handle = None;
        self.local_attached = false;
    }

    /// Frames that attach this link under `handle`; marks it attached
    pub(crate) fn attach(&mut self, handle: u32) -> Vec<Frame> {
        let mut frames = vec![Frame::Attach {
            handle,
            name: self.spec.name.clone(),
            role: self.spec.role,
            address: self.spec.address.clone(),
        }];
        self.local_attached = true;
        if self.spec.role == Role::Receiver && self.spec.credit_window > 0 {
            let grant = self.spec.credit_window.saturating_sub(self.credit);
            if grant > 0 {
                self.credit += grant;
                frames.push(Frame::Flow {
                    handle,
                    credit: grant,
                });
            }
        }
        frames
    }

    fn open_notification(&self, id: LinkId) -> Notification {
        match self.spec.role {
            Role::Sender => Notification::SenderOpen(id),
            Role::Receiver => Notification::ReceiverOpen(id),
        }
    }

    fn close_notification(&self, id: LinkId) -> Notification {
        match self.spec.role {
            Role::Sender => Notification::SenderClose(id),
            Role::Receiver => Notification::ReceiverClose(id),
        }
    }
}

/// Restores links on a fresh transport
pub(crate) struct LinkRebinder;

impl LinkRebinder {
    /// Reset every link's per-transport state after its transport is lost
    pub(crate) fn suspend(links: &mut [Option<Link>]) {
        for link in links.iter_mut().flatten() {
            link.reset_transient();
        }
    }

    /// Prepare the link table for a new transport and return the frames
    /// that re-attach it
    ///
    /// Locally opened links are replayed in handle order with fresh credit
    /// and no unsettled deliveries. Links the peer opened, and links the
    /// application was closing, are dropped.
    pub(crate) fn rebind(links: &mut [Option<Link>]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for (handle, slot) in links.iter_mut().enumerate() {
            let keep = matches!(slot, Some(link) if link.spec.local && !link.local_detached);
            if !keep {
                *slot = None;
                continue;
            }
            if let Some(link) = slot {
                link.reset_transient();
                frames.extend(link.attach(handle as u32));
            }
        }
        frames
    }
}

fn find_remote(links: &[Option<Link>], remote: u32) -> Option<usize> {
    links
        .iter()
        .position(|slot| matches!(slot, Some(l) if l.remote_handle == Some(remote)))
}

impl Core {
    pub(crate) fn open_link(
        &mut self,
        conn: ConnectionId,
        role: Role,
        address: &str,
        options: LinkOptions,
    ) -> Result<LinkId> {
        let session = self.live_session_mut(conn, "open_link")?;
        let handle = session.links.len() as u32;
        let name = options.name.unwrap_or_else(|| {
            let prefix = match role {
                Role::Sender => "sender",
                Role::Receiver => "receiver",
            };
            format!("{}-{}-{}", prefix, conn, handle)
        });
        let mut link = Link::new(LinkSpec {
            role,
            name,
            address: address.to_string(),
            credit_window: options.credit_window,
            auto_accept: options.auto_accept,
            local: true,
        });
        if session.links_ready() {
            for frame in link.attach(handle) {
                session.send(&frame);
            }
        }
        debug!(
            connection = %conn,
            handle = handle,
            role = ?role,
            address = %address,
            "Link opened"
        );
        session.links.push(Some(link));
        Ok(LinkId {
            connection: conn,
            handle,
        })
    }

    /// Attach a link the peer opened, with the given options
    pub(crate) fn accept_link(&mut self, id: LinkId, options: LinkOptions) -> Result<()> {
        let session = self.live_session_mut(id.connection, "accept_link")?;
        let ready = session.links_ready();
        let link = session.link_mut(id.handle).ok_or(LinkError::UnknownLink(id))?;
        if link.local_attached {
            return Ok(());
        }
        if !ready {
            return Err(LinkError::InvalidState {
                operation: "accept_link",
                state: "connection not open".to_string(),
            });
        }
        link.spec.credit_window = options.credit_window;
        link.spec.auto_accept = options.auto_accept;
        let frames = link.attach(id.handle);
        let sendable = link.is_sender() && link.credit > 0;
        for frame in frames {
            session.send(&frame);
        }
        if sendable {
            self.notify_conn(id.connection, Notification::Sendable(id));
        }
        Ok(())
    }

    pub(crate) fn add_credit(&mut self, id: LinkId, credit: u32) -> Result<()> {
        let session = self.live_session_mut(id.connection, "add_credit")?;
        let ready = session.links_ready();
        let link = session.link_mut(id.handle).ok_or(LinkError::UnknownLink(id))?;
        if link.is_sender() {
            return Err(LinkError::InvalidState {
                operation: "add_credit",
                state: "link is a sender".to_string(),
            });
        }
        link.credit = link.credit.saturating_add(credit);
        if ready && link.local_attached && credit > 0 {
            session.send(&Frame::Flow {
                handle: id.handle,
                credit,
            });
        }
        Ok(())
    }

    pub(crate) fn send_message(&mut self, id: LinkId, message: &Message) -> Result<Tracker> {
        let session = self.live_session_mut(id.connection, "send")?;
        let state = session.state;
        let ready = session.links_ready();
        let link = session.link_mut(id.handle).ok_or(LinkError::UnknownLink(id))?;
        if !link.is_sender() || !ready || !link.is_open() {
            return Err(LinkError::InvalidState {
                operation: "send",
                state: format!("{:?}", state),
            });
        }
        if link.credit == 0 {
            return Err(LinkError::NoCredit(id));
        }
        let payload: Bytes = message.encode()?;
        let delivery_id = link.next_delivery;
        link.next_delivery = link.next_delivery.wrapping_add(1);
        link.credit -= 1;
        link.unsettled.insert(delivery_id);
        trace!(link = %id, delivery_id = delivery_id, size = payload.len(), "Sending message");
        session.send(&Frame::Transfer {
            handle: id.handle,
            delivery_id,
            payload,
        });
        Ok(Tracker {
            link: id,
            id: delivery_id,
        })
    }

    /// Settle a received delivery; false if it was already settled
    pub(crate) fn settle(&mut self, delivery: Delivery, outcome: Outcome) -> Result<bool> {
        let id = delivery.link;
        let session = self
            .sessions
            .get_mut(&id.connection)
            .ok_or(LinkError::UnknownConnection(id.connection))?;
        let ready = session.links_ready();
        let link = session.link_mut(id.handle).ok_or(LinkError::UnknownLink(id))?;
        if !link.unsettled.remove(&delivery.id) {
            return Ok(false);
        }
        if ready {
            session.send(&Frame::Disposition {
                handle: id.handle,
                delivery_id: delivery.id,
                outcome,
            });
        }
        Ok(true)
    }

    pub(crate) fn close_link(&mut self, id: LinkId) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&id.connection)
            .ok_or(LinkError::UnknownConnection(id.connection))?;
        let ready = session.links_ready();
        let slot = session
            .links
            .get_mut(id.handle as usize)
            .ok_or(LinkError::UnknownLink(id))?;
        let link = slot.as_mut().ok_or(LinkError::UnknownLink(id))?;
        if link.local_detached {
            return Ok(());
        }
        link.local_detached = true;
        debug!(link = %id, "Closing link");

        if ready && link.local_attached && link.remote_handle.is_some() {
            session.send(&Frame::Detach {
                handle: id.handle,
                error: None,
            });
        } else {
            let notification = link.close_notification(id);
            *slot = None;
            self.notify_conn(id.connection, notification);
        }
        Ok(())
    }

    pub(crate) fn link_credit(&self, id: LinkId) -> Option<u32> {
        self.sessions
            .get(&id.connection)?
            .links
            .get(id.handle as usize)?
            .as_ref()
            .map(|l| l.credit)
    }

    /// Handle a link-level frame from the peer
    pub(crate) fn on_link_frame(&mut self, conn: ConnectionId, frame: Frame) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            return;
        };
        if !session.accepts_link_frames() {
            trace!(connection = %conn, frame_type = ?frame.frame_type(), "Link frame ignored");
            return;
        }

        let mut notes = Vec::new();
        let mut events = Vec::new();

        match frame {
            Frame::Attach {
                handle: remote,
                name,
                role,
                address,
            } => {
                let local_role = role.opposite();
                let pending = session.links.iter().position(|slot| {
                    matches!(slot, Some(l) if l.spec.name == name
                        && l.spec.role == local_role
                        && l.remote_handle.is_none()
                        && !l.local_detached)
                });
                match pending {
                    Some(index) => {
                        let id = LinkId {
                            connection: conn,
                            handle: index as u32,
                        };
                        if let Some(link) = session.links[index].as_mut() {
                            link.remote_handle = Some(remote);
                            notes.push(link.open_notification(id));
                            if link.is_sender() && link.credit > 0 {
                                notes.push(Notification::Sendable(id));
                            }
                        }
                    }
                    None => {
                        let index = session.links.len();
                        let id = LinkId {
                            connection: conn,
                            handle: index as u32,
                        };
                        let mut link = Link::new(LinkSpec {
                            role: local_role,
                            name,
                            address,
                            credit_window: DEFAULT_CREDIT_WINDOW,
                            auto_accept: true,
                            local: false,
                        });
                        link.remote_handle = Some(remote);
                        notes.push(link.open_notification(id));
                        session.links.push(Some(link));
                        events.push(Event::AutoAttach(id));
                    }
                }
            }
            Frame::Detach {
                handle: remote,
                error,
            } => {
                if let Some(index) = find_remote(&session.links, remote) {
                    let id = LinkId {
                        connection: conn,
                        handle: index as u32,
                    };
                    if let Some(link) = session.links[index].take() {
                        if !link.local_detached {
                            session.send(&Frame::Detach {
                                handle: id.handle,
                                error: None,
                            });
                        }
                        if let Some(cond) = &error {
                            debug!(link = %id, condition = %cond, "Link detached with error");
                        }
                        notes.push(link.close_notification(id));
                    }
                }
            }
            Frame::Flow {
                handle: remote,
                credit,
            } => {
                if let Some(index) = find_remote(&session.links, remote) {
                    let id = LinkId {
                        connection: conn,
                        handle: index as u32,
                    };
                    if let Some(link) = session.links[index].as_mut() {
                        if link.is_sender() {
                            link.credit = link.credit.saturating_add(credit);
                            trace!(link = %id, credit = link.credit, "Credit granted");
                            if link.credit > 0 && link.is_open() {
                                notes.push(Notification::Sendable(id));
                            }
                        }
                    }
                }
            }
            Frame::Transfer {
                handle: remote,
                delivery_id,
                payload,
            } => {
                if let Some(index) = find_remote(&session.links, remote) {
                    let id = LinkId {
                        connection: conn,
                        handle: index as u32,
                    };
                    let mut flow = None;
                    if let Some(link) = session.links[index].as_mut() {
                        if link.is_sender() {
                            warn!(link = %id, "Transfer received on a sender");
                        } else {
                            match Message::decode(payload) {
                                Ok(message) => {
                                    link.credit = link.credit.saturating_sub(1);
                                    link.unsettled.insert(delivery_id);
                                    let delivery = Delivery {
                                        link: id,
                                        id: delivery_id,
                                    };
                                    notes.push(Notification::Message(delivery, message));
                                    if link.spec.auto_accept {
                                        events.push(Event::AutoAccept(delivery));
                                    }
                                    let window = link.spec.credit_window;
                                    if window > 0 && link.credit <= window / 2 {
                                        let grant = window - link.credit;
                                        link.credit = window;
                                        flow = Some(Frame::Flow {
                                            handle: id.handle,
                                            credit: grant,
                                        });
                                    }
                                }
                                Err(e) => {
                                    warn!(link = %id, error = %e, "Dropping undecodable message")
                                }
                            }
                        }
                    }
                    if let Some(flow) = flow {
                        session.send(&flow);
                    }
                }
            }
            Frame::Disposition {
                handle: remote,
                delivery_id,
                outcome,
            } => {
                if let Some(index) = find_remote(&session.links, remote) {
                    let id = LinkId {
                        connection: conn,
                        handle: index as u32,
                    };
                    if let Some(link) = session.links[index].as_mut() {
                        if link.unsettled.remove(&delivery_id) {
                            let tracker = Tracker {
                                link: id,
                                id: delivery_id,
                            };
                            notes.push(match outcome {
                                Outcome::Accepted => Notification::TrackerAccept(tracker),
                                Outcome::Rejected => Notification::TrackerReject(tracker),
                                Outcome::Released => Notification::TrackerRelease(tracker),
                            });
                        }
                    }
                }
            }
            other => {
                trace!(connection = %conn, frame_type = ?other.frame_type(), "Not a link frame");
            }
        }

        for note in notes {
            self.notify_conn(conn, note);
        }
        self.queue.extend(events);
    }

    /// Attach a peer-opened link the handler left alone
    pub(crate) fn auto_attach(&mut self, id: LinkId) {
        let pending = self
            .sessions
            .get(&id.connection)
            .and_then(|s| s.link(id.handle))
            .is_some_and(|l| !l.local_attached && !l.local_detached);
        if pending {
            if let Err(e) = self.accept_link(id, LinkOptions::default()) {
                debug!(link = %id, error = %e, "Auto attach skipped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(role: Role, local: bool) -> LinkSpec {
        LinkSpec {
            role,
            name: "link".to_string(),
            address: "messages".to_string(),
            credit_window: 4,
            auto_accept: true,
            local,
        }
    }

    #[test]
    fn test_receiver_attach_grants_window() {
        let mut link = Link::new(spec(Role::Receiver, true));
        let frames = link.attach(3);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Attach { handle: 3, role: Role::Receiver, .. }));
        assert_eq!(frames[1], Frame::Flow { handle: 3, credit: 4 });
        assert_eq!(link.credit, 4);
        assert!(link.local_attached);
    }

    #[test]
    fn test_sender_attach_has_no_flow() {
        let mut link = Link::new(spec(Role::Sender, true));
        assert_eq!(link.attach(0).len(), 1);
    }

    #[test]
    fn test_rebind_replays_local_links_with_fresh_state() {
        let mut sender = Link::new(spec(Role::Sender, true));
        sender.attach(0);
        sender.remote_handle = Some(9);
        sender.credit = 7;
        sender.unsettled.insert(1);
        sender.next_delivery = 2;

        let remote = Link::new(spec(Role::Receiver, false));
        let mut closing = Link::new(spec(Role::Sender, true));
        closing.local_detached = true;

        let mut links = vec![Some(sender), Some(remote), Some(closing)];
        LinkRebinder::suspend(&mut links);
        let frames = LinkRebinder::rebind(&mut links);

        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::Attach { handle: 0, .. }));
        let replayed = links[0].as_ref().unwrap();
        assert_eq!(replayed.credit, 0);
        assert!(replayed.unsettled.is_empty());
        assert_eq!(replayed.remote_handle, None);
        assert!(replayed.local_attached);
        assert!(!replayed.is_open());
        // Delivery ids keep increasing across transports
        assert_eq!(replayed.next_delivery, 2);
        assert!(links[1].is_none());
        assert!(links[2].is_none());
    }

    #[test]
    fn test_link_id_display() {
        let id = LinkId {
            connection: ConnectionId(4),
            handle: 2,
        };
        assert_eq!(id.to_string(), "conn-4/link-2");
    }
}
