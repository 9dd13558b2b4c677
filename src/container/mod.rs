//! Event-driven container
//!
//! A [`Container`] runs a single loop that owns every connection, listener
//! and timer. Socket tasks and timers report back over a channel; the loop
//! applies each event to the connection state machine and then delivers the
//! resulting callbacks to [`MessagingHandler`]s one at a time.
//!
//! # Examples
//!
//! ```no_run
//! use msglink::{
//!     ConnectionId, ConnectionOptions, Container, Context, MessagingHandler, ReconnectConfig,
//! };
//!
//! struct Client;
//!
//! impl MessagingHandler for Client {
//!     fn on_container_start(&mut self, ctx: &mut Context<'_>) {
//!         let reconnect = ReconnectConfig::default()
//!             .failover_urls(["backup-1:5672", "backup-2:5672"])
//!             .unwrap();
//!         ctx.connect("primary:5672", ConnectionOptions::new().reconnect(reconnect))
//!             .unwrap();
//!     }
//!
//!     fn on_connection_open(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
//!         println!("open, reconnected = {}", ctx.reconnected(conn));
//!         ctx.close(conn).unwrap();
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> msglink::Result<()> {
//!     Container::new(Client).run().await
//! }
//! ```

mod context;
mod core;
mod dispatch;
mod handler;
mod link;
mod options;
mod scheduler;
mod session;

pub use context::Context;
pub use self::core::ListenerId;
pub use handler::{HandlerId, MessagingHandler};
pub use link::{Delivery, LinkId, Tracker};
pub use options::{
    ConnectionOptions, LinkOptions, ListenerOptions, DEFAULT_CREDIT_WINDOW, MECH_ANONYMOUS,
    MECH_PLAIN,
};
pub use scheduler::{BarrierId, TimerId, Work};
pub use session::{ConnectionId, ConnectionState};

use crate::error::Result;
use crate::io::{ListenerEvent, TransportEvent};
use self::core::{Core, Event};
use dispatch::Notification;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Container identifier used when none is given
pub const DEFAULT_CONTAINER_ID: &str = "msglink";

/// Events reported to the loop by socket tasks and timers
pub(crate) enum LoopEvent {
    Transport {
        conn: ConnectionId,
        generation: u64,
        event: TransportEvent,
    },
    Listener {
        id: ListenerId,
        event: ListenerEvent,
    },
    TimerFired(TimerId),
    Stop,
}

/// Runs handlers against connections, listeners and timers
pub struct Container<H: MessagingHandler> {
    handler: H,
    core: Core,
    rx: UnboundedReceiver<LoopEvent>,
}

impl<H: MessagingHandler> Container<H> {
    pub fn new(handler: H) -> Self {
        Self::with_id(handler, DEFAULT_CONTAINER_ID)
    }

    pub fn with_id(handler: H, container_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handler,
            core: Core::new(container_id.into(), tx),
            rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.core.container_id
    }

    /// Handle for stopping the container from outside the loop
    pub fn handle(&self) -> ContainerHandle {
        ContainerHandle {
            tx: self.core.tx.clone(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Run until stopped, or until nothing is left to do
    ///
    /// The container is idle when every connection has reached a terminal
    /// state and no listener or timer remains.
    pub async fn run(&mut self) -> Result<()> {
        info!(container_id = %self.core.container_id, "Container running");
        self.core.notify(HandlerId::ROOT, Notification::ContainerStart);

        loop {
            self.drain();

            if self.core.stopping {
                self.core.shutdown();
                self.drain();
                self.core.scheduler.clear();
                break;
            }
            if self.core.is_idle() {
                debug!("Nothing left to do");
                break;
            }

            match self.rx.recv().await {
                Some(event) => self.on_loop_event(event),
                None => break,
            }
        }

        info!(container_id = %self.core.container_id, "Container stopped");
        Ok(())
    }

    fn on_loop_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Transport {
                conn,
                generation,
                event,
            } => self.core.on_transport_event(conn, generation, event),
            LoopEvent::Listener { id, event } => self.core.on_listener_event(id, event),
            LoopEvent::TimerFired(id) => self.core.on_timer(id),
            LoopEvent::Stop => {
                info!("Stop requested");
                self.core.stopping = true;
            }
        }
    }

    /// Process queued work until the queue is empty
    fn drain(&mut self) {
        while let Some(event) = self.core.queue.pop_front() {
            match event {
                Event::Notify(handler, notification) => {
                    let finished = match &notification {
                        Notification::TransportClose(conn) => Some(*conn),
                        _ => None,
                    };
                    self.deliver(handler, notification);
                    if let Some(conn) = finished {
                        self.core.queue.push_back(Event::Reap(conn));
                    }
                }
                Event::Work(work) => work(&mut Context::new(&mut self.core)),
                Event::ScheduleRetry(conn) => self.core.schedule_retry(conn),
                Event::AutoOpen(conn) => self.core.auto_open(conn),
                Event::AutoAttach(link) => self.core.auto_attach(link),
                Event::AutoAccept(delivery) => self.core.auto_accept(delivery),
                Event::Arrive(barrier) => self.core.arrive(barrier),
                Event::Reap(conn) => self.core.reap(conn),
            }
        }
    }

    fn deliver(&mut self, handler: HandlerId, notification: Notification) {
        if handler == HandlerId::ROOT {
            notification.deliver(&mut self.handler, &mut Context::new(&mut self.core));
            return;
        }
        match self.core.handlers.take(handler) {
            Some(mut registered) => {
                notification.deliver(registered.as_mut(), &mut Context::new(&mut self.core));
                self.core.handlers.put_back(handler, registered);
            }
            None => warn!(handler = ?handler, "Dropping notification for unknown handler"),
        }
    }
}

/// Stops a running container from another task
#[derive(Clone)]
pub struct ContainerHandle {
    tx: UnboundedSender<LoopEvent>,
}

impl ContainerHandle {
    /// Request a stop; false if the container no longer exists
    pub fn stop(&self) -> bool {
        self.tx.send(LoopEvent::Stop).is_ok()
    }
}
