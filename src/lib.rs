//! Reconnecting messaging client and server in Rust
//!
//! This library provides an event-driven messaging container whose client
//! connections survive transport failures. A logical connection keeps its
//! identity, its handler and its links while the physical transport beneath
//! it is torn down and re-established, rotating through a primary endpoint
//! and a list of failover endpoints with exponential backoff.
//!
//! # Features
//!
//! - **Transparent failover** - Retries rotate through primary and failover endpoints
//! - **Bounded exponential backoff** - Configurable initial delay, cap, multiplier and
//!   attempt limit
//! - **Link replay** - Open senders and receivers are re-attached on every new transport
//! - **Precise callbacks** - Reconnecting failures are absorbed; only terminal failures surface
//! - **Async I/O** - Built on tokio, one loop per container
//!
//! # Quick Start
//!
//! ```no_run
//! use msglink::{
//!     ConnectionId, ConnectionOptions, Container, Context, LinkId, LinkOptions,
//!     MessagingHandler, ReconnectConfig, Tracker,
//! };
//! use std::time::Duration;
//!
//! struct Sender;
//!
//! impl MessagingHandler for Sender {
//!     fn on_container_start(&mut self, ctx: &mut Context<'_>) {
//!         let initial = Duration::from_millis(100);
//!         let reconnect = ReconnectConfig::with_delays(initial, Duration::from_secs(5))
//!             .max_attempts(Some(20))
//!             .failover_urls(["backup:5672"])
//!             .unwrap();
//!         ctx.connect("primary:5672", ConnectionOptions::new().reconnect(reconnect))
//!             .unwrap();
//!     }
//!
//!     fn on_connection_start(&mut self, ctx: &mut Context<'_>, conn: ConnectionId) {
//!         ctx.open_sender(conn, "orders", LinkOptions::new()).unwrap();
//!     }
//!
//!     fn on_sendable(&mut self, ctx: &mut Context<'_>, link: LinkId) {
//!         ctx.send(link, "hello").unwrap();
//!     }
//!
//!     fn on_tracker_accept(&mut self, ctx: &mut Context<'_>, tracker: Tracker) {
//!         ctx.close(tracker.connection()).unwrap();
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> msglink::Result<()> {
//!     Container::new(Sender).run().await
//! }
//! ```
//!
//! # Architecture
//!
//! ## Module Structure
//!
//! - **`container`** - The event loop and connection state machine
//!   - `Container` - Runs handlers; returns when stopped or idle
//!   - `Context` - Operations available inside callbacks
//!   - `MessagingHandler` - Callback trait with no-op defaults
//!
//! - **`reconnect`** - Retry policy
//!   - `ReconnectConfig` - Serializable reconnect settings
//!   - `BackoffPolicy` - Delay and exhaustion rules
//!   - `EndpointResolver` - Rotating endpoint cursor
//!
//! - **`io`** - Socket tasks
//!   - `TransportInstance` - One physical connection
//!   - `Listener` - Accept loop
//!
//! - **`protocol`** - Wire format
//!   - `Frame` - Length-prefixed protocol frames
//!   - `Message` - Application payload
//!
//! - **`error`** - Error handling
//!   - `LinkError` - Unified error type for all operations
//!   - `ErrorCondition` - Named protocol-level error condition
//!   - `Result<T>` - Type alias for `Result<T, LinkError>`
//!
//! # Connection Lifecycle
//!
//! A client connection starts connecting immediately. When its transport
//! fails and reconnect is enabled, the connection enters `Reconnecting`,
//! `on_connection_reconnecting` is delivered, and a retry is scheduled
//! after the backoff delay on the next endpoint in rotation. A successful
//! open resets the attempt counter; `Context::reconnected` tells the
//! handler whether the open was a reconnect.
//!
//! `on_transport_error` is only delivered for terminal failures:
//! authentication rejection, exhaustion of `max_attempts`, or any failure
//! when reconnect is disabled. `on_transport_close` is delivered exactly
//! once per connection.
//!
//! # Logging
//!
//! The library logs through [`tracing`]; install a subscriber to see it:
//!
//! ```no_run
//! tracing_subscriber::fmt()
//!     .with_env_filter("msglink=debug")
//!     .init();
//! ```

pub mod container;
pub mod endpoint;
pub mod error;
pub mod io;
pub mod protocol;
pub mod reconnect;

// Re-export commonly used types
pub use container::{
    BarrierId, ConnectionId, ConnectionOptions, ConnectionState, Container, ContainerHandle,
    Context, Delivery, HandlerId, LinkId, LinkOptions, ListenerId, ListenerOptions,
    MessagingHandler, TimerId, Tracker,
};
pub use endpoint::Endpoint;
pub use error::{ErrorCondition, FailureKind, LinkError, Result};
pub use protocol::Message;
pub use reconnect::{BackoffPolicy, EndpointResolver, ReconnectConfig};
