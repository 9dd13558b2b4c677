//! Network I/O module
//!
//! Socket plumbing used by the container: one task per physical transport and
//! one accept task per listener. Both report through event sinks so that all
//! connection state stays on the container's loop.

pub mod listener;
pub mod transport;

pub use listener::{Listener, ListenerEvent};
pub use transport::{TransportConfig, TransportEvent, TransportInstance};
