//! Reconnection policy
//!
//! Configuration, delay computation and endpoint rotation. The state that
//! uses them (attempt count, cursor position, retry timer) lives with each
//! connection in [`crate::container`].

pub mod backoff;
pub mod config;
pub mod resolver;

pub use backoff::BackoffPolicy;
pub use config::ReconnectConfig;
pub use resolver::EndpointResolver;
