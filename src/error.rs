//! Error types for msglink operations
//!
//! Two layers of failure live here. [`LinkError`] is the Rust-level error
//! returned from fallible API calls (bad endpoints, invalid configuration,
//! unknown handles, malformed frames). [`ErrorCondition`] is the protocol-level
//! condition that travels in `Close`/`Detach` frames and is handed to
//! [`MessagingHandler::on_transport_error`](crate::container::MessagingHandler::on_transport_error).
//! [`FailureKind`] classifies a condition into the reconnect taxonomy.

use crate::container::{ConnectionId, LinkId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// msglink error types
///
/// All API operations return `Result<T, LinkError>`. Transport failures observed
/// by a running connection are not reported through this type; they are
/// classified into a [`FailureKind`] and either absorbed by the reconnect cycle
/// or delivered to the application as an [`ErrorCondition`].
#[derive(Error, Debug)]
pub enum LinkError {
    /// I/O error while binding, accepting or connecting
    ///
    /// This error occurs when:
    /// - A listener address is already in use
    /// - Insufficient permissions to bind to a port
    /// - The local socket could not be configured
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Endpoint string could not be parsed
    ///
    /// # Example
    /// ```
    /// # use msglink::error::LinkError;
    /// let err = LinkError::InvalidEndpoint("missing port: broker".to_string());
    /// ```
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Reconnect or connection options are inconsistent
    ///
    /// This error occurs when:
    /// - `initial_delay` is zero
    /// - `delay_multiplier` is below 1.0 or not finite
    /// - `initial_delay` exceeds `max_delay`
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A frame could not be decoded
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame exceeds the maximum frame size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared frame size in bytes
        size: usize,
        /// Maximum allowed size in bytes
        max: usize,
    },

    /// UTF-8 conversion error in a string field
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The connection has been reaped or never existed
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The link has been closed or never existed
    #[error("Unknown link: {0}")]
    UnknownLink(LinkId),

    /// Operation is not valid in the current state
    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// The state the target was in
        state: String,
    },

    /// Sender has no credit to transfer a message
    #[error("No credit available on link {0}")]
    NoCredit(LinkId),
}

/// Result type alias for msglink operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Well-known condition names
pub mod condition {
    /// Peer forcibly closed the connection
    pub const CONNECTION_FORCED: &str = "connection:forced";
    /// Authentication or authorization was rejected
    pub const UNAUTHORIZED_ACCESS: &str = "unauthorized-access";
    /// SASL exchange failed
    pub const SASL_AUTH: &str = "sasl:auth";
    /// Socket-level failure (refused, reset, unresolvable, timed out)
    pub const TRANSPORT_IO: &str = "transport:io";
    /// Peer stayed silent past the idle timeout
    pub const RESOURCE_LIMIT_EXCEEDED: &str = "resource-limit-exceeded";
    /// Peer violated the framing protocol
    pub const FRAMING_ERROR: &str = "connection:framing-error";
    /// Reconnect policy ran out of attempts
    pub const RECONNECT_EXHAUSTED: &str = "reconnect:exhausted";
    /// Generic internal error
    pub const INTERNAL_ERROR: &str = "internal-error";
}

/// Protocol-level error condition
///
/// Carried in `Close` and `Detach` frames and delivered to
/// [`on_transport_error`](crate::container::MessagingHandler::on_transport_error).
///
/// # Examples
///
/// ```
/// use msglink::error::{condition, ErrorCondition};
///
/// let cond = ErrorCondition::new(condition::CONNECTION_FORCED, "Failover testing");
/// assert_eq!(cond.to_string(), "connection:forced: Failover testing");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCondition {
    /// Symbolic condition name
    pub name: String,
    /// Human readable description
    pub description: String,
}

impl ErrorCondition {
    /// Create a condition from a name and description
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Condition for a socket-level failure
    pub fn io(error: &std::io::Error) -> Self {
        Self::new(condition::TRANSPORT_IO, error.to_string())
    }

    /// Whether this condition belongs to the authentication family
    pub fn is_auth(&self) -> bool {
        self.name == condition::UNAUTHORIZED_ACCESS || self.name.starts_with("sasl:")
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.description)
        }
    }
}

/// Classification of a connection failure
///
/// Retryable failures are absorbed by the reconnect cycle. The other kinds
/// terminate the session and cross the application boundary exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Refused, timed out, reset, or closed by the peer with a generic condition
    Retryable,
    /// Credential or mechanism rejection; never retried
    FatalAuth,
    /// `max_attempts` reached
    PolicyExhausted,
    /// Application closed the session while it was reconnecting
    UserAbort,
}

impl FailureKind {
    /// Classify a condition observed on the wire or from the socket
    ///
    /// # Examples
    ///
    /// ```
    /// use msglink::error::{condition, ErrorCondition, FailureKind};
    ///
    /// let auth = ErrorCondition::new(condition::UNAUTHORIZED_ACCESS, "bad password");
    /// assert_eq!(FailureKind::classify(&auth), FailureKind::FatalAuth);
    ///
    /// let forced = ErrorCondition::new(condition::CONNECTION_FORCED, "");
    /// assert_eq!(FailureKind::classify(&forced), FailureKind::Retryable);
    /// ```
    pub fn classify(condition: &ErrorCondition) -> Self {
        if condition.is_auth() {
            FailureKind::FatalAuth
        } else if condition.name == condition::RECONNECT_EXHAUSTED {
            FailureKind::PolicyExhausted
        } else {
            FailureKind::Retryable
        }
    }

    /// Whether a connection ending for this reason reports `on_transport_error`
    ///
    /// A retryable failure only ends a connection when reconnect is off, and
    /// then it is reported like any other. An aborted reconnect is silent.
    pub fn surfaces_error(self) -> bool {
        !matches!(self, FailureKind::UserAbort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_conditions() {
        let sasl = ErrorCondition::new(condition::SASL_AUTH, "no mechanism");
        assert_eq!(FailureKind::classify(&sasl), FailureKind::FatalAuth);
        let unauthorized = ErrorCondition::new(condition::UNAUTHORIZED_ACCESS, "");
        assert_eq!(FailureKind::classify(&unauthorized), FailureKind::FatalAuth);
    }

    #[test]
    fn test_classify_transport_conditions() {
        let refused = ErrorCondition::io(&std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(FailureKind::classify(&refused), FailureKind::Retryable);
        let idle = ErrorCondition::new(condition::RESOURCE_LIMIT_EXCEEDED, "idle");
        assert_eq!(FailureKind::classify(&idle), FailureKind::Retryable);
    }

    #[test]
    fn test_surfaces_error() {
        assert!(FailureKind::Retryable.surfaces_error());
        assert!(FailureKind::FatalAuth.surfaces_error());
        assert!(FailureKind::PolicyExhausted.surfaces_error());
        assert!(!FailureKind::UserAbort.surfaces_error());
    }

    #[test]
    fn test_condition_display_without_description() {
        let cond = ErrorCondition::new(condition::INTERNAL_ERROR, "");
        assert_eq!(cond.to_string(), "internal-error");
    }
}
