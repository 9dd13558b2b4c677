//! Connection, listener and link options

use super::handler::HandlerId;
use crate::reconnect::ReconnectConfig;
use std::time::Duration;

/// SASL mechanism that carries no credentials
pub const MECH_ANONYMOUS: &str = "ANONYMOUS";

/// SASL mechanism that carries a user name and password
pub const MECH_PLAIN: &str = "PLAIN";

/// Default credit window for receivers
pub const DEFAULT_CREDIT_WINDOW: u32 = 10;

/// Options for an outgoing connection
///
/// # Examples
///
/// ```
/// use msglink::{ConnectionOptions, ReconnectConfig};
/// use std::time::Duration;
///
/// let opts = ConnectionOptions::new()
///     .reconnect(ReconnectConfig::with_max_attempts(3))
///     .sasl_allowed_mechs("PLAIN")
///     .user("guest")
///     .password("guest")
///     .idle_timeout(Duration::from_secs(30));
/// assert_eq!(opts.sasl_allowed_mechs, Some(vec!["PLAIN".to_string()]));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionOptions {
    /// Handler for this connection's events (root handler if unset)
    pub handler: Option<HandlerId>,
    /// Reconnect policy; `None` disables reconnection
    pub reconnect: Option<ReconnectConfig>,
    /// SASL mechanisms the client may use (any if unset)
    pub sasl_allowed_mechs: Option<Vec<String>>,
    /// User name for PLAIN
    pub user: Option<String>,
    /// Password for PLAIN
    pub password: Option<String>,
    /// Container id announced in `Open`
    pub container_id: Option<String>,
    /// Local idle timeout; also announced to the peer for heartbeats
    pub idle_timeout: Option<Duration>,
    /// Limit on each TCP connect
    pub connect_timeout: Option<Duration>,
}

impl ConnectionOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Route this connection's events to `handler`
    pub fn handler(mut self, handler: HandlerId) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Enable reconnection with the given policy
    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = Some(config);
        self
    }

    /// Restrict SASL to a space separated list of mechanisms
    pub fn sasl_allowed_mechs(mut self, mechs: &str) -> Self {
        self.sasl_allowed_mechs = Some(mechs.split_whitespace().map(str::to_string).collect());
        self
    }

    /// Set the user name
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the container id
    pub fn container_id(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(id.into());
        self
    }

    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Whether the client may use `mech`
    pub(crate) fn allows_mech(&self, mech: &str) -> bool {
        match &self.sasl_allowed_mechs {
            Some(allowed) => allowed.iter().any(|m| m.eq_ignore_ascii_case(mech)),
            None => true,
        }
    }
}

/// Options for a listener
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerOptions {
    /// Handler for the listener and every connection it accepts
    pub handler: Option<HandlerId>,
    /// Mechanisms offered to connecting peers, in preference order
    pub sasl_mechanisms: Vec<String>,
    /// Accepted PLAIN credentials; empty accepts any
    pub credentials: Vec<(String, String)>,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            handler: None,
            sasl_mechanisms: vec![MECH_ANONYMOUS.to_string()],
            credentials: Vec::new(),
        }
    }
}

impl ListenerOptions {
    /// Create default options (offers ANONYMOUS)
    pub fn new() -> Self {
        Self::default()
    }

    /// Route listener and accepted-connection events to `handler`
    pub fn handler(mut self, handler: HandlerId) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Replace the offered mechanisms (space separated)
    pub fn sasl_mechanisms(mut self, mechs: &str) -> Self {
        self.sasl_mechanisms = mechs.split_whitespace().map(str::to_string).collect();
        self
    }

    /// Accept a PLAIN user/password pair
    pub fn credential(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials.push((user.into(), password.into()));
        self
    }

    pub(crate) fn offers(&self, mech: &str) -> bool {
        self.sasl_mechanisms.iter().any(|m| m.eq_ignore_ascii_case(mech))
    }

    pub(crate) fn check_plain(&self, user: &str, password: &str) -> bool {
        self.credentials.is_empty()
            || self
                .credentials
                .iter()
                .any(|(u, p)| u == user && p == password)
    }
}

/// Options for a sender or receiver
///
/// These are the replayable parameters of a link: they are kept with the
/// connection and reused when the link is re-attached after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Link name (generated if unset)
    pub name: Option<String>,
    /// Credit a receiver keeps topped up; 0 means manual `add_credit`
    pub credit_window: u32,
    /// Accept each message after `on_message` unless already settled
    pub auto_accept: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            name: None,
            credit_window: DEFAULT_CREDIT_WINDOW,
            auto_accept: true,
        }
    }
}

impl LinkOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the link name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the credit window
    pub fn credit_window(mut self, window: u32) -> Self {
        self.credit_window = window;
        self
    }

    /// Enable or disable auto-accept
    pub fn auto_accept(mut self, auto: bool) -> Self {
        self.auto_accept = auto;
        self
    }
}

/// Encode a PLAIN initial response
pub(crate) fn plain_response(user: &str, password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(user.len() + password.len() + 2);
    out.push(0);
    out.extend_from_slice(user.as_bytes());
    out.push(0);
    out.extend_from_slice(password.as_bytes());
    out
}

/// Decode a PLAIN initial response into (user, password)
pub(crate) fn parse_plain(response: &[u8]) -> Option<(String, String)> {
    let mut parts = response.split(|b| *b == 0);
    let _authzid = parts.next()?;
    let user = std::str::from_utf8(parts.next()?).ok()?;
    let password = std::str::from_utf8(parts.next()?).ok()?;
    Some((user.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_mechs() {
        let any = ConnectionOptions::new();
        assert!(any.allows_mech("ANONYMOUS"));

        let plain = ConnectionOptions::new().sasl_allowed_mechs("PLAIN");
        assert!(plain.allows_mech("plain"));
        assert!(!plain.allows_mech("ANONYMOUS"));
    }

    #[test]
    fn test_listener_defaults() {
        let opts = ListenerOptions::new();
        assert!(opts.offers("ANONYMOUS"));
        assert!(!opts.offers("PLAIN"));
        assert!(opts.check_plain("anyone", "anything"));

        let strict = ListenerOptions::new()
            .sasl_mechanisms("PLAIN")
            .credential("admin", "secret");
        assert!(strict.check_plain("admin", "secret"));
        assert!(!strict.check_plain("admin", "wrong"));
    }

    #[test]
    fn test_plain_response() {
        let encoded = plain_response("user", "pass");
        assert_eq!(encoded, b"\0user\0pass");
        assert_eq!(
            parse_plain(&encoded),
            Some(("user".to_string(), "pass".to_string()))
        );
        assert_eq!(parse_plain(b"\0only-user"), None);
    }

    #[test]
    fn test_link_defaults() {
        let opts = LinkOptions::default();
        assert_eq!(opts.credit_window, DEFAULT_CREDIT_WINDOW);
        assert!(opts.auto_accept);
        assert!(opts.name.is_none());
    }
}
