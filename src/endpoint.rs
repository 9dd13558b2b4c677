//! Endpoint addresses
//!
//! An [`Endpoint`] is an immutable host/port/scheme triple. It accepts the
//! address forms used throughout the crate:
//!
//! - `host:port`
//! - `scheme://host:port`
//! - `//:port` (local host)
//! - `host` (default port)
//! - `[::1]:port`

use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Port used when an address names no port
pub const DEFAULT_PORT: u16 = 5672;

/// Host used to connect when an address names no host
const LOCAL_HOST: &str = "127.0.0.1";

/// Host used to listen when an address names no host
const ANY_HOST: &str = "0.0.0.0";

/// A candidate connection address
///
/// # Examples
///
/// ```
/// use msglink::Endpoint;
///
/// let ep: Endpoint = "amqp://broker.local:5673".parse()?;
/// assert_eq!(ep.host(), "broker.local");
/// assert_eq!(ep.port(), 5673);
/// assert_eq!(ep.scheme(), Some("amqp"));
///
/// let local: Endpoint = "//:40001".parse()?;
/// assert_eq!(local.connect_host(), "127.0.0.1");
/// # Ok::<(), msglink::LinkError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    scheme: Option<String>,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: None,
            host: host.into(),
            port,
        }
    }

    /// Parse an endpoint string
    ///
    /// # Errors
    ///
    /// - [`LinkError::InvalidEndpoint`] - empty address, malformed IPv6
    ///   literal, or a port that is not a 16-bit integer
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(LinkError::InvalidEndpoint("empty address".to_string()));
        }

        let (scheme, rest) = match trimmed.find("://") {
            Some(idx) => {
                let scheme = &trimmed[..idx];
                if scheme.is_empty() {
                    return Err(LinkError::InvalidEndpoint(format!("empty scheme: {}", s)));
                }
                (Some(scheme.to_string()), &trimmed[idx + 3..])
            }
            None => (None, trimmed.strip_prefix("//").unwrap_or(trimmed)),
        };

        // Anything after the authority is a path and not part of the address
        let authority = rest.split('/').next().unwrap_or_default();

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let close = v6.find(']').ok_or_else(|| {
                LinkError::InvalidEndpoint(format!("unterminated IPv6 literal: {}", s))
            })?;
            let host = &v6[..close];
            let port = match v6[close + 1..].strip_prefix(':') {
                Some(p) => parse_port(p, s)?,
                None => DEFAULT_PORT,
            };
            (host.to_string(), port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), parse_port(port, s)?),
                None => (authority.to_string(), DEFAULT_PORT),
            }
        };

        Ok(Self { scheme, host, port })
    }

    /// Scheme, if one was given
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Host as written (may be empty)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host to dial; an empty host means the local machine
    pub fn connect_host(&self) -> &str {
        if self.host.is_empty() {
            LOCAL_HOST
        } else {
            &self.host
        }
    }

    /// Host to bind; an empty host means all interfaces
    pub fn bind_host(&self) -> &str {
        if self.host.is_empty() {
            ANY_HOST
        } else {
            &self.host
        }
    }
}

fn parse_port(port: &str, original: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| LinkError::InvalidEndpoint(format!("invalid port '{}' in {}", port, original)))
}

impl FromStr for Endpoint {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = LinkError;

    fn try_from(s: String) -> Result<Self> {
        Endpoint::parse(&s)
    }
}

impl TryFrom<&str> for Endpoint {
    type Error = LinkError;

    fn try_from(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl From<Endpoint> for String {
    fn from(ep: Endpoint) -> Self {
        ep.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}://", scheme)?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let ep = Endpoint::parse("127.0.0.1:18944").unwrap();
        assert_eq!(ep.host(), "127.0.0.1");
        assert_eq!(ep.port(), 18944);
        assert_eq!(ep.scheme(), None);
        assert_eq!(ep.to_string(), "127.0.0.1:18944");
    }

    #[test]
    fn test_parse_scheme_and_path() {
        let ep = Endpoint::parse("amqp://broker:5673/queue").unwrap();
        assert_eq!(ep.scheme(), Some("amqp"));
        assert_eq!(ep.host(), "broker");
        assert_eq!(ep.port(), 5673);
        assert_eq!(ep.to_string(), "amqp://broker:5673");
    }

    #[test]
    fn test_parse_local_port_only() {
        let ep = Endpoint::parse("//:40001").unwrap();
        assert_eq!(ep.host(), "");
        assert_eq!(ep.connect_host(), "127.0.0.1");
        assert_eq!(ep.bind_host(), "0.0.0.0");
        assert_eq!(ep.port(), 40001);
    }

    #[test]
    fn test_parse_default_port() {
        let ep = Endpoint::parse("this-is-not-going-to work.com").unwrap();
        assert_eq!(ep.host(), "this-is-not-going-to work.com");
        assert_eq!(ep.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_parse_ipv6() {
        let ep = Endpoint::parse("[::1]:7000").unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.port(), 7000);
        assert_eq!(ep.to_string(), "[::1]:7000");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse("host:notaport").is_err());
        assert!(Endpoint::parse("host:70000").is_err());
        assert!(Endpoint::parse("[::1:7000").is_err());
        assert!(Endpoint::parse("://host:1").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let ep = Endpoint::parse("amqp://a:1").unwrap();
        let json = serde_json::to_string(&ep).unwrap();
        assert_eq!(json, "\"amqp://a:1\"");
        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ep);
    }
}
