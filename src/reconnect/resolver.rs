//! Endpoint rotation
//!
//! A round-robin cursor over the primary address followed by the failover
//! list. The cursor advances once per retry and is never rewound, so after a
//! successful reconnect the next failure continues from where it left off.

use crate::endpoint::Endpoint;

/// Cursor over `[primary, failover_1, ..., failover_n]`
///
/// # Examples
///
/// ```
/// use msglink::{Endpoint, EndpointResolver};
///
/// let primary: Endpoint = "a:1".parse()?;
/// let mut resolver = EndpointResolver::new(primary, vec!["b:2".parse()?]);
///
/// assert_eq!(resolver.current().host(), "a");
/// assert_eq!(resolver.next().host(), "b");
/// assert_eq!(resolver.next().host(), "a");
/// # Ok::<(), msglink::LinkError>(())
/// ```
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    endpoints: Vec<Endpoint>,
    cursor: usize,
}

impl EndpointResolver {
    /// Create a resolver positioned on the primary endpoint
    pub fn new(primary: Endpoint, failover: Vec<Endpoint>) -> Self {
        let mut endpoints = Vec::with_capacity(failover.len() + 1);
        endpoints.push(primary);
        endpoints.extend(failover);
        Self {
            endpoints,
            cursor: 0,
        }
    }

    /// Endpoint of the most recent (or initial) attempt
    pub fn current(&self) -> &Endpoint {
        &self.endpoints[self.cursor]
    }

    /// Advance the cursor and return the endpoint for the next attempt
    ///
    /// Wraps after the last failover entry. With no failover list every
    /// call returns the primary.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> &Endpoint {
        self.cursor = (self.cursor + 1) % self.endpoints.len();
        &self.endpoints[self.cursor]
    }

    /// Position of the cursor in the rotation (0 = primary)
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Number of endpoints in the rotation
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always false; the primary is always present
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
