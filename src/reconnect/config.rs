//! Automatic reconnection configuration
//!
//! Provides the failover list and exponential backoff parameters for
//! resilient connections.

use crate::endpoint::Endpoint;
use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection strategy configuration
///
/// Supplied once through
/// [`ConnectionOptions::reconnect`](crate::container::ConnectionOptions::reconnect)
/// and read-only for the lifetime of the connection.
///
/// # Examples
///
/// ```
/// use msglink::ReconnectConfig;
/// use std::time::Duration;
///
/// // Unlimited retries with defaults
/// let config = ReconnectConfig::default();
/// assert_eq!(config.max_attempts, None);
///
/// // Two failover brokers, at most 5 retries
/// let config = ReconnectConfig::with_max_attempts(5)
///     .failover_urls(["backup-1:5672", "backup-2:5672"])?;
/// assert_eq!(config.failover_urls.len(), 2);
/// # Ok::<(), msglink::LinkError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Alternate endpoints tried after the primary, in order
    pub failover_urls: Vec<Endpoint>,
    /// Delay before the first retry after a failure
    pub initial_delay: Duration,
    /// Upper bound on any retry delay
    pub max_delay: Duration,
    /// Growth factor applied per failed attempt
    pub delay_multiplier: f64,
    /// Maximum number of retries (None = infinite)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            failover_urls: Vec::new(),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(10),
            delay_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Create config with infinite retries
    ///
    /// # Examples
    ///
    /// ```
    /// use msglink::ReconnectConfig;
    ///
    /// let config = ReconnectConfig::infinite();
    /// assert_eq!(config.max_attempts, None);
    /// ```
    pub fn infinite() -> Self {
        Self::default()
    }

    /// Create config with specific max attempts
    ///
    /// # Examples
    ///
    /// ```
    /// use msglink::ReconnectConfig;
    ///
    /// let config = ReconnectConfig::with_max_attempts(5);
    /// assert_eq!(config.max_attempts, Some(5));
    /// ```
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
            ..Default::default()
        }
    }

    /// Create config with custom delays
    ///
    /// # Examples
    ///
    /// ```
    /// use msglink::ReconnectConfig;
    /// use std::time::Duration;
    ///
    /// let config = ReconnectConfig::with_delays(
    ///     Duration::from_millis(500),
    ///     Duration::from_secs(60)
    /// );
    /// assert_eq!(config.initial_delay, Duration::from_millis(500));
    /// assert_eq!(config.max_delay, Duration::from_secs(60));
    /// ```
    pub fn with_delays(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            ..Default::default()
        }
    }

    /// Set the failover list from address strings
    ///
    /// # Errors
    ///
    /// - [`LinkError::InvalidEndpoint`] - an address could not be parsed
    pub fn failover_urls<I, S>(mut self, urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.failover_urls = urls
            .into_iter()
            .map(|u| Endpoint::parse(u.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Set the backoff multiplier
    pub fn delay_multiplier(mut self, multiplier: f64) -> Self {
        self.delay_multiplier = multiplier;
        self
    }

    /// Set the maximum number of retries
    pub fn max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Check the parameters describe a non-decreasing, bounded backoff
    ///
    /// # Errors
    ///
    /// - [`LinkError::InvalidConfig`] - zero initial delay, multiplier below
    ///   1.0 or not finite, or initial delay above the cap
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(LinkError::InvalidConfig(
                "initial_delay must be non-zero".to_string(),
            ));
        }
        if !self.delay_multiplier.is_finite() || self.delay_multiplier < 1.0 {
            return Err(LinkError::InvalidConfig(format!(
                "delay_multiplier must be a finite number >= 1.0, got {}",
                self.delay_multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(LinkError::InvalidConfig(format!(
                "initial_delay {:?} exceeds max_delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert!(config.failover_urls.is_empty());
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.initial_delay, Duration::from_millis(10));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.delay_multiplier, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reconnect_config_failover_urls() {
        let config = ReconnectConfig::default()
            .failover_urls(["//:5001", "amqp://b:5002"])
            .unwrap();
        assert_eq!(config.failover_urls[0].port(), 5001);
        assert_eq!(config.failover_urls[1].host(), "b");

        assert!(ReconnectConfig::default().failover_urls(["bad:port"]).is_err());
    }

    #[test]
    fn test_reconnect_config_validation() {
        let shrinking = ReconnectConfig::default().delay_multiplier(0.5);
        assert!(matches!(shrinking.validate(), Err(LinkError::InvalidConfig(_))));

        let nan = ReconnectConfig::default().delay_multiplier(f64::NAN);
        assert!(nan.validate().is_err());

        let inverted = ReconnectConfig::with_delays(Duration::from_secs(5), Duration::from_secs(1));
        assert!(inverted.validate().is_err());

        let hot_loop = ReconnectConfig::with_delays(Duration::ZERO, Duration::from_secs(1));
        assert!(hot_loop.validate().is_err());
    }

    #[test]
    fn test_reconnect_config_from_json() {
        let json = r#"{
            "failover_urls": ["backup:5673"],
            "initial_delay": { "secs": 0, "nanos": 50000000 },
            "max_attempts": 3
        }"#;
        let config: ReconnectConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.failover_urls, vec![Endpoint::new("backup", 5673)]);
        assert_eq!(config.initial_delay, Duration::from_millis(50));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.max_attempts, Some(3));
    }
}
