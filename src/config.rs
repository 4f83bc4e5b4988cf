//! Client and executor configuration.
//!
//! Configuration is passed explicitly through constructors — there is no
//! global or thread-local configuration anywhere in the crate. Every
//! struct has sensible defaults, an environment override
//! (`from_env`), and a `validate` that rejects inconsistent settings
//! before anything starts.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::Consistency;

/// Configuration for a client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session timeout requested from the cluster. A session that misses
    /// keep-alives for this long is expired on every replica.
    ///
    /// Default: 5s
    pub session_timeout: Duration,

    /// Interval between keep-alive beacons.
    ///
    /// Default: `session_timeout / 2`
    pub keep_alive_interval: Duration,

    /// Advisory per-operation timeout. On expiry the caller's future
    /// fails with `Timeout`; the server may still apply the operation and
    /// its result is discarded. `None` disables the timeout.
    ///
    /// Default: 15s
    pub operation_timeout: Option<Duration>,

    /// Default consistency for queries submitted without an explicit
    /// level.
    ///
    /// Default: `Sequential`
    pub default_consistency: Consistency,

    /// Client identity reported when opening the session, for
    /// diagnostics.
    ///
    /// Default: "conclave-client"
    pub client_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let session_timeout = Duration::from_secs(5);
        Self {
            session_timeout,
            keep_alive_interval: session_timeout / 2,
            operation_timeout: Some(Duration::from_secs(15)),
            default_consistency: Consistency::Sequential,
            client_id: "conclave-client".to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a config with a custom session timeout; the keep-alive
    /// interval is derived as half of it.
    pub fn with_session_timeout(timeout: Duration) -> Self {
        Self {
            session_timeout: timeout,
            keep_alive_interval: timeout / 2,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// - `SESSION_TIMEOUT_MS`: session timeout (default: 5000)
    /// - `KEEP_ALIVE_INTERVAL_MS`: beacon interval (default: timeout / 2)
    /// - `OPERATION_TIMEOUT_MS`: per-operation timeout, 0 disables
    ///   (default: 15000)
    /// - `CLIENT_ID`: reported client identity
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let session_timeout = read_millis("SESSION_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.session_timeout);

        let keep_alive_interval = read_millis("KEEP_ALIVE_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(session_timeout / 2);

        let operation_timeout = match read_millis("OPERATION_TIMEOUT_MS") {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.operation_timeout,
        };

        let client_id = std::env::var("CLIENT_ID").unwrap_or(defaults.client_id);

        Self {
            session_timeout,
            keep_alive_interval,
            operation_timeout,
            client_id,
            ..defaults
        }
    }

    /// Reject configurations that cannot keep a session alive.
    pub fn validate(&self) -> Result<()> {
        if self.session_timeout.is_zero() {
            return Err(Error::Config("session_timeout must be non-zero".to_string()));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(Error::Config(
                "keep_alive_interval must be non-zero".to_string(),
            ));
        }
        if self.keep_alive_interval >= self.session_timeout {
            return Err(Error::Config(format!(
                "keep_alive_interval ({:?}) must be shorter than session_timeout ({:?})",
                self.keep_alive_interval, self.session_timeout
            )));
        }
        Ok(())
    }
}

/// Configuration for the server-side executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Suggest a snapshot to the surrounding engine after this many
    /// applied entries.
    ///
    /// Default: 1000
    pub snapshot_threshold: u64,

    /// Session timeout bounds granted to clients; requested timeouts are
    /// clamped into this range.
    ///
    /// Default: 250ms ..= 300s
    pub min_session_timeout: Duration,
    pub max_session_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            snapshot_threshold: 1000,
            min_session_timeout: Duration::from_millis(250),
            max_session_timeout: Duration::from_secs(300),
        }
    }
}

impl ExecutorConfig {
    /// Clamp a requested session timeout into the configured bounds.
    pub fn clamp_session_timeout(&self, requested_ms: u64) -> u64 {
        requested_ms
            .max(self.min_session_timeout.as_millis() as u64)
            .min(self.max_session_timeout.as_millis() as u64)
    }

    /// Reject inverted bounds.
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_threshold == 0 {
            return Err(Error::Config(
                "snapshot_threshold must be non-zero".to_string(),
            ));
        }
        if self.min_session_timeout > self.max_session_timeout {
            return Err(Error::Config(format!(
                "min_session_timeout ({:?}) exceeds max_session_timeout ({:?})",
                self.min_session_timeout, self.max_session_timeout
            )));
        }
        Ok(())
    }
}

fn read_millis(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.session_timeout, Duration::from_secs(5));
        assert_eq!(config.keep_alive_interval, Duration::from_millis(2500));
        assert_eq!(config.default_consistency, Consistency::Sequential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_config_with_session_timeout() {
        let config = ClientConfig::with_session_timeout(Duration::from_secs(10));
        assert_eq!(config.session_timeout, Duration::from_secs(10));
        assert_eq!(config.keep_alive_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_client_config_rejects_zero_timeout() {
        let config = ClientConfig {
            session_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_client_config_rejects_interval_not_below_timeout() {
        let config = ClientConfig {
            session_timeout: Duration::from_secs(1),
            keep_alive_interval: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_executor_config_clamps_session_timeout() {
        let config = ExecutorConfig::default();
        assert_eq!(config.clamp_session_timeout(1), 250);
        assert_eq!(config.clamp_session_timeout(5_000), 5_000);
        assert_eq!(config.clamp_session_timeout(10_000_000), 300_000);
    }

    #[test]
    fn test_executor_config_validate() {
        assert!(ExecutorConfig::default().validate().is_ok());

        let config = ExecutorConfig {
            snapshot_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ExecutorConfig {
            min_session_timeout: Duration::from_secs(10),
            max_session_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
