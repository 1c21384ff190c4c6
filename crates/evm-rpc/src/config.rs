//! Configuration for the HTTP JSON-RPC transport.

use std::time::Duration;

use crate::error::{Result, RpcError};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default timeout for HTTP requests to the RPC endpoint.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum allowed timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum allowed timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration options for [`HttpTransport`](crate::HttpTransport).
///
/// Use the builder pattern to customize settings:
///
/// ```
/// use evm_rpc::TransportConfig;
/// use std::time::Duration;
///
/// let config = TransportConfig::default().with_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Request timeout for HTTP calls.
    ///
    /// Default: 30 seconds.
    /// Range: 1-300 seconds.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the configuration.
    ///
    /// Called automatically when creating a transport.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] if the timeout is outside the
    /// 1-300 second range.
    pub fn validate(&self) -> Result<()> {
        if self.timeout < MIN_TIMEOUT {
            return Err(RpcError::InvalidConfig(format!(
                "timeout must be at least {MIN_TIMEOUT:?}"
            )));
        }
        if self.timeout > MAX_TIMEOUT {
            return Err(RpcError::InvalidConfig(format!(
                "timeout must be at most {MAX_TIMEOUT:?}"
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TransportConfig::default();
        assert_eq!(config.timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn timeout_bounds() {
        assert!(
            TransportConfig::new()
                .with_timeout(Duration::from_millis(200))
                .validate()
                .is_err()
        );
        assert!(
            TransportConfig::new()
                .with_timeout(Duration::from_secs(600))
                .validate()
                .is_err()
        );
        assert!(
            TransportConfig::new()
                .with_timeout(MIN_TIMEOUT)
                .validate()
                .is_ok()
        );
        assert!(
            TransportConfig::new()
                .with_timeout(MAX_TIMEOUT)
                .validate()
                .is_ok()
        );
    }
}
