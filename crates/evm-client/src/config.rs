//! Client configuration.
//!
//! [`ClientConfig`] collects everything that is policy rather than probed
//! capability: retry behavior, the reorg-guard depth, multicall sizing, and
//! the known aggregator deployments. Probed capabilities live in
//! [`Capabilities`](crate::Capabilities) and are discovered at connect time.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::{Address, address};
use evm_archive::ArchiveConfig;

use crate::error::{ClientError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Environment variable overriding the reorg-guard depth.
pub const UNSTABLE_BLOCKS_ENV: &str = "UNSTABLE_BLOCKS";

/// Environment variable disabling external-archive log retrieval.
pub const NO_EXTERNAL_ARCHIVE_ENV: &str = "NO_EXTERNAL_ARCHIVE";

/// Default number of head blocks treated as reorg-able.
pub const DEFAULT_UNSTABLE_BLOCKS: u64 = 5;

/// Default number of calls packed into one multicall execution.
pub const DEFAULT_MULTICALL_BATCH_SIZE: usize = 1_000;

/// Gas limit granted to each aggregated call.
pub const DEFAULT_MULTICALL_GAS_LIMIT: u64 = 100_000_000;

/// Gas the aggregator keeps in reserve before giving up on remaining calls.
pub const DEFAULT_MULTICALL_GAS_BUFFER: u64 = 10_000_000;

/// Aggregator deployment shipped with the crate (Core mainnet).
const BUILTIN_AGGREGATOR: (u64, Address) =
    (1116, address!("0x2C310a21E21a3eaDF4e53E1118aeD4614c51B576"));

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENT CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration options for [`EvmClient`](crate::EvmClient).
///
/// ```
/// use evm_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_timeout(Duration::from_secs(60))
///     .with_unstable_blocks(10)
///     .without_retry();
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whether transient failures are retried with backoff.
    ///
    /// Default: `true`.
    pub should_retry: bool,

    /// The top `N` blocks treated as potentially missing or reorg-able.
    ///
    /// Queries whose upper bound falls in this window are upgraded to
    /// per-block by-hash retrieval. Default: 5, or [`UNSTABLE_BLOCKS_ENV`].
    pub unstable_blocks: u64,

    /// HTTP timeout for node requests.
    pub timeout: Duration,

    /// Whether wide historic log queries may be offloaded to the external
    /// archive. Default: enabled, unless [`NO_EXTERNAL_ARCHIVE_ENV`] is set.
    pub use_external_archive: bool,

    /// Archive client configuration.
    pub archive: ArchiveConfig,

    /// Known aggregator deployments, chain id → contract address.
    ///
    /// Chains without an entry fall back to the constructor-based
    /// aggregator, which needs no deployment.
    pub aggregator_deployments: HashMap<u64, Address>,

    /// How many calls one multicall execution packs at most.
    pub multicall_batch_size: usize,

    /// Gas limit granted to each aggregated call.
    pub multicall_gas_limit: u64,

    /// Gas buffer the deployed aggregator keeps in reserve.
    pub multicall_gas_buffer: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            should_retry: true,
            unstable_blocks: DEFAULT_UNSTABLE_BLOCKS,
            timeout: evm_rpc::config::DEFAULT_REQUEST_TIMEOUT,
            use_external_archive: true,
            archive: ArchiveConfig::default(),
            aggregator_deployments: HashMap::from([BUILTIN_AGGREGATOR]),
            multicall_batch_size: DEFAULT_MULTICALL_BATCH_SIZE,
            multicall_gas_limit: DEFAULT_MULTICALL_GAS_LIMIT,
            multicall_gas_buffer: DEFAULT_MULTICALL_GAS_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Build a configuration from the process environment.
    ///
    /// Honors [`UNSTABLE_BLOCKS_ENV`], [`NO_EXTERNAL_ARCHIVE_ENV`], and the
    /// archive-specific variables (see [`ArchiveConfig::from_env`]).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            archive: ArchiveConfig::from_env(),
            ..Self::default()
        };
        if let Some(depth) = std::env::var(UNSTABLE_BLOCKS_ENV)
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            config.unstable_blocks = depth;
        }
        if std::env::var(NO_EXTERNAL_ARCHIVE_ENV).is_ok() {
            config.use_external_archive = false;
        }
        config
    }

    /// Disable retrying entirely.
    #[must_use]
    pub const fn without_retry(mut self) -> Self {
        self.should_retry = false;
        self
    }

    /// Set the reorg-guard depth.
    #[must_use]
    pub const fn with_unstable_blocks(mut self, blocks: u64) -> Self {
        self.unstable_blocks = blocks;
        self
    }

    /// Set the node HTTP timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disable external-archive offloading.
    #[must_use]
    pub const fn without_external_archive(mut self) -> Self {
        self.use_external_archive = false;
        self
    }

    /// Register an aggregator deployment for a chain.
    #[must_use]
    pub fn with_aggregator(mut self, chain_id: u64, aggregator: Address) -> Self {
        self.aggregator_deployments.insert(chain_id, aggregator);
        self
    }

    /// Set the multicall batch size.
    #[must_use]
    pub fn with_multicall_batch_size(mut self, batch_size: usize) -> Self {
        self.multicall_batch_size = batch_size;
        self
    }

    /// Validate the configuration.
    ///
    /// Called automatically when connecting a client.
    ///
    /// # Errors
    ///
    /// Fails when the timeout is outside the transport's accepted range or
    /// the multicall batch size is zero.
    pub fn validate(&self) -> Result<()> {
        evm_rpc::TransportConfig::default()
            .with_timeout(self.timeout)
            .validate()
            .map_err(ClientError::from)?;
        if self.multicall_batch_size == 0 {
            return Err(ClientError::Multicall(
                "multicall_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
