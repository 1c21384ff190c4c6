//! Capability-probed client for EVM JSON-RPC nodes.
//!
//! Public RPC endpoints are wildly heterogeneous: log-range caps anywhere
//! between one block and unlimited, batch limits from none to a thousand,
//! pruned state, stripped revert reasons, missing state-override support.
//! This crate probes what a node *actually* supports once, at connect time,
//! and then serves three demanding workloads on top of whatever it found:
//!
//! - **Adaptive log retrieval** ([`EvmClient::get_logs`]): arbitrary block
//!   ranges, split to the node's cap, bisected on failure, offloaded to an
//!   external log archive for the historic part, and upgraded to reorg-safe
//!   by-hash queries near the chain head.
//! - **Multicall aggregation** ([`EvmClient::multicall`]): many contract
//!   reads in one node round-trip, via a deployed aggregator or a
//!   deployment-free constructor trick, with per-call results and gas
//!   usage.
//! - **Plain node operations**: blocks, calls, balances and the rest, all
//!   retried with exponential backoff and error-class awareness.
//!
//! # Crate Relationships
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Client Layer (evm-client) ◄── YOU ARE HERE              │
//! │  └─ capability probes, log retrieval, multicall          │
//! └──────────────┬─────────────────────────┬─────────────────┘
//!                │                         │
//!                ▼                         ▼
//! ┌───────────────────────────┐ ┌──────────────────────────────┐
//! │  RPC Layer (evm-rpc)      │ │  Archive Layer (evm-archive) │
//! │  └─ transport, retry,     │ │  └─ bulk historic log        │
//! │     batch middleware      │ │     queries                  │
//! └───────────────────────────┘ └──────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use evm_client::{EvmClient, FilterSpec, GetLogsOptions};
//!
//! let client = EvmClient::connect("https://rpc.example.com").await?;
//!
//! // Wide-range log retrieval, shaped to the node's limits.
//! let logs = client
//!     .get_logs(
//!         FilterSpec::range(15_000_000, 16_000_000).with_address(token),
//!         GetLogsOptions::default(),
//!     )
//!     .await?;
//!
//! // Many reads, one round-trip.
//! let mut multicall = client.multicall();
//! multicall.add_call(token, balance_of_calldata, vec!["uint256".parse()?]);
//! multicall.add_call(token, total_supply_calldata, vec!["uint256".parse()?]);
//! let output = multicall.execute().await?;
//! ```
//!
//! # Concurrency
//!
//! [`EvmClient`] is `Send + Sync`. Capability fields are immutable after
//! connect; the only mutable state is the monotonic `latest_seen_block`
//! high-water mark, maintained with atomic max-merge. Builders
//! ([`Multicall`]) are single-owner and consumed by `execute`.

// ═══════════════════════════════════════════════════════════════════════════════
// MODULES
// ═══════════════════════════════════════════════════════════════════════════════

pub mod address;
pub mod artifacts;
pub mod client;
pub mod config;
pub mod encoding;
pub mod error;
pub mod logs;
pub mod multicall;
pub mod overrides;
pub mod probe;
pub mod types;

// ═══════════════════════════════════════════════════════════════════════════════
// RE-EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

// Primary types - what most users need
pub use client::EvmClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use logs::{FilterSpec, GetLogsOptions, ProgressFn, TopicFilter};
pub use multicall::{CallFailure, CallOutcome, Multicall, MulticallOutput};
pub use overrides::{AccountOverride, StateOverride};
pub use probe::Capabilities;
pub use types::{BlockId, BlockSummary, BlockTag, CallRequest};

// ═══════════════════════════════════════════════════════════════════════════════
// CRATE INFO
// ═══════════════════════════════════════════════════════════════════════════════

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}
