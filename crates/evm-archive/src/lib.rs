//! Client for external indexed-log archive gateways.
//!
//! RPC nodes answer `eth_getLogs` a few thousand blocks at a time; an
//! archive answers the same filters over millions of blocks in a handful of
//! HTTP round-trips. This crate consumes such an archive:
//!
//! - **Discovery**: a manifest maps chain ids to gateway URLs, fetched once
//!   per process.
//! - **Bulk queries**: gateways hand out worker URLs per start block; workers
//!   answer log-filter queries in block-group chunks that the client walks
//!   until the range is covered.
//! - **Look-ahead**: workers are asked for blocks past the requested range,
//!   and the overshoot is cached so contiguous follow-up queries skip the
//!   network entirely.
//!
//! The archive indexes with a delay, so it can only ever serve the *old* end
//! of a range. [`ArchiveClient::fetch_logs`] therefore reports how far it
//! got; the caller finishes the young end through the node.
//!
//! # Quick Start
//!
//! ```ignore
//! use evm_archive::{ArchiveClient, ArchiveConfig, LogSelection};
//!
//! let client = ArchiveClient::new(ArchiveConfig::from_env())?;
//!
//! if client.supports_chain(1).await? {
//!     let selection = LogSelection::any().with_addresses(&[token]);
//!     let (next_block, logs) = client
//!         .fetch_logs(1, &selection, 15_000_000, 16_000_000, true, None)
//!         .await?;
//!     println!("archive served {} logs, continue from {next_block}", logs.len());
//! }
//! ```

// ═══════════════════════════════════════════════════════════════════════════════
// MODULES
// ═══════════════════════════════════════════════════════════════════════════════

pub mod cache;
pub mod client;
pub mod error;
pub mod types;

// ═══════════════════════════════════════════════════════════════════════════════
// RE-EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

// Primary types - what most users need
pub use client::{ArchiveClient, ArchiveConfig, LOOKAHEAD_BLOCKS};
pub use error::{ArchiveError, Result};
pub use types::{ArchiveQuery, BlockGroup, LogSelection};

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
