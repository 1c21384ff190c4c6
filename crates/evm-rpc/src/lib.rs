//! Resilient JSON-RPC transport for EVM nodes.
//!
//! This crate is the wire layer of the client stack. It turns a single,
//! possibly flaky HTTP endpoint into a dependable request surface:
//!
//! - **Transport** ([`HttpTransport`]): envelopes calls, validates JSON-RPC
//!   2.0 replies, and re-matches batch responses by id.
//! - **Retry engine** ([`retry::with_retry`]): exponential backoff with
//!   error-class awareness: reverts never retry, unknown blocks retry a
//!   bounded number of times, everything else retries until it works.
//! - **Batch middleware** ([`BatchClient`]): chunks outgoing batches to the
//!   node's real limit, isolates failing sub-requests, and bisects batches
//!   the node chokes on.
//!
//! # Crate Relationships
//!
//! This is the **low-level crate** in the stack:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Client Layer (evm-client)                               │
//! │  └─ capability probes, log retrieval, multicall          │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  RPC Layer (evm-rpc) ◄── YOU ARE HERE                    │
//! │  └─ transport, retry engine, batch middleware            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use evm_rpc::{BatchClient, HttpTransport, RpcCall, TransportConfig, retry::with_retry};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(HttpTransport::new("https://rpc.example.com", TransportConfig::default())?);
//!
//! // One retried request.
//! let head = with_retry("eth_blockNumber", false, || {
//!     transport.send(&RpcCall::new("eth_blockNumber", serde_json::json!([])))
//! })
//! .await?;
//!
//! // A self-healing batch.
//! let batch = BatchClient::new(transport, 100, true);
//! let results = batch.execute(calls).await?;
//! ```
//!
//! # Error Handling
//!
//! All operations return [`Result<T, RpcError>`](Result). The retry engine
//! keys off the error class, so surfaced errors are always either terminal
//! (reverts, unsupported capabilities, configuration) or exhausted bounded
//! retries (unknown block).

// ═══════════════════════════════════════════════════════════════════════════════
// MODULES
// ═══════════════════════════════════════════════════════════════════════════════

pub mod batch;
pub mod config;
pub mod error;
pub mod retry;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// ═══════════════════════════════════════════════════════════════════════════════
// RE-EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

// Primary types - what most users need
pub use batch::BatchClient;
pub use config::TransportConfig;
pub use error::{Result, RpcError};
pub use transport::{HttpTransport, RpcTransport};
pub use types::{JsonRpcRequest, JsonRpcResponse, RpcCall};

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

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
        assert!(version().starts_with("0."));
    }
}
