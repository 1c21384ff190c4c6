//! Error types for the high-level client.

use alloy::primitives::B256;
use evm_archive::ArchiveError;
use evm_rpc::RpcError;
use thiserror::Error;

/// Result type alias using [`ClientError`].
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by [`EvmClient`](crate::EvmClient) operations.
///
/// Transient transport failures never reach callers directly; they are
/// absorbed by the retry engine and the range-bisection logic. What does
/// surface is either terminal (reverts, fork detection, unsupported
/// capabilities, bad inputs) or an exhausted bounded retry.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// A transport-level error that survived retrying.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A witness hash did not match the node's current answer.
    ///
    /// The chain the caller pinned via block-hash witnesses has been
    /// reorged away on this node. Terminal: the caller must re-resolve its
    /// range from a fresh head.
    #[error("forked block: expected {expected}, actual {actual}")]
    ForkedBlock {
        /// The hash the caller expected.
        expected: B256,
        /// The hash the node answered with.
        actual: B256,
    },

    /// The external archive failed in a way that was not absorbed by RPC
    /// fallback.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The filter specification is contradictory or incomplete.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The operation needs a capability this node does not have.
    #[error("unsupported by this node: {0}")]
    Unsupported(String),

    /// Two state overrides disagree about the same account or slot.
    #[error("conflicting state overrides: {0}")]
    OverrideConflict(String),

    /// The multicall aggregator misbehaved (malformed results, address
    /// mismatch, empty reply).
    #[error("multicall failed: {0}")]
    Multicall(String),
}

impl ClientError {
    /// Whether this error is a detected chain fork.
    #[must_use]
    pub const fn is_forked_block(&self) -> bool {
        matches!(self, Self::ForkedBlock { .. })
    }

    /// Whether this error must stop range bisection.
    ///
    /// Fork detection, reverts and missing capabilities will not change by
    /// splitting a range into smaller pieces.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::ForkedBlock { .. }
            | Self::Unsupported(_)
            | Self::InvalidFilter(_)
            | Self::OverrideConflict(_) => true,
            Self::Rpc(rpc) => rpc.is_terminal(),
            Self::Archive(_) | Self::Multicall(_) => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
