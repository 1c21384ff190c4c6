//! Error types for the archive gateway client.

use thiserror::Error;

/// Result type alias using [`ArchiveError`].
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur when querying an external log archive.
///
/// Callers generally treat any archive error as a cue to fall back to plain
/// RPC log retrieval; [`ArchiveError::NotIndexed`] is the expected, quiet
/// variant of that fallback.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    /// The archive has no gateway for this chain.
    #[error("archive does not support chain {0}")]
    UnsupportedChain(u64),

    /// The archive has not indexed far enough for this query.
    #[error("archive has only indexed till block {indexed}")]
    NotIndexed {
        /// Highest block the archive has indexed.
        indexed: u64,
    },

    /// Failed to establish a connection to the archive.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// HTTP-level error (non-2xx status, TLS issues, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Response was readable but had unexpected structure or content.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Failed to serialize a query or deserialize a response.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ArchiveError {
    /// Whether this error means the archive simply has not indexed the
    /// requested range yet.
    #[must_use]
    pub const fn is_not_indexed(&self) -> bool {
        matches!(self, Self::NotIndexed { .. })
    }
}

impl From<reqwest::Error> for ArchiveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_indexed_detection() {
        assert!(ArchiveError::NotIndexed { indexed: 840 }.is_not_indexed());
        assert!(!ArchiveError::UnsupportedChain(7).is_not_indexed());
        assert!(!ArchiveError::Timeout.is_not_indexed());
    }
}
