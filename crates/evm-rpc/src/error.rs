//! Error types for the JSON-RPC transport layer.
//!
//! This module provides the error taxonomy that the retry engine and the
//! batch middleware classify against:
//!
//! - [`RpcError`] - The primary error type for all transport operations
//! - [`RpcErrorDetail`] - The raw JSON-RPC error object from the server
//!
//! # Error Philosophy
//!
//! Every failure is sorted into one of three behavioral classes:
//!
//! | Class | Variants | Retry behavior |
//! |-------|----------|----------------|
//! | Terminal logic | `Revert`, `Unsupported`, `InvalidConfig` | Never retried |
//! | Missing block | `UnknownBlock` | Retried up to 3 times |
//! | Transient | everything else | Retried with exponential backoff |
//!
//! Revert payloads carried in `eth_call` / `eth_estimateGas` error responses
//! are decoded here so that callers receive structured [`RpcError::Revert`]
//! values with the human-readable reason instead of raw hex blobs.

use std::fmt;

use alloy::sol_types::{Panic, Revert, SolError};
use thiserror::Error;

/// Result type alias using [`RpcError`].
pub type Result<T> = std::result::Result<T, RpcError>;

/// Methods whose error responses may carry EVM revert data.
const CALL_LIKE_METHODS: [&str; 2] = ["eth_call", "eth_estimateGas"];

/// Errors that can occur when talking to a JSON-RPC node.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RpcError {
    /// Failed to establish connection to the RPC endpoint.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Request timed out waiting for a response.
    #[error("request timed out")]
    Timeout,

    /// HTTP-level error (non-2xx status code, TLS issues, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error returned by the server that carries no special meaning.
    #[error("RPC error ({code}): {message}")]
    Rpc {
        /// JSON-RPC error code (e.g., -32601 for method not found).
        code: i64,
        /// Human-readable error message from the server.
        message: String,
        /// Optional additional data from the error response.
        data: Option<String>,
    },

    /// The EVM reverted while executing the request.
    ///
    /// This is a contract-logic outcome, not an infrastructure failure, and
    /// is therefore never retried. When the node returns structured revert
    /// data the decoded reason is attached.
    #[error("execution reverted{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Revert {
        /// Decoded revert reason, when the node returned one.
        reason: Option<String>,
        /// Raw revert payload as returned by the node.
        data: Option<String>,
    },

    /// The node does not know the requested block yet.
    ///
    /// Typically seen when a load-balanced node lags behind a head that was
    /// observed on another node moments ago. Retried a bounded number of
    /// times to give the node a chance to catch up.
    #[error("unknown block: {0}")]
    UnknownBlock(String),

    /// Failed to serialize a request or deserialize a response.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Response was valid JSON but had unexpected structure.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The operation requires a capability this node does not have.
    #[error("unsupported by this node: {0}")]
    Unsupported(String),

    /// Invalid configuration provided to the transport.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RpcError {
    /// Create a plain RPC error from code and message.
    #[must_use]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a revert error with a decoded reason.
    #[must_use]
    pub fn revert(reason: impl Into<String>) -> Self {
        Self::Revert {
            reason: Some(reason.into()),
            data: None,
        }
    }

    /// Check whether this error is a decoded EVM revert.
    #[must_use]
    pub const fn is_revert(&self) -> bool {
        matches!(self, Self::Revert { .. })
    }

    /// Check whether this error means the node has not seen the block yet.
    #[must_use]
    pub const fn is_unknown_block(&self) -> bool {
        matches!(self, Self::UnknownBlock(_))
    }

    /// Check whether this error must never be retried.
    ///
    /// Reverts are contract-logic outcomes, unsupported capabilities will not
    /// appear by retrying, and configuration errors are programmer errors.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Revert { .. } | Self::Unsupported(_) | Self::InvalidConfig(_)
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSIONS FROM reqwest / serde ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_request() || err.is_body() || err.is_decode() {
            Self::Http(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RPC ERROR DETAILS
// ═══════════════════════════════════════════════════════════════════════════════

/// Detailed information from a JSON-RPC error response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RpcErrorDetail {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl RpcErrorDetail {
    /// Classify this error object into an [`RpcError`] for the given method.
    ///
    /// Error messages mentioning an unknown block become
    /// [`RpcError::UnknownBlock`] regardless of method. For call-like methods
    /// (`eth_call`, `eth_estimateGas`) the `data` payload is additionally
    /// inspected for EVM revert encodings.
    #[must_use]
    pub fn into_error(self, method: &str) -> RpcError {
        if self.message.contains("unknown block") {
            return RpcError::UnknownBlock(self.message);
        }

        if CALL_LIKE_METHODS.contains(&method) {
            if let Some(revert) = self.as_revert() {
                return revert;
            }
        }

        RpcError::Rpc {
            code: self.code,
            message: self.message,
            data: self.data.map(|v| v.to_string()),
        }
    }

    /// Try to interpret this error object as an EVM revert.
    fn as_revert(&self) -> Option<RpcError> {
        // Structured revert data takes precedence over the message.
        if let Some(serde_json::Value::String(data)) = &self.data {
            if let Some(reason) = decode_revert_reason(data) {
                return Some(RpcError::Revert {
                    reason,
                    data: Some(data.clone()),
                });
            }
        }

        // Geth formats reverts as code 3; other nodes only hint via the message.
        let message = self.message.to_lowercase();
        if self.code == 3 || message.contains("revert") {
            let reason = self
                .message
                .strip_prefix("execution reverted: ")
                .map(ToOwned::to_owned);
            return Some(RpcError::Revert {
                reason,
                data: self.data.as_ref().map(ToString::to_string),
            });
        }

        None
    }
}

impl fmt::Display for RpcErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC error ({}): {}", self.code, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REVERT PAYLOAD DECODING
// ═══════════════════════════════════════════════════════════════════════════════

/// Decode a hex revert payload into a revert reason.
///
/// Handles the encodings seen in the wild:
///
/// - `Error(string)` (selector `0x08c379a0`) decodes to the reason string
/// - `Panic(uint256)` (selector `0x4e487b71`) decodes to the panic code
/// - other selectors of at least 4 bytes are reported as custom errors
/// - anything shorter yields a reasonless revert
///
/// Returns `None` when the payload does not look like revert data at all.
#[must_use]
pub fn decode_revert_reason(data: &str) -> Option<Option<String>> {
    // Some nodes prefix the hex payload with "Reverted ".
    let trimmed = data.strip_prefix("Reverted ").unwrap_or(data);
    let raw = trimmed.strip_prefix("0x")?;
    let bytes = hex::decode(raw).ok()?;
    Some(revert_reason_from_bytes(&bytes))
}

/// Decode raw revert bytes into a reason, when one is present.
#[must_use]
pub fn revert_reason_from_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 4 {
        return None;
    }
    if bytes[..4] == Revert::SELECTOR {
        if let Ok(decoded) = Revert::abi_decode(bytes) {
            return Some(decoded.reason);
        }
    }
    if bytes[..4] == Panic::SELECTOR {
        if let Ok(decoded) = Panic::abi_decode(bytes) {
            return Some(format!("panicked with code 0x{:x}", decoded.code));
        }
    }
    // Solidity custom error: report the selector so callers can match on it.
    Some(format!("custom error 0x{}", hex::encode(&bytes[..4])))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
