//! JSON-RPC envelope types.
//!
//! This module defines the wire-level request/response structures shared by
//! the transport and the batch middleware:
//!
//! - [`RpcCall`] - A method name plus parameters, ready to be enveloped
//! - [`JsonRpcRequest`] - The serialized JSON-RPC 2.0 request
//! - [`JsonRpcResponse`] - The deserialized JSON-RPC 2.0 response

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcErrorDetail;

/// The only protocol version this crate speaks.
pub const JSONRPC_VERSION: &str = "2.0";

// ═══════════════════════════════════════════════════════════════════════════════
// RPC CALL
// ═══════════════════════════════════════════════════════════════════════════════

/// A single JSON-RPC invocation before it is assigned a request id.
///
/// Calls are cheap to clone; the batch middleware clones them freely when
/// splitting and re-issuing batches.
///
/// # Example
///
/// ```
/// use evm_rpc::RpcCall;
/// use serde_json::json;
///
/// let call = RpcCall::new("eth_getBlockByNumber", json!(["0x10", false]));
/// assert_eq!(call.method, "eth_getBlockByNumber");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCall {
    /// JSON-RPC method name.
    pub method: &'static str,
    /// Positional parameters, already serialized to JSON.
    pub params: Value,
}

impl RpcCall {
    /// Create a new call.
    #[must_use]
    pub const fn new(method: &'static str, params: Value) -> Self {
        Self { method, params }
    }

    /// Whether this call fetches a block body (`eth_getBlockByNumber` /
    /// `eth_getBlockByHash`).
    ///
    /// Block-body calls get special null-result handling in the batch
    /// middleware: a `null` block means the node has not seen it yet.
    #[must_use]
    pub fn is_get_block(&self) -> bool {
        self.method.starts_with("eth_getBlockBy")
    }

    /// Whether this call is `eth_getLogs`.
    #[must_use]
    pub fn is_get_logs(&self) -> bool {
        self.method == "eth_getLogs"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WIRE ENVELOPES
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON-RPC request envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Method name.
    pub method: &'a str,
    /// Positional parameters.
    pub params: &'a Value,
    /// Request id used to correlate batch responses.
    pub id: u64,
}

impl<'a> JsonRpcRequest<'a> {
    /// Envelope a call with the given request id.
    #[must_use]
    pub fn new(call: &'a RpcCall, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: call.method,
            params: &call.params,
            id,
        }
    }
}

/// JSON-RPC response envelope.
///
/// Per JSON-RPC 2.0, exactly one of `result` / `error` is present. Responses
/// whose `jsonrpc` field is missing or not `"2.0"` are rejected by the
/// transport as malformed.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse<T = Value> {
    /// Protocol version echoed by the server.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Request id echoed by the server.
    #[serde(default)]
    pub id: Option<u64>,
    /// Successful result.
    pub result: Option<T>,
    /// Error object.
    pub error: Option<RpcErrorDetail>,
}

impl<T> JsonRpcResponse<T> {
    /// Whether the envelope itself is well-formed (correct protocol version).
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.jsonrpc.as_deref() == Some(JSONRPC_VERSION)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
