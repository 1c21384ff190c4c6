//! In-memory mock transport for testing.
//!
//! [`MockTransport`] implements [`RpcTransport`](crate::RpcTransport) with a
//! programmable handler so higher layers (batch middleware, capability
//! probes, log retrieval, multicall) can be exercised without a network.
//!
//! # Panics
//!
//! Mock methods panic on poisoned locks, which only happens when a test
//! already panicked while holding one.

// Allow expect in this module since it's for testing only and we want to panic
// on poisoned locks (indicates a bug in tests).
#![allow(clippy::expect_used)]
#![allow(clippy::missing_panics_doc)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::transport::RpcTransport;
use crate::types::RpcCall;

/// Handler invoked for every mocked request.
pub type MockHandler = dyn Fn(&str, &Value) -> Result<Value> + Send + Sync;

/// Counter used to give every mock instance a unique URL.
///
/// Process-wide caches upstream are keyed by endpoint URL; tests sharing one
/// URL would bleed state into each other.
static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One request as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Method name.
    pub method: String,
    /// Parameters.
    pub params: Value,
    /// Whether the call arrived inside a batch.
    pub batched: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// MOCK TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// Programmable in-memory transport.
///
/// # Example
///
/// ```
/// use evm_rpc::mock::MockTransport;
/// use evm_rpc::{RpcCall, RpcTransport};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let transport = MockTransport::new(|method, _params| match method {
///     "eth_blockNumber" => Ok(json!("0x10")),
///     other => Err(evm_rpc::RpcError::rpc(-32601, format!("no such method {other}"))),
/// });
///
/// let head = transport
///     .send(&RpcCall::new("eth_blockNumber", json!([])))
///     .await
///     .unwrap();
/// assert_eq!(head, json!("0x10"));
/// # }
/// ```
pub struct MockTransport {
    /// Per-request handler.
    handler: Box<MockHandler>,

    /// Unique fake endpoint URL.
    url: String,

    /// Everything that was requested, in order.
    recorded: Mutex<Vec<RecordedCall>>,

    /// Number of `send` invocations.
    single_sends: AtomicUsize,

    /// Number of `send_batch` invocations.
    batch_sends: AtomicUsize,

    /// Batches larger than this fail at the transport level.
    batch_limit: Option<usize>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("url", &self.url)
            .field("batch_limit", &self.batch_limit)
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    /// Create a mock that answers every request through `handler`.
    #[must_use]
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        let instance = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            handler: Box::new(handler),
            url: format!("mock://node-{instance}"),
            recorded: Mutex::new(Vec::new()),
            single_sends: AtomicUsize::new(0),
            batch_sends: AtomicUsize::new(0),
            batch_limit: None,
        }
    }

    /// Create a mock whose handler closes over shared state.
    #[must_use]
    pub fn with_state<S, F>(state: S, handler: F) -> Self
    where
        S: Send + Sync + 'static,
        F: Fn(&S, &str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(move |method, params| handler(&state, method, params))
    }

    /// Fail batches larger than `limit` with an invalid-response error.
    #[must_use]
    pub const fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    /// Number of single-request sends so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.single_sends.load(Ordering::SeqCst)
    }

    /// Number of batch sends so far.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batch_sends.load(Ordering::SeqCst)
    }

    /// Every recorded request, in arrival order.
    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().expect("lock poisoned").clone()
    }

    /// How many requests (batched or not) used the given method.
    #[must_use]
    pub fn method_count(&self, method: &str) -> usize {
        self.recorded
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    fn record(&self, call: &RpcCall, batched: bool) {
        self.recorded.lock().expect("lock poisoned").push(RecordedCall {
            method: call.method.to_string(),
            params: call.params.clone(),
            batched,
        });
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn send(&self, call: &RpcCall) -> Result<Value> {
        self.single_sends.fetch_add(1, Ordering::SeqCst);
        self.record(call, false);
        (self.handler)(call.method, &call.params)
    }

    async fn send_batch(&self, calls: &[RpcCall]) -> Result<Vec<Result<Value>>> {
        self.batch_sends.fetch_add(1, Ordering::SeqCst);

        if let Some(limit) = self.batch_limit {
            if calls.len() > limit {
                return Err(RpcError::InvalidResponse(format!(
                    "mock rejects batches larger than {limit}"
                )));
            }
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            self.record(call, true);
            results.push((self.handler)(call.method, &call.params));
        }
        Ok(results)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn records_requests() {
        let transport = MockTransport::new(|_, _| Ok(json!("0x1")));
        transport
            .send(&RpcCall::new("eth_gasPrice", json!([])))
            .await
            .expect("send failed");

        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.method_count("eth_gasPrice"), 1);
        assert!(!transport.recorded()[0].batched);
    }

    #[tokio::test]
    async fn batch_limit_rejects_large_batches() {
        let transport = MockTransport::new(|_, _| Ok(json!("0x1"))).with_batch_limit(2);
        let calls = vec![
            RpcCall::new("eth_gasPrice", json!([])),
            RpcCall::new("eth_gasPrice", json!([])),
            RpcCall::new("eth_gasPrice", json!([])),
        ];

        assert!(transport.send_batch(&calls).await.is_err());
        assert!(transport.send_batch(&calls[..2]).await.is_ok());
    }

    #[tokio::test]
    async fn urls_are_unique_per_instance() {
        let a = MockTransport::new(|_, _| Ok(json!("0x1")));
        let b = MockTransport::new(|_, _| Ok(json!("0x1")));
        assert_ne!(a.url(), b.url());
    }
}
