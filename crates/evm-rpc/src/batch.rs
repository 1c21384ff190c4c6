//! Adaptive batch middleware.
//!
//! [`BatchClient`] sits between callers and the raw transport and makes
//! batch JSON-RPC usable on nodes with wildly different batch support:
//!
//! 1. An empty batch never touches the wire.
//! 2. Batches larger than the probed maximum are chunked.
//! 3. Without batch support (max size 0), or for a single entry, each call
//!    goes out individually through the retry engine.
//! 4. A reorg-witness packet (one `eth_getLogs` bracketed by
//!    `eth_getBlockByNumber` calls) passes through verbatim; the log
//!    retriever owns its failure handling.
//! 5. Any other failure bisects the batch after a short pause; partial
//!    failures are isolated and only the failing entries are re-issued.
//! 6. `eth_getBlockBy*` entries resolving to `null` count as failures: the
//!    node has not seen that block yet.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::error::{Result, RpcError};
use crate::retry::with_retry;
use crate::transport::RpcTransport;
use crate::types::RpcCall;

/// Pause before re-issuing after a failed batch.
const SPLIT_PAUSE: Duration = Duration::from_millis(100);

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Size-aware, self-healing batch dispatcher.
///
/// Construct one per client with the probed maximum batch size. The batch
/// client guarantees that [`execute`](Self::execute) returns exactly one
/// result per call, in call order, or an error when some entry failed
/// terminally.
#[derive(Debug, Clone)]
pub struct BatchClient {
    /// The underlying transport.
    transport: Arc<dyn RpcTransport>,

    /// Largest batch the node accepts; 0 disables batching entirely.
    max_batch_size: usize,

    /// Whether individual fallback requests may retry.
    should_retry: bool,
}

impl BatchClient {
    /// Create a new batch client.
    #[must_use]
    pub fn new(transport: Arc<dyn RpcTransport>, max_batch_size: usize, should_retry: bool) -> Self {
        Self {
            transport,
            max_batch_size,
            should_retry,
        }
    }

    /// The maximum batch size this client chunks to.
    #[must_use]
    pub const fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Execute a batch, splitting and retrying as needed.
    ///
    /// Results come back in call order, one per call.
    ///
    /// # Errors
    ///
    /// Returns the first terminal error encountered; transient failures are
    /// absorbed by splitting and the per-entry retry engine.
    #[instrument(skip(self, calls), fields(batch_size = calls.len()))]
    pub async fn execute(&self, calls: Vec<RpcCall>) -> Result<Vec<Value>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        if self.max_batch_size > 0 && calls.len() > self.max_batch_size {
            let mut results = Vec::with_capacity(calls.len());
            for chunk in calls.chunks(self.max_batch_size) {
                results.extend(self.dispatch(chunk.to_vec()).await?);
            }
            return Ok(results);
        }

        self.dispatch(calls).await
    }

    /// Dispatch a batch already known to fit the size limit.
    fn dispatch(&self, calls: Vec<RpcCall>) -> BoxFuture<'_, Result<Vec<Value>>> {
        Box::pin(async move {
            if calls.is_empty() {
                return Ok(Vec::new());
            }

            if self.max_batch_size == 0 || calls.len() == 1 {
                return self.send_individually(&calls).await;
            }

            if is_reorg_witness_packet(&calls) {
                return self.send_verbatim(&calls).await;
            }

            match self.transport.send_batch(&calls).await {
                Ok(entries) => self.resolve_entries(calls, entries).await,
                Err(error) => {
                    warn!(
                        error = %error,
                        batch_size = calls.len(),
                        "batch request failed, splitting"
                    );
                    self.bisect(calls).await
                }
            }
        })
    }

    /// Send every call on its own, each through the retry engine.
    ///
    /// `eth_getLogs` is never retried at this layer; its retry policy lives
    /// in the log retriever, which bisects ranges instead of hammering the
    /// same span.
    async fn send_individually(&self, calls: &[RpcCall]) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let no_retry = !self.should_retry || call.is_get_logs();
            let value = with_retry(call.method, no_retry, || async {
                let value = self.transport.send(call).await?;
                check_null_block(call, &value)?;
                Ok(value)
            })
            .await?;
            results.push(value);
        }
        Ok(results)
    }

    /// Pass a reorg-witness packet through untouched.
    async fn send_verbatim(&self, calls: &[RpcCall]) -> Result<Vec<Value>> {
        let entries = self.transport.send_batch(calls).await?;
        let mut results = Vec::with_capacity(entries.len());
        for (call, entry) in calls.iter().zip(entries) {
            let value = entry?;
            check_null_block(call, &value)?;
            results.push(value);
        }
        Ok(results)
    }

    /// Splice per-entry outcomes, re-issuing only the failed ones.
    async fn resolve_entries(
        &self,
        calls: Vec<RpcCall>,
        entries: Vec<Result<Value>>,
    ) -> Result<Vec<Value>> {
        let mut results: Vec<Option<Value>> = Vec::with_capacity(calls.len());
        let mut failed: Vec<usize> = Vec::new();

        for (i, (call, entry)) in calls.iter().zip(entries).enumerate() {
            match entry.and_then(|value| {
                check_null_block(call, &value)?;
                Ok(value)
            }) {
                Ok(value) => results.push(Some(value)),
                Err(error) => {
                    if error.is_terminal() {
                        return Err(error);
                    }
                    debug!(method = call.method, index = i, error = %error, "batch entry failed");
                    results.push(None);
                    failed.push(i);
                }
            }
        }

        if failed.is_empty() {
            let completed = results.into_iter().flatten().collect();
            return Ok(completed);
        }

        // Re-issuing the identical batch would fail identically; bisect instead.
        if failed.len() == calls.len() {
            warn!(batch_size = calls.len(), "every batch entry failed, splitting");
            return self.bisect(calls).await;
        }

        let retry_calls: Vec<RpcCall> = failed.iter().map(|&i| calls[i].clone()).collect();
        let retried = self.dispatch(retry_calls).await?;
        for (&i, value) in failed.iter().zip(retried) {
            results[i] = Some(value);
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Split the batch in half, pause, and recurse on each half.
    async fn bisect(&self, calls: Vec<RpcCall>) -> Result<Vec<Value>> {
        if calls.len() == 1 {
            return self.send_individually(&calls).await;
        }

        sleep(SPLIT_PAUSE).await;

        let middle = calls.len() / 2;
        let (left, right) = calls.split_at(middle);
        let mut results = self.dispatch(left.to_vec()).await?;
        results.extend(self.dispatch(right.to_vec()).await?);
        Ok(results)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Detect the log retriever's reorg-witness packet.
///
/// The packet is a two- or three-entry batch with exactly one `eth_getLogs`
/// bracketed by `eth_getBlockByNumber` calls. It must reach the node in one
/// piece so the block bodies witness the same chain state as the logs.
#[must_use]
pub fn is_reorg_witness_packet(calls: &[RpcCall]) -> bool {
    let logs_entries = calls.iter().filter(|c| c.is_get_logs()).count();
    let block_entries = calls
        .iter()
        .filter(|c| c.method == "eth_getBlockByNumber")
        .count();

    matches!(calls.len(), 2 | 3)
        && logs_entries == 1
        && block_entries == calls.len() - 1
        && calls
            .last()
            .is_some_and(|c| c.method == "eth_getBlockByNumber")
}

/// A `null` block body means the node has not caught up to that block.
fn check_null_block(call: &RpcCall, value: &Value) -> Result<()> {
    if call.is_get_block() && value.is_null() {
        return Err(RpcError::UnknownBlock(format!(
            "{} returned null for {}",
            call.method, call.params
        )));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mock::MockTransport;

    fn gas_price_calls(n: usize) -> Vec<RpcCall> {
        (0..n).map(|_| RpcCall::new("eth_gasPrice", json!([]))).collect()
    }

    #[tokio::test]
    async fn empty_batch_makes_no_requests() {
        let transport = Arc::new(MockTransport::new(|_, _| Ok(json!("0x1"))));
        let client = BatchClient::new(transport.clone(), 10, true);

        let results = client.execute(Vec::new()).await.expect("empty batch");
        assert!(results.is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn oversized_batch_is_chunked() {
        let transport = Arc::new(MockTransport::new(|_, _| Ok(json!("0x1"))));
        let client = BatchClient::new(transport.clone(), 2, true);

        let results = client.execute(gas_price_calls(5)).await.expect("batch");
        assert_eq!(results.len(), 5);
        // 5 calls at max 2 per batch: 2 + 2 + 1, the last going out individually.
        assert_eq!(transport.batch_count(), 2);
    }

    #[tokio::test]
    async fn no_batch_support_sends_individually() {
        let transport = Arc::new(MockTransport::new(|_, _| Ok(json!("0x1"))));
        let client = BatchClient::new(transport.clone(), 0, true);

        let results = client.execute(gas_price_calls(3)).await.expect("batch");
        assert_eq!(results.len(), 3);
        assert_eq!(transport.batch_count(), 0);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_transport_failure_bisects() {
        // Batches of more than one entry fail outright; singles succeed.
        let transport = Arc::new(
            MockTransport::new(|_, _| Ok(json!("0x1"))).with_batch_limit(1),
        );
        let client = BatchClient::new(transport.clone(), 10, true);

        let results = client.execute(gas_price_calls(4)).await.expect("batch");
        assert_eq!(results.len(), 4);
        // Bisection bottoms out in individual sends.
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn partial_failure_retries_only_failing_entries() {
        // The handler fails eth_getBalance entries exactly once.
        let transport = Arc::new(MockTransport::with_state(
            std::sync::Mutex::new(0u32),
            |state, method, _| {
                if method == "eth_getBalance" {
                    let mut failures = state.lock().expect("lock poisoned");
                    if *failures == 0 {
                        *failures += 1;
                        return Err(RpcError::rpc(-32000, "flaky"));
                    }
                }
                Ok(json!("0x1"))
            },
        ));
        let client = BatchClient::new(transport.clone(), 10, true);

        let calls = vec![
            RpcCall::new("eth_gasPrice", json!([])),
            RpcCall::new("eth_getBalance", json!(["0x0", "latest"])),
            RpcCall::new("eth_gasPrice", json!([])),
        ];
        let results = client.execute(calls).await.expect("batch");
        assert_eq!(results.len(), 3);
        // One full batch, then the single failing entry re-issued individually.
        assert_eq!(transport.batch_count(), 1);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn null_block_counts_as_failure() {
        let transport = Arc::new(MockTransport::new(|method, _| {
            if method == "eth_getBlockByNumber" {
                Ok(Value::Null)
            } else {
                Ok(json!("0x1"))
            }
        }));
        let client = BatchClient::new(transport, 10, false);

        let calls = vec![RpcCall::new("eth_getBlockByNumber", json!(["0x10", false]))];
        let result = client.execute(calls).await;
        assert!(matches!(result, Err(RpcError::UnknownBlock(_))));
    }

    #[tokio::test]
    async fn witness_packet_detection() {
        let logs = RpcCall::new("eth_getLogs", json!([{}]));
        let block = RpcCall::new("eth_getBlockByNumber", json!(["0x10", false]));

        assert!(is_reorg_witness_packet(&[logs.clone(), block.clone()]));
        assert!(is_reorg_witness_packet(&[
            block.clone(),
            logs.clone(),
            block.clone()
        ]));
        assert!(!is_reorg_witness_packet(&[logs.clone()]));
        assert!(!is_reorg_witness_packet(&[block.clone(), block.clone()]));
        assert!(!is_reorg_witness_packet(&[
            logs.clone(),
            block.clone(),
            block.clone(),
            block
        ]));
        // Bracket order matters: the packet always ends on the to-block body.
        assert!(!is_reorg_witness_packet(&[
            RpcCall::new("eth_getBlockByNumber", json!(["0x10", false])),
            logs
        ]));
    }

    #[tokio::test]
    async fn witness_packet_passes_through_verbatim() {
        let transport = Arc::new(MockTransport::new(|method, _| match method {
            "eth_getLogs" => Ok(json!([])),
            "eth_getBlockByNumber" => Ok(json!({
                "number": "0x10",
                "hash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
                "parentHash": "0x00000000000000000000000000000000000000000000000000000000000000a9"
            })),
            _ => Err(RpcError::rpc(-32601, "method not found")),
        }));
        let client = BatchClient::new(transport.clone(), 10, true);

        let calls = vec![
            RpcCall::new("eth_getLogs", json!([{}])),
            RpcCall::new("eth_getBlockByNumber", json!(["0x10", false])),
        ];
        let results = client.execute(calls).await.expect("packet");
        assert_eq!(results.len(), 2);
        assert_eq!(transport.batch_count(), 1);
    }

    #[tokio::test]
    async fn witness_packet_failure_is_not_retried() {
        let transport = Arc::new(MockTransport::new(|method, _| {
            if method == "eth_getLogs" {
                Err(RpcError::rpc(-32005, "range too large"))
            } else {
                Ok(json!({"number": "0x10"}))
            }
        }));
        let client = BatchClient::new(transport.clone(), 10, true);

        let calls = vec![
            RpcCall::new("eth_getLogs", json!([{}])),
            RpcCall::new("eth_getBlockByNumber", json!(["0x10", false])),
        ];
        let result = client.execute(calls).await;
        assert!(result.is_err());
        assert_eq!(transport.batch_count(), 1);
        assert_eq!(transport.request_count(), 0);
    }
}
