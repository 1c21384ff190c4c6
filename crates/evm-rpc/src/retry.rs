//! Exponential-backoff retry engine.
//!
//! Wraps idempotent RPC operations and retries them according to the error
//! class (see [`RpcError`]):
//!
//! - decoded EVM reverts and unsupported-capability errors propagate
//!   immediately,
//! - "unknown block" errors are retried up to [`MAX_UNKNOWN_BLOCK_RETRIES`]
//!   times to let a lagging node catch up,
//! - everything else (network, 5xx, malformed envelopes, timeouts) is
//!   retried without bound.
//!
//! The waits before retry `k` (zero-based) are `0, 1, 2, 4, 8, 16, 30, 30, …`
//! seconds, capped at [`MAX_BACKOFF`].
//!
//! # Idempotency
//!
//! Only wrap idempotent operations. `eth_sendRawTransaction` is wrapped by
//! the client with the understanding that a re-broadcast of the same signed
//! payload is harmless.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::{Result, RpcError};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum wait between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How often an "unknown block" error is retried before it surfaces.
pub const MAX_UNKNOWN_BLOCK_RETRIES: u32 = 3;

// ═══════════════════════════════════════════════════════════════════════════════
// BACKOFF SCHEDULE
// ═══════════════════════════════════════════════════════════════════════════════

/// Wait before retry `retries` (zero-based).
///
/// The first retry is immediate, then the wait doubles from one second until
/// it hits the 30 second cap: `0, 1, 2, 4, 8, 16, 30, 30, …`.
#[must_use]
pub fn backoff_delay(retries: u32) -> Duration {
    match retries {
        0 => Duration::ZERO,
        1..=5 => Duration::from_secs(1 << (retries - 1)),
        _ => MAX_BACKOFF,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RETRY LOOP
// ═══════════════════════════════════════════════════════════════════════════════

/// Run `op` until it succeeds or fails terminally.
///
/// `op_name` is used for logging only. With `no_retry` the operation runs
/// exactly once and the first error surfaces. This is honored even for
/// error classes that would otherwise be retried.
///
/// # Errors
///
/// Returns the operation's error when it is terminal (revert, unsupported,
/// invalid config), when `no_retry` is set, or when an "unknown block" error
/// persists past its retry budget.
pub async fn with_retry<T, F, Fut>(op_name: &str, no_retry: bool, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if no_retry {
        return op().await;
    }

    let mut retries: u32 = 0;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.is_terminal() {
            return Err(error);
        }
        if error.is_unknown_block() && retries >= MAX_UNKNOWN_BLOCK_RETRIES {
            return Err(error);
        }

        let wait = backoff_delay(retries);
        warn!(
            op = op_name,
            error = %error,
            attempt = retries + 1,
            wait_secs = wait.as_secs(),
            "RPC operation failed, retrying"
        );

        retries += 1;
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn failing_then_ok(failures: u32) -> (Arc<AtomicU32>, impl FnMut() -> futures::future::Ready<Result<u64>>) {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let op = move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            if attempt < failures {
                futures::future::ready(Err(RpcError::Timeout))
            } else {
                futures::future::ready(Ok(42))
            }
        };
        (attempts, op)
    }

    #[test]
    fn backoff_schedule_matches_contract() {
        let delays: Vec<u64> = (0..9).map(|k| backoff_delay(k).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let (attempts, op) = failing_then_ok(4);
        let value = with_retry("eth_gasPrice", false, op).await.expect("should succeed");
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn no_retry_surfaces_first_error() {
        let (attempts, op) = failing_then_ok(1);
        let result = with_retry("eth_gasPrice", true, op).await;
        assert!(matches!(result, Err(RpcError::Timeout)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn revert_propagates_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<u64> = with_retry("eth_call", false, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Err(RpcError::revert("abc")))
        })
        .await;

        assert!(matches!(result, Err(RpcError::Revert { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_block_retried_three_times() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<u64> = with_retry("eth_getBlockByNumber", false, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Err(RpcError::UnknownBlock("block 0x10".into())))
        })
        .await;

        assert!(matches!(result, Err(RpcError::UnknownBlock(_))));
        // Initial attempt plus three retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_block_can_recover_within_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let value = with_retry("eth_getBlockByNumber", false, move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                futures::future::ready(Err(RpcError::UnknownBlock("block 0x10".into())))
            } else {
                futures::future::ready(Ok(7u64))
            }
        })
        .await
        .expect("should succeed");

        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
