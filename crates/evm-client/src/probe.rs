//! Connection-time capability probing.
//!
//! Nodes differ wildly in what they accept: log-range caps from 10 000
//! blocks down to single blocks, batch limits from 1000 requests down to
//! none, pruned state, stripped revert data, missing state-override support.
//! Rather than discovering these limits through production failures, the
//! client pays for a handful of cheap probes at connect time and then picks
//! the right strategy statically for every subsequent request.
//!
//! Probes never abort construction: a failing probe classifies the
//! capability as absent.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, keccak256};
use evm_rpc::{RpcCall, RpcError, RpcTransport};
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::artifacts::{
    OVERRIDE_PROBE_ADDRESS, REVERT_PROBE_INITCODE, REVERT_PROBE_REASON, SLOT_GETTER_RUNTIME,
    override_probe_expected,
};
use crate::overrides::{AccountOverride, StateOverride};
use crate::types::CallRequest;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Log-range candidates, probed descending; the first accepted span wins.
pub const FILTER_RANGE_CANDIDATES: [u64; 13] = [
    10_000, 5_000, 2_000, 1_000, 500, 200, 100, 50, 20, 10, 5, 2, 1,
];

/// Batch-size candidates, probed ascending; the largest fully answered
/// batch wins.
pub const BATCH_SIZE_CANDIDATES: [usize; 10] = [1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000];

/// Pause between consecutive probe attempts.
const PROBE_PAUSE: Duration = Duration::from_millis(100);

/// Distance below the head used for the log-range probe, keeping it clear
/// of the unstable window.
const PROBE_HEAD_OFFSET: u64 = 5;

// ═══════════════════════════════════════════════════════════════════════════════
// CAPABILITIES
// ═══════════════════════════════════════════════════════════════════════════════

/// What one node empirically supports.
///
/// Determined once at connect time and read-only afterwards; see
/// [`run_probes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Upper bound (inclusive) on one `eth_getLogs` span; 0 = unsupported.
    pub filter_block_range: u64,

    /// Largest batch the node answers completely; 0 = no batching.
    pub rpc_batch_max_size: usize,

    /// Whether the node returns decodable revert reasons.
    pub revert_reason_available: bool,

    /// Whether the node serves historic state (archive node).
    pub is_archive: bool,

    /// Whether `eth_call` honors state overrides.
    pub overwrites_available: bool,

    /// Whether the external archive indexes this node's chain.
    ///
    /// Not probed here; the client fills it in from the archive manifest.
    pub external_archive_available: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROBE DRIVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Run all node probes against a fresh transport.
///
/// `head` is the node's current block number, fetched by the caller before
/// probing starts.
pub(crate) async fn run_probes(transport: &Arc<dyn RpcTransport>, head: u64) -> Capabilities {
    let filter_block_range = find_max_filter_range(transport, head).await;
    let rpc_batch_max_size = find_max_batch_size(transport).await;
    let revert_reason_available = check_revert_reason(transport).await;
    let is_archive = check_is_archive(transport).await;
    let overwrites_available = check_overwrites(transport).await;

    let capabilities = Capabilities {
        filter_block_range,
        rpc_batch_max_size,
        revert_reason_available,
        is_archive,
        overwrites_available,
        external_archive_available: false,
    };
    info!(
        url = transport.url(),
        filter_block_range,
        rpc_batch_max_size,
        revert_reason_available,
        is_archive,
        overwrites_available,
        "node capabilities probed"
    );
    capabilities
}

// ───────────────────────────────────────────────────────────────────────────
// INDIVIDUAL PROBES
// ───────────────────────────────────────────────────────────────────────────

/// Find the widest `eth_getLogs` span the node accepts.
///
/// Queries logs of the zero address, which emits none, so acceptance of
/// the span is observable without transferring any log data.
async fn find_max_filter_range(transport: &Arc<dyn RpcTransport>, head: u64) -> u64 {
    let to_block = head.saturating_sub(PROBE_HEAD_OFFSET);

    for (i, &range) in FILTER_RANGE_CANDIDATES.iter().enumerate() {
        let from_block = to_block.saturating_sub(range - 1);
        let params = json!([{
            "address": format!("{:#x}", Address::ZERO),
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": format!("0x{to_block:x}"),
        }]);

        match transport.send(&RpcCall::new("eth_getLogs", params)).await {
            Ok(Value::Array(logs)) if logs.is_empty() => {
                debug!(range, "log-range probe accepted");
                return range;
            }
            Ok(other) => {
                warn!(range, ?other, "log-range probe returned unexpected data");
            }
            Err(error) => {
                if i == FILTER_RANGE_CANDIDATES.len() - 1 {
                    warn!(error = %error, "node does not support eth_getLogs");
                }
            }
        }
        sleep(PROBE_PAUSE).await;
    }
    0
}

/// Find the largest batch the node answers completely.
async fn find_max_batch_size(transport: &Arc<dyn RpcTransport>) -> usize {
    let mut working = 0;
    for &size in &BATCH_SIZE_CANDIDATES {
        let calls = vec![RpcCall::new("eth_gasPrice", json!([])); size];
        match transport.send_batch(&calls).await {
            Ok(entries) if entries.len() == size && entries.iter().all(Result::is_ok) => {
                working = size;
            }
            Ok(_) | Err(_) => {
                if working == 0 {
                    warn!("node does not support batch requests");
                }
                break;
            }
        }
        sleep(PROBE_PAUSE).await;
    }
    working
}

/// Check whether the node preserves revert reasons.
///
/// Executes initcode whose constructor reverts with `Error("abc")`; a
/// faithful node hands the decoded reason back.
async fn check_revert_reason(transport: &Arc<dyn RpcTransport>) -> bool {
    let request = CallRequest::new().data(REVERT_PROBE_INITCODE.clone());
    let params = json!([request, "latest"]);

    match transport.send(&RpcCall::new("eth_call", params)).await {
        Ok(_) => {
            warn!("node did not revert where it should; revert reasons are unusable");
            false
        }
        Err(RpcError::Revert { reason, .. }) => {
            let available = reason.as_deref() == Some(REVERT_PROBE_REASON);
            if !available {
                warn!(?reason, "node does not return expected revert reasons");
            }
            available
        }
        Err(error) => {
            warn!(error = %error, "node does not properly return revert reasons");
            false
        }
    }
}

/// Check whether the node serves state at block 1.
async fn check_is_archive(transport: &Arc<dyn RpcTransport>) -> bool {
    let request = CallRequest::new()
        .to(Address::ZERO)
        .data(Bytes::from(vec![0u8; 32]));
    let params = json!([request, "0x1"]);

    match transport.send(&RpcCall::new("eth_call", params)).await {
        Ok(_) => true,
        Err(error) => {
            warn!(error = %error, "node does not support archive requests");
            false
        }
    }
}

/// Check whether `eth_call` honors state overrides.
///
/// Injects a getter contract plus a storage slot at a test address; the
/// call must read back the injected slot value.
async fn check_overwrites(transport: &Arc<dyn RpcTransport>) -> bool {
    let expected = override_probe_expected();
    let overrides = StateOverride::from([(
        OVERRIDE_PROBE_ADDRESS,
        AccountOverride::new()
            .with_code(SLOT_GETTER_RUNTIME.clone())
            .with_state_diff(B256::ZERO, expected),
    )]);
    let selector = Bytes::copy_from_slice(&keccak256(b"getSlot0()")[..4]);
    let request = CallRequest::new().to(OVERRIDE_PROBE_ADDRESS).data(selector);
    let params = json!([request, "latest", overrides]);

    match transport.send(&RpcCall::new("eth_call", params)).await {
        Ok(Value::String(raw)) => raw.parse::<B256>().is_ok_and(|word| word == expected),
        Ok(other) => {
            warn!(?other, "state-override probe returned unexpected data");
            false
        }
        Err(error) => {
            warn!(error = %error, "node does not support state overwrites");
            false
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
