//! Shared test support: a scripted in-memory node.
//!
//! [`ScriptedNode`] implements enough of a JSON-RPC node to drive the
//! client end-to-end: the capability-probe surface, block bodies with a
//! consistent (and optionally broken) parent-hash chain, per-block logs,
//! and a pluggable `eth_call` handler for the multicall scenarios.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::{B256, U256};
use alloy::rpc::types::Log;
use evm_client::artifacts::{OVERRIDE_PROBE_ADDRESS, REVERT_PROBE_INITCODE, REVERT_PROBE_REASON};
use evm_client::{ClientConfig, EvmClient};
use evm_rpc::RpcError;
use evm_rpc::mock::MockTransport;
use serde_json::{Value, json};

/// Chain id every scripted node reports.
pub const CHAIN_ID: u64 = 31_337;

/// Offset making block hashes distinct from small numeric values.
const HASH_OFFSET: u64 = 1 << 32;

/// Handler for `eth_call` requests that are not probe traffic.
pub type CallHandler = Box<dyn Fn(&Value) -> Result<Value, RpcError> + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════════
// SCRIPTED NODE
// ═══════════════════════════════════════════════════════════════════════════════

/// A deterministic fake node.
pub struct ScriptedNode {
    /// Head block number.
    pub head: u64,
    /// Widest span the zero-address probe queries are allowed.
    pub probe_span: u64,
    /// Widest span non-probe `eth_getLogs` queries are allowed.
    pub max_span: u64,
    /// Largest batch the transport accepts.
    pub batch_limit: usize,
    /// Whether the revert probe sees a faithful reason.
    pub revert_fidelity: bool,
    /// Whether state at block 1 is served.
    pub archive_state: bool,
    /// Whether the state-override probe succeeds.
    pub overrides_support: bool,
    /// Number of logs per block.
    pub logs: BTreeMap<u64, usize>,
    /// Block whose parent hash is corrupted, simulating a fork.
    pub broken_parent_at: Option<u64>,
    /// Handler for non-probe `eth_call`s.
    pub call_handler: Option<CallHandler>,
}

impl Default for ScriptedNode {
    fn default() -> Self {
        Self {
            head: 2_000,
            probe_span: 1_000,
            max_span: u64::MAX,
            batch_limit: 100,
            revert_fidelity: true,
            archive_state: true,
            overrides_support: true,
            logs: BTreeMap::new(),
            broken_parent_at: None,
            call_handler: None,
        }
    }
}

impl ScriptedNode {
    /// Give every block in `[from, to]` exactly one log.
    pub fn with_one_log_per_block(mut self, from: u64, to: u64) -> Self {
        for number in from..=to {
            self.logs.insert(number, 1);
        }
        self
    }

    /// Wrap this node into a mock transport.
    pub fn into_transport(self) -> Arc<MockTransport> {
        let batch_limit = self.batch_limit;
        Arc::new(
            MockTransport::new(move |method, params| self.respond(method, params))
                .with_batch_limit(batch_limit),
        )
    }

    fn respond(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "eth_chainId" => Ok(json!(format!("0x{CHAIN_ID:x}"))),
            "eth_blockNumber" => Ok(json!(format!("0x{:x}", self.head))),
            "eth_gasPrice" => Ok(json!("0x3b9aca00")),
            "eth_getBlockByNumber" => {
                let number = match params[0].as_str() {
                    Some("latest") => self.head,
                    Some("earliest") => 0,
                    Some(raw) => parse_hex_str(raw)?,
                    None => {
                        return Err(RpcError::InvalidResponse("bad block parameter".into()));
                    }
                };
                if number > self.head {
                    return Ok(Value::Null);
                }
                Ok(self.block_body(number))
            }
            "eth_getBlockByHash" => {
                let raw = params[0]
                    .as_str()
                    .ok_or_else(|| RpcError::InvalidResponse("bad hash parameter".into()))?;
                let hash: B256 = raw
                    .parse()
                    .map_err(|_| RpcError::InvalidResponse("bad hash parameter".into()))?;
                match block_number_of(hash) {
                    Some(number) if number <= self.head => Ok(self.block_body(number)),
                    _ => Ok(Value::Null),
                }
            }
            "eth_getLogs" => self.serve_logs(&params[0]),
            "eth_call" => self.serve_call(params),
            other => Err(RpcError::rpc(-32601, format!("unknown method {other}"))),
        }
    }

    fn serve_logs(&self, filter: &Value) -> Result<Value, RpcError> {
        if let Some(raw) = filter.get("blockHash").and_then(Value::as_str) {
            let hash: B256 = raw
                .parse()
                .map_err(|_| RpcError::InvalidResponse("bad blockHash".into()))?;
            let number = block_number_of(hash)
                .filter(|n| *n <= self.head)
                .ok_or_else(|| RpcError::UnknownBlock(format!("unknown block {raw}")))?;
            return Ok(self.logs_between(number, number));
        }

        let from = parse_hex(&filter["fromBlock"])?;
        let to = parse_hex(&filter["toBlock"])?;
        let span = to - from + 1;

        let is_probe = filter.get("address").and_then(Value::as_str)
            == Some("0x0000000000000000000000000000000000000000");
        if is_probe {
            return if span <= self.probe_span {
                Ok(json!([]))
            } else {
                Err(RpcError::rpc(-32005, "block range too wide"))
            };
        }

        if span > self.max_span {
            return Err(RpcError::rpc(-32005, "block range too wide"));
        }
        Ok(self.logs_between(from, to))
    }

    fn serve_call(&self, params: &Value) -> Result<Value, RpcError> {
        let request = &params[0];
        let data = request.get("data").and_then(Value::as_str).unwrap_or("0x");

        // Revert-fidelity probe: the characteristic initcode, no target.
        if data == format!("0x{}", hex::encode(&REVERT_PROBE_INITCODE)) {
            return if self.revert_fidelity {
                Err(RpcError::revert(REVERT_PROBE_REASON))
            } else {
                Err(RpcError::rpc(-32000, "execution failed"))
            };
        }

        // Archive probe: a call pinned at block 1.
        if params.get(1) == Some(&json!("0x1")) {
            return if self.archive_state {
                Ok(json!("0x"))
            } else {
                Err(RpcError::rpc(-32000, "missing trie node"))
            };
        }

        // State-override probe: targets the fixed probe address.
        if request.get("to").and_then(Value::as_str)
            == Some(format!("{OVERRIDE_PROBE_ADDRESS:#x}").as_str())
        {
            return if self.overrides_support {
                Ok(json!(format!(
                    "{:#x}",
                    evm_client::artifacts::override_probe_expected()
                )))
            } else {
                Err(RpcError::rpc(-32602, "state override not supported"))
            };
        }

        match &self.call_handler {
            Some(handler) => handler(params),
            None => Err(RpcError::rpc(-32000, "no call handler scripted")),
        }
    }

    fn block_body(&self, number: u64) -> Value {
        json!({
            "number": format!("0x{number:x}"),
            "hash": format!("{:#x}", block_hash(number)),
            "parentHash": format!("{:#x}", self.parent_hash(number)),
        })
    }

    fn parent_hash(&self, number: u64) -> B256 {
        if self.broken_parent_at == Some(number) {
            return B256::repeat_byte(0xfa);
        }
        if number == 0 {
            return B256::ZERO;
        }
        block_hash(number - 1)
    }

    fn logs_between(&self, from: u64, to: u64) -> Value {
        let mut logs = Vec::new();
        for number in from..=to {
            for index in 0..self.logs.get(&number).copied().unwrap_or(0) {
                logs.push(log_json(number, index));
            }
        }
        json!(logs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Deterministic hash of a scripted block.
pub fn block_hash(number: u64) -> B256 {
    B256::from(U256::from(number + HASH_OFFSET))
}

/// Inverse of [`block_hash`].
pub fn block_number_of(hash: B256) -> Option<u64> {
    let value = U256::from_be_bytes(hash.0);
    if value > U256::from(u64::MAX) {
        return None;
    }
    value.to::<u64>().checked_sub(HASH_OFFSET)
}

/// One scripted log in node wire shape.
pub fn log_json(number: u64, index: usize) -> Value {
    json!({
        "address": "0x900101d06a7426441ae63e9ab3b9b0f63be145f1",
        "topics": [],
        "data": "0x",
        "blockNumber": format!("0x{number:x}"),
        "blockHash": format!("{:#x}", block_hash(number)),
        "transactionHash": format!("0x{number:064x}"),
        "transactionIndex": "0x0",
        "logIndex": format!("0x{index:x}"),
        "removed": false
    })
}

fn parse_hex(value: &Value) -> Result<u64, RpcError> {
    value
        .as_str()
        .ok_or_else(|| RpcError::InvalidResponse(format!("expected hex string, got {value}")))
        .and_then(parse_hex_str)
}

fn parse_hex_str(raw: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|_| RpcError::InvalidResponse(format!("bad hex quantity {raw}")))
}

/// Configuration suitable for scripted tests: no external services.
pub fn test_config() -> ClientConfig {
    ClientConfig::default().without_external_archive()
}

/// Connect a client to a scripted node.
pub async fn connect(node: ScriptedNode, config: ClientConfig) -> (Arc<MockTransport>, EvmClient) {
    let transport = node.into_transport();
    let client = EvmClient::connect_with_transport(transport.clone(), config)
        .await
        .expect("connect failed");
    (transport, client)
}

/// The `(from, to)` ranges of all non-probe `eth_getLogs` range queries
/// recorded from `skip` onwards.
pub fn recorded_log_ranges(transport: &MockTransport, skip: usize) -> Vec<(u64, u64)> {
    transport
        .recorded()
        .into_iter()
        .skip(skip)
        .filter(|call| call.method == "eth_getLogs")
        .filter_map(|call| {
            let filter = &call.params[0];
            if filter.get("blockHash").is_some() {
                return None;
            }
            if filter.get("address").and_then(Value::as_str)
                == Some("0x0000000000000000000000000000000000000000")
            {
                return None;
            }
            let from = parse_hex(&filter["fromBlock"]).ok()?;
            let to = parse_hex(&filter["toBlock"]).ok()?;
            Some((from, to))
        })
        .collect()
}

/// Number of by-hash `eth_getLogs` queries recorded from `skip` onwards.
pub fn recorded_by_hash_log_queries(transport: &MockTransport, skip: usize) -> usize {
    transport
        .recorded()
        .into_iter()
        .skip(skip)
        .filter(|call| {
            call.method == "eth_getLogs" && call.params[0].get("blockHash").is_some()
        })
        .count()
}

/// Assert logs cover exactly one log per block over `[from, to]`, in order.
pub fn assert_one_log_per_block(logs: &[Log], from: u64, to: u64) {
    let numbers: Vec<u64> = logs.iter().filter_map(|log| log.block_number).collect();
    let expected: Vec<u64> = (from..=to).collect();
    assert_eq!(numbers, expected, "logs must cover every block exactly once, in order");

    let mut keys: Vec<(u64, u64)> = logs
        .iter()
        .map(|log| {
            (
                log.block_number.expect("block number"),
                log.log_index.expect("log index"),
            )
        })
        .collect();
    let sorted = {
        let mut clone = keys.clone();
        clone.sort_unstable();
        clone
    };
    assert_eq!(keys, sorted, "logs must be ordered by (block_number, log_index)");
    keys.dedup();
    assert_eq!(keys.len(), logs.len(), "logs must not contain duplicates");
}
