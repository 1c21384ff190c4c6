//! Query and response types for the archive gateway protocol.
//!
//! A worker query is a JSON body of the shape
//!
//! ```json
//! {
//!   "fromBlock": 800,
//!   "toBlock": 850,
//!   "logs": [{"address": ["0x…"], "topic0": ["0x…"]}],
//!   "fields": {"log": {"address": true, "topics": true, "data": true,
//!              "transactionHash": true, "logIndex": true, "transactionIndex": true}}
//! }
//! ```
//!
//! and the reply is an array of block groups, each carrying a header and the
//! matching logs of that block.

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use serde::{Deserialize, Serialize};

use crate::cache::hex_to_bytes;
use crate::error::{ArchiveError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// LOG SELECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Which logs a worker should return.
///
/// Empty vectors act as wildcards. Addresses and topics are serialized as
/// lower-case hex, which is what the gateways index on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogSelection {
    /// Contract addresses to match (any-of). Empty = all addresses.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<String>,

    /// Topic 0 alternatives. Empty = wildcard.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topic0: Vec<String>,

    /// Topic 1 alternatives. Empty = wildcard.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topic1: Vec<String>,

    /// Topic 2 alternatives. Empty = wildcard.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topic2: Vec<String>,

    /// Topic 3 alternatives. Empty = wildcard.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topic3: Vec<String>,
}

impl LogSelection {
    /// Create a wildcard selection matching every log.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict the selection to the given contract addresses.
    #[must_use]
    pub fn with_addresses(mut self, addresses: &[Address]) -> Self {
        self.address = addresses
            .iter()
            .map(|a| format!("{a:#x}"))
            .collect();
        self
    }

    /// Set the alternatives for one topic position (0-3).
    ///
    /// Positions outside 0-3 are ignored; the EVM has no topic 4.
    #[must_use]
    pub fn with_topic(mut self, position: usize, topics: &[B256]) -> Self {
        let encoded: Vec<String> = topics.iter().map(|t| format!("{t:#x}")).collect();
        match position {
            0 => self.topic0 = encoded,
            1 => self.topic1 = encoded,
            2 => self.topic2 = encoded,
            3 => self.topic3 = encoded,
            _ => {}
        }
        self
    }

    /// Stable identity of this selection, used to key the look-ahead cache.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        // Serialization of this struct is deterministic (fixed field order).
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Which log fields workers should include in their reply.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFieldSelection {
    address: bool,
    topics: bool,
    data: bool,
    transaction_hash: bool,
    log_index: bool,
    transaction_index: bool,
}

impl Default for LogFieldSelection {
    fn default() -> Self {
        Self {
            address: true,
            topics: true,
            data: true,
            transaction_hash: true,
            log_index: true,
            transaction_index: true,
        }
    }
}

/// Field selection wrapper as the protocol expects it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldSelection {
    log: LogFieldSelection,
}

/// The worker query body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveQuery {
    /// First block to return (inclusive).
    pub from_block: u64,
    /// Last block to return (inclusive).
    pub to_block: u64,
    /// Log selections; a log matching any selection is returned.
    pub logs: Vec<LogSelection>,
    /// Requested log fields.
    pub fields: FieldSelection,
}

impl ArchiveQuery {
    /// Build a query for one selection over a block range.
    #[must_use]
    pub fn new(selection: LogSelection, from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            logs: vec![selection],
            fields: FieldSelection::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESPONSE
// ═══════════════════════════════════════════════════════════════════════════════

/// Header of one block group in a worker reply.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupHeader {
    /// Block number.
    pub number: u64,
    /// Block hash as 0x-prefixed hex.
    pub hash: String,
}

/// One log as returned by a worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveLog {
    /// Emitting contract address.
    pub address: String,
    /// Topic hashes.
    pub topics: Vec<String>,
    /// ABI-encoded log payload.
    pub data: String,
    /// Hash of the emitting transaction.
    pub transaction_hash: String,
    /// Position of the log within its block.
    pub log_index: u64,
    /// Position of the emitting transaction within its block.
    pub transaction_index: u64,
}

/// One block worth of logs in a worker reply.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockGroup {
    /// The block the logs belong to.
    pub header: GroupHeader,
    /// Matching logs, in log-index order.
    #[serde(default)]
    pub logs: Vec<ArchiveLog>,
}

impl BlockGroup {
    /// Convert this group into node-shaped logs.
    ///
    /// The archive never serves reorged blocks, so `removed` is always
    /// `false`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidResponse`] when hashes or payloads are
    /// not valid hex.
    pub fn to_logs(&self) -> Result<Vec<Log>> {
        let block_hash = parse_b256(&self.header.hash)?;

        self.logs
            .iter()
            .map(|log| {
                let address: Address = log
                    .address
                    .parse()
                    .map_err(|_| bad_field("address", &log.address))?;
                let topics = log
                    .topics
                    .iter()
                    .map(|t| parse_b256(t))
                    .collect::<Result<Vec<B256>>>()?;
                if topics.len() > 4 {
                    return Err(ArchiveError::InvalidResponse(format!(
                        "log carries {} topics",
                        topics.len()
                    )));
                }
                let data = hex_to_bytes(&log.data)?;

                Ok(Log {
                    inner: alloy::primitives::Log::new_unchecked(address, topics, data),
                    block_hash: Some(block_hash),
                    block_number: Some(self.header.number),
                    block_timestamp: None,
                    transaction_hash: Some(parse_b256(&log.transaction_hash)?),
                    transaction_index: Some(log.transaction_index),
                    log_index: Some(log.log_index),
                    removed: false,
                })
            })
            .collect()
    }
}

fn parse_b256(value: &str) -> Result<B256> {
    value.parse().map_err(|_| bad_field("hash", value))
}

fn bad_field(field: &str, value: &str) -> ArchiveError {
    ArchiveError::InvalidResponse(format!("malformed {field} in archive log: {value}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
