//! Request and response types shared across the client.

use alloy::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Symbolic block tags understood by every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// Most recent block.
    Latest,
    /// Genesis block.
    Earliest,
    /// Pending block (not yet mined).
    Pending,
    /// Most recent safe block.
    Safe,
    /// Most recent finalized block.
    Finalized,
}

impl BlockTag {
    /// Wire representation of this tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Earliest => "earliest",
            Self::Pending => "pending",
            Self::Safe => "safe",
            Self::Finalized => "finalized",
        }
    }
}

/// A block referenced by number, tag, or hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    /// Concrete block number.
    Number(u64),
    /// Symbolic tag, resolved against the node's current view.
    Tag(BlockTag),
    /// Block hash.
    Hash(B256),
}

impl BlockId {
    /// The concrete number, when this id carries one.
    #[must_use]
    pub const fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Tag(_) | Self::Hash(_) => None,
        }
    }

    /// Wire parameter for `eth_getBlockByNumber` / `eth_getBlockByHash`.
    #[must_use]
    pub fn to_param(&self) -> Value {
        match self {
            Self::Number(n) => Value::String(format!("0x{n:x}")),
            Self::Tag(tag) => Value::String(tag.as_str().to_string()),
            Self::Hash(hash) => Value::String(format!("{hash:#x}")),
        }
    }
}

impl From<u64> for BlockId {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl From<BlockTag> for BlockId {
    fn from(tag: BlockTag) -> Self {
        Self::Tag(tag)
    }
}

impl From<B256> for BlockId {
    fn from(hash: B256) -> Self {
        Self::Hash(hash)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK SUMMARY
// ═══════════════════════════════════════════════════════════════════════════════

/// The projection of a block body the client cares about.
///
/// Block bodies are fetched for two reasons only: resolving symbolic bounds
/// to numbers, and witnessing chain identity via hashes. Everything else in
/// the body is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    /// Block number.
    #[serde(with = "alloy::serde::quantity")]
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Hash of the parent block.
    pub parent_hash: B256,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALL REQUEST
// ═══════════════════════════════════════════════════════════════════════════════

/// Parameters for `eth_call` / `eth_estimateGas`.
///
/// # Example
///
/// ```
/// use evm_client::CallRequest;
/// use alloy::primitives::{Address, Bytes};
///
/// let request = CallRequest::new()
///     .to(Address::ZERO)
///     .data(Bytes::from(vec![0xde, 0xad]));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Sender address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    /// Target address; `None` for a contract-creation call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,

    /// Gas limit.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy::serde::quantity::opt")]
    pub gas: Option<u64>,

    /// Gas price in wei.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,

    /// Value in wei.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,

    /// Call data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,

    /// Sender nonce.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy::serde::quantity::opt")]
    pub nonce: Option<u64>,
}

impl CallRequest {
    /// Create an empty call request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender address.
    #[must_use]
    pub const fn from_address(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the target address.
    #[must_use]
    pub const fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    /// Set the call data.
    #[must_use]
    pub fn data(mut self, data: Bytes) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the value.
    #[must_use]
    pub const fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the nonce.
    #[must_use]
    pub const fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
