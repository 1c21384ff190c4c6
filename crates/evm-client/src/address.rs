//! Address utilities: CREATE prediction, checksum caching, mapping slots.

use std::collections::VecDeque;
use std::sync::{LazyLock, Mutex};

use alloy::primitives::{Address, U256, keccak256};
use dashmap::DashMap;

/// Environment variable bounding the checksum memo.
pub const CHECKSUM_CACHE_SIZE_ENV: &str = "CHECKSUM_CACHE_SIZE";

/// Default bound on the checksum memo.
pub const DEFAULT_CHECKSUM_CACHE_SIZE: usize = 16_384;

// ═══════════════════════════════════════════════════════════════════════════════
// CREATE ADDRESS PREDICTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Address of the contract a sender deploys with the given nonce.
///
/// `keccak256(rlp([sender, nonce]))[12..]`.
#[must_use]
pub fn create_address(sender: Address, nonce: u64) -> Address {
    sender.create(nonce)
}

/// Address a pre-deployed contract lands on when deployed *through* a runner.
///
/// The caller's `eth_call` deploys the runner at `create(caller, nonce)`, and
/// the runner's first own deployment lands at `create(runner, 1)`.
#[must_use]
pub fn undeployed_contract_address(caller: Address, nonce: u64) -> Address {
    create_address(create_address(caller, nonce), 1)
}

/// Storage slot of `mapping[key]` for a mapping rooted at `slot`.
///
/// Solidity stores mapping entries at `keccak256(key ++ slot)`.
#[must_use]
pub fn mapping_slot(slot: U256, key: U256) -> U256 {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(&key.to_be_bytes::<32>());
    preimage[32..].copy_from_slice(&slot.to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(preimage).0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKSUM CACHE
// ═══════════════════════════════════════════════════════════════════════════════

struct ChecksumCache {
    entries: DashMap<Address, String>,
    order: Mutex<VecDeque<Address>>,
    capacity: usize,
}

static CHECKSUMS: LazyLock<ChecksumCache> = LazyLock::new(|| {
    let capacity = std::env::var(CHECKSUM_CACHE_SIZE_ENV)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_CHECKSUM_CACHE_SIZE);
    ChecksumCache {
        entries: DashMap::new(),
        order: Mutex::new(VecDeque::new()),
        capacity,
    }
});

/// EIP-55 checksum rendering with process-wide memoization.
///
/// Indexers render the same handful of hot contract addresses millions of
/// times; the keccak behind EIP-55 dominates that path without a cache.
#[must_use]
pub fn to_checksum_cached(address: Address) -> String {
    if let Some(cached) = CHECKSUMS.entries.get(&address) {
        return cached.value().clone();
    }

    let rendered = address.to_checksum(None);

    let evicted = {
        let Ok(mut order) = CHECKSUMS.order.lock() else {
            return rendered;
        };
        if !CHECKSUMS.entries.contains_key(&address) {
            order.push_back(address);
        }
        if order.len() > CHECKSUMS.capacity {
            order.pop_front()
        } else {
            None
        }
    };
    if let Some(old) = evicted {
        CHECKSUMS.entries.remove(&old);
    }
    CHECKSUMS.entries.insert(address, rendered.clone());

    rendered
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
