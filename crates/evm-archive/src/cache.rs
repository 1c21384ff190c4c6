//! Process-wide caches for the archive client.
//!
//! Two caches live here:
//!
//! - a bounded hex-decode memo for the bulk log-conversion path, where the
//!   same topic and data payloads repeat thousands of times per query;
//! - the look-ahead cache that parks logs a worker returned *beyond* the
//!   caller's requested range, so the next contiguous query is served
//!   without HTTP.
//!
//! Both use FIFO eviction: reads stay lock-free on the hot path, and only
//! inserts touch the small mutex that tracks insertion order.

use std::collections::VecDeque;
use std::sync::{LazyLock, Mutex};

use alloy::primitives::Bytes;
use alloy::rpc::types::Log;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{ArchiveError, Result};

/// Environment variable bounding the hex-decode memo.
pub const HEX_BYTES_CACHE_SIZE_ENV: &str = "HEX_BYTES_CACHE_SIZE";

/// Default bound on the hex-decode memo.
pub const DEFAULT_HEX_BYTES_CACHE_SIZE: usize = 16_384;

/// How many filter segments the look-ahead cache keeps.
pub const FUTURE_CACHE_MAX_FILTERS: usize = 64;

// ═══════════════════════════════════════════════════════════════════════════════
// BOUNDED FIFO MAP
// ═══════════════════════════════════════════════════════════════════════════════

/// A concurrent map with FIFO eviction once a capacity is reached.
#[derive(Debug)]
pub(crate) struct BoundedMap<V> {
    entries: DashMap<String, V>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl<V: Clone> BoundedMap<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub(crate) fn insert(&self, key: String, value: V) {
        let evicted = {
            let Ok(mut order) = self.order.lock() else {
                return;
            };
            if !self.entries.contains_key(&key) {
                order.push_back(key.clone());
            }
            if order.len() > self.capacity {
                order.pop_front()
            } else {
                None
            }
        };
        if let Some(old) = evicted {
            self.entries.remove(&old);
        }
        self.entries.insert(key, value);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEX DECODE MEMO
// ═══════════════════════════════════════════════════════════════════════════════

static HEX_BYTES: LazyLock<BoundedMap<Bytes>> = LazyLock::new(|| {
    let capacity = std::env::var(HEX_BYTES_CACHE_SIZE_ENV)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_HEX_BYTES_CACHE_SIZE);
    BoundedMap::new(capacity)
});

/// Decode a 0x-prefixed hex string, memoizing the result.
///
/// # Errors
///
/// Returns [`ArchiveError::InvalidResponse`] for non-hex input.
pub fn hex_to_bytes(value: &str) -> Result<Bytes> {
    if let Some(cached) = HEX_BYTES.get(value) {
        return Ok(cached);
    }

    let raw = value.strip_prefix("0x").unwrap_or(value);
    let bytes = Bytes::from(
        hex::decode(raw)
            .map_err(|_| ArchiveError::InvalidResponse(format!("malformed hex payload: {value}")))?,
    );
    HEX_BYTES.insert(value.to_string(), bytes.clone());
    Ok(bytes)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOOK-AHEAD CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Logs a worker returned beyond the requested range, keyed by filter.
#[derive(Debug, Clone)]
pub(crate) struct CachedSegment {
    /// First block covered by the segment (inclusive).
    pub from: u64,
    /// Last block covered by the segment (inclusive).
    pub to: u64,
    /// Logs within the segment, ascending `(block_number, log_index)`.
    pub logs: Vec<Log>,
}

/// Per-filter future-log store with FIFO eviction.
#[derive(Debug)]
pub(crate) struct FutureLogCache {
    segments: BoundedMap<CachedSegment>,
}

impl FutureLogCache {
    fn new() -> Self {
        Self {
            segments: BoundedMap::new(FUTURE_CACHE_MAX_FILTERS),
        }
    }

    fn key(chain_id: u64, fingerprint: &str) -> String {
        format!("{chain_id}:{fingerprint}")
    }

    /// Serve the prefix of `[from, to]` that a cached segment covers.
    ///
    /// Returns the served logs and the last covered block. `None` when the
    /// cache holds nothing useful for this filter and start block.
    pub(crate) fn lookup(
        &self,
        chain_id: u64,
        fingerprint: &str,
        from: u64,
        to: u64,
    ) -> Option<(Vec<Log>, u64)> {
        let segment = self.segments.get(&Self::key(chain_id, fingerprint))?;
        if from < segment.from || from > segment.to {
            return None;
        }

        let covered_to = to.min(segment.to);
        let logs: Vec<Log> = segment
            .logs
            .iter()
            .filter(|log| {
                log.block_number
                    .is_some_and(|n| n >= from && n <= covered_to)
            })
            .cloned()
            .collect();

        debug!(chain_id, from, covered_to, logs = logs.len(), "served logs from look-ahead cache");
        Some((logs, covered_to))
    }

    /// Park logs beyond a query's range for later contiguous queries.
    pub(crate) fn insert(
        &self,
        chain_id: u64,
        fingerprint: &str,
        from: u64,
        to: u64,
        logs: Vec<Log>,
    ) {
        debug!(chain_id, from, to, logs = logs.len(), "caching look-ahead logs");
        self.segments
            .insert(Self::key(chain_id, fingerprint), CachedSegment { from, to, logs });
    }
}

static FUTURE_LOGS: LazyLock<FutureLogCache> = LazyLock::new(FutureLogCache::new);

/// The process-wide look-ahead cache.
pub(crate) fn future_logs() -> &'static FutureLogCache {
    &FUTURE_LOGS
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
