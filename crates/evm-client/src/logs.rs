//! Adaptive log retrieval.
//!
//! `get_logs` turns one wide, caller-friendly filter into whatever sequence
//! of node requests this particular endpoint can actually serve:
//!
//! - ranges wider than the probed cap are split into cap-sized chunks;
//! - anything the node still chokes on is bisected until it works (or a
//!   single block remains, at which point the retry engine takes over);
//! - wide historic ranges are offloaded to the external archive when one
//!   indexes this chain;
//! - ranges touching the unstable head window are upgraded to per-block
//!   by-hash queries with parent-hash chain verification;
//! - caller-supplied witness hashes pin the chain identity of the range
//!   boundaries, and any mismatch surfaces as `ForkedBlock`.
//!
//! Results are always in ascending `(block_number, log_index)` order: every
//! strategy covers disjoint contiguous sub-ranges in order, so concatenation
//! preserves it.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use evm_archive::LogSelection;
use evm_rpc::retry::with_retry;
use evm_rpc::{RpcCall, RpcError};
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use crate::client::EvmClient;
use crate::error::{ClientError, Result};
use crate::types::{BlockId, BlockSummary, BlockTag};

/// Callback receiving the number of newly covered blocks.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Blocks below the observed head a range must start at before the archive
/// is considered.
const ARCHIVE_MIN_LAG: u64 = 1_000;

// ═══════════════════════════════════════════════════════════════════════════════
// FILTER SPECIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// One topic position of a log filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    /// The topic must equal this hash.
    Exact(B256),
    /// The topic must equal one of these hashes.
    AnyOf(Vec<B256>),
}

/// A log filter over a block range or a single block.
///
/// Either `block_hash` or a `from_block`/`to_block` range is given, never
/// both. The optional witness hashes pin the expected chain identity of the
/// range boundaries: `to_block_hash` is the hash the to-block must still
/// have, `from_block_parent_hash` is the parent the from-block must still
/// link to. A node answering with different blocks fails the query with
/// [`ClientError::ForkedBlock`].
///
/// # Example
///
/// ```
/// use evm_client::{FilterSpec, TopicFilter};
/// use alloy::primitives::{Address, B256};
///
/// let filter = FilterSpec::range(50, 100)
///     .with_address(Address::ZERO)
///     .with_topic(0, TopicFilter::Exact(B256::ZERO));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    /// Emitting contracts to match; empty = all.
    pub address: Vec<Address>,
    /// Topic constraints by position.
    pub topics: [Option<TopicFilter>; 4],
    /// Lower range bound (inclusive).
    pub from_block: Option<BlockId>,
    /// Upper range bound (inclusive).
    pub to_block: Option<BlockId>,
    /// Single-block query by hash.
    pub block_hash: Option<B256>,
    /// Witness: expected parent hash of the from-block.
    pub from_block_parent_hash: Option<B256>,
    /// Witness: expected hash of the to-block.
    pub to_block_hash: Option<B256>,
}

impl FilterSpec {
    /// Filter over an inclusive block range.
    #[must_use]
    pub fn range(from: impl Into<BlockId>, to: impl Into<BlockId>) -> Self {
        Self {
            from_block: Some(from.into()),
            to_block: Some(to.into()),
            ..Self::default()
        }
    }

    /// Filter over a single block identified by hash.
    #[must_use]
    pub fn at_block_hash(hash: B256) -> Self {
        Self {
            block_hash: Some(hash),
            ..Self::default()
        }
    }

    /// Match only this emitting contract.
    #[must_use]
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = vec![address];
        self
    }

    /// Match any of these emitting contracts.
    #[must_use]
    pub fn with_addresses(mut self, addresses: Vec<Address>) -> Self {
        self.address = addresses;
        self
    }

    /// Constrain one topic position (0-3). Positions ≥ 4 are ignored.
    #[must_use]
    pub fn with_topic(mut self, position: usize, topic: TopicFilter) -> Self {
        if let Some(slot) = self.topics.get_mut(position) {
            *slot = Some(topic);
        }
        self
    }

    /// Pin the expected parent hash of the from-block.
    #[must_use]
    pub const fn with_from_block_parent_hash(mut self, hash: B256) -> Self {
        self.from_block_parent_hash = Some(hash);
        self
    }

    /// Pin the expected hash of the to-block.
    #[must_use]
    pub const fn with_to_block_hash(mut self, hash: B256) -> Self {
        self.to_block_hash = Some(hash);
        self
    }

    // ───────────────────────────────────────────────────────────────────────────
    // WIRE & ARCHIVE PROJECTIONS
    // ───────────────────────────────────────────────────────────────────────────

    /// Address/topic part of the `eth_getLogs` parameter object.
    fn base_object(&self) -> Map<String, Value> {
        let mut object = Map::new();

        match self.address.len() {
            0 => {}
            1 => {
                object.insert("address".into(), json!(format!("{:#x}", self.address[0])));
            }
            _ => {
                let rendered: Vec<String> =
                    self.address.iter().map(|a| format!("{a:#x}")).collect();
                object.insert("address".into(), json!(rendered));
            }
        }

        let last_set = self.topics.iter().rposition(Option::is_some);
        if let Some(last) = last_set {
            let rendered: Vec<Value> = self.topics[..=last]
                .iter()
                .map(|topic| match topic {
                    None => Value::Null,
                    Some(TopicFilter::Exact(hash)) => json!(format!("{hash:#x}")),
                    Some(TopicFilter::AnyOf(hashes)) => {
                        json!(hashes.iter().map(|h| format!("{h:#x}")).collect::<Vec<_>>())
                    }
                })
                .collect();
            object.insert("topics".into(), Value::Array(rendered));
        }

        object
    }

    /// `eth_getLogs` parameters for a numeric range.
    pub(crate) fn range_params(&self, from: u64, to: u64) -> Value {
        let mut object = self.base_object();
        object.insert("fromBlock".into(), json!(format!("0x{from:x}")));
        object.insert("toBlock".into(), json!(format!("0x{to:x}")));
        json!([object])
    }

    /// `eth_getLogs` parameters for a by-hash query.
    pub(crate) fn hash_params(&self, hash: B256) -> Value {
        let mut object = self.base_object();
        object.insert("blockHash".into(), json!(format!("{hash:#x}")));
        json!([object])
    }

    /// Archive-side projection of the address/topic constraints.
    pub(crate) fn selection(&self) -> LogSelection {
        let mut selection = LogSelection::any().with_addresses(&self.address);
        for (position, topic) in self.topics.iter().enumerate() {
            match topic {
                None => {}
                Some(TopicFilter::Exact(hash)) => {
                    selection = selection.with_topic(position, std::slice::from_ref(hash));
                }
                Some(TopicFilter::AnyOf(hashes)) => {
                    selection = selection.with_topic(position, hashes);
                }
            }
        }
        selection
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Switches for one `get_logs` call.
#[derive(Clone)]
pub struct GetLogsOptions {
    /// Surface the first error instead of retrying leaf requests.
    pub no_retry: bool,

    /// Allow offloading the historic part of the range to the external
    /// archive (when one indexes this chain).
    pub use_external_archive: bool,

    /// Progress callback, invoked with newly covered block counts.
    pub progress: Option<ProgressFn>,
}

impl Default for GetLogsOptions {
    fn default() -> Self {
        Self {
            no_retry: false,
            use_external_archive: true,
            progress: None,
        }
    }
}

impl fmt::Debug for GetLogsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetLogsOptions")
            .field("no_retry", &self.no_retry)
            .field("use_external_archive", &self.use_external_archive)
            .field("progress", &self.progress.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl GetLogsOptions {
    /// Disable leaf-request retries.
    #[must_use]
    pub fn without_retry(mut self) -> Self {
        self.no_retry = true;
        self
    }

    /// Disable archive offloading for this call.
    #[must_use]
    pub fn without_external_archive(mut self) -> Self {
        self.use_external_archive = false;
        self
    }

    /// Report progress through the given callback.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, blocks: u64) {
        if let Some(progress) = &self.progress {
            progress(blocks);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RANGE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// One contiguous sub-range with the witnesses that still apply to it.
#[derive(Debug, Clone, Copy)]
struct Range {
    from: u64,
    to: u64,
    from_parent: Option<B256>,
    to_hash: Option<B256>,
}

impl Range {
    const fn num_blocks(&self) -> u64 {
        self.to - self.from + 1
    }
}

/// What the archive contributed to a range.
enum ArchiveOutcome {
    /// The archive covered everything.
    Complete(Vec<Log>),
    /// The archive covered a prefix; continue from `next` via RPC.
    Partial { logs: Vec<Log>, next: u64 },
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOG RETRIEVAL
// ═══════════════════════════════════════════════════════════════════════════════

impl EvmClient {
    /// Fetch logs for an arbitrary filter, adapting to the node's limits.
    ///
    /// Returned logs are in ascending `(block_number, log_index)` order.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Unsupported`] when the node answers no `eth_getLogs`
    ///   at all (probed `filter_block_range` of 0).
    /// - [`ClientError::InvalidFilter`] for contradictory specifications.
    /// - [`ClientError::ForkedBlock`] when a witness hash stops matching.
    /// - Transport errors that survive bisection and retrying.
    #[instrument(skip(self, filter, options))]
    pub async fn get_logs(&self, filter: FilterSpec, options: GetLogsOptions) -> Result<Vec<Log>> {
        if self.capabilities.filter_block_range == 0 {
            return Err(ClientError::Unsupported(
                "node does not support eth_getLogs".into(),
            ));
        }

        // (A) Single block by hash: no range logic at all.
        if let Some(hash) = filter.block_hash {
            if filter.from_block.is_some() || filter.to_block.is_some() {
                return Err(ClientError::InvalidFilter(
                    "blockHash excludes fromBlock/toBlock".into(),
                ));
            }
            return self.get_logs_inner(filter.hash_params(hash), options.no_retry).await;
        }

        // (B) Resolve symbolic bounds, keeping the resolved bodies as
        // witnesses where the caller supplied none.
        let mut from_parent = filter.from_block_parent_hash;
        let mut to_hash = filter.to_block_hash;

        let from = match filter.from_block {
            Some(BlockId::Number(number)) => number,
            other => {
                if from_parent.is_some() {
                    return Err(ClientError::InvalidFilter(
                        "fromBlockParentHash requires a numeric fromBlock".into(),
                    ));
                }
                let body = self
                    .get_block_inner(
                        other.unwrap_or(BlockId::Tag(BlockTag::Earliest)),
                        options.no_retry,
                    )
                    .await?;
                from_parent = Some(body.parent_hash);
                body.number
            }
        };

        let to = match filter.to_block {
            Some(BlockId::Number(number)) => number,
            other => {
                if to_hash.is_some() {
                    return Err(ClientError::InvalidFilter(
                        "toBlockHash requires a numeric toBlock".into(),
                    ));
                }
                let body = self
                    .get_block_inner(
                        other.unwrap_or(BlockId::Tag(BlockTag::Latest)),
                        options.no_retry,
                    )
                    .await?;
                to_hash = Some(body.hash);
                body.number
            }
        };

        if to < from {
            return Err(ClientError::InvalidFilter(format!(
                "from block after to block, from={from}, to={to}"
            )));
        }

        self.fetch_range(
            &filter,
            &options,
            Range { from, to, from_parent, to_hash },
            options.use_external_archive,
        )
        .await
    }

    /// Recursive range dispatcher; see the module docs for the strategy
    /// order.
    fn fetch_range<'a>(
        &'a self,
        filter: &'a FilterSpec,
        options: &'a GetLogsOptions,
        range: Range,
        use_archive: bool,
    ) -> BoxFuture<'a, Result<Vec<Log>>> {
        Box::pin(async move {
            let num_blocks = range.num_blocks();

            // (C) Single block with a hash witness: by-hash query avoids any
            // reorg ambiguity at the head.
            if num_blocks == 1 {
                if let Some(hash) = range.to_hash {
                    let logs = self
                        .get_logs_inner(filter.hash_params(hash), options.no_retry)
                        .await?;
                    options.report(1);
                    return Ok(logs);
                }
            }

            // (D) Offload the historic part to the external archive.
            if use_archive
                && self.archive.is_some()
                && range.from.saturating_add(ARCHIVE_MIN_LAG) < self.latest_seen_block()
            {
                // One archive attempt per get_logs call: every recursion
                // below continues with the archive disabled.
                match self.try_archive(filter, options, range).await? {
                    Some(ArchiveOutcome::Complete(logs)) => return Ok(logs),
                    Some(ArchiveOutcome::Partial { mut logs, next }) => {
                        let rest = Range {
                            from: next,
                            to: range.to,
                            from_parent: if next == range.from { range.from_parent } else { None },
                            to_hash: range.to_hash,
                        };
                        logs.extend(self.fetch_range(filter, options, rest, false).await?);
                        return Ok(logs);
                    }
                    None => return self.fetch_range(filter, options, range, false).await,
                }
            }

            // (E) Single block, plain.
            if num_blocks == 1 {
                let logs = self
                    .get_logs_inner(filter.range_params(range.from, range.to), options.no_retry)
                    .await?;
                options.report(1);
                return Ok(logs);
            }

            // (F) Split at the probed cap.
            let cap = self.capabilities.filter_block_range;
            if num_blocks > cap {
                let mut logs = Vec::new();
                let mut start = range.from;
                while start <= range.to {
                    let end = range.to.min(start + cap - 1);
                    let chunk = Range {
                        from: start,
                        to: end,
                        from_parent: if start == range.from { range.from_parent } else { None },
                        to_hash: if end == range.to { range.to_hash } else { None },
                    };
                    logs.extend(self.fetch_range(filter, options, chunk, use_archive).await?);
                    start = end + 1;
                }
                return Ok(logs);
            }

            // Chain-head safety: blocks inside the unstable window may be
            // missing or reorged on this node; enumerate them by hash. Runs
            // after cap-splitting, so at most one cap-sized chunk near the
            // head pays for per-block queries.
            let head = self.latest_seen_block();
            if range.to > head.saturating_sub(self.config.unstable_blocks) {
                return self.fetch_unstable_by_hash(filter, options, range).await;
            }

            // (G) Batched fetch with reorg witnesses; bisect on failure.
            match self.fetch_with_witness(filter, range).await {
                Ok(logs) => {
                    options.report(num_blocks);
                    Ok(logs)
                }
                Err(error) if error.is_terminal() => Err(error),
                Err(error) => {
                    warn!(
                        from = range.from,
                        to = range.to,
                        error = %error,
                        "eth_getLogs range failed, splitting"
                    );
                    let mid = range.from + (range.to - range.from) / 2;
                    let left = Range {
                        from: range.from,
                        to: mid,
                        from_parent: range.from_parent,
                        to_hash: None,
                    };
                    let right = Range {
                        from: mid + 1,
                        to: range.to,
                        from_parent: None,
                        to_hash: range.to_hash,
                    };
                    let mut logs = self.fetch_range(filter, options, left, use_archive).await?;
                    logs.extend(self.fetch_range(filter, options, right, use_archive).await?);
                    Ok(logs)
                }
            }
        })
    }

    /// One `eth_getLogs` leaf request through the retry engine.
    async fn get_logs_inner(&self, params: Value, no_retry: bool) -> Result<Vec<Log>> {
        let call = RpcCall::new("eth_getLogs", params);
        let no_retry = no_retry || !self.config.should_retry;
        let value = with_retry("eth_getLogs", no_retry, || self.transport.send(&call)).await?;
        Ok(serde_json::from_value(value).map_err(RpcError::from)?)
    }

    /// The reorg-witness packet: block bodies bracketing the log query in
    /// one batch, validated against the witnesses.
    async fn fetch_with_witness(&self, filter: &FilterSpec, range: Range) -> Result<Vec<Log>> {
        let mut calls = Vec::with_capacity(3);
        if range.from_parent.is_some() {
            calls.push(RpcCall::new(
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", range.from), false]),
            ));
        }
        calls.push(RpcCall::new(
            "eth_getLogs",
            filter.range_params(range.from, range.to),
        ));
        calls.push(RpcCall::new(
            "eth_getBlockByNumber",
            json!([format!("0x{:x}", range.to), false]),
        ));

        let mut values = self.batch.execute(calls).await?;

        let to_body = pop_block(&mut values)?;
        let logs_value = values
            .pop()
            .ok_or_else(|| RpcError::InvalidResponse("witness packet came back short".into()))?;

        if to_body.number != range.to {
            return Err(RpcError::InvalidResponse(format!(
                "eth_getLogs RPC returned unexpected to block number {}",
                to_body.number
            ))
            .into());
        }
        if let Some(expected) = range.to_hash {
            if to_body.hash != expected {
                return Err(ClientError::ForkedBlock { expected, actual: to_body.hash });
            }
        }

        if let Some(expected) = range.from_parent {
            let from_body = pop_block(&mut values)?;
            if from_body.number != range.from {
                return Err(RpcError::InvalidResponse(format!(
                    "eth_getLogs RPC returned unexpected from block number {}",
                    from_body.number
                ))
                .into());
            }
            if from_body.parent_hash != expected {
                return Err(ClientError::ForkedBlock {
                    expected,
                    actual: from_body.parent_hash,
                });
            }
        }

        self.observe_block(to_body.number);
        Ok(serde_json::from_value(logs_value).map_err(RpcError::from)?)
    }

    /// Per-block by-hash enumeration for ranges touching the unstable head.
    ///
    /// Fetches every block body, verifies the parent-hash chain links up,
    /// then queries each block's logs by hash, so that a node serving a
    /// different fork for some height cannot silently drop logs.
    async fn fetch_unstable_by_hash(
        &self,
        filter: &FilterSpec,
        options: &GetLogsOptions,
        range: Range,
    ) -> Result<Vec<Log>> {
        debug!(from = range.from, to = range.to, "unstable head range, enumerating by hash");

        let body_calls: Vec<RpcCall> = (range.from..=range.to)
            .map(|number| {
                RpcCall::new("eth_getBlockByNumber", json!([format!("0x{number:x}"), false]))
            })
            .collect();
        let bodies = self
            .batch
            .execute(body_calls)
            .await?
            .into_iter()
            .map(serde_json::from_value::<BlockSummary>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(RpcError::from)?;

        for (offset, body) in bodies.iter().enumerate() {
            let expected_number = range.from + offset as u64;
            if body.number != expected_number {
                return Err(RpcError::InvalidResponse(format!(
                    "asked for block {expected_number}, node answered {}",
                    body.number
                ))
                .into());
            }
            if offset > 0 {
                let parent = &bodies[offset - 1];
                if body.parent_hash != parent.hash {
                    return Err(ClientError::ForkedBlock {
                        expected: parent.hash,
                        actual: body.parent_hash,
                    });
                }
            }
        }
        if let Some(first) = bodies.first() {
            if let Some(expected) = range.from_parent {
                if first.parent_hash != expected {
                    return Err(ClientError::ForkedBlock {
                        expected,
                        actual: first.parent_hash,
                    });
                }
            }
        }
        if let Some(last) = bodies.last() {
            if let Some(expected) = range.to_hash {
                if last.hash != expected {
                    return Err(ClientError::ForkedBlock { expected, actual: last.hash });
                }
            }
            self.observe_block(last.number);
        }

        let log_calls: Vec<RpcCall> = bodies
            .iter()
            .map(|body| RpcCall::new("eth_getLogs", filter.hash_params(body.hash)))
            .collect();
        let mut logs = Vec::new();
        for value in self.batch.execute(log_calls).await? {
            let block_logs: Vec<Log> = serde_json::from_value(value).map_err(RpcError::from)?;
            logs.extend(block_logs);
        }

        options.report(range.num_blocks());
        Ok(logs)
    }

    /// One archive attempt; `Ok(None)` means "fall back to RPC".
    ///
    /// An archive answering *beyond* the requested range violates its
    /// protocol and is surfaced instead of silently trusted.
    async fn try_archive(
        &self,
        filter: &FilterSpec,
        options: &GetLogsOptions,
        range: Range,
    ) -> Result<Option<ArchiveOutcome>> {
        let Some(archive) = self.archive.as_ref() else {
            return Ok(None);
        };
        let selection = filter.selection();
        let progress = options.progress.clone();
        let progress_ref: Option<&(dyn Fn(u64) + Send + Sync)> = progress.as_deref();

        match archive
            .fetch_logs(self.chain_id, &selection, range.from, range.to, true, progress_ref)
            .await
        {
            Ok((next, logs)) => {
                if next > range.to + 1 {
                    return Err(ClientError::Archive(
                        evm_archive::ArchiveError::InvalidResponse(format!(
                            "archive returned logs up to block {}, asked for {}",
                            next - 1,
                            range.to
                        )),
                    ));
                }
                if next == range.to + 1 {
                    Ok(Some(ArchiveOutcome::Complete(logs)))
                } else {
                    Ok(Some(ArchiveOutcome::Partial { logs, next }))
                }
            }
            Err(error) if error.is_not_indexed() => {
                debug!(error = %error, "archive lags behind requested range");
                Ok(None)
            }
            Err(error) => {
                warn!(error = %error, "archive query failed, falling back to RPC");
                Ok(None)
            }
        }
    }
}

fn pop_block(values: &mut Vec<Value>) -> Result<BlockSummary> {
    let value = values
        .pop()
        .ok_or_else(|| RpcError::InvalidResponse("witness packet came back short".into()))?;
    Ok(serde_json::from_value(value).map_err(RpcError::from)?)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
