//! Archive gateway client.
//!
//! This module provides [`ArchiveClient`], the entry point for bulk log
//! retrieval from an external indexed-log archive.
//!
//! # Protocol
//!
//! The archive is a three-hop HTTP service:
//!
//! 1. `GET <base>/archives/evm.json`: manifest mapping chain ids to
//!    gateway URLs (fetched once per process).
//! 2. `GET <gateway>/height`: highest indexed block (cached with a TTL).
//! 3. `GET <gateway>/<block>/worker`: a worker URL for that block, then
//!    `POST <worker>` with an [`ArchiveQuery`] body. Workers return a chunk
//!    of block groups and the client walks forward until the range is
//!    covered.
//!
//! # Look-ahead
//!
//! Queries ask workers for up to [`LOOKAHEAD_BLOCKS`] beyond the caller's
//! range. Whatever a worker returns past the requested `to_block` is parked
//! in a process-wide cache so the next contiguous query starts without HTTP
//! round-trips. See [`crate::cache`].

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use alloy::rpc::types::Log;

use crate::cache::future_logs;
use crate::error::{ArchiveError, Result};
use crate::types::{ArchiveQuery, BlockGroup, LogSelection};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS & CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Default manifest host.
pub const DEFAULT_BASE_URL: &str = "https://cdn.subsquid.io";

/// How far past the requested range workers are asked to read.
pub const LOOKAHEAD_BLOCKS: u64 = 100_000;

/// How long a cached archive height stays fresh.
pub const HEIGHT_TTL: Duration = Duration::from_secs(60);

/// Default timeout for archive HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable disabling the look-ahead cache.
pub const LOOKAHEAD_CACHE_ENV: &str = "DISABLE_EXTERNAL_ARCHIVE_LOOKAHEAD_CACHE";

/// Environment variable routing worker requests through the IP proxy.
pub const IP_PROXY_ENV: &str = "EXTERNAL_ARCHIVE_USE_IP_PROXY";

/// Proxy prefix used when [`IP_PROXY_ENV`] is set.
pub const DEFAULT_WORKER_PROXY: &str = "https://archive-ip-proxy.permafrost.workers.dev";

/// Configuration for [`ArchiveClient`].
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Manifest host; gateways are discovered from `<base>/archives/evm.json`.
    pub base_url: String,

    /// HTTP timeout for manifest, height, worker and query requests.
    pub timeout: Duration,

    /// Whether responses past the requested range feed the look-ahead cache.
    pub lookahead_cache: bool,

    /// Optional proxy prefix for worker URLs.
    ///
    /// When set, a worker URL `https://w.example/x` is requested as
    /// `<proxy>/https://w.example/x`.
    pub worker_proxy: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            lookahead_cache: true,
            worker_proxy: None,
        }
    }
}

impl ArchiveConfig {
    /// Build a configuration from the process environment.
    ///
    /// Honors [`LOOKAHEAD_CACHE_ENV`] and [`IP_PROXY_ENV`].
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if std::env::var(LOOKAHEAD_CACHE_ENV).is_ok_and(|v| v == "true") {
            config.lookahead_cache = false;
        }
        if std::env::var(IP_PROXY_ENV).is_ok_and(|v| v == "true") {
            config.worker_proxy = Some(DEFAULT_WORKER_PROXY.to_string());
        }
        config
    }

    /// Override the manifest host.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Disable the look-ahead cache.
    #[must_use]
    pub const fn without_lookahead_cache(mut self) -> Self {
        self.lookahead_cache = false;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESS-WIDE CACHES
// ═══════════════════════════════════════════════════════════════════════════════

/// Chain-id → gateway URL manifests, one per base URL, fetched once.
static MANIFESTS: LazyLock<DashMap<String, Arc<OnceCell<Arc<HashMap<u64, String>>>>>> =
    LazyLock::new(DashMap::new);

/// Gateway URL → (fetched-at, height).
static HEIGHTS: LazyLock<DashMap<String, (Instant, u64)>> = LazyLock::new(DashMap::new);

// ═══════════════════════════════════════════════════════════════════════════════
// ARCHIVE CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Client for an external indexed-log archive.
///
/// Cheap to clone; all instances pointing at the same base URL share the
/// process-wide manifest and height caches.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    http: reqwest::Client,
    config: ArchiveConfig,
}

impl ArchiveClient {
    /// Create a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Connection`] when the HTTP client cannot be
    /// built.
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ArchiveError::Connection(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Whether the archive has a gateway for the given chain.
    ///
    /// # Errors
    ///
    /// Fails when the manifest cannot be fetched at all; an unlisted chain
    /// is `Ok(false)`.
    pub async fn supports_chain(&self, chain_id: u64) -> Result<bool> {
        Ok(self.manifest().await?.contains_key(&chain_id))
    }

    /// Highest block the archive has indexed for a chain.
    ///
    /// # Errors
    ///
    /// Fails for unsupported chains or unreachable gateways.
    pub async fn height(&self, chain_id: u64) -> Result<u64> {
        let gateway = self.gateway(chain_id).await?;
        self.gateway_height(&gateway).await
    }

    /// Fetch logs for `[from_block, to_block]` (both inclusive).
    ///
    /// Returns `(next_block_exclusive, logs)`. With `partial_allowed`, a
    /// range reaching past the archive's indexed height is clamped and
    /// `next_block_exclusive` tells the caller where to continue via RPC;
    /// without it the same situation is a [`ArchiveError::NotIndexed`]
    /// error. Logs come back in ascending `(block_number, log_index)` order.
    ///
    /// `progress`, when given, is invoked with the number of newly covered
    /// blocks after each worker round-trip.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::NotIndexed`] when `from_block` (or, without
    /// `partial_allowed`, `to_block`) is past the indexed height; transport
    /// and decoding failures otherwise.
    #[instrument(skip(self, selection, progress), fields(chain_id, from_block, to_block))]
    pub async fn fetch_logs(
        &self,
        chain_id: u64,
        selection: &LogSelection,
        from_block: u64,
        to_block: u64,
        partial_allowed: bool,
        progress: Option<&(dyn Fn(u64) + Send + Sync)>,
    ) -> Result<(u64, Vec<Log>)> {
        let gateway = self.gateway(chain_id).await?;
        let height = self.gateway_height(&gateway).await?;

        if from_block > height {
            return Err(ArchiveError::NotIndexed { indexed: height });
        }
        let covered_to = if to_block > height {
            if !partial_allowed {
                return Err(ArchiveError::NotIndexed { indexed: height });
            }
            height
        } else {
            to_block
        };

        let fingerprint = selection.fingerprint();
        let mut logs: Vec<Log> = Vec::new();
        let mut cursor = from_block;

        // A previous query may already have read part of this range ahead.
        if self.config.lookahead_cache {
            if let Some((cached, served_to)) =
                future_logs().lookup(chain_id, &fingerprint, cursor, covered_to)
            {
                if let Some(report) = progress {
                    report(served_to - cursor + 1);
                }
                logs.extend(cached);
                cursor = served_to + 1;
            }
        }

        let query_to = if self.config.lookahead_cache {
            to_block.saturating_add(LOOKAHEAD_BLOCKS).min(height)
        } else {
            covered_to
        };

        let mut overflow: Vec<Log> = Vec::new();
        let mut overflow_to = covered_to;

        while cursor <= covered_to {
            let worker = self.worker_url(&gateway, cursor).await?;
            let query = ArchiveQuery::new(selection.clone(), cursor, query_to);

            debug!(cursor, query_to, worker = %worker, "querying archive worker");
            let blocks: Vec<BlockGroup> = self.post_json(&worker, &query).await?;

            let Some(last) = blocks.last().map(|b| b.header.number) else {
                return Err(ArchiveError::InvalidResponse(
                    "worker returned no blocks".into(),
                ));
            };
            if last < cursor {
                return Err(ArchiveError::InvalidResponse(format!(
                    "worker made no progress: asked from {cursor}, got up to {last}"
                )));
            }

            for block in &blocks {
                let converted = block.to_logs()?;
                if block.header.number <= covered_to {
                    logs.extend(converted);
                } else {
                    overflow.extend(converted);
                }
            }

            if let Some(report) = progress {
                report(last.min(covered_to) - cursor + 1);
            }
            overflow_to = overflow_to.max(last);
            cursor = last + 1;
        }

        if self.config.lookahead_cache && !overflow.is_empty() {
            future_logs().insert(chain_id, &fingerprint, covered_to + 1, overflow_to, overflow);
        }

        Ok((covered_to + 1, logs))
    }

    // ───────────────────────────────────────────────────────────────────────────
    // INTERNAL HELPERS
    // ───────────────────────────────────────────────────────────────────────────

    /// The manifest for this client's base URL, fetched once per process.
    async fn manifest(&self) -> Result<Arc<HashMap<u64, String>>> {
        let cell = MANIFESTS
            .entry(self.config.base_url.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| async {
            let url = format!("{}/archives/evm.json", self.config.base_url);
            let raw: HashMap<String, String> =
                serde_json::from_str(&self.get_text(&url).await?)?;

            let mut manifest = HashMap::with_capacity(raw.len());
            for (chain, gateway) in raw {
                let Ok(chain_id) = chain.parse::<u64>() else {
                    warn!(chain, "skipping non-numeric chain id in archive manifest");
                    continue;
                };
                manifest.insert(chain_id, gateway);
            }
            debug!(chains = manifest.len(), "loaded archive manifest");
            Ok(Arc::new(manifest))
        })
        .await
        .cloned()
    }

    /// Gateway URL for a chain.
    async fn gateway(&self, chain_id: u64) -> Result<String> {
        self.manifest()
            .await?
            .get(&chain_id)
            .cloned()
            .ok_or(ArchiveError::UnsupportedChain(chain_id))
    }

    /// The gateway's indexed height, cached with a TTL.
    async fn gateway_height(&self, gateway: &str) -> Result<u64> {
        if let Some(entry) = HEIGHTS.get(gateway) {
            let (fetched_at, height) = *entry;
            if fetched_at.elapsed() < HEIGHT_TTL {
                return Ok(height);
            }
        }

        let text = self.get_text(&format!("{gateway}/height")).await?;
        let height: u64 = text.trim().parse().map_err(|_| {
            ArchiveError::InvalidResponse(format!("gateway height is not a number: {text}"))
        })?;
        HEIGHTS.insert(gateway.to_string(), (Instant::now(), height));
        Ok(height)
    }

    /// Resolve a worker for the given start block.
    async fn worker_url(&self, gateway: &str, from_block: u64) -> Result<String> {
        let worker = self.get_text(&format!("{gateway}/{from_block}/worker")).await?;
        let worker = worker.trim().to_string();
        Ok(match &self.config.worker_proxy {
            Some(proxy) => format!("{}/{worker}", proxy.trim_end_matches('/')),
            None => worker,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Http(format!("HTTP status {status} from {url}")));
        }
        Ok(response.text().await?)
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Http(format!("HTTP status {status} from {url}")));
        }
        Ok(response.json().await?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
