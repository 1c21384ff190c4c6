//! The capability-probed EVM client.
//!
//! [`EvmClient`] is the entry point of this crate. Connecting runs the
//! capability probes once (see [`crate::probe`]); afterwards every operation
//! statically picks the strategy the node can actually serve, with no
//! trial-and-error per request.
//!
//! # State model
//!
//! All capability fields are immutable after construction. The only mutable
//! piece of client state is `latest_seen_block`, a monotonic high-water mark
//! merged from every block number any successful response mentions. The log
//! retriever uses it to decide which blocks are too young to trust to range
//! queries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use alloy::primitives::{Address, B256, Bytes, U256};
use dashmap::DashMap;
use evm_rpc::retry::with_retry;
use evm_rpc::{BatchClient, HttpTransport, RpcCall, RpcError, RpcTransport, TransportConfig};
use evm_archive::ArchiveClient;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::multicall::Multicall;
use crate::probe::{Capabilities, run_probes};
use crate::types::{BlockId, BlockSummary, CallRequest};

/// Chain ids by endpoint URL, shared process-wide.
///
/// Chain ids never change for a given endpoint, so reconnects skip the
/// round-trip.
static CHAIN_IDS: LazyLock<DashMap<String, u64>> = LazyLock::new(DashMap::new);

// ═══════════════════════════════════════════════════════════════════════════════
// EVM CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Resilient client for one EVM JSON-RPC endpoint.
///
/// # Construction
///
/// [`connect`](Self::connect) probes the node before returning, which costs
/// a few dozen cheap requests once per process-lifetime client. Clients are
/// `Send + Sync`; share one behind an `Arc` instead of reconnecting.
///
/// # Example
///
/// ```ignore
/// use evm_client::{EvmClient, FilterSpec, GetLogsOptions};
///
/// let client = EvmClient::connect("https://rpc.example.com").await?;
///
/// let logs = client
///     .get_logs(
///         FilterSpec::range(15_000_000, 16_000_000).with_address(token),
///         GetLogsOptions::default(),
///     )
///     .await?;
/// ```
#[derive(Debug)]
pub struct EvmClient {
    /// Raw transport, shared with the batch client.
    pub(crate) transport: Arc<dyn RpcTransport>,

    /// Batch dispatcher sized to the probed maximum.
    pub(crate) batch: BatchClient,

    /// Policy configuration.
    pub(crate) config: ClientConfig,

    /// Probed node capabilities; immutable after connect.
    pub(crate) capabilities: Capabilities,

    /// Cached chain id.
    pub(crate) chain_id: u64,

    /// Highest block number observed in any successful response.
    pub(crate) latest_seen_block: AtomicU64,

    /// Archive client, present when the archive indexes this chain.
    pub(crate) archive: Option<ArchiveClient>,
}

impl EvmClient {
    /// Connect with configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint is unreachable, the URL is invalid, or the
    /// chain id / head queries fail after retrying.
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        Self::connect_with_config(url, ClientConfig::from_env()).await
    }

    /// Connect with an explicit configuration.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect); additionally fails on invalid
    /// configuration.
    pub async fn connect_with_config(
        url: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(
            url,
            TransportConfig::default().with_timeout(config.timeout),
        )?;
        Self::connect_with_transport(Arc::new(transport), config).await
    }

    /// Connect over an existing transport.
    ///
    /// This is the seam for custom transports and for tests driving the
    /// client against an in-memory node.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    #[instrument(skip(transport, config), fields(url = transport.url()))]
    pub async fn connect_with_transport(
        transport: Arc<dyn RpcTransport>,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;

        let chain_id = Self::resolve_chain_id(&transport, &config).await?;

        let head = with_retry("eth_blockNumber", !config.should_retry, || async {
            parse_quantity(&transport.send(&RpcCall::new("eth_blockNumber", json!([]))).await?)
        })
        .await?;

        let mut capabilities = run_probes(&transport, head).await;

        let archive = if config.use_external_archive {
            Self::resolve_archive(&config, chain_id).await
        } else {
            None
        };
        capabilities.external_archive_available = archive.is_some();

        let batch = BatchClient::new(
            transport.clone(),
            capabilities.rpc_batch_max_size,
            config.should_retry,
        );

        info!(chain_id, head, "connected to EVM node");

        Ok(Self {
            transport,
            batch,
            config,
            capabilities,
            chain_id,
            latest_seen_block: AtomicU64::new(head),
            archive,
        })
    }

    /// Chain id, resolved once per endpoint per process.
    async fn resolve_chain_id(
        transport: &Arc<dyn RpcTransport>,
        config: &ClientConfig,
    ) -> Result<u64> {
        if let Some(cached) = CHAIN_IDS.get(transport.url()) {
            return Ok(*cached);
        }
        let chain_id = with_retry("eth_chainId", !config.should_retry, || async {
            parse_quantity(&transport.send(&RpcCall::new("eth_chainId", json!([]))).await?)
        })
        .await?;
        CHAIN_IDS.insert(transport.url().to_string(), chain_id);
        Ok(chain_id)
    }

    /// Archive client, when the archive indexes this chain.
    async fn resolve_archive(config: &ClientConfig, chain_id: u64) -> Option<ArchiveClient> {
        let client = match ArchiveClient::new(config.archive.clone()) {
            Ok(client) => client,
            Err(error) => {
                warn!(error = %error, "could not construct archive client");
                return None;
            }
        };
        match client.supports_chain(chain_id).await {
            Ok(true) => Some(client),
            Ok(false) => {
                debug!(chain_id, "external archive does not index this chain");
                None
            }
            Err(error) => {
                warn!(error = %error, "could not fetch archive manifest");
                None
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // ACCESSORS
    // ───────────────────────────────────────────────────────────────────────────

    /// The endpoint URL.
    #[must_use]
    pub fn node_url(&self) -> &str {
        self.transport.url()
    }

    /// The chain id, cached at connect time.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// The probed node capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Highest block number observed so far. Monotonic.
    #[must_use]
    pub fn latest_seen_block(&self) -> u64 {
        self.latest_seen_block.load(Ordering::Acquire)
    }

    /// Merge an observed block number into the high-water mark.
    pub(crate) fn observe_block(&self, number: u64) {
        self.latest_seen_block.fetch_max(number, Ordering::AcqRel);
    }

    /// Start building a multicall against this client.
    #[must_use]
    pub fn multicall(&self) -> Multicall<'_> {
        Multicall::new(self)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // NODE OPERATIONS
    // ───────────────────────────────────────────────────────────────────────────
    // Every operation is an explicit named entry in the retry table: the
    // method name is the retry engine's op name, and `no_retry` is a real
    // parameter, never smuggled through the payload.

    /// One retried RPC round-trip.
    pub(crate) async fn rpc(
        &self,
        method: &'static str,
        params: Value,
        no_retry: bool,
    ) -> evm_rpc::Result<Value> {
        let call = RpcCall::new(method, params);
        let no_retry = no_retry || !self.config.should_retry;
        with_retry(method, no_retry, || self.transport.send(&call)).await
    }

    /// Current head block number. Advances `latest_seen_block`.
    ///
    /// # Errors
    ///
    /// Transport failures that survive retrying.
    pub async fn block_number(&self) -> Result<u64> {
        let number = parse_quantity(&self.rpc("eth_blockNumber", json!([]), false).await?)?;
        self.observe_block(number);
        Ok(number)
    }

    /// Fetch a block body projection by number, tag, or hash.
    ///
    /// # Errors
    ///
    /// [`RpcError::UnknownBlock`] (after bounded retries) when the node has
    /// not seen the block; transport failures otherwise.
    pub async fn get_block(&self, id: impl Into<BlockId>) -> Result<BlockSummary> {
        self.get_block_inner(id.into(), false).await
    }

    pub(crate) async fn get_block_inner(
        &self,
        id: BlockId,
        no_retry: bool,
    ) -> Result<BlockSummary> {
        let method = match id {
            BlockId::Hash(_) => "eth_getBlockByHash",
            BlockId::Number(_) | BlockId::Tag(_) => "eth_getBlockByNumber",
        };
        let call = RpcCall::new(method, json!([id.to_param(), false]));
        let no_retry = no_retry || !self.config.should_retry;

        let value = with_retry(method, no_retry, || async {
            let value = self.transport.send(&call).await?;
            if value.is_null() {
                return Err(RpcError::UnknownBlock(format!(
                    "{method} returned null for {}",
                    call.params
                )));
            }
            Ok(value)
        })
        .await?;

        let summary: BlockSummary = serde_json::from_value(value).map_err(RpcError::from)?;
        self.observe_block(summary.number);
        Ok(summary)
    }

    /// Execute a read-only call at the given block (default: latest).
    ///
    /// # Errors
    ///
    /// [`RpcError::Revert`] with the decoded reason when the call reverts;
    /// transport failures otherwise.
    pub async fn call(&self, request: &CallRequest, block: Option<BlockId>) -> Result<Bytes> {
        self.call_with_overrides(request, block, None, false).await
    }

    /// Execute a read-only call with optional state overrides.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_with_overrides(
        &self,
        request: &CallRequest,
        block: Option<BlockId>,
        overrides: Option<&crate::overrides::StateOverride>,
        no_retry: bool,
    ) -> Result<Bytes> {
        let block_param = block.map_or_else(|| json!("latest"), |b| b.to_param());
        let params = match overrides {
            Some(map) => json!([request, block_param, map]),
            None => json!([request, block_param]),
        };
        let value = self.rpc("eth_call", params, no_retry).await?;
        Ok(parse_bytes(&value)?)
    }

    /// Current gas price in wei.
    ///
    /// # Errors
    ///
    /// Transport failures that survive retrying.
    pub async fn gas_price(&self) -> Result<U256> {
        Ok(parse_u256(&self.rpc("eth_gasPrice", json!([]), false).await?)?)
    }

    /// Native balance of an address.
    ///
    /// # Errors
    ///
    /// Transport failures that survive retrying.
    pub async fn get_balance(&self, address: Address, block: Option<BlockId>) -> Result<U256> {
        let block_param = block.map_or_else(|| json!("latest"), |b| b.to_param());
        let params = json!([format!("{address:#x}"), block_param]);
        Ok(parse_u256(&self.rpc("eth_getBalance", params, false).await?)?)
    }

    /// Deployed bytecode of an address.
    ///
    /// # Errors
    ///
    /// Transport failures that survive retrying.
    pub async fn get_code(&self, address: Address, block: Option<BlockId>) -> Result<Bytes> {
        let block_param = block.map_or_else(|| json!("latest"), |b| b.to_param());
        let params = json!([format!("{address:#x}"), block_param]);
        Ok(parse_bytes(&self.rpc("eth_getCode", params, false).await?)?)
    }

    /// Transaction count (nonce) of an address.
    ///
    /// # Errors
    ///
    /// Transport failures that survive retrying.
    pub async fn get_transaction_count(
        &self,
        address: Address,
        block: Option<BlockId>,
    ) -> Result<u64> {
        let block_param = block.map_or_else(|| json!("latest"), |b| b.to_param());
        let params = json!([format!("{address:#x}"), block_param]);
        Ok(parse_quantity(&self.rpc("eth_getTransactionCount", params, false).await?)?)
    }

    /// Raw storage slot of an address.
    ///
    /// # Errors
    ///
    /// Transport failures that survive retrying.
    pub async fn get_storage_at(
        &self,
        address: Address,
        slot: B256,
        block: Option<BlockId>,
    ) -> Result<B256> {
        let block_param = block.map_or_else(|| json!("latest"), |b| b.to_param());
        let params = json!([format!("{address:#x}"), format!("{slot:#x}"), block_param]);
        Ok(parse_b256(&self.rpc("eth_getStorageAt", params, false).await?)?)
    }

    /// Estimate the gas a call would consume.
    ///
    /// # Errors
    ///
    /// [`RpcError::Revert`] when the call reverts during estimation;
    /// transport failures otherwise.
    pub async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        Ok(parse_quantity(&self.rpc("eth_estimateGas", json!([request]), false).await?)?)
    }

    /// Fee history as the node reports it, unparsed.
    ///
    /// # Errors
    ///
    /// Transport failures that survive retrying.
    pub async fn fee_history(
        &self,
        block_count: u64,
        newest: BlockId,
        reward_percentiles: &[f64],
    ) -> Result<Value> {
        let params = json!([
            format!("0x{block_count:x}"),
            newest.to_param(),
            reward_percentiles
        ]);
        Ok(self.rpc("eth_feeHistory", params, false).await?)
    }

    /// Broadcast a signed transaction.
    ///
    /// Retried like every other operation; re-broadcasting an identical
    /// signed payload is accepted by nodes as a no-op.
    ///
    /// # Errors
    ///
    /// Node rejection or transport failures that survive retrying.
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        let params = json!([format!("0x{}", hex::encode(&raw))]);
        Ok(parse_b256(&self.rpc("eth_sendRawTransaction", params, false).await?)?)
    }

    /// Receipt of a transaction, unparsed; `None` while pending.
    ///
    /// # Errors
    ///
    /// Transport failures that survive retrying.
    pub async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Option<Value>> {
        let params = json!([format!("{tx_hash:#x}")]);
        let value = self.rpc("eth_getTransactionReceipt", params, false).await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    /// Issue any other node method through the retry engine.
    ///
    /// The escape hatch for the long tail of idempotent methods without a
    /// typed wrapper here (`eth_getTransactionByHash`, the filter
    /// lifecycle, `eth_syncing`, …). The method name doubles as the retry
    /// engine's operation name. Do not route non-idempotent methods through
    /// this unless re-execution is acceptable.
    ///
    /// # Errors
    ///
    /// Node rejection or transport failures that survive retrying.
    pub async fn raw_request(
        &self,
        method: &'static str,
        params: Value,
        no_retry: bool,
    ) -> Result<Value> {
        Ok(self.rpc(method, params, no_retry).await?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn parse_quantity(value: &Value) -> evm_rpc::Result<u64> {
    let raw = as_hex_str(value)?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|_| RpcError::InvalidResponse(format!("not a hex quantity: {value}")))
}

pub(crate) fn parse_u256(value: &Value) -> evm_rpc::Result<U256> {
    let raw = as_hex_str(value)?;
    U256::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|_| RpcError::InvalidResponse(format!("not a hex quantity: {value}")))
}

pub(crate) fn parse_bytes(value: &Value) -> evm_rpc::Result<Bytes> {
    let raw = as_hex_str(value)?;
    raw.parse()
        .map_err(|_| RpcError::InvalidResponse(format!("not hex data: {value}")))
}

pub(crate) fn parse_b256(value: &Value) -> evm_rpc::Result<B256> {
    let raw = as_hex_str(value)?;
    raw.parse()
        .map_err(|_| RpcError::InvalidResponse(format!("not a 32-byte hash: {value}")))
}

fn as_hex_str(value: &Value) -> evm_rpc::Result<&str> {
    value
        .as_str()
        .ok_or_else(|| RpcError::InvalidResponse(format!("expected hex string, got {value}")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
