//! Multicall aggregation.
//!
//! Packs many read-only contract calls into a single node round-trip. Two
//! execution modes, chosen by whether this chain has a known deployed
//! aggregator (see [`ClientConfig::aggregator_deployments`]):
//!
//! - **Deployed** (`Mode D`): the on-chain aggregator's
//!   `multicallWithGasLimitation` executes the calls sequentially, stopping
//!   early when the remaining gas drops below a buffer. The result list may
//!   be shorter than the input; the tail is re-executed transparently.
//! - **Constructor** (`Mode U`): on chains without a deployment, the calls
//!   travel packed inside the initcode of a helper whose *constructor*
//!   executes them and reverts with the packed results. Needs nothing
//!   deployed on chain. See [`crate::encoding`] for both packed formats.
//!
//! Both modes support one pending contract deployment: calls targeting the
//! zero address are redirected to the CREATE-predicted address of the
//! to-be-deployed contract.
//!
//! Per-call failures are reported in place, never raised: `execute` returns
//! exactly one outcome per added call, in order.
//!
//! [`ClientConfig::aggregator_deployments`]: crate::ClientConfig

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use alloy::sol_types::SolValue;
use evm_rpc::RpcError;
use evm_rpc::error::revert_reason_from_bytes;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::address::{create_address, undeployed_contract_address};
use crate::artifacts::{AGGREGATOR_CALLER, AGGREGATOR_INITCODE};
use crate::client::EvmClient;
use crate::encoding::{PackedCallResult, decode_packed_results, encode_packed_calls};
use crate::error::{ClientError, Result};
use crate::overrides::{StateOverride, merge_all};
use crate::types::CallRequest;

// ═══════════════════════════════════════════════════════════════════════════════
// AGGREGATOR ABI
// ═══════════════════════════════════════════════════════════════════════════════

/// ABI bindings of the deployed aggregator.
pub mod abi {
    use alloy::sol;

    sol! {
        /// One call forwarded by the aggregator.
        #[derive(Debug)]
        struct AggregatedCall {
            address target;
            uint256 gasLimit;
            bytes callData;
        }

        /// Outcome of one forwarded call.
        #[derive(Debug)]
        struct AggregatedResult {
            bool success;
            uint256 gasUsed;
            bytes returnData;
        }

        /// Execute calls sequentially until gas runs low.
        function multicallWithGasLimitation(AggregatedCall[] calls, uint256 gasBuffer)
            external
            returns (uint256 executedUntil, AggregatedResult[] results);

        /// Deploy a contract from within the aggregator.
        function deployContract(bytes contractBytecode) external returns (address deployed);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOME TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Why one aggregated call produced no value.
#[derive(Debug, Clone, Error)]
pub enum CallFailure {
    /// The call reverted inside the aggregator.
    #[error("execution reverted: {reason}")]
    Reverted {
        /// Decoded revert reason, or `"unknown"`.
        reason: String,
    },

    /// The call could not be executed at all (single-call invocation
    /// failed after retrying).
    #[error("call failed: {0}")]
    Failed(String),

    /// The call succeeded but its return data did not match the declared
    /// output types.
    #[error("could not decode return data: {0}")]
    Decode(String),
}

/// Decoded value of one call, or its in-band failure.
pub type CallOutcome = std::result::Result<DynSolValue, CallFailure>;

/// Everything one multicall execution produced.
#[derive(Debug)]
pub struct MulticallOutput {
    /// One outcome per added call, in add order. Arity-1 output tuples are
    /// unwrapped to their single value.
    pub results: Vec<CallOutcome>,
    /// Gas used per call, aligned with `results`; 0 for failed slots.
    pub gas_used: Vec<u64>,
}

/// One call queued in the builder.
#[derive(Debug, Clone)]
pub struct CallSpec {
    /// Target contract; the zero address stands for the pending deployment.
    pub target: Address,
    /// ABI-encoded calldata.
    pub calldata: Bytes,
    /// Declared output types, used to decode the return data.
    pub outputs: Vec<DynSolType>,
    /// Per-call state override, merged into the execution's consolidated
    /// override map.
    pub state_override: Option<StateOverride>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for one multicall execution.
///
/// Obtained from [`EvmClient::multicall`]; consumed by
/// [`execute`](Self::execute).
///
/// # Example
///
/// ```ignore
/// use alloy::dyn_abi::DynSolType;
///
/// let mut multicall = client.multicall();
/// multicall.add_call(token, balance_of_calldata, vec![DynSolType::Uint(256)]);
/// multicall.add_call(token, total_supply_calldata, vec![DynSolType::Uint(256)]);
/// let output = multicall.execute().await?;
/// ```
#[derive(Debug)]
pub struct Multicall<'a> {
    client: &'a EvmClient,
    calls: Vec<CallSpec>,
    pending_deploy: Option<Bytes>,
    global_override: Option<StateOverride>,
    batch_size: usize,
    use_revert: Option<bool>,
}

impl<'a> Multicall<'a> {
    pub(crate) fn new(client: &'a EvmClient) -> Self {
        Self {
            client,
            calls: Vec::new(),
            pending_deploy: None,
            global_override: None,
            batch_size: client.config.multicall_batch_size,
            use_revert: None,
        }
    }

    /// Queue a call.
    pub fn add_call(
        &mut self,
        target: Address,
        calldata: Bytes,
        outputs: Vec<DynSolType>,
    ) -> &mut Self {
        self.calls.push(CallSpec {
            target,
            calldata,
            outputs,
            state_override: None,
        });
        self
    }

    /// Queue a call with a per-call state override.
    pub fn add_call_with_override(
        &mut self,
        target: Address,
        calldata: Bytes,
        outputs: Vec<DynSolType>,
        state_override: StateOverride,
    ) -> &mut Self {
        self.calls.push(CallSpec {
            target,
            calldata,
            outputs,
            state_override: Some(state_override),
        });
        self
    }

    /// Register the one contract this execution deploys before its calls.
    ///
    /// # Errors
    ///
    /// [`ClientError::Multicall`] when a pending deployment is already
    /// registered.
    pub fn add_undeployed_contract(&mut self, initcode: Bytes) -> Result<()> {
        if self.pending_deploy.is_some() {
            return Err(ClientError::Multicall(
                "can only add one undeployed contract".into(),
            ));
        }
        self.pending_deploy = Some(initcode);
        Ok(())
    }

    /// Queue a call against the pending deployment.
    ///
    /// # Errors
    ///
    /// [`ClientError::Multicall`] when no pending deployment is registered.
    pub fn add_undeployed_call(&mut self, calldata: Bytes, outputs: Vec<DynSolType>) -> Result<()> {
        if self.pending_deploy.is_none() {
            return Err(ClientError::Multicall("no undeployed contract added yet".into()));
        }
        self.calls.push(CallSpec {
            target: Address::ZERO,
            calldata,
            outputs,
            state_override: None,
        });
        Ok(())
    }

    /// Apply one override map to the whole execution.
    pub fn set_state_override(&mut self, overrides: StateOverride) -> &mut Self {
        self.global_override = Some(overrides);
        self
    }

    /// Change how many calls one execution packs.
    pub fn set_batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Force the constructor aggregator's revert (or return) transport
    /// instead of following the probed revert-reason fidelity.
    pub fn set_use_revert(&mut self, use_revert: bool) -> &mut Self {
        self.use_revert = Some(use_revert);
        self
    }

    /// Number of queued calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no calls are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Execute all queued calls.
    ///
    /// # Errors
    ///
    /// [`ClientError::OverrideConflict`] for inconsistent state overrides
    /// and [`ClientError::Multicall`] for aggregator-contract violations.
    /// Per-call reverts and failures are *not* errors; they come back
    /// in-band in [`MulticallOutput::results`].
    #[instrument(skip(self), fields(calls = self.calls.len()))]
    pub async fn execute(self) -> Result<MulticallOutput> {
        if self.calls.is_empty() {
            return Ok(MulticallOutput {
                results: Vec::new(),
                gas_used: Vec::new(),
            });
        }

        let aggregator = self
            .client
            .config
            .aggregator_deployments
            .get(&self.client.chain_id)
            .copied();

        // Where the pending deployment will land: the aggregator's next
        // CREATE in Mode D, the caller's runner chain in Mode U.
        let deploy_address = aggregator.map_or_else(
            || undeployed_contract_address(AGGREGATOR_CALLER, 0),
            |aggregator| create_address(aggregator, 1),
        );

        let mut calls = self.calls;
        for call in &mut calls {
            if call.target == Address::ZERO {
                call.target = deploy_address;
            }
        }

        let execution = Execution {
            client: self.client,
            aggregator,
            pending_deploy: self.pending_deploy,
            global_override: self.global_override,
            use_revert: self
                .use_revert
                .unwrap_or(self.client.capabilities.revert_reason_available),
            deploy_address,
        };

        let mut results = Vec::with_capacity(calls.len());
        let mut gas_used = Vec::with_capacity(calls.len());
        for chunk in calls.chunks(self.batch_size) {
            let (chunk_results, chunk_gas) = execution.run_slice(chunk).await?;
            results.extend(chunk_results);
            gas_used.extend(chunk_gas);
        }

        debug_assert_eq!(results.len(), calls.len());
        Ok(MulticallOutput { results, gas_used })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTION
// ═══════════════════════════════════════════════════════════════════════════════

struct Execution<'a> {
    client: &'a EvmClient,
    aggregator: Option<Address>,
    pending_deploy: Option<Bytes>,
    global_override: Option<StateOverride>,
    use_revert: bool,
    deploy_address: Address,
}

impl Execution<'_> {
    /// Execute one slice, bisecting on failure and re-running gas-truncated
    /// tails, so that exactly one outcome per call comes back.
    fn run_slice<'b>(
        &'b self,
        calls: &'b [CallSpec],
    ) -> BoxFuture<'b, Result<(Vec<CallOutcome>, Vec<u64>)>> {
        Box::pin(async move {
            if calls.is_empty() {
                return Ok((Vec::new(), Vec::new()));
            }

            let failure = match self.invoke(calls).await {
                Ok(packed) if !packed.is_empty() => {
                    return self.resolve_slice(calls, packed).await;
                }
                Ok(_) => ClientError::Multicall("aggregator returned no results".into()),
                Err(error @ ClientError::OverrideConflict(_)) => return Err(error),
                Err(error) => error,
            };

            if calls.len() == 1 {
                // The single-call invocation already went through the full
                // retry schedule; whatever is left is this call's outcome.
                debug!(error = %failure, "single aggregated call failed");
                let outcome = match failure {
                    ClientError::Rpc(RpcError::Revert { reason, .. }) => CallFailure::Reverted {
                        reason: reason.unwrap_or_else(|| "unknown".into()),
                    },
                    other => CallFailure::Failed(other.to_string()),
                };
                return Ok((vec![Err(outcome)], vec![0]));
            }

            warn!(calls = calls.len(), error = %failure, "multicall failed, splitting");
            let mid = calls.len() / 2;
            let (mut results, mut gas_used) = self.run_slice(&calls[..mid]).await?;
            let (right_results, right_gas) = self.run_slice(&calls[mid..]).await?;
            results.extend(right_results);
            gas_used.extend(right_gas);
            Ok((results, gas_used))
        })
    }

    /// Turn packed results into outcomes, re-running the tail the
    /// aggregator did not reach.
    async fn resolve_slice(
        &self,
        calls: &[CallSpec],
        mut packed: Vec<PackedCallResult>,
    ) -> Result<(Vec<CallOutcome>, Vec<u64>)> {
        if packed.len() > calls.len() {
            return Err(ClientError::Multicall(format!(
                "aggregator returned {} results for {} calls",
                packed.len(),
                calls.len()
            )));
        }

        if packed.len() < calls.len() {
            // Gas ran out. The last returned call may itself have been cut
            // short, so it is re-executed along with the unreached tail.
            if packed.len() > 1 {
                packed.pop();
            }
            let done = packed.len();
            debug!(done, total = calls.len(), "gas-truncated multicall, re-running tail");

            let (mut results, mut gas_used) = decode_results(&calls[..done], &packed);
            let (rest_results, rest_gas) = self.run_slice(&calls[done..]).await?;
            results.extend(rest_results);
            gas_used.extend(rest_gas);
            return Ok((results, gas_used));
        }

        Ok(decode_results(calls, &packed))
    }

    /// One aggregator invocation over `eth_call`.
    async fn invoke(&self, calls: &[CallSpec]) -> Result<Vec<PackedCallResult>> {
        let overrides = merge_all(
            self.global_override
                .iter()
                .chain(calls.iter().filter_map(|call| call.state_override.as_ref())),
        )?;
        // Multi-call invocations fail fast into bisection; only a single
        // call is worth the full backoff schedule.
        let no_retry = calls.len() > 1;

        match self.aggregator {
            Some(aggregator) => {
                self.invoke_deployed(aggregator, calls, overrides.as_ref(), no_retry)
                    .await
            }
            None => self.invoke_constructor(calls, overrides.as_ref(), no_retry).await,
        }
    }

    /// Mode D: the deployed aggregator.
    async fn invoke_deployed(
        &self,
        aggregator: Address,
        calls: &[CallSpec],
        overrides: Option<&StateOverride>,
        no_retry: bool,
    ) -> Result<Vec<PackedCallResult>> {
        let gas_limit = U256::from(self.client.config.multicall_gas_limit);

        let mut aggregated = Vec::with_capacity(calls.len() + 1);
        if let Some(initcode) = &self.pending_deploy {
            let deploy = abi::deployContractCall {
                contractBytecode: initcode.clone(),
            };
            aggregated.push(abi::AggregatedCall {
                target: aggregator,
                gasLimit: gas_limit,
                callData: deploy.abi_encode().into(),
            });
        }
        for call in calls {
            aggregated.push(abi::AggregatedCall {
                target: call.target,
                gasLimit: gas_limit,
                callData: call.calldata.clone(),
            });
        }

        let invocation = abi::multicallWithGasLimitationCall {
            calls: aggregated,
            gasBuffer: U256::from(self.client.config.multicall_gas_buffer),
        };
        let request = CallRequest::new()
            .from_address(AGGREGATOR_CALLER)
            .to(aggregator)
            .data(invocation.abi_encode().into())
            .nonce(0);

        let raw = self
            .client
            .call_with_overrides(&request, None, overrides, no_retry)
            .await?;
        if raw.is_empty() {
            return Err(ClientError::Multicall("no data returned from multicall".into()));
        }

        let reply = abi::multicallWithGasLimitationCall::abi_decode_returns(&raw)
            .map_err(|e| ClientError::Multicall(format!("undecodable aggregator reply: {e}")))?;

        let mut packed: Vec<PackedCallResult> = reply
            .results
            .into_iter()
            .map(|result| PackedCallResult {
                success: result.success,
                gas_used: u32::try_from(result.gasUsed.saturating_to::<u64>())
                    .unwrap_or(u32::MAX),
                return_data: result.returnData,
            })
            .collect();

        if self.pending_deploy.is_some() {
            let Some(first) = packed.first() else {
                return Err(ClientError::Multicall(
                    "aggregator dropped the deployment result".into(),
                ));
            };
            if !first.success {
                return Err(ClientError::Multicall(
                    "undeployed contract constructor reverted".into(),
                ));
            }
            let returned = first.return_data.clone();
            if returned.len() < 32
                || Address::from_slice(&returned[returned.len() - 20..]) != self.deploy_address
            {
                return Err(ClientError::Multicall(
                    "unexpected undeployed contract address".into(),
                ));
            }
            packed.remove(0);
        }

        Ok(packed)
    }

    /// Mode U: the constructor aggregator.
    async fn invoke_constructor(
        &self,
        calls: &[CallSpec],
        overrides: Option<&StateOverride>,
        no_retry: bool,
    ) -> Result<Vec<PackedCallResult>> {
        let pairs: Vec<(Address, Bytes)> = calls
            .iter()
            .map(|call| (call.target, call.calldata.clone()))
            .collect();
        let encoded_calls = encode_packed_calls(&pairs);
        let bytecode = self.pending_deploy.clone().unwrap_or_default();

        let constructor_args =
            (self.use_revert, bytecode, encoded_calls).abi_encode_params();
        let mut data = AGGREGATOR_INITCODE.to_vec();
        data.extend_from_slice(&constructor_args);

        let request = CallRequest::new()
            .from_address(AGGREGATOR_CALLER)
            .data(data.into())
            .nonce(0);

        match self
            .client
            .call_with_overrides(&request, None, overrides, no_retry)
            .await
        {
            Ok(raw) => {
                // useRevert=false: the packed results come back as the
                // deployment's "runtime code".
                if raw.is_empty() {
                    return Err(ClientError::Multicall(
                        "no data returned from multicall".into(),
                    ));
                }
                decode_packed_results(&raw)
            }
            Err(error) => {
                // useRevert=true: the packed results ride inside the revert
                // reason as a hex string.
                if self.use_revert {
                    if let ClientError::Rpc(RpcError::Revert {
                        reason: Some(reason),
                        ..
                    }) = &error
                    {
                        if is_lower_hex(reason) {
                            if let Ok(blob) = hex::decode(reason) {
                                if blob.is_empty() {
                                    return Err(ClientError::Multicall(
                                        "no data returned from multicall".into(),
                                    ));
                                }
                                return decode_packed_results(&blob);
                            }
                        }
                    }
                }
                Err(error)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECODING
// ═══════════════════════════════════════════════════════════════════════════════

fn decode_results(
    calls: &[CallSpec],
    packed: &[PackedCallResult],
) -> (Vec<CallOutcome>, Vec<u64>) {
    let mut results = Vec::with_capacity(packed.len());
    let mut gas_used = Vec::with_capacity(packed.len());

    for (call, result) in calls.iter().zip(packed) {
        gas_used.push(u64::from(result.gas_used));
        if result.success {
            results.push(decode_output(&call.outputs, &result.return_data));
        } else {
            results.push(Err(CallFailure::Reverted {
                reason: per_call_revert_reason(&result.return_data),
            }));
        }
    }

    (results, gas_used)
}

/// Decode return data against declared outputs; arity-1 tuples unwrap.
fn decode_output(outputs: &[DynSolType], data: &[u8]) -> CallOutcome {
    if outputs.is_empty() {
        return Ok(DynSolValue::Tuple(Vec::new()));
    }
    let tuple = DynSolType::Tuple(outputs.to_vec());
    match tuple.abi_decode_params(data) {
        Ok(DynSolValue::Tuple(mut values)) if values.len() == 1 => Ok(values.remove(0)),
        Ok(value) => Ok(value),
        Err(error) => Err(CallFailure::Decode(error.to_string())),
    }
}

/// Human-readable reason of one failed aggregated call.
fn per_call_revert_reason(return_data: &[u8]) -> String {
    if return_data.is_empty() {
        return "unknown".into();
    }
    revert_reason_from_bytes(return_data)
        .unwrap_or_else(|| hex::encode(return_data))
}

fn is_lower_hex(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
