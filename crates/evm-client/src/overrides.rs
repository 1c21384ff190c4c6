//! State overrides and their merge rules.
//!
//! A state override locally mutates account state (code, balance, nonce,
//! storage) for the duration of a single `eth_call`. The multicall
//! aggregator packs many calls into one execution, so the per-call overrides
//! have to be merged into a single consolidated map first.
//!
//! Merging is strict: two calls that disagree about the same account field
//! or storage slot cannot share an execution, and the merge fails instead of
//! silently picking a winner. Identical contributions are idempotent, which
//! makes the merge commutative for consistent inputs.

use std::collections::BTreeMap;

use alloy::primitives::{Address, B256, Bytes, U256};
use serde::Serialize;

use crate::error::{ClientError, Result};

/// Per-call state override map: account address → override.
pub type StateOverride = BTreeMap<Address, AccountOverride>;

// ═══════════════════════════════════════════════════════════════════════════════
// ACCOUNT OVERRIDE
// ═══════════════════════════════════════════════════════════════════════════════

/// Override of a single account's state for one call.
///
/// `state` replaces the entire storage of the account; `state_diff` patches
/// individual slots. The two are mutually exclusive.
///
/// # Example
///
/// ```
/// use evm_client::overrides::AccountOverride;
/// use alloy::primitives::{B256, Bytes, U256};
///
/// let injected = AccountOverride::new()
///     .with_code(Bytes::from(vec![0x60, 0x00]))
///     .with_state_diff(B256::ZERO, B256::with_last_byte(0x01));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountOverride {
    /// Balance to pretend the account has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<U256>,

    /// Nonce to pretend the account has.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy::serde::quantity::opt")]
    pub nonce: Option<u64>,

    /// Bytecode to install at the account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Bytes>,

    /// Full storage replacement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<BTreeMap<B256, B256>>,

    /// Partial storage patch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_diff: Option<BTreeMap<B256, B256>>,
}

impl AccountOverride {
    /// Create an empty override.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the balance.
    #[must_use]
    pub const fn with_balance(mut self, balance: U256) -> Self {
        self.balance = Some(balance);
        self
    }

    /// Set the nonce.
    #[must_use]
    pub const fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Install bytecode.
    #[must_use]
    pub fn with_code(mut self, code: Bytes) -> Self {
        self.code = Some(code);
        self
    }

    /// Patch one storage slot.
    #[must_use]
    pub fn with_state_diff(mut self, slot: B256, value: B256) -> Self {
        self.state_diff.get_or_insert_with(BTreeMap::new).insert(slot, value);
        self
    }

    /// Replace the entire storage.
    #[must_use]
    pub fn with_state(mut self, state: BTreeMap<B256, B256>) -> Self {
        self.state = Some(state);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MERGING
// ═══════════════════════════════════════════════════════════════════════════════

/// Merge `extra` into `base`.
///
/// # Errors
///
/// [`ClientError::OverrideConflict`] when the two maps disagree: different
/// values for the same scalar field, `state` and `state_diff` on the same
/// account, or differing values for the same `state_diff` slot. Identical
/// contributions merge cleanly.
pub fn merge_overrides(base: &mut StateOverride, extra: &StateOverride) -> Result<()> {
    for (address, incoming) in extra {
        match base.get_mut(address) {
            None => {
                base.insert(*address, incoming.clone());
            }
            Some(existing) => merge_account(*address, existing, incoming)?,
        }
    }
    Ok(())
}

/// Merge a sequence of override maps into one consolidated map.
///
/// Returns `None` when no map contributed anything.
///
/// # Errors
///
/// Propagates the first conflict; see [`merge_overrides`].
pub fn merge_all<'a, I>(overrides: I) -> Result<Option<StateOverride>>
where
    I: IntoIterator<Item = &'a StateOverride>,
{
    let mut merged = StateOverride::new();
    for map in overrides {
        merge_overrides(&mut merged, map)?;
    }
    Ok(if merged.is_empty() { None } else { Some(merged) })
}

fn merge_account(
    address: Address,
    existing: &mut AccountOverride,
    incoming: &AccountOverride,
) -> Result<()> {
    merge_scalar(address, "balance", &mut existing.balance, incoming.balance.as_ref())?;
    merge_scalar(address, "nonce", &mut existing.nonce, incoming.nonce.as_ref())?;
    merge_scalar(address, "code", &mut existing.code, incoming.code.as_ref())?;

    // Full replacement and partial patch cannot coexist on one account.
    let state_mixed = (existing.state.is_some() && incoming.state_diff.is_some())
        || (existing.state_diff.is_some() && incoming.state.is_some());
    if state_mixed {
        return Err(conflict(address, "state and stateDiff are mutually exclusive"));
    }

    merge_scalar(address, "state", &mut existing.state, incoming.state.as_ref())?;

    if let Some(incoming_diff) = &incoming.state_diff {
        let diff = existing.state_diff.get_or_insert_with(BTreeMap::new);
        for (slot, value) in incoming_diff {
            match diff.get(slot) {
                Some(present) if present != value => {
                    return Err(conflict(
                        address,
                        &format!("stateDiff slot {slot} written with different values"),
                    ));
                }
                _ => {
                    diff.insert(*slot, *value);
                }
            }
        }
    }

    Ok(())
}

fn merge_scalar<T: PartialEq + Clone>(
    address: Address,
    field: &str,
    existing: &mut Option<T>,
    incoming: Option<&T>,
) -> Result<()> {
    match (existing.as_ref(), incoming) {
        (_, None) => Ok(()),
        (None, Some(value)) => {
            *existing = Some(value.clone());
            Ok(())
        }
        (Some(present), Some(value)) => {
            if present == value {
                Ok(())
            } else {
                Err(conflict(address, &format!("{field} written twice")))
            }
        }
    }
}

fn conflict(address: Address, detail: &str) -> ClientError {
    ClientError::OverrideConflict(format!("{address}: {detail}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
