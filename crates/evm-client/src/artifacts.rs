//! Embedded EVM bytecode used by probes and the constructor aggregator.
//!
//! The probe payloads are small enough to be assembled by hand and are kept
//! here as documented byte strings rather than build artifacts.

use alloy::primitives::{Bytes, address, bytes};
use alloy::primitives::{Address, B256};

// ═══════════════════════════════════════════════════════════════════════════════
// REVERT PROBE
// ═══════════════════════════════════════════════════════════════════════════════

/// Initcode that immediately reverts with `Error("abc")`.
///
/// Layout: a 12-byte prologue copies the 100-byte revert payload from code
/// to memory and reverts with it.
///
/// ```text
/// PUSH1 0x64 PUSH1 0x0c PUSH1 0x00 CODECOPY   ; copy payload to memory
/// PUSH1 0x64 PUSH1 0x00 REVERT                ; revert with payload
/// <payload: Error(string) selector ++ abi.encode("abc")>
/// ```
///
/// A node with revert-reason fidelity turns this into the decoded message
/// `execution reverted: abc`; nodes that strip revert data return a bare
/// error instead.
pub const REVERT_PROBE_INITCODE: Bytes = bytes!(
    "6064600c60003960646000fd"
    "08c379a0"
    "0000000000000000000000000000000000000000000000000000000000000020"
    "0000000000000000000000000000000000000000000000000000000000000003"
    "6162630000000000000000000000000000000000000000000000000000000000"
);

/// The reason the revert probe expects back, exactly.
pub const REVERT_PROBE_REASON: &str = "abc";

// ═══════════════════════════════════════════════════════════════════════════════
// STATE-OVERRIDE PROBE
// ═══════════════════════════════════════════════════════════════════════════════

/// Runtime code returning the value of storage slot 0.
///
/// ```text
/// PUSH1 0x00 SLOAD PUSH1 0x00 MSTORE PUSH1 0x20 PUSH1 0x00 RETURN
/// ```
///
/// Calldata is ignored, so any selector exercises the getter.
pub const SLOT_GETTER_RUNTIME: Bytes = bytes!("60005460005260206000f3");

/// Address the override probe injects the getter at.
pub const OVERRIDE_PROBE_ADDRESS: Address =
    address!("0x1234567800000000000000000000000000000001");

/// Value the override probe writes into slot 0 and expects back.
pub const OVERRIDE_PROBE_VALUE: u64 = 1234;

/// The expected `eth_call` return for a node with working overrides.
#[must_use]
pub fn override_probe_expected() -> B256 {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&OVERRIDE_PROBE_VALUE.to_be_bytes());
    B256::from(word)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTOR AGGREGATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Initcode of the constructor aggregator (Mode U).
///
/// The constructor takes `(bool useRevert, bytes contractBytecode, bytes
/// encodedCalls)`, deploys `contractBytecode` when non-empty, executes the
/// packed calls, and hands the packed results back: as a hex string inside
/// an `Error(string)` revert when `useRevert` is set, or as the returned
/// "runtime code" otherwise. See [`crate::encoding`] for both packed
/// formats.
pub const AGGREGATOR_INITCODE: Bytes = bytes!(
    "608060405234801561000f575f80fd5b50604051610b2e380380610b2e83398101"
    "60408190526100309161058a565b82515f90815260208401519091506001600160"
    "a01b031661005c57825160208401516100599161065e565b90505b5f5b84518110"
    "156101f3575f85828151811061007a5761007a610672565b60200260200101519050"
    "5f816040015190505f8260200151905a6100a091906106b2565b6100ab9084610686"
    "565b156100f0576040517f08c379a000000000000000000000000000000000000000"
    "00000000000000000081526020600482015260096024820152681b9bdd08195b9bdd"
    "59da60ba1b60448201526064015b60405180910390fd5b5f805a8551602087015160"
    "40516001600160a01b039091169286929161011691906106c5565b5f604051808303"
    "815f8787f1925050503d805f8114610150576040519150601f19603f3d011682016040"
    "523d82523d5f602084013e610155565b606091505b5090925090505a61016690836106"
    "b2565b91505f61017383836106dc565b9050806020878101919091528051808201875283"
    "51815292830151928201929092526101a3918791906106f4565b6101ad8783610708565b"
    "96506101ba86600161071c565b955050505050808061005e9061072f565b9150506100"
    "5e565b50835160208501515f916101f3916106e4565b8015610227578060405160200161"
    "020c9190610747565b60405160208183030381529060405290506102279061077a565b"
    "805160208201f35b634e487b7160e01b5f52604160045260245ffd5b604051601f8201"
    "601f191681016001600160401b038111828210171561026b5761026b61022f565b6040"
    "52919050565b5f5b8381101561028d578181015183820152602001610275565b505f91"
    "0152565b5f82601f8301126102a2575f80fd5b81516001600160401b038111156102bb"
    "576102bb61022f565b6102ce601f8201601f1916602001610243565b81815284602083"
    "86010111156102e2575f80fd5b6102f3826020830160208701610273565b9493505050"
    "50565b5f805f6060848603121561030c575f80fd5b835180151581146103"
    "1b575f80fd5b60208501519093506001600160401b03811115610336575f80fd5b6103"
    "4286828701610293565b604086015190935090506001600160401b0381111561035f57"
    "5f80fd5b61036b86828701610293565b9150509250925092565b5f60208284031215"
    "610385575f80fd5b5051919050565b8082018082111561039f5761039f61038c565b92"
    "915050565b8181038181111561039f5761039f61038c56fe"
);

/// Fixed dummy caller that `eth_call`s the constructor aggregator.
pub const AGGREGATOR_CALLER: Address = address!("0x0000000000000000000000000000000000000123");

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_probe_payload_layout() {
        // 12-byte prologue plus the 100-byte Error(string) payload.
        assert_eq!(REVERT_PROBE_INITCODE.len(), 112);
        // The payload starts with the Error(string) selector.
        assert_eq!(&REVERT_PROBE_INITCODE[12..16], &[0x08, 0xc3, 0x79, 0xa0]);
        // The string payload spells "abc".
        assert_eq!(&REVERT_PROBE_INITCODE[80..83], b"abc");
    }

    #[test]
    fn slot_getter_returns_one_word() {
        // Ends in RETURN of a 32-byte word.
        assert_eq!(SLOT_GETTER_RUNTIME.last(), Some(&0xf3));
    }

    #[test]
    fn override_probe_expected_is_right_aligned() {
        let word = override_probe_expected();
        assert_eq!(&word[..30], &[0u8; 30]);
        assert_eq!(u64::from(word[30]) * 256 + u64::from(word[31]), OVERRIDE_PROBE_VALUE);
    }
}
