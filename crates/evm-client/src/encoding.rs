//! Packed wire formats of the constructor aggregator.
//!
//! The constructor aggregator (Mode U) cannot afford ABI framing: its input
//! travels inside initcode and its output inside a revert reason, so both
//! directions use tight packed encodings.
//!
//! # Call encoding
//!
//! ```text
//! [uint256 numCalls]
//! for each call:
//!   [uint8 flags]          // bit0: same target as previous call
//!                          // bit1: same calldata as previous call
//!   [address target]       // omitted when bit0 set
//!   [uint16 callDataLen]   // omitted when bit1 set
//!   [bytes callData]       // omitted when bit1 set
//! ```
//!
//! Repeated targets and calldata are the common case (many views on one
//! contract), so the flag compression pays for itself quickly.
//!
//! # Result encoding
//!
//! ```text
//! for each call:
//!   [uint16 totalLen]      // length of the rest of this segment
//!   [uint8 success]
//!   [uint32 gasUsed]
//!   [bytes returnData]     // totalLen - 5 bytes
//! ```

use alloy::primitives::{Address, Bytes, U256};

use crate::error::{ClientError, Result};

/// Bytes of a result segment that are not return data.
const SEGMENT_HEADER: usize = 5;

// ═══════════════════════════════════════════════════════════════════════════════
// CALL ENCODING
// ═══════════════════════════════════════════════════════════════════════════════

/// Pack `(target, calldata)` pairs into the aggregator's input format.
#[must_use]
pub fn encode_packed_calls(calls: &[(Address, Bytes)]) -> Bytes {
    let mut out = Vec::with_capacity(32 + calls.len() * 24);
    out.extend_from_slice(&U256::from(calls.len()).to_be_bytes::<32>());

    let mut previous_target: Option<Address> = None;
    let mut previous_calldata: Option<&Bytes> = None;

    for (target, calldata) in calls {
        let mut flags = 0u8;
        if previous_target == Some(*target) {
            flags |= 1;
        }
        if previous_calldata == Some(calldata) {
            flags |= 2;
        }

        out.push(flags);
        if flags & 1 == 0 {
            out.extend_from_slice(target.as_slice());
        }
        if flags & 2 == 0 {
            // Calldata is selector + ABI words; u16 covers any realistic call.
            out.extend_from_slice(&(calldata.len() as u16).to_be_bytes());
            out.extend_from_slice(calldata);
        }

        previous_target = Some(*target);
        previous_calldata = Some(calldata);
    }

    Bytes::from(out)
}

/// Unpack the aggregator's input format back into `(target, calldata)`
/// pairs.
///
/// The inverse of [`encode_packed_calls`]; the aggregator contract performs
/// this walk on-chain, and test doubles use it to play aggregator.
///
/// # Errors
///
/// [`ClientError::Multicall`] on truncation or a call-count mismatch.
pub fn decode_packed_calls(data: &[u8]) -> Result<Vec<(Address, Bytes)>> {
    if data.len() < 32 {
        return Err(malformed("missing call count"));
    }
    let count = U256::from_be_slice(&data[..32]);
    let count = usize::try_from(count).map_err(|_| malformed("absurd call count"))?;
    let mut rest = &data[32..];

    let mut calls = Vec::with_capacity(count);
    let mut previous_target: Option<Address> = None;
    let mut previous_calldata: Option<Bytes> = None;

    for _ in 0..count {
        let Some((&flags, tail)) = rest.split_first() else {
            return Err(malformed("missing flags byte"));
        };
        rest = tail;

        let target = if flags & 1 == 0 {
            if rest.len() < 20 {
                return Err(malformed("truncated target"));
            }
            let target = Address::from_slice(&rest[..20]);
            rest = &rest[20..];
            target
        } else {
            previous_target.ok_or_else(|| malformed("repeat flag on first call"))?
        };

        let calldata = if flags & 2 == 0 {
            if rest.len() < 2 {
                return Err(malformed("truncated calldata length"));
            }
            let len = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
            rest = &rest[2..];
            if rest.len() < len {
                return Err(malformed("truncated calldata"));
            }
            let calldata = Bytes::copy_from_slice(&rest[..len]);
            rest = &rest[len..];
            calldata
        } else {
            previous_calldata
                .clone()
                .ok_or_else(|| malformed("repeat flag on first call"))?
        };

        previous_target = Some(target);
        previous_calldata = Some(calldata.clone());
        calls.push((target, calldata));
    }

    if !rest.is_empty() {
        return Err(malformed("trailing bytes after last call"));
    }
    Ok(calls)
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT DECODING
// ═══════════════════════════════════════════════════════════════════════════════

/// One decoded result segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedCallResult {
    /// Whether the call succeeded.
    pub success: bool,
    /// Gas the call consumed.
    pub gas_used: u32,
    /// Raw return (or revert) data.
    pub return_data: Bytes,
}

/// Decode the aggregator's packed result blob.
///
/// # Errors
///
/// [`ClientError::Multicall`] on truncated or undersized segments.
pub fn decode_packed_results(data: &[u8]) -> Result<Vec<PackedCallResult>> {
    let mut results = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(malformed("dangling segment length"));
        }
        let total_len = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
        rest = &rest[2..];

        if total_len < SEGMENT_HEADER {
            return Err(malformed("segment shorter than its header"));
        }
        if rest.len() < total_len {
            return Err(malformed("truncated segment"));
        }
        let (segment, remaining) = rest.split_at(total_len);
        rest = remaining;

        results.push(PackedCallResult {
            success: segment[0] == 1,
            gas_used: u32::from_be_bytes([segment[1], segment[2], segment[3], segment[4]]),
            return_data: Bytes::copy_from_slice(&segment[SEGMENT_HEADER..]),
        });
    }

    Ok(results)
}

/// Pack result segments into the aggregator's output format.
///
/// The inverse of [`decode_packed_results`]; the aggregator performs this
/// on-chain, and test doubles use it to fabricate replies. Return data
/// longer than a segment can address is truncated at the u16 boundary.
#[must_use]
pub fn encode_packed_results(results: &[PackedCallResult]) -> Bytes {
    let mut out = Vec::new();
    for result in results {
        let data_len = result.return_data.len().min(usize::from(u16::MAX) - SEGMENT_HEADER);
        let total_len = (SEGMENT_HEADER + data_len) as u16;
        out.extend_from_slice(&total_len.to_be_bytes());
        out.push(u8::from(result.success));
        out.extend_from_slice(&result.gas_used.to_be_bytes());
        out.extend_from_slice(&result.return_data[..data_len]);
    }
    Bytes::from(out)
}

fn malformed(detail: &str) -> ClientError {
    ClientError::Multicall(format!("malformed packed multicall result: {detail}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn target(last_byte: u8) -> Address {
        Address::with_last_byte(last_byte)
    }

    #[test]
    fn encoding_starts_with_call_count() {
        let calls = vec![
            (target(1), Bytes::from(vec![0xaa, 0xbb])),
            (target(2), Bytes::from(vec![0xcc])),
        ];
        let packed = encode_packed_calls(&calls);

        assert_eq!(&packed[..32], U256::from(2).to_be_bytes::<32>().as_slice());
        // First call: flags 0, full target, length-prefixed calldata.
        assert_eq!(packed[32], 0);
        assert_eq!(&packed[33..53], target(1).as_slice());
        assert_eq!(&packed[53..55], &[0x00, 0x02]);
        assert_eq!(&packed[55..57], &[0xaa, 0xbb]);
    }

    #[test]
    fn repeated_target_sets_bit0() {
        let calls = vec![
            (target(1), Bytes::from(vec![0xaa])),
            (target(1), Bytes::from(vec![0xbb])),
        ];
        let packed = encode_packed_calls(&calls);

        // Second call starts right after the first (32 + 1 + 20 + 2 + 1).
        let second = &packed[56..];
        assert_eq!(second[0], 1);
        // No target bytes follow, straight to the calldata length.
        assert_eq!(&second[1..3], &[0x00, 0x01]);
        assert_eq!(second[3], 0xbb);
    }

    #[test]
    fn repeated_calldata_sets_bit1() {
        let calldata = Bytes::from(vec![0xaa, 0xbb, 0xcc, 0xdd]);
        let calls = vec![
            (target(1), calldata.clone()),
            (target(2), calldata.clone()),
            (target(2), calldata),
        ];
        let packed = encode_packed_calls(&calls);

        // Third call repeats both: one flag byte only.
        let third = &packed[32 + 27 + 21..];
        assert_eq!(third, &[3u8]);
    }

    #[test]
    fn call_round_trip_preserves_compression_semantics() {
        let shared = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        let calls = vec![
            (target(1), Bytes::from(vec![0xaa])),
            (target(1), shared.clone()),
            (target(2), shared.clone()),
            (target(2), shared),
            (target(3), Bytes::new()),
        ];

        let decoded = decode_packed_calls(&encode_packed_calls(&calls)).expect("decode");
        assert_eq!(decoded, calls);
    }

    #[test]
    fn decode_calls_rejects_truncation() {
        let packed = encode_packed_calls(&[(target(1), Bytes::from(vec![0xaa, 0xbb]))]);
        assert!(decode_packed_calls(&packed[..packed.len() - 1]).is_err());
        assert!(decode_packed_calls(&packed[..16]).is_err());
    }

    #[test]
    fn result_round_trip() {
        let results = vec![
            PackedCallResult {
                success: true,
                gas_used: 42_000,
                return_data: Bytes::from(vec![0x01; 64]),
            },
            PackedCallResult {
                success: false,
                gas_used: 7,
                return_data: Bytes::new(),
            },
        ];
        let decoded =
            decode_packed_results(&encode_packed_results(&results)).expect("decode");
        assert_eq!(decoded, results);
    }

    #[test]
    fn result_decoding_round_trip() {
        let mut blob = Vec::new();
        // Segment 1: success, 100 gas, 2 bytes of data.
        blob.extend_from_slice(&7u16.to_be_bytes());
        blob.push(1);
        blob.extend_from_slice(&100u32.to_be_bytes());
        blob.extend_from_slice(&[0x01, 0x02]);
        // Segment 2: failure, 50 gas, no data.
        blob.extend_from_slice(&5u16.to_be_bytes());
        blob.push(0);
        blob.extend_from_slice(&50u32.to_be_bytes());

        let results = decode_packed_results(&blob).expect("decode");
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].gas_used, 100);
        assert_eq!(results[0].return_data.as_ref(), &[0x01, 0x02]);
        assert!(!results[1].success);
        assert_eq!(results[1].gas_used, 50);
        assert!(results[1].return_data.is_empty());
    }

    #[test]
    fn empty_blob_decodes_to_nothing() {
        assert!(decode_packed_results(&[]).expect("decode").is_empty());
    }

    #[test]
    fn truncated_segment_is_rejected() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&10u16.to_be_bytes());
        blob.push(1);
        assert!(decode_packed_results(&blob).is_err());
    }

    #[test]
    fn undersized_segment_is_rejected() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&3u16.to_be_bytes());
        blob.extend_from_slice(&[1, 0, 0]);
        assert!(decode_packed_results(&blob).is_err());
    }
}
