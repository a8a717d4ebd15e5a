//! Canonical id derivation: `request_id` packing and container-name hashing (spec §6).
//!
//! The reference computes `getRequestId` two incompatible ways across files (packed vs.
//! ABI-encoded). This crate implements only the packed big-endian form, per the design
//! decision recorded in `SPEC_FULL.md` §9 — parameterizing over both would reintroduce the
//! ambiguity the spec asks to resolve.

use alloy::primitives::{keccak256, Address, B256};
use alloy::sol_types::SolValue;

/// `request_id = keccak256(pack_be(subscription_id: u64, interval: u32))`.
#[must_use]
pub fn request_id(subscription_id: u64, interval: u32) -> B256 {
    let mut buf = [0u8; 12];
    buf[0..8].copy_from_slice(&subscription_id.to_be_bytes());
    buf[8..12].copy_from_slice(&interval.to_be_bytes());
    keccak256(buf)
}

/// `container_id_hash = keccak256(abi_encode(string name))`, used to reconcile
/// config-declared container names with on-chain 32-byte ids.
#[must_use]
pub fn container_id_hash(name: &str) -> B256 {
    keccak256(name.to_string().abi_encode())
}

/// `p = keccak256(request_id || agent_address)[0..4]` as a big-endian `u32`, the priority
/// back-off seed from spec §4.5 step 6.
#[must_use]
pub fn priority_seed(request_id: B256, agent_address: Address) -> u32 {
    let mut buf = Vec::with_capacity(52);
    buf.extend_from_slice(request_id.as_slice());
    buf.extend_from_slice(agent_address.as_slice());
    let hash = keccak256(buf);
    u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_deterministic() {
        let a = request_id(42, 7);
        let b = request_id(42, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn request_id_distinguishes_subscription_and_interval() {
        assert_ne!(request_id(1, 1), request_id(1, 2));
        assert_ne!(request_id(1, 1), request_id(2, 1));
    }

    #[test]
    fn priority_seed_is_deterministic_per_pair() {
        let rid = request_id(1, 1);
        let addr = Address::from([0x11; 20]);
        assert_eq!(priority_seed(rid, addr), priority_seed(rid, addr));
    }

    proptest::proptest! {
        #[test]
        fn request_id_packing_matches_boundaries(sub_id: u64, interval: u32) {
            let id = request_id(sub_id, interval);
            // Re-deriving from the same inputs must always agree (round-trip determinism
            // across the full u64/u32 domain named in spec §8).
            proptest::prop_assert_eq!(id, request_id(sub_id, interval));
        }
    }
}
