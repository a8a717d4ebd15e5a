//! ABI bindings for the watched event and the router/coordinator/client contract calls.
//!
//! Grounded on the `sol! { event ... }` binding pattern used throughout the reference's
//! `abi/*.rs` modules, narrowed to the single event and call set this system needs (spec §6).
//! The field order of [`Commitment`] is the single source of truth for the commitment's wire
//! format; nothing outside this module re-encodes it independently (design decision, see
//! `SPEC_FULL.md` §9).

use alloy::sol;
use alloy::sol_types::SolValue;

sol! {
    /// Emitted by the coordinator when a request slot opens for fulfillment.
    ///
    /// # Solidity source
    /// ```solidity
    /// event RequestStarted(
    ///     bytes32 indexed requestId,
    ///     uint64 indexed subId,
    ///     bytes32 indexed containerId,
    ///     Commitment commitment
    /// );
    /// ```
    #[derive(Debug, PartialEq, Eq)]
    event RequestStarted(
        bytes32 indexed requestId,
        uint64 indexed subId,
        bytes32 indexed containerId,
        Commitment commitment
    );

    /// The commitment tuple carried alongside `RequestStarted` and re-submitted with the
    /// compute result. Fixed field order per spec §6.
    #[derive(Debug, PartialEq, Eq)]
    struct Commitment {
        bytes32 requestId;
        uint64 subscriptionId;
        bytes32 containerId;
        uint32 interval;
        bool useDeliveryInbox;
        uint16 redundancy;
        address verifier;
        uint256 feeAmount;
        address feeToken;
        address coordinator;
        address walletAddress;
    }

    /// Router contract: subscription registry and interval bookkeeping.
    #[sol(rpc)]
    interface IRouter {
        function getComputeSubscription(uint64 subId) external view returns (
            uint256 containerId,
            address client,
            address wallet,
            uint64 activeAt,
            uint64 intervalSeconds,
            uint64 maxExecutions,
            uint16 redundancy,
            address verifier,
            uint64 routeId
        );
        function getComputeSubscriptionInterval(uint64 subId) external view returns (uint32);
        function getLastSubscriptionId() external view returns (uint64);
        function getSubscriptionBatchReader() external view returns (address);
    }

    /// Batch reader contract: bulk subscription discovery.
    #[sol(rpc)]
    interface IBatchReader {
        function getSubscriptions(uint64 start, uint64 end, uint256 blockNumber)
            external
            view
            returns (bytes memory encodedSubscriptions);
    }

    /// Coordinator contract: redundancy accounting, prepare, and result submission.
    #[sol(rpc)]
    interface ICoordinator {
        function redundancyCount(bytes32 requestId) external view returns (uint16);
        function prepareNextInterval(uint64 subId, uint32 interval, address wallet)
            external
            returns (bytes32 txHash);
        function reportComputeResult(
            uint32 interval,
            bytes memory inputPayload,
            bytes memory outputPayload,
            bytes memory proofPayload,
            bytes memory commitmentData,
            address nodeWallet
        ) external returns (bool success);
    }

    /// Client contract: per-request input resolution.
    #[sol(rpc)]
    interface IClient {
        function getComputeInputs(uint64 subId, uint32 interval, uint64 timestamp, address caller)
            external
            view
            returns (bytes memory data, uint8 inputType);
    }
}

/// `input_type` values returned by `getComputeInputs` (spec §4.5 step 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    /// Raw bytes, used as-is.
    Raw,
    /// A UTF-8 URI string.
    UriString,
    /// A `(bytes32 hash, bytes uri)` payload envelope.
    Payload,
}

impl InputType {
    /// Decode the on-chain `uint8` discriminant.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Raw),
            1 => Some(Self::UriString),
            2 => Some(Self::Payload),
            _ => None,
        }
    }
}

/// ABI-encode an [`agent_core::Commitment`] through the fixed eleven-field tuple above. The
/// only place in the workspace that produces `commitment_data` for `reportComputeResult`.
#[must_use]
pub fn encode_commitment(commitment: &agent_core::Commitment) -> Vec<u8> {
    let abi = Commitment {
        requestId: commitment.request_id,
        subscriptionId: commitment.subscription_id,
        containerId: commitment.container_id,
        interval: commitment.interval,
        useDeliveryInbox: commitment.use_delivery_inbox,
        redundancy: commitment.redundancy,
        verifier: commitment.verifier,
        feeAmount: commitment.fee_amount,
        feeToken: commitment.fee_token,
        coordinator: commitment.coordinator,
        walletAddress: commitment.wallet_address,
    };
    abi.abi_encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256, U256};

    #[test]
    fn encode_commitment_is_deterministic() {
        let commitment = agent_core::Commitment {
            request_id: B256::from([1; 32]),
            subscription_id: 7,
            container_id: B256::from([2; 32]),
            interval: 3,
            use_delivery_inbox: false,
            redundancy: 1,
            verifier: Address::ZERO,
            fee_amount: U256::from(100u64),
            fee_token: Address::ZERO,
            coordinator: Address::from([3; 20]),
            wallet_address: Address::from([4; 20]),
        };
        assert_eq!(encode_commitment(&commitment), encode_commitment(&commitment));
        assert!(!encode_commitment(&commitment).is_empty());
    }
}
