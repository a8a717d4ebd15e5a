//! Lifecycle notifications fired by the request handler.
//!
//! Restated from the reference's open-ended bag of optional callbacks into a single closed
//! trait (see spec §9 REDESIGN): every lifecycle point is a named method with a typed
//! payload and a no-op default body, grounded on `ActionPlugin`'s `#[async_trait]` shape with
//! default-bodied methods.

use alloy::primitives::{B256, U256};
use async_trait::async_trait;

use crate::model::RequestStartedEvent;

/// Why a request was skipped instead of executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// `request_id` was already in-flight or `is_processed` reported true.
    AlreadyProcessed,
    /// The on-chain interval has advanced beyond this event by more than the staleness budget.
    StaleReplay {
        /// Interval carried by the event.
        event_interval: u32,
        /// Interval currently reported by chain.
        current_interval: u32,
    },
    /// After the priority wait, redundancy was already met by other agents.
    RedundancyMet {
        /// Number of agents that had already fulfilled this request.
        observed: u16,
        /// Number required.
        required: u16,
    },
    /// No configured container serves this request's `container_id`.
    UnsupportedContainer,
}

/// The outcome of a successful `reportComputeResult` submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// The request that was fulfilled.
    pub request_id: B256,
    /// Transaction hash of the `reportComputeResult` call.
    pub tx_hash: B256,
    /// Gas used by the transaction, if reported by the receipt.
    pub gas_used: Option<u64>,
}

/// The outcome of a failed attempt to fulfill a request (steps 8-11 of the handler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureOutcome {
    /// The request that failed.
    pub request_id: B256,
    /// Human-readable failure message, prefixed with the stage that produced it.
    pub message: String,
    /// Transaction hash, if a transaction was sent before the failure occurred.
    pub tx_hash: Option<B256>,
}

/// Proof-of-work receipt accounting, attached to [`DeliveryOutcome`] when a verifier is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GasAccounting {
    /// Effective gas price paid, in wei.
    pub effective_gas_price: U256,
}

/// Closed enumeration of lifecycle callbacks the request handler fires while driving a
/// request to completion. Every method defaults to a no-op; implement only the ones you
/// need. `()` implements this trait with every method at its default, for callers that want
/// no hooks at all.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Fired immediately after dedup passes, before any further processing (step 3).
    async fn on_request_started(&self, _event: &RequestStartedEvent) {}

    /// Fired whenever `handle` exits early without attempting execution.
    async fn on_request_skipped(&self, _event: &RequestStartedEvent, _reason: SkipReason) {}

    /// Fired after a successful `reportComputeResult` receipt (status 1).
    async fn on_compute_delivered(&self, _outcome: &DeliveryOutcome) {}

    /// Fired on any failure during inputs/execute/submit, except nonce-collision errors,
    /// which are silently dropped per spec §4.5 step 12.
    async fn on_request_failed(&self, _outcome: &FailureOutcome) {}
}

#[async_trait]
impl AgentHooks for () {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        started: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl AgentHooks for Recorder {
        async fn on_request_started(&self, _event: &RequestStartedEvent) {
            self.started.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn unit_hooks_are_genuinely_no_ops() {
        let hooks = ();
        hooks.on_compute_delivered(&DeliveryOutcome {
            request_id: B256::ZERO,
            tx_hash: B256::ZERO,
            gas_used: None,
        })
        .await;
    }

    #[tokio::test]
    async fn custom_hook_overrides_one_method() {
        let rec = Recorder { started: std::sync::atomic::AtomicUsize::new(0) };
        let event = sample_event();
        rec.on_request_started(&event).await;
        rec.on_request_started(&event).await;
        assert_eq!(rec.started.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    fn sample_event() -> RequestStartedEvent {
        RequestStartedEvent {
            request_id: B256::ZERO,
            subscription_id: 1,
            container_id: B256::ZERO,
            interval: 1,
            redundancy: 1,
            use_delivery_inbox: false,
            fee_amount: U256::ZERO,
            fee_token: alloy::primitives::Address::ZERO,
            verifier: None,
            coordinator: alloy::primitives::Address::ZERO,
            wallet_address: alloy::primitives::Address::ZERO,
            block_number: 0,
        }
    }
}
