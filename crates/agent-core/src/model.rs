//! Core data model shared by every component: subscriptions, requests, commitments,
//! checkpoints, and the committed-interval key.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel interval value meaning "one-time subscription, never stale".
pub const ONE_TIME_INTERVAL: u32 = u32::MAX;

/// A recurring compute order placed by a client contract.
///
/// `interval_seconds == 0` marks an on-demand subscription; the scheduler never tracks it.
/// `max_executions == 0` means open-ended (no upper bound on intervals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// 64-bit subscription identity.
    pub subscription_id: u64,
    /// 256-bit container identity as declared on-chain.
    pub container_id: B256,
    /// The contract that placed the order.
    pub client: Address,
    /// The address that pays fees for fulfillment.
    pub wallet: Address,
    /// Unix seconds at which interval 1 begins.
    pub active_at: u64,
    /// Length of one interval in seconds; 0 disables scheduling.
    pub interval_seconds: u64,
    /// Upper bound on intervals; 0 means unbounded.
    pub max_executions: u64,
    /// Number of distinct agents the marketplace wants to fulfill a request.
    pub redundancy: u16,
    /// Optional verifier contract that checks proofs.
    pub verifier: Option<Address>,
    /// Routing identifier used by the client contract.
    pub route_id: u64,
}

impl Subscription {
    /// Whether this subscription participates in interval scheduling at all.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.interval_seconds > 0
    }

    /// The 1-based interval index at time `now` (unix seconds).
    ///
    /// `interval(t) = floor((t - active_at) / interval_seconds) + 1`. Callers must ensure
    /// `interval_seconds > 0` and `now >= active_at`; violating either is a logic error in the
    /// caller, not something this method can recover from sensibly.
    #[must_use]
    pub fn interval_at(&self, now: u64) -> u32 {
        debug_assert!(self.interval_seconds > 0, "interval_at on an unscheduled subscription");
        let elapsed = now.saturating_sub(self.active_at);
        let idx = elapsed / self.interval_seconds.max(1);
        u32::try_from(idx).unwrap_or(u32::MAX - 1).saturating_add(1)
    }

    /// Whether the subscription has exhausted its bounded execution count at `interval`.
    #[must_use]
    pub const fn is_exhausted_at(&self, interval: u32) -> bool {
        self.max_executions != 0 && interval as u64 > self.max_executions
    }
}

/// Agent-local runtime state layered on top of a [`Subscription`]. Mutated only by the
/// interval scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionState {
    /// The underlying subscription as last observed from chain.
    pub subscription: Subscription,
    /// The interval this agent currently believes is next to prepare.
    pub current_interval: u32,
    /// Wall-clock time this subscription was last touched by the cron tick.
    pub last_processed_at: DateTime<Utc>,
    /// Hash of an in-flight `prepareNextInterval` transaction, if any.
    pub pending_tx: Option<B256>,
    /// Consecutive failed prepare attempts for the current interval.
    pub tx_attempts: u32,
}

impl SubscriptionState {
    /// Start tracking a subscription at its current interval.
    #[must_use]
    pub fn new(subscription: Subscription, now: u64) -> Self {
        let current_interval = if subscription.is_scheduled() {
            subscription.interval_at(now.max(subscription.active_at))
        } else {
            ONE_TIME_INTERVAL
        };
        Self {
            subscription,
            current_interval,
            last_processed_at: Utc::now(),
            pending_tx: None,
            tx_attempts: 0,
        }
    }

    /// Clear a presumed-lost transaction, resetting the retry budget.
    pub fn clear_pending_tx(&mut self) {
        self.pending_tx = None;
        self.tx_attempts = 0;
    }
}

/// The atomic unit of work: one execution slot for `(subscription_id, interval)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStartedEvent {
    /// `keccak256(pack_be(subscription_id, interval))`.
    pub request_id: B256,
    /// Subscription this request belongs to.
    pub subscription_id: u64,
    /// Container that must run this request.
    pub container_id: B256,
    /// 1-based interval index, or [`ONE_TIME_INTERVAL`] for one-shot subscriptions.
    pub interval: u32,
    /// Number of agents expected to fulfill this request.
    pub redundancy: u16,
    /// Whether delivery should go through the inbox rather than direct return.
    pub use_delivery_inbox: bool,
    /// Fee paid on successful delivery.
    pub fee_amount: U256,
    /// Token the fee is denominated in.
    pub fee_token: Address,
    /// Optional proof verifier.
    pub verifier: Option<Address>,
    /// Coordinator contract address this request belongs to.
    pub coordinator: Address,
    /// Wallet that will receive the fee.
    pub wallet_address: Address,
    /// Block the event (or synthetic emission) was observed at.
    pub block_number: u64,
}

/// The bundle of request metadata an agent signs alongside a compute result.
///
/// ABI-encoded in the fixed field order below (see spec §6): `bytes32, uint64, bytes32,
/// uint32, bool, uint16, address, uint256, address, address, address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commitment {
    /// `bytes32` — the request this commitment answers.
    pub request_id: B256,
    /// `uint64`.
    pub subscription_id: u64,
    /// `bytes32`.
    pub container_id: B256,
    /// `uint32`.
    pub interval: u32,
    /// `bool`.
    pub use_delivery_inbox: bool,
    /// `uint16`.
    pub redundancy: u16,
    /// `address`, zero address if absent.
    pub verifier: Address,
    /// `uint256`.
    pub fee_amount: U256,
    /// `address`.
    pub fee_token: Address,
    /// `address`.
    pub coordinator: Address,
    /// `address`.
    pub wallet_address: Address,
}

impl Commitment {
    /// Build the commitment that answers `event`, paid to `wallet`.
    #[must_use]
    pub fn from_event(event: &RequestStartedEvent, wallet: Address) -> Self {
        Self {
            request_id: event.request_id,
            subscription_id: event.subscription_id,
            container_id: event.container_id,
            interval: event.interval,
            use_delivery_inbox: event.use_delivery_inbox,
            redundancy: event.redundancy,
            verifier: event.verifier.unwrap_or(Address::ZERO),
            fee_amount: event.fee_amount,
            fee_token: event.fee_token,
            coordinator: event.coordinator,
            wallet_address: wallet,
        }
    }
}

/// Durable cursor marking how far the event stream has been acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last block number processed (inclusive).
    pub block_number: u64,
    /// Hash of that block, if known.
    pub block_hash: Option<B256>,
    /// Timestamp of that block, if known.
    pub block_timestamp: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// A checkpoint at `block_number` with no additional metadata.
    #[must_use]
    pub const fn at(block_number: u64) -> Self {
        Self { block_number, block_hash: None, block_timestamp: None }
    }
}

/// A `(subscription_id, interval)` pair recorded as committed.
///
/// Restated from the reference's string keys (`"sub_id:interval"`) into a strict tuple per
/// the design notes; [`Display`](fmt::Display)/[`FromStr`] provide the serialization boundary
/// used only by the checkpoint store's on-disk append log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommittedKey {
    /// The subscription this commitment belongs to.
    pub subscription_id: u64,
    /// The interval committed.
    pub interval: u32,
}

impl CommittedKey {
    /// Construct a key.
    #[must_use]
    pub const fn new(subscription_id: u64, interval: u32) -> Self {
        Self { subscription_id, interval }
    }
}

impl fmt::Display for CommittedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subscription_id, self.interval)
    }
}

/// Error returned when parsing a malformed `"sub_id:interval"` line.
#[derive(Debug, thiserror::Error)]
#[error("malformed committed-interval key: {0:?}")]
pub struct ParseCommittedKeyError(String);

impl FromStr for CommittedKey {
    type Err = ParseCommittedKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sub, interval) = s
            .split_once(':')
            .ok_or_else(|| ParseCommittedKeyError(s.to_string()))?;
        let subscription_id: u64 =
            sub.parse().map_err(|_| ParseCommittedKeyError(s.to_string()))?;
        let interval: u32 =
            interval.parse().map_err(|_| ParseCommittedKeyError(s.to_string()))?;
        Ok(Self::new(subscription_id, interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(active_at: u64, interval_seconds: u64, max_executions: u64) -> Subscription {
        Subscription {
            subscription_id: 1,
            container_id: B256::ZERO,
            client: Address::ZERO,
            wallet: Address::ZERO,
            active_at,
            interval_seconds,
            max_executions,
            redundancy: 1,
            verifier: None,
            route_id: 0,
        }
    }

    #[test]
    fn interval_is_one_based() {
        let s = sub(1000, 60, 0);
        assert_eq!(s.interval_at(1000), 1);
        assert_eq!(s.interval_at(1059), 1);
        assert_eq!(s.interval_at(1060), 2);
        assert_eq!(s.interval_at(1150), 3);
    }

    #[test]
    fn exhausted_boundary() {
        let s = sub(1000, 60, 3);
        assert!(!s.is_exhausted_at(3));
        assert!(s.is_exhausted_at(4));
        let open = sub(1000, 60, 0);
        assert!(!open.is_exhausted_at(1_000_000));
    }

    #[test]
    fn committed_key_round_trips_through_display() {
        let key = CommittedKey::new(42, 7);
        let rendered = key.to_string();
        assert_eq!(rendered, "42:7");
        let parsed: CommittedKey = rendered.parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn committed_key_rejects_malformed_input() {
        assert!("not-a-key".parse::<CommittedKey>().is_err());
        assert!("1".parse::<CommittedKey>().is_err());
    }
}
