//! Retry-cap classification and stale-transaction pruning. Generalized from
//! `fleet-core/src/safety/mod.rs`'s `CircuitBreaker` (consecutive-error counter per wallet,
//! cooldown-based auto-reset) to this scheduler's per-`(subscription, interval)` retry budget
//! carried directly on [`SubscriptionState`] rather than a separate side table, since the
//! state is already per-subscription and mutated in the same place.

use std::time::Duration;

use agent_core::SubscriptionState;
use chain_client::ChainError;
use chrono::{DateTime, Utc};

/// Default cap on consecutive `prepareNextInterval` failures before giving up on an interval
/// (spec §4.4, cron timer step 3).
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// How long a `pending_tx` may sit unconfirmed before the scheduler treats it as lost and
/// clears it (spec §4.4, "Stale-tx pruner").
pub const STALE_TX_THRESHOLD: Duration = Duration::from_secs(300);

/// What a `prepareNextInterval` failure means for the tracked subscription (spec §4.4's
/// scheduler-specific error taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The chain already considers this interval executed (arithmetic overflow/underflow):
    /// mark committed and advance, not a failure.
    AlreadyExecuted,
    /// `NoNextInterval`: the client hasn't triggered this interval yet. Hold, don't retry-count.
    Hold,
    /// Execution reverted, simulation failed, or the client address is zero: stop tracking.
    Untrack,
    /// Anything else: count against the retry budget.
    Retry,
}

/// Classify a `prepareNextInterval` error per spec §4.4's taxonomy.
#[must_use]
pub fn classify_prepare_failure(error: &ChainError) -> PrepareOutcome {
    if error.is_protocol_logical() {
        return match error {
            ChainError::NoNextInterval => PrepareOutcome::Hold,
            _ => PrepareOutcome::AlreadyExecuted,
        };
    }
    if error.is_subscription_terminal() {
        return PrepareOutcome::Untrack;
    }
    PrepareOutcome::Retry
}

/// Whether `state` has exhausted its retry budget for the current interval.
#[must_use]
pub fn retry_budget_exhausted(state: &SubscriptionState, max_retry_attempts: u32) -> bool {
    state.tx_attempts >= max_retry_attempts
}

/// Whether `state`'s `pending_tx` has been unconfirmed long enough to be treated as lost.
#[must_use]
pub fn is_stale(state: &SubscriptionState, now: DateTime<Utc>) -> bool {
    if state.pending_tx.is_none() {
        return false;
    }
    let threshold = chrono::Duration::from_std(STALE_TX_THRESHOLD).unwrap_or_else(|_| chrono::Duration::minutes(5));
    now.signed_duration_since(state.last_processed_at) > threshold
}

/// Clear a stale `pending_tx`/`tx_attempts` pair if `state` qualifies. Returns `true` if it was
/// pruned.
pub fn prune_if_stale(state: &mut SubscriptionState, now: DateTime<Utc>) -> bool {
    if is_stale(state, now) {
        state.clear_pending_tx();
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::Subscription;
    use alloy::primitives::{Address, B256};

    fn sample_state() -> SubscriptionState {
        let subscription = Subscription {
            subscription_id: 1,
            container_id: B256::from([1; 32]),
            client: Address::from([1; 20]),
            wallet: Address::from([2; 20]),
            active_at: 0,
            interval_seconds: 60,
            max_executions: 0,
            redundancy: 1,
            verifier: None,
            route_id: 0,
        };
        SubscriptionState::new(subscription, 0)
    }

    #[test]
    fn no_next_interval_holds_without_counting_as_retry() {
        assert_eq!(classify_prepare_failure(&ChainError::NoNextInterval), PrepareOutcome::Hold);
    }

    #[test]
    fn arithmetic_overflow_counts_as_already_executed() {
        assert_eq!(
            classify_prepare_failure(&ChainError::ArithmeticAlreadyExecuted),
            PrepareOutcome::AlreadyExecuted
        );
    }

    #[test]
    fn subscription_terminal_errors_untrack() {
        assert_eq!(classify_prepare_failure(&ChainError::SubscriptionNotFound(1)), PrepareOutcome::Untrack);
        assert_eq!(
            classify_prepare_failure(&ChainError::ExecutionReverted("boom".to_string())),
            PrepareOutcome::Untrack
        );
    }

    #[test]
    fn unclassified_errors_count_as_retry() {
        assert_eq!(classify_prepare_failure(&ChainError::InvalidAddress("bad".to_string())), PrepareOutcome::Retry);
    }

    #[test]
    fn no_pending_tx_is_never_stale() {
        let state = sample_state();
        assert!(!is_stale(&state, Utc::now()));
    }

    #[test]
    fn pending_tx_older_than_threshold_is_pruned() {
        let mut state = sample_state();
        state.pending_tx = Some(B256::from([3; 32]));
        state.tx_attempts = 2;
        state.last_processed_at = Utc::now() - chrono::Duration::minutes(6);

        assert!(prune_if_stale(&mut state, Utc::now()));
        assert!(state.pending_tx.is_none());
        assert_eq!(state.tx_attempts, 0);
    }

    #[test]
    fn pending_tx_within_threshold_is_not_pruned() {
        let mut state = sample_state();
        state.pending_tx = Some(B256::from([3; 32]));
        state.last_processed_at = Utc::now() - chrono::Duration::minutes(1);

        assert!(!prune_if_stale(&mut state, Utc::now()));
        assert!(state.pending_tx.is_some());
    }
}
