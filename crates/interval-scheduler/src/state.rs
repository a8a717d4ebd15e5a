//! Tracked-subscription and committed-interval state, factored out of [`crate::scheduler`] so
//! the bookkeeping (what's tracked, what's already committed) can be unit-tested without a
//! chain collaborator. Grounded on `fleet-core/src/safety/mod.rs`'s habit of keeping mutable
//! bookkeeping behind a small struct with plain getters/setters rather than threading raw maps
//! through every call site.

use dashmap::{DashMap, DashSet};

use agent_core::{CommittedKey, Subscription, SubscriptionState};

/// Subscriptions currently tracked by the cron timer, keyed by subscription id.
#[derive(Debug, Default)]
pub struct TrackedSet {
    inner: DashMap<u64, SubscriptionState>,
}

impl TrackedSet {
    /// An empty tracked set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking `subscription`, computing its initial `current_interval` as of `now`
    /// (unix seconds). A no-op (but refreshes nothing) if already tracked — callers that want
    /// to re-sync an already-tracked subscription should go through the cron timer's interval
    /// refresh instead.
    pub fn track(&self, subscription: Subscription, now: u64) {
        self.inner
            .entry(subscription.subscription_id)
            .or_insert_with(|| SubscriptionState::new(subscription, now));
    }

    /// Stop tracking a subscription. Returns the removed state, if any.
    pub fn untrack(&self, subscription_id: u64) -> Option<SubscriptionState> {
        self.inner.remove(&subscription_id).map(|(_, state)| state)
    }

    /// Whether `subscription_id` is currently tracked.
    #[must_use]
    pub fn contains(&self, subscription_id: u64) -> bool {
        self.inner.contains_key(&subscription_id)
    }

    /// Number of tracked subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the tracked set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// All tracked subscription ids, snapshotted at call time.
    #[must_use]
    pub fn ids(&self) -> Vec<u64> {
        self.inner.iter().map(|entry| *entry.key()).collect()
    }

    /// Run `f` against the tracked state for `subscription_id`, if present.
    pub fn with_mut<R>(&self, subscription_id: u64, f: impl FnOnce(&mut SubscriptionState) -> R) -> Option<R> {
        self.inner.get_mut(&subscription_id).map(|mut entry| f(entry.value_mut()))
    }

    /// Snapshot the tracked state for `subscription_id`, if present.
    #[must_use]
    pub fn get(&self, subscription_id: u64) -> Option<SubscriptionState> {
        self.inner.get(&subscription_id).map(|entry| entry.value().clone())
    }
}

/// The `(subscription_id, interval)` pairs already known to be committed (prepared on-chain or
/// already satisfied redundancy), so the cron timer doesn't re-prepare them every tick.
#[derive(Debug, Default)]
pub struct CommittedSet {
    inner: DashSet<CommittedKey>,
}

impl CommittedSet {
    /// An empty committed set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` as committed.
    pub fn insert(&self, key: CommittedKey) {
        self.inner.insert(key);
    }

    /// Whether `key` has already been committed.
    #[must_use]
    pub fn contains(&self, key: CommittedKey) -> bool {
        self.inner.contains(&key)
    }

    /// Remove every committed key belonging to `subscription_id`, bounding memory once a
    /// subscription is untracked (spec's "untrack cleanup").
    pub fn remove_subscription(&self, subscription_id: u64) {
        self.inner.retain(|key| key.subscription_id != subscription_id);
    }

    /// Number of committed keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the committed set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256};

    fn sample(id: u64) -> Subscription {
        Subscription {
            subscription_id: id,
            container_id: B256::from([1; 32]),
            client: Address::from([1; 20]),
            wallet: Address::from([2; 20]),
            active_at: 0,
            interval_seconds: 60,
            max_executions: 0,
            redundancy: 1,
            verifier: None,
            route_id: 0,
        }
    }

    #[test]
    fn track_then_untrack_round_trips() {
        let set = TrackedSet::new();
        set.track(sample(1), 1_700_000_000);
        assert!(set.contains(1));
        assert_eq!(set.len(), 1);

        let removed = set.untrack(1);
        assert!(removed.is_some());
        assert!(!set.contains(1));
    }

    #[test]
    fn tracking_twice_does_not_reset_state() {
        let set = TrackedSet::new();
        let now = 1_700_000_000;
        set.track(sample(1), now);
        set.with_mut(1, |state| state.tx_attempts = 2);
        set.track(sample(1), now);
        assert_eq!(set.get(1).unwrap().tx_attempts, 2);
    }

    #[test]
    fn committed_set_scopes_removal_to_one_subscription() {
        let set = CommittedSet::new();
        set.insert(CommittedKey::new(1, 1));
        set.insert(CommittedKey::new(1, 2));
        set.insert(CommittedKey::new(2, 1));

        set.remove_subscription(1);
        assert!(!set.contains(CommittedKey::new(1, 1)));
        assert!(!set.contains(CommittedKey::new(1, 2)));
        assert!(set.contains(CommittedKey::new(2, 1)));
        assert_eq!(set.len(), 1);
    }
}
