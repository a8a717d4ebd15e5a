//! The interval scheduler: sync timer (subscription discovery) and cron timer (commitment
//! generation), wired on top of [`crate::state`] and [`crate::circuit`]. Tick-loop shape
//! grounded on `ghost-fleet/src/service.rs`'s `FleetService::run()` (tick via
//! `tokio::time::interval`, per-item work wrapped so one failure doesn't kill the loop) split
//! into two independent timers per spec §4.4 rather than ghost-fleet's single tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_core::{CommittedKey, RequestStartedEvent, Subscription, SubscriptionState};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chain_client::{CoordinatorChain, RouterChain};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::circuit::{self, PrepareOutcome};
use crate::error::Result;
use crate::state::{CommittedSet, TrackedSet};

/// Subscriptions fetched per batch-reader call during the sync timer (spec §4.4).
pub const SYNC_BATCH_SIZE: u64 = 100;

/// Timing and retry configuration for the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// How often the sync timer discovers newly-registered subscriptions.
    pub sync_period: Duration,
    /// How often the cron timer re-evaluates tracked subscriptions.
    pub cron_interval: Duration,
    /// Subscriptions fetched per batch-reader call.
    pub sync_batch_size: u64,
    /// Consecutive prepare failures allowed before giving up on an interval.
    pub max_retry_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_period: Duration::from_secs(3),
            cron_interval: Duration::from_secs(60),
            sync_batch_size: SYNC_BATCH_SIZE,
            max_retry_attempts: circuit::DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }
}

/// Point-in-time scheduler statistics, exposed via [`IntervalScheduler::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Number of subscriptions currently tracked.
    pub tracked_count: usize,
    /// Number of `(subscription, interval)` pairs recorded as committed.
    pub committed_count: usize,
    /// Highest subscription id observed by the sync timer so far.
    pub last_synced_subscription_id: u64,
}

/// Lifecycle events the scheduler emits, mirrored closely on spec §4.4's event names. All
/// methods default to no-ops so callers only override what they need, matching
/// [`agent_core::AgentHooks`]'s closed-trait style.
#[async_trait]
pub trait SchedulerEvents: Send + Sync {
    /// A `prepareNextInterval` call succeeded; carries a synthesized `RequestStartedEvent` so
    /// the request handler can act without waiting on the push channel.
    async fn on_commitment_success(&self, _event: RequestStartedEvent) {}
    /// A `prepareNextInterval` call exhausted its retry budget.
    async fn on_commitment_failed(&self, _subscription_id: u64, _interval: u32, _reason: String) {}
    /// A subscription entered the tracked set.
    async fn on_subscription_tracked(&self, _subscription_id: u64) {}
    /// A subscription left the tracked set.
    async fn on_subscription_untracked(&self, _subscription_id: u64) {}
    /// A sync pass completed, discovering `new_count` subscriptions.
    async fn on_sync_completed(&self, _new_count: usize) {}
    /// A sync pass failed outright (the chain call itself errored).
    async fn on_sync_error(&self, _message: String) {}
    /// A sync tick ran, whether or not it found anything new.
    async fn on_sync_tick(&self) {}
}

impl SchedulerEvents for () {}

/// Everything the scheduler needs from the chain: subscription discovery plus commitment
/// generation. Implemented by `chain_client::ChainClient`'s `RouterChain + CoordinatorChain`
/// halves.
pub trait SchedulerChain: RouterChain + CoordinatorChain {}
impl<T: RouterChain + CoordinatorChain> SchedulerChain for T {}

/// Drives subscription discovery and per-interval commitment generation.
pub struct IntervalScheduler<C, R, E = ()> {
    chain: Arc<C>,
    registry: Arc<R>,
    events: Arc<E>,
    wallet: Address,
    coordinator_address: Address,
    tracked: TrackedSet,
    committed: CommittedSet,
    last_synced_id: AtomicU64,
    config: SchedulerConfig,
    shutdown: CancellationToken,
}

impl<C, R, E> IntervalScheduler<C, R, E>
where
    C: SchedulerChain + 'static,
    R: agent_core::Registry + 'static,
    E: SchedulerEvents + 'static,
{
    /// Build a scheduler. `wallet` is the agent's own address, used as the `wallet` argument to
    /// `prepareNextInterval`; `coordinator_address` is stamped onto synthesized
    /// `RequestStartedEvent`s emitted on `commitment:success`.
    pub fn new(
        chain: C,
        registry: R,
        events: E,
        wallet: Address,
        coordinator_address: Address,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            chain: Arc::new(chain),
            registry: Arc::new(registry),
            events: Arc::new(events),
            wallet,
            coordinator_address,
            tracked: TrackedSet::new(),
            committed: CommittedSet::new(),
            last_synced_id: AtomicU64::new(0),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Begin tracking a subscription directly (used by tests and by callers that already hold
    /// a `Subscription`, bypassing the sync timer).
    pub fn track(&self, subscription: Subscription, now: u64) {
        if !subscription.is_scheduled() {
            return;
        }
        self.tracked.track(subscription, now);
    }

    /// Stop tracking a subscription and forget its committed intervals.
    pub fn untrack(&self, subscription_id: u64) {
        if self.tracked.untrack(subscription_id).is_some() {
            self.committed.remove_subscription(subscription_id);
        }
    }

    /// Record `(subscription_id, interval)` as already committed.
    pub fn mark_committed(&self, subscription_id: u64, interval: u32) {
        self.committed.insert(CommittedKey::new(subscription_id, interval));
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            tracked_count: self.tracked.len(),
            committed_count: self.committed.len(),
            last_synced_subscription_id: self.last_synced_id.load(Ordering::Relaxed),
        }
    }

    /// Spawn the sync and cron timers as background tasks.
    pub fn start(self: &Arc<Self>) {
        let sync_scheduler = Arc::clone(self);
        tokio::spawn(async move { sync_scheduler.sync_loop().await });

        let cron_scheduler = Arc::clone(self);
        tokio::spawn(async move { cron_scheduler.cron_loop().await });
    }

    /// Cancel both timers. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn sync_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.sync_period);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.events.on_sync_tick().await;
                    if let Err(e) = self.sync_tick().await {
                        warn!(error = %e, "sync tick failed");
                        self.events.on_sync_error(e.to_string()).await;
                    }
                }
            }
        }
    }

    async fn cron_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.cron_interval);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.cron_tick().await,
            }
        }
    }

    /// Discover newly-registered subscriptions since the last sync pass.
    async fn sync_tick(&self) -> Result<()> {
        let last_subscription_id = self.chain.get_last_subscription_id().await?;
        let mut start = self.last_synced_id.load(Ordering::Relaxed) + 1;
        if start > last_subscription_id {
            return Ok(());
        }

        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        let mut discovered = 0usize;

        while start <= last_subscription_id {
            let end = start.saturating_add(self.config.sync_batch_size).min(last_subscription_id + 1);
            let batch = self.chain.get_subscriptions_batch(start, end, 0).await?;

            for subscription in batch {
                if self.should_track(&subscription, now) {
                    self.tracked.track(subscription, now);
                    self.events.on_subscription_tracked(subscription.subscription_id).await;
                    discovered += 1;
                }
            }

            start = end;
        }

        self.last_synced_id.store(last_subscription_id, Ordering::Relaxed);
        self.events.on_sync_completed(discovered).await;
        debug!(discovered, last_subscription_id, "sync tick complete");
        Ok(())
    }

    fn should_track(&self, subscription: &Subscription, now: u64) -> bool {
        if subscription.container_id.is_zero() || subscription.client.is_zero() {
            return false;
        }
        if !subscription.is_scheduled() {
            return false;
        }
        if now < subscription.active_at {
            return false;
        }
        if subscription.max_executions > 0 {
            let elapsed_intervals = (now - subscription.active_at) / subscription.interval_seconds.max(1);
            if elapsed_intervals >= subscription.max_executions {
                return false;
            }
        }
        if !self.registry.supports(subscription.container_id) {
            return false;
        }
        true
    }

    /// Re-evaluate every tracked subscription for the current tick.
    async fn cron_tick(&self) {
        let now = Utc::now();
        let unix_now = u64::try_from(now.timestamp()).unwrap_or(0);

        for subscription_id in self.tracked.ids() {
            if let Err(e) = self.process_tracked(subscription_id, now, unix_now).await {
                warn!(subscription_id, error = %e, "cron tick failed for subscription, continuing");
            }
        }
    }

    async fn process_tracked(&self, subscription_id: u64, now: chrono::DateTime<Utc>, unix_now: u64) -> Result<()> {
        let Some(mut snapshot) = self.tracked.get(subscription_id) else { return Ok(()) };

        match self.chain.get_subscription_interval(subscription_id).await {
            Ok(current_interval) => snapshot.current_interval = current_interval,
            Err(chain_client::ChainError::SubscriptionNotFound(_)) => {
                self.untrack(subscription_id);
                self.events.on_subscription_untracked(subscription_id).await;
                return Ok(());
            }
            Err(e) => {
                debug!(subscription_id, error = %e, "transient error refreshing interval, using local computation");
                if snapshot.subscription.is_scheduled() {
                    snapshot.current_interval = snapshot.subscription.interval_at(unix_now);
                }
            }
        }

        if !snapshot.subscription.is_scheduled() {
            self.untrack(subscription_id);
            self.events.on_subscription_untracked(subscription_id).await;
            return Ok(());
        }

        circuit::prune_if_stale(&mut snapshot, now);
        self.tracked.with_mut(subscription_id, |state| {
            state.current_interval = snapshot.current_interval;
            circuit::prune_if_stale(state, now);
        });

        if snapshot.subscription.is_exhausted_at(snapshot.current_interval) {
            self.untrack(subscription_id);
            self.events.on_subscription_untracked(subscription_id).await;
            return Ok(());
        }

        if !self.should_process(&snapshot, unix_now) {
            return Ok(());
        }

        let key = CommittedKey::new(subscription_id, snapshot.current_interval);
        if self.committed.contains(key) {
            return Ok(());
        }

        let request_id = chain_client::request_id(subscription_id, snapshot.current_interval);
        if self.chain.redundancy_count(request_id).await? > 0 {
            self.committed.insert(key);
            return Ok(());
        }

        // Re-verify immediately before sending: if the chain has already moved past this
        // interval since we read it above, someone else raced us — skip rather than prepare a
        // stale interval.
        if let Ok(latest_interval) = self.chain.get_subscription_interval(subscription_id).await {
            if latest_interval > snapshot.current_interval {
                return Ok(());
            }
        }

        self.try_prepare(subscription_id, snapshot, now).await
    }

    fn should_process(&self, state: &SubscriptionState, unix_now: u64) -> bool {
        if unix_now < state.subscription.active_at {
            return false;
        }
        if state.pending_tx.is_some() {
            return false;
        }
        if circuit::retry_budget_exhausted(state, self.config.max_retry_attempts) {
            return false;
        }
        if state.subscription.max_executions > 0 && u64::from(state.current_interval) > state.subscription.max_executions {
            return false;
        }
        true
    }

    async fn try_prepare(
        &self,
        subscription_id: u64,
        snapshot: SubscriptionState,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let interval = snapshot.current_interval;
        match self.chain.prepare_next_interval(subscription_id, interval, self.wallet).await {
            Ok(tx_hash) => {
                info!(subscription_id, interval, %tx_hash, "commitment prepared");
                self.committed.insert(CommittedKey::new(subscription_id, interval));
                self.tracked.with_mut(subscription_id, |state| {
                    state.pending_tx = Some(tx_hash);
                    state.last_processed_at = now;
                });

                let event = RequestStartedEvent {
                    request_id: chain_client::request_id(subscription_id, interval),
                    subscription_id,
                    container_id: snapshot.subscription.container_id,
                    interval,
                    redundancy: snapshot.subscription.redundancy,
                    use_delivery_inbox: false,
                    fee_amount: U256::ZERO,
                    fee_token: Address::ZERO,
                    verifier: snapshot.subscription.verifier,
                    coordinator: self.coordinator_address,
                    wallet_address: snapshot.subscription.wallet,
                    block_number: 0,
                };
                self.events.on_commitment_success(event).await;
                Ok(())
            }
            Err(e) => {
                match circuit::classify_prepare_failure(&e) {
                    PrepareOutcome::AlreadyExecuted => {
                        self.committed.insert(CommittedKey::new(subscription_id, interval));
                        self.tracked.with_mut(subscription_id, |state| {
                            state.current_interval = state.current_interval.saturating_add(1);
                            state.clear_pending_tx();
                        });
                    }
                    PrepareOutcome::Hold => {
                        debug!(subscription_id, interval, "no next interval yet, holding");
                    }
                    PrepareOutcome::Untrack => {
                        self.untrack(subscription_id);
                        self.events.on_subscription_untracked(subscription_id).await;
                    }
                    PrepareOutcome::Retry => {
                        let attempts = self.tracked.with_mut(subscription_id, |state| {
                            state.tx_attempts = state.tx_attempts.saturating_add(1);
                            state.last_processed_at = now;
                            state.tx_attempts
                        });
                        if let Some(attempts) = attempts {
                            if attempts >= self.config.max_retry_attempts {
                                self.events
                                    .on_commitment_failed(subscription_id, interval, e.to_string())
                                    .await;
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{ContainerMetadata, RegistryStats};
    use alloy::primitives::B256;
    use chain_client::MockChainClient;

    struct AllowAllRegistry;

    #[async_trait]
    impl agent_core::Registry for AllowAllRegistry {
        async fn load(&self) -> std::result::Result<(), agent_core::AgentError> {
            Ok(())
        }
        async fn reload(&self) -> std::result::Result<(), agent_core::AgentError> {
            Ok(())
        }
        fn get_container(&self, _container_id: &str) -> Option<ContainerMetadata> {
            None
        }
        fn supports(&self, _container_id: B256) -> bool {
            true
        }
        fn stats(&self) -> RegistryStats {
            RegistryStats { container_count: 1 }
        }
    }

    fn sample_subscription(id: u64) -> Subscription {
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

    fn scheduler() -> IntervalScheduler<MockChainClient, AllowAllRegistry, ()> {
        IntervalScheduler::new(
            MockChainClient::new(),
            AllowAllRegistry,
            (),
            Address::from([9; 20]),
            Address::from([8; 20]),
            SchedulerConfig::default(),
        )
    }

    #[tokio::test]
    async fn sync_tick_tracks_eligible_subscriptions() {
        let scheduler = scheduler();
        scheduler.chain.insert_subscription(sample_subscription(1));
        scheduler.sync_tick().await.unwrap();

        assert_eq!(scheduler.stats().tracked_count, 1);
        assert_eq!(scheduler.stats().last_synced_subscription_id, 1);
    }

    #[tokio::test]
    async fn sync_tick_skips_unscheduled_subscriptions() {
        let scheduler = scheduler();
        let mut sub = sample_subscription(1);
        sub.interval_seconds = 0;
        scheduler.chain.insert_subscription(sub);
        scheduler.sync_tick().await.unwrap();

        assert_eq!(scheduler.stats().tracked_count, 0);
    }

    #[tokio::test]
    async fn cron_tick_prepares_due_subscription() {
        let scheduler = scheduler();
        let sub = sample_subscription(1);
        scheduler.chain.insert_subscription(sub);
        scheduler.chain.set_interval(1, 1);
        scheduler.track(sub, 0);

        scheduler.cron_tick().await;

        assert_eq!(scheduler.chain.prepared_calls().len(), 1);
        assert_eq!(scheduler.stats().committed_count, 1);
    }

    #[tokio::test]
    async fn cron_tick_skips_already_redundant_request() {
        let scheduler = scheduler();
        let sub = sample_subscription(1);
        scheduler.chain.insert_subscription(sub);
        scheduler.chain.set_interval(1, 1);
        scheduler.track(sub, 0);

        let request_id = chain_client::request_id(1, 1);
        scheduler.chain.set_redundancy_count(request_id, 1);

        scheduler.cron_tick().await;

        assert_eq!(scheduler.chain.prepared_calls().len(), 0);
        assert!(scheduler.committed.contains(CommittedKey::new(1, 1)));
    }

    #[tokio::test]
    async fn cron_tick_untracks_subscription_once_max_executions_exhausted() {
        let scheduler = scheduler();
        let mut sub = sample_subscription(1);
        sub.max_executions = 3;
        scheduler.chain.insert_subscription(sub);
        scheduler.chain.set_interval(1, 4); // already past the last allowed interval
        scheduler.track(sub, 0);

        scheduler.cron_tick().await;

        assert_eq!(scheduler.chain.prepared_calls().len(), 0);
        assert_eq!(scheduler.stats().tracked_count, 0);
    }

    #[tokio::test]
    async fn untrack_removes_committed_keys_for_subscription() {
        let scheduler = scheduler();
        scheduler.mark_committed(1, 1);
        scheduler.mark_committed(1, 2);
        scheduler.track(sample_subscription(1), 0);

        scheduler.untrack(1);

        assert!(!scheduler.committed.contains(CommittedKey::new(1, 1)));
        assert!(!scheduler.tracked.contains(1));
    }
}
