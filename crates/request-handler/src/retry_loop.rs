//! Handler-level retry timer (spec §4.5, "Retry loop (Handler-level, optional)"): every tick,
//! take at most one retryable event, reset its status, fabricate a minimum-viable synthetic
//! `RequestStartedEvent`, and re-run `handle`. Grounded on `ghost-fleet/src/service.rs`'s
//! auxiliary timer-task shape (`tokio::time::interval` + `tokio::select!` against a shutdown
//! token).

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agent_core::{AgentHooks, PayloadResolver, RequestStartedEvent};
use chain_client::ChainClient;
use container_supervisor::ContainerRuntime;

use crate::handler::RequestHandler;
use crate::scheduler_handle::SchedulerHandle;

/// Default interval between retry-loop ticks.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Identifies one retryable request. Just enough to reconstruct a minimum-viable event; the
/// caller's tracking of richer fields (fee amount, verifier, etc.) is not carried through a
/// retry, per spec §4.5's own description of the synthesized event.
#[derive(Debug, Clone, Copy)]
pub struct RetryableRequest {
    /// The request to retry.
    pub request_id: B256,
    /// Its subscription.
    pub subscription_id: u64,
    /// Its container.
    pub container_id: B256,
    /// Its interval.
    pub interval: u32,
}

/// Collaborator providing the retry loop's event source, installed only when both methods are
/// wired up by the caller.
#[async_trait]
pub trait RetryEventSource: Send + Sync {
    /// Events eligible for retry, i.e. previously failed and under `max_retries` attempts.
    async fn get_retryable_events(&self, max_retries: u32) -> Vec<RetryableRequest>;

    /// Clear a request's failed status so a subsequent failure doesn't double-count it.
    async fn reset_event_for_retry(&self, request_id: B256);
}

/// Drives the optional Handler-level retry timer.
pub struct RetryLoop<C, R, S, P, H, Src> {
    handler: RequestHandler<C, R, S, P, H>,
    source: Arc<Src>,
    interval: Duration,
    max_retries: u32,
    shutdown: CancellationToken,
}

impl<C, R, S, P, H, Src> RetryLoop<C, R, S, P, H, Src>
where
    C: ChainClient + 'static,
    R: ContainerRuntime + 'static,
    S: SchedulerHandle + 'static,
    P: PayloadResolver + 'static,
    H: AgentHooks + 'static,
    Src: RetryEventSource + 'static,
{
    /// Build a retry loop over `handler`, polling `source` every `interval` for at most
    /// `max_retries`-eligible events.
    #[must_use]
    pub fn new(handler: RequestHandler<C, R, S, P, H>, source: Src, interval: Duration, max_retries: u32) -> Self {
        Self { handler, source: Arc::new(source), interval, max_retries, shutdown: CancellationToken::new() }
    }

    /// Spawn the retry timer as a background task.
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move { self.run().await });
    }

    /// Cancel the timer. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        info!("retry loop stopped");
    }

    async fn tick(&self) {
        let mut candidates = self.source.get_retryable_events(self.max_retries).await;
        let Some(candidate) = candidates.pop() else { return };

        self.source.reset_event_for_retry(candidate.request_id).await;
        warn!(request_id = %candidate.request_id, "re-running retryable request");

        let event = RequestStartedEvent {
            request_id: candidate.request_id,
            subscription_id: candidate.subscription_id,
            container_id: candidate.container_id,
            interval: candidate.interval,
            redundancy: 1,
            use_delivery_inbox: false,
            fee_amount: U256::ZERO,
            fee_token: Address::ZERO,
            verifier: None,
            coordinator: Address::ZERO,
            wallet_address: Address::ZERO,
            block_number: 0,
        };
        self.handler.handle(event).await;
    }
}
