//! Top-level pipeline wiring: checkpoint-driven replay, then live delivery driven by the
//! connection state machine. Grounded on `ghostnet-indexer/src/indexer/realtime_processor.rs`'s
//! `start(shutdown)` / `run_subscription()` shape (outer reconnect loop around an inner
//! subscription loop, `tokio::select!` against a cancellation token) generalized to drive the
//! pure [`ConnectionState`] transitions instead of a hand-rolled attempt counter.

use std::sync::Arc;

use agent_core::{Checkpoint, CheckpointStore, RequestStartedEvent};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::replay;
use crate::source::LogSource;
use crate::state_machine::{ConnectionConfig, ConnectionState, WsAttemptOutcome};

/// Auto-checkpoint while live once the observed block has advanced by at least this much
/// since the last save (spec §4.2, "Live delivery").
const CHECKPOINT_BLOCK_STRIDE: u64 = 10;

/// Receiver of decoded `RequestStarted` events, fed by the pipeline during both replay and
/// live delivery. The request handler is the only production implementation.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Handle one decoded event. Must not block indefinitely: a slow subscriber backs up the
    /// pipeline's delivery loop since events are dispatched sequentially.
    async fn on_request_started(&self, event: RequestStartedEvent);
}

#[async_trait]
impl EventSubscriber for mpsc::Sender<RequestStartedEvent> {
    async fn on_request_started(&self, event: RequestStartedEvent) {
        if self.send(event).await.is_err() {
            warn!("event subscriber channel closed; dropping event");
        }
    }
}

/// Wires a [`LogSource`], a [`CheckpointStore`], and an [`EventSubscriber`] into the full
/// replay-then-live pipeline described by spec §4.2.
pub struct EventPipeline<S, C, Sub> {
    source: Arc<S>,
    checkpoints: Arc<C>,
    subscriber: Arc<Sub>,
    deployment_block: u64,
    ws_configured: bool,
    config: ConnectionConfig,
    state: AsyncMutex<ConnectionState>,
    shutdown: CancellationToken,
}

impl<S, C, Sub> EventPipeline<S, C, Sub>
where
    S: LogSource + 'static,
    C: CheckpointStore + 'static,
    Sub: EventSubscriber + 'static,
{
    /// Build a pipeline. `ws_configured` should reflect whether the caller actually set up a
    /// WebSocket URL for `source` — when `false` the state machine stays in `HttpFallback`
    /// forever and never attempts a WS connection.
    pub fn new(
        source: S,
        checkpoints: C,
        subscriber: Sub,
        deployment_block: u64,
        ws_configured: bool,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            source: Arc::new(source),
            checkpoints: Arc::new(checkpoints),
            subscriber: Arc::new(subscriber),
            deployment_block,
            ws_configured,
            config,
            state: AsyncMutex::new(ConnectionState::Init),
            shutdown: CancellationToken::new(),
        }
    }

    /// Current connection state, mostly useful for tests and health checks.
    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Replay from the last checkpoint (or `deployment_block` if none) up to the chain tip,
    /// then spawn the live-delivery task and return. Callers keep the returned `Arc` alive for
    /// as long as the pipeline should run; dropping it does not stop the background task — use
    /// [`stop`](Self::stop) for that.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.replay_from_checkpoint().await?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_live().await;
        });
        Ok(())
    }

    /// Cancel the background live-delivery task. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn replay_from_checkpoint(&self) -> Result<()> {
        let checkpoint = self.checkpoints.load().await?;
        let from_block = checkpoint.map_or(self.deployment_block, |c| c.block_number + 1);
        let latest = self.source.latest_block().await?;

        if from_block > latest {
            debug!(from_block, latest, "nothing to replay, already caught up");
            return Ok(());
        }

        info!(from_block, latest, "starting historical replay");
        let checkpoints = Arc::clone(&self.checkpoints);
        let subscriber = Arc::clone(&self.subscriber);
        replay::replay(self.source.as_ref(), from_block, latest, move |events, checkpoint| {
            let checkpoints = Arc::clone(&checkpoints);
            let subscriber = Arc::clone(&subscriber);
            async move {
                for event in events {
                    subscriber.on_request_started(event).await;
                }
                checkpoints.save(checkpoint).await?;
                Ok(())
            }
        })
        .await?;
        Ok(())
    }

    async fn run_live(self: Arc<Self>) {
        let mut state = ConnectionState::on_start(self.ws_configured);
        *self.state.lock().await = state;

        let mut last_saved_block =
            self.checkpoints.load().await.ok().flatten().map_or(self.deployment_block, |c| c.block_number);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            state = match state {
                ConnectionState::Init => break,
                ConnectionState::WsConnecting { .. } => self.drive_ws_connect(state, &mut last_saved_block).await,
                ConnectionState::WsActive => state.on_ws_closed(),
                ConnectionState::HttpFallback => self.drive_http_fallback(&mut last_saved_block).await,
            };
            *self.state.lock().await = state;
        }

        info!("event pipeline live loop stopped");
    }

    /// Attempt one WS connect from `WsConnecting`. On success, consumes the live stream until
    /// it drops or shutdown fires, returning the next state once consumption ends. On failure,
    /// sleeps the retry delay and returns the next `WsConnecting`/`HttpFallback` state.
    async fn drive_ws_connect(&self, state: ConnectionState, last_saved_block: &mut u64) -> ConnectionState {
        match self.source.connect_ws(self.config.ws_connect_timeout).await {
            Ok(rx) => {
                info!("websocket connected");
                *self.state.lock().await = ConnectionState::WsActive;
                self.consume_ws(rx, last_saved_block).await
            }
            Err(e) => {
                warn!(error = %e, "websocket connect attempt failed");
                tokio::time::sleep(self.config.ws_connect_retry_delay).await;
                state.on_ws_attempt(WsAttemptOutcome::Failed, &self.config)
            }
        }
    }

    async fn consume_ws(
        &self,
        mut rx: mpsc::Receiver<RequestStartedEvent>,
        last_saved_block: &mut u64,
    ) -> ConnectionState {
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return ConnectionState::Init,
                event = rx.recv() => {
                    match event {
                        Some(event) => self.deliver_live_event(event, last_saved_block).await,
                        None => {
                            warn!("websocket stream closed; reconnecting");
                            return ConnectionState::WsActive.on_ws_closed();
                        }
                    }
                }
            }
        }
    }

    async fn drive_http_fallback(&self, last_saved_block: &mut u64) -> ConnectionState {
        let mut poll_interval = tokio::time::interval(self.config.polling_interval);
        let mut recovery_interval = tokio::time::interval(self.config.ws_recovery_interval);
        poll_interval.tick().await; // first tick fires immediately; skip it to honor the configured delay
        recovery_interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return ConnectionState::Init,
                _ = poll_interval.tick() => {
                    if let Err(e) = self.poll_once(last_saved_block).await {
                        warn!(error = %e, "http polling tick failed, continuing");
                    }
                }
                _ = recovery_interval.tick() => {
                    if !self.ws_configured {
                        continue;
                    }
                    match self.source.connect_ws(self.config.ws_connect_timeout).await {
                        Ok(rx) => {
                            info!("connection_recovered: websocket recovered from http fallback");
                            *self.state.lock().await = ConnectionState::HttpFallback.on_recovery_succeeded();
                            return self.consume_ws(rx, last_saved_block).await;
                        }
                        Err(e) => debug!(error = %e, "websocket recovery attempt failed, staying on http"),
                    }
                }
            }
        }
    }

    async fn poll_once(&self, last_saved_block: &mut u64) -> Result<()> {
        let latest = self.source.latest_block().await?;
        if latest <= *last_saved_block {
            return Ok(());
        }
        let events = self.source.fetch_logs(*last_saved_block + 1, latest).await?;
        for event in events {
            self.subscriber.on_request_started(event).await;
        }
        self.checkpoints.save(Checkpoint::at(latest)).await?;
        *last_saved_block = latest;
        Ok(())
    }

    async fn deliver_live_event(&self, event: RequestStartedEvent, last_saved_block: &mut u64) {
        let block_number = event.block_number;
        self.subscriber.on_request_started(event).await;
        if block_number >= last_saved_block.saturating_add(CHECKPOINT_BLOCK_STRIDE) {
            if let Err(e) = self.checkpoints.save(Checkpoint::at(block_number)).await {
                warn!(error = %e, "failed to auto-checkpoint during live delivery");
            } else {
                *last_saved_block = block_number;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{Checkpoint, InMemoryCheckpointStore};
    use alloy::primitives::{Address, B256, U256};
    use std::sync::Mutex;

    fn sample_event(block_number: u64) -> RequestStartedEvent {
        RequestStartedEvent {
            request_id: B256::ZERO,
            subscription_id: 1,
            container_id: B256::ZERO,
            interval: 1,
            redundancy: 1,
            use_delivery_inbox: false,
            fee_amount: U256::ZERO,
            fee_token: Address::ZERO,
            verifier: None,
            coordinator: Address::ZERO,
            wallet_address: Address::ZERO,
            block_number,
        }
    }

    #[derive(Default)]
    struct CollectingSubscriber {
        events: Mutex<Vec<RequestStartedEvent>>,
    }

    #[async_trait]
    impl EventSubscriber for CollectingSubscriber {
        async fn on_request_started(&self, event: RequestStartedEvent) {
            self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(event);
        }
    }

    #[tokio::test]
    async fn replay_delivers_historical_events_and_checkpoints() {
        use crate::source::MockLogSource;

        let source = MockLogSource::new();
        source.set_latest_block(50);
        source.push_historical(sample_event(10));
        source.push_historical(sample_event(20));

        let checkpoints = InMemoryCheckpointStore::new();
        let subscriber = Arc::new(CollectingSubscriber::default());

        let pipeline = Arc::new(EventPipeline::new(
            source,
            checkpoints,
            subscriber.clone(),
            0,
            false,
            ConnectionConfig::default(),
        ));
        pipeline.replay_from_checkpoint().await.unwrap();

        let events = subscriber.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        let saved = pipeline.checkpoints.load().await.unwrap();
        assert_eq!(saved, Some(Checkpoint::at(50)));
    }

    #[tokio::test]
    async fn replay_is_skipped_when_already_caught_up() {
        use crate::source::MockLogSource;

        let source = MockLogSource::new();
        source.set_latest_block(5);
        let checkpoints = InMemoryCheckpointStore::new();
        checkpoints.save(Checkpoint::at(5)).await.unwrap();
        let subscriber = Arc::new(CollectingSubscriber::default());

        let pipeline =
            Arc::new(EventPipeline::new(source, checkpoints, subscriber.clone(), 0, false, ConnectionConfig::default()));
        pipeline.replay_from_checkpoint().await.unwrap();

        assert!(subscriber.events.lock().unwrap().is_empty());
    }
}
