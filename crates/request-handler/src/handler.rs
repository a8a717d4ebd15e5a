//! The request handler: drives a single `RequestStartedEvent` from dedup through on-chain
//! result submission (spec §4.5's twelve-step sequence). Grounded on `ghost-fleet/src/engine.rs`'s
//! `BehaviorEngine::decide_action` (iterate, decide, act, `#[instrument]`) for the step shape and
//! `ghost-fleet/src/service.rs`'s `process_wallet()` for the per-item error containment pattern
//! (one item's failure never aborts the caller's loop).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use dashmap::DashSet;
use tracing::{debug, info, instrument, warn};

use agent_core::{
    Commitment, ContainerMetadata, DeliveryOutcome, EncodeOptions, FailureOutcome, PayloadResolver,
    RequestStartedEvent, SkipReason, ONE_TIME_INTERVAL,
};
use chain_client::{ChainClient, InputType};
use container_supervisor::ContainerRuntime;
use event_pipeline::EventSubscriber;

use crate::containers::ContainerSource;
use crate::error::HandlerError;
use crate::payload;
use crate::scheduler_handle::SchedulerHandle;

/// Optional caller-supplied "already settled" check (spec §4.5 step 2): consulted alongside
/// the in-flight set so a request already recorded as processed by the caller's own
/// bookkeeping (e.g. a persisted delivery log) is skipped without re-running the in-flight
/// dance. Defaults to `None`, matching [`ContainerSource`]'s inline-callback-first pattern.
pub type IsProcessed = std::sync::Arc<dyn Fn(B256) -> bool + Send + Sync>;

/// How far the on-chain current interval may run ahead of an event's interval before it is
/// treated as a stale replay (spec §4.5 step 4).
const STALE_REPLAY_BUDGET: u32 = 2;

/// Tunable policy knobs, all defaulted to the spec's stated values.
#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    /// Per-attempt container HTTP timeout (spec §4.5 step 9 default).
    pub container_timeout: Duration,
    /// Connection-refused retries before giving up on a container invocation.
    pub container_connect_retries: u32,
    /// Delay between connection-refused retries.
    pub container_retry_delay: Duration,
    /// Content at or under this size is inlined by the payload collaborator instead of
    /// uploaded (spec §4.5 step 10 default).
    pub inline_threshold: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            container_timeout: container_supervisor::DEFAULT_INVOKE_TIMEOUT,
            container_connect_retries: container_supervisor::DEFAULT_CONNECT_RETRIES,
            container_retry_delay: container_supervisor::DEFAULT_RETRY_DELAY,
            inline_threshold: 1024,
        }
    }
}

struct Inner<C, R, S, P, H> {
    chain: C,
    runtime: R,
    scheduler: S,
    payload: P,
    hooks: H,
    containers: ContainerSource,
    agent_address: Address,
    config: HandlerConfig,
    in_flight: DashSet<B256>,
    is_processed: Option<IsProcessed>,
}

/// Drives requests to completion: at most one concurrent `handle` per `request_id` (spec §4.5
/// invariant), enforced by an in-flight set shared across every clone.
pub struct RequestHandler<C, R, S, P, H = ()> {
    inner: Arc<Inner<C, R, S, P, H>>,
}

impl<C, R, S, P, H> Clone for RequestHandler<C, R, S, P, H> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C, R, S, P, H> RequestHandler<C, R, S, P, H>
where
    C: ChainClient + 'static,
    R: ContainerRuntime + 'static,
    S: SchedulerHandle + 'static,
    P: PayloadResolver + 'static,
    H: agent_core::AgentHooks + 'static,
{
    /// Build a handler. `agent_address` both signs outbound submissions (`node_wallet`) and is
    /// the `caller` passed to `getComputeInputs`.
    pub fn new(
        chain: C,
        runtime: R,
        scheduler: S,
        payload: P,
        hooks: H,
        containers: ContainerSource,
        agent_address: Address,
        config: HandlerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                chain,
                runtime,
                scheduler,
                payload,
                hooks,
                containers,
                agent_address,
                config,
                in_flight: DashSet::new(),
                is_processed: None,
            }),
        }
    }

    /// Install an `is_processed(request_id)` callback consulted at step 2 alongside the
    /// in-flight set (spec §4.5 step 2). Must be called before the handler is cloned (e.g.
    /// before it is registered as an `EventSubscriber` or handed to a `RetryLoop`).
    #[must_use]
    pub fn with_is_processed(mut self, is_processed: IsProcessed) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_is_processed must be called before the handler is cloned")
            .is_processed = Some(is_processed);
        self
    }

    /// Containers registered via the config map, keyed by declared id — what the supervisor's
    /// `prepare()` expects.
    #[must_use]
    pub fn configured_containers(&self) -> HashMap<String, ContainerMetadata> {
        self.inner.containers.configured()
    }

    /// Number of requests currently being handled.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Drive `event` through the full step sequence. Safe to call repeatedly for the same
    /// `request_id`: duplicate calls return immediately once the first is in flight.
    #[instrument(skip(self, event), fields(request_id = %event.request_id, subscription_id = event.subscription_id, interval = event.interval))]
    pub async fn handle(&self, event: RequestStartedEvent) {
        // Step 1: container filter. Earliest filter; nothing downstream runs for an
        // unsupported container, not even the in-flight set.
        let Some(metadata) = self.inner.containers.lookup(event.container_id) else {
            debug!("no configured container for this request, ignoring");
            return;
        };

        // Step 2: dedup.
        if !self.inner.in_flight.insert(event.request_id) {
            self.inner.hooks.on_request_skipped(&event, SkipReason::AlreadyProcessed).await;
            return;
        }
        let _guard = InFlightGuard { set: &self.inner.in_flight, request_id: event.request_id };

        if self.inner.is_processed.as_ref().is_some_and(|is_processed| is_processed(event.request_id)) {
            self.inner.hooks.on_request_skipped(&event, SkipReason::AlreadyProcessed).await;
            return;
        }

        // Step 3: lifecycle hook.
        self.inner.hooks.on_request_started(&event).await;

        // Step 4: stale-replay guard.
        if event.interval != ONE_TIME_INTERVAL {
            match self.inner.chain.get_subscription_interval(event.subscription_id).await {
                Ok(current) if current > event.interval.saturating_add(STALE_REPLAY_BUDGET) => {
                    self.inner
                        .hooks
                        .on_request_skipped(
                            &event,
                            SkipReason::StaleReplay { event_interval: event.interval, current_interval: current },
                        )
                        .await;
                    return;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to read current interval for stale-replay check, proceeding"),
            }
        }

        // Step 5: mark committed.
        self.inner.scheduler.mark_committed(event.subscription_id, event.interval);

        // Step 6: priority back-off.
        let delay = crate::backoff::priority_delay(event.request_id, self.inner.agent_address, event.redundancy);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        // Step 7: redundancy recheck.
        match self.inner.chain.redundancy_count(event.request_id).await {
            Ok(observed) if observed >= event.redundancy => {
                self.inner
                    .hooks
                    .on_request_skipped(
                        &event,
                        SkipReason::RedundancyMet { observed, required: event.redundancy },
                    )
                    .await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                self.fail(&event, HandlerError::Chain { stage: "redundancy", source: e }, None).await;
                return;
            }
        }

        if let Err((error, tx_hash)) = self.fulfill(&metadata, &event).await {
            self.fail(&event, error, tx_hash).await;
        }
    }

    /// Steps 8-11: resolve inputs, execute, encode the result, and submit it on-chain.
    async fn fulfill(
        &self,
        metadata: &ContainerMetadata,
        event: &RequestStartedEvent,
    ) -> Result<(), (HandlerError, Option<B256>)> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);

        // Step 8: inputs resolution. The client contract address isn't carried on the event
        // (only commitment fields are), so fetch the subscription once to learn it and the fee
        // wallet used for the commitment in step 11.
        let subscription = self
            .inner
            .chain
            .get_subscription(event.subscription_id)
            .await
            .map_err(|e| (HandlerError::Chain { stage: "inputs", source: e }, None))?;

        let (data, input_type) = self
            .inner
            .chain
            .get_compute_inputs(subscription.client, event.subscription_id, event.interval, now, self.inner.agent_address)
            .await
            .map_err(|e| (HandlerError::Chain { stage: "inputs", source: e }, None))?;

        let input_bytes = match input_type {
            InputType::Raw | InputType::UriString => data,
            InputType::Payload => {
                let envelope = payload::decode_envelope(&data).map_err(|e| (e, None))?;
                let resolved = self
                    .inner
                    .payload
                    .resolve(envelope, None)
                    .await
                    .map_err(|e| (HandlerError::Payload { stage: "inputs", source: e }, None))?;
                if !resolved.verified {
                    return Err((HandlerError::PayloadVerificationFailed { stage: "inputs" }, None));
                }
                resolved.content
            }
        };

        // Step 9: execute.
        let invocation = self
            .inner
            .runtime
            .invoke(
                &metadata.id,
                &input_bytes,
                self.inner.config.container_timeout,
                self.inner.config.container_connect_retries,
                self.inner.config.container_retry_delay,
            )
            .await
            .map_err(|e| (HandlerError::Container { stage: "execute", source: e }, None))?;

        if invocation.exit_code != 0 {
            return Err((
                HandlerError::ContainerNonZeroExit { stage: "execute", exit_code: invocation.exit_code },
                None,
            ));
        }

        // Step 10: build result.
        let proof: &[u8] = if event.verifier.is_some() { &invocation.output } else { &[] };
        let input_payload = self.encode_for_chain(&input_bytes).await.map_err(|e| (e, None))?;
        let output_payload = self.encode_for_chain(&invocation.output).await.map_err(|e| (e, None))?;
        let proof_payload = self.encode_for_chain(proof).await.map_err(|e| (e, None))?;

        // Step 11: construct commitment, submit.
        let commitment = Commitment::from_event(event, subscription.wallet);
        let commitment_data = chain_client::encode_commitment(&commitment);

        let (tx_hash, success, gas_used) = self
            .inner
            .chain
            .report_compute_result(
                event.interval,
                &input_payload,
                &output_payload,
                &proof_payload,
                &commitment_data,
                self.inner.agent_address,
            )
            .await
            .map_err(|e| (HandlerError::Chain { stage: "submit", source: e }, None))?;

        // Step 12: outcome.
        if success {
            self.inner.hooks.on_compute_delivered(&DeliveryOutcome { request_id: event.request_id, tx_hash, gas_used }).await;
            Ok(())
        } else {
            Err((
                HandlerError::Chain { stage: "submit", source: chain_client::ChainError::ExecutionReverted("reportComputeResult returned status 0".to_string()) },
                Some(tx_hash),
            ))
        }
    }

    async fn encode_for_chain(&self, content: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let options = EncodeOptions { force_upload: content.len() > self.inner.config.inline_threshold };
        let envelope = self
            .inner
            .payload
            .encode(content, options)
            .await
            .map_err(|e| HandlerError::Payload { stage: "build_result", source: e })?;
        Ok(payload::encode_envelope(envelope))
    }

    /// Step 12's failure branch: fire `on_request_failed` unless this is a nonce collision,
    /// which means another instance of this agent already delivered the same result.
    async fn fail(&self, event: &RequestStartedEvent, error: HandlerError, tx_hash: Option<B256>) {
        if error.is_nonce_collision() {
            debug!("nonce collision, another submission already fulfilled this request");
            return;
        }
        info!(stage = error.stage(), %error, "request failed");
        self.inner
            .hooks
            .on_request_failed(&FailureOutcome {
                request_id: event.request_id,
                message: format!("{}: {error}", error.stage()),
                tx_hash,
            })
            .await;
    }
}

#[async_trait]
impl<C, R, S, P, H> EventSubscriber for RequestHandler<C, R, S, P, H>
where
    C: ChainClient + 'static,
    R: ContainerRuntime + 'static,
    S: SchedulerHandle + 'static,
    P: PayloadResolver + 'static,
    H: agent_core::AgentHooks + 'static,
{
    /// Spawns the actual `handle()` run so a slow fulfillment never backs up the pipeline's
    /// sequential delivery loop (spec §5, "N simultaneous `handle` executions").
    async fn on_request_started(&self, event: RequestStartedEvent) {
        let handler = self.clone();
        tokio::spawn(async move { handler.handle(event).await });
    }
}

struct InFlightGuard<'a> {
    set: &'a DashSet<B256>,
    request_id: B256,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex;

    use alloy::primitives::{Bytes, U256};
    use alloy::sol_types::SolValue;
    use chain_client::MockChainClient;
    use container_supervisor::InvocationResult;
    use tokio::sync::Notify;

    use agent_core::{PayloadEnvelope, ResolvedPayload, Subscription};

    use super::*;

    /// Runs the container straight through with a scriptable exit code, no pause.
    struct ImmediateRuntime {
        exit_code: i32,
        invocations: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ImmediateRuntime {
        fn new(exit_code: i32) -> Self {
            Self { exit_code, invocations: Arc::new(std::sync::atomic::AtomicUsize::new(0)) }
        }

        fn with_counter(exit_code: i32, invocations: Arc<std::sync::atomic::AtomicUsize>) -> Self {
            Self { exit_code, invocations }
        }
    }

    #[async_trait]
    impl ContainerRuntime for ImmediateRuntime {
        async fn invoke(
            &self,
            _container_id: &str,
            input: &[u8],
            _timeout: Duration,
            _connect_retries: u32,
            _retry_delay: Duration,
        ) -> container_supervisor::Result<InvocationResult> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(InvocationResult { output: input.to_vec(), exit_code: self.exit_code, elapsed_ms: 1 })
        }
    }

    /// Blocks inside `invoke` until released, signalling entry via `entered` so a test can
    /// script a genuine concurrent race against a second `handle()` call.
    struct BlockingRuntime {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ContainerRuntime for BlockingRuntime {
        async fn invoke(
            &self,
            _container_id: &str,
            input: &[u8],
            _timeout: Duration,
            _connect_retries: u32,
            _retry_delay: Duration,
        ) -> container_supervisor::Result<InvocationResult> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(InvocationResult { output: input.to_vec(), exit_code: 0, elapsed_ms: 1 })
        }
    }

    /// Records `mark_committed` calls; nothing else to do since the handler only ever calls
    /// that one method.
    #[derive(Default)]
    struct RecordingScheduler {
        committed: Mutex<Vec<(u64, u32)>>,
    }

    impl SchedulerHandle for RecordingScheduler {
        fn mark_committed(&self, subscription_id: u64, interval: u32) {
            self.committed.lock().unwrap().push((subscription_id, interval));
        }
    }

    /// Passes content straight through unchanged, as the identity envelope `(keccak256(content),
    /// content)`; good enough to exercise the handler without a real storage driver.
    struct InlinePayloadResolver;

    #[async_trait]
    impl PayloadResolver for InlinePayloadResolver {
        async fn resolve(
            &self,
            envelope: PayloadEnvelope,
            _inline_hint: Option<Vec<u8>>,
        ) -> agent_core::Result<ResolvedPayload> {
            let content = envelope.uri.to_vec();
            let verified = alloy::primitives::keccak256(&content) == envelope.content_hash;
            Ok(ResolvedPayload { content, verified })
        }

        async fn encode(&self, content: &[u8], _options: EncodeOptions) -> agent_core::Result<PayloadEnvelope> {
            Ok(PayloadEnvelope {
                content_hash: alloy::primitives::keccak256(content),
                uri: Bytes::copy_from_slice(content),
            })
        }
    }

    /// Resolver whose `resolve` always reports `verified: false`, for the hash-mismatch path.
    struct UnverifiedPayloadResolver;

    #[async_trait]
    impl PayloadResolver for UnverifiedPayloadResolver {
        async fn resolve(
            &self,
            _envelope: PayloadEnvelope,
            _inline_hint: Option<Vec<u8>>,
        ) -> agent_core::Result<ResolvedPayload> {
            Ok(ResolvedPayload { content: Vec::new(), verified: false })
        }

        async fn encode(&self, content: &[u8], _options: EncodeOptions) -> agent_core::Result<PayloadEnvelope> {
            Ok(PayloadEnvelope { content_hash: alloy::primitives::keccak256(content), uri: Bytes::copy_from_slice(content) })
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        started: AtomicI32,
        skipped: Mutex<Vec<SkipReason>>,
        delivered: Mutex<Vec<DeliveryOutcome>>,
        failed: Mutex<Vec<FailureOutcome>>,
    }

    #[async_trait]
    impl agent_core::AgentHooks for RecordingHooks {
        async fn on_request_started(&self, _event: &RequestStartedEvent) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_request_skipped(&self, _event: &RequestStartedEvent, reason: SkipReason) {
            self.skipped.lock().unwrap().push(reason);
        }

        async fn on_compute_delivered(&self, outcome: &DeliveryOutcome) {
            self.delivered.lock().unwrap().push(*outcome);
        }

        async fn on_request_failed(&self, outcome: &FailureOutcome) {
            self.failed.lock().unwrap().push(outcome.clone());
        }
    }

    const CONTAINER_NAME: &str = "sum";

    fn agent_address() -> Address {
        Address::from([0x42; 20])
    }

    fn sample_subscription(subscription_id: u64) -> Subscription {
        Subscription {
            subscription_id,
            container_id: chain_client::container_id_hash(CONTAINER_NAME),
            client: Address::from([1; 20]),
            wallet: Address::from([2; 20]),
            active_at: 1_000,
            interval_seconds: 60,
            max_executions: 0,
            redundancy: 1,
            verifier: None,
            route_id: 0,
        }
    }

    fn sample_event(subscription_id: u64, interval: u32, redundancy: u16) -> RequestStartedEvent {
        let container_id = chain_client::container_id_hash(CONTAINER_NAME);
        RequestStartedEvent {
            request_id: chain_client::request_id(subscription_id, interval),
            subscription_id,
            container_id,
            interval,
            redundancy,
            use_delivery_inbox: false,
            fee_amount: U256::from(100u64),
            fee_token: Address::from([3; 20]),
            verifier: None,
            coordinator: Address::from([4; 20]),
            wallet_address: Address::from([5; 20]),
            block_number: 42,
        }
    }

    fn container_source() -> ContainerSource {
        ContainerSource::new().with_containers([ContainerMetadata {
            id: CONTAINER_NAME.to_string(),
            image: "demo:latest".to_string(),
            port: None,
            env: HashMap::new(),
            verifier_address: None,
            accepted_payments: Vec::new(),
            memory_limit: None,
            cpu_limit: None,
            gpu: false,
        }])
    }

    type TestHandler<R> = RequestHandler<Arc<MockChainClient>, R, Arc<RecordingScheduler>, InlinePayloadResolver, Arc<RecordingHooks>>;

    fn build_handler<R: ContainerRuntime + 'static>(
        chain: Arc<MockChainClient>,
        runtime: R,
        scheduler: Arc<RecordingScheduler>,
        hooks: Arc<RecordingHooks>,
    ) -> TestHandler<R> {
        RequestHandler::new(
            chain,
            runtime,
            scheduler,
            InlinePayloadResolver,
            hooks,
            container_source(),
            agent_address(),
            HandlerConfig::default(),
        )
    }

    fn script_happy_path(chain: &MockChainClient, subscription_id: u64, interval: u32, input: &[u8]) {
        chain.insert_subscription(sample_subscription(subscription_id));
        chain.set_interval(subscription_id, interval);
        chain.set_inputs(subscription_id, interval, input.to_vec(), InputType::Raw);
    }

    #[tokio::test]
    async fn unsupported_container_is_silently_ignored() {
        let chain = Arc::new(MockChainClient::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let hooks = Arc::new(RecordingHooks::default());
        let handler = build_handler(chain.clone(), ImmediateRuntime::new(0), scheduler.clone(), hooks.clone());

        let mut event = sample_event(1, 1, 1);
        event.container_id = B256::from([0xAB; 32]); // no configured container matches this
        handler.handle(event).await;

        assert_eq!(handler.in_flight_count(), 0);
        assert_eq!(hooks.started.load(Ordering::SeqCst), 0);
        assert!(hooks.skipped.lock().unwrap().is_empty());
        assert!(scheduler.committed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn is_processed_callback_skips_before_chain_calls() {
        let chain = Arc::new(MockChainClient::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let hooks = Arc::new(RecordingHooks::default());
        let event = sample_event(7, 1, 1);
        let settled = event.request_id;

        let handler = build_handler(chain.clone(), ImmediateRuntime::new(0), scheduler.clone(), hooks.clone())
            .with_is_processed(Arc::new(move |id| id == settled));

        handler.handle(event).await;

        assert_eq!(hooks.skipped.lock().unwrap().as_slice(), [SkipReason::AlreadyProcessed]);
        // Never touched the chain: no subscription was ever registered, so a real lookup would
        // have errored rather than silently skip.
        assert!(hooks.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_replay_is_skipped_before_execution() {
        let chain = Arc::new(MockChainClient::new());
        chain.insert_subscription(sample_subscription(1));
        chain.set_interval(1, 5); // on-chain interval has advanced well past this event's `1`
        let scheduler = Arc::new(RecordingScheduler::default());
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = ImmediateRuntime::new(0);
        let handler = build_handler(chain.clone(), runtime, scheduler.clone(), hooks.clone());

        handler.handle(sample_event(1, 1, 1)).await;

        match hooks.skipped.lock().unwrap().as_slice() {
            [SkipReason::StaleReplay { event_interval, current_interval }] => {
                assert_eq!(*event_interval, 1);
                assert_eq!(*current_interval, 5);
            }
            other => panic!("expected a single StaleReplay skip, got {other:?}"),
        }
        assert!(scheduler.committed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn redundancy_already_met_is_skipped_after_mark_committed() {
        let chain = Arc::new(MockChainClient::new());
        let subscription_id = 2;
        script_happy_path(&chain, subscription_id, 1, b"input");
        let event = sample_event(subscription_id, 1, 1);
        chain.set_redundancy_count(event.request_id, 1); // already fulfilled once, and redundancy == 1

        let scheduler = Arc::new(RecordingScheduler::default());
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = ImmediateRuntime::new(0);
        let handler = build_handler(chain.clone(), runtime, scheduler.clone(), hooks.clone());

        handler.handle(event).await;

        match hooks.skipped.lock().unwrap().as_slice() {
            [SkipReason::RedundancyMet { observed, required }] => {
                assert_eq!(*observed, 1);
                assert_eq!(*required, 1);
            }
            other => panic!("expected a single RedundancyMet skip, got {other:?}"),
        }
        // Step 5 (mark_committed) runs before the redundancy recheck, so it still fires.
        assert_eq!(scheduler.committed.lock().unwrap().as_slice(), [(subscription_id, 1)]);
    }

    #[tokio::test]
    async fn happy_path_delivers_and_submits_commitment() {
        let chain = Arc::new(MockChainClient::new());
        let subscription_id = 3;
        script_happy_path(&chain, subscription_id, 1, b"input-bytes");
        let event = sample_event(subscription_id, 1, 1);

        let scheduler = Arc::new(RecordingScheduler::default());
        let hooks = Arc::new(RecordingHooks::default());
        let invocations = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runtime = ImmediateRuntime::with_counter(0, invocations.clone());
        let handler = build_handler(chain.clone(), runtime, scheduler.clone(), hooks.clone());

        handler.handle(event).await;

        assert!(hooks.skipped.lock().unwrap().is_empty());
        assert!(hooks.failed.lock().unwrap().is_empty());
        let delivered = hooks.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].request_id, event.request_id);
        assert_eq!(chain.submitted_calls(), 1);
        assert_eq!(scheduler.committed.lock().unwrap().as_slice(), [(subscription_id, 1)]);
        assert_eq!(handler.in_flight_count(), 0);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nonzero_exit_code_fires_on_request_failed() {
        let chain = Arc::new(MockChainClient::new());
        let subscription_id = 4;
        script_happy_path(&chain, subscription_id, 1, b"input");
        let event = sample_event(subscription_id, 1, 1);

        let scheduler = Arc::new(RecordingScheduler::default());
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = ImmediateRuntime::new(17);
        let handler = build_handler(chain.clone(), runtime, scheduler.clone(), hooks.clone());

        handler.handle(event).await;

        let failed = hooks.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].message.contains("execute"));
        assert_eq!(chain.submitted_calls(), 0);
    }

    #[tokio::test]
    async fn payload_hash_mismatch_fails_before_execution() {
        let chain = Arc::new(MockChainClient::new());
        let subscription_id = 5;
        chain.insert_subscription(sample_subscription(subscription_id));
        chain.set_interval(subscription_id, 1);
        let envelope = PayloadEnvelope { content_hash: B256::from([9; 32]), uri: Bytes::from_static(b"ipfs://demo") };
        let data = (envelope.content_hash, envelope.uri.clone()).abi_encode();
        chain.set_inputs(subscription_id, 1, data, InputType::Payload);
        let event = sample_event(subscription_id, 1, 1);

        let scheduler = Arc::new(RecordingScheduler::default());
        let hooks = Arc::new(RecordingHooks::default());
        let runtime = ImmediateRuntime::new(0);

        let handler = RequestHandler::new(
            chain.clone(),
            runtime,
            scheduler.clone(),
            UnverifiedPayloadResolver,
            hooks.clone(),
            container_source(),
            agent_address(),
            HandlerConfig::default(),
        );

        handler.handle(event).await;

        let failed = hooks.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].message.contains("hash verification"));
    }

    #[tokio::test]
    async fn concurrent_duplicate_is_skipped_while_first_is_in_flight() {
        let chain = Arc::new(MockChainClient::new());
        let subscription_id = 6;
        script_happy_path(&chain, subscription_id, 1, b"input");
        let event = sample_event(subscription_id, 1, 1);

        let scheduler = Arc::new(RecordingScheduler::default());
        let hooks = Arc::new(RecordingHooks::default());
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let runtime = BlockingRuntime { entered: entered.clone(), release: release.clone() };
        let handler = build_handler(chain.clone(), runtime, scheduler.clone(), hooks.clone());

        let first = {
            let handler = handler.clone();
            let event = event;
            tokio::spawn(async move { handler.handle(event).await })
        };

        entered.notified().await;
        assert_eq!(handler.in_flight_count(), 1);

        // A second, fully independent call for the same request_id while the first is
        // mid-invocation: must be dropped at step 2, never reaching the container a second time.
        handler.handle(event).await;

        release.notify_one();
        first.await.unwrap();

        assert_eq!(hooks.skipped.lock().unwrap().as_slice(), [SkipReason::AlreadyProcessed]);
        assert_eq!(hooks.delivered.lock().unwrap().len(), 1);
        assert_eq!(handler.in_flight_count(), 0);
    }
}
