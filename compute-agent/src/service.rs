//! Wires the four coordination subsystems into one running agent. Grounded on
//! `ghost-fleet/src/service.rs`'s `FleetService` (construct collaborators, spawn each
//! subsystem's background loop, `run()` awaits a shutdown signal, `stop()` cascades through
//! every subsystem in reverse dependency order).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use tokio::sync::mpsc;
use tracing::info;

use agent_core::{ContainerMetadata, FileCheckpointStore, RequestStartedEvent};
use chain_client::{AlloyChainClient, ChainClient};
use container_supervisor::ContainerSupervisor;
use event_pipeline::{AlloyLogSource, EventPipeline};
use interval_scheduler::IntervalScheduler;
use request_handler::{ContainerSource, HandlerConfig, HealthCheckLoop, RequestHandler};

use crate::collaborators::{InlinePayloadResolver, StaticRegistry};
use crate::config::Settings;
use crate::error::{AgentServiceError, Result};

/// Channel capacity between the event pipeline's live delivery and the handler dispatch task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type Chain = Arc<dyn ChainClient>;
type Handler =
    RequestHandler<Chain, Arc<ContainerSupervisor>, Arc<IntervalScheduler<Chain, StaticRegistry>>, InlinePayloadResolver, ()>;
type Pipeline = EventPipeline<AlloyLogSource, FileCheckpointStore, mpsc::Sender<RequestStartedEvent>>;

/// The running compute-agent: event pipeline, interval scheduler, container supervisor, and
/// request handler, wired together and ready to [`run`](Self::run).
pub struct AgentService {
    agent_address: Address,
    pipeline: Arc<Pipeline>,
    scheduler: Arc<IntervalScheduler<Chain, StaticRegistry>>,
    supervisor: Arc<ContainerSupervisor>,
    health_loop: Arc<HealthCheckLoop<StaticRegistry>>,
    dispatch: tokio::task::JoinHandle<()>,
}

impl AgentService {
    /// Build every collaborator and subsystem from `settings`, but do not yet start any
    /// background loop (see [`Self::run`]).
    ///
    /// # Errors
    /// Returns an error if the signing key is malformed, the chain RPC URL cannot be parsed,
    /// the checkpoint directory cannot be opened, or the Docker daemon is unreachable.
    pub async fn build(settings: Settings) -> Result<Self> {
        let signer = load_signer(&settings.agent.private_key_env)?;
        let agent_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let rpc_url = settings
            .chain
            .rpc_url
            .parse()
            .map_err(|e| AgentServiceError::InvalidSignerKey(format!("malformed rpc_url: {e}")))?;
        let provider = ProviderBuilder::new().wallet(wallet).connect_http(rpc_url);
        let chain: Chain = Arc::new(AlloyChainClient::new(
            provider,
            settings.chain.router_address,
            settings.chain.coordinator_address,
        ));

        let container_metadata: Vec<ContainerMetadata> =
            settings.containers.iter().map(std::convert::Into::into).collect();

        let scheduler_registry = StaticRegistry::new(container_metadata.clone());
        let scheduler_config = interval_scheduler::SchedulerConfig {
            sync_period: Duration::from_millis(settings.scheduler.sync_period_ms),
            cron_interval: Duration::from_millis(settings.scheduler.cron_interval_ms),
            sync_batch_size: interval_scheduler::SYNC_BATCH_SIZE,
            max_retry_attempts: settings.scheduler.max_retry_attempts,
        };
        let scheduler = Arc::new(IntervalScheduler::new(
            Arc::clone(&chain),
            scheduler_registry,
            (),
            agent_address,
            settings.chain.coordinator_address,
            scheduler_config,
        ));

        let checkpoints = FileCheckpointStore::new(settings.state.directory.clone())
            .await
            .map_err(AgentServiceError::Agent)?;

        let (tx, mut rx) = mpsc::channel::<RequestStartedEvent>(EVENT_CHANNEL_CAPACITY);

        let source = AlloyLogSource::new(
            settings.chain.rpc_url.clone(),
            settings.chain.ws_rpc_url.clone(),
            settings.chain.coordinator_address,
        );
        let pipeline = Arc::new(EventPipeline::new(
            source,
            checkpoints,
            tx,
            settings.chain.deployment_block,
            settings.chain.ws_rpc_url.is_some(),
            settings.connection.to_pipeline_config(settings.chain.polling_interval_ms),
        ));

        let supervisor = Arc::new(ContainerSupervisor::connect().map_err(AgentServiceError::Supervisor)?);

        let containers = ContainerSource::new().with_containers(container_metadata.clone());

        let handler_config = HandlerConfig {
            container_timeout: Duration::from_millis(settings.container.timeout_ms),
            container_connect_retries: settings.container.connect_retries,
            container_retry_delay: Duration::from_millis(settings.container.connect_retry_delay_ms),
            inline_threshold: settings.container.inline_threshold_bytes,
        };

        let handler: Handler = RequestHandler::new(
            chain,
            Arc::clone(&supervisor),
            Arc::clone(&scheduler),
            InlinePayloadResolver,
            (),
            containers,
            agent_address,
            handler_config,
        );

        let health_registry = Arc::new(StaticRegistry::new(container_metadata));
        let health_loop = Arc::new(HealthCheckLoop::new(
            health_registry,
            Duration::from_millis(settings.handler.health_check_interval_ms),
        ));

        let dispatch = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handler = handler.clone();
                tokio::spawn(async move { handler.handle(event).await });
            }
            info!("event dispatch channel closed");
        });

        Ok(Self { agent_address, pipeline, scheduler, supervisor, health_loop, dispatch })
    }

    /// Prepare configured containers, then start every background subsystem. Returns once
    /// startup completes; subsystems continue running on spawned tasks.
    ///
    /// # Errors
    /// Returns an error if the container supervisor fails to prepare the declared containers
    /// or the event pipeline's initial replay fails.
    pub async fn run(&self, containers: &HashMap<String, ContainerMetadata>) -> Result<()> {
        info!(agent_address = %self.agent_address, "starting compute agent");
        self.supervisor.prepare(containers).await.map_err(AgentServiceError::Supervisor)?;
        self.pipeline.start().await.map_err(AgentServiceError::Pipeline)?;
        self.scheduler.start();
        Arc::clone(&self.health_loop).start();
        Ok(())
    }

    /// Cascade shutdown through every subsystem in reverse dependency order, then clean up
    /// managed containers.
    pub async fn stop(&self) {
        self.health_loop.stop();
        self.scheduler.stop();
        self.pipeline.stop();
        self.dispatch.abort();
        if let Err(e) = self.supervisor.cleanup().await {
            tracing::warn!(error = %e, "container cleanup failed during shutdown");
        }
        info!("compute agent stopped");
    }
}

fn load_signer(env_var: &str) -> Result<PrivateKeySigner> {
    let raw = std::env::var(env_var)
        .map_err(|_| AgentServiceError::InvalidSignerKey(format!("environment variable {env_var} is not set")))?;
    raw.trim()
        .parse::<PrivateKeySigner>()
        .map_err(|e| AgentServiceError::InvalidSignerKey(e.to_string()))
}
