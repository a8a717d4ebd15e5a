//! Configuration loading and validation.
//!
//! Settings are assembled from built-in defaults, an optional TOML file, and environment
//! variables prefixed `COMPUTE_AGENT__` (double underscore separates nesting, e.g.
//! `COMPUTE_AGENT__SCHEDULER__CRON_INTERVAL_MS`), mirroring `ghostnet-indexer`'s layered
//! `config`-crate settings (spec §6, "Configuration surface").

use std::collections::HashMap;

use alloy::primitives::Address;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Chain connection and watched-contract configuration.
    pub chain: ChainConfig,
    /// Interval-scheduler timing (spec §4.4 defaults).
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Event-pipeline connection state machine timing (spec §4.2 defaults).
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Container invocation timing (spec §4.3 defaults).
    #[serde(default)]
    pub container: ContainerConfig,
    /// Request-handler timing (spec §4.5 defaults).
    #[serde(default)]
    pub handler: HandlerConfig,
    /// Durable checkpoint/committed-interval state.
    #[serde(default)]
    pub state: StateConfig,
    /// This agent's signing identity.
    pub agent: AgentIdentityConfig,
    /// Declared containers this agent can fulfill (spec §6, "Containers").
    #[serde(default)]
    pub containers: Vec<ContainerDeclConfig>,
}

impl Settings {
    /// Load settings from built-in defaults, optionally overridden by a TOML file at `path`
    /// and by `COMPUTE_AGENT__`-prefixed environment variables.
    ///
    /// # Errors
    /// Returns an error if the file exists but fails to parse, or the merged result does not
    /// deserialize into [`Settings`].
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("chain.ws_rpc_url", Option::<String>::None)?
            .set_default("chain.deployment_block", 0)?
            .set_default("chain.polling_interval_ms", 12_000)?
            .set_default("scheduler.cron_interval_ms", 60_000)?
            .set_default("scheduler.sync_period_ms", 3_000)?
            .set_default("scheduler.max_retry_attempts", 3)?
            .set_default("connection.ws_connect_timeout_ms", 10_000)?
            .set_default("connection.ws_max_connect_retries", 3)?
            .set_default("connection.ws_connect_retry_delay_ms", 2_000)?
            .set_default("connection.ws_recovery_interval_ms", 60_000)?
            .set_default("container.timeout_ms", 180_000)?
            .set_default("container.connect_retries", 5)?
            .set_default("container.connect_retry_delay_ms", 3_000)?
            .set_default("container.inline_threshold_bytes", 1024)?
            .set_default("handler.max_retries", 3)?
            .set_default("handler.retry_interval_ms", 30_000)?
            .set_default("handler.health_check_interval_ms", 300_000)?
            .set_default("state.directory", "./data")?;

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("config/default").required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("COMPUTE_AGENT").separator("__").try_parsing(true),
        );

        let settings: Self = builder
            .build()
            .map_err(|source| ConfigError::Load { path: path.unwrap_or("config/default").to_string(), source })?
            .try_deserialize()
            .map_err(|source| ConfigError::Load { path: path.unwrap_or("config/default").to_string(), source })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the loaded settings beyond what serde's required fields already enforce.
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_url.is_empty() {
            return Err(ConfigError::Validation("chain.rpc_url is required".into()).into());
        }
        for container in &self.containers {
            if container.image.is_empty() {
                return Err(ConfigError::EmptyContainerImage { id: container.id.clone() }.into());
            }
        }
        if self.scheduler.max_retry_attempts == 0 {
            return Err(ConfigError::Validation("scheduler.max_retry_attempts must be > 0".into()).into());
        }
        Ok(())
    }
}

/// Chain connection and watched-contract configuration (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    /// HTTP JSON-RPC endpoint, always required.
    pub rpc_url: String,
    /// WebSocket endpoint; omitted means the pipeline never leaves `HttpFallback`.
    #[serde(default)]
    pub ws_rpc_url: Option<String>,
    /// Router contract address (subscriptions, batch reader).
    pub router_address: Address,
    /// Coordinator contract address (redundancy, prepare, submit).
    pub coordinator_address: Address,
    /// Block the coordinator contract was deployed at; replay's starting point absent a
    /// checkpoint.
    #[serde(default)]
    pub deployment_block: u64,
    /// HTTP poll interval while in `HttpFallback` (spec §4.2 default 12s).
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
}

const fn default_polling_interval_ms() -> u64 {
    12_000
}

/// Interval-scheduler timing (spec §4.4).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Cron-timer period: how often tracked subscriptions are re-evaluated.
    pub cron_interval_ms: u64,
    /// Sync-timer period: how often new subscriptions are discovered.
    pub sync_period_ms: u64,
    /// Consecutive prepare failures allowed before giving up on an interval.
    pub max_retry_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { cron_interval_ms: 60_000, sync_period_ms: 3_000, max_retry_attempts: 3 }
    }
}

/// Event-pipeline connection state machine timing (spec §4.2).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Time allowed for a WS connect attempt to yield a current block number.
    pub ws_connect_timeout_ms: u64,
    /// Maximum WS connect retries before falling back to HTTP.
    pub ws_max_connect_retries: u32,
    /// Delay between WS connect retries.
    pub ws_connect_retry_delay_ms: u64,
    /// Interval between WS recovery attempts while in `HttpFallback`.
    pub ws_recovery_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_connect_timeout_ms: 10_000,
            ws_max_connect_retries: 3,
            ws_connect_retry_delay_ms: 2_000,
            ws_recovery_interval_ms: 60_000,
        }
    }
}

impl ConnectionConfig {
    /// Convert to [`event_pipeline::ConnectionConfig`]. `polling_interval_ms` comes from
    /// [`ChainConfig`] since HTTP polling cadence is a chain-connection concern, not a
    /// WS-reconnect one.
    #[must_use]
    pub fn to_pipeline_config(&self, polling_interval_ms: u64) -> event_pipeline::ConnectionConfig {
        event_pipeline::ConnectionConfig {
            ws_connect_timeout: std::time::Duration::from_millis(self.ws_connect_timeout_ms),
            ws_max_connect_retries: self.ws_max_connect_retries,
            ws_connect_retry_delay: std::time::Duration::from_millis(self.ws_connect_retry_delay_ms),
            polling_interval: std::time::Duration::from_millis(polling_interval_ms),
            ws_recovery_interval: std::time::Duration::from_millis(self.ws_recovery_interval_ms),
        }
    }
}

/// Container invocation timing (spec §4.3).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ContainerConfig {
    /// Per-attempt container HTTP timeout.
    pub timeout_ms: u64,
    /// Connection-refused retries before giving up.
    pub connect_retries: u32,
    /// Delay between connection-refused retries.
    pub connect_retry_delay_ms: u64,
    /// Content at or under this size is inlined rather than uploaded.
    pub inline_threshold_bytes: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self { timeout_ms: 180_000, connect_retries: 5, connect_retry_delay_ms: 3_000, inline_threshold_bytes: 1024 }
    }
}

/// Request-handler timing (spec §4.5).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct HandlerConfig {
    /// Maximum Handler-level retry attempts (requires retry callbacks to be installed).
    pub max_retries: u32,
    /// Handler-level retry timer period.
    pub retry_interval_ms: u64,
    /// Container-registry health-check timer period.
    pub health_check_interval_ms: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self { max_retries: 3, retry_interval_ms: 30_000, health_check_interval_ms: 300_000 }
    }
}

/// Durable state directory (spec §4.1, §6 "Persisted state layout").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    /// Directory the checkpoint JSON and committed-interval log are written under.
    pub directory: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { directory: "./data".to_string() }
    }
}

/// This agent's signing identity.
///
/// The encrypted keystore format and wallet derivation are out of scope for this repository
/// (spec §1): this is a minimal development-only loader, not the production keystore, exactly
/// as the reference's own base64 wallet-key storage is "explicitly marked not for production"
/// (spec §9). Operators wire a real `agent_core::Keystore` implementation for production use.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentIdentityConfig {
    /// Environment variable holding this agent's hex-encoded private key (with or without a
    /// `0x` prefix).
    pub private_key_env: String,
}

/// One declared container this agent can fulfill (spec §6, "Containers").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerDeclConfig {
    /// Declared container id, hashed to match the on-chain `container_id`.
    pub id: String,
    /// Docker image reference.
    pub image: String,
    /// Exposed HTTP port inside the container, if fixed.
    #[serde(default)]
    pub port: Option<u16>,
    /// Environment variables injected at container start.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Verifier contract accepted for this container's proofs.
    #[serde(default)]
    pub verifier_address: Option<Address>,
    /// Accepted fee tokens.
    #[serde(default)]
    pub accepted_payments: Vec<Address>,
    /// `"<n><unit>"` memory limit, e.g. `"512m"`.
    #[serde(default)]
    pub memory_limit: Option<String>,
    /// Integer CPU limit (converted to nano-cpus by the supervisor).
    #[serde(default)]
    pub cpu_limit: Option<u32>,
    /// Whether this container requests a GPU device.
    #[serde(default)]
    pub gpu: bool,
}

impl From<&ContainerDeclConfig> for agent_core::ContainerMetadata {
    fn from(decl: &ContainerDeclConfig) -> Self {
        Self {
            id: decl.id.clone(),
            image: decl.image.clone(),
            port: decl.port,
            env: decl.env.clone(),
            verifier_address: decl.verifier_address,
            accepted_payments: decl.accepted_payments.clone(),
            memory_limit: decl.memory_limit.clone(),
            cpu_limit: decl.cpu_limit,
            gpu: decl.gpu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_converts_to_pipeline_units() {
        let config = ConnectionConfig::default();
        let pipeline = config.to_pipeline_config(12_000);
        assert_eq!(pipeline.ws_connect_timeout, std::time::Duration::from_secs(10));
        assert_eq!(pipeline.ws_max_connect_retries, 3);
        assert_eq!(pipeline.polling_interval, std::time::Duration::from_secs(12));
    }

    #[test]
    fn container_decl_converts_to_metadata() {
        let decl = ContainerDeclConfig {
            id: "sum".to_string(),
            image: "demo:latest".to_string(),
            port: Some(8080),
            env: HashMap::new(),
            verifier_address: None,
            accepted_payments: Vec::new(),
            memory_limit: Some("512m".to_string()),
            cpu_limit: None,
            gpu: false,
        };
        let metadata: agent_core::ContainerMetadata = (&decl).into();
        assert_eq!(metadata.id, "sum");
        assert_eq!(metadata.memory_limit.as_deref(), Some("512m"));
    }
}
