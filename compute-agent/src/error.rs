//! Top-level errors for the compute-agent binary: configuration and startup failures that
//! must fail fast rather than be retried (spec §7, "Programmer/config" row).

use thiserror::Error;

/// Result alias for binary-level operations.
pub type Result<T> = std::result::Result<T, AgentServiceError>;

/// Errors surfaced while loading configuration or wiring the agent's components together.
#[derive(Debug, Error)]
pub enum AgentServiceError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting the chain client to `rpc_url` failed.
    #[error("chain client error: {0}")]
    Chain(#[from] chain_client::ChainError),

    /// The container supervisor could not reach the Docker daemon.
    #[error("container supervisor error: {0}")]
    Supervisor(#[from] container_supervisor::SupervisorError),

    /// The checkpoint store could not be opened.
    #[error("agent-core error: {0}")]
    Agent(#[from] agent_core::AgentError),

    /// The event pipeline's initial replay failed.
    #[error("event pipeline error: {0}")]
    Pipeline(#[from] event_pipeline::PipelineError),

    /// The configured signing key was malformed.
    #[error("invalid signer key: {0}")]
    InvalidSignerKey(String),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration source could not be read or parsed.
    #[error("failed to load configuration from {path}: {source}")]
    Load {
        /// Path or source name that failed to load.
        path: String,
        /// Underlying `config` crate error.
        source: config::ConfigError,
    },

    /// A required container declared no image.
    #[error("container {id} declares an empty image")]
    EmptyContainerImage {
        /// The container's declared id.
        id: String,
    },

    /// Validation of the loaded settings failed.
    #[error("config validation failed: {0}")]
    Validation(String),
}
