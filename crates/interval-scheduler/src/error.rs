//! Error taxonomy for the interval scheduler.

use thiserror::Error;

/// Result alias for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors surfaced by the scheduler's sync and cron loops.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A chain call failed in a way the scheduler could not classify and recover from inline.
    #[error("chain error: {0}")]
    Chain(#[from] chain_client::ChainError),

    /// A collaborator (checkpoint-adjacent) store failed.
    #[error("agent-core error: {0}")]
    Agent(#[from] agent_core::AgentError),
}
