//! Error taxonomy for the event pipeline. Grounded on `ghostnet-indexer/src/error.rs`'s
//! `InfraError` category style.

use thiserror::Error;

/// Result alias for event-pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced while connecting, replaying, or delivering events.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The RPC transport failed (timeout, connection refused, transient 5xx).
    #[error("[connect] transport error: {0}")]
    Transport(String),

    /// The WebSocket connection was closed or never opened.
    #[error("[connect] websocket unavailable: {0}")]
    WebSocketUnavailable(String),

    /// A log entry could not be decoded into a `RequestStartedEvent`.
    #[error("[replay] malformed log: {0}")]
    MalformedLog(String),

    /// The checkpoint store failed to load or save.
    #[error("[replay] checkpoint store error: {0}")]
    Checkpoint(#[from] agent_core::AgentError),
}

impl PipelineError {
    /// True for errors that should be logged and retried rather than treated as fatal:
    /// transient RPC hiccups log and continue instead of tearing down the pipeline.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::WebSocketUnavailable(_))
    }
}
