//! Error taxonomy for a single `handle()` run. Grounded on the workspace's shared
//! categorized-enum-with-predicate-methods shape (`chain_client::ChainError`,
//! `container_supervisor::SupervisorError`).

use thiserror::Error;

/// Result alias for request-handler operations.
pub type Result<T> = std::result::Result<T, HandlerError>;

/// Errors surfaced while driving a single request to completion (spec §4.5 steps 8-11).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A chain call failed (inputs resolution, redundancy recheck, result submission).
    #[error("{stage}: {source}")]
    Chain {
        /// The step that produced the error (`"inputs"`, `"submit"`, `"replay"`).
        stage: &'static str,
        /// Underlying chain error.
        #[source]
        source: chain_client::ChainError,
    },

    /// The container supervisor failed to invoke the container.
    #[error("{stage}: {source}")]
    Container {
        /// Always `"execute"`.
        stage: &'static str,
        /// Underlying supervisor error.
        #[source]
        source: container_supervisor::SupervisorError,
    },

    /// The container ran but exited non-zero.
    #[error("{stage}: container exited with status {exit_code}")]
    ContainerNonZeroExit {
        /// Always `"execute"`.
        stage: &'static str,
        /// The container's reported exit code.
        exit_code: i32,
    },

    /// A payload collaborator call (resolve or encode) failed.
    #[error("{stage}: {source}")]
    Payload {
        /// The step that produced the error (`"inputs"`, `"build_result"`).
        stage: &'static str,
        /// Underlying agent-core error.
        #[source]
        source: agent_core::AgentError,
    },

    /// A `PAYLOAD`-typed input resolved but failed hash verification.
    #[error("{stage}: payload hash verification failed")]
    PayloadVerificationFailed {
        /// Always `"inputs"`.
        stage: &'static str,
    },

    /// A `PAYLOAD`-typed input's ABI envelope could not be decoded.
    #[error("{0}: malformed payload envelope: {1}")]
    MalformedPayloadEnvelope(&'static str, String),
}

impl HandlerError {
    /// The stage that produced this error (spec §7, "Error messages carry the stage").
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Chain { stage, .. }
            | Self::Container { stage, .. }
            | Self::ContainerNonZeroExit { stage, .. }
            | Self::Payload { stage, .. }
            | Self::PayloadVerificationFailed { stage }
            | Self::MalformedPayloadEnvelope(stage, _) => stage,
        }
    }

    /// True when this is a nonce-collision chain error: someone else already submitted the
    /// same result first. Silently dropped rather than fired as `on_request_failed` (spec
    /// §4.5 step 12).
    #[must_use]
    pub fn is_nonce_collision(&self) -> bool {
        matches!(self, Self::Chain { source, .. } if source.is_nonce_collision())
    }
}
