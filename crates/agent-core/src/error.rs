//! Error types shared by the collaborator ports and the default checkpoint store.
//!
//! Every crate in this workspace follows the same categorized-enum-with-predicate-methods
//! shape; this is the shared-model crate's own instance of it.

use thiserror::Error;

/// Result alias for `agent-core` operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors surfaced by the data model and collaborator ports.
#[derive(Debug, Error)]
pub enum AgentError {
    // ─────────────────────────────────────────────────────────────────────────
    // Checkpoint store
    // ─────────────────────────────────────────────────────────────────────────
    /// Reading or writing the checkpoint/committed-interval files failed.
    #[error("checkpoint store io error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted checkpoint or committed-interval file was not valid JSON/UTF-8.
    #[error("checkpoint store deserialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────────────────
    // Collaborators (keystore, registry, payload resolver)
    // ─────────────────────────────────────────────────────────────────────────
    /// The keystore could not be loaded (missing file, bad password, corrupt data).
    #[error("keystore unavailable: {0}")]
    KeystoreUnavailable(String),

    /// The registry could not be loaded or reloaded.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Payload resolution or encoding failed (hash mismatch, storage driver error).
    #[error("payload resolution failed: {0}")]
    PayloadResolution(String),
}

impl AgentError {
    /// True for errors that represent a programmer/config failure that should fail fast at
    /// startup rather than be retried (spec §7, "Programmer/config" row).
    #[must_use]
    pub const fn is_fatal_at_startup(&self) -> bool {
        matches!(self, Self::KeystoreUnavailable(_) | Self::RegistryUnavailable(_))
    }
}
