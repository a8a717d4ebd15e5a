//! Shared data model, error taxonomy, collaborator ports, and lifecycle hooks for the
//! compute-agent worker.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              agent-core                                 │
//! │                                                                         │
//! │  model    — Subscription, SubscriptionState, RequestStartedEvent,       │
//! │             Commitment, Checkpoint, CommittedKey                        │
//! │  hooks     — AgentHooks (closed lifecycle trait, no-op defaults)        │
//! │  ports     — CheckpointStore, Keystore, Registry, PayloadResolver       │
//! │  checkpoint_store — file-backed + in-memory CheckpointStore impls       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod checkpoint_store;
pub mod error;
pub mod hooks;
pub mod model;
pub mod ports;

pub use checkpoint_store::{FileCheckpointStore, InMemoryCheckpointStore};
pub use error::{AgentError, Result};
pub use hooks::{AgentHooks, DeliveryOutcome, FailureOutcome, GasAccounting, SkipReason};
pub use model::{
    Checkpoint, Commitment, CommittedKey, RequestStartedEvent, Subscription, SubscriptionState,
    ONE_TIME_INTERVAL,
};
pub use ports::{
    CheckpointStore, ContainerMetadata, EncodeOptions, Keystore, LoadedKeystore, PayloadEnvelope,
    PayloadResolver, Registry, RegistryStats, ResolvedPayload,
};
