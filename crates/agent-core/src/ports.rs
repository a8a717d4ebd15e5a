//! Collaborator ports: traits expressing what the core needs from components that are
//! explicitly out of scope for this repository (spec §1, §6). No production implementation
//! of any of these lives here; the one exception, [`crate::checkpoint_store`], ships a
//! file-backed `CheckpointStore` plus an in-memory test double since checkpointing is common
//! enough infrastructure to belong in this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::model::{Checkpoint, CommittedKey};

/// Durable `last_processed_block` plus the committed-interval set.
///
/// The default file-backed implementation ([`crate::checkpoint_store::FileCheckpointStore`])
/// writes two files under a configurable directory, but any implementation satisfying this
/// contract is accepted by the event pipeline and the scheduler.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the most recent checkpoint, if any has ever been saved.
    async fn load(&self) -> Result<Option<Checkpoint>, AgentError>;

    /// Persist a checkpoint. Must be idempotent and crash-safe (write-and-rename or
    /// equivalent); callers may call this repeatedly with non-decreasing block numbers.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), AgentError>;

    /// Load the full committed-interval set accumulated so far.
    async fn load_committed(&self) -> Result<Vec<CommittedKey>, AgentError>;

    /// Append one committed key. Append-friendly: does not require reading the existing set.
    async fn save_committed(&self, key: CommittedKey) -> Result<(), AgentError>;
}

/// Wallet signer and per-subscription payment wallet lookup.
///
/// Treated as an opaque black box per spec §9: the core never sees plaintext key material,
/// and this crate bundles no implementation, not even a toy one.
#[async_trait]
pub trait Keystore: Send + Sync {
    /// Load a signer and its payment-wallet table from an encrypted source.
    async fn load(&self, path: &str, password: &str) -> Result<LoadedKeystore, AgentError>;

    /// Resolve the payment wallet used for a subscription's fee receipts.
    fn get_payment_wallet(&self, subscription_id: u64) -> Option<alloy::primitives::Address>;
}

/// What a successful [`Keystore::load`] yields.
#[derive(Debug, Clone)]
pub struct LoadedKeystore {
    /// The primary signing address used for all outbound transactions.
    pub signer: alloy::primitives::Address,
    /// Per-subscription payment wallet overrides.
    pub payment_wallets: std::collections::HashMap<u64, alloy::primitives::Address>,
}

/// Container and verifier metadata lookup.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Load the registry's contents, failing fast if unreachable.
    async fn load(&self) -> Result<(), AgentError>;

    /// Reload the registry's contents after an operator-visible change.
    async fn reload(&self) -> Result<(), AgentError>;

    /// Look up container metadata by its declared id.
    fn get_container(&self, container_id: &str) -> Option<ContainerMetadata>;

    /// Whether the agent has a configured container matching the on-chain `container_id` hash
    /// (`chain_client::container_id_hash` of the declared id). Used by the scheduler's sync
    /// timer to skip subscriptions this agent cannot fulfill.
    fn supports(&self, container_id: alloy::primitives::B256) -> bool;

    /// Current registry statistics, used by the handler's health-check loop.
    fn stats(&self) -> RegistryStats;
}

/// Container metadata as resolved from the registry or the static config map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Declared container id (hashed to the on-chain 32-byte id).
    pub id: String,
    /// Docker image reference.
    pub image: String,
    /// Exposed HTTP port inside the container, if fixed.
    pub port: Option<u16>,
    /// Environment variables injected at container start.
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    /// Verifier contract address accepted for this container's proofs.
    pub verifier_address: Option<alloy::primitives::Address>,
    /// Accepted fee tokens.
    #[serde(default)]
    pub accepted_payments: Vec<alloy::primitives::Address>,
    /// `"<n><unit>"` memory limit, e.g. `"512m"`, `"2g"`.
    pub memory_limit: Option<String>,
    /// Integer CPU limit (converted to nano-cpus by the supervisor).
    pub cpu_limit: Option<u32>,
    /// Whether this container requests a GPU device.
    #[serde(default)]
    pub gpu: bool,
}

/// Point-in-time registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of containers currently known to the registry.
    pub container_count: usize,
}

/// Resolves and encodes content behind a payload envelope (inline, IPFS, S3, HTTP).
#[async_trait]
pub trait PayloadResolver: Send + Sync {
    /// Resolve an envelope (optionally with an inline hint) to its verified content.
    async fn resolve(
        &self,
        envelope: PayloadEnvelope,
        inline_hint: Option<Vec<u8>>,
    ) -> Result<ResolvedPayload, AgentError>;

    /// Encode content into an envelope, inlining or uploading depending on size/options.
    async fn encode(
        &self,
        content: &[u8],
        options: EncodeOptions,
    ) -> Result<PayloadEnvelope, AgentError>;
}

/// `(content_hash, uri)` pair referencing input/output data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEnvelope {
    /// Hash of the referenced content.
    pub content_hash: alloy::primitives::B256,
    /// Where to fetch the content: inline data, an IPFS CID, an S3 key, or an HTTP URL,
    /// opaque to this crate. Variable length, matching the chain's `bytes uri` ABI field —
    /// a locator scheme is never guaranteed to fit in 32 bytes.
    pub uri: alloy::primitives::Bytes,
}

/// The result of resolving a [`PayloadEnvelope`].
#[derive(Debug, Clone)]
pub struct ResolvedPayload {
    /// The resolved content bytes.
    pub content: Vec<u8>,
    /// Whether the content hash was verified against `content_hash`.
    pub verified: bool,
}

/// Options controlling how [`PayloadResolver::encode`] stores content.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    /// Force an upload even if the content would fit inline.
    pub force_upload: bool,
}
