//! Minimal default adapters for the collaborator ports that are explicitly out of scope for
//! the core crates (spec §1, §6): `Registry` and `PayloadResolver`. Grounded on
//! `ghost-fleet/src/service.rs`'s own precedent of falling back to a documented placeholder
//! (`MockProvider::with_chain_id` with a `warn!("Real provider not yet implemented, using
//! mock")`) when a full production integration isn't wired up — these adapters serve the
//! equivalent role here so the binary is runnable end-to-end without inventing a registry
//! service or object-storage client this repository was never asked to build.

use std::collections::HashMap;

use agent_core::{
    AgentError, ContainerMetadata, EncodeOptions, PayloadEnvelope, PayloadResolver, Registry, RegistryStats,
};
use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use tracing::warn;

/// A `Registry` backed entirely by the static container list from configuration. `reload`
/// always succeeds immediately since there is no external source to re-fetch from.
#[derive(Debug, Clone)]
pub struct StaticRegistry {
    containers: HashMap<String, ContainerMetadata>,
    by_hash: HashMap<B256, String>,
}

impl StaticRegistry {
    /// Build a registry from the agent's configured containers.
    #[must_use]
    pub fn new(containers: Vec<ContainerMetadata>) -> Self {
        let by_hash = containers
            .iter()
            .map(|c| (chain_client::container_id_hash(&c.id), c.id.clone()))
            .collect();
        let containers = containers.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self { containers, by_hash }
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn load(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn reload(&self) -> Result<(), AgentError> {
        Ok(())
    }

    fn get_container(&self, container_id: &str) -> Option<ContainerMetadata> {
        self.containers.get(container_id).cloned()
    }

    fn supports(&self, container_id: B256) -> bool {
        self.by_hash.contains_key(&container_id)
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats { container_count: self.containers.len() }
    }
}

/// A `PayloadResolver` that treats every envelope's `uri` field as the content itself: no
/// IPFS, S3, or HTTP fetch. Adequate for `RAW`/`URI_STRING` inputs which never reach this
/// collaborator and for development against containers that exchange small payloads inline;
/// production deployments wire a real object-storage-backed resolver in its place.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlinePayloadResolver;

#[async_trait]
impl PayloadResolver for InlinePayloadResolver {
    async fn resolve(
        &self,
        envelope: PayloadEnvelope,
        inline_hint: Option<Vec<u8>>,
    ) -> Result<agent_core::ResolvedPayload, AgentError> {
        let content = inline_hint.unwrap_or_else(|| envelope.uri.to_vec());
        let computed = alloy::primitives::keccak256(&content);
        let verified = computed == envelope.content_hash;
        if !verified {
            warn!(%envelope.content_hash, "inline payload failed hash verification");
        }
        Ok(agent_core::ResolvedPayload { content, verified })
    }

    async fn encode(&self, content: &[u8], options: EncodeOptions) -> Result<PayloadEnvelope, AgentError> {
        if options.force_upload {
            return Err(AgentError::PayloadResolution(
                "InlinePayloadResolver cannot upload, only inline".to_string(),
            ));
        }
        Ok(PayloadEnvelope {
            content_hash: alloy::primitives::keccak256(content),
            uri: Bytes::copy_from_slice(content),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(id: &str) -> ContainerMetadata {
        ContainerMetadata {
            id: id.to_string(),
            image: "demo:latest".to_string(),
            port: None,
            env: HashMap::new(),
            verifier_address: None,
            accepted_payments: Vec::new(),
            memory_limit: None,
            cpu_limit: None,
            gpu: false,
        }
    }

    #[test]
    fn static_registry_supports_configured_containers() {
        let registry = StaticRegistry::new(vec![metadata("sum")]);
        let hash = chain_client::container_id_hash("sum");
        assert!(registry.supports(hash));
        assert!(!registry.supports(B256::from([1; 32])));
    }

    #[tokio::test]
    async fn inline_resolver_round_trips_content() {
        let resolver = InlinePayloadResolver;
        let envelope = resolver.encode(b"hello", EncodeOptions::default()).await.unwrap();
        let resolved = resolver.resolve(envelope, None).await.unwrap();
        assert!(resolved.verified);
        assert_eq!(&resolved.content[..5], b"hello");
    }

    #[tokio::test]
    async fn inline_resolver_rejects_forced_upload() {
        let resolver = InlinePayloadResolver;
        let content = b"hello";
        assert!(resolver.encode(content, EncodeOptions { force_upload: true }).await.is_err());
    }
}
