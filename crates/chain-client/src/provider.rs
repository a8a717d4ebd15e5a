//! Production chain client backed by an `alloy` provider.
//!
//! Grounded on `evm-provider`'s provider-wrapping pattern (a single struct holding an
//! `Arc<dyn Provider>`-like handle, narrow trait methods delegating into generated contract
//! bindings) and on `megaeth-rpc/src/client.rs`'s discipline of serializing writes behind an
//! internal mutex so nonce assignment never races across concurrent submissions (spec §5,
//! "Nonce discipline").

use std::sync::Arc;

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::abi::{IClient, ICoordinator, IRouter, InputType};
use crate::error::{ChainError, Result};
use crate::traits::{ClientChain, CoordinatorChain, RouterChain};
use agent_core::Subscription;

/// Chain client backed by a live `alloy` HTTP/WS provider.
///
/// All writing calls (`prepare_next_interval`, `report_compute_result`) share one signer and
/// serialize nonce assignment through `send_lock`; reads proceed concurrently.
#[derive(Debug, Clone)]
pub struct AlloyChainClient<P> {
    provider: Arc<P>,
    router_address: Address,
    coordinator_address: Address,
    send_lock: Arc<Mutex<()>>,
}

impl<P> AlloyChainClient<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    /// Wrap an already-constructed provider.
    #[must_use]
    pub fn new(provider: P, router_address: Address, coordinator_address: Address) -> Self {
        Self {
            provider: Arc::new(provider),
            router_address,
            coordinator_address,
            send_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Build an HTTP-backed chain client from an RPC URL.
///
/// # Errors
/// Returns an error if `rpc_url` cannot be parsed.
pub fn connect_http(
    rpc_url: &str,
    router_address: Address,
    coordinator_address: Address,
) -> Result<AlloyChainClient<impl Provider + Clone + Send + Sync + 'static>> {
    let url = rpc_url
        .parse()
        .map_err(|e| ChainError::InvalidAddress(format!("rpc_url {rpc_url}: {e}")))?;
    let provider = ProviderBuilder::new().connect_http(url);
    Ok(AlloyChainClient::new(provider, router_address, coordinator_address))
}

#[async_trait]
impl<P> RouterChain for AlloyChainClient<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    #[instrument(skip(self))]
    async fn get_subscription(&self, subscription_id: u64) -> Result<Subscription> {
        let router = IRouter::new(self.router_address, self.provider.as_ref().clone());
        let call = router
            .getComputeSubscription(subscription_id)
            .call()
            .await
            .map_err(|e| ChainError::Transport { method: "getComputeSubscription", source: Box::new(e) })?;

        if call.client.is_zero() {
            return Err(ChainError::SubscriptionNotFound(subscription_id));
        }

        Ok(Subscription {
            subscription_id,
            container_id: call.containerId.into(),
            client: call.client,
            wallet: call.wallet,
            active_at: call.activeAt,
            interval_seconds: call.intervalSeconds,
            max_executions: call.maxExecutions,
            redundancy: call.redundancy,
            verifier: (!call.verifier.is_zero()).then_some(call.verifier),
            route_id: call.routeId,
        })
    }

    #[instrument(skip(self))]
    async fn get_subscription_interval(&self, subscription_id: u64) -> Result<u32> {
        let router = IRouter::new(self.router_address, self.provider.as_ref().clone());
        router
            .getComputeSubscriptionInterval(subscription_id)
            .call()
            .await
            .map_err(|e| ChainError::Transport {
                method: "getComputeSubscriptionInterval",
                source: Box::new(e),
            })
    }

    #[instrument(skip(self))]
    async fn get_last_subscription_id(&self) -> Result<u64> {
        let router = IRouter::new(self.router_address, self.provider.as_ref().clone());
        router
            .getLastSubscriptionId()
            .call()
            .await
            .map_err(|e| ChainError::Transport { method: "getLastSubscriptionId", source: Box::new(e) })
    }

    #[instrument(skip(self))]
    async fn get_subscriptions_batch(
        &self,
        start: u64,
        end: u64,
        _block_number: u64,
    ) -> Result<Vec<Subscription>> {
        // No dedicated batch-reader binding is wired in (spec §9: "no literal field order
        // should be hard-coded in the core" for the reader's own struct layout), so this walks
        // `[start, end)` through the same typed per-id getter `get_subscription` already uses,
        // which decodes `getComputeSubscription`'s fields one call at a time. A gap in the id
        // space (a subscription that was never registered) is not a batch-reader failure, so
        // `SubscriptionNotFound` is skipped rather than aborting the rest of the range.
        let mut subscriptions = Vec::new();
        for subscription_id in start..end {
            match self.get_subscription(subscription_id).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(ChainError::SubscriptionNotFound(_)) => {
                    warn!(subscription_id, "subscription id not found in batch range, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(subscriptions)
    }
}

#[async_trait]
impl<P> CoordinatorChain for AlloyChainClient<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    #[instrument(skip(self))]
    async fn redundancy_count(&self, request_id: B256) -> Result<u16> {
        let coordinator = ICoordinator::new(self.coordinator_address, self.provider.as_ref().clone());
        coordinator
            .redundancyCount(request_id)
            .call()
            .await
            .map_err(|e| ChainError::Transport { method: "redundancyCount", source: Box::new(e) })
    }

    #[instrument(skip(self))]
    async fn prepare_next_interval(
        &self,
        subscription_id: u64,
        interval: u32,
        wallet: Address,
    ) -> Result<B256> {
        let _guard = self.send_lock.lock().await;
        let coordinator = ICoordinator::new(self.coordinator_address, self.provider.as_ref().clone());
        let pending = coordinator
            .prepareNextInterval(subscription_id, interval, wallet)
            .send()
            .await
            .map_err(classify_prepare_error)?;
        Ok(*pending.tx_hash())
    }

    #[instrument(skip(self, input_payload, output_payload, proof_payload, commitment_data))]
    async fn report_compute_result(
        &self,
        interval: u32,
        input_payload: &[u8],
        output_payload: &[u8],
        proof_payload: &[u8],
        commitment_data: &[u8],
        node_wallet: Address,
    ) -> Result<(B256, bool, Option<u64>)> {
        let _guard = self.send_lock.lock().await;
        let coordinator = ICoordinator::new(self.coordinator_address, self.provider.as_ref().clone());
        let pending = coordinator
            .reportComputeResult(
                interval,
                input_payload.to_vec().into(),
                output_payload.to_vec().into(),
                proof_payload.to_vec().into(),
                commitment_data.to_vec().into(),
                node_wallet,
            )
            .send()
            .await
            .map_err(classify_submit_error)?;
        let tx_hash = *pending.tx_hash();
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainError::Transport { method: "reportComputeResult receipt", source: Box::new(e) })?;
        Ok((tx_hash, receipt.status(), receipt.gas_used.try_into().ok()))
    }
}

#[async_trait]
impl<P> ClientChain for AlloyChainClient<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    #[instrument(skip(self))]
    async fn get_compute_inputs(
        &self,
        client_address: Address,
        subscription_id: u64,
        interval: u32,
        timestamp: u64,
        caller: Address,
    ) -> Result<(Vec<u8>, InputType)> {
        let client = IClient::new(client_address, self.provider.as_ref().clone());
        let call = client
            .getComputeInputs(subscription_id, interval, timestamp, caller)
            .call()
            .await
            .map_err(|e| ChainError::Transport { method: "getComputeInputs", source: Box::new(e) })?;
        let input_type = InputType::from_u8(call.inputType)
            .ok_or_else(|| ChainError::AbiDecode(format!("unknown inputType {}", call.inputType)))?;
        Ok((call.data.to_vec(), input_type))
    }
}

fn classify_prepare_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> ChainError {
    let msg = e.to_string();
    if msg.contains("3cdc51d3") || msg.to_lowercase().contains("nonextinterval") {
        ChainError::NoNextInterval
    } else if msg.to_lowercase().contains("overflow") || msg.to_lowercase().contains("underflow") {
        ChainError::ArithmeticAlreadyExecuted
    } else if msg.to_lowercase().contains("revert") {
        ChainError::ExecutionReverted(msg)
    } else {
        ChainError::Transport { method: "prepareNextInterval", source: Box::new(e) }
    }
}

fn classify_submit_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> ChainError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("nonce expired") || lower.contains("nonce too low") || lower.contains("nonce already used") {
        ChainError::NonceCollision(msg)
    } else if lower.contains("revert") {
        ChainError::ExecutionReverted(msg)
    } else {
        ChainError::Transport { method: "reportComputeResult", source: Box::new(e) }
    }
}
