//! Chain interface traits. Grounded on `evm-provider/src/traits.rs`'s `ChainProvider` /
//! `ExtendedChainProvider` / `NonceManager` shape: narrow async traits with blanket `Arc<T>`
//! impls so any `Arc<dyn RouterChain>` etc. composes freely across components.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::sync::Arc;

use crate::abi::InputType;
use crate::error::Result;
use agent_core::Subscription;

/// Router contract calls: subscription discovery and interval bookkeeping.
#[async_trait]
pub trait RouterChain: Send + Sync {
    /// Fetch a single subscription by id.
    async fn get_subscription(&self, subscription_id: u64) -> Result<Subscription>;

    /// The on-chain interval the coordinator currently considers "current" for this
    /// subscription.
    async fn get_subscription_interval(&self, subscription_id: u64) -> Result<u32>;

    /// The highest subscription id registered so far.
    async fn get_last_subscription_id(&self) -> Result<u64>;

    /// Bulk-read subscriptions `[start, end)` as of `block_number` (0 = latest).
    async fn get_subscriptions_batch(
        &self,
        start: u64,
        end: u64,
        block_number: u64,
    ) -> Result<Vec<Subscription>>;
}

/// Coordinator contract calls: redundancy accounting, prepare, and result submission.
#[async_trait]
pub trait CoordinatorChain: Send + Sync {
    /// Number of agents that have already fulfilled `request_id`.
    async fn redundancy_count(&self, request_id: B256) -> Result<u16>;

    /// Open the next interval of a subscription for fulfillment. Returns the transaction
    /// hash once the transaction has been broadcast (not necessarily mined).
    async fn prepare_next_interval(
        &self,
        subscription_id: u64,
        interval: u32,
        wallet: Address,
    ) -> Result<B256>;

    /// Submit a compute result for settlement. Returns `(tx_hash, success, gas_used)` where
    /// `success` reflects the receipt status.
    #[allow(clippy::too_many_arguments)]
    async fn report_compute_result(
        &self,
        interval: u32,
        input_payload: &[u8],
        output_payload: &[u8],
        proof_payload: &[u8],
        commitment_data: &[u8],
        node_wallet: Address,
    ) -> Result<(B256, bool, Option<u64>)>;
}

/// Client contract call: per-request input resolution.
#[async_trait]
pub trait ClientChain: Send + Sync {
    /// Fetch `(data, input_type)` for `(subscription_id, interval)` as seen by `caller` at
    /// `timestamp`. `client_address` is the target contract — each subscription names its own
    /// client contract (`Subscription::client`), so callers must pass it through rather than
    /// relying on a single address baked into the chain client.
    #[allow(clippy::too_many_arguments)]
    async fn get_compute_inputs(
        &self,
        client_address: Address,
        subscription_id: u64,
        interval: u32,
        timestamp: u64,
        caller: Address,
    ) -> Result<(Vec<u8>, InputType)>;
}

/// Convenience union of all three chain interfaces, used by components that need the full
/// surface (the scheduler and the request handler).
pub trait ChainClient: RouterChain + CoordinatorChain + ClientChain {}
impl<T: RouterChain + CoordinatorChain + ClientChain> ChainClient for T {}

#[async_trait]
impl<T: RouterChain + ?Sized> RouterChain for Arc<T> {
    async fn get_subscription(&self, subscription_id: u64) -> Result<Subscription> {
        (**self).get_subscription(subscription_id).await
    }

    async fn get_subscription_interval(&self, subscription_id: u64) -> Result<u32> {
        (**self).get_subscription_interval(subscription_id).await
    }

    async fn get_last_subscription_id(&self) -> Result<u64> {
        (**self).get_last_subscription_id().await
    }

    async fn get_subscriptions_batch(
        &self,
        start: u64,
        end: u64,
        block_number: u64,
    ) -> Result<Vec<Subscription>> {
        (**self).get_subscriptions_batch(start, end, block_number).await
    }
}

#[async_trait]
impl<T: CoordinatorChain + ?Sized> CoordinatorChain for Arc<T> {
    async fn redundancy_count(&self, request_id: B256) -> Result<u16> {
        (**self).redundancy_count(request_id).await
    }

    async fn prepare_next_interval(
        &self,
        subscription_id: u64,
        interval: u32,
        wallet: Address,
    ) -> Result<B256> {
        (**self).prepare_next_interval(subscription_id, interval, wallet).await
    }

    async fn report_compute_result(
        &self,
        interval: u32,
        input_payload: &[u8],
        output_payload: &[u8],
        proof_payload: &[u8],
        commitment_data: &[u8],
        node_wallet: Address,
    ) -> Result<(B256, bool, Option<u64>)> {
        (**self)
            .report_compute_result(
                interval,
                input_payload,
                output_payload,
                proof_payload,
                commitment_data,
                node_wallet,
            )
            .await
    }
}

#[async_trait]
impl<T: ClientChain + ?Sized> ClientChain for Arc<T> {
    async fn get_compute_inputs(
        &self,
        client_address: Address,
        subscription_id: u64,
        interval: u32,
        timestamp: u64,
        caller: Address,
    ) -> Result<(Vec<u8>, InputType)> {
        (**self).get_compute_inputs(client_address, subscription_id, interval, timestamp, caller).await
    }
}
