//! In-memory chain client for tests. Grounded on `evm-provider/src/traits.rs`'s own
//! `MockProvider` test pattern: a `Mutex`-guarded state struct plus plain getters/setters
//! callers use to script scenarios before exercising the trait methods.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;

use crate::abi::InputType;
use crate::error::{ChainError, Result};
use crate::traits::{ClientChain, CoordinatorChain, RouterChain};
use agent_core::Subscription;

/// Scriptable in-memory chain client for unit and integration tests.
#[derive(Debug, Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    subscriptions: HashMap<u64, Subscription>,
    intervals: HashMap<u64, u32>,
    last_subscription_id: u64,
    redundancy: HashMap<B256, u16>,
    prepared: Vec<(u64, u32, Address)>,
    submitted: Vec<(u32, Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>, Address)>,
    inputs: HashMap<(u64, u32), (Vec<u8>, InputType)>,
    /// When set, the next `prepare_next_interval` call returns this error instead of succeeding.
    next_prepare_error: Option<fn() -> ChainError>,
    /// When set, the next `report_compute_result` call returns this error.
    next_submit_error: Option<fn() -> ChainError>,
}

impl MockChainClient {
    /// An empty mock with no subscriptions registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription as if discovered from chain.
    pub fn insert_subscription(&self, sub: Subscription) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.last_subscription_id = state.last_subscription_id.max(sub.subscription_id);
        state.subscriptions.insert(sub.subscription_id, sub);
    }

    /// Set the on-chain current interval reported for a subscription.
    pub fn set_interval(&self, subscription_id: u64, interval: u32) {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .intervals
            .insert(subscription_id, interval);
    }

    /// Set `redundancyCount` for a request id.
    pub fn set_redundancy_count(&self, request_id: B256, count: u16) {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .redundancy
            .insert(request_id, count);
    }

    /// Script the response to `getComputeInputs` for `(subscription_id, interval)`.
    pub fn set_inputs(&self, subscription_id: u64, interval: u32, data: Vec<u8>, input_type: InputType) {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .inputs
            .insert((subscription_id, interval), (data, input_type));
    }

    /// Make the next `prepare_next_interval` call fail with `error`.
    pub fn fail_next_prepare_with(&self, error: fn() -> ChainError) {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .next_prepare_error = Some(error);
    }

    /// Make the next `report_compute_result` call fail with `error`.
    pub fn fail_next_submit_with(&self, error: fn() -> ChainError) {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .next_submit_error = Some(error);
    }

    /// All `prepareNextInterval` calls observed so far, in order.
    #[must_use]
    pub fn prepared_calls(&self) -> Vec<(u64, u32, Address)> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).prepared.clone()
    }

    /// All `reportComputeResult` calls observed so far, in order.
    #[must_use]
    pub fn submitted_calls(&self) -> usize {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).submitted.len()
    }
}

#[async_trait]
impl RouterChain for MockChainClient {
    async fn get_subscription(&self, subscription_id: u64) -> Result<Subscription> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .subscriptions
            .get(&subscription_id)
            .copied()
            .ok_or(ChainError::SubscriptionNotFound(subscription_id))
    }

    async fn get_subscription_interval(&self, subscription_id: u64) -> Result<u32> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state
            .intervals
            .get(&subscription_id)
            .copied()
            .ok_or(ChainError::SubscriptionNotFound(subscription_id))
    }

    async fn get_last_subscription_id(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).last_subscription_id)
    }

    async fn get_subscriptions_batch(
        &self,
        start: u64,
        end: u64,
        _block_number: u64,
    ) -> Result<Vec<Subscription>> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok((start..end).filter_map(|id| state.subscriptions.get(&id).copied()).collect())
    }
}

#[async_trait]
impl CoordinatorChain for MockChainClient {
    async fn redundancy_count(&self, request_id: B256) -> Result<u16> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .redundancy
            .get(&request_id)
            .copied()
            .unwrap_or(0))
    }

    async fn prepare_next_interval(
        &self,
        subscription_id: u64,
        interval: u32,
        wallet: Address,
    ) -> Result<B256> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(make_error) = state.next_prepare_error.take() {
            return Err(make_error());
        }
        state.prepared.push((subscription_id, interval, wallet));
        Ok(B256::from(alloy::primitives::keccak256(
            [subscription_id.to_be_bytes().as_slice(), interval.to_be_bytes().as_slice()].concat(),
        )))
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
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(make_error) = state.next_submit_error.take() {
            return Err(make_error());
        }
        state.submitted.push((
            interval,
            input_payload.to_vec(),
            output_payload.to_vec(),
            proof_payload.to_vec(),
            commitment_data.to_vec(),
            node_wallet,
        ));
        Ok((B256::from(alloy::primitives::keccak256(commitment_data)), true, Some(21_000)))
    }
}

#[async_trait]
impl ClientChain for MockChainClient {
    async fn get_compute_inputs(
        &self,
        _client_address: Address,
        subscription_id: u64,
        interval: u32,
        _timestamp: u64,
        _caller: Address,
    ) -> Result<(Vec<u8>, InputType)> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .inputs
            .get(&(subscription_id, interval))
            .cloned()
            .ok_or_else(|| ChainError::AbiDecode("no scripted inputs for request".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_subscription(id: u64) -> Subscription {
        Subscription {
            subscription_id: id,
            container_id: B256::ZERO,
            client: Address::from([1; 20]),
            wallet: Address::from([2; 20]),
            active_at: 1000,
            interval_seconds: 60,
            max_executions: 0,
            redundancy: 1,
            verifier: None,
            route_id: 0,
        }
    }

    #[tokio::test]
    async fn mock_tracks_prepared_calls() {
        let mock = MockChainClient::new();
        mock.insert_subscription(sample_subscription(1));
        mock.prepare_next_interval(1, 3, Address::from([9; 20])).await.unwrap();
        assert_eq!(mock.prepared_calls(), vec![(1, 3, Address::from([9; 20]))]);
    }

    #[tokio::test]
    async fn mock_honors_scripted_prepare_error() {
        let mock = MockChainClient::new();
        mock.fail_next_prepare_with(|| ChainError::NoNextInterval);
        let err = mock.prepare_next_interval(1, 1, Address::ZERO).await.unwrap_err();
        assert!(matches!(err, ChainError::NoNextInterval));
    }
}
