//! The log source abstraction: everything the pipeline needs from a chain connection,
//! factored behind a trait so the state machine and replay logic can be driven by a scripted
//! fake in tests. Grounded on `ghostnet-indexer/src/indexer/realtime_processor.rs` (block
//! number polling, `subscribe_logs`, keep-alive pings) and `block_processor.rs` (batched
//! range fetch for backfill).

use std::time::Duration;

use agent_core::RequestStartedEvent;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::Filter;
use async_trait::async_trait;
use chain_client::RequestStarted;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Everything the pipeline needs from a chain connection.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Current block number, used to size replay ranges and detect new blocks in
    /// `HttpFallback` polling.
    async fn latest_block(&self) -> Result<u64>;

    /// Fetch and decode `RequestStarted` logs in the inclusive range `[from, to]`.
    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RequestStartedEvent>>;

    /// Attempt a WebSocket connection, returning a channel that yields decoded events until
    /// the connection drops (the channel closing signals a WS failure and should trigger
    /// `ConnectionState::on_ws_closed`).
    async fn connect_ws(&self, timeout: Duration) -> Result<mpsc::Receiver<RequestStartedEvent>>;
}

/// Production log source backed by an `alloy` provider pair (HTTP always, WS optional).
#[derive(Debug, Clone)]
pub struct AlloyLogSource {
    http_rpc_url: String,
    ws_rpc_url: Option<String>,
    watched_address: Address,
}

impl AlloyLogSource {
    /// Watch `watched_address` for `RequestStarted` logs via `http_rpc_url`, optionally also
    /// subscribing live via `ws_rpc_url`.
    #[must_use]
    pub const fn new(http_rpc_url: String, ws_rpc_url: Option<String>, watched_address: Address) -> Self {
        Self { http_rpc_url, ws_rpc_url, watched_address }
    }

    fn topic0() -> B256 {
        RequestStarted::SIGNATURE_HASH
    }

    fn decode_log(log: &alloy::rpc::types::Log) -> Result<RequestStartedEvent> {
        let block_number = log.block_number.unwrap_or_default();
        let decoded = log
            .log_decode::<RequestStarted>()
            .map_err(|e| PipelineError::MalformedLog(e.to_string()))?;
        let inner = decoded.inner.data;
        Ok(RequestStartedEvent {
            request_id: inner.requestId,
            subscription_id: inner.subId,
            container_id: inner.containerId,
            interval: inner.commitment.interval,
            redundancy: inner.commitment.redundancy,
            use_delivery_inbox: inner.commitment.useDeliveryInbox,
            fee_amount: inner.commitment.feeAmount,
            fee_token: inner.commitment.feeToken,
            verifier: (!inner.commitment.verifier.is_zero()).then_some(inner.commitment.verifier),
            coordinator: inner.commitment.coordinator,
            wallet_address: inner.commitment.walletAddress,
            block_number,
        })
    }
}

#[async_trait]
impl LogSource for AlloyLogSource {
    async fn latest_block(&self) -> Result<u64> {
        let url = self
            .http_rpc_url
            .parse()
            .map_err(|e| PipelineError::Transport(format!("invalid rpc_url: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url);
        provider
            .get_block_number()
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))
    }

    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RequestStartedEvent>> {
        let url = self
            .http_rpc_url
            .parse()
            .map_err(|e| PipelineError::Transport(format!("invalid rpc_url: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url);
        let filter = Filter::new()
            .address(self.watched_address)
            .event_signature(Self::topic0())
            .from_block(from_block)
            .to_block(to_block);
        let logs = provider
            .get_logs(&filter)
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match Self::decode_log(log) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "dropping malformed RequestStarted log"),
            }
        }
        Ok(events)
    }

    async fn connect_ws(&self, timeout: Duration) -> Result<mpsc::Receiver<RequestStartedEvent>> {
        let ws_url = self
            .ws_rpc_url
            .as_ref()
            .ok_or_else(|| PipelineError::WebSocketUnavailable("no ws_rpc_url configured".to_string()))?;

        let connect = WsConnect::new(ws_url.clone());
        let provider = tokio::time::timeout(timeout, ProviderBuilder::new().connect_ws(connect))
            .await
            .map_err(|_| PipelineError::WebSocketUnavailable("connect timed out".to_string()))?
            .map_err(|e| PipelineError::WebSocketUnavailable(e.to_string()))?;

        let filter = Filter::new().address(self.watched_address).event_signature(Self::topic0());
        let subscription = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| PipelineError::WebSocketUnavailable(e.to_string()))?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut stream = subscription.into_stream();
            use futures::StreamExt;
            while let Some(log) = stream.next().await {
                match AlloyLogSource::decode_log(&log) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed RequestStarted log"),
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use test_support::MockLogSource;

#[cfg(any(test, feature = "test-utils"))]
mod test_support {
    use super::{LogSource, PipelineError, RequestStartedEvent, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Scriptable log source for tests: pre-loaded historical events plus a channel the test
    /// can push live events into (or close, to simulate a WS drop).
    #[derive(Debug, Default)]
    pub struct MockLogSource {
        state: Mutex<State>,
    }

    #[derive(Debug, Default)]
    struct State {
        latest_block: u64,
        historical: Vec<RequestStartedEvent>,
        ws_available: bool,
        live_rx: Option<mpsc::Receiver<RequestStartedEvent>>,
    }

    impl MockLogSource {
        /// A mock with no events and `latest_block() == 0`.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Set the value `latest_block()` returns.
        pub fn set_latest_block(&self, block: u64) {
            self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).latest_block = block;
        }

        /// Register a historical event to be returned by `fetch_logs` when its block falls in
        /// range.
        pub fn push_historical(&self, event: RequestStartedEvent) {
            self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).historical.push(event);
        }

        /// Make `connect_ws` succeed, handing the pipeline the receiving end of `sender`.
        pub fn set_ws_available(&self, available: bool, live_rx: Option<mpsc::Receiver<RequestStartedEvent>>) {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.ws_available = available;
            state.live_rx = live_rx;
        }
    }

    #[async_trait]
    impl LogSource for MockLogSource {
        async fn latest_block(&self) -> Result<u64> {
            Ok(self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).latest_block)
        }

        async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RequestStartedEvent>> {
            let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(state
                .historical
                .iter()
                .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
                .copied()
                .collect())
        }

        async fn connect_ws(&self, _timeout: Duration) -> Result<mpsc::Receiver<RequestStartedEvent>> {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if !state.ws_available {
                return Err(PipelineError::WebSocketUnavailable("mock: ws unavailable".to_string()));
            }
            state
                .live_rx
                .take()
                .ok_or_else(|| PipelineError::WebSocketUnavailable("mock: no live_rx configured".to_string()))
        }
    }
}
