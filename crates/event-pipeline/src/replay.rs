//! Chunked historical replay. Grounded on `ghostnet-indexer/src/indexer/block_processor.rs`'s
//! `backfill()` loop — fixed-size window, process, advance cursor, log progress — generalized
//! from its `BACKFILL_BATCH_SIZE = 100` to the 10,000-block window this pipeline replays per
//! the checkpoint contract, since a slower chain can afford wider windows before hitting RPC
//! range limits.

use agent_core::{Checkpoint, RequestStartedEvent};
use tracing::{debug, info};

use crate::error::Result;
use crate::source::LogSource;

/// Block span per `eth_getLogs` call during replay, chosen to stay under typical provider
/// range caps while still converging quickly on chains that have been live for years.
pub const REPLAY_CHUNK_SIZE: u64 = 10_000;

/// Replay `[from_block, to_block]` inclusive in `REPLAY_CHUNK_SIZE`-block windows, invoking
/// `on_chunk` with the decoded events of each non-empty chunk and the checkpoint to persist
/// once the chunk has been handed off successfully.
///
/// Returns the number of events replayed. If `from_block > to_block` this is a no-op (nothing
/// to replay, e.g. a fresh deployment whose checkpoint is already caught up).
pub async fn replay<S, F, Fut>(source: &S, from_block: u64, to_block: u64, mut on_chunk: F) -> Result<usize>
where
    S: LogSource + ?Sized,
    F: FnMut(Vec<RequestStartedEvent>, Checkpoint) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    if from_block > to_block {
        return Ok(0);
    }

    let total_blocks = to_block - from_block + 1;
    let mut current = from_block;
    let mut replayed = 0usize;

    while current <= to_block {
        let chunk_end = current.saturating_add(REPLAY_CHUNK_SIZE - 1).min(to_block);
        let events = source.fetch_logs(current, chunk_end).await?;

        if !events.is_empty() {
            replayed += events.len();
            on_chunk(events, Checkpoint::at(chunk_end)).await?;
        }

        let done = chunk_end - from_block + 1;
        debug!(
            from_block,
            to_block,
            chunk_end,
            progress_pct = (done * 100 / total_blocks.max(1)),
            "replay chunk complete"
        );

        current = chunk_end + 1;
    }

    info!(from_block, to_block, replayed, "replay complete");
    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockLogSource;
    use agent_core::RequestStartedEvent;
    use alloy::primitives::{Address, B256, U256};

    fn sample_event(block_number: u64) -> RequestStartedEvent {
        RequestStartedEvent {
            request_id: B256::from(alloy::primitives::keccak256(block_number.to_be_bytes())),
            subscription_id: 1,
            container_id: B256::ZERO,
            interval: 1,
            redundancy: 1,
            use_delivery_inbox: false,
            fee_amount: U256::ZERO,
            fee_token: Address::ZERO,
            verifier: None,
            coordinator: Address::ZERO,
            wallet_address: Address::ZERO,
            block_number,
        }
    }

    #[tokio::test]
    async fn empty_range_replays_nothing() {
        let source = MockLogSource::new();
        let replayed = replay(&source, 10, 5, |_, _| async { Ok(()) }).await.unwrap();
        assert_eq!(replayed, 0);
    }

    #[tokio::test]
    async fn single_chunk_replays_all_events_and_checkpoints_once() {
        let source = MockLogSource::new();
        source.push_historical(sample_event(100));
        source.push_historical(sample_event(200));

        let mut chunks = 0usize;
        let mut seen = 0usize;
        let replayed = replay(&source, 0, 500, |events, checkpoint| {
            chunks += 1;
            seen += events.len();
            assert_eq!(checkpoint.block_number, 500);
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(replayed, 2);
        assert_eq!(seen, 2);
        assert_eq!(chunks, 1);
    }

    #[tokio::test]
    async fn wide_range_splits_into_multiple_chunks_and_checkpoints_each_non_empty_one() {
        let source = MockLogSource::new();
        source.push_historical(sample_event(5));
        source.push_historical(sample_event(REPLAY_CHUNK_SIZE + 5));

        let mut checkpoints = Vec::new();
        let replayed = replay(&source, 0, REPLAY_CHUNK_SIZE * 2, |_, checkpoint| {
            checkpoints.push(checkpoint.block_number);
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(replayed, 2);
        assert_eq!(checkpoints, vec![REPLAY_CHUNK_SIZE - 1, REPLAY_CHUNK_SIZE * 2 - 1]);
    }
}
