//! Default [`CheckpointStore`] implementations: a crash-safe file-backed adapter for
//! production, and an in-memory double for tests.
//!
//! Grounded on `ghostnet-indexer`'s `CheckpointManager<S>` (load/save around a generic state
//! store) adapted to spec §4.1's two-file contract: a checkpoint JSON and an append-log of
//! committed interval keys.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{Checkpoint, CommittedKey};
use crate::ports::CheckpointStore;

const CHECKPOINT_FILE: &str = "checkpoint.json";
const COMMITTED_LOG_FILE: &str = "committed.log";

/// File-backed checkpoint store. Writes the checkpoint via write-then-rename so a crash
/// mid-write never leaves a torn file behind; appends committed keys one line at a time.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    /// Serializes writes to the append log; reads never race a write with this held.
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Use `dir` as the persisted-state directory, creating it if necessary.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, write_lock: Mutex::new(()) })
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    fn committed_log_path(&self) -> PathBuf {
        self.dir.join(COMMITTED_LOG_FILE)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(&checkpoint)?;
        let tmp_path = self.dir.join(format!("{CHECKPOINT_FILE}.tmp"));
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, self.checkpoint_path()).await?;
        debug!(block_number = checkpoint.block_number, "checkpoint saved");
        Ok(())
    }

    async fn load_committed(&self) -> Result<Vec<CommittedKey>> {
        let path = self.committed_log_path();
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(contents
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| match CommittedKey::from_str(line) {
                Ok(key) => Some(key),
                Err(_) => {
                    warn!(line, "skipping malformed line in committed-interval log");
                    None
                }
            })
            .collect())
    }

    async fn save_committed(&self, key: CommittedKey) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.committed_log_path())
            .await?;
        file.write_all(format!("{key}\n").as_bytes()).await?;
        debug!(%key, "committed interval appended to log");
        Ok(())
    }
}

/// In-memory checkpoint store for tests. Not crash-safe by design — it exists to let the
/// event pipeline and scheduler test suites exercise checkpoint/commit logic without touching
/// the filesystem.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: Arc<Mutex<InMemoryState>>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    checkpoint: Option<Checkpoint>,
    committed: HashSet<CommittedKey>,
}

impl InMemoryCheckpointStore {
    /// A fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(self.inner.lock().await.checkpoint)
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        self.inner.lock().await.checkpoint = Some(checkpoint);
        Ok(())
    }

    async fn load_committed(&self) -> Result<Vec<CommittedKey>> {
        Ok(self.inner.lock().await.committed.iter().copied().collect())
    }

    async fn save_committed(&self, key: CommittedKey) -> Result<()> {
        self.inner.lock().await.committed.insert(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.save(Checkpoint::at(100)).await.unwrap();
        store.save(Checkpoint::at(200)).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 200);
    }

    #[tokio::test]
    async fn file_store_appends_committed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).await.unwrap();
        store.save_committed(CommittedKey::new(1, 1)).await.unwrap();
        store.save_committed(CommittedKey::new(1, 2)).await.unwrap();
        let committed = store.load_committed().await.unwrap();
        assert_eq!(committed.len(), 2);
        assert!(committed.contains(&CommittedKey::new(1, 1)));
        assert!(committed.contains(&CommittedKey::new(1, 2)));
    }

    #[tokio::test]
    async fn file_store_skips_malformed_lines_without_losing_valid_ones() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).await.unwrap();
        store.save_committed(CommittedKey::new(1, 1)).await.unwrap();
        tokio::fs::write(
            store.committed_log_path(),
            format!("{}\nnot-a-valid-key\n{}\n", CommittedKey::new(1, 1), CommittedKey::new(2, 3)),
        )
        .await
        .unwrap();

        let committed = store.load_committed().await.unwrap();
        assert_eq!(committed.len(), 2);
        assert!(committed.contains(&CommittedKey::new(1, 1)));
        assert!(committed.contains(&CommittedKey::new(2, 3)));
    }

    #[tokio::test]
    async fn in_memory_store_behaves_like_file_store() {
        let store = InMemoryCheckpointStore::new();
        store.save(Checkpoint::at(5)).await.unwrap();
        store.save_committed(CommittedKey::new(9, 1)).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().block_number, 5);
        assert_eq!(store.load_committed().await.unwrap(), vec![CommittedKey::new(9, 1)]);
    }
}
