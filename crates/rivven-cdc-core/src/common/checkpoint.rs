//! # Capture Checkpoints
//!
//! State the host persists to resume a capture after a restart without
//! re-emitting finished chunks and without missing log records:
//!
//! | Field | Purpose |
//! |-------|---------|
//! | `plan` | chunk boundaries, reused verbatim on resume |
//! | `chunks` | per-chunk state table with each DONE chunk's high watermark |
//! | `last_emitted_position` | newest log position delivered downstream |
//! | `snapshot_completed_at` | streaming start position once the mode switch happened |
//! | `phase` | capture phase at save time |
//!
//! Stores write JSON. [`FileCheckpointStore`] writes a temp file, fsyncs it
//! and renames it over the previous checkpoint.

use crate::common::{
    CapturePhase, CdcError, Chunk, ChunkPlan, ChunkState, LogPosition, Result, TableId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Progress of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub state: ChunkState,
    /// High watermark of the read whose events were emitted; set once DONE
    pub high_watermark: Option<LogPosition>,
}

/// Resumable state of one table capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureCheckpoint {
    pub capture_id: Uuid,
    pub table: TableId,
    pub plan: ChunkPlan,
    pub chunks: BTreeMap<u32, ChunkProgress>,
    pub last_emitted_position: Option<LogPosition>,
    pub snapshot_completed_at: Option<LogPosition>,
    pub phase: CapturePhase,
    pub updated_at: DateTime<Utc>,
}

impl CaptureCheckpoint {
    /// Fresh checkpoint with every chunk PENDING.
    pub fn new(plan: ChunkPlan) -> Self {
        let chunks = plan
            .iter()
            .map(|c| (c.id, ChunkProgress::default()))
            .collect();
        Self {
            capture_id: Uuid::new_v4(),
            table: plan.table().clone(),
            plan,
            chunks,
            last_emitted_position: None,
            snapshot_completed_at: None,
            phase: CapturePhase::SnapshotInProgress,
            updated_at: Utc::now(),
        }
    }

    pub fn is_done(&self, chunk_id: u32) -> bool {
        self.chunks
            .get(&chunk_id)
            .is_some_and(|p| p.state.is_done())
    }

    pub fn done_chunk_ids(&self) -> BTreeSet<u32> {
        self.chunks
            .iter()
            .filter(|(_, p)| p.state.is_done())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn all_done(&self) -> bool {
        self.chunks.values().all(|p| p.state.is_done())
    }

    /// Chunks still to snapshot, in id order.
    pub fn pending_chunks(&self) -> Vec<Chunk> {
        self.plan
            .iter()
            .filter(|c| !self.is_done(c.id))
            .collect()
    }

    /// Move a chunk to `state`; DONE goes through [`Self::mark_done`].
    pub fn set_state(&mut self, chunk_id: u32, state: ChunkState) {
        if let Some(progress) = self.chunks.get_mut(&chunk_id) {
            if !progress.state.is_done() {
                progress.state = state;
            }
        }
        self.touch();
    }

    /// Retire a chunk with the high watermark of its emitted read.
    pub fn mark_done(&mut self, chunk_id: u32, high: LogPosition) -> Result<()> {
        let progress = self.chunks.get_mut(&chunk_id).ok_or_else(|| {
            CdcError::invalid_state(format!("chunk {} is not part of the plan", chunk_id))
        })?;
        if progress.state.is_done() {
            return Err(CdcError::invalid_state(format!(
                "chunk {} is already DONE",
                chunk_id
            )));
        }
        progress.state = ChunkState::Done;
        progress.high_watermark = Some(high);
        self.record_emitted(high);
        Ok(())
    }

    /// High watermark of a DONE chunk.
    pub fn high_watermark(&self, chunk_id: u32) -> Option<LogPosition> {
        self.chunks.get(&chunk_id).and_then(|p| p.high_watermark)
    }

    /// Smallest high watermark over DONE chunks.
    pub fn min_high_watermark(&self) -> Option<LogPosition> {
        self.chunks.values().filter_map(|p| p.high_watermark).min()
    }

    pub fn max_high_watermark(&self) -> Option<LogPosition> {
        self.chunks.values().filter_map(|p| p.high_watermark).max()
    }

    pub fn record_emitted(&mut self, position: LogPosition) {
        self.last_emitted_position = Some(
            self.last_emitted_position
                .map_or(position, |last| last.max(position)),
        );
        self.touch();
    }

    /// Reset chunks that were in progress when the capture stopped.
    pub fn reset_unfinished(&mut self) {
        for progress in self.chunks.values_mut() {
            if !progress.state.is_done() {
                *progress = ChunkProgress::default();
            }
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Persistence for [`CaptureCheckpoint`]s, keyed by table.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &CaptureCheckpoint) -> Result<()>;

    async fn load(&self, table: &TableId) -> Result<Option<CaptureCheckpoint>>;

    async fn delete(&self, table: &TableId) -> Result<()>;
}

/// In-memory checkpoint store (for testing or when persistence isn't needed).
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<TableId, CaptureCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &CaptureCheckpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.table.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, table: &TableId) -> Result<Option<CaptureCheckpoint>> {
        Ok(self.checkpoints.read().await.get(table).cloned())
    }

    async fn delete(&self, table: &TableId) -> Result<()> {
        self.checkpoints.write().await.remove(table);
        Ok(())
    }
}

/// Checkpoint store writing one JSON file per table.
pub struct FileCheckpointStore {
    base_dir: PathBuf,
    fsync: bool,
}

impl FileCheckpointStore {
    /// Create the store, creating `base_dir` if needed.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(base_dir, true).await
    }

    pub async fn with_options(base_dir: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir, fsync })
    }

    fn file_path(&self, table: &TableId) -> Result<PathBuf> {
        let key = table.to_string();
        let valid = !table.database.is_empty()
            && !table.table.is_empty()
            && !key.contains(['/', '\\'])
            && !key.starts_with('.');
        if !valid {
            return Err(CdcError::config(format!(
                "table '{}' cannot be used as a checkpoint file name",
                key
            )));
        }
        Ok(self.base_dir.join(format!("{}.checkpoint.json", key)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &CaptureCheckpoint) -> Result<()> {
        let file_path = self.file_path(&checkpoint.table)?;
        let temp_path = file_path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(checkpoint)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(&json).await?;
        if self.fsync {
            file.sync_all().await?;
        }
        drop(file);

        fs::rename(&temp_path, &file_path).await?;

        debug!(
            table = %checkpoint.table,
            phase = ?checkpoint.phase,
            done = checkpoint.done_chunk_ids().len(),
            "Saved capture checkpoint"
        );
        Ok(())
    }

    async fn load(&self, table: &TableId) -> Result<Option<CaptureCheckpoint>> {
        let file_path = self.file_path(table)?;
        match fs::read(&file_path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, table: &TableId) -> Result<()> {
        let file_path = self.file_path(table)?;
        match fs::remove_file(&file_path).await {
            Ok(()) => {
                info!(table = %table, "Deleted capture checkpoint");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::KeyValue;
    use tempfile::tempdir;

    fn plan() -> ChunkPlan {
        ChunkPlan::from_boundaries(
            TableId::new("inventory", "products"),
            vec![KeyValue::Int(100), KeyValue::Int(200)],
        )
    }

    #[test]
    fn test_new_checkpoint_all_pending() {
        let cp = CaptureCheckpoint::new(plan());
        assert_eq!(cp.chunks.len(), 3);
        assert!(cp.done_chunk_ids().is_empty());
        assert_eq!(cp.pending_chunks().len(), 3);
        assert_eq!(cp.phase, CapturePhase::SnapshotInProgress);
    }

    #[test]
    fn test_mark_done_tracks_watermarks() {
        let mut cp = CaptureCheckpoint::new(plan());
        cp.set_state(0, ChunkState::Snapshotting);
        cp.mark_done(0, LogPosition::new(12)).unwrap();
        cp.mark_done(2, LogPosition::new(9)).unwrap();

        assert!(cp.is_done(0));
        assert_eq!(cp.done_chunk_ids(), BTreeSet::from([0, 2]));
        assert_eq!(cp.min_high_watermark(), Some(LogPosition::new(9)));
        assert_eq!(cp.max_high_watermark(), Some(LogPosition::new(12)));
        assert_eq!(cp.last_emitted_position, Some(LogPosition::new(12)));
        assert_eq!(cp.pending_chunks().iter().map(|c| c.id).collect::<Vec<_>>(), vec![1]);

        assert!(cp.mark_done(0, LogPosition::new(13)).is_err());
        assert!(cp.mark_done(7, LogPosition::new(13)).is_err());
    }

    #[test]
    fn test_reset_unfinished_keeps_done() {
        let mut cp = CaptureCheckpoint::new(plan());
        cp.mark_done(0, LogPosition::new(3)).unwrap();
        cp.set_state(1, ChunkState::Merging);
        cp.reset_unfinished();

        assert_eq!(cp.chunks[&0].state, ChunkState::Done);
        assert_eq!(cp.chunks[&1].state, ChunkState::Pending);
        // DONE is never moved back
        cp.set_state(0, ChunkState::Pending);
        assert!(cp.is_done(0));
    }

    #[tokio::test]
    async fn test_memory_checkpoint_store() {
        let store = MemoryCheckpointStore::new();
        let cp = CaptureCheckpoint::new(plan());

        store.save(&cp).await.unwrap();
        assert_eq!(store.load(&cp.table).await.unwrap(), Some(cp.clone()));

        store.delete(&cp.table).await.unwrap();
        assert_eq!(store.load(&cp.table).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_checkpoint_store_survives_restart() {
        let dir = tempdir().unwrap();
        let mut cp = CaptureCheckpoint::new(plan());
        cp.mark_done(1, LogPosition::new(42)).unwrap();

        {
            let store = FileCheckpointStore::new(dir.path()).await.unwrap();
            store.save(&cp).await.unwrap();
        }

        let store = FileCheckpointStore::new(dir.path()).await.unwrap();
        let loaded = store.load(&cp.table).await.unwrap().unwrap();
        assert_eq!(loaded, cp);
        assert_eq!(loaded.high_watermark(1), Some(LogPosition::new(42)));

        store.delete(&cp.table).await.unwrap();
        assert!(store.load(&cp.table).await.unwrap().is_none());
        // Deleting twice is fine
        store.delete(&cp.table).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_tables() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::with_options(dir.path(), false)
            .await
            .unwrap();
        let cp = CaptureCheckpoint::new(ChunkPlan::single(TableId::new("..", "x/y")));
        assert!(store.save(&cp).await.is_err());
    }
}
