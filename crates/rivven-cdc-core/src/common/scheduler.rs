//! # Snapshot Scheduler
//!
//! Drives one table capture from the first chunk to live streaming.
//!
//! ```text
//!                ┌──────────── worker pool (parallelism) ────────────┐
//!  ChunkPlan ──► │ chunk 0: W_lo → query → W_hi → merge              │
//!                │ chunk 1: W_lo → query → W_hi → merge              │ ──► reorder ──► events
//!                │ chunk 2: ...                                      │    (chunk id)
//!                └───────────────────────────────────────────────────┘
//!                                         ▲
//!  LogClient ──► LogStreamReader ──► LogBuffer ──► streaming pass-through ──► events
//! ```
//!
//! ## Phases
//!
//! `SnapshotInProgress → Streaming`, then `Stopped` or `Failed`. The switch to
//! streaming happens once, when every chunk is DONE, and is marked in-band by
//! [`CaptureEvent::SnapshotComplete`].
//!
//! ## Ordering
//!
//! - chunks are computed in parallel but emitted in chunk id order, each as
//!   a contiguous block
//! - a worker slot is taken in chunk id order and held until the chunk is
//!   emitted, so at most `parallelism` chunks are read ahead of the emit
//!   cursor
//! - streaming starts at the smallest chunk high watermark and emits records
//!   in log position order
//! - a record image is emitted only if its position is above the high
//!   watermark of the chunk owning its key; that chunk's snapshot already
//!   reflects everything up to there
//!
//! ## Updates in streaming
//!
//! | Record | Events |
//! |--------|--------|
//! | UPDATE, key unchanged | `-U[before]`, `+U[after]` |
//! | UPDATE, key changed | `-D[before]`, `+I[after]` |
//! | INSERT | `+I[after]` |
//! | DELETE | `-D[before]` |

use crate::common::{
    CaptureCheckpoint, CaptureConfig, CaptureEvent, CaptureStats, CaptureStatsSnapshot, CdcError,
    ChangeEvent, ChangeOp, Chunk, ChunkPlan, ChunkSplitter, ChunkState, CheckpointStore,
    LogBuffer, LogClient, LogPosition, LogStreamReader, QueryExecutor, RawChangeRecord, RawOp,
    RawRow, Result, SnapshotReader, TableId, TableMetadata, WatermarkMerger,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Phase of a table capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePhase {
    SnapshotInProgress,
    Streaming,
    Stopped,
    Failed,
}

impl CapturePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CapturePhase::Stopped | CapturePhase::Failed)
    }
}

/// Starts and resumes table captures.
pub struct SnapshotScheduler {
    config: CaptureConfig,
    executor: Arc<dyn QueryExecutor>,
    log: Arc<dyn LogClient>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl SnapshotScheduler {
    pub fn new(
        config: CaptureConfig,
        executor: Arc<dyn QueryExecutor>,
        log: Arc<dyn LogClient>,
    ) -> Self {
        Self {
            config,
            executor,
            log,
            checkpoint_store: None,
        }
    }

    /// Persist the checkpoint after every chunk and streaming batch.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Start capturing a table from scratch.
    ///
    /// Configuration errors (unsupported charset, missing key when one is
    /// required) are returned here, before any chunk is read.
    pub async fn start(&self, table: &TableId) -> Result<CaptureHandle> {
        self.config.validate()?;
        let metadata = self.load_metadata(table).await?;

        let from = self.log.current_position().await?;
        let plan = ChunkSplitter::new(&self.config)
            .plan(&metadata, self.executor.as_ref())
            .await?;
        if plan.is_reduced_parallelism() {
            warn!(table = %table, "Capture runs with reduced parallelism");
        }

        info!(
            table = %table,
            chunks = plan.len(),
            from = %from,
            parallelism = self.config.parallelism,
            "Starting capture"
        );
        self.launch(metadata, CaptureCheckpoint::new(plan), from)
    }

    /// Resume a capture from a checkpoint.
    ///
    /// DONE chunks are not read again. Chunks that were in progress are
    /// re-read with fresh watermarks.
    pub async fn resume(&self, mut checkpoint: CaptureCheckpoint) -> Result<CaptureHandle> {
        self.config.validate()?;
        let metadata = self.load_metadata(&checkpoint.table).await?;

        let from = match checkpoint.snapshot_completed_at {
            Some(start) => {
                checkpoint.phase = CapturePhase::Streaming;
                checkpoint.last_emitted_position.unwrap_or(start).max(start)
            }
            None => {
                checkpoint.phase = CapturePhase::SnapshotInProgress;
                checkpoint.reset_unfinished();
                match checkpoint.min_high_watermark() {
                    Some(position) => position,
                    None => self.log.current_position().await?,
                }
            }
        };

        info!(
            table = %checkpoint.table,
            done = checkpoint.done_chunk_ids().len(),
            chunks = checkpoint.plan.len(),
            from = %from,
            phase = ?checkpoint.phase,
            "Resuming capture"
        );
        self.launch(metadata, checkpoint, from)
    }

    async fn load_metadata(&self, table: &TableId) -> Result<TableMetadata> {
        let description = self.executor.describe_table(table).await?;
        TableMetadata::from_description(description)
    }

    fn launch(
        &self,
        metadata: TableMetadata,
        checkpoint: CaptureCheckpoint,
        from: LogPosition,
    ) -> Result<CaptureHandle> {
        let table = metadata.id.clone();
        let metadata = Arc::new(metadata);

        let stats = Arc::new(CaptureStats::new(&table));
        stats.set_chunks_total(checkpoint.plan.len() as u64);
        stats.record_chunks_restored(checkpoint.done_chunk_ids().len() as u64);

        let buffer = Arc::new(LogBuffer::new(table.clone(), from));
        let reader = LogStreamReader::spawn(
            self.log.clone(),
            from,
            buffer.clone(),
            &self.config,
            stats.clone(),
        );

        let (events_tx, events_rx) = mpsc::channel(self.config.output_buffer);
        let (phase_tx, phase_rx) = watch::channel(checkpoint.phase);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let checkpoint = Arc::new(RwLock::new(checkpoint));

        let driver = CaptureDriver {
            config: self.config.clone(),
            metadata,
            executor: self.executor.clone(),
            log: self.log.clone(),
            store: self.checkpoint_store.clone(),
            buffer,
            reader: Some(reader),
            checkpoint: checkpoint.clone(),
            stats: stats.clone(),
            events: events_tx,
            phase: phase_tx,
            shutdown: shutdown_rx,
            stopping: Arc::new(AtomicBool::new(false)),
        };
        let task = tokio::spawn(driver.run());

        Ok(CaptureHandle {
            table,
            events: events_rx,
            phase: phase_rx,
            checkpoint,
            stats,
            shutdown: shutdown_tx,
            task: Some(task),
            stop_timeout: self.config.stop_timeout,
        })
    }
}

/// Handle to a running capture.
///
/// Dropping the handle stops the capture.
pub struct CaptureHandle {
    table: TableId,
    events: mpsc::Receiver<CaptureEvent>,
    phase: watch::Receiver<CapturePhase>,
    checkpoint: Arc<RwLock<CaptureCheckpoint>>,
    stats: Arc<CaptureStats>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<Result<()>>>,
    stop_timeout: Duration,
}

impl CaptureHandle {
    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Next event; `None` once the capture has ended and all events were read.
    pub async fn next(&mut self) -> Option<CaptureEvent> {
        self.events.recv().await
    }

    /// Next change event, skipping the snapshot-complete marker.
    pub async fn next_change(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.next().await? {
                CaptureEvent::Change(event) => return Some(event),
                CaptureEvent::SnapshotComplete { .. } => continue,
            }
        }
    }

    pub fn phase(&self) -> CapturePhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<CapturePhase> {
        self.phase.clone()
    }

    /// Wait for the switch to streaming; returns the streaming start position.
    ///
    /// Events must be drained concurrently, or the capture stalls on a full
    /// output channel.
    pub async fn wait_snapshot_complete(&self) -> Result<LogPosition> {
        let mut phase = self.phase.clone();
        let reached = phase
            .wait_for(|p| *p != CapturePhase::SnapshotInProgress)
            .await
            .map(|p| *p)
            .unwrap_or(CapturePhase::Stopped);

        match self.checkpoint.read().await.snapshot_completed_at {
            Some(position) => Ok(position),
            None => Err(CdcError::invalid_state(format!(
                "capture of {} ended as {:?} before the snapshot completed",
                self.table, reached
            ))),
        }
    }

    /// Current checkpoint.
    pub async fn checkpoint(&self) -> CaptureCheckpoint {
        self.checkpoint.read().await.clone()
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the capture and return the final checkpoint.
    ///
    /// In-flight chunks finish and are emitted if they are next in order;
    /// after `stop_timeout` the capture is aborted.
    pub async fn stop(&mut self) -> Result<CaptureCheckpoint> {
        let _ = self.shutdown.send(true);
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.stop_timeout, &mut task).await {
                Ok(Ok(result)) => result?,
                Ok(Err(e)) => {
                    return Err(CdcError::invalid_state(format!(
                        "capture task failed: {}",
                        e
                    )))
                }
                Err(_) => {
                    warn!(table = %self.table, timeout = ?self.stop_timeout, "Capture did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        Ok(self.checkpoint().await)
    }

    /// Wait for the capture to end on its own.
    ///
    /// Returns the terminal error of a failed capture, e.g. [`CdcError::Fatal`].
    pub async fn join(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| {
                CdcError::invalid_state(format!("capture task failed: {}", e))
            })?,
            None => Ok(()),
        }
    }
}

/// Output of one chunk worker.
struct ChunkOutput {
    chunk_id: u32,
    high: LogPosition,
    rows: usize,
    in_flight: usize,
    attempts: u32,
    events: Vec<ChangeEvent>,
    /// Worker slot, freed once the chunk is emitted
    _slot: OwnedSemaphorePermit,
}

/// How a phase ended.
enum Flow {
    Continue,
    Stopped,
}

struct CaptureDriver {
    config: CaptureConfig,
    metadata: Arc<TableMetadata>,
    executor: Arc<dyn QueryExecutor>,
    log: Arc<dyn LogClient>,
    store: Option<Arc<dyn CheckpointStore>>,
    buffer: Arc<LogBuffer>,
    reader: Option<LogStreamReader>,
    checkpoint: Arc<RwLock<CaptureCheckpoint>>,
    stats: Arc<CaptureStats>,
    events: mpsc::Sender<CaptureEvent>,
    phase: watch::Sender<CapturePhase>,
    shutdown: watch::Receiver<bool>,
    stopping: Arc<AtomicBool>,
}

impl CaptureDriver {
    async fn run(mut self) -> Result<()> {
        let mut result = self.drive().await;

        if let Some(reader) = self.reader.take() {
            let stopped = reader.stop().await;
            if result.is_ok() {
                result = stopped.map(|_| ());
            }
        }

        let phase = match &result {
            Ok(()) => CapturePhase::Stopped,
            Err(_) => CapturePhase::Failed,
        };
        self.checkpoint.write().await.phase = phase;
        self.persist().await;
        let _ = self.phase.send(phase);

        let table = &self.metadata.id;
        match &result {
            Ok(()) => info!(table = %table, "Capture stopped"),
            Err(e) => error!(
                table = %table,
                error = %e,
                code = e.error_code(),
                "Capture failed"
            ),
        }
        result
    }

    async fn drive(&mut self) -> Result<()> {
        let snapshot_complete = self.checkpoint.read().await.snapshot_completed_at.is_some();
        if !snapshot_complete {
            if let Flow::Stopped = self.run_snapshot().await? {
                return Ok(());
            }
            if !self.switch_to_streaming().await? {
                return Ok(());
            }
        }
        self.run_streaming().await
    }

    // ========================================================================
    // Snapshot phase
    // ========================================================================

    async fn run_snapshot(&mut self) -> Result<Flow> {
        let pending = self.checkpoint.read().await.pending_chunks();
        if pending.is_empty() {
            return Ok(Flow::Continue);
        }

        let reader = Arc::new(SnapshotReader::new(
            self.metadata.clone(),
            self.executor.clone(),
            self.log.clone(),
            self.buffer.clone(),
            self.config.retry.clone(),
            self.config.watermark_timeout,
            self.stats.clone(),
        ));
        let merger = Arc::new(WatermarkMerger::new(self.metadata.clone()));
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));

        let mut workers = JoinSet::new();
        let mut order: VecDeque<u32> = pending.iter().map(|c| c.id).collect();
        let mut unscheduled: VecDeque<Chunk> = pending.into();
        let mut ready: BTreeMap<u32, ChunkOutput> = BTreeMap::new();
        loop {
            let stopping = self.stopping.load(Ordering::SeqCst);
            if workers.is_empty() && (stopping || unscheduled.is_empty()) {
                break;
            }

            let joined = tokio::select! {
                changed = self.shutdown.changed(), if !stopping => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!(table = %self.metadata.id, "Stop requested, finishing chunks in flight");
                        self.stopping.store(true, Ordering::SeqCst);
                    }
                    continue;
                }
                slot = semaphore.clone().acquire_owned(), if !stopping && !unscheduled.is_empty() => {
                    let slot = slot.map_err(|_| CdcError::invalid_state("worker pool closed"))?;
                    if let Some(chunk) = unscheduled.pop_front() {
                        workers.spawn(snapshot_chunk(
                            chunk,
                            slot,
                            reader.clone(),
                            merger.clone(),
                            self.checkpoint.clone(),
                            self.stopping.clone(),
                        ));
                    }
                    continue;
                }
                joined = workers.join_next(), if !workers.is_empty() => joined,
                else => break,
            };
            let Some(joined) = joined else { continue };

            let output = match joined {
                Ok(Ok(Some(output))) => output,
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => {
                    workers.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    workers.abort_all();
                    return Err(CdcError::invalid_state(format!("chunk worker failed: {}", e)));
                }
            };
            ready.insert(output.chunk_id, output);

            while let Some(output) = order.front().and_then(|id| ready.remove(id)) {
                order.pop_front();
                let chunk_id = output.chunk_id;
                if !self.emit_chunk(output).await? {
                    self.stopping.store(true, Ordering::SeqCst);
                    workers.abort_all();
                    return Ok(Flow::Stopped);
                }
                reader.release(chunk_id).await;
                self.trim_snapshot_buffer(&reader).await;
            }
        }

        if self.stopping.load(Ordering::SeqCst) || !order.is_empty() {
            return Ok(Flow::Stopped);
        }
        Ok(Flow::Continue)
    }

    /// Emit a chunk's events and retire it. `false` if the consumer is gone.
    async fn emit_chunk(&self, output: ChunkOutput) -> Result<bool> {
        let count = output.events.len();
        for event in output.events {
            if !self.send(CaptureEvent::Change(event)).await {
                return Ok(false);
            }
        }

        self.checkpoint
            .write()
            .await
            .mark_done(output.chunk_id, output.high)?;
        self.stats.record_chunk_completed(
            output.rows as u64,
            count as u64,
            output.in_flight as u64,
        );
        debug!(
            table = %self.metadata.id,
            chunk = output.chunk_id,
            high = %output.high,
            rows = output.rows,
            in_flight = output.in_flight,
            attempts = output.attempts,
            events = count,
            "Chunk emitted"
        );
        self.persist().await;
        Ok(true)
    }

    /// Drop buffered records no chunk and no future streaming read needs.
    async fn trim_snapshot_buffer(&self, reader: &SnapshotReader) {
        let mut low = self.buffer.position();
        if let Some(done) = self.checkpoint.read().await.min_high_watermark() {
            low = low.min(done);
        }
        if let Some(open) = reader.min_low_watermark().await {
            low = low.min(open);
        }
        let dropped = self.buffer.trim_through(low).await;
        if dropped > 0 {
            debug!(table = %self.metadata.id, through = %low, dropped, "Trimmed log buffer");
        }
    }

    /// The one-way switch to streaming. `false` if the consumer is gone.
    async fn switch_to_streaming(&mut self) -> Result<bool> {
        let start = {
            let mut cp = self.checkpoint.write().await;
            if !cp.all_done() {
                return Err(CdcError::invalid_state(
                    "mode switch requested with chunks outstanding",
                ));
            }
            let start = cp.min_high_watermark().unwrap_or(self.buffer.position());
            cp.snapshot_completed_at = Some(start);
            cp.last_emitted_position = Some(start);
            cp.phase = CapturePhase::Streaming;
            start
        };
        self.persist().await;

        if !self.send(CaptureEvent::SnapshotComplete { position: start }).await {
            return Ok(false);
        }
        let _ = self.phase.send(CapturePhase::Streaming);

        let stats = self.stats.snapshot();
        info!(
            table = %self.metadata.id,
            start = %start,
            chunks = stats.chunks_completed,
            rows = stats.snapshot_events,
            "Snapshot complete, switching to streaming"
        );
        Ok(true)
    }

    // ========================================================================
    // Streaming phase
    // ========================================================================

    async fn run_streaming(&mut self) -> Result<()> {
        let (plan, highs, mut cursor) = {
            let cp = self.checkpoint.read().await;
            let highs: BTreeMap<u32, LogPosition> = cp
                .chunks
                .iter()
                .filter_map(|(id, p)| p.high_watermark.map(|h| (*id, h)))
                .collect();
            let cursor = cp
                .last_emitted_position
                .or(cp.snapshot_completed_at)
                .unwrap_or(self.buffer.position());
            (cp.plan.clone(), highs, cursor)
        };
        let filter = StreamingFilter {
            metadata: self.metadata.clone(),
            plan,
            passthrough_after: highs.values().max().copied().unwrap_or(LogPosition::ORIGIN),
            highs,
        };

        let _ = self.phase.send(CapturePhase::Streaming);
        let mut progress = self.buffer.subscribe();
        loop {
            let observed = tokio::select! {
                _ = self.shutdown.changed() => return Ok(()),
                observed = progress.wait_for(|p| p.position > cursor || p.closed) => match observed {
                    Ok(p) => *p,
                    Err(_) => return Err(CdcError::invalid_state("log buffer dropped")),
                },
            };

            let mut emitted = 0u64;
            for record in self.buffer.records_after(cursor).await? {
                for event in filter.events_for(&record, &self.stats)? {
                    if !self.send(CaptureEvent::Change(event)).await {
                        return Ok(());
                    }
                    emitted += 1;
                }
                cursor = record.position;
            }
            cursor = cursor.max(observed.position);

            self.buffer.trim_through(cursor).await;
            self.checkpoint.write().await.record_emitted(cursor);
            self.stats.record_streaming_events(emitted);
            if emitted > 0 {
                self.persist().await;
            }

            if observed.closed && cursor >= observed.position {
                debug!(table = %self.metadata.id, position = %cursor, "Log reader ended");
                return Ok(());
            }
        }
    }

    async fn send(&self, event: CaptureEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn persist(&self) {
        let Some(store) = &self.store else { return };
        let checkpoint = self.checkpoint.read().await.clone();
        if let Err(e) = store.save(&checkpoint).await {
            self.stats.record_checkpoint_failure();
            warn!(table = %self.metadata.id, error = %e, "Failed to save capture checkpoint");
        }
    }
}

/// One chunk, start to merged events.
async fn snapshot_chunk(
    chunk: Chunk,
    slot: OwnedSemaphorePermit,
    reader: Arc<SnapshotReader>,
    merger: Arc<WatermarkMerger>,
    checkpoint: Arc<RwLock<CaptureCheckpoint>>,
    stopping: Arc<AtomicBool>,
) -> Result<Option<ChunkOutput>> {
    if stopping.load(Ordering::SeqCst) {
        return Ok(None);
    }

    checkpoint
        .write()
        .await
        .set_state(chunk.id, ChunkState::Snapshotting);
    let capture = reader.capture(&chunk).await?;

    checkpoint
        .write()
        .await
        .set_state(chunk.id, ChunkState::Merging);
    let events = merger.merge(&capture)?;

    Ok(Some(ChunkOutput {
        chunk_id: chunk.id,
        high: capture.watermarks.high.position,
        rows: capture.rows.len(),
        in_flight: capture.in_flight.len(),
        attempts: capture.attempts,
        events,
        _slot: slot,
    }))
}

/// Turns streaming records into events, suppressing images a chunk snapshot
/// already covers.
struct StreamingFilter {
    metadata: Arc<TableMetadata>,
    plan: ChunkPlan,
    highs: BTreeMap<u32, LogPosition>,
    /// Above this position every record passes
    passthrough_after: LogPosition,
}

impl StreamingFilter {
    fn passes(&self, position: LogPosition, row: &RawRow) -> bool {
        if position > self.passthrough_after {
            return true;
        }
        let owner = self
            .plan
            .chunk_id_for(self.metadata.chunk_key(row).as_ref());
        let high = self
            .highs
            .get(&owner)
            .copied()
            .unwrap_or(LogPosition::ORIGIN);
        position > high
    }

    fn event(&self, op: ChangeOp, record: &RawChangeRecord, row: &RawRow) -> Result<ChangeEvent> {
        Ok(ChangeEvent::new(
            self.metadata.id.clone(),
            op,
            record.position,
            self.metadata.decode_row(row)?,
        ))
    }

    fn events_for(&self, record: &RawChangeRecord, stats: &CaptureStats) -> Result<Vec<ChangeEvent>> {
        let mut events = Vec::with_capacity(2);
        let mut emit = |op: ChangeOp, row: &RawRow| -> Result<()> {
            if self.passes(record.position, row) {
                events.push(self.event(op, record, row)?);
            } else {
                stats.record_filtered();
            }
            Ok(())
        };

        match (record.op, &record.before, &record.after) {
            (RawOp::Insert, _, Some(after)) => emit(ChangeOp::Insert, after)?,
            (RawOp::Delete, Some(before), _) => emit(ChangeOp::Delete, before)?,
            (RawOp::Update, Some(before), Some(after)) => {
                let key_changed = self.metadata.has_primary_key()
                    && self.metadata.row_key(before) != self.metadata.row_key(after);
                if key_changed {
                    emit(ChangeOp::Delete, before)?;
                    emit(ChangeOp::Insert, after)?;
                } else if self.passes(record.position, after) {
                    events.push(self.event(ChangeOp::UpdateBefore, record, before)?);
                    events.push(self.event(ChangeOp::UpdateAfter, record, after)?);
                } else {
                    stats.record_filtered();
                }
            }
            _ => record.validate()?,
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ColumnDescription, KeyValue, RawValue, TableDescription};

    fn metadata() -> Arc<TableMetadata> {
        Arc::new(
            TableMetadata::from_description(TableDescription {
                id: TableId::new("db", "t"),
                columns: vec![
                    ColumnDescription::integer("id"),
                    ColumnDescription::char("name", "utf8"),
                ],
                primary_key: vec!["id".into()],
            })
            .unwrap(),
        )
    }

    fn row(id: i64, name: &str) -> RawRow {
        RawRow::new(vec![RawValue::Int(id), RawValue::Bytes(name.as_bytes().to_vec())])
    }

    /// Two chunks split at 10 with high watermarks 5 and 8.
    fn filter() -> StreamingFilter {
        StreamingFilter {
            metadata: metadata(),
            plan: ChunkPlan::from_boundaries(TableId::new("db", "t"), vec![KeyValue::Int(10)]),
            highs: BTreeMap::from([(0, LogPosition::new(5)), (1, LogPosition::new(8))]),
            passthrough_after: LogPosition::new(8),
        }
    }

    fn rendered(events: Vec<ChangeEvent>) -> Vec<String> {
        events.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_phase_terminal() {
        assert!(!CapturePhase::SnapshotInProgress.is_terminal());
        assert!(!CapturePhase::Streaming.is_terminal());
        assert!(CapturePhase::Stopped.is_terminal());
        assert!(CapturePhase::Failed.is_terminal());
    }

    #[test]
    fn test_filter_uses_owning_chunk_watermark() {
        let filter = filter();
        let stats = CaptureStats::new(&TableId::new("db", "t"));
        let table = TableId::new("db", "t");

        // Chunk 0 (high 5) has not seen position 6; chunk 1 (high 8) has
        let low_key = RawChangeRecord::insert(LogPosition::new(6), table.clone(), row(1, "a"));
        let high_key = RawChangeRecord::insert(LogPosition::new(6), table.clone(), row(11, "b"));
        assert_eq!(rendered(filter.events_for(&low_key, &stats).unwrap()), vec!["+I[1, a]"]);
        assert!(filter.events_for(&high_key, &stats).unwrap().is_empty());
        assert_eq!(stats.snapshot().records_filtered, 1);

        let late = RawChangeRecord::insert(LogPosition::new(9), table, row(11, "b"));
        assert_eq!(rendered(filter.events_for(&late, &stats).unwrap()), vec!["+I[11, b]"]);
    }

    #[test]
    fn test_update_notation() {
        let filter = filter();
        let stats = CaptureStats::new(&TableId::new("db", "t"));
        let table = TableId::new("db", "t");

        let same_key = RawChangeRecord::update(LogPosition::new(20), table.clone(), row(1, "a"), row(1, "b"));
        assert_eq!(
            rendered(filter.events_for(&same_key, &stats).unwrap()),
            vec!["-U[1, a]", "+U[1, b]"]
        );

        let moved = RawChangeRecord::update(LogPosition::new(21), table, row(1, "a"), row(11, "a"));
        assert_eq!(
            rendered(filter.events_for(&moved, &stats).unwrap()),
            vec!["-D[1, a]", "+I[11, a]"]
        );
    }

    #[test]
    fn test_moved_key_images_filtered_separately() {
        let filter = filter();
        let stats = CaptureStats::new(&TableId::new("db", "t"));
        // Position 7: above chunk 0's fence, below chunk 1's
        let moved = RawChangeRecord::update(
            LogPosition::new(7),
            TableId::new("db", "t"),
            row(1, "a"),
            row(11, "a"),
        );
        assert_eq!(
            rendered(filter.events_for(&moved, &stats).unwrap()),
            vec!["-D[1, a]"]
        );
    }
}
