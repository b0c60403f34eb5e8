//! # Snapshot Reader
//!
//! Reads one chunk bracketed by two log positions:
//!
//! ```text
//!  log ──────●────────────[ consistent query ]────────────●──────────►
//!           W_lo                                         W_hi
//!            └──────────── InFlight(c) = (W_lo, W_hi] ────┘
//! ```
//!
//! 1. `W_lo` = current log position
//! 2. consistent query over `[lower, upper)`
//! 3. `W_hi` = current log position, `W_hi >= W_lo`
//! 4. wait for the log reader to reach `W_hi`
//! 5. collect the table's buffered records in `(W_lo, W_hi]` touching the chunk
//!
//! A failed attempt discards everything and starts over at step 1 with fresh
//! watermarks. Retriable failures beyond the retry budget escalate to
//! [`CdcError::Fatal`].

use crate::common::{
    CaptureStats, CdcError, Chunk, LogBuffer, LogClient, LogPosition, QueryExecutor,
    RawChangeRecord, RawRow, Result, RetryConfig, RowKey, TableMetadata, Watermark,
    WatermarkPair,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Rows of one chunk, keyed by row identity.
///
/// Tables without a primary key use the whole row as identity, so equal rows
/// are kept as a multiset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRowSet {
    keyed: bool,
    rows: BTreeMap<RowKey, Vec<RawRow>>,
}

impl SnapshotRowSet {
    pub fn new(keyed: bool) -> Self {
        Self {
            keyed,
            rows: BTreeMap::new(),
        }
    }

    /// Build from query rows.
    pub fn from_rows(metadata: &TableMetadata, rows: Vec<RawRow>) -> Self {
        let mut set = Self::new(metadata.has_primary_key());
        for row in rows {
            set.upsert(metadata.row_key(&row), row);
        }
        set
    }

    /// Add a row; replaces the row with the same key on keyed tables.
    pub fn upsert(&mut self, key: RowKey, row: RawRow) {
        let slot = self.rows.entry(key).or_default();
        if self.keyed {
            slot.clear();
        }
        slot.push(row);
    }

    /// Remove a row; on keyless tables one copy equal to `row`.
    pub fn remove(&mut self, key: &RowKey, row: &RawRow) -> bool {
        let Some(slot) = self.rows.get_mut(key) else {
            return false;
        };
        let removed = if self.keyed {
            slot.clear();
            true
        } else if let Some(idx) = slot.iter().position(|r| r == row) {
            slot.remove(idx);
            true
        } else {
            false
        };
        if slot.is_empty() {
            self.rows.remove(key);
        }
        removed
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.rows.contains_key(key)
    }

    /// Rows in key order.
    pub fn rows(&self) -> impl Iterator<Item = &RawRow> {
        self.rows.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Everything captured for one chunk: input to the merger.
#[derive(Debug, Clone)]
pub struct ChunkCapture {
    pub chunk: Chunk,
    pub watermarks: WatermarkPair,
    pub rows: SnapshotRowSet,
    /// Records in `(W_lo, W_hi]` touching the chunk, in position order
    pub in_flight: Vec<RawChangeRecord>,
    /// Attempts taken, including the successful one
    pub attempts: u32,
}

/// Runs the watermark-bracketed read for chunks.
pub struct SnapshotReader {
    metadata: Arc<TableMetadata>,
    executor: Arc<dyn QueryExecutor>,
    log: Arc<dyn LogClient>,
    buffer: Arc<LogBuffer>,
    retry: RetryConfig,
    watermark_timeout: Duration,
    stats: Arc<CaptureStats>,
    /// Low watermark of every chunk read not yet released, by chunk id
    low_marks: Mutex<HashMap<u32, LogPosition>>,
}

impl SnapshotReader {
    pub fn new(
        metadata: Arc<TableMetadata>,
        executor: Arc<dyn QueryExecutor>,
        log: Arc<dyn LogClient>,
        buffer: Arc<LogBuffer>,
        retry: RetryConfig,
        watermark_timeout: Duration,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            metadata,
            executor,
            log,
            buffer,
            retry,
            watermark_timeout,
            stats,
            low_marks: Mutex::new(HashMap::new()),
        }
    }

    pub fn metadata(&self) -> &Arc<TableMetadata> {
        &self.metadata
    }

    /// Capture one chunk, retrying with fresh watermarks.
    ///
    /// Rows of a table without a primary key cannot be matched to the
    /// in-window records that produced them, so such a chunk is re-read
    /// until its window is quiet. Once the retry budget is spent the last
    /// read is accepted and equal rows written inside the window may repeat.
    pub async fn capture(&self, chunk: &Chunk) -> Result<ChunkCapture> {
        let mut retries = 0u32;
        loop {
            match self.capture_once(chunk).await {
                Ok(capture) if self.is_unsettled(&capture) && self.retry.should_retry(retries) => {
                    let delay = self.retry.delay_for_attempt(retries);
                    retries += 1;
                    self.stats.record_chunk_retry();
                    debug!(
                        chunk = %chunk,
                        retry = retries,
                        in_flight = capture.in_flight.len(),
                        "Writes inside a keyless chunk window, re-reading"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(mut capture) => {
                    if self.is_unsettled(&capture) {
                        warn!(
                            chunk = %chunk,
                            attempts = retries + 1,
                            in_flight = capture.in_flight.len(),
                            "Keyless chunk window never quiet, equal rows may repeat"
                        );
                    }
                    capture.attempts = retries + 1;
                    return Ok(capture);
                }
                Err(e) if self.retry.should_retry_error(&e, retries) => {
                    let delay = self.retry.delay_for_attempt(retries);
                    retries += 1;
                    self.stats.record_chunk_retry();
                    warn!(
                        chunk = %chunk,
                        retry = retries,
                        max_retries = self.retry.max_retries(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Chunk read failed, retrying with fresh watermarks"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retriable() => {
                    return Err(CdcError::fatal(chunk.id, retries + 1, e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Smallest low watermark among reads not yet released.
    ///
    /// Buffered records above it may still be needed by a chunk.
    pub async fn min_low_watermark(&self) -> Option<LogPosition> {
        self.low_marks.lock().await.values().min().copied()
    }

    /// Forget a chunk's low watermark once its events are emitted.
    pub async fn release(&self, chunk_id: u32) {
        self.low_marks.lock().await.remove(&chunk_id);
    }

    async fn capture_once(&self, chunk: &Chunk) -> Result<ChunkCapture> {
        // Pin the buffer before reading W_lo; the buffer never runs ahead of the log
        self.low_marks
            .lock()
            .await
            .insert(chunk.id, self.buffer.position());
        let low = Watermark::new(self.log.current_position().await?);
        self.low_marks.lock().await.insert(chunk.id, low.position);

        let rows = self.executor.run_consistent_query(chunk).await?;

        let high = Watermark::new(self.log.current_position().await?);
        let watermarks = WatermarkPair::new(low, high)?;
        debug!(
            chunk = %chunk,
            low = %low.position,
            high = %high.position,
            rows = rows.len(),
            "Chunk read bracketed"
        );

        self.buffer
            .wait_for(high.position, self.watermark_timeout)
            .await?;
        let in_flight: Vec<RawChangeRecord> = self
            .buffer
            .records_in(low.position, high.position)
            .await?
            .into_iter()
            .filter(|record| self.touches(chunk, record))
            .collect();

        Ok(ChunkCapture {
            chunk: chunk.clone(),
            watermarks,
            rows: SnapshotRowSet::from_rows(&self.metadata, rows),
            in_flight,
            attempts: 1,
        })
    }

    fn is_unsettled(&self, capture: &ChunkCapture) -> bool {
        !self.metadata.has_primary_key() && !capture.in_flight.is_empty()
    }

    /// Whether either image of `record` has its chunk key inside `chunk`.
    fn touches(&self, chunk: &Chunk, record: &RawChangeRecord) -> bool {
        if record.table != chunk.table {
            return false;
        }
        [record.before.as_ref(), record.after.as_ref()]
            .into_iter()
            .flatten()
            .any(|row| chunk.owns(self.metadata.chunk_key(row).as_ref()))
    }
}
