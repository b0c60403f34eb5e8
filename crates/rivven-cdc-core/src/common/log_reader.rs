//! # Log Stream Reader
//!
//! One reader task tails the change log for the whole capture and appends
//! records for the captured table to a shared [`LogBuffer`]. Chunk workers
//! and the streaming path only read from the buffer.
//!
//! ```text
//!   LogClient ──► LogStreamReader ──append──► LogBuffer ◄──records_in(lo, hi]── chunk workers
//!                  (single writer)               │
//!                                                └──records_after(p)── streaming pass-through
//! ```
//!
//! The buffer position is the last log position the reader has observed,
//! including records of other tables, which are skipped. A chunk cannot
//! close until the buffer position has reached its high watermark; see
//! [`LogBuffer::wait_for`].

use crate::common::{
    CaptureConfig, CaptureStats, CdcError, ExponentialBackoff, LogClient, LogHandle, LogPosition,
    RawChangeRecord, Result, TableId,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reader progress as seen by waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderProgress {
    /// Last observed log position
    pub position: LogPosition,
    /// The reader has ended; the position will not advance again
    pub closed: bool,
}

struct BufferInner {
    records: VecDeque<RawChangeRecord>,
    /// Everything at or below this position has been dropped
    trimmed_through: LogPosition,
}

/// Position-indexed buffer of one table's log records.
///
/// Single writer, many readers.
pub struct LogBuffer {
    table: TableId,
    inner: RwLock<BufferInner>,
    progress: watch::Sender<ReaderProgress>,
}

impl LogBuffer {
    /// Empty buffer whose reader has observed everything through `start`.
    pub fn new(table: TableId, start: LogPosition) -> Self {
        let (progress, _) = watch::channel(ReaderProgress {
            position: start,
            closed: false,
        });
        Self {
            table,
            inner: RwLock::new(BufferInner {
                records: VecDeque::new(),
                trimmed_through: start,
            }),
            progress,
        }
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Append a record read from the log.
    ///
    /// Records of other tables only advance the position. Returns whether the
    /// record was kept.
    pub async fn append(&self, record: RawChangeRecord) -> Result<bool> {
        let current = self.position();
        if record.position <= current {
            return Err(CdcError::consistency(format!(
                "log record at position {} does not advance past {}",
                record.position, current
            )));
        }

        let position = record.position;
        let keep = record.table == self.table;
        if keep {
            record.validate()?;
            self.inner.write().await.records.push_back(record);
        }
        self.progress.send_modify(|p| p.position = position);
        Ok(keep)
    }

    /// Advance the observed position without a record.
    pub fn advance(&self, position: LogPosition) {
        self.progress.send_if_modified(|p| {
            if position > p.position {
                p.position = position;
                true
            } else {
                false
            }
        });
    }

    /// Last observed log position.
    pub fn position(&self) -> LogPosition {
        self.progress.borrow().position
    }

    pub fn progress(&self) -> ReaderProgress {
        *self.progress.borrow()
    }

    /// Watch reader progress.
    pub fn subscribe(&self) -> watch::Receiver<ReaderProgress> {
        self.progress.subscribe()
    }

    /// Mark the reader as ended and wake every waiter.
    pub fn close(&self) {
        self.progress.send_modify(|p| p.closed = true);
    }

    /// Records with position in `(low, high]`.
    ///
    /// Fails if part of the window was trimmed or not yet read.
    pub async fn records_in(&self, low: LogPosition, high: LogPosition) -> Result<Vec<RawChangeRecord>> {
        if high > self.position() {
            return Err(CdcError::consistency(format!(
                "log reader at {} has not reached {}",
                self.position(),
                high
            )));
        }
        let inner = self.inner.read().await;
        if low < inner.trimmed_through {
            return Err(CdcError::consistency(format!(
                "window ({}, {}] starts before trimmed position {}",
                low, high, inner.trimmed_through
            )));
        }
        Ok(inner
            .records
            .iter()
            .filter(|r| r.position > low && r.position <= high)
            .cloned()
            .collect())
    }

    /// Every buffered record after `position`.
    pub async fn records_after(&self, position: LogPosition) -> Result<Vec<RawChangeRecord>> {
        let inner = self.inner.read().await;
        if position < inner.trimmed_through {
            return Err(CdcError::consistency(format!(
                "position {} is before trimmed position {}",
                position, inner.trimmed_through
            )));
        }
        let start = inner.records.partition_point(|r| r.position <= position);
        Ok(inner.records.range(start..).cloned().collect())
    }

    /// Wait until the reader has observed `position`.
    ///
    /// A reader that ends first yields `ConnectionClosed`; running out of
    /// time is a consistency violation for the waiting chunk.
    pub async fn wait_for(&self, position: LogPosition, timeout: Duration) -> Result<LogPosition> {
        let mut rx = self.progress.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|p| p.position >= position || p.closed),
        )
        .await;

        match waited {
            Ok(Ok(progress)) if progress.position >= position => Ok(progress.position),
            Ok(Ok(_)) | Ok(Err(_)) => Err(CdcError::ConnectionClosed),
            Err(_) => Err(CdcError::consistency(format!(
                "log reader did not reach position {} within {:?} (at {})",
                position,
                timeout,
                self.position()
            ))),
        }
    }

    /// Drop records at or below `position`.
    pub async fn trim_through(&self, position: LogPosition) -> usize {
        let mut inner = self.inner.write().await;
        if position <= inner.trimmed_through {
            return 0;
        }
        let cut = inner.records.partition_point(|r| r.position <= position);
        inner.records.drain(..cut);
        inner.trimmed_through = position;
        cut
    }

    /// Number of buffered records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }
}

/// Background task tailing the log into a [`LogBuffer`].
pub struct LogStreamReader {
    buffer: Arc<LogBuffer>,
    shutdown: Arc<Notify>,
    handle: JoinHandle<Result<()>>,
}

impl LogStreamReader {
    /// Open the log after `from` and start appending to `buffer`.
    pub fn spawn(
        client: Arc<dyn LogClient>,
        from: LogPosition,
        buffer: Arc<LogBuffer>,
        config: &CaptureConfig,
        stats: Arc<CaptureStats>,
    ) -> Self {
        let shutdown = Arc::new(Notify::new());
        let task = ReaderTask {
            client,
            buffer: buffer.clone(),
            stats,
            shutdown: shutdown.clone(),
            reconnect_attempts: config.log_reconnect_attempts,
            backoff: ExponentialBackoff::new(
                config.retry.retry_delay(),
                config.retry.max_delay(),
            ),
        };

        info!(table = %buffer.table(), from = %from, "Log stream reader starting");
        let handle = tokio::spawn(task.run(from));

        Self {
            buffer,
            shutdown,
            handle,
        }
    }

    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the reader; returns the last observed position to resume from.
    pub async fn stop(self) -> Result<LogPosition> {
        self.shutdown.notify_one();
        self.join().await
    }

    /// Wait for the reader to end on its own.
    pub async fn join(self) -> Result<LogPosition> {
        match self.handle.await {
            Ok(result) => result.map(|_| self.buffer.position()),
            Err(e) => Err(CdcError::invalid_state(format!(
                "log reader task failed: {}",
                e
            ))),
        }
    }
}

struct ReaderTask {
    client: Arc<dyn LogClient>,
    buffer: Arc<LogBuffer>,
    stats: Arc<CaptureStats>,
    shutdown: Arc<Notify>,
    reconnect_attempts: u32,
    backoff: ExponentialBackoff,
}

impl ReaderTask {
    async fn run(mut self, from: LogPosition) -> Result<()> {
        let result = self.tail(from).await;
        self.buffer.close();
        match &result {
            Ok(()) => info!(
                table = %self.buffer.table(),
                position = %self.buffer.position(),
                "Log stream reader stopped"
            ),
            Err(e) => error!(
                table = %self.buffer.table(),
                position = %self.buffer.position(),
                error = %e,
                "Log stream reader failed"
            ),
        }
        result
    }

    async fn tail(&mut self, from: LogPosition) -> Result<()> {
        let mut handle = match self.reopen(from).await? {
            Some(handle) => handle,
            None => return Ok(()),
        };

        loop {
            let next = tokio::select! {
                _ = self.shutdown.notified() => return Ok(()),
                next = handle.next() => next,
            };

            match next {
                Ok(Some(record)) => {
                    if self.buffer.append(record).await? {
                        self.stats.record_log_record();
                    }
                    self.backoff.reset();
                }
                Ok(None) => {
                    debug!(table = %self.buffer.table(), "Log ended");
                    return Ok(());
                }
                Err(e) if e.is_retriable() => {
                    warn!(
                        table = %self.buffer.table(),
                        position = %self.buffer.position(),
                        error = %e,
                        "Log read failed, reopening"
                    );
                    handle = match self.reopen(self.buffer.position()).await? {
                        Some(handle) => handle,
                        None => return Ok(()),
                    };
                    self.stats.record_log_reconnect();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Open the log, retrying retriable failures. `None` on shutdown.
    async fn reopen(&mut self, from: LogPosition) -> Result<Option<Box<dyn LogHandle>>> {
        loop {
            match self.client.open(from).await {
                Ok(handle) => return Ok(Some(handle)),
                Err(e) if e.is_retriable() && self.backoff.attempt() < self.reconnect_attempts => {
                    let delay = self.backoff.next_backoff();
                    warn!(
                        from = %from,
                        attempt = self.backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Log open failed, backing off"
                    );
                    tokio::select! {
                        _ = self.shutdown.notified() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{RawRow, RawValue};

    fn table() -> TableId {
        TableId::new("db", "t")
    }

    fn insert(pos: u64, table: TableId) -> RawChangeRecord {
        RawChangeRecord::insert(
            LogPosition::new(pos),
            table,
            RawRow::new(vec![RawValue::Int(pos as i64)]),
        )
    }

    #[tokio::test]
    async fn test_append_and_slice() {
        let buffer = LogBuffer::new(table(), LogPosition::ORIGIN);
        for pos in 1..=5 {
            assert!(buffer.append(insert(pos, table())).await.unwrap());
        }
        assert_eq!(buffer.position(), LogPosition::new(5));

        let window = buffer
            .records_in(LogPosition::new(1), LogPosition::new(3))
            .await
            .unwrap();
        let positions: Vec<u64> = window.iter().map(|r| r.position.offset()).collect();
        assert_eq!(positions, vec![2, 3]);

        let tail = buffer.records_after(LogPosition::new(3)).await.unwrap();
        assert_eq!(tail.len(), 2);
    }

    #[tokio::test]
    async fn test_other_tables_only_advance() {
        let buffer = LogBuffer::new(table(), LogPosition::ORIGIN);
        assert!(!buffer
            .append(insert(1, TableId::new("db", "other")))
            .await
            .unwrap());
        assert_eq!(buffer.position(), LogPosition::new(1));
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_rejects_non_advancing_record() {
        let buffer = LogBuffer::new(table(), LogPosition::new(4));
        let err = buffer.append(insert(4, table())).await.unwrap_err();
        assert!(matches!(err, CdcError::ConsistencyViolation(_)));
    }

    #[tokio::test]
    async fn test_records_in_requires_reached_window() {
        let buffer = LogBuffer::new(table(), LogPosition::ORIGIN);
        buffer.append(insert(1, table())).await.unwrap();
        assert!(buffer
            .records_in(LogPosition::ORIGIN, LogPosition::new(2))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_trim_through() {
        let buffer = LogBuffer::new(table(), LogPosition::ORIGIN);
        for pos in 1..=4 {
            buffer.append(insert(pos, table())).await.unwrap();
        }
        assert_eq!(buffer.trim_through(LogPosition::new(2)).await, 2);
        assert_eq!(buffer.len().await, 2);
        assert_eq!(buffer.trim_through(LogPosition::new(1)).await, 0);

        let err = buffer
            .records_in(LogPosition::new(1), LogPosition::new(4))
            .await
            .unwrap_err();
        assert!(matches!(err, CdcError::ConsistencyViolation(_)));
        assert_eq!(
            buffer
                .records_in(LogPosition::new(2), LogPosition::new(4))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_append() {
        let buffer = Arc::new(LogBuffer::new(table(), LogPosition::ORIGIN));
        let writer = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append(insert(1, table())).await.unwrap();
            writer.advance(LogPosition::new(3));
        });

        let reached = buffer
            .wait_for(LogPosition::new(3), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reached, LogPosition::new(3));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let buffer = LogBuffer::new(table(), LogPosition::ORIGIN);
        let err = buffer
            .wait_for(LogPosition::new(1), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, CdcError::ConsistencyViolation(_)));
    }

    #[tokio::test]
    async fn test_wait_for_closed_reader() {
        let buffer = LogBuffer::new(table(), LogPosition::ORIGIN);
        buffer.close();
        let err = buffer
            .wait_for(LogPosition::new(1), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CdcError::ConnectionClosed));
    }
}
