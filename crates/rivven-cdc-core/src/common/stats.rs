//! Capture statistics
//!
//! Counters are kept as atomics for [`CaptureHandle::stats`] and published
//! through the `metrics` facade with a `table` label. Installing a recorder
//! (Prometheus or otherwise) is up to the host.
//!
//! | Metric | Type |
//! |--------|------|
//! | `rivven_cdc_snapshot_chunks_total` | gauge |
//! | `rivven_cdc_snapshot_chunks_completed_total` | counter |
//! | `rivven_cdc_snapshot_rows_total` | counter |
//! | `rivven_cdc_snapshot_in_flight_records_total` | counter |
//! | `rivven_cdc_chunk_retries_total` | counter |
//! | `rivven_cdc_log_records_total` | counter |
//! | `rivven_cdc_log_reconnects_total` | counter |
//! | `rivven_cdc_streaming_events_total` | counter |
//! | `rivven_cdc_records_filtered_total` | counter |
//! | `rivven_cdc_checkpoint_failures_total` | counter |
//!
//! [`CaptureHandle::stats`]: crate::common::CaptureHandle::stats

use crate::common::TableId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the scheduler, chunk workers and the log reader.
#[derive(Debug)]
pub struct CaptureStats {
    table: String,
    chunks_total: AtomicU64,
    chunks_completed: AtomicU64,
    chunk_retries: AtomicU64,
    snapshot_rows: AtomicU64,
    snapshot_events: AtomicU64,
    in_flight_records: AtomicU64,
    log_records: AtomicU64,
    log_reconnects: AtomicU64,
    streaming_events: AtomicU64,
    records_filtered: AtomicU64,
    checkpoint_failures: AtomicU64,
}

impl CaptureStats {
    pub fn new(table: &TableId) -> Self {
        Self {
            table: table.to_string(),
            chunks_total: AtomicU64::new(0),
            chunks_completed: AtomicU64::new(0),
            chunk_retries: AtomicU64::new(0),
            snapshot_rows: AtomicU64::new(0),
            snapshot_events: AtomicU64::new(0),
            in_flight_records: AtomicU64::new(0),
            log_records: AtomicU64::new(0),
            log_reconnects: AtomicU64::new(0),
            streaming_events: AtomicU64::new(0),
            records_filtered: AtomicU64::new(0),
            checkpoint_failures: AtomicU64::new(0),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn set_chunks_total(&self, count: u64) {
        self.chunks_total.store(count, Ordering::Relaxed);
        metrics::gauge!("rivven_cdc_snapshot_chunks_total", "table" => self.table.clone())
            .set(count as f64);
    }

    /// A chunk was emitted and marked DONE.
    pub fn record_chunk_completed(&self, rows: u64, events: u64, in_flight: u64) {
        self.chunks_completed.fetch_add(1, Ordering::Relaxed);
        self.snapshot_rows.fetch_add(rows, Ordering::Relaxed);
        self.snapshot_events.fetch_add(events, Ordering::Relaxed);
        self.in_flight_records.fetch_add(in_flight, Ordering::Relaxed);

        metrics::counter!(
            "rivven_cdc_snapshot_chunks_completed_total",
            "table" => self.table.clone()
        )
        .increment(1);
        metrics::counter!("rivven_cdc_snapshot_rows_total", "table" => self.table.clone())
            .increment(rows);
        metrics::counter!(
            "rivven_cdc_snapshot_in_flight_records_total",
            "table" => self.table.clone()
        )
        .increment(in_flight);
    }

    /// Chunks already DONE in a resumed checkpoint.
    pub fn record_chunks_restored(&self, count: u64) {
        self.chunks_completed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_chunk_retry(&self) {
        self.chunk_retries.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rivven_cdc_chunk_retries_total", "table" => self.table.clone())
            .increment(1);
    }

    #[inline]
    pub fn record_log_record(&self) {
        self.log_records.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rivven_cdc_log_records_total", "table" => self.table.clone())
            .increment(1);
    }

    pub fn record_log_reconnect(&self) {
        self.log_reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rivven_cdc_log_reconnects_total", "table" => self.table.clone())
            .increment(1);
    }

    pub fn record_streaming_events(&self, count: u64) {
        self.streaming_events.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("rivven_cdc_streaming_events_total", "table" => self.table.clone())
            .increment(count);
    }

    /// A record image suppressed because its chunk snapshot already covers it.
    #[inline]
    pub fn record_filtered(&self) {
        self.records_filtered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rivven_cdc_records_filtered_total", "table" => self.table.clone())
            .increment(1);
    }

    /// A checkpoint could not be persisted. Capture continues.
    pub fn record_checkpoint_failure(&self) {
        self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_checkpoint_failures_total",
            "table" => self.table.clone()
        )
        .increment(1);
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            chunks_total: self.chunks_total.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            chunk_retries: self.chunk_retries.load(Ordering::Relaxed),
            snapshot_rows: self.snapshot_rows.load(Ordering::Relaxed),
            snapshot_events: self.snapshot_events.load(Ordering::Relaxed),
            in_flight_records: self.in_flight_records.load(Ordering::Relaxed),
            log_records: self.log_records.load(Ordering::Relaxed),
            log_reconnects: self.log_reconnects.load(Ordering::Relaxed),
            streaming_events: self.streaming_events.load(Ordering::Relaxed),
            records_filtered: self.records_filtered.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStatsSnapshot {
    pub chunks_total: u64,
    pub chunks_completed: u64,
    pub chunk_retries: u64,
    /// Rows returned by chunk queries
    pub snapshot_rows: u64,
    /// INSERT events emitted for merged chunks
    pub snapshot_events: u64,
    /// Log records replayed over chunk snapshots
    pub in_flight_records: u64,
    /// Records appended to the log buffer for this table
    pub log_records: u64,
    pub log_reconnects: u64,
    pub streaming_events: u64,
    pub records_filtered: u64,
    /// Checkpoint saves that failed
    pub checkpoint_failures: u64,
}

impl CaptureStatsSnapshot {
    /// Fraction of chunks done, 0.0 - 1.0.
    pub fn snapshot_progress(&self) -> f64 {
        if self.chunks_total == 0 {
            0.0
        } else {
            self.chunks_completed as f64 / self.chunks_total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = CaptureStats::new(&TableId::new("shop", "users"));
        stats.set_chunks_total(4);
        stats.record_chunk_completed(10, 9, 2);
        stats.record_chunk_completed(5, 5, 0);
        stats.record_chunk_retry();
        stats.record_streaming_events(3);
        stats.record_filtered();

        let snap = stats.snapshot();
        assert_eq!(snap.chunks_completed, 2);
        assert_eq!(snap.snapshot_rows, 15);
        assert_eq!(snap.snapshot_events, 14);
        assert_eq!(snap.in_flight_records, 2);
        assert_eq!(snap.chunk_retries, 1);
        assert_eq!(snap.streaming_events, 3);
        assert_eq!(snap.records_filtered, 1);
        assert!((snap.snapshot_progress() - 0.5).abs() < f64::EPSILON);
        assert_eq!(snap.checkpoint_failures, 0);
    }

    #[test]
    fn test_checkpoint_failures_counted() {
        let stats = CaptureStats::new(&TableId::new("shop", "users"));
        assert_eq!(stats.table(), "shop.users");
        stats.record_checkpoint_failure();
        stats.record_checkpoint_failure();
        assert_eq!(stats.snapshot().checkpoint_failures, 2);
    }
}
