//! Collaborator traits
//!
//! The capture core talks to two external systems:
//!
//! - [`LogClient`] / [`LogHandle`] - the raw transaction log (binlog, WAL, ...)
//! - [`QueryExecutor`] - consistent chunk reads and table statistics
//!
//! Implementations must be `Send + Sync`; chunk workers call the executor
//! concurrently.

use crate::common::{
    Chunk, KeyValue, LogPosition, RawChangeRecord, RawRow, Result, TableDescription, TableId,
};
use async_trait::async_trait;

/// Source of the raw change log.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Open a record stream delivering every record with a position greater
    /// than `from`, in position order, without gaps.
    async fn open(&self, from: LogPosition) -> Result<Box<dyn LogHandle>>;

    /// Position of the newest record in the log.
    async fn current_position(&self) -> Result<LogPosition>;
}

/// An open log stream.
#[async_trait]
pub trait LogHandle: Send {
    /// Next record, waiting until one is available.
    ///
    /// `Ok(None)` means the log has ended and no more records will arrive.
    async fn next(&mut self) -> Result<Option<RawChangeRecord>>;
}

/// Relational query side of the source database.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Columns, declared charsets and primary key of a table.
    async fn describe_table(&self, table: &TableId) -> Result<TableDescription>;

    /// Approximate row count.
    async fn estimate_row_count(&self, table: &TableId) -> Result<u64>;

    /// Inclusive `(min, max)` of a column; `None` for an empty table.
    async fn key_range(&self, table: &TableId, column: usize) -> Result<Option<(KeyValue, KeyValue)>>;

    /// Column values at the given quantiles (each in `0.0..1.0`).
    async fn sample_keys(
        &self,
        table: &TableId,
        column: usize,
        quantiles: &[f64],
    ) -> Result<Vec<KeyValue>>;

    /// Read every row of `chunk.table` whose chunk key is in the chunk range,
    /// as of one consistent instant.
    async fn run_consistent_query(&self, chunk: &Chunk) -> Result<Vec<RawRow>>;
}
