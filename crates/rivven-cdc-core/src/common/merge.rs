//! # Watermark Merger
//!
//! Replays a chunk's in-flight records over its snapshot rows, in log
//! position order, and emits the resulting state as INSERT events in key
//! order. The result is the chunk's state at its high watermark.
//!
//! | Record | Effect on the row set |
//! |--------|-----------------------|
//! | INSERT | add `after` if the chunk owns its key |
//! | UPDATE | remove `before` if owned, add `after` if owned |
//! | DELETE | remove `before` if owned |
//!
//! Images are checked against the chunk separately, so an update that moves a
//! row to another chunk only removes it here. Adds replace an existing row
//! with the same key, which makes replaying a record the query already
//! observed harmless.
//!
//! Intermediate states are not emitted: a delete then re-insert of one key
//! inside the window yields a single INSERT of the final row.

use crate::common::{
    ChangeEvent, ChangeOp, Chunk, ChunkCapture, RawChangeRecord, RawOp, RawRow, Result,
    SnapshotRowSet, TableMetadata,
};
use std::sync::Arc;

/// Pure, deterministic reconciliation of a [`ChunkCapture`].
#[derive(Debug, Clone)]
pub struct WatermarkMerger {
    metadata: Arc<TableMetadata>,
}

impl WatermarkMerger {
    pub fn new(metadata: Arc<TableMetadata>) -> Self {
        Self { metadata }
    }

    /// Final row set of the chunk at its high watermark.
    pub fn reconcile(&self, capture: &ChunkCapture) -> SnapshotRowSet {
        let mut rows = capture.rows.clone();
        let mut in_flight: Vec<&RawChangeRecord> = capture
            .in_flight
            .iter()
            .filter(|r| capture.watermarks.covers(r.position))
            .collect();
        // Later position wins; stable sort keeps the log order for equal positions
        in_flight.sort_by_key(|r| r.position);

        for record in in_flight {
            self.apply(&mut rows, &capture.chunk, record);
        }
        rows
    }

    /// Merge a capture into the chunk's INSERT events.
    ///
    /// Every event carries the chunk's high watermark as its position.
    pub fn merge(&self, capture: &ChunkCapture) -> Result<Vec<ChangeEvent>> {
        let rows = self.reconcile(capture);
        let position = capture.watermarks.high.position;
        rows.rows()
            .map(|row| {
                Ok(ChangeEvent::new(
                    self.metadata.id.clone(),
                    ChangeOp::Insert,
                    position,
                    self.metadata.decode_row(row)?,
                ))
            })
            .collect()
    }

    /// Apply one record to `rows` as it applied to the table, restricted to
    /// images owned by `chunk`. Returns whether anything changed.
    pub fn apply(&self, rows: &mut SnapshotRowSet, chunk: &Chunk, record: &RawChangeRecord) -> bool {
        let mut changed = false;
        match record.op {
            RawOp::Insert => {
                if let Some(after) = &record.after {
                    changed |= self.add(rows, chunk, after);
                }
            }
            RawOp::Update => {
                if let Some(before) = &record.before {
                    changed |= self.remove(rows, chunk, before);
                }
                if let Some(after) = &record.after {
                    changed |= self.add(rows, chunk, after);
                }
            }
            RawOp::Delete => {
                if let Some(before) = &record.before {
                    changed |= self.remove(rows, chunk, before);
                }
            }
        }
        changed
    }

    fn owned(&self, chunk: &Chunk, row: &RawRow) -> bool {
        chunk.owns(self.metadata.chunk_key(row).as_ref())
    }

    fn add(&self, rows: &mut SnapshotRowSet, chunk: &Chunk, row: &RawRow) -> bool {
        if !self.owned(chunk, row) {
            return false;
        }
        rows.upsert(self.metadata.row_key(row), row.clone());
        true
    }

    fn remove(&self, rows: &mut SnapshotRowSet, chunk: &Chunk, row: &RawRow) -> bool {
        if !self.owned(chunk, row) {
            return false;
        }
        rows.remove(&self.metadata.row_key(row), row)
    }
}
