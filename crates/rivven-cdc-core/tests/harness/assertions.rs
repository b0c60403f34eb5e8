//! Custom assertions for capture event testing

use pretty_assertions::assert_eq;
use rivven_cdc_core::{ChangeEvent, ChangeOp, DecodedRow};
use std::collections::BTreeMap;

/// Assertions over a list of change events
pub trait ChangeEventVecExt {
    /// Events rendered in `+I[..]` notation
    fn notation(&self) -> Vec<String>;

    /// Assert every event has `op`
    fn assert_all_ops(&self, op: ChangeOp);

    /// Assert log positions never decrease
    fn assert_position_ordered(&self);

    /// Values of the `id` column, in order
    fn ids(&self) -> Vec<i64>;
}

impl ChangeEventVecExt for [ChangeEvent] {
    fn notation(&self) -> Vec<String> {
        self.iter().map(|e| e.to_string()).collect()
    }

    fn assert_all_ops(&self, op: ChangeOp) {
        for event in self {
            assert_eq!(event.op, op, "unexpected event {}", event);
        }
    }

    fn assert_position_ordered(&self) {
        for window in self.windows(2) {
            assert!(
                window[0].position <= window[1].position,
                "Events not in log order: {} at {} before {} at {}",
                window[0],
                window[0].position,
                window[1],
                window[1].position
            );
        }
    }

    fn ids(&self) -> Vec<i64> {
        self.iter().map(|e| row_id(&e.row)).collect()
    }
}

fn row_id(row: &DecodedRow) -> i64 {
    row.get("id")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| panic!("row has no integer id: {}", row))
}

/// Materialized table keyed by `id`, built by applying events exactly once.
///
/// Inserting an existing id or deleting a missing one panics, so a replay
/// through the model detects duplicated and lost events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableModel {
    rows: BTreeMap<i64, DecodedRow>,
}

impl TableModel {
    pub fn insert(&mut self, row: DecodedRow) {
        let id = row_id(&row);
        if let Some(existing) = self.rows.insert(id, row) {
            panic!("duplicate row for id {}: {}", id, existing);
        }
    }

    pub fn remove(&mut self, row: &DecodedRow) {
        let id = row_id(row);
        match self.rows.remove(&id) {
            Some(existing) => assert_eq!(&existing, row, "retracted row differs from stored row"),
            None => panic!("retraction of missing row {}", row),
        }
    }

    pub fn apply(&mut self, event: &ChangeEvent) {
        if event.op.is_accumulate() {
            self.insert(event.row.clone());
        } else {
            self.remove(&event.row);
        }
    }

    pub fn apply_all(&mut self, events: &[ChangeEvent]) {
        for event in events {
            self.apply(event);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.rows.keys().copied().collect()
    }
}
