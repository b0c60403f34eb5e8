//! Change records and change events
//!
//! [`RawChangeRecord`] is what the log client hands us: positioned, undecoded.
//! [`ChangeEvent`] is what the host receives: decoded through the column
//! charsets and tagged with a row kind (`+I`, `-U`, `+U`, `-D`).
//!
//! ```text
//! +I[1, Craig Marshall]     insert
//! -U[1, Craig Marshall]     update before
//! +U[1, Craig M.]           update after
//! -D[1, Craig M.]           delete
//! ```

use crate::common::{CdcError, LogPosition, RawRow, Result, TableId};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Operation of a raw log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawOp {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for RawOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawOp::Insert => write!(f, "INSERT"),
            RawOp::Update => write!(f, "UPDATE"),
            RawOp::Delete => write!(f, "DELETE"),
        }
    }
}

/// A row mutation read from the change log. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChangeRecord {
    pub position: LogPosition,
    pub table: TableId,
    pub op: RawOp,
    pub before: Option<RawRow>,
    pub after: Option<RawRow>,
}

impl RawChangeRecord {
    pub fn insert(position: LogPosition, table: TableId, after: RawRow) -> Self {
        Self {
            position,
            table,
            op: RawOp::Insert,
            before: None,
            after: Some(after),
        }
    }

    pub fn update(position: LogPosition, table: TableId, before: RawRow, after: RawRow) -> Self {
        Self {
            position,
            table,
            op: RawOp::Update,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn delete(position: LogPosition, table: TableId, before: RawRow) -> Self {
        Self {
            position,
            table,
            op: RawOp::Delete,
            before: Some(before),
            after: None,
        }
    }

    /// Check that the row images match the operation.
    pub fn validate(&self) -> Result<()> {
        let ok = match self.op {
            RawOp::Insert => self.before.is_none() && self.after.is_some(),
            RawOp::Update => self.before.is_some() && self.after.is_some(),
            RawOp::Delete => self.before.is_some() && self.after.is_none(),
        };
        if ok {
            Ok(())
        } else {
            Err(CdcError::consistency(format!(
                "{} record at position {} has mismatched row images",
                self.op, self.position
            )))
        }
    }
}

/// Row kind of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOp {
    Insert,
    UpdateBefore,
    UpdateAfter,
    Delete,
}

impl ChangeOp {
    /// Short notation: `+I`, `-U`, `+U`, `-D`.
    pub fn short_string(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "+I",
            ChangeOp::UpdateBefore => "-U",
            ChangeOp::UpdateAfter => "+U",
            ChangeOp::Delete => "-D",
        }
    }

    /// Whether the event adds its row to the materialized view.
    pub fn is_accumulate(&self) -> bool {
        matches!(self, ChangeOp::Insert | ChangeOp::UpdateAfter)
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_string())
    }
}

/// A decoded row: column name to value, in table column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedRow {
    fields: Vec<(String, serde_json::Value)>,
}

impl DecodedRow {
    pub fn new(fields: Vec<(String, serde_json::Value)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn fields(&self) -> &[(String, serde_json::Value)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON object view of the row.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.fields.iter().cloned().collect())
    }
}

impl Serialize for DecodedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl fmt::Display for DecodedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (_, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                serde_json::Value::String(s) => f.write_str(s)?,
                other => write!(f, "{}", other)?,
            }
        }
        f.write_str("]")
    }
}

/// A decoded change delivered downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub table: TableId,
    pub op: ChangeOp,
    /// Log position of the source record; the chunk's high watermark for snapshot rows
    pub position: LogPosition,
    pub row: DecodedRow,
}

impl ChangeEvent {
    pub fn new(table: TableId, op: ChangeOp, position: LogPosition, row: DecodedRow) -> Self {
        Self {
            table,
            op,
            position,
            row,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.row)
    }
}

/// Item produced by a capture.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Change(ChangeEvent),
    /// Emitted once, between the last snapshot event and the first streaming event
    SnapshotComplete { position: LogPosition },
}

impl CaptureEvent {
    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            CaptureEvent::Change(event) => Some(event),
            CaptureEvent::SnapshotComplete { .. } => None,
        }
    }

    pub fn into_change(self) -> Option<ChangeEvent> {
        match self {
            CaptureEvent::Change(event) => Some(event),
            CaptureEvent::SnapshotComplete { .. } => None,
        }
    }
}
