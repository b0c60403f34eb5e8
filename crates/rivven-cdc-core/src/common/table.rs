//! Table metadata and raw row values
//!
//! The query executor describes a table with declared charset *names*;
//! [`TableMetadata::from_description`] resolves every character column to a
//! [`Charset`] up front, so an unsupported charset is reported before any
//! chunk work starts.

use crate::common::{CdcError, Charset, DecodedRow, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub database: String,
    pub table: String,
}

impl TableId {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Parse `database.table`.
    pub fn parse(qualified: &str) -> Result<Self> {
        match qualified.split_once('.') {
            Some((db, table)) if !db.is_empty() && !table.is_empty() => Ok(Self::new(db, table)),
            _ => Err(CdcError::config(format!(
                "table identifier must be 'database.table', got '{}'",
                qualified
            ))),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// A raw column value as read from a query or the log.
///
/// Character columns carry their bytes in the column's declared charset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RawValue {
    Null,
    Int(i64),
    Bytes(Vec<u8>),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}

impl From<Vec<u8>> for RawValue {
    fn from(v: Vec<u8>) -> Self {
        RawValue::Bytes(v)
    }
}

impl From<&[u8]> for RawValue {
    fn from(v: &[u8]) -> Self {
        RawValue::Bytes(v.to_vec())
    }
}

/// A raw row, values in table column order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RawRow(pub Vec<RawValue>);

impl RawRow {
    pub fn new(values: Vec<RawValue>) -> Self {
        Self(values)
    }

    pub fn get(&self, idx: usize) -> Option<&RawValue> {
        self.0.get(idx)
    }

    pub fn values(&self) -> &[RawValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Value of the chunk key column. Comparable; chunk bounds are expressed in it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyValue {
    Int(i64),
    Bytes(Vec<u8>),
}

impl KeyValue {
    /// Key value of a raw column; `None` for NULL.
    pub fn from_raw(value: &RawValue) -> Option<Self> {
        match value {
            RawValue::Null => None,
            RawValue::Int(v) => Some(KeyValue::Int(*v)),
            RawValue::Bytes(b) => Some(KeyValue::Bytes(b.clone())),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            KeyValue::Int(v) => Some(*v),
            KeyValue::Bytes(_) => None,
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Bytes(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Identity of a row inside a chunk.
///
/// The primary key values, or the whole row for tables without a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey(pub Vec<RawValue>);

/// Declared column type as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclaredType {
    Integer,
    /// Character column with its server-declared charset name
    Char { charset: String },
    Binary,
}

/// Column definition as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub declared_type: DeclaredType,
}

impl ColumnDescription {
    pub fn integer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: DeclaredType::Integer,
        }
    }

    pub fn char(name: impl Into<String>, charset: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: DeclaredType::Char {
                charset: charset.into(),
            },
        }
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: DeclaredType::Binary,
        }
    }
}

/// Table definition as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub id: TableId,
    pub columns: Vec<ColumnDescription>,
    /// Ordered primary key column names; empty when the table has no unique key
    pub primary_key: Vec<String>,
}

/// Resolved column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text(Charset),
    Binary,
}

/// Resolved column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
}

/// Table metadata with every charset resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub id: TableId,
    pub columns: Vec<ColumnMeta>,
    /// Primary key column indices, in key order
    pub primary_key: Vec<usize>,
}

impl TableMetadata {
    /// Resolve a description, failing on unknown charsets or key columns.
    pub fn from_description(desc: TableDescription) -> Result<Self> {
        if desc.columns.is_empty() {
            return Err(CdcError::config(format!("table {} has no columns", desc.id)));
        }

        let columns = desc
            .columns
            .iter()
            .map(|c| {
                let column_type = match &c.declared_type {
                    DeclaredType::Integer => ColumnType::Integer,
                    DeclaredType::Binary => ColumnType::Binary,
                    DeclaredType::Char { charset } => {
                        ColumnType::Text(Charset::from_mysql_name(charset)?)
                    }
                };
                Ok(ColumnMeta {
                    name: c.name.clone(),
                    column_type,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let primary_key = desc
            .primary_key
            .iter()
            .map(|name| {
                columns.iter().position(|c| &c.name == name).ok_or_else(|| {
                    CdcError::config(format!(
                        "primary key column '{}' not found in table {}",
                        name, desc.id
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: desc.id,
            columns,
            primary_key,
        })
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Index of the column chunks are split on (first key column).
    pub fn chunk_key_index(&self) -> Option<usize> {
        self.primary_key.first().copied()
    }

    pub fn chunk_key_column(&self) -> Option<&ColumnMeta> {
        self.chunk_key_index().map(|idx| &self.columns[idx])
    }

    /// Chunk key value of a row; `None` for keyless tables or a NULL key.
    pub fn chunk_key(&self, row: &RawRow) -> Option<KeyValue> {
        self.chunk_key_index()
            .and_then(|idx| row.get(idx))
            .and_then(KeyValue::from_raw)
    }

    /// Identity of a row for in-chunk reconciliation.
    pub fn row_key(&self, row: &RawRow) -> RowKey {
        if self.primary_key.is_empty() {
            return RowKey(row.values().to_vec());
        }
        RowKey(
            self.primary_key
                .iter()
                .map(|&idx| row.get(idx).cloned().unwrap_or(RawValue::Null))
                .collect(),
        )
    }

    /// Decode a raw row through each column's codec.
    pub fn decode_row(&self, row: &RawRow) -> Result<DecodedRow> {
        if row.len() != self.columns.len() {
            return Err(CdcError::consistency(format!(
                "row has {} values but table {} has {} columns",
                row.len(),
                self.id,
                self.columns.len()
            )));
        }

        let fields = self
            .columns
            .iter()
            .zip(row.values())
            .map(|(column, value)| {
                let decoded = match (value, column.column_type) {
                    (RawValue::Null, _) => serde_json::Value::Null,
                    (RawValue::Int(v), _) => serde_json::Value::from(*v),
                    (RawValue::Bytes(b), ColumnType::Text(charset)) => {
                        serde_json::Value::String(charset.decode(b)?)
                    }
                    (RawValue::Bytes(b), _) => serde_json::Value::String(
                        base64::engine::general_purpose::STANDARD.encode(b),
                    ),
                };
                Ok((column.name.clone(), decoded))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DecodedRow::new(fields))
    }
}
