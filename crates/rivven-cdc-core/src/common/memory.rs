//! # In-Memory Source
//!
//! A [`LogClient`] and [`QueryExecutor`] over in-memory tables and an
//! in-memory change log, for tests and local experiments.
//!
//! Every write appends one record to the shared log; the log position of the
//! n-th write is `n`. Writes to any table advance the same log, so other
//! tables can be used to move the log forward without touching the captured
//! table.
//!
//! ```rust
//! # async fn example() -> rivven_cdc_core::Result<()> {
//! use rivven_cdc_core::common::{ColumnDescription, MemoryDatabase, RawRow, RawValue, TableDescription, TableId};
//!
//! let db = MemoryDatabase::new();
//! let users = TableId::new("shop", "users");
//! db.create_table(TableDescription {
//!     id: users.clone(),
//!     columns: vec![ColumnDescription::integer("id"), ColumnDescription::char("name", "utf8mb4")],
//!     primary_key: vec!["id".into()],
//! })?;
//! db.insert(&users, RawRow::new(vec![RawValue::Int(1), RawValue::from(&b"alice"[..])]))?;
//! # Ok(())
//! # }
//! ```
//!
//! Faults are injected with [`MemoryDatabase::fail_next_queries`] and
//! [`MemoryDatabase::fail_log_reads`]; writes racing a chunk read are
//! scheduled with [`MemoryDatabase::on_query`]. Reads can be held back with
//! [`MemoryDatabase::hold_query`] and [`MemoryDatabase::hold_log`].

use crate::common::{
    CdcError, Chunk, KeyValue, LogClient, LogHandle, LogPosition, QueryExecutor, RawChangeRecord,
    RawRow, RawValue, Result, TableDescription, TableId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

/// When a query hook fires relative to the consistent read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryHookPoint {
    /// After `W_lo`, before the read: the write is visible to the read
    BeforeRead,
    /// After the read, before `W_hi`: the write is not visible to the read
    AfterRead,
}

type QueryHook = Box<dyn FnOnce(&MemoryDatabase) -> Result<()> + Send>;

struct PendingHook {
    chunk_id: Option<u32>,
    point: QueryHookPoint,
    hook: QueryHook,
}

/// Holds reads back until released.
///
/// Dropping the gate releases it.
pub struct MemoryGate {
    open: watch::Sender<bool>,
}

impl MemoryGate {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (open, rx) = watch::channel(false);
        (Self { open }, rx)
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }
}

async fn pass(mut gate: watch::Receiver<bool>) {
    let _ = gate.wait_for(|open| *open).await;
}

struct MemoryTable {
    description: TableDescription,
    /// Index of the first primary key column
    chunk_key: Option<usize>,
    /// Indices of all primary key columns
    primary_key: Vec<usize>,
    rows: Vec<RawRow>,
}

impl MemoryTable {
    fn identity(&self, row: &RawRow) -> Vec<RawValue> {
        if self.primary_key.is_empty() {
            return row.values().to_vec();
        }
        self.primary_key
            .iter()
            .map(|&idx| row.get(idx).cloned().unwrap_or(RawValue::Null))
            .collect()
    }

    fn position_of(&self, row: &RawRow) -> Option<usize> {
        let identity = self.identity(row);
        self.rows.iter().position(|r| self.identity(r) == identity)
    }

    fn key_of(&self, row: &RawRow) -> Option<KeyValue> {
        self.chunk_key
            .and_then(|idx| row.get(idx))
            .and_then(KeyValue::from_raw)
    }
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<TableId, MemoryTable>,
    log: Vec<RawChangeRecord>,
    closed: bool,
    failing_queries: u32,
    failing_log_reads: u32,
    queries_run: u64,
    hooks: Vec<PendingHook>,
    query_gates: HashMap<u32, watch::Receiver<bool>>,
    log_gate: Option<watch::Receiver<bool>>,
}

/// Head of the log as seen by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogHead {
    len: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<MemoryState>,
    head: watch::Sender<LogHead>,
}

/// In-memory database with a change log.
#[derive(Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        let (head, _) = watch::channel(LogHead {
            len: 0,
            closed: false,
        });
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MemoryState::default()),
                head,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a table. Charsets are not checked here.
    pub fn create_table(&self, description: TableDescription) -> Result<()> {
        let primary_key = description
            .primary_key
            .iter()
            .map(|name| {
                description
                    .columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| {
                        CdcError::config(format!("unknown key column '{}' in {}", name, description.id))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.state();
        if state.tables.contains_key(&description.id) {
            return Err(CdcError::config(format!(
                "table {} already exists",
                description.id
            )));
        }
        state.tables.insert(
            description.id.clone(),
            MemoryTable {
                description,
                chunk_key: primary_key.first().copied(),
                primary_key,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Insert a row and log it.
    pub fn insert(&self, table: &TableId, row: RawRow) -> Result<LogPosition> {
        self.write(table, |t, position| {
            if !t.primary_key.is_empty() && t.position_of(&row).is_some() {
                return Err(CdcError::config(format!("duplicate key in {}", table)));
            }
            t.rows.push(row.clone());
            Ok(RawChangeRecord::insert(position, table.clone(), row))
        })
    }

    /// Replace the row identified by `before` with `after` and log it.
    ///
    /// The key may change. On keyless tables `before` must equal a stored row.
    pub fn update(&self, table: &TableId, before: &RawRow, after: RawRow) -> Result<LogPosition> {
        self.write(table, |t, position| {
            let idx = t
                .position_of(before)
                .ok_or_else(|| CdcError::config(format!("no such row in {}", table)))?;
            let old = std::mem::replace(&mut t.rows[idx], after.clone());
            Ok(RawChangeRecord::update(position, table.clone(), old, after))
        })
    }

    /// Update every row matching `predicate` in one log record each.
    pub fn update_where(
        &self,
        table: &TableId,
        predicate: impl Fn(&RawRow) -> bool,
        change: impl Fn(&RawRow) -> RawRow,
    ) -> Result<Vec<LogPosition>> {
        let targets: Vec<RawRow> = self
            .rows(table)?
            .into_iter()
            .filter(|r| predicate(r))
            .collect();
        targets
            .iter()
            .map(|row| self.update(table, row, change(row)))
            .collect()
    }

    /// Delete the row identified by `row` and log it.
    pub fn delete(&self, table: &TableId, row: &RawRow) -> Result<LogPosition> {
        self.write(table, |t, position| {
            let idx = t
                .position_of(row)
                .ok_or_else(|| CdcError::config(format!("no such row in {}", table)))?;
            let old = t.rows.remove(idx);
            Ok(RawChangeRecord::delete(position, table.clone(), old))
        })
    }

    fn write(
        &self,
        table: &TableId,
        apply: impl FnOnce(&mut MemoryTable, LogPosition) -> Result<RawChangeRecord>,
    ) -> Result<LogPosition> {
        let head = {
            let mut state = self.state();
            if state.closed {
                return Err(CdcError::ConnectionClosed);
            }
            let position = LogPosition::new(state.log.len() as u64 + 1);
            let t = state
                .tables
                .get_mut(table)
                .ok_or_else(|| CdcError::config(format!("unknown table {}", table)))?;
            let record = apply(t, position)?;
            state.log.push(record);
            LogHead {
                len: state.log.len() as u64,
                closed: false,
            }
        };
        self.shared.head.send_replace(head);
        Ok(LogPosition::new(head.len))
    }

    /// Current rows of a table, ordered by chunk key.
    pub fn rows(&self, table: &TableId) -> Result<Vec<RawRow>> {
        let state = self.state();
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| CdcError::config(format!("unknown table {}", table)))?;
        let mut rows = t.rows.clone();
        rows.sort_by(|a, b| t.key_of(a).cmp(&t.key_of(b)).then_with(|| a.cmp(b)));
        Ok(rows)
    }

    /// Records logged so far, in position order.
    pub fn log(&self) -> Vec<RawChangeRecord> {
        self.state().log.clone()
    }

    /// End the log; readers drain what is there and then see the end.
    pub fn close_log(&self) {
        let len = {
            let mut state = self.state();
            state.closed = true;
            state.log.len() as u64
        };
        self.shared.head.send_replace(LogHead { len, closed: true });
    }

    /// Make the next `count` consistent reads fail with a transient error.
    pub fn fail_next_queries(&self, count: u32) {
        self.state().failing_queries = count;
    }

    /// Make the next `count` log reads fail with a transient error.
    pub fn fail_log_reads(&self, count: u32) {
        self.state().failing_log_reads = count;
    }

    /// Consistent reads attempted, including failed ones.
    pub fn queries_run(&self) -> u64 {
        self.state().queries_run
    }

    /// Hold the next read of `chunk_id` before it starts.
    pub fn hold_query(&self, chunk_id: u32) -> MemoryGate {
        let (gate, rx) = MemoryGate::new();
        self.state().query_gates.insert(chunk_id, rx);
        gate
    }

    /// Hold every log reader. Writes still succeed and move
    /// [`LogClient::current_position`] ahead of the readers.
    pub fn hold_log(&self) -> MemoryGate {
        let (gate, rx) = MemoryGate::new();
        self.state().log_gate = Some(rx);
        gate
    }

    /// Run `hook` once, at `point` of the next read of `chunk_id` (any chunk
    /// when `None`).
    pub fn on_query(
        &self,
        chunk_id: Option<u32>,
        point: QueryHookPoint,
        hook: impl FnOnce(&MemoryDatabase) -> Result<()> + Send + 'static,
    ) {
        self.state().hooks.push(PendingHook {
            chunk_id,
            point,
            hook: Box::new(hook),
        });
    }

    fn run_hooks(&self, chunk: &Chunk, point: QueryHookPoint) -> Result<()> {
        let due: Vec<QueryHook> = {
            let mut state = self.state();
            let (due, keep): (Vec<_>, Vec<_>) = state.hooks.drain(..).partition(|h| {
                h.point == point && h.chunk_id.map_or(true, |id| id == chunk.id)
            });
            state.hooks = keep;
            due.into_iter().map(|h| h.hook).collect()
        };
        for hook in due {
            hook(self)?;
        }
        Ok(())
    }

    fn with_table<T>(&self, table: &TableId, f: impl FnOnce(&MemoryTable) -> T) -> Result<T> {
        let state = self.state();
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| CdcError::config(format!("unknown table {}", table)))?;
        Ok(f(t))
    }

    fn sorted_keys(t: &MemoryTable, column: usize) -> Vec<KeyValue> {
        let mut keys: Vec<KeyValue> = t
            .rows
            .iter()
            .filter_map(|r| r.get(column).and_then(KeyValue::from_raw))
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl QueryExecutor for MemoryDatabase {
    async fn describe_table(&self, table: &TableId) -> Result<TableDescription> {
        self.with_table(table, |t| t.description.clone())
    }

    async fn estimate_row_count(&self, table: &TableId) -> Result<u64> {
        self.with_table(table, |t| t.rows.len() as u64)
    }

    async fn key_range(&self, table: &TableId, column: usize) -> Result<Option<(KeyValue, KeyValue)>> {
        self.with_table(table, |t| {
            let keys = Self::sorted_keys(t, column);
            match (keys.first(), keys.last()) {
                (Some(min), Some(max)) => Some((min.clone(), max.clone())),
                _ => None,
            }
        })
    }

    async fn sample_keys(
        &self,
        table: &TableId,
        column: usize,
        quantiles: &[f64],
    ) -> Result<Vec<KeyValue>> {
        self.with_table(table, |t| {
            let keys = Self::sorted_keys(t, column);
            if keys.is_empty() {
                return Vec::new();
            }
            quantiles
                .iter()
                .map(|q| {
                    let idx = ((q * keys.len() as f64) as usize).min(keys.len() - 1);
                    keys[idx].clone()
                })
                .collect()
        })
    }

    async fn run_consistent_query(&self, chunk: &Chunk) -> Result<Vec<RawRow>> {
        let gate = self.state().query_gates.remove(&chunk.id);
        if let Some(gate) = gate {
            pass(gate).await;
        }
        self.run_hooks(chunk, QueryHookPoint::BeforeRead)?;

        let rows = {
            let mut state = self.state();
            state.queries_run += 1;
            if state.failing_queries > 0 {
                state.failing_queries -= 1;
                return Err(CdcError::transient(format!(
                    "injected query failure on {}",
                    chunk
                )));
            }
            let t = state
                .tables
                .get(&chunk.table)
                .ok_or_else(|| CdcError::config(format!("unknown table {}", chunk.table)))?;
            let mut rows: Vec<RawRow> = t
                .rows
                .iter()
                .filter(|r| chunk.owns(t.key_of(r).as_ref()))
                .cloned()
                .collect();
            rows.sort_by(|a, b| t.key_of(a).cmp(&t.key_of(b)).then_with(|| a.cmp(b)));
            rows
        };
        debug!(chunk = %chunk, rows = rows.len(), "Memory query");

        self.run_hooks(chunk, QueryHookPoint::AfterRead)?;
        Ok(rows)
    }
}

#[async_trait]
impl LogClient for MemoryDatabase {
    async fn open(&self, from: LogPosition) -> Result<Box<dyn LogHandle>> {
        Ok(Box::new(MemoryLogHandle {
            db: self.clone(),
            head: self.shared.head.subscribe(),
            next: from.offset(),
        }))
    }

    async fn current_position(&self) -> Result<LogPosition> {
        Ok(LogPosition::new(self.state().log.len() as u64))
    }
}

/// Reader over [`MemoryDatabase`]'s log.
pub struct MemoryLogHandle {
    db: MemoryDatabase,
    head: watch::Receiver<LogHead>,
    /// Index of the next record to return
    next: u64,
}

#[async_trait]
impl LogHandle for MemoryLogHandle {
    async fn next(&mut self) -> Result<Option<RawChangeRecord>> {
        loop {
            let gate = self.db.state().log_gate.clone();
            if let Some(gate) = gate {
                pass(gate).await;
            }
            {
                let mut state = self.db.state();
                if state.failing_log_reads > 0 {
                    state.failing_log_reads -= 1;
                    return Err(CdcError::transient("injected log read failure"));
                }
                if let Some(record) = state.log.get(self.next as usize) {
                    self.next += 1;
                    return Ok(Some(record.clone()));
                }
                if state.closed {
                    return Ok(None);
                }
            }

            let next = self.next;
            if self
                .head
                .wait_for(|h| h.len > next || h.closed)
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}
