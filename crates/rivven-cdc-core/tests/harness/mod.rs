//! Test harness for capture integration tests
//!
//! Everything runs against [`MemoryDatabase`], which implements both the log
//! client and the query executor in process.

#![allow(dead_code)] // Not every test binary uses every helper

pub mod assertions;

pub use assertions::{ChangeEventVecExt, TableModel};

use rivven_cdc_core::common::{
    ColumnDescription, MemoryDatabase, RawRow, RawValue, TableDescription, TableMetadata,
};
use rivven_cdc_core::{
    CaptureConfig, CaptureConfigBuilder, CaptureEvent, CaptureHandle, ChangeEvent, LogPosition,
    QueryExecutor, RetryConfig, SnapshotScheduler, TableId,
};
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT: Once = Once::new();

/// Per-event wait before a test is considered hung.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rivven_cdc_core=info")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn users() -> TableId {
    TableId::new("shop", "users")
}

/// `users(id INT PRIMARY KEY, name <charset>)`
pub fn users_table(charset: &str) -> TableDescription {
    TableDescription {
        id: users(),
        columns: vec![
            ColumnDescription::integer("id"),
            ColumnDescription::char("name", charset),
        ],
        primary_key: vec!["id".into()],
    }
}

pub fn user(id: i64, name: &str) -> RawRow {
    RawRow::new(vec![RawValue::Int(id), RawValue::from(name.as_bytes())])
}

/// Database with a utf8mb4 `users` table holding `ids`.
pub fn seeded_db(ids: impl IntoIterator<Item = i64>) -> Arc<MemoryDatabase> {
    let db = Arc::new(MemoryDatabase::new());
    db.create_table(users_table("utf8mb4")).unwrap();
    for id in ids {
        db.insert(&users(), user(id, &format!("user-{}", id))).unwrap();
    }
    db
}

/// Config with millisecond retry delays.
pub fn test_config() -> CaptureConfigBuilder {
    CaptureConfig::builder()
        .retry(
            RetryConfig::builder()
                .max_retries(3)
                .retry_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .build(),
        )
        .watermark_timeout(Duration::from_secs(5))
        .stop_timeout(Duration::from_secs(5))
}

pub fn scheduler(db: &Arc<MemoryDatabase>, config: CaptureConfig) -> SnapshotScheduler {
    SnapshotScheduler::new(config, db.clone(), db.clone())
}

pub async fn next_event(handle: &mut CaptureHandle) -> Option<CaptureEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, handle.next())
        .await
        .expect("timed out waiting for a capture event")
}

/// Snapshot events up to the mode switch, and the streaming start position.
pub async fn read_snapshot(handle: &mut CaptureHandle) -> (Vec<ChangeEvent>, LogPosition) {
    let mut events = Vec::new();
    loop {
        match next_event(handle).await {
            Some(CaptureEvent::Change(event)) => events.push(event),
            Some(CaptureEvent::SnapshotComplete { position }) => return (events, position),
            None => panic!("capture ended before the snapshot completed"),
        }
    }
}

/// The next `count` change events.
pub async fn read_changes(handle: &mut CaptureHandle, count: usize) -> Vec<ChangeEvent> {
    let mut events = Vec::with_capacity(count);
    while events.len() < count {
        match next_event(handle).await {
            Some(CaptureEvent::Change(event)) => events.push(event),
            Some(CaptureEvent::SnapshotComplete { .. }) => {}
            None => panic!("capture ended after {} of {} events", events.len(), count),
        }
    }
    events
}

/// Change events until the capture ends.
pub async fn read_to_end(handle: &mut CaptureHandle) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Some(event) = next_event(handle).await {
        if let CaptureEvent::Change(event) = event {
            events.push(event);
        }
    }
    events
}

/// Current table content as a model, decoded like the capture decodes it.
pub async fn table_model(db: &MemoryDatabase, table: &TableId) -> TableModel {
    let metadata =
        TableMetadata::from_description(db.describe_table(table).await.unwrap()).unwrap();
    let mut model = TableModel::default();
    for row in db.rows(table).unwrap() {
        model.insert(metadata.decode_row(&row).unwrap());
    }
    model
}
