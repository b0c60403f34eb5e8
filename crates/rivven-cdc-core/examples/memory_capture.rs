//! Memory Capture Example
//!
//! Snapshots a table while writers keep changing it, then follows the change
//! stream. Everything runs in process against `MemoryDatabase`.
//!
//! Run with:
//! ```
//! RUST_LOG=rivven_cdc_core=debug cargo run --example memory_capture
//! ```
use rivven_cdc_core::common::{
    ColumnDescription, MemoryDatabase, RawRow, RawValue, TableDescription,
};
use rivven_cdc_core::{CaptureConfig, CaptureEvent, Charset, SnapshotScheduler, TableId};
use std::sync::Arc;
use std::time::Duration;

fn row(id: i64, name: &str) -> anyhow::Result<RawRow> {
    Ok(RawRow::new(vec![
        RawValue::Int(id),
        RawValue::Bytes(Charset::Utf8.encode(name)?),
    ]))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let table = TableId::parse("shop.customers")?;
    let db = Arc::new(MemoryDatabase::new());
    db.create_table(TableDescription {
        id: table.clone(),
        columns: vec![
            ColumnDescription::integer("id"),
            ColumnDescription::char("name", "utf8mb4"),
        ],
        primary_key: vec!["id".into()],
    })?;
    for id in 1..=1_000 {
        db.insert(&table, row(id, &format!("customer {}", id))?)?;
    }

    let config = CaptureConfig::builder()
        .chunk_size(100)
        .parallelism(4)
        .build()?;
    let scheduler = SnapshotScheduler::new(config, db.clone(), db.clone());
    let mut capture = scheduler.start(&table).await?;

    // Concurrent writer: renames, key moves and deletes while chunks are read
    let writer = {
        let db = db.clone();
        let table = table.clone();
        tokio::spawn(async move {
            for id in (10..=1_000).step_by(97) {
                let before = row(id, &format!("customer {}", id))?;
                if id % 2 == 0 {
                    db.update(&table, &before, row(id + 10_000, "moved")?)?;
                } else {
                    db.delete(&table, &before)?;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            db.insert(&table, row(5_000, "late arrival")?)?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            db.close_log();
            anyhow::Ok(())
        })
    };

    let mut snapshot_rows = 0usize;
    let mut streaming = false;
    while let Some(event) = capture.next().await {
        match event {
            CaptureEvent::Change(change) if streaming => {
                println!("{} @ {}", change, change.position);
            }
            CaptureEvent::Change(_) => snapshot_rows += 1,
            CaptureEvent::SnapshotComplete { position } => {
                streaming = true;
                println!(
                    "snapshot complete: {} rows, streaming from {}",
                    snapshot_rows, position
                );
            }
        }
    }

    writer.await??;
    capture.join().await?;
    Ok(())
}
