//! # rivven-cdc-core - Lock-free table snapshots for Rivven CDC
//!
//! Captures a table as a consistent initial snapshot followed by the live
//! change stream, without table locks and without a global snapshot
//! transaction.
//!
//! ## How it works
//!
//! The table is split into key-range chunks. Each chunk is read between two
//! log positions, a low and a high watermark. Log records that landed between
//! the two are replayed over the chunk's rows, so every chunk is emitted as
//! its state at the high watermark. Streaming then resumes from the smallest
//! high watermark and skips changes a chunk snapshot already reflects.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │QueryExecutor │   │  LogClient   │
//! │chunk queries │   │ binlog / WAL │
//! └──────┬───────┘   └──────┬───────┘
//!        │                  │
//!        ▼                  ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  SnapshotScheduler                       │
//! │  ChunkSplitter → SnapshotReader → WatermarkMerger        │
//! │                  LogStreamReader → streaming filter      │
//! └──────────────────────────────────────────────────────────┘
//!        │
//!        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  +I[...] snapshot rows · SnapshotComplete · ±U/±I/-D     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> anyhow::Result<()> {
//! use rivven_cdc_core::common::MemoryDatabase;
//! use rivven_cdc_core::{CaptureConfig, CaptureEvent, SnapshotScheduler, TableId};
//! use std::sync::Arc;
//!
//! let db = Arc::new(MemoryDatabase::new());
//! let config = CaptureConfig::builder().chunk_size(1024).parallelism(4).build()?;
//! let scheduler = SnapshotScheduler::new(config, db.clone(), db.clone());
//!
//! let mut capture = scheduler.start(&TableId::parse("shop.users")?).await?;
//! while let Some(event) = capture.next().await {
//!     match event {
//!         CaptureEvent::Change(change) => println!("{}", change),
//!         CaptureEvent::SnapshotComplete { position } => println!("streaming from {}", position),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Public API Organization
//!
//! ### Tier 1: Core Types (crate root)
//! Starting a capture and consuming its events.
//!
//! ### Tier 2: Production Features (crate root)
//! Checkpoints, retry tuning, statistics.
//!
//! ### Tier 3: Advanced Types (`common` module)
//! Building blocks for custom drivers - accessed via `common::*`.

// Common module - always available (contains advanced/internal types)
pub mod common;

// =============================================================================
// TIER 1: Core Types - Essential for basic operations
// =============================================================================

pub use common::{
    // Events
    CaptureEvent,
    ChangeEvent,
    ChangeOp,
    DecodedRow,
    // Error handling
    CdcError,
    ErrorCategory,
    Result,
    // Configuration
    CaptureConfig,
    CaptureConfigBuilder,
    SplitStrategy,
    // Capture lifecycle
    CaptureHandle,
    CapturePhase,
    SnapshotScheduler,
    // Collaborators
    LogClient,
    LogHandle,
    QueryExecutor,
    // Tables and positions
    Charset,
    LogPosition,
    TableId,
};

// =============================================================================
// TIER 2: Production Features - Optional but commonly used
// =============================================================================

// Checkpointing
pub use common::{CaptureCheckpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};

// Retry
pub use common::{RetryConfig, RetryConfigBuilder};

// Statistics
pub use common::{CaptureStats, CaptureStatsSnapshot};

// =============================================================================
// TIER 3: Advanced Types - Available via `common::` module
// =============================================================================
// The following are NOT re-exported at crate root but accessible via `common::`:
//
// Chunking:
//   - common::ChunkSplitter, ChunkPlan, Chunk, ChunkState
//
// Watermark protocol:
//   - common::SnapshotReader, ChunkCapture, SnapshotRowSet
//   - common::WatermarkMerger
//   - common::Watermark, WatermarkPair
//
// Log tailing:
//   - common::LogStreamReader, LogBuffer, ReaderProgress
//
// Raw data model:
//   - common::RawChangeRecord, RawOp, RawRow, RawValue, KeyValue, RowKey
//   - common::TableDescription, ColumnDescription, TableMetadata
//
// Testing:
//   - common::MemoryDatabase, QueryHookPoint
