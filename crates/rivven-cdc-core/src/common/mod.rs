//! # Capture Core Types and Traits
//!
//! Source-agnostic building blocks of a watermark-based snapshot capture:
//!
//! - [`ChunkSplitter`] / [`ChunkPlan`] - split a table into key-range chunks
//! - [`SnapshotReader`] - read one chunk between a low and a high watermark
//! - [`LogStreamReader`] / [`LogBuffer`] - tail the change log into a buffer
//! - [`WatermarkMerger`] - replay in-flight log records over a chunk snapshot
//! - [`SnapshotScheduler`] - worker pool, ordered emission, mode switch
//! - [`Charset`] - per-column byte codecs
//! - [`CheckpointStore`] - resumable capture state
//! - [`LogClient`] / [`QueryExecutor`] - collaborator traits
//! - [`MemoryDatabase`] - in-memory implementation of both collaborators
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Common Module                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  QueryExecutor ←─── describe, statistics, consistent reads  │
//! │  LogClient     ←─── ordered raw change records              │
//! │  ChunkSplitter ←─── even ranges or sampled quantiles        │
//! │  SnapshotReader←─── W_lo / query / W_hi per chunk           │
//! │  LogBuffer     ←─── shared window of buffered records       │
//! │  Merger        ←─── in-flight replay, INSERT events         │
//! │  Scheduler     ←─── ordering, mode switch, streaming        │
//! │  Charset       ←─── decode/encode column bytes              │
//! │  Checkpoint    ←─── resume without re-emitting chunks       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod charset;
mod checkpoint;
mod chunk;
mod config;
mod error;
mod event;
mod log_reader;
pub mod memory;
mod merge;
mod position;
mod resilience;
mod scheduler;
mod snapshot;
mod stats;
mod table;
mod traits;

pub use charset::*;
pub use checkpoint::*;
pub use chunk::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use log_reader::*;
pub use memory::{MemoryDatabase, MemoryGate, MemoryLogHandle, QueryHookPoint};
pub use merge::*;
pub use position::*;
pub use resilience::*;
pub use scheduler::*;
pub use snapshot::*;
pub use stats::*;
pub use table::*;
pub use traits::*;
