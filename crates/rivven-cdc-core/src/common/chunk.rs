//! # Chunk Splitting
//!
//! Partitions a table's chunk-key domain into ordered, non-overlapping,
//! half-open ranges:
//!
//! ```text
//!   (-∞, B1)  [B1, B2)  [B2, B3)  ...  [Bn, +∞)
//!   chunk 0   chunk 1   chunk 2        chunk n
//! ```
//!
//! The first chunk is unbounded below, the last unbounded above, and the upper
//! bound of chunk `i` is the lower bound of chunk `i + 1`, so every key value
//! belongs to exactly one chunk. NULL keys belong to chunk 0.
//!
//! ## Strategies
//!
//! | Table | Plan |
//! |-------|------|
//! | no primary key | one whole-table chunk, flagged reduced parallelism |
//! | `rows <= chunk_size` | one unbounded chunk |
//! | integer key, distribution factor in window | even key ranges |
//! | anything else | boundaries from percentile probes |
//!
//! The distribution factor is `(max - min + 1) / rows`; a dense
//! auto-increment key is close to 1.0.
//!
//! A [`ChunkPlan`] is computed once, stores only its boundaries, and builds
//! [`Chunk`]s on demand; [`ChunkPlan::iter`] can be called any number of times.

use crate::common::{
    CaptureConfig, CdcError, ColumnType, KeyValue, QueryExecutor, Result, SplitStrategy, TableId,
    TableMetadata,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Lifecycle of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkState {
    #[default]
    Pending,
    Snapshotting,
    Merging,
    Done,
}

impl ChunkState {
    pub fn is_done(&self) -> bool {
        matches!(self, ChunkState::Done)
    }
}

/// One contiguous chunk-key range snapshotted as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u32,
    pub table: TableId,
    /// Inclusive lower bound; `None` is unbounded
    pub lower: Option<KeyValue>,
    /// Exclusive upper bound; `None` is unbounded
    pub upper: Option<KeyValue>,
}

impl Chunk {
    /// The single chunk covering the whole table.
    pub fn whole_table(table: TableId) -> Self {
        Self {
            id: 0,
            table,
            lower: None,
            upper: None,
        }
    }

    /// Whether `key` lies in `[lower, upper)`.
    pub fn contains(&self, key: &KeyValue) -> bool {
        let above_lower = self.lower.as_ref().map_or(true, |lower| key >= lower);
        let below_upper = self.upper.as_ref().map_or(true, |upper| key < upper);
        above_lower && below_upper
    }

    /// Ownership test for a possibly-NULL key; NULL keys belong to the first chunk.
    pub fn owns(&self, key: Option<&KeyValue>) -> bool {
        match key {
            Some(key) => self.contains(key),
            None => self.lower.is_none(),
        }
    }

    pub fn is_whole_table(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} [", self.table, self.id)?;
        match &self.lower {
            Some(v) => write!(f, "{}", v)?,
            None => f.write_str("-inf")?,
        }
        f.write_str(", ")?;
        match &self.upper {
            Some(v) => write!(f, "{}", v)?,
            None => f.write_str("+inf")?,
        }
        f.write_str(")")
    }
}

/// Boundary layout of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Boundaries {
    /// `min + k * step` for `k = 1..=count`
    Even { min: i64, step: i64, count: u32 },
    /// Strictly increasing explicit boundaries
    Explicit { keys: Vec<KeyValue> },
}

impl Boundaries {
    fn count(&self) -> u32 {
        match self {
            Boundaries::Even { count, .. } => *count,
            Boundaries::Explicit { keys } => keys.len() as u32,
        }
    }

    /// Boundary `k`, 1-based.
    fn get(&self, k: u32) -> Option<KeyValue> {
        if k == 0 || k > self.count() {
            return None;
        }
        match self {
            Boundaries::Even { min, step, .. } => {
                let value = *min as i128 + k as i128 * *step as i128;
                i64::try_from(value).ok().map(KeyValue::Int)
            }
            Boundaries::Explicit { keys } => keys.get(k as usize - 1).cloned(),
        }
    }

    /// Number of boundaries `<= key`, which is the owning chunk id.
    fn rank(&self, key: &KeyValue) -> u32 {
        match self {
            Boundaries::Even { min, step, count } => match key {
                KeyValue::Int(v) => {
                    let delta = *v as i128 - *min as i128;
                    if delta < *step as i128 {
                        0
                    } else {
                        (delta / *step as i128).min(*count as i128) as u32
                    }
                }
                // Integer plans never see byte keys; park them in the first chunk
                KeyValue::Bytes(_) => 0,
            },
            Boundaries::Explicit { keys } => keys.partition_point(|b| b <= key) as u32,
        }
    }
}

/// Ordered chunk sequence for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    table: TableId,
    boundaries: Boundaries,
    reduced_parallelism: bool,
}

impl ChunkPlan {
    /// A plan with one unbounded chunk.
    pub fn single(table: TableId) -> Self {
        Self {
            table,
            boundaries: Boundaries::Explicit { keys: Vec::new() },
            reduced_parallelism: false,
        }
    }

    /// Whole-table plan for a table with no usable key.
    pub fn keyless(table: TableId) -> Self {
        Self {
            reduced_parallelism: true,
            ..Self::single(table)
        }
    }

    /// Plan from explicit boundaries; sorted and deduplicated here.
    pub fn from_boundaries(table: TableId, mut keys: Vec<KeyValue>) -> Self {
        keys.sort();
        keys.dedup();
        Self {
            table,
            boundaries: Boundaries::Explicit { keys },
            reduced_parallelism: false,
        }
    }

    fn even(table: TableId, min: i64, max: i64, step: i64) -> Self {
        let count = ((max as i128 - min as i128) / step as i128).clamp(0, u32::MAX as i128 - 1);
        Self {
            table,
            boundaries: Boundaries::Even {
                min,
                step,
                count: count as u32,
            },
            reduced_parallelism: false,
        }
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.boundaries.count() as usize + 1
    }

    /// Always false; a plan has at least one chunk.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True when the table had no usable key and is read as a single chunk.
    pub fn is_reduced_parallelism(&self) -> bool {
        self.reduced_parallelism
    }

    /// Chunk by id.
    pub fn get(&self, id: u32) -> Option<Chunk> {
        if id as usize >= self.len() {
            return None;
        }
        Some(Chunk {
            id,
            table: self.table.clone(),
            lower: self.boundaries.get(id),
            upper: self.boundaries.get(id + 1),
        })
    }

    /// Id of the chunk owning `key`; NULL keys belong to chunk 0.
    pub fn chunk_id_for(&self, key: Option<&KeyValue>) -> u32 {
        key.map(|k| self.boundaries.rank(k)).unwrap_or(0)
    }

    /// Lazily build chunks in id order.
    pub fn iter(&self) -> ChunkIter<'_> {
        ChunkIter { plan: self, next: 0 }
    }
}

/// Iterator over a [`ChunkPlan`].
pub struct ChunkIter<'a> {
    plan: &'a ChunkPlan,
    next: u32,
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let chunk = self.plan.get(self.next)?;
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.len().saturating_sub(self.next as usize);
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkIter<'_> {}

impl<'a> IntoIterator for &'a ChunkPlan {
    type Item = Chunk;
    type IntoIter = ChunkIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Splits tables into chunk plans.
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    chunk_size: usize,
    strategy: SplitStrategy,
    factor_lower: f64,
    factor_upper: f64,
    require_primary_key: bool,
}

impl ChunkSplitter {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            strategy: config.split_strategy,
            factor_lower: config.distribution_factor_lower,
            factor_upper: config.distribution_factor_upper,
            require_primary_key: config.require_primary_key,
        }
    }

    /// Build the plan for a table, querying the executor for statistics.
    ///
    /// Read-only with respect to the table.
    pub async fn plan(
        &self,
        metadata: &TableMetadata,
        executor: &dyn QueryExecutor,
    ) -> Result<ChunkPlan> {
        let Some(key_idx) = metadata.chunk_key_index() else {
            return self.keyless_plan(metadata);
        };

        let row_count = executor.estimate_row_count(&metadata.id).await?;
        if row_count <= self.chunk_size as u64 {
            debug!(table = %metadata.id, row_count, "Table fits in one chunk");
            return self.split_with(metadata, row_count, None, Vec::new());
        }

        let key_range = executor.key_range(&metadata.id, key_idx).await?;
        let samples = if self.even_range_applicable(metadata, row_count, key_range.as_ref()) {
            Vec::new()
        } else {
            let quantiles = self.quantiles(row_count);
            executor
                .sample_keys(&metadata.id, key_idx, &quantiles)
                .await?
        };

        self.split_with(metadata, row_count, key_range, samples)
    }

    /// Pure split from gathered statistics.
    ///
    /// `key_range` is the inclusive `(min, max)` of the chunk key; `samples`
    /// are percentile probes used when even ranges do not apply.
    pub fn split_with(
        &self,
        metadata: &TableMetadata,
        row_count: u64,
        key_range: Option<(KeyValue, KeyValue)>,
        samples: Vec<KeyValue>,
    ) -> Result<ChunkPlan> {
        if !metadata.has_primary_key() {
            return self.keyless_plan(metadata);
        }

        let table = metadata.id.clone();
        if row_count <= self.chunk_size as u64 {
            return Ok(ChunkPlan::single(table));
        }

        let even = self.even_range_applicable(metadata, row_count, key_range.as_ref());
        let plan = match (&key_range, even) {
            (Some((KeyValue::Int(min), KeyValue::Int(max))), true) => {
                let step = self.even_step(*min, *max, row_count);
                ChunkPlan::even(table, *min, *max, step)
            }
            _ => {
                let mut keys = samples;
                if let Some((min, _)) = &key_range {
                    // A boundary at or below the minimum only adds an empty chunk
                    keys.retain(|k| k > min);
                }
                ChunkPlan::from_boundaries(table, keys)
            }
        };

        info!(
            table = %metadata.id,
            row_count,
            chunks = plan.len(),
            even = matches!(plan.boundaries, Boundaries::Even { .. }),
            "Chunk plan built"
        );
        Ok(plan)
    }

    fn keyless_plan(&self, metadata: &TableMetadata) -> Result<ChunkPlan> {
        if self.require_primary_key {
            return Err(CdcError::config(format!(
                "table {} has no primary key and parallel snapshotting requires one",
                metadata.id
            )));
        }
        warn!(
            table = %metadata.id,
            "Table has no primary key; snapshotting as a single chunk with reduced parallelism"
        );
        Ok(ChunkPlan::keyless(metadata.id.clone()))
    }

    fn even_range_applicable(
        &self,
        metadata: &TableMetadata,
        row_count: u64,
        key_range: Option<&(KeyValue, KeyValue)>,
    ) -> bool {
        let integer_key = matches!(
            metadata.chunk_key_column().map(|c| c.column_type),
            Some(ColumnType::Integer)
        );
        let Some((KeyValue::Int(min), KeyValue::Int(max))) = key_range else {
            return false;
        };
        if !integer_key || max < min {
            return false;
        }
        match self.strategy {
            SplitStrategy::Sampled => false,
            SplitStrategy::EvenRange => true,
            SplitStrategy::Auto => {
                let factor = distribution_factor(*min, *max, row_count);
                factor >= self.factor_lower && factor <= self.factor_upper
            }
        }
    }

    /// Key width per chunk: `chunk_size` scaled by the distribution factor.
    fn even_step(&self, min: i64, max: i64, row_count: u64) -> i64 {
        let factor = distribution_factor(min, max, row_count);
        let step = (self.chunk_size as f64 * factor).round();
        if step >= i64::MAX as f64 {
            i64::MAX
        } else {
            (step as i64).max(1)
        }
    }

    /// Evenly spaced probes yielding roughly `chunk_size` rows between them.
    fn quantiles(&self, row_count: u64) -> Vec<f64> {
        let chunks = row_count.div_ceil(self.chunk_size as u64).max(1);
        (1..chunks).map(|i| i as f64 / chunks as f64).collect()
    }
}

fn distribution_factor(min: i64, max: i64, row_count: u64) -> f64 {
    if row_count == 0 {
        return f64::MAX;
    }
    (max as f64 - min as f64 + 1.0) / row_count as f64
}
