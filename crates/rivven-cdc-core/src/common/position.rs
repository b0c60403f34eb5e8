//! Log positions and watermarks
//!
//! A [`LogPosition`] is the totally ordered offset of a record in the change
//! log. A [`Watermark`] is a position captured at a protocol point; it is a
//! fence and is only ever compared by position, never by wall-clock time.

use crate::common::{CdcError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset of a record in the change log.
///
/// Position `n` names the `n`-th record; [`LogPosition::ORIGIN`] is the point
/// before any record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogPosition(u64);

impl LogPosition {
    /// The position before the first record.
    pub const ORIGIN: LogPosition = LogPosition(0);

    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub const fn offset(&self) -> u64 {
        self.0
    }

    /// The position right after this one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for LogPosition {
    fn from(offset: u64) -> Self {
        Self(offset)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A log position captured as a consistency fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub position: LogPosition,
    /// Diagnostic only
    pub captured_at: DateTime<Utc>,
}

impl Watermark {
    pub fn new(position: LogPosition) -> Self {
        Self {
            position,
            captured_at: Utc::now(),
        }
    }
}

/// The low/high fence pair bracketing one chunk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkPair {
    pub low: Watermark,
    pub high: Watermark,
}

impl WatermarkPair {
    /// Pair two watermarks, rejecting a high fence below the low fence.
    pub fn new(low: Watermark, high: Watermark) -> Result<Self> {
        if high.position < low.position {
            return Err(CdcError::consistency(format!(
                "high watermark {} is below low watermark {}",
                high.position, low.position
            )));
        }
        Ok(Self { low, high })
    }

    /// Whether `position` lies in the half-open window `(low, high]`.
    pub fn covers(&self, position: LogPosition) -> bool {
        position > self.low.position && position <= self.high.position
    }

    /// Number of log positions inside the window.
    pub fn width(&self) -> u64 {
        self.high.position.offset() - self.low.position.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_ordering() {
        assert!(LogPosition::new(3) < LogPosition::new(4));
        assert_eq!(LogPosition::ORIGIN.next(), LogPosition::new(1));
        assert_eq!(LogPosition::new(42).to_string(), "42");
    }

    #[test]
    fn test_pair_rejects_inverted_fences() {
        let low = Watermark::new(LogPosition::new(10));
        let high = Watermark::new(LogPosition::new(9));
        let err = WatermarkPair::new(low, high).unwrap_err();
        assert!(matches!(err, CdcError::ConsistencyViolation(_)));
    }

    #[test]
    fn test_pair_window_is_half_open() {
        let pair = WatermarkPair::new(
            Watermark::new(LogPosition::new(5)),
            Watermark::new(LogPosition::new(8)),
        )
        .unwrap();

        assert!(!pair.covers(LogPosition::new(5)));
        assert!(pair.covers(LogPosition::new(6)));
        assert!(pair.covers(LogPosition::new(8)));
        assert!(!pair.covers(LogPosition::new(9)));
        assert_eq!(pair.width(), 3);
    }

    #[test]
    fn test_position_serializes_as_number() {
        let json = serde_json::to_string(&LogPosition::new(17)).unwrap();
        assert_eq!(json, "17");
    }
}
