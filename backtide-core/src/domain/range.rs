//! TimeRange: a half-open `[start, end)` window in epoch seconds.

use serde::Serialize;
use std::fmt;

/// Half-open window of epoch seconds. Always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimeRange {
    start: i64,
    end: i64,
}

impl TimeRange {
    /// Build a range from two bounds, swapping them if given in reverse.
    pub fn new(start: i64, end: i64) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Width in seconds.
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Intersection of two ranges, treating both bounds as closed.
    ///
    /// Ranges that only touch (`a.end == b.start`) intersect in a zero-width
    /// range rather than `None`; the cache reconciler relies on this to merge
    /// adjacent slices.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        if other.start > self.end || self.start > other.end {
            return None;
        }
        Some(TimeRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Smallest range covering both.
    pub fn span(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
