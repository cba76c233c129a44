//! Range reconciliation: which parts of a requested window are already cached.
//!
//! Given the window a backtest needs and the windows of the slices on disk,
//! split the request into the slices worth loading and the gaps that must
//! be fetched. Covered pieces and gaps tile the request exactly, so the
//! store never downloads the same span twice.

use crate::domain::TimeRange;

/// Outcome of reconciling one request against the cached slices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Cached ranges that intersect the request, unmodified and in input order.
    pub used: Vec<TimeRange>,
    /// Intersections of `used` with the request, merged into disjoint ascending ranges.
    pub covered: Vec<TimeRange>,
    /// Gaps of the request not covered by any cached range, ascending.
    pub missing: Vec<TimeRange>,
}

impl Reconciliation {
    /// True when nothing needs to be fetched.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Split `requested` into cached coverage and missing gaps.
///
/// Two covered intervals merge when they overlap or touch. With no overlapping
/// cache at all the whole request is missing. Never fails.
pub fn reconcile(requested: TimeRange, cached: &[TimeRange]) -> Reconciliation {
    let mut used = Vec::new();
    let mut positive = Vec::new();

    for range in cached {
        if let Some(hit) = requested.intersection(range) {
            used.push(*range);
            positive.push(hit);
        }
    }

    positive.sort_by_key(|r| r.start());

    let mut covered: Vec<TimeRange> = Vec::with_capacity(positive.len());
    for range in positive {
        if let Some(last) = covered.last_mut() {
            if last.intersection(&range).is_some() {
                *last = last.span(&range);
                continue;
            }
        }
        covered.push(range);
    }

    let (first, last) = match (covered.first(), covered.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => {
            return Reconciliation {
                used,
                covered,
                missing: vec![requested],
            }
        }
    };

    let mut missing = Vec::new();
    if first.start() > requested.start() {
        missing.push(TimeRange::new(requested.start(), first.start()));
    }
    for pair in covered.windows(2) {
        missing.push(TimeRange::new(pair[0].end(), pair[1].start()));
    }
    if last.end() < requested.end() {
        missing.push(TimeRange::new(last.end(), requested.end()));
    }

    Reconciliation {
        used,
        covered,
        missing,
    }
}
