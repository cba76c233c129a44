//! Backtest result packaging: resampling, returns and the dataset hash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use backtide_core::data::Timeline;
use backtide_core::domain::Bar;
use backtide_core::exchange::OrderLedgers;
use backtide_core::valuation::AccountSnapshot;

use crate::metrics::{MetricValue, MetricsInput};

/// A value at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuePoint {
    pub time: i64,
    pub value: f64,
}

/// Period return ending at `time`. The first period has none.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnPoint {
    pub time: i64,
    pub value: Option<f64>,
}

/// Current schema version for persisted results.
pub const SCHEMA_VERSION: u32 = 1;

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub schema_version: u32,
    /// Traded account valuation at every firing.
    pub history: Vec<AccountSnapshot>,
    /// Valuation had no orders ever been placed.
    pub no_trade_history: Vec<AccountSnapshot>,
    /// Bars replayed per asset.
    pub price_data: BTreeMap<String, Vec<Bar>>,
    pub ledgers: OrderLedgers,
    pub start_time: i64,
    pub stop_time: i64,
    pub quote_currency: String,
    pub resample_interval_seconds: i64,
    pub resampled_account_value: Vec<ValuePoint>,
    pub returns: Vec<ReturnPoint>,
    pub benchmark_value: Option<Vec<ValuePoint>>,
    pub benchmark_returns: Option<Vec<ReturnPoint>>,
    pub metrics: BTreeMap<String, MetricValue>,
    /// Output of post-run callbacks, by name.
    pub callbacks: BTreeMap<String, serde_json::Value>,
    /// Error that ended the replay early, if any.
    pub failure: Option<String>,
    /// BLAKE3 hex digest of the replayed tick stream.
    pub dataset_hash: String,
    /// Assets shown in reports.
    pub reported_assets: Vec<String>,
}

impl BacktestResult {
    /// Traded valuation as `(time, value)` points.
    pub fn account_values(&self) -> Vec<ValuePoint> {
        values_of(&self.history)
    }

    pub fn no_trade_values(&self) -> Vec<ValuePoint> {
        values_of(&self.no_trade_history)
    }

    pub fn final_value(&self) -> Option<f64> {
        self.history.last().map(|s| s.valuation)
    }

    /// True if the replay ended without an error.
    pub fn completed(&self) -> bool {
        self.failure.is_none()
    }

    /// Borrowed view handed to metrics engines and result callbacks.
    pub fn metrics_input(&self) -> MetricsInput<'_> {
        MetricsInput {
            history: &self.history,
            resampled_account_value: &self.resampled_account_value,
            returns: &self.returns,
            benchmark_value: self.benchmark_value.as_deref(),
            benchmark_returns: self.benchmark_returns.as_deref(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the result as JSON, atomically (tmp file + rename).
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    }
}

pub(crate) fn values_of(snapshots: &[AccountSnapshot]) -> Vec<ValuePoint> {
    snapshots
        .iter()
        .map(|s| ValuePoint {
            time: s.time,
            value: s.valuation,
        })
        .collect()
}

/// Resample `points` onto `start, start + interval, ..` up to `end`.
///
/// Each grid point takes the last sample at or before it. Grid points before
/// the first sample are dropped. `points` must be sorted by time.
pub fn resample_onto(points: &[ValuePoint], start: i64, end: i64, interval: i64) -> Vec<ValuePoint> {
    if points.is_empty() || interval <= 0 || end < start {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut cursor = 0;
    let mut current: Option<f64> = None;
    let mut grid = start;
    while grid <= end {
        while cursor < points.len() && points[cursor].time <= grid {
            current = Some(points[cursor].value);
            cursor += 1;
        }
        if let Some(value) = current {
            out.push(ValuePoint { time: grid, value });
        }
        grid += interval;
    }
    out
}

/// Resample over the span of the samples themselves.
pub fn resample(points: &[ValuePoint], interval: i64) -> Vec<ValuePoint> {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) => resample_onto(points, first.time, last.time, interval),
        _ => Vec::new(),
    }
}

/// Fractional change between consecutive points; the first is `None`.
pub fn pct_returns(points: &[ValuePoint]) -> Vec<ReturnPoint> {
    let mut out = Vec::with_capacity(points.len());
    let mut previous: Option<f64> = None;
    for point in points {
        let value = match previous {
            Some(prev) if prev != 0.0 => Some((point.value - prev) / prev),
            Some(_) => None,
            None => None,
        };
        out.push(ReturnPoint {
            time: point.time,
            value,
        });
        previous = Some(point.value);
    }
    out
}

/// Digest of the tick stream: time, asset and price of every tick in order.
pub fn dataset_hash(timeline: &Timeline) -> String {
    let mut hasher = blake3::Hasher::new();
    for tick in timeline {
        hasher.update(&tick.time.to_le_bytes());
        hasher.update(tick.asset.as_bytes());
        hasher.update(&[0]);
        hasher.update(&tick.price.to_bits().to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Assets whose holdings differ between the first and last snapshot.
pub fn changed_assets(history: &[AccountSnapshot]) -> Vec<String> {
    let (Some(first), Some(last)) = (history.first(), history.last()) else {
        return Vec::new();
    };
    last.per_asset_available
        .iter()
        .filter(|(asset, amount)| {
            first
                .per_asset_available
                .get(*asset)
                .map_or(**amount != 0.0, |before| before != *amount)
        })
        .map(|(asset, _)| asset.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(time: i64, value: f64) -> ValuePoint {
        ValuePoint { time, value }
    }

    #[test]
    fn resample_takes_last_sample_at_or_before_grid() {
        let points = vec![p(0, 1.0), p(30, 2.0), p(50, 3.0), p(130, 4.0)];
        let out = resample(&points, 60);
        assert_eq!(out, vec![p(0, 1.0), p(60, 3.0), p(120, 3.0)]);
    }

    #[test]
    fn resample_onto_skips_grid_before_data() {
        let points = vec![p(100, 5.0), p(200, 6.0)];
        let out = resample_onto(&points, 0, 200, 100);
        assert_eq!(out, vec![p(100, 5.0), p(200, 6.0)]);
    }

    #[test]
    fn resample_empty() {
        assert!(resample(&[], 60).is_empty());
    }

    #[test]
    fn returns_are_fractional_changes() {
        let returns = pct_returns(&[p(0, 100.0), p(60, 110.0), p(120, 99.0)]);
        assert_eq!(returns[0].value, None);
        assert!((returns[1].value.unwrap() - 0.10).abs() < 1e-12);
        assert!((returns[2].value.unwrap() + 0.10).abs() < 1e-12);
    }

    #[test]
    fn return_after_zero_is_none() {
        let returns = pct_returns(&[p(0, 0.0), p(60, 10.0)]);
        assert_eq!(returns[1].value, None);
    }

    #[test]
    fn changed_assets_compares_first_and_last() {
        let snap = |time: i64, btc: f64, usd: f64| AccountSnapshot {
            time,
            valuation: 0.0,
            per_asset_available: [("BTC".to_string(), btc), ("USD".to_string(), usd)]
                .into_iter()
                .collect(),
        };
        let history = vec![snap(0, 0.0, 100.0), snap(60, 1.0, 100.0)];
        assert_eq!(changed_assets(&history), vec!["BTC".to_string()]);
        assert!(changed_assets(&[]).is_empty());
    }
}
