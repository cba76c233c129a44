//! Risk metrics over the resampled account value.
//!
//! The runner only depends on the `MetricsEngine` trait. `StandardMetrics`
//! computes the usual set from per-period returns, annualized by the number
//! of resample periods in a 365-day year. Every metric is computed on its own:
//! one failing never hides the others.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use backtide_core::valuation::AccountSnapshot;

use crate::result::{ReturnPoint, ValuePoint};

const SECONDS_PER_YEAR: f64 = 31_536_000.0;

/// Outcome of one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    /// Not enough data to compute.
    Missing,
    Failed(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            _ => None,
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Number(v) => serializer.serialize_f64(*v),
            MetricValue::Missing => serializer.serialize_none(),
            MetricValue::Failed(reason) => serializer.serialize_str(&format!("failed: {reason}")),
        }
    }
}

/// What a metrics engine sees of a finished run.
#[derive(Debug, Clone, Copy)]
pub struct MetricsInput<'a> {
    pub history: &'a [AccountSnapshot],
    pub resampled_account_value: &'a [ValuePoint],
    pub returns: &'a [ReturnPoint],
    pub benchmark_value: Option<&'a [ValuePoint]>,
    pub benchmark_returns: Option<&'a [ReturnPoint]>,
}

pub trait MetricsEngine {
    fn compute(
        &self,
        input: &MetricsInput<'_>,
        resample_interval_seconds: i64,
        risk_free_rate: f64,
    ) -> BTreeMap<String, MetricValue>;
}

/// Cumulative return, CAGR, drawdown, Sharpe, Sortino, Calmar, volatility,
/// VaR/CVaR at 95% and, with a benchmark, beta.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMetrics;

impl MetricsEngine for StandardMetrics {
    fn compute(
        &self,
        input: &MetricsInput<'_>,
        resample_interval_seconds: i64,
        risk_free_rate: f64,
    ) -> BTreeMap<String, MetricValue> {
        let values = input.resampled_account_value;
        let returns = present(input.returns);
        let periods = periods_per_year(resample_interval_seconds);

        let mut out = BTreeMap::new();
        let mut put = |name: &str, value: Result<Option<f64>, String>| {
            let metric = match value {
                Ok(Some(v)) if v.is_finite() => MetricValue::Number(v),
                Ok(Some(v)) => MetricValue::Failed(format!("non-finite result {v}")),
                Ok(None) => MetricValue::Missing,
                Err(reason) => MetricValue::Failed(reason),
            };
            out.insert(name.to_string(), metric);
        };

        put("cumulative_return", cumulative_return(values));
        put("cagr", cagr(values));
        put("max_drawdown", Ok(max_drawdown(values)));
        put("variance", Ok(variance(&returns)));
        put("volatility", Ok(variance(&returns).map(|v| (v * periods).sqrt())));
        put("sharpe", Ok(sharpe_ratio(&returns, risk_free_rate, periods)));
        put("sortino", Ok(sortino_ratio(&returns, risk_free_rate, periods)));
        put("calmar", calmar_ratio(values));
        put("value_at_risk", Ok(value_at_risk_95(&returns)));
        put("conditional_value_at_risk", Ok(cvar_95(&returns)));

        if let Some(benchmark) = input.benchmark_returns {
            put("beta", Ok(beta(input.returns, benchmark)));
        }
        out
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Resample periods in a 365-day year.
pub fn periods_per_year(resample_interval_seconds: i64) -> f64 {
    SECONDS_PER_YEAR / resample_interval_seconds.max(1) as f64
}

/// (final - initial) / initial.
pub fn cumulative_return(values: &[ValuePoint]) -> Result<Option<f64>, String> {
    let (Some(first), Some(last)) = (values.first(), values.last()) else {
        return Ok(None);
    };
    if first.value == 0.0 {
        return Err("starting account value is zero".to_string());
    }
    Ok(Some((last.value - first.value) / first.value))
}

/// Compound annual growth over the wall-clock span of the series.
pub fn cagr(values: &[ValuePoint]) -> Result<Option<f64>, String> {
    let (Some(first), Some(last)) = (values.first(), values.last()) else {
        return Ok(None);
    };
    let years = (last.time - first.time) as f64 / SECONDS_PER_YEAR;
    if years <= 0.0 {
        return Ok(None);
    }
    if first.value <= 0.0 || last.value <= 0.0 {
        return Err("account value must stay positive".to_string());
    }
    Ok(Some((last.value / first.value).powf(1.0 / years) - 1.0))
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(values: &[ValuePoint]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mut peak = values[0].value;
    let mut max_dd = 0.0_f64;
    for point in values {
        peak = peak.max(point.value);
        if peak > 0.0 {
            max_dd = max_dd.min((point.value - peak) / peak);
        }
    }
    Some(max_dd)
}

/// Sample variance of period returns.
pub fn variance(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let mean = mean_f64(returns);
    Some(returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64)
}

/// Annualized Sharpe ratio. `None` with fewer than two returns or zero variance.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64, periods: f64) -> Option<f64> {
    let per_period_rf = risk_free_rate / periods;
    let excess: Vec<f64> = returns.iter().map(|r| r - per_period_rf).collect();
    let std = variance(&excess)?.sqrt();
    if std < 1e-15 {
        return None;
    }
    Some(mean_f64(&excess) / std * periods.sqrt())
}

/// Annualized Sortino ratio (downside deviation only).
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64, periods: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let per_period_rf = risk_free_rate / periods;
    let excess: Vec<f64> = returns.iter().map(|r| r - per_period_rf).collect();
    let downside_sq: f64 = excess.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
    let downside_std = (downside_sq / excess.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return None;
    }
    Some(mean_f64(&excess) / downside_std * periods.sqrt())
}

/// CAGR / |max_drawdown|.
pub fn calmar_ratio(values: &[ValuePoint]) -> Result<Option<f64>, String> {
    let growth = cagr(values)?;
    Ok(match (growth, max_drawdown(values)) {
        (Some(c), Some(dd)) if dd < 0.0 => Some(c / dd.abs()),
        _ => None,
    })
}

/// Historical 95% value at risk: the 5th percentile period return.
pub fn value_at_risk_95(returns: &[f64]) -> Option<f64> {
    let sorted = sorted(returns)?;
    let index = ((sorted.len() as f64 * 0.05).ceil() as usize).max(1) - 1;
    Some(sorted[index])
}

/// Mean of the worst 5% of period returns.
pub fn cvar_95(returns: &[f64]) -> Option<f64> {
    let sorted = sorted(returns)?;
    let cutoff = ((sorted.len() as f64 * 0.05).ceil() as usize).max(1);
    Some(mean_f64(&sorted[..cutoff]))
}

/// Covariance with the benchmark over its variance, on periods both have.
pub fn beta(returns: &[ReturnPoint], benchmark: &[ReturnPoint]) -> Option<f64> {
    let by_time: BTreeMap<i64, f64> = benchmark
        .iter()
        .filter_map(|p| p.value.map(|v| (p.time, v)))
        .collect();
    let pairs: Vec<(f64, f64)> = returns
        .iter()
        .filter_map(|p| Some((p.value?, *by_time.get(&p.time)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let mean_a = pairs.iter().map(|(a, _)| a).sum::<f64>() / pairs.len() as f64;
    let mean_b = pairs.iter().map(|(_, b)| b).sum::<f64>() / pairs.len() as f64;
    let cov: f64 = pairs.iter().map(|(a, b)| (a - mean_a) * (b - mean_b)).sum();
    let var: f64 = pairs.iter().map(|(_, b)| (b - mean_b).powi(2)).sum();
    if var < 1e-15 {
        return None;
    }
    Some(cov / var)
}

// ─── Helpers ────────────────────────────────────────────────────────

fn present(returns: &[ReturnPoint]) -> Vec<f64> {
    returns.iter().filter_map(|r| r.value).collect()
}

fn sorted(returns: &[f64]) -> Option<Vec<f64>> {
    if returns.is_empty() {
        return None;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(sorted)
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
