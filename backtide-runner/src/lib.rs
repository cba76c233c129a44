//! Backtide Runner: backtest orchestration, settings, results, metrics.
//!
//! This crate builds on `backtide-core` to provide:
//! - `BacktestRunner`: cache sync, timeline replay, event firing and valuation
//! - `BacktestSettings` loaded from TOML
//! - `BacktestResult` with resampled account value, returns and benchmark
//! - The `MetricsEngine` trait and a standard risk-metric implementation

pub mod config;
pub mod metrics;
pub mod result;
pub mod runner;

pub use config::{BacktestSettings, ConfigError, IntervalSetting};
pub use metrics::{MetricValue, MetricsEngine, MetricsInput, StandardMetrics};
pub use result::{BacktestResult, ReturnPoint, ValuePoint};
pub use runner::{BacktestRunner, PriceRequest, ResultCallback, RunError};
