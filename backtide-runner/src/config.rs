//! Backtest settings, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use backtide_core::domain::{parse_interval, IntervalError, PriceField};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid interval in settings: {0}")]
    Interval(#[from] IntervalError),
}

/// An interval given either as seconds or as a string like `1d`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntervalSetting {
    Seconds(i64),
    Text(String),
}

impl IntervalSetting {
    pub fn seconds(&self) -> Result<i64, IntervalError> {
        match self {
            IntervalSetting::Seconds(s) if *s > 0 => Ok(*s),
            IntervalSetting::Seconds(s) => Err(IntervalError::NonPositive(s.to_string())),
            IntervalSetting::Text(text) => parse_interval(text),
        }
    }
}

impl From<i64> for IntervalSetting {
    fn from(seconds: i64) -> Self {
        IntervalSetting::Seconds(seconds)
    }
}

impl From<&str> for IntervalSetting {
    fn from(text: &str) -> Self {
        IntervalSetting::Text(text.to_string())
    }
}

impl fmt::Display for IntervalSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalSetting::Seconds(s) => write!(f, "{s}"),
            IntervalSetting::Text(text) => write!(f, "{text}"),
        }
    }
}

/// Settings consumed by a backtest run. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    /// Directory holding cached price slices. Created on first use.
    pub cache_location: PathBuf,

    /// Persist freshly fetched ranges to the cache.
    pub continuous_caching: bool,

    /// Currency all valuations are expressed in.
    pub quote_account_value_in: String,

    /// Symbol priced alongside the strategy for comparison.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark_symbol: Option<String>,

    /// Bar field fed to scalar price events.
    pub use_price: PriceField,

    /// Report every traded asset, not only those whose holdings changed.
    pub show_tickers_with_zero_delta: bool,

    /// Grid the account value is resampled onto before metrics.
    pub resample_account_value_for_metrics: IntervalSetting,

    /// Annual risk-free rate used by Sharpe and Sortino.
    pub risk_free_return_rate: f64,

    /// Log handler errors and keep going instead of ending the loop.
    pub ignore_user_exceptions: bool,

    /// Log progress every 10% of the tick stream.
    pub show_progress_during_backtest: bool,

    /// Record a valuation row at the first timestamp before any tick.
    pub save_initial_account_value: bool,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            cache_location: PathBuf::from("./price_caches"),
            continuous_caching: true,
            quote_account_value_in: "USD".to_string(),
            benchmark_symbol: None,
            use_price: PriceField::Close,
            show_tickers_with_zero_delta: false,
            resample_account_value_for_metrics: IntervalSetting::Text("1d".to_string()),
            risk_free_return_rate: 0.0,
            ignore_user_exceptions: false,
            show_progress_during_backtest: true,
            save_initial_account_value: true,
        }
    }
}

impl BacktestSettings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string and check the resample interval.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)?;
        settings.resample_interval_seconds()?;
        Ok(settings)
    }

    pub fn resample_interval_seconds(&self) -> Result<i64, ConfigError> {
        Ok(self.resample_account_value_for_metrics.seconds()?)
    }
}
