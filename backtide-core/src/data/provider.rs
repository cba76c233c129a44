//! History provider trait and structured data errors.
//!
//! The store sits above this trait: providers fetch bars for a window and
//! know nothing about the on-disk cache.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::Bar;
use crate::exchange::ExchangeError;

/// Structured error types for cache and timeline operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error(
        "malformed cache file '{}': expected '{{asset}},{{start}},{{end}},{{resolution}}.csv' \
         (remove it from the price cache or rename it to match)",
        .file.display()
    )]
    MalformedCacheName { file: PathBuf },

    #[error("requested window [{start}, {end}) is shorter than one {resolution}s bar")]
    WindowTooShort { start: i64, end: i64, resolution: i64 },

    #[error("resolution must be positive, got {0}")]
    InvalidResolution(i64),

    #[error(
        "no cached or downloaded data available; request a longer window or clear the price cache"
    )]
    Unavailable,

    #[error("fetching {asset} [{start}, {end}] at {resolution}s failed: {source}")]
    Fetch {
        asset: String,
        start: i64,
        end: i64,
        resolution: i64,
        #[source]
        source: ExchangeError,
    },

    #[error("cache I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache CSV error in '{}': {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Source of historical bars, normally the exchange collaborator.
pub trait HistoryProvider {
    /// Fetch bars for `asset` with `start <= time <= end` at `resolution` seconds.
    fn get_product_history(
        &mut self,
        asset: &str,
        start: i64,
        end: i64,
        resolution: i64,
    ) -> Result<Vec<Bar>, ExchangeError>;
}
