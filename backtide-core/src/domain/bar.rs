//! Bar, Tick and the keys that identify a cached price stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::data::DataError;

/// One OHLCV candle starting at `time` and covering `[time, time + resolution)`.
///
/// Field names match the CSV header of cached slices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Read the configured price field.
    pub fn price(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
        }
    }

    pub fn ohlcv(&self) -> Ohlcv {
        Ohlcv {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Which column of a bar drives the simulated price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceField {
    Open,
    High,
    Low,
    #[default]
    Close,
}

impl FromStr for PriceField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(PriceField::Open),
            "high" => Ok(PriceField::High),
            "low" => Ok(PriceField::Low),
            "close" => Ok(PriceField::Close),
            other => Err(format!("unknown price field '{other}'")),
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Close => "close",
        };
        f.write_str(name)
    }
}

/// OHLCV payload handed to handlers that asked for full candles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Identifies one logical price stream: an asset at a bar resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    asset_id: String,
    resolution: i64,
}

impl CacheKey {
    pub fn new(asset_id: impl Into<String>, resolution: i64) -> Result<Self, DataError> {
        if resolution <= 0 {
            return Err(DataError::InvalidResolution(resolution));
        }
        Ok(Self {
            asset_id: asset_id.into(),
            resolution,
        })
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    /// Bar width in seconds, always positive.
    pub fn resolution(&self) -> i64 {
        self.resolution
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}s", self.asset_id, self.resolution)
    }
}

/// One entry of the merged replay stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub time: i64,
    pub asset: String,
    /// Value of the configured `use_price` field.
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Tick {
    pub fn from_bar(asset: &str, bar: &Bar, field: PriceField) -> Self {
        Self {
            time: bar.time,
            asset: asset.to_string(),
            price: bar.price(field),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }

    pub fn ohlcv(&self) -> Ohlcv {
        Ohlcv {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}
