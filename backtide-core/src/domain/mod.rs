//! Domain types shared by the data pipeline, scheduler and valuation.

pub mod bar;
pub mod interval;
pub mod range;
pub mod symbol;

pub use bar::{Bar, CacheKey, Ohlcv, PriceField, Tick};
pub use interval::{parse_interval, IntervalError};
pub use range::TimeRange;
pub use symbol::{base_asset, pair_symbol, quote_asset};
