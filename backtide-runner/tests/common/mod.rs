//! Shared fixtures for runner integration tests.

#![allow(dead_code)]

use std::path::Path;

use backtide_core::domain::Bar;
use backtide_core::exchange::SandboxExchange;
use backtide_runner::{BacktestRunner, BacktestSettings};

pub const START: i64 = 1_700_000_040;
pub const RES: i64 = 60;

/// `count` one-minute bars from `START`, close rising by one per bar.
pub fn rising_bars(base: f64, count: usize) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let close = base + i as f64;
            Bar {
                time: START + i as i64 * RES,
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0,
            }
        })
        .collect()
}

/// End of a request covering `count` bars from `START`.
pub fn end_for(count: usize) -> i64 {
    START + count as i64 * RES
}

pub fn settings(cache: &Path) -> BacktestSettings {
    BacktestSettings {
        cache_location: cache.to_path_buf(),
        show_progress_during_backtest: false,
        ..BacktestSettings::default()
    }
}

/// Sandbox with 100 BTC-USD bars starting at 100 and 10k USD.
pub fn btc_exchange() -> SandboxExchange {
    SandboxExchange::new()
        .with_history("BTC-USD", rising_bars(100.0, 100))
        .with_balance("USD", 10_000.0)
}

/// Runner over `btc_exchange()` with BTC-USD requested.
pub fn btc_runner(settings: BacktestSettings) -> BacktestRunner<SandboxExchange> {
    let mut runner = BacktestRunner::new(btc_exchange(), settings).unwrap();
    runner.add_prices("BTC-USD", START, end_for(100), RES).unwrap();
    runner
}
