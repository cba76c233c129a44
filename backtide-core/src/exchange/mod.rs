//! The exchange collaborator.
//!
//! The backtest core never executes orders itself. It pushes prices and time
//! into an `Exchange` and reads balances back out. Anything that can serve
//! history, hold balances and quote prices can be driven by the runner.

pub mod sandbox;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::data::HistoryProvider;

pub use sandbox::SandboxExchange;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("no price available for {0}")]
    NoPrice(String),

    #[error("insufficient funds in {asset}: need {needed}, have {available}")]
    InsufficientFunds {
        asset: String,
        needed: f64,
        available: f64,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("exchange request failed: {0}")]
    Request(String),
}

/// Whether an exchange simulates fills or routes to a real venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Paper,
    Live,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Paper => write!(f, "paper"),
            ExchangeKind::Live => write!(f, "live"),
        }
    }
}

/// Balance of one asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub available: f64,
    pub hold: f64,
}

impl Balance {
    pub fn new(available: f64, hold: f64) -> Self {
        Self { available, hold }
    }

    /// `available + hold`
    pub fn total(&self) -> f64 {
        self.available + self.hold
    }
}

/// Balances keyed by asset.
pub type Accounts = BTreeMap<String, Balance>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: f64,
    /// Fill or limit price; `None` for an unfilled market order.
    pub price: Option<f64>,
    pub time: i64,
}

/// Order books an exchange keeps over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderLedgers {
    pub created: Vec<OrderRecord>,
    pub limits_executed: Vec<OrderRecord>,
    pub limits_canceled: Vec<OrderRecord>,
    pub executed_market_orders: Vec<OrderRecord>,
}

/// Contract the backtest runner drives.
///
/// The runner owns the exchange for the whole run and calls it from one
/// thread. `set_backtesting(true)` is called before the first tick and
/// `set_backtesting(false)` on every exit path after that.
pub trait Exchange: HistoryProvider {
    fn kind(&self) -> ExchangeKind;

    /// Whether prices are quoted as `BASE-QUOTE` pairs.
    fn uses_pair_symbols(&self) -> bool {
        true
    }

    fn get_account(&self) -> Result<Accounts, ExchangeError>;

    fn get_asset_account(&self, asset: &str) -> Result<Balance, ExchangeError>;

    fn get_price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    fn receive_price(&mut self, symbol: &str, price: f64);

    fn receive_time(&mut self, time: i64);

    /// Match resting limit orders against the latest prices.
    fn evaluate_limits(&mut self);

    /// Refresh the set of assets the exchange considers traded.
    fn evaluate_traded_account_assets(&mut self);

    fn traded_assets(&self) -> Vec<String>;

    fn override_local_account(&mut self, accounts: Accounts);

    fn set_backtesting(&mut self, enabled: bool);

    fn time(&self) -> i64;

    fn ledgers(&self) -> OrderLedgers;
}
