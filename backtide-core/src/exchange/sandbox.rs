//! In-memory paper exchange for tests and offline runs.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{
    Accounts, Balance, Exchange, ExchangeError, ExchangeKind, OrderLedgers, OrderRecord,
    OrderSide,
};
use crate::data::HistoryProvider;
use crate::domain::{base_asset, quote_asset, Bar};

/// Preloaded history, last prices and balances, with immediate market fills.
///
/// There is no order book: market orders fill at the last received price and
/// `evaluate_limits` does nothing.
#[derive(Debug, Clone)]
pub struct SandboxExchange {
    kind: ExchangeKind,
    pair_symbols: bool,
    cash_asset: String,
    history: BTreeMap<String, Vec<Bar>>,
    fetch_failure: Option<String>,
    fetch_count: usize,
    prices: BTreeMap<String, f64>,
    accounts: Accounts,
    traded: BTreeSet<String>,
    backtesting: bool,
    time: i64,
    ledgers: OrderLedgers,
    next_order_id: u64,
}

impl Default for SandboxExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxExchange {
    pub fn new() -> Self {
        Self {
            kind: ExchangeKind::Paper,
            pair_symbols: true,
            cash_asset: "USD".to_string(),
            history: BTreeMap::new(),
            fetch_failure: None,
            fetch_count: 0,
            prices: BTreeMap::new(),
            accounts: Accounts::new(),
            traded: BTreeSet::new(),
            backtesting: false,
            time: 0,
            ledgers: OrderLedgers::default(),
            next_order_id: 1,
        }
    }

    pub fn with_kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Quote prices by bare asset (`AAPL`) and settle trades in `cash_asset`.
    pub fn with_plain_symbols(mut self, cash_asset: &str) -> Self {
        self.pair_symbols = false;
        self.cash_asset = cash_asset.to_string();
        self
    }

    pub fn with_history(mut self, symbol: &str, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.time);
        self.history.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_balance(mut self, asset: &str, available: f64) -> Self {
        self.set_balance(asset, Balance::new(available, 0.0));
        self
    }

    /// Every subsequent history request fails with `ExchangeError::Request`.
    pub fn with_fetch_failure(mut self, message: &str) -> Self {
        self.fetch_failure = Some(message.to_string());
        self
    }

    pub fn set_balance(&mut self, asset: &str, balance: Balance) {
        self.accounts.insert(asset.to_string(), balance);
    }

    /// Number of `get_product_history` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    pub fn is_backtesting(&self) -> bool {
        self.backtesting
    }

    /// Fill `size` units of `symbol` at the last received price.
    pub fn market_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        size: f64,
    ) -> Result<OrderRecord, ExchangeError> {
        let price = self.get_price(symbol)?;
        let (base, quote) = self.settlement_assets(symbol)?;
        let cost = size * price;

        let (pay_asset, pay_amount, get_asset, get_amount) = match side {
            OrderSide::Buy => (quote, cost, base, size),
            OrderSide::Sell => (base, size, quote, cost),
        };

        let available = self.accounts.get(&pay_asset).map_or(0.0, |b| b.available);
        if available < pay_amount {
            return Err(ExchangeError::InsufficientFunds {
                asset: pay_asset,
                needed: pay_amount,
                available,
            });
        }

        self.accounts.entry(pay_asset.clone()).or_default().available -= pay_amount;
        self.accounts.entry(get_asset.clone()).or_default().available += get_amount;
        self.traded.insert(pay_asset);
        self.traded.insert(get_asset);

        let record = OrderRecord {
            id: format!("sandbox-{}", self.next_order_id),
            symbol: symbol.to_string(),
            side,
            size,
            price: Some(price),
            time: self.time,
        };
        self.next_order_id += 1;

        debug!(symbol, %side, size, price, "market order filled");
        self.ledgers.created.push(record.clone());
        self.ledgers.executed_market_orders.push(record.clone());
        Ok(record)
    }

    fn settlement_assets(&self, symbol: &str) -> Result<(String, String), ExchangeError> {
        if !self.pair_symbols {
            return Ok((symbol.to_string(), self.cash_asset.clone()));
        }
        let quote =
            quote_asset(symbol).ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;
        Ok((base_asset(symbol).to_string(), quote.to_string()))
    }
}

impl HistoryProvider for SandboxExchange {
    fn get_product_history(
        &mut self,
        asset: &str,
        start: i64,
        end: i64,
        _resolution: i64,
    ) -> Result<Vec<Bar>, ExchangeError> {
        self.fetch_count += 1;
        if let Some(message) = &self.fetch_failure {
            return Err(ExchangeError::Request(message.clone()));
        }
        Ok(self
            .history
            .get(asset)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.time >= start && b.time <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Exchange for SandboxExchange {
    fn kind(&self) -> ExchangeKind {
        self.kind
    }

    fn uses_pair_symbols(&self) -> bool {
        self.pair_symbols
    }

    fn get_account(&self) -> Result<Accounts, ExchangeError> {
        Ok(self.accounts.clone())
    }

    fn get_asset_account(&self, asset: &str) -> Result<Balance, ExchangeError> {
        Ok(self.accounts.get(asset).copied().unwrap_or_default())
    }

    fn get_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::NoPrice(symbol.to_string()))
    }

    fn receive_price(&mut self, symbol: &str, price: f64) {
        self.prices.insert(symbol.to_string(), price);
    }

    fn receive_time(&mut self, time: i64) {
        self.time = time;
    }

    fn evaluate_limits(&mut self) {}

    fn evaluate_traded_account_assets(&mut self) {
        let held = self
            .accounts
            .iter()
            .filter(|(_, b)| b.total() != 0.0)
            .map(|(asset, _)| asset.clone());
        self.traded.extend(held);
    }

    fn traded_assets(&self) -> Vec<String> {
        self.traded.iter().cloned().collect()
    }

    fn override_local_account(&mut self, accounts: Accounts) {
        self.accounts = accounts;
    }

    fn set_backtesting(&mut self, enabled: bool) {
        self.backtesting = enabled;
    }

    fn time(&self) -> i64 {
        self.time
    }

    fn ledgers(&self) -> OrderLedgers {
        self.ledgers.clone()
    }
}
