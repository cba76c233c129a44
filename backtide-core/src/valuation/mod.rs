//! Account valuation in a single quote currency.
//!
//! Every firing yields two snapshots at the same time and in the same units:
//! the live account, and a no-trade baseline built from the balances frozen at
//! run start. Both use the exchange's current prices, so the baseline moves
//! with the market and never with simulated orders.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::domain::{base_asset, pair_symbol, quote_asset};
use crate::exchange::{Accounts, Exchange};

/// Holdings and total value at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSnapshot {
    pub time: i64,
    /// Quote-currency value of all traded assets.
    pub valuation: f64,
    /// `available + hold` per traded asset.
    pub per_asset_available: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct AccountValuer {
    quote_currency: String,
    initial_account: Accounts,
}

impl AccountValuer {
    pub fn new(quote_currency: &str, initial_account: Accounts) -> Self {
        Self {
            quote_currency: quote_currency.to_string(),
            initial_account,
        }
    }

    pub fn quote_currency(&self) -> &str {
        &self.quote_currency
    }

    pub fn initial_account(&self) -> &Accounts {
        &self.initial_account
    }

    /// Value the live account and the no-trade baseline at `time`.
    ///
    /// Returns `(traded, no_trade)`. An asset whose price cannot be looked up
    /// contributes zero.
    pub fn snapshot<E>(
        &self,
        exchange: &E,
        time: i64,
        traded_assets: &[String],
    ) -> (AccountSnapshot, AccountSnapshot)
    where
        E: Exchange + ?Sized,
    {
        let price_of = |asset: &str| -> f64 {
            let symbol = pair_symbol(asset, &self.quote_currency, exchange.uses_pair_symbols());
            exchange.get_price(&symbol).unwrap_or_else(|err| {
                debug!(%symbol, error = %err, "no price; valuing holding at zero");
                0.0
            })
        };

        let mut live = Vec::with_capacity(traded_assets.len());
        let mut frozen = Vec::with_capacity(traded_assets.len());
        for asset in traded_assets {
            let current = exchange
                .get_asset_account(asset)
                .map(|b| b.total())
                .unwrap_or(0.0);
            let initial = self.initial_account.get(asset).map_or(0.0, |b| b.total());

            let price = if asset == &self.quote_currency || (current == 0.0 && initial == 0.0) {
                1.0
            } else {
                price_of(asset)
            };
            live.push((asset, current, current * price));
            frozen.push((asset, initial, initial * price));
        }

        (assemble(time, live), assemble(time, frozen))
    }
}

fn assemble(time: i64, rows: Vec<(&String, f64, f64)>) -> AccountSnapshot {
    let mut per_asset_available = BTreeMap::new();
    let mut valuation = 0.0;
    for (asset, amount, value) in rows {
        per_asset_available.insert(asset.clone(), amount);
        valuation += value;
    }
    AccountSnapshot {
        time,
        valuation,
        per_asset_available,
    }
}

/// Assets to value on every snapshot: what the exchange trades or holds, the
/// base and quote of every event symbol, and the quote currency. Sorted.
pub fn collect_traded_assets<'a, E, I>(
    exchange: &E,
    event_symbols: I,
    quote_currency: &str,
) -> Vec<String>
where
    E: Exchange + ?Sized,
    I: IntoIterator<Item = &'a str>,
{
    let mut assets: BTreeSet<String> = exchange.traded_assets().into_iter().collect();
    if let Ok(accounts) = exchange.get_account() {
        assets.extend(
            accounts
                .into_iter()
                .filter(|(_, b)| b.total() != 0.0)
                .map(|(asset, _)| asset),
        );
    }
    for symbol in event_symbols {
        assets.insert(base_asset(symbol).to_string());
        if let Some(quote) = quote_asset(symbol) {
            assets.insert(quote.to_string());
        }
    }
    assets.insert(quote_currency.to_string());
    assets.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Balance, OrderSide, SandboxExchange};

    fn traded(assets: &[&str]) -> Vec<String> {
        assets.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn values_quote_and_priced_holdings() {
        let mut exchange = SandboxExchange::new()
            .with_balance("USD", 100.0)
            .with_balance("BTC", 2.0);
        exchange.set_balance("ETH", Balance::new(1.0, 1.0));
        exchange.receive_price("BTC-USD", 50.0);
        exchange.receive_price("ETH-USD", 10.0);

        let valuer = AccountValuer::new("USD", exchange.get_account().unwrap());
        let (live, _) = valuer.snapshot(&exchange, 60, &traded(&["BTC", "ETH", "USD"]));

        assert_eq!(live.time, 60);
        assert_eq!(live.valuation, 100.0 + 2.0 * 50.0 + 2.0 * 10.0);
        assert_eq!(live.per_asset_available["ETH"], 2.0);
    }

    #[test]
    fn missing_price_counts_as_zero() {
        let exchange = SandboxExchange::new()
            .with_balance("USD", 100.0)
            .with_balance("XYZ", 5.0);
        let valuer = AccountValuer::new("USD", Accounts::new());

        let (live, baseline) = valuer.snapshot(&exchange, 0, &traded(&["USD", "XYZ"]));
        assert_eq!(live.valuation, 100.0);
        assert_eq!(live.per_asset_available["XYZ"], 5.0);
        assert_eq!(baseline.valuation, 0.0);
    }

    #[test]
    fn plain_symbols_price_bare_asset() {
        let mut exchange = SandboxExchange::new()
            .with_plain_symbols("USD")
            .with_balance("AAPL", 3.0);
        exchange.receive_price("AAPL", 20.0);

        let valuer = AccountValuer::new("USD", Accounts::new());
        let (live, _) = valuer.snapshot(&exchange, 0, &traded(&["AAPL", "USD"]));
        assert_eq!(live.valuation, 60.0);
    }

    #[test]
    fn baseline_ignores_simulated_orders() {
        let mut exchange = SandboxExchange::new().with_balance("USD", 1_000.0);
        exchange.receive_price("BTC-USD", 100.0);
        let valuer = AccountValuer::new("USD", exchange.get_account().unwrap());
        let assets = traded(&["BTC", "USD"]);

        let (_, before) = valuer.snapshot(&exchange, 0, &assets);
        exchange.market_order("BTC-USD", OrderSide::Buy, 5.0).unwrap();
        exchange.receive_price("BTC-USD", 120.0);
        let (live, after) = valuer.snapshot(&exchange, 60, &assets);

        assert_eq!(before.valuation, 1_000.0);
        assert_eq!(after.valuation, 1_000.0);
        assert_eq!(after.per_asset_available, before.per_asset_available);
        assert_eq!(live.valuation, 500.0 + 5.0 * 120.0);
    }

    #[test]
    fn baseline_follows_market_price() {
        let mut exchange = SandboxExchange::new().with_balance("BTC", 1.0);
        exchange.receive_price("BTC-USD", 100.0);
        let valuer = AccountValuer::new("USD", exchange.get_account().unwrap());
        let assets = traded(&["BTC", "USD"]);

        exchange.receive_price("BTC-USD", 150.0);
        let (_, baseline) = valuer.snapshot(&exchange, 0, &assets);
        assert_eq!(baseline.valuation, 150.0);
    }

    #[test]
    fn traded_assets_union() {
        let mut exchange = SandboxExchange::new().with_balance("SOL", 4.0);
        exchange.evaluate_traded_account_assets();

        let assets = collect_traded_assets(&exchange, ["BTC-USD", "ETH-EUR", "AAPL"], "USD");
        assert_eq!(assets, traded(&["AAPL", "BTC", "ETH", "EUR", "SOL", "USD"]));
    }
}
