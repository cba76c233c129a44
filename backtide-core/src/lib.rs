//! Backtide Core: price cache, timeline merge, event scheduling and account valuation.
//!
//! This crate holds the simulation core of a tick-replay backtester:
//! - Domain types (bars, ticks, time ranges, cache keys, interval strings)
//! - Range reconciliation of a requested window against cached slices
//! - On-disk CSV slice store that fetches only missing ranges
//! - Stable multi-asset timeline merge
//! - Priority-ordered price-event scheduler with per-event cadence
//! - Traded and no-trade account valuation
//! - The `Exchange` collaborator trait and an in-memory sandbox exchange

pub mod data;
pub mod domain;
pub mod exchange;
pub mod schedule;
pub mod valuation;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: data and result types can cross threads.
    ///
    /// Handlers are boxed trait objects without a `Send` bound, so the
    /// scheduler itself is deliberately not listed here.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Tick>();
        require_sync::<domain::Tick>();
        require_send::<domain::TimeRange>();
        require_sync::<domain::TimeRange>();
        require_send::<domain::CacheKey>();
        require_sync::<domain::CacheKey>();

        // Data types
        require_send::<data::SeriesStore>();
        require_sync::<data::SeriesStore>();
        require_send::<data::Timeline>();
        require_sync::<data::Timeline>();
        require_send::<data::Reconciliation>();
        require_sync::<data::Reconciliation>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();

        // Exchange and valuation
        require_send::<exchange::SandboxExchange>();
        require_sync::<exchange::SandboxExchange>();
        require_send::<exchange::OrderLedgers>();
        require_sync::<exchange::OrderLedgers>();
        require_send::<valuation::AccountSnapshot>();
        require_sync::<valuation::AccountSnapshot>();
        require_send::<schedule::StrategyError>();
        require_sync::<schedule::StrategyError>();
    }

    /// Handlers only ever see the exchange through `EventContext`; the
    /// scheduler cannot be reached from inside a firing.
    #[test]
    fn boxed_handler_fires_through_context() {
        use crate::exchange::{Exchange, SandboxExchange};
        use crate::schedule::{handler_fn, EventContext, PriceEventHandler, PriceInput};

        let mut handler: Box<dyn PriceEventHandler<SandboxExchange>> =
            Box::new(handler_fn(|input: PriceInput, ctx: &mut EventContext<'_, SandboxExchange>| {
                ctx.exchange.receive_price(ctx.asset, input.price());
                Ok(())
            }));

        let mut exchange = SandboxExchange::new();
        let mut ctx = EventContext {
            exchange: &mut exchange,
            asset: "BTC-USD",
            time: 60,
        };
        handler.on_price(PriceInput::Price(42.0), &mut ctx).unwrap();
        handler.teardown(&mut exchange).unwrap();
        assert_eq!(exchange.get_price("BTC-USD").unwrap(), 42.0);
    }
}
