//! Backtest runner: wires the price cache, timeline, scheduler and valuer.
//!
//! A run goes through these steps:
//! 1. capture the exchange's starting balances
//! 2. sync every requested price window, plus the benchmark over the envelope
//!    of all requests, through the cache and merge them
//! 3. seed the exchange with each asset's first tick and enable backtesting
//! 4. run `init` hooks, then decide which assets get valued
//! 5. replay the tick stream, firing due events and sampling the account
//! 6. run `teardown` hooks, disable backtesting, package the result
//!
//! Failures in steps 1-2 (and a missing event or wrong exchange) return an
//! error before anything is simulated. A failure during replay is logged and
//! recorded on the result; rows collected so far are still packaged.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, warn};

use backtide_core::data::{merge, DataError, SeriesSet, SeriesStore, Timeline};
use backtide_core::domain::{Bar, CacheKey, IntervalError, TimeRange};
use backtide_core::exchange::{Accounts, Exchange, ExchangeError, ExchangeKind};
use backtide_core::schedule::{
    handler_fn, ErrorPolicy, EventContext, EventScheduler, PriceEventHandler, PriceInput,
    StrategyError,
};
use backtide_core::valuation::{collect_traded_assets, AccountSnapshot, AccountValuer};

use crate::config::{BacktestSettings, ConfigError, IntervalSetting};
use crate::metrics::{MetricValue, MetricsEngine, MetricsInput, StandardMetrics};
use crate::result::{
    changed_assets, dataset_hash, pct_returns, resample, resample_onto, values_of,
    BacktestResult, ValuePoint, SCHEMA_VERSION,
};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("no price events registered")]
    NoPriceEvents,

    #[error("backtesting needs a paper exchange, got a {0} exchange")]
    UnsupportedExchange(ExchangeKind),

    #[error("the backtest produced no account value rows")]
    EmptyResult,
}

impl From<IntervalError> for RunError {
    fn from(err: IntervalError) -> Self {
        RunError::Config(ConfigError::Interval(err))
    }
}

/// Post-run hook: receives the metrics input and computed metrics.
pub type ResultCallback =
    Box<dyn FnMut(&MetricsInput<'_>, &BTreeMap<String, MetricValue>) -> serde_json::Value>;

/// One requested price window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRequest {
    pub asset: String,
    pub start: i64,
    pub end: i64,
    pub resolution: i64,
}

/// Earliest start, latest end and finest resolution over all requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Envelope {
    start: i64,
    stop: i64,
    min_resolution: i64,
}

pub struct BacktestRunner<E: Exchange> {
    exchange: E,
    settings: BacktestSettings,
    store: SeriesStore,
    scheduler: EventScheduler<E>,
    requests: Vec<PriceRequest>,
    envelope: Option<Envelope>,
    metrics: Box<dyn MetricsEngine>,
    result_callbacks: Vec<(String, ResultCallback)>,
}

impl<E: Exchange + 'static> BacktestRunner<E> {
    /// Create a runner. Only paper exchanges can be backtested.
    pub fn new(exchange: E, settings: BacktestSettings) -> Result<Self, RunError> {
        if exchange.kind() != ExchangeKind::Paper {
            return Err(RunError::UnsupportedExchange(exchange.kind()));
        }
        settings.resample_interval_seconds()?;

        let store = SeriesStore::new(settings.cache_location.clone(), settings.continuous_caching);
        let policy = ErrorPolicy::from_ignore_flag(settings.ignore_user_exceptions);
        Ok(Self {
            exchange,
            settings,
            store,
            scheduler: EventScheduler::new(policy),
            requests: Vec::new(),
            envelope: None,
            metrics: Box::new(StandardMetrics),
            result_callbacks: Vec::new(),
        })
    }

    pub fn settings(&self) -> &BacktestSettings {
        &self.settings
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn exchange_mut(&mut self) -> &mut E {
        &mut self.exchange
    }

    pub fn into_exchange(self) -> E {
        self.exchange
    }

    pub fn price_requests(&self) -> &[PriceRequest] {
        &self.requests
    }

    /// Request `[start, end)` of `asset` at `resolution` seconds. Repeats are ignored.
    ///
    /// The window must hold at least one bar, so a reversed window is rejected.
    pub fn add_prices(
        &mut self,
        asset: &str,
        start: i64,
        end: i64,
        resolution: i64,
    ) -> Result<(), RunError> {
        if resolution <= 0 {
            return Err(DataError::InvalidResolution(resolution).into());
        }
        if end - resolution < start {
            return Err(DataError::WindowTooShort {
                start,
                end,
                resolution,
            }
            .into());
        }
        let request = PriceRequest {
            asset: asset.to_string(),
            start,
            end,
            resolution,
        };
        if self.requests.contains(&request) {
            return Ok(());
        }
        self.requests.push(request);

        self.envelope = Some(match self.envelope {
            None => Envelope {
                start,
                stop: end,
                min_resolution: resolution,
            },
            Some(env) => Envelope {
                start: env.start.min(start),
                stop: env.stop.max(end),
                min_resolution: env.min_resolution.min(resolution),
            },
        });
        Ok(())
    }

    /// Register a price event. `interval` is seconds or a string like `15m`.
    pub fn append_price_event<H>(
        &mut self,
        handler: H,
        asset: &str,
        interval: impl Into<IntervalSetting>,
        use_ohlc: bool,
    ) -> Result<usize, RunError>
    where
        H: PriceEventHandler<E> + 'static,
    {
        let seconds = interval.into().seconds()?;
        Ok(self.scheduler.register(handler, asset, seconds, use_ohlc)?)
    }

    /// Register a closure as a price event.
    pub fn append_price_fn<F>(
        &mut self,
        f: F,
        asset: &str,
        interval: impl Into<IntervalSetting>,
        use_ohlc: bool,
    ) -> Result<usize, RunError>
    where
        F: FnMut(PriceInput, &mut EventContext<'_, E>) -> Result<(), StrategyError> + 'static,
    {
        self.append_price_event(handler_fn(f), asset, interval, use_ohlc)
    }

    /// Replace the exchange's starting balances.
    pub fn write_initial_price_values(&mut self, accounts: Accounts) {
        self.exchange.override_local_account(accounts);
    }

    pub fn set_metrics_engine(&mut self, engine: impl MetricsEngine + 'static) {
        self.metrics = Box::new(engine);
    }

    pub fn add_result_callback<F>(&mut self, name: &str, callback: F)
    where
        F: FnMut(&MetricsInput<'_>, &BTreeMap<String, MetricValue>) -> serde_json::Value + 'static,
    {
        self.result_callbacks.push((name.to_string(), Box::new(callback)));
    }

    /// Run the backtest to completion.
    pub fn run(&mut self) -> Result<BacktestResult, RunError> {
        if self.scheduler.is_empty() {
            return Err(RunError::NoPriceEvents);
        }

        let initial_account = self.exchange.get_account()?;
        let series = self.sync_prices()?;
        let timeline = merge(&series, self.settings.use_price)?;
        let benchmark = self.benchmark_bars(&series);

        let Some(first_time) = timeline.first_time() else {
            return Err(DataError::Unavailable.into());
        };
        info!(
            ticks = timeline.len(),
            assets = series.len(),
            events = self.scheduler.len(),
            "starting backtest"
        );

        for tick in timeline.first_ticks() {
            self.exchange.receive_price(&tick.asset, tick.price);
            self.scheduler.observe(tick);
        }
        self.exchange.receive_time(first_time);
        self.exchange.set_backtesting(true);
        self.scheduler.initialize(first_time);

        let valuer = AccountValuer::new(&self.settings.quote_account_value_in, initial_account);
        let mut rows = Rows::default();

        let mut failure = match self.replay(&timeline, &valuer, first_time, &mut rows) {
            Ok(()) => None,
            Err(StrategyError::Stop) => {
                info!(time = self.exchange.time(), "backtest stopped by strategy");
                None
            }
            Err(err) => {
                error!(time = self.exchange.time(), error = %err, "backtest failed during replay; packaging partial results");
                Some(err.to_string())
            }
        };

        if let Err(err) = self.scheduler.teardown_all(&mut self.exchange) {
            error!(error = %err, "teardown failed");
            failure.get_or_insert_with(|| err.to_string());
        }
        self.exchange.set_backtesting(false);

        self.package(rows, series, benchmark, &timeline, failure)
    }

    /// Requests for this run: everything added, plus the benchmark over the
    /// envelope at the finest resolution.
    fn run_requests(&self) -> Vec<PriceRequest> {
        let mut requests = self.requests.clone();
        if let (Some(symbol), Some(env)) = (&self.settings.benchmark_symbol, self.envelope) {
            let benchmark = PriceRequest {
                asset: symbol.clone(),
                start: env.start,
                end: env.stop,
                resolution: env.min_resolution,
            };
            if !requests.contains(&benchmark) {
                requests.push(benchmark);
            }
        }
        requests
    }

    fn sync_prices(&mut self) -> Result<SeriesSet, RunError> {
        let mut series = SeriesSet::new();
        for request in &self.run_requests() {
            let key = CacheKey::new(request.asset.as_str(), request.resolution)?;
            let window = TimeRange::new(request.start, request.end);
            let bars = self.store.sync(&key, window, &mut self.exchange)?;
            series.insert(&request.asset, bars);
        }
        Ok(series)
    }

    /// Benchmark bars from the replayed series, if the benchmark has data.
    fn benchmark_bars(&self, series: &SeriesSet) -> Option<Vec<Bar>> {
        let symbol = self.settings.benchmark_symbol.as_deref()?;
        match series.get(symbol) {
            Some(bars) if !bars.is_empty() => Some(bars.to_vec()),
            _ => {
                warn!(%symbol, "no benchmark data; metrics will omit it");
                None
            }
        }
    }

    fn replay(
        &mut self,
        timeline: &Timeline,
        valuer: &AccountValuer,
        first_time: i64,
        rows: &mut Rows,
    ) -> Result<(), StrategyError> {
        self.scheduler.init_all(&mut self.exchange)?;

        // init may have opened positions
        self.exchange.evaluate_traded_account_assets();
        let event_assets = self.scheduler.assets();
        rows.traded_assets = collect_traded_assets(
            &self.exchange,
            event_assets.iter().map(String::as_str),
            valuer.quote_currency(),
        );

        if self.settings.save_initial_account_value {
            let initial = valuer.snapshot(&self.exchange, first_time, &rows.traded_assets);
            rows.push(initial);
        }

        let total = timeline.len();
        let step = (total / 10).max(1);
        let show_progress = self.settings.show_progress_during_backtest;

        for (index, tick) in timeline.iter().enumerate() {
            self.exchange.receive_price(&tick.asset, tick.price);
            self.exchange.receive_time(tick.time);
            self.exchange.evaluate_limits();
            self.scheduler.observe(tick);

            let traded = &rows.traded_assets;
            let history = &mut rows.history;
            let no_trade = &mut rows.no_trade;
            self.scheduler
                .drain_due(tick.time, &mut self.exchange, |exchange, time| {
                    let (live, baseline) = valuer.snapshot(exchange, time, traded);
                    history.push(live);
                    no_trade.push(baseline);
                })?;

            if show_progress && (index + 1) % step == 0 {
                info!(
                    percent = (index + 1) * 100 / total,
                    time = tick.time,
                    "backtest progress"
                );
            }
        }
        Ok(())
    }

    fn package(
        &mut self,
        mut rows: Rows,
        series: SeriesSet,
        benchmark: Option<Vec<Bar>>,
        timeline: &Timeline,
        failure: Option<String>,
    ) -> Result<BacktestResult, RunError> {
        rows.history.sort_by_key(|s| s.time);
        rows.no_trade.sort_by_key(|s| s.time);
        let (Some(first), Some(last)) = (rows.history.first(), rows.history.last()) else {
            return Err(RunError::EmptyResult);
        };
        let (start_time, last_time) = (first.time, last.time);

        let interval = self.settings.resample_interval_seconds()?;
        let resampled = resample(&values_of(&rows.history), interval);
        let returns = pct_returns(&resampled);

        let benchmark_value = benchmark.map(|bars| {
            let field = self.settings.use_price;
            let points: Vec<ValuePoint> = bars
                .iter()
                .map(|b| ValuePoint {
                    time: b.time,
                    value: b.price(field),
                })
                .collect();
            resample_onto(&points, start_time, last_time, interval)
        });
        let benchmark_returns = benchmark_value.as_deref().map(pct_returns);

        let reported_assets = if self.settings.show_tickers_with_zero_delta {
            rows.traded_assets.clone()
        } else {
            changed_assets(&rows.history)
        };

        let mut result = BacktestResult {
            schema_version: SCHEMA_VERSION,
            history: rows.history,
            no_trade_history: rows.no_trade,
            price_data: series
                .iter()
                .map(|(asset, bars)| (asset.to_string(), bars.to_vec()))
                .collect(),
            ledgers: self.exchange.ledgers(),
            start_time,
            stop_time: self.exchange.time(),
            quote_currency: self.settings.quote_account_value_in.clone(),
            resample_interval_seconds: interval,
            resampled_account_value: resampled,
            returns,
            benchmark_value,
            benchmark_returns,
            metrics: BTreeMap::new(),
            callbacks: BTreeMap::new(),
            failure,
            dataset_hash: dataset_hash(timeline),
            reported_assets,
        };

        let metrics = self.metrics.compute(
            &result.metrics_input(),
            interval,
            self.settings.risk_free_return_rate,
        );
        result.metrics = metrics;

        let mut outputs = BTreeMap::new();
        {
            let input = result.metrics_input();
            for (name, callback) in &mut self.result_callbacks {
                outputs.insert(name.clone(), callback(&input, &result.metrics));
            }
        }
        result.callbacks = outputs;

        info!(
            rows = result.history.len(),
            final_value = result.final_value(),
            completed = result.completed(),
            "backtest finished"
        );
        Ok(result)
    }
}

/// Rows accumulated during replay.
#[derive(Default)]
struct Rows {
    traded_assets: Vec<String>,
    history: Vec<AccountSnapshot>,
    no_trade: Vec<AccountSnapshot>,
}

impl Rows {
    fn push(&mut self, (live, baseline): (AccountSnapshot, AccountSnapshot)) {
        self.history.push(live);
        self.no_trade.push(baseline);
    }
}
