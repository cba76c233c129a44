//! Price-event scheduler.
//!
//! Each registered event is bound to an asset and a cadence. Events fire in
//! ascending `next_run` order against the replayed clock; ties fire in
//! registration order. After every firing the event's `next_run` advances by
//! exactly its interval and the due set is re-evaluated, so one tick can fire
//! the same event several times when the tick stream is sparser than the cadence.
//!
//! Lifecycle per event: registered → initialized (`next_run` = first timeline
//! time, `init` hook) → due/waiting → torn down (`teardown` hook).

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::error::Error as StdError;
use std::marker::PhantomData;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{IntervalError, Ohlcv, Tick};
use crate::exchange::{Exchange, ExchangeError};

// ── Handler contract ─────────────────────────────────────────────────

/// Error returned by a price-event handler.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Ends the run early. Rows recorded so far are kept.
    #[error("strategy requested stop")]
    Stop,

    #[error("no price data for {asset}")]
    NoPriceData { asset: String },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl StrategyError {
    pub fn failed(message: impl Into<String>) -> Self {
        StrategyError::Failed(message.into())
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, StrategyError::Stop)
    }
}

impl From<ExchangeError> for StrategyError {
    fn from(err: ExchangeError) -> Self {
        StrategyError::Other(Box::new(err))
    }
}

/// What a firing handler sees of its asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceInput {
    Price(f64),
    Ohlcv(Ohlcv),
}

impl PriceInput {
    /// Scalar price; the close for candles.
    pub fn price(&self) -> f64 {
        match self {
            PriceInput::Price(price) => *price,
            PriceInput::Ohlcv(bar) => bar.close,
        }
    }
}

/// Passed to a handler on every firing.
pub struct EventContext<'a, E: ?Sized> {
    pub exchange: &'a mut E,
    pub asset: &'a str,
    /// Scheduled time of this firing.
    pub time: i64,
}

/// A periodic strategy callback. State lives in the implementing type.
pub trait PriceEventHandler<E: ?Sized> {
    fn init(&mut self, _asset: &str, _exchange: &mut E) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_price(
        &mut self,
        input: PriceInput,
        ctx: &mut EventContext<'_, E>,
    ) -> Result<(), StrategyError>;

    fn teardown(&mut self, _exchange: &mut E) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// Adapts a closure into a `PriceEventHandler` with no init or teardown.
pub struct FnHandler<F, E: ?Sized> {
    f: F,
    _exchange: PhantomData<fn(&mut E)>,
}

impl<F, E: ?Sized> PriceEventHandler<E> for FnHandler<F, E>
where
    F: FnMut(PriceInput, &mut EventContext<'_, E>) -> Result<(), StrategyError>,
{
    fn on_price(
        &mut self,
        input: PriceInput,
        ctx: &mut EventContext<'_, E>,
    ) -> Result<(), StrategyError> {
        (self.f)(input, ctx)
    }
}

pub fn handler_fn<E: ?Sized, F>(f: F) -> FnHandler<F, E>
where
    F: FnMut(PriceInput, &mut EventContext<'_, E>) -> Result<(), StrategyError>,
{
    FnHandler {
        f,
        _exchange: PhantomData,
    }
}

/// How handler errors other than `Stop` are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Propagate the error and end the loop.
    #[default]
    Strict,
    /// Log the error and keep going.
    Lenient,
}

impl ErrorPolicy {
    pub fn from_ignore_flag(ignore_user_exceptions: bool) -> Self {
        if ignore_user_exceptions {
            ErrorPolicy::Lenient
        } else {
            ErrorPolicy::Strict
        }
    }
}

// ── Scheduler ────────────────────────────────────────────────────────

/// A registered event.
pub struct PriceEvent<E: ?Sized> {
    handler: Box<dyn PriceEventHandler<E>>,
    asset: String,
    interval: i64,
    use_ohlc: bool,
    next_run: Option<i64>,
    fired: u64,
}

impl<E: ?Sized> PriceEvent<E> {
    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn use_ohlc(&self) -> bool {
        self.use_ohlc
    }

    /// `None` until the scheduler is initialized.
    pub fn next_run(&self) -> Option<i64> {
        self.next_run
    }

    pub fn fire_count(&self) -> u64 {
        self.fired
    }
}

pub struct EventScheduler<E: ?Sized> {
    events: Vec<PriceEvent<E>>,
    queue: BinaryHeap<Reverse<(i64, usize)>>,
    last_ticks: BTreeMap<String, Tick>,
    policy: ErrorPolicy,
}

impl<E: ?Sized> Default for EventScheduler<E> {
    fn default() -> Self {
        Self::new(ErrorPolicy::default())
    }
}

impl<E: ?Sized> EventScheduler<E> {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            events: Vec::new(),
            queue: BinaryHeap::new(),
            last_ticks: BTreeMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ErrorPolicy) {
        self.policy = policy;
    }

    /// Register an event and return its index.
    pub fn register<H>(
        &mut self,
        handler: H,
        asset: &str,
        interval: i64,
        use_ohlc: bool,
    ) -> Result<usize, IntervalError>
    where
        H: PriceEventHandler<E> + 'static,
    {
        if interval <= 0 {
            return Err(IntervalError::NonPositive(interval.to_string()));
        }
        self.events.push(PriceEvent {
            handler: Box::new(handler),
            asset: asset.to_string(),
            interval,
            use_ohlc,
            next_run: None,
            fired: 0,
        });
        Ok(self.events.len() - 1)
    }

    pub fn events(&self) -> &[PriceEvent<E>] {
        &self.events
    }

    pub fn event(&self, index: usize) -> Option<&PriceEvent<E>> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct event assets in registration order.
    pub fn assets(&self) -> Vec<String> {
        let mut assets: Vec<String> = Vec::new();
        for event in &self.events {
            if !assets.contains(&event.asset) {
                assets.push(event.asset.clone());
            }
        }
        assets
    }

    /// Set every event's `next_run` to `first_time` and queue it.
    pub fn initialize(&mut self, first_time: i64) {
        self.queue.clear();
        for (index, event) in self.events.iter_mut().enumerate() {
            event.next_run = Some(first_time);
            event.fired = 0;
            self.queue.push(Reverse((first_time, index)));
        }
    }

    /// Run every `init` hook in registration order. Errors propagate.
    pub fn init_all(&mut self, exchange: &mut E) -> Result<(), StrategyError> {
        for event in &mut self.events {
            event.handler.init(&event.asset, exchange)?;
        }
        Ok(())
    }

    /// Record the latest tick for its asset.
    pub fn observe(&mut self, tick: &Tick) {
        match self.last_ticks.get_mut(&tick.asset) {
            Some(last) => last.clone_from(tick),
            None => {
                self.last_ticks.insert(tick.asset.clone(), tick.clone());
            }
        }
    }

    pub fn last_tick(&self, asset: &str) -> Option<&Tick> {
        self.last_ticks.get(asset)
    }

    /// Fire every event with `next_run <= now`, lowest first.
    ///
    /// For each firing: the exchange clock moves to the scheduled time, the
    /// handler runs, `next_run` advances, then `after_fire` observes the
    /// exchange at that time. Only then is a handler error acted on: `Stop`
    /// always returns it, other errors return under `Strict` and are logged
    /// under `Lenient`. Returns the number of firings.
    pub fn drain_due<F>(
        &mut self,
        now: i64,
        exchange: &mut E,
        mut after_fire: F,
    ) -> Result<usize, StrategyError>
    where
        E: Exchange,
        F: FnMut(&E, i64),
    {
        let mut fired = 0;
        while let Some(&Reverse((next_run, index))) = self.queue.peek() {
            if next_run > now {
                break;
            }
            self.queue.pop();

            let event = &mut self.events[index];
            let outcome = match input_for(&self.last_ticks, &event.asset, event.use_ohlc) {
                Some(input) => {
                    exchange.receive_time(next_run);
                    let mut ctx = EventContext {
                        exchange: &mut *exchange,
                        asset: &event.asset,
                        time: next_run,
                    };
                    event.handler.on_price(input, &mut ctx)
                }
                None => Err(StrategyError::NoPriceData {
                    asset: event.asset.clone(),
                }),
            };

            let following = next_run + event.interval;
            event.next_run = Some(following);
            event.fired += 1;
            self.queue.push(Reverse((following, index)));
            fired += 1;
            debug!(asset = %event.asset, time = next_run, next_run = following, "price event fired");

            after_fire(&*exchange, next_run);

            if let Err(err) = outcome {
                if err.is_stop() || self.policy == ErrorPolicy::Strict {
                    return Err(err);
                }
                warn!(asset = %self.events[index].asset, time = next_run, error = %err, "ignoring price event error");
            }
        }
        Ok(fired)
    }

    /// Run every `teardown` hook once, in registration order.
    ///
    /// All hooks run even if one fails. Under `Strict` the first error is
    /// returned afterwards; under `Lenient` errors are only logged.
    pub fn teardown_all(&mut self, exchange: &mut E) -> Result<(), StrategyError> {
        let mut first_error = None;
        for event in &mut self.events {
            if let Err(err) = event.handler.teardown(exchange) {
                warn!(asset = %event.asset, error = %err, "teardown failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) if self.policy == ErrorPolicy::Strict => Err(err),
            _ => Ok(()),
        }
    }
}

fn input_for(last_ticks: &BTreeMap<String, Tick>, asset: &str, use_ohlc: bool) -> Option<PriceInput> {
    let tick = last_ticks.get(asset)?;
    Some(if use_ohlc {
        PriceInput::Ohlcv(tick.ohlcv())
    } else {
        PriceInput::Price(tick.price)
    })
}
