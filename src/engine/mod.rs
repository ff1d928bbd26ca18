//! The K-bar engine: tick intake, one-minute sealing, multi-period fan-out.
//!
//! [`KbarEngine`] wires a [`OneMinuteBarTracker`], a [`PeriodAggregator`] and
//! a [`BarSealingPolicy`] together behind one synchronous surface. Completed
//! bars are delivered to subscribed observers on the caller's thread, period 1
//! always included.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use tracing::info;

use crate::aggregate::{BacktestSealing, BarSealingPolicy, LiveSealing, PeriodAggregator};
use crate::bars::{Bar, OneMinuteBarTracker, VolumeMode};
use crate::error::HistoryFileError;
use crate::market::MarketSessionRule;

/// Handle returned by [`KbarEngine::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type BarObserver = Box<dyn FnMut(u32, &Bar) + Send>;

/// Session-aware K-bar assembly engine.
///
/// Single-writer: one thread drives ticks, volume and seals in chronological
/// order. Observer callbacks run synchronously inside that same call.
pub struct KbarEngine {
    tracker: OneMinuteBarTracker,
    aggregator: PeriodAggregator,
    policy: Box<dyn BarSealingPolicy>,
    observers: Vec<(SubscriptionId, BarObserver)>,
    next_subscription: u64,
}

impl KbarEngine {
    /// Live-feed engine: cumulative volume totals, per-period error
    /// isolation, duplicate-boundary suppression.
    pub fn live(rule: Arc<dyn MarketSessionRule>) -> Self {
        Self::with_policy(rule, VolumeMode::Cumulative, Box::new(LiveSealing))
    }

    /// Backtest engine: incremental volume, strict replay sealing.
    pub fn backtest(rule: Arc<dyn MarketSessionRule>) -> Self {
        Self::with_policy(rule, VolumeMode::Incremental, Box::new(BacktestSealing))
    }

    pub fn with_policy(
        rule: Arc<dyn MarketSessionRule>,
        volume_mode: VolumeMode,
        policy: Box<dyn BarSealingPolicy>,
    ) -> Self {
        info!(market = rule.market_name(), ?volume_mode, "engine created");
        Self {
            tracker: OneMinuteBarTracker::new(rule.clone(), volume_mode),
            aggregator: PeriodAggregator::new(rule),
            policy,
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Register an observer for completed bars. The callback receives the
    /// period in minutes and the sealed bar.
    pub fn subscribe(&mut self, observer: impl FnMut(u32, &Bar) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove an observer. Returns false when the id is unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub fn register_period(&mut self, period: u32) {
        self.aggregator.register_period(period);
    }

    pub fn unregister_period(&mut self, period: u32) {
        self.aggregator.unregister_period(period);
    }

    pub fn registered_periods(&self) -> Vec<u32> {
        self.aggregator.registered_periods()
    }

    /// Full resampled history for a period, including a trailing floating
    /// aggregate when one-minute data extends past the last boundary.
    pub fn get_history(&mut self, period: u32) -> Vec<Bar> {
        let bars = self.tracker.bars_with_floating();
        self.aggregator.history_for(&bars, period)
    }

    /// The last `n` sealed one-minute bars.
    pub fn raw_bars(&self, n: usize) -> Vec<Bar> {
        self.tracker.raw_bars(n)
    }

    pub fn is_market_currently_open(&self) -> bool {
        self.tracker.is_market_currently_open()
    }

    pub fn set_current_time(&mut self, time: NaiveDateTime) {
        self.tracker.set_current_time(time);
    }

    pub fn on_tick(&mut self, price: Decimal) {
        self.tracker.on_tick(price);
    }

    pub fn on_tick_with_volume(&mut self, price: Decimal, qty: u64) {
        self.tracker.on_tick_with_volume(price, qty);
    }

    pub fn set_volume(&mut self, volume: u64) {
        self.tracker.set_volume(volume);
    }

    pub fn set_volume_base(&mut self, total: u64) {
        self.tracker.set_volume_base(total);
    }

    /// Seal the in-progress minute at `now`, then run the sealing policy for
    /// every registered higher period. Returns the sealed one-minute bar.
    pub fn seal_current_bar(&mut self, now: NaiveDateTime) -> Option<Bar> {
        let sealed = self.tracker.seal_current_bar(now)?;
        self.notify(1, &sealed);
        self.run_policy(sealed.close_time);
        Some(sealed)
    }

    /// Replay path: append an already-sealed one-minute bar and run the
    /// policy at its close time. Filled quiet bars are replayed like any
    /// other; only bars carrying no price data at all are ignored.
    pub fn add_one_minute_bar(&mut self, bar: Bar) {
        let Some(bar) = self.tracker.append_sealed(bar) else {
            return;
        };
        self.notify(1, &bar);
        self.run_policy(bar.close_time);
    }

    /// Drop all bar state. Registered periods and subscriptions survive.
    pub fn clear_all(&mut self) {
        self.tracker.clear_all();
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HistoryFileError> {
        self.tracker.save(path)
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> usize {
        self.tracker.load(path)
    }

    pub fn import_mms(&mut self, path: impl AsRef<Path>, now: NaiveDateTime) -> usize {
        self.tracker.import_mms(path, now)
    }

    fn run_policy(&mut self, now: NaiveDateTime) {
        let completed =
            self.policy
                .on_minute_closed(&mut self.aggregator, self.tracker.history(), now);
        for (period, bar) in &completed {
            self.notify(*period, bar);
        }
    }

    fn notify(&mut self, period: u32, bar: &Bar) {
        for (_, observer) in &mut self.observers {
            observer(period, bar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::TaifexRule;
    use chrono::{Duration, NaiveDate};
    use std::sync::mpsc;

    fn dt(h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 7)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn live_engine() -> KbarEngine {
        KbarEngine::live(Arc::new(TaifexRule::weekday_only()))
    }

    #[test]
    fn test_seal_notifies_period_one() {
        let mut engine = live_engine();
        let (tx, rx) = mpsc::channel();
        engine.subscribe(move |period, bar| {
            tx.send((period, bar.clone())).unwrap();
        });

        engine.set_current_time(dt(15, 0));
        engine.on_tick(Decimal::from(17000));
        engine.seal_current_bar(dt(15, 1));

        let (period, bar) = rx.try_recv().unwrap();
        assert_eq!(period, 1);
        assert_eq!(bar.close_time, dt(15, 1));
        assert!(bar.contains_market_open);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_five_minute_bar_emitted_once_at_boundary() {
        let mut engine = live_engine();
        engine.register_period(5);

        let (tx, rx) = mpsc::channel();
        engine.subscribe(move |period, bar| {
            if period == 5 {
                tx.send(bar.clone()).unwrap();
            }
        });

        for min in 0..5u32 {
            engine.set_current_time(dt(15, min) + Duration::seconds(10));
            engine.on_tick(Decimal::from(17000 + i64::from(min)));
            engine.seal_current_bar(dt(15, min + 1));
        }

        let bar = rx.try_recv().unwrap();
        assert_eq!(bar.close_time, dt(15, 5));
        assert_eq!(bar.open, Decimal::from(17000));
        assert_eq!(bar.close, Decimal::from(17004));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut engine = live_engine();
        let (tx, rx) = mpsc::channel();
        let id = engine.subscribe(move |period, _| {
            tx.send(period).unwrap();
        });

        assert!(engine.unsubscribe(id));
        assert!(!engine.unsubscribe(id));

        engine.set_current_time(dt(15, 0));
        engine.on_tick(Decimal::from(17000));
        engine.seal_current_bar(dt(15, 1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_backtest_replay_emits_same_aggregate_as_live() {
        let rule: Arc<dyn MarketSessionRule> = Arc::new(TaifexRule::weekday_only());

        let mut live = KbarEngine::live(rule.clone());
        live.register_period(5);
        let (ltx, lrx) = mpsc::channel();
        live.subscribe(move |period, bar| {
            if period == 5 {
                ltx.send(bar.clone()).unwrap();
            }
        });

        let mut backtest = KbarEngine::backtest(rule);
        backtest.register_period(5);
        let (btx, brx) = mpsc::channel();
        backtest.subscribe(move |period, bar| {
            if period == 5 {
                btx.send(bar.clone()).unwrap();
            }
        });

        let mut sealed = Vec::new();
        for min in 0..5u32 {
            live.set_current_time(dt(15, min) + Duration::seconds(5));
            live.on_tick(Decimal::from(17000 + i64::from(min)));
            live.set_volume(u64::from(min + 1) * 10);
            sealed.push(live.seal_current_bar(dt(15, min + 1)).unwrap());
        }
        for bar in sealed {
            backtest.add_one_minute_bar(bar);
        }

        assert_eq!(lrx.try_recv().unwrap(), brx.try_recv().unwrap());
    }

    #[test]
    fn test_get_history_resamples_with_floating_tail() {
        let mut engine = live_engine();
        for min in 0..7u32 {
            engine.set_current_time(dt(15, min) + Duration::seconds(5));
            engine.on_tick(Decimal::from(17000));
            engine.seal_current_bar(dt(15, min + 1));
        }

        let history = engine.get_history(5);
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_floating);
        assert!(history[1].is_floating);
        // Temporary registration left no state behind.
        assert!(engine.registered_periods().is_empty());
    }

    #[test]
    fn test_replay_keeps_filled_quiet_bars() {
        let mut engine = KbarEngine::backtest(Arc::new(TaifexRule::weekday_only()));

        // A quiet minute carries the prior close forward; it must survive
        // replay so boundary windows stay complete.
        let quiet = Bar {
            start_time: dt(15, 0),
            close_time: dt(15, 1),
            open: Decimal::from(17000),
            high: Decimal::from(17000),
            low: Decimal::from(17000),
            close: Decimal::from(17000),
            volume: 0,
            contains_market_open: false,
            contains_market_close: false,
            is_null: true,
            is_floating: false,
            is_alignment_bar: false,
        };
        engine.add_one_minute_bar(quiet.clone());
        assert_eq!(engine.raw_bars(10).len(), 1);

        // A bar with no price data at all is dropped.
        let priceless = Bar {
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            close_time: dt(15, 2),
            start_time: dt(15, 1),
            ..quiet
        };
        engine.add_one_minute_bar(priceless);
        assert_eq!(engine.raw_bars(10).len(), 1);
    }
}
