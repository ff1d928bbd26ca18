//! One-minute bar assembly from live ticks.
//!
//! The tracker owns the floating (in-progress) bar and the bounded
//! one-minute history. It is single-writer: one feed thread calls
//! tick/volume/seal operations in strict chronological order.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Timelike};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::HistoryFileError;
use crate::market::MarketSessionRule;

use super::store;
use super::{Bar, BarHistory, FloatingBar};

/// How `set_volume` interprets its argument. The two modes are mutually
/// exclusive and fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeMode {
    /// Each call carries a single trade's quantity, added directly
    /// (deterministic replay).
    Incremental,
    /// Each call carries the exchange's running daily total; the tracker
    /// derives the floating bar's volume as a delta against the total
    /// remembered at the last seal (live feed).
    #[default]
    Cumulative,
}

/// Assembles ticks into the current one-minute bar and seals it into history
/// when the session rule says the minute is complete.
pub struct OneMinuteBarTracker {
    rule: Arc<dyn MarketSessionRule>,
    history: BarHistory,
    floating: FloatingBar,
    current_time: Option<NaiveDateTime>,
    volume_mode: VolumeMode,
    /// Running total remembered at the last seal (cumulative mode).
    last_sealed_volume: u64,
    /// Most recent running total seen (cumulative mode).
    current_total_volume: u64,
    last_import_time: Option<NaiveDateTime>,
}

impl OneMinuteBarTracker {
    pub fn new(rule: Arc<dyn MarketSessionRule>, volume_mode: VolumeMode) -> Self {
        Self {
            rule,
            history: BarHistory::new(),
            floating: FloatingBar::empty(),
            current_time: None,
            volume_mode,
            last_sealed_volume: 0,
            current_total_volume: 0,
            last_import_time: None,
        }
    }

    /// Advance the tracker clock, dropping sub-second precision.
    pub fn set_current_time(&mut self, time: NaiveDateTime) {
        self.current_time = Some(truncate_to_second(time));
    }

    /// Tracker clock as last set (or advanced by load/replay).
    pub fn current_time(&self) -> Option<NaiveDateTime> {
        self.current_time
    }

    /// The session rule this tracker runs under.
    pub fn rule(&self) -> &Arc<dyn MarketSessionRule> {
        &self.rule
    }

    /// True if the market is open at the tracker clock.
    pub fn is_market_currently_open(&self) -> bool {
        self.current_time
            .map(|t| self.rule.is_market_open(t))
            .unwrap_or(false)
    }

    /// Record a trade price into the floating bar.
    pub fn on_tick(&mut self, price: Decimal) {
        self.floating.apply_tick(price, self.current_time);
    }

    /// Record a trade price and its quantity in one call.
    pub fn on_tick_with_volume(&mut self, price: Decimal, qty: u64) {
        self.floating.apply_tick(price, self.current_time);
        if qty > 0 {
            self.floating.add_volume(qty);
        }
    }

    /// Feed volume according to the tracker's [`VolumeMode`].
    pub fn set_volume(&mut self, volume: u64) {
        match self.volume_mode {
            VolumeMode::Incremental => self.floating.add_volume(volume),
            VolumeMode::Cumulative => {
                self.current_total_volume = volume;

                // A shrinking total signals a session restart or an exchange
                // counter reset; restart the baseline from zero.
                if volume < self.last_sealed_volume {
                    self.last_sealed_volume = 0;
                }

                self.floating.set_volume(volume - self.last_sealed_volume);
            }
        }
    }

    /// Prime the cumulative baseline with the day's running total (used when
    /// attaching to a feed mid-session).
    pub fn set_volume_base(&mut self, total: u64) {
        self.last_sealed_volume = total;
        self.current_total_volume = total;
    }

    /// Volume accumulated in the floating bar so far.
    pub fn floating_volume(&self) -> u64 {
        self.floating.volume()
    }

    /// Seal the floating bar at `now` if the session rule allows it.
    ///
    /// A null floating bar is filled forward from the prior sealed close so
    /// that quiet minutes still produce a flat candle; with no prior close the
    /// minute is unpriceable and nothing is appended. Returns the sealed bar
    /// when one was appended to history.
    pub fn seal_current_bar(&mut self, now: NaiveDateTime) -> Option<Bar> {
        let now = truncate_to_second(now);
        self.current_time = Some(now);

        if !self.rule.should_seal_bar(now) {
            return None;
        }

        let mut floating = std::mem::replace(&mut self.floating, FloatingBar::empty());
        // A hard close leaves the replacement fully empty either way: the
        // fresh accumulator carries no residual timestamps.

        if floating.is_null() {
            match self.history.last() {
                Some(prev) => floating.fill_forward(prev.close, prev.close_time),
                None => {
                    self.last_sealed_volume = self.current_total_volume;
                    return None;
                }
            }
        }

        let bar = floating.seal(
            now,
            self.rule.marks_session_open(now),
            self.rule.marks_session_close(now),
        );
        self.history.push(bar.clone());

        // The next bar's cumulative delta starts from this total.
        self.last_sealed_volume = self.current_total_volume;

        Some(bar)
    }

    /// Append an already-sealed bar (replay paths). Bars with no price data
    /// are skipped. Returns the appended bar.
    pub fn append_sealed(&mut self, mut bar: Bar) -> Option<Bar> {
        if bar.has_no_prices() {
            return None;
        }

        bar.is_floating = false;
        self.current_time = Some(bar.close_time);
        self.history.push(bar.clone());
        Some(bar)
    }

    /// The sealed one-minute history.
    pub fn history(&self) -> &BarHistory {
        &self.history
    }

    /// The last `n` sealed bars in chronological order.
    pub fn raw_bars(&self, n: usize) -> Vec<Bar> {
        self.history.tail(n)
    }

    /// All sealed bars plus a snapshot of the floating bar when it holds
    /// data. This is the series the bulk aggregation path consumes.
    pub fn bars_with_floating(&self) -> Vec<Bar> {
        let mut bars: Vec<Bar> = self.history.iter().cloned().collect();
        if let Some(snapshot) = self
            .floating
            .snapshot(self.current_time.unwrap_or_default())
        {
            bars.push(snapshot);
        }
        bars
    }

    /// Reset the floating bar to its initial empty state.
    pub fn clear_floating(&mut self) {
        self.floating = FloatingBar::empty();
    }

    /// Session reset: drop all history and the floating bar.
    pub fn clear_all(&mut self) {
        self.history.clear();
        self.floating = FloatingBar::empty();
    }

    /// Write the full history (plus a non-null floating bar) to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HistoryFileError> {
        let floating = self
            .floating
            .snapshot(self.current_time.unwrap_or_default());
        store::save(path.as_ref(), self.history.iter(), floating.as_ref())
    }

    /// Load a history file, replacing all current state. Returns the number
    /// of sealed bars loaded; a missing or unreadable file yields 0.
    ///
    /// The most recent bar is reclassified against the tracker clock: a bar
    /// whose close time has not yet arrived becomes the floating bar, and an
    /// already-elapsed floating row is coerced to sealed.
    pub fn load(&mut self, path: impl AsRef<Path>) -> usize {
        self.history.clear();
        self.floating = FloatingBar::empty();

        let bars = store::load(path.as_ref(), self.rule.as_ref());
        if bars.is_empty() {
            return 0;
        }

        let reference = self.resolve_reference_time(&bars);
        self.adopt(bars, reference);
        self.history.len()
    }

    /// Import an MMS-flavor export (two header lines, close-time keyed rows),
    /// replacing all current state. Returns the number of sealed bars.
    pub fn import_mms(&mut self, path: impl AsRef<Path>, now: NaiveDateTime) -> usize {
        self.last_import_time = Some(now);
        self.history.clear();
        self.floating = FloatingBar::empty();

        let bars = store::import_mms(path.as_ref(), self.rule.as_ref());
        if bars.is_empty() {
            return 0;
        }

        self.adopt(bars, now);
        self.history.len()
    }

    /// Time of the last MMS import, if any.
    pub fn last_import_time(&self) -> Option<NaiveDateTime> {
        self.last_import_time
    }

    /// Reference clock for load-time reclassification: the caller-set clock
    /// when available, else the newest close time in the file (which makes
    /// every row already elapsed).
    fn resolve_reference_time(&self, bars: &[Bar]) -> NaiveDateTime {
        match self.current_time {
            Some(t) => t,
            None => bars
                .iter()
                .map(|b| b.close_time)
                .max()
                .unwrap_or_default(),
        }
    }

    fn adopt(&mut self, mut bars: Vec<Bar>, reference: NaiveDateTime) {
        let reclassify = bars
            .last()
            .map(|last| last.is_floating || last.close_time > reference)
            .unwrap_or(false);

        let mut floating = None;
        if reclassify {
            if let Some(last) = bars.pop() {
                if last.close_time > reference {
                    floating = Some(last);
                } else {
                    // Elapsed floating row: coerce to sealed history.
                    let mut sealed = last;
                    sealed.is_floating = false;
                    bars.push(sealed);
                }
            }
        }

        for bar in bars {
            self.history.push(bar);
        }
        if let Some(bar) = floating {
            debug!(close_time = %bar.close_time, "restored floating bar from file");
            self.floating = FloatingBar::from_bar(bar);
        }

        let max_close = self.history.last().map(|b| b.close_time);
        let new_clock = match (self.current_time, max_close) {
            (Some(t), Some(c)) => Some(t.max(c)),
            (None, Some(c)) => Some(c),
            (t, None) => t,
        };
        self.current_time = new_clock;
    }
}

/// Drop sub-second precision, mirroring the feed's minute/second clock.
fn truncate_to_second(t: NaiveDateTime) -> NaiveDateTime {
    t - Duration::nanoseconds(i64::from(t.time().nanosecond()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::TaifexRule;
    use chrono::NaiveDate;

    fn dt(h: u32, min: u32, s: u32) -> NaiveDateTime {
        // 2025-01-07 is a Tuesday with all three segments active.
        NaiveDate::from_ymd_opt(2025, 1, 7)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn tracker(mode: VolumeMode) -> OneMinuteBarTracker {
        OneMinuteBarTracker::new(Arc::new(TaifexRule::weekday_only()), mode)
    }

    #[test]
    fn test_open_minute_ticks_then_seal() {
        let mut t = tracker(VolumeMode::Cumulative);

        t.set_current_time(dt(8, 45, 10));
        t.on_tick(Decimal::from(17000));
        t.set_current_time(dt(8, 45, 40));
        t.on_tick(Decimal::from(17005));

        let bar = t.seal_current_bar(dt(8, 46, 0)).expect("sealed");
        assert_eq!(bar.open, Decimal::from(17000));
        assert_eq!(bar.high, Decimal::from(17005));
        assert_eq!(bar.low, Decimal::from(17000));
        assert_eq!(bar.close, Decimal::from(17005));
        assert!(bar.contains_market_open);
        assert!(bar.is_alignment_bar);
        assert_eq!(bar.close_time, dt(8, 46, 0));
        assert_eq!(bar.start_time, dt(8, 45, 10));
        assert_eq!(t.history().len(), 1);
    }

    #[test]
    fn test_seal_refused_outside_session() {
        let mut t = tracker(VolumeMode::Cumulative);
        t.set_current_time(dt(7, 0, 0));
        t.on_tick(Decimal::from(17000));
        assert!(t.seal_current_bar(dt(7, 1, 0)).is_none());
        assert_eq!(t.history().len(), 0);
    }

    #[test]
    fn test_seal_refused_at_opening_minute() {
        let mut t = tracker(VolumeMode::Cumulative);
        t.set_current_time(dt(8, 45, 0));
        t.on_tick(Decimal::from(17000));
        // 08:45 seeds the first bar; it must not seal there.
        assert!(t.seal_current_bar(dt(8, 45, 0)).is_none());
        assert!(t.seal_current_bar(dt(8, 46, 0)).is_some());
    }

    #[test]
    fn test_quiet_minute_fills_forward() {
        let mut t = tracker(VolumeMode::Cumulative);

        t.set_current_time(dt(9, 0, 10));
        t.on_tick(Decimal::from(17000));
        t.seal_current_bar(dt(9, 1, 0)).unwrap();

        // No ticks between 09:01 and 09:02.
        let quiet = t.seal_current_bar(dt(9, 2, 0)).expect("filled forward");
        assert!(quiet.is_null);
        assert_eq!(quiet.open, Decimal::from(17000));
        assert_eq!(quiet.high, Decimal::from(17000));
        assert_eq!(quiet.low, Decimal::from(17000));
        assert_eq!(quiet.close, Decimal::from(17000));
        assert_eq!(quiet.start_time, dt(9, 1, 0));
        assert_eq!(quiet.volume, 0);
    }

    #[test]
    fn test_quiet_minute_with_no_prior_close_is_skipped() {
        let mut t = tracker(VolumeMode::Cumulative);
        assert!(t.seal_current_bar(dt(9, 1, 0)).is_none());
        assert_eq!(t.history().len(), 0);
    }

    #[test]
    fn test_at_most_one_floating_bar() {
        let mut t = tracker(VolumeMode::Cumulative);
        for minute in 0..5u32 {
            t.set_current_time(dt(9, minute, 10));
            t.on_tick(Decimal::from(17000 + i64::from(minute)));
            t.seal_current_bar(dt(9, minute + 1, 0));
        }
        // After any sequence, exactly zero or one floating bar exists.
        assert!(t.bars_with_floating().len() <= t.history().len() + 1);
        assert_eq!(t.history().len(), 5);
    }

    #[test]
    fn test_incremental_volume_mode() {
        let mut t = tracker(VolumeMode::Incremental);
        t.set_current_time(dt(9, 0, 10));
        t.on_tick(Decimal::from(17000));
        t.set_volume(3);
        t.set_volume(4);
        assert_eq!(t.floating_volume(), 7);
    }

    #[test]
    fn test_cumulative_volume_mode_delta() {
        let mut t = tracker(VolumeMode::Cumulative);
        t.set_current_time(dt(9, 0, 10));
        t.on_tick(Decimal::from(17000));

        t.set_volume(100);
        assert_eq!(t.floating_volume(), 100);

        let bar = t.seal_current_bar(dt(9, 1, 0)).unwrap();
        assert_eq!(bar.volume, 100);

        // Next minute: delta against the sealed baseline.
        t.on_tick(Decimal::from(17001));
        t.set_volume(150);
        assert_eq!(t.floating_volume(), 50);
    }

    #[test]
    fn test_cumulative_volume_reset_detection() {
        let mut t = tracker(VolumeMode::Cumulative);
        t.set_volume_base(500);

        t.set_current_time(dt(15, 0, 10));
        t.on_tick(Decimal::from(17000));

        // Total smaller than the baseline: exchange reset, baseline drops to 0.
        t.set_volume(30);
        assert_eq!(t.floating_volume(), 30);
    }

    #[test]
    fn test_on_tick_with_volume() {
        let mut t = tracker(VolumeMode::Incremental);
        t.set_current_time(dt(9, 0, 10));
        t.on_tick_with_volume(Decimal::from(17000), 2);
        t.on_tick_with_volume(Decimal::from(17001), 5);
        assert_eq!(t.floating_volume(), 7);
    }

    #[test]
    fn test_clear_all_resets_session_state() {
        let mut t = tracker(VolumeMode::Cumulative);
        t.set_current_time(dt(9, 0, 10));
        t.on_tick(Decimal::from(17000));
        t.seal_current_bar(dt(9, 1, 0)).unwrap();
        t.on_tick(Decimal::from(17002));

        t.clear_all();
        assert_eq!(t.history().len(), 0);
        assert!(t.bars_with_floating().is_empty());
    }

    #[test]
    fn test_market_currently_open() {
        let mut t = tracker(VolumeMode::Cumulative);
        t.set_current_time(dt(9, 0, 0));
        assert!(t.is_market_currently_open());
        t.set_current_time(dt(7, 0, 0));
        assert!(!t.is_market_currently_open());
    }
}
