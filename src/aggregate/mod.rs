//! Multi-period resampling of one-minute bars.
//!
//! A [`PeriodAggregator`] holds one separation table per registered period and
//! folds one-minute bars into N-minute bars at the table's boundary minutes.
//! It never looks at the wall clock itself; all timing comes from the bar
//! close times its callers pass in.

pub mod policy;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::bars::{Bar, BarHistory};
use crate::error::AggregateError;
use crate::market::{MarketSessionRule, SeparationTable};

pub use policy::{BacktestSealing, BarSealingPolicy, LiveSealing};

/// Maximum minutes scanned ahead when projecting a floating bar's close time.
const MAX_PROJECTION_SCAN: usize = 1440 * 2;

/// Resamples one-minute bars into higher periods.
pub struct PeriodAggregator {
    rule: Arc<dyn MarketSessionRule>,
    tables: BTreeMap<u32, SeparationTable>,
    last_emitted_close: HashMap<u32, NaiveDateTime>,
}

impl PeriodAggregator {
    pub fn new(rule: Arc<dyn MarketSessionRule>) -> Self {
        Self {
            rule,
            tables: BTreeMap::new(),
            last_emitted_close: HashMap::new(),
        }
    }

    /// Register an N-minute period. Idempotent; re-registering an existing
    /// period keeps its table and its duplicate-suppression state.
    pub fn register_period(&mut self, period: u32) {
        if !self.tables.contains_key(&period) {
            let table = self.rule.build_separation_table(period);
            self.tables.insert(period, table);
        }
        debug!(periods = ?self.registered_periods(), "registered periods");
    }

    /// Drop a period's table and its duplicate-suppression state.
    pub fn unregister_period(&mut self, period: u32) {
        self.tables.remove(&period);
        self.last_emitted_close.remove(&period);
        debug!(periods = ?self.registered_periods(), "registered periods");
    }

    /// Registered periods in ascending order.
    pub fn registered_periods(&self) -> Vec<u32> {
        self.tables.keys().copied().collect()
    }

    pub fn is_registered(&self, period: u32) -> bool {
        self.tables.contains_key(&period)
    }

    /// True when `close_time` was already emitted for `period`.
    pub fn is_duplicate(&self, period: u32, close_time: NaiveDateTime) -> bool {
        self.last_emitted_close.get(&period) == Some(&close_time)
    }

    /// Remember `close_time` as the last emission for `period`.
    pub fn record_emission(&mut self, period: u32, close_time: NaiveDateTime) {
        self.last_emitted_close.insert(period, close_time);
    }

    /// True when `t`'s minute-of-day is a boundary for `period`.
    pub fn is_boundary(&self, period: u32, t: NaiveDateTime) -> bool {
        self.tables
            .get(&period)
            .map(|table| table.is_boundary_at(t))
            .unwrap_or(false)
    }

    /// Fold a window of one-minute bars into one aggregate.
    ///
    /// Open comes from the first bar, close from the last, high/low span the
    /// window, volumes sum, session flags OR together, and the aggregate is
    /// null only when every constituent is.
    pub fn aggregate_window(&self, bars: &[Bar]) -> Result<Bar, AggregateError> {
        let (first, last) = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(AggregateError::EmptyWindow),
        };

        Ok(Bar {
            start_time: first.start_time,
            close_time: last.close_time,
            open: first.open,
            high: bars.iter().map(|b| b.high).max().unwrap_or(first.high),
            low: bars.iter().map(|b| b.low).min().unwrap_or(first.low),
            close: last.close,
            volume: bars.iter().map(|b| b.volume).sum(),
            contains_market_open: bars.iter().any(|b| b.contains_market_open),
            contains_market_close: bars.iter().any(|b| b.contains_market_close),
            is_null: bars.iter().all(|b| b.is_null),
            is_floating: false,
            is_alignment_bar: bars.iter().any(|b| b.is_alignment_bar),
        })
    }

    /// Aggregate the period window that just completed at boundary minute
    /// `now`, reading the sealed one-minute history newest-first.
    ///
    /// The previous boundary is searched at most `period` minutes back on the
    /// minute-of-day axis without wrapping below midnight; when none is found
    /// the window falls back to the last `period` bars.
    pub fn current_period_bar(
        &self,
        period: u32,
        history: &BarHistory,
        now: NaiveDateTime,
    ) -> Result<Bar, AggregateError> {
        let table = self
            .tables
            .get(&period)
            .ok_or(AggregateError::UnregisteredPeriod(period))?;

        let minute = SeparationTable::minute_of(now) as i32;
        if !table.is_boundary_minute(minute) {
            return Err(AggregateError::NotABoundary {
                period,
                time: now.format("%Y-%m-%d %H:%M").to_string(),
            });
        }

        let previous = (1..=period as i32)
            .map(|back| minute - back)
            .find(|&m| table.is_boundary_minute(m));

        let mut window: Vec<Bar> = Vec::new();
        for bar in history.iter_reverse() {
            let bar_minute = SeparationTable::minute_of(bar.close_time) as i32;

            match previous {
                Some(prev) => {
                    if bar_minute > prev && bar_minute <= minute {
                        window.push(bar.clone());
                    }
                    if bar_minute <= prev {
                        break;
                    }
                }
                None => {
                    window.push(bar.clone());
                    if window.len() >= period as usize {
                        break;
                    }
                }
            }
        }

        if window.is_empty() {
            return Err(AggregateError::NoBars);
        }

        window.reverse();
        self.aggregate_window(&window)
    }

    /// Resample a full one-minute series (sealed bars plus an optional
    /// trailing floating snapshot) into `period`-minute bars.
    ///
    /// An unregistered period is registered for the duration of the call and
    /// deregistered afterwards, leaving no state behind. The trailing
    /// remainder becomes a floating aggregate with a projected close time.
    pub fn history_for(&mut self, bars: &[Bar], period: u32) -> Vec<Bar> {
        let was_registered = self.is_registered(period);
        if !was_registered {
            self.register_period(period);
        }

        let result = self.resample(bars, period);

        if !was_registered {
            self.unregister_period(period);
        }
        result
    }

    fn resample(&self, bars: &[Bar], period: u32) -> Vec<Bar> {
        let Some(table) = self.tables.get(&period) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        let mut window: Vec<Bar> = Vec::new();

        for bar in bars {
            window.push(bar.clone());

            if table.is_boundary_at(bar.close_time) {
                if let Ok(aggregated) = self.finish_window(&window, table) {
                    result.push(aggregated);
                }
                window.clear();
            }
        }

        // Remainder after the last boundary: one floating aggregate.
        if !window.is_empty() {
            if let Ok(mut floating) = self.aggregate_window(&window) {
                floating.is_floating = true;
                floating.close_time =
                    self.project_next_boundary(floating.close_time, table);
                result.push(floating);
            }
        }

        result
    }

    fn finish_window(
        &self,
        window: &[Bar],
        table: &SeparationTable,
    ) -> Result<Bar, AggregateError> {
        let has_floating = window.iter().any(|b| b.is_floating);
        let mut aggregated = self.aggregate_window(window)?;
        if has_floating {
            aggregated.is_floating = true;
            aggregated.close_time = self.project_next_boundary(aggregated.close_time, table);
        }
        Ok(aggregated)
    }

    /// Next minute after `reference` that is both a table boundary and an
    /// open-market minute. The scan is capped at two days; when nothing
    /// qualifies the scan start is returned as-is.
    fn project_next_boundary(
        &self,
        reference: NaiveDateTime,
        table: &SeparationTable,
    ) -> NaiveDateTime {
        let start = crate::bars::truncate_to_minute(reference) + Duration::minutes(1);

        let mut t = start;
        for _ in 0..MAX_PROJECTION_SCAN {
            if table.is_boundary_at(t) && self.rule.is_market_open(t) {
                return t;
            }
            t += Duration::minutes(1);
        }
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::TaifexRule;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn dt(h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 7)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn bar(close: NaiveDateTime, o: i64, h: i64, l: i64, c: i64, v: u64) -> Bar {
        Bar {
            start_time: close - Duration::minutes(1),
            close_time: close,
            open: Decimal::from(o),
            high: Decimal::from(h),
            low: Decimal::from(l),
            close: Decimal::from(c),
            volume: v,
            contains_market_open: false,
            contains_market_close: false,
            is_null: false,
            is_floating: false,
            is_alignment_bar: false,
        }
    }

    fn aggregator() -> PeriodAggregator {
        PeriodAggregator::new(Arc::new(TaifexRule::weekday_only()))
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut agg = aggregator();
        agg.register_period(5);
        agg.register_period(5);
        agg.register_period(15);
        assert_eq!(agg.registered_periods(), vec![5, 15]);

        agg.unregister_period(5);
        assert_eq!(agg.registered_periods(), vec![15]);
    }

    #[test]
    fn test_aggregate_window_folds_ohlcv() {
        let agg = aggregator();
        let window = vec![
            bar(dt(9, 1), 100, 105, 99, 104, 10),
            bar(dt(9, 2), 104, 110, 103, 108, 20),
            bar(dt(9, 3), 108, 109, 101, 102, 5),
        ];

        let out = agg.aggregate_window(&window).unwrap();
        assert_eq!(out.open, Decimal::from(100));
        assert_eq!(out.high, Decimal::from(110));
        assert_eq!(out.low, Decimal::from(99));
        assert_eq!(out.close, Decimal::from(102));
        assert_eq!(out.volume, 35);
        assert_eq!(out.start_time, dt(9, 0));
        assert_eq!(out.close_time, dt(9, 3));
        assert!(!out.is_null);
        assert!(!out.is_floating);
    }

    #[test]
    fn test_aggregate_empty_window_is_error() {
        let agg = aggregator();
        assert!(matches!(
            agg.aggregate_window(&[]),
            Err(AggregateError::EmptyWindow)
        ));
    }

    #[test]
    fn test_null_only_when_all_null() {
        let agg = aggregator();
        let mut quiet = bar(dt(9, 1), 100, 100, 100, 100, 0);
        quiet.is_null = true;
        let active = bar(dt(9, 2), 100, 101, 100, 101, 3);

        let mixed = agg.aggregate_window(&[quiet.clone(), active]).unwrap();
        assert!(!mixed.is_null);

        let mut quiet2 = quiet.clone();
        quiet2.close_time = dt(9, 2);
        let all_null = agg.aggregate_window(&[quiet, quiet2]).unwrap();
        assert!(all_null.is_null);
    }

    #[test]
    fn test_current_period_bar_at_boundary() {
        let mut agg = aggregator();
        agg.register_period(5);

        let mut history = BarHistory::new();
        // Evening session: 15:01..=15:05, boundary at 15:05.
        for (i, min) in (1..=5).enumerate() {
            history.push(bar(dt(15, min), 100 + i as i64, 110, 90, 105, 1));
        }

        let out = agg.current_period_bar(5, &history, dt(15, 5)).unwrap();
        assert_eq!(out.start_time, dt(15, 0));
        assert_eq!(out.close_time, dt(15, 5));
        assert_eq!(out.volume, 5);
    }

    #[test]
    fn test_current_period_bar_rejects_non_boundary() {
        let mut agg = aggregator();
        agg.register_period(5);
        let history = BarHistory::new();

        assert!(matches!(
            agg.current_period_bar(5, &history, dt(15, 3)),
            Err(AggregateError::NotABoundary { period: 5, .. })
        ));
    }

    #[test]
    fn test_current_period_bar_unregistered() {
        let agg = aggregator();
        let history = BarHistory::new();
        assert!(matches!(
            agg.current_period_bar(5, &history, dt(15, 5)),
            Err(AggregateError::UnregisteredPeriod(5))
        ));
    }

    #[test]
    fn test_current_period_bar_empty_history() {
        let mut agg = aggregator();
        agg.register_period(5);
        let history = BarHistory::new();
        assert!(matches!(
            agg.current_period_bar(5, &history, dt(15, 5)),
            Err(AggregateError::NoBars)
        ));
    }

    #[test]
    fn test_history_for_leaves_no_registration_behind() {
        let mut agg = aggregator();
        let bars: Vec<Bar> = (1..=10).map(|m| bar(dt(15, m), 100, 101, 99, 100, 1)).collect();

        let out = agg.history_for(&bars, 5);
        assert_eq!(out.len(), 2);
        assert!(!agg.is_registered(5));

        // A pre-registered period stays registered.
        agg.register_period(5);
        agg.history_for(&bars, 5);
        assert!(agg.is_registered(5));
    }

    #[test]
    fn test_history_for_floating_remainder() {
        let mut agg = aggregator();
        // 15:01..=15:07: one full 5-minute window plus two remainder minutes.
        let bars: Vec<Bar> = (1..=7).map(|m| bar(dt(15, m), 100, 101, 99, 100, 1)).collect();

        let out = agg.history_for(&bars, 5);
        assert_eq!(out.len(), 2);
        assert!(!out[0].is_floating);
        assert_eq!(out[0].close_time, dt(15, 5));
        assert!(out[1].is_floating);
        // Projected to the next open boundary.
        assert_eq!(out[1].close_time, dt(15, 10));
        assert_eq!(out[1].volume, 2);
    }

    #[test]
    fn test_duplicate_suppression_state() {
        let mut agg = aggregator();
        agg.register_period(5);
        assert!(!agg.is_duplicate(5, dt(15, 5)));
        agg.record_emission(5, dt(15, 5));
        assert!(agg.is_duplicate(5, dt(15, 5)));
        assert!(!agg.is_duplicate(5, dt(15, 10)));

        // Deregistration drops suppression state too.
        agg.unregister_period(5);
        assert!(!agg.is_duplicate(5, dt(15, 5)));
    }
}
