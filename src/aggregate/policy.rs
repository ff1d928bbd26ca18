//! Higher-period sealing policies.
//!
//! When a one-minute bar seals, the engine hands the aggregator and the
//! sealed history to its policy, which decides which higher-period bars
//! completed at that minute. The live and backtest policies differ only in
//! bookkeeping (duplicate suppression, error logging); for the same
//! sealed-bar input they produce identical aggregates.

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::bars::{Bar, BarHistory};
use crate::error::AggregateError;

use super::PeriodAggregator;

/// Decides which higher-period bars completed when a minute closed.
/// Period 1 is never produced here; the engine notifies it directly.
pub trait BarSealingPolicy: Send + Sync {
    fn on_minute_closed(
        &self,
        aggregator: &mut PeriodAggregator,
        history: &BarHistory,
        now: NaiveDateTime,
    ) -> Vec<(u32, Bar)>;
}

/// Live-feed policy: per-period failures are logged and skipped so one bad
/// period never stalls the others, and a boundary shared by consecutive
/// seals emits only once per close time.
pub struct LiveSealing;

impl BarSealingPolicy for LiveSealing {
    fn on_minute_closed(
        &self,
        aggregator: &mut PeriodAggregator,
        history: &BarHistory,
        now: NaiveDateTime,
    ) -> Vec<(u32, Bar)> {
        let mut completed = Vec::new();

        for period in aggregator.registered_periods() {
            if period == 1 {
                continue;
            }
            if !aggregator.is_boundary(period, now) {
                continue;
            }

            match aggregator.current_period_bar(period, history, now) {
                Ok(bar) => {
                    if aggregator.is_duplicate(period, bar.close_time) {
                        continue;
                    }
                    aggregator.record_emission(period, bar.close_time);
                    completed.push((period, bar));
                }
                Err(e) => {
                    warn!(period, error = %e, "period aggregation failed");
                }
            }
        }

        completed
    }
}

/// Backtest policy: boundary check first, window search only on a hit. No
/// duplicate suppression; replayed input is already strictly ordered.
pub struct BacktestSealing;

impl BarSealingPolicy for BacktestSealing {
    fn on_minute_closed(
        &self,
        aggregator: &mut PeriodAggregator,
        history: &BarHistory,
        now: NaiveDateTime,
    ) -> Vec<(u32, Bar)> {
        let mut completed = Vec::new();

        for period in aggregator.registered_periods() {
            if period == 1 {
                continue;
            }
            if !aggregator.is_boundary(period, now) {
                continue;
            }

            match aggregator.current_period_bar(period, history, now) {
                Ok(bar) => completed.push((period, bar)),
                Err(AggregateError::NoBars) => {}
                Err(e) => {
                    debug!(period, error = %e, "backtest aggregation skipped");
                }
            }
        }

        completed
    }
}
