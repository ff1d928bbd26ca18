//! K-bar records and the bounded one-minute history buffer.

pub mod store;
pub mod tracker;

use std::collections::VecDeque;

use chrono::{Duration, NaiveDateTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use tracker::{OneMinuteBarTracker, VolumeMode};

/// Default capacity of the one-minute history buffer.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// An OHLCV candle over one time window.
///
/// `is_null` means no trades occurred in the interval; the OHLC fields then
/// carry the prior close forward as a flat candle. `is_floating` marks a bar
/// whose period has not yet reached a boundary. `is_alignment_bar` marks a
/// bar seeded at a session's opening minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub start_time: NaiveDateTime,
    pub close_time: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub contains_market_open: bool,
    pub contains_market_close: bool,
    pub is_null: bool,
    pub is_floating: bool,
    pub is_alignment_bar: bool,
}

impl Bar {
    /// True when the bar carries no price data at all. Such bars never enter
    /// the history buffer.
    pub fn has_no_prices(&self) -> bool {
        self.open.is_zero() && self.high.is_zero() && self.low.is_zero() && self.close.is_zero()
    }
}

/// The tracker-private accumulator for the in-progress minute.
///
/// At most one exists per tracker. Times stay unset until the first tick of
/// the minute arrives (or until restored from a saved floating row); sealing
/// converts the accumulator into a [`Bar`] and replaces it with a fresh empty
/// one.
#[derive(Debug, Clone)]
pub struct FloatingBar {
    start_time: Option<NaiveDateTime>,
    close_time: Option<NaiveDateTime>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: u64,
    contains_market_open: bool,
    contains_market_close: bool,
    is_null: bool,
    is_alignment_bar: bool,
}

impl FloatingBar {
    /// Fresh empty accumulator.
    pub fn empty() -> Self {
        Self {
            start_time: None,
            close_time: None,
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            volume: 0,
            contains_market_open: false,
            contains_market_close: false,
            is_null: true,
            is_alignment_bar: false,
        }
    }

    /// Restore an accumulator from a bar loaded off disk.
    pub fn from_bar(bar: Bar) -> Self {
        Self {
            start_time: Some(bar.start_time),
            close_time: Some(bar.close_time),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            contains_market_open: bar.contains_market_open,
            contains_market_close: bar.contains_market_close,
            is_null: bar.is_null,
            is_alignment_bar: bar.is_alignment_bar,
        }
    }

    /// True until the first tick of the current minute arrives.
    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// Volume accumulated so far.
    pub fn volume(&self) -> u64 {
        self.volume
    }

    /// Last traded price, if any tick has been seen.
    pub fn close(&self) -> Option<Decimal> {
        (!self.is_null).then_some(self.close)
    }

    /// Seed or extend the accumulator with a trade price. `at` stamps the
    /// bar's start time on the first tick of the minute.
    pub fn apply_tick(&mut self, price: Decimal, at: Option<NaiveDateTime>) {
        if self.is_null {
            self.open = price;
            self.high = price;
            self.low = price;
            self.close = price;
            self.start_time = at;
            self.is_null = false;
        } else {
            if price > self.high {
                self.high = price;
            }
            if price < self.low {
                self.low = price;
            }
            self.close = price;
        }
    }

    /// Add traded quantity to the accumulated volume.
    pub fn add_volume(&mut self, qty: u64) {
        self.volume += qty;
    }

    /// Overwrite the accumulated volume (cumulative-delta mode).
    pub fn set_volume(&mut self, volume: u64) {
        self.volume = volume;
    }

    /// Fill a quiet minute forward from the prior sealed bar: a flat candle
    /// at the previous close. The bar stays null — no trades happened.
    pub fn fill_forward(&mut self, prev_close: Decimal, prev_close_time: NaiveDateTime) {
        self.open = prev_close;
        self.high = prev_close;
        self.low = prev_close;
        self.close = prev_close;
        self.start_time = Some(prev_close_time);
    }

    /// Convert into a sealed [`Bar`] closing at `close_time`, stamping the
    /// session flags.
    pub fn seal(
        self,
        close_time: NaiveDateTime,
        marks_open: bool,
        marks_close: bool,
    ) -> Bar {
        Bar {
            start_time: self.start_time.unwrap_or(close_time - Duration::minutes(1)),
            close_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            contains_market_open: self.contains_market_open || marks_open,
            contains_market_close: self.contains_market_close || marks_close,
            is_null: self.is_null,
            is_floating: false,
            is_alignment_bar: self.is_alignment_bar || marks_open,
        }
    }

    /// Snapshot as a floating [`Bar`] for queries and saves. Returns `None`
    /// while the accumulator is null. An unset close time is projected to the
    /// minute after `now`.
    pub fn snapshot(&self, now: NaiveDateTime) -> Option<Bar> {
        if self.is_null {
            return None;
        }

        let close_time = match self.close_time {
            Some(t) if self.start_time.map_or(true, |s| t >= s) => t,
            _ => truncate_to_minute(now) + Duration::minutes(1),
        };

        Some(Bar {
            start_time: self.start_time.unwrap_or(close_time - Duration::minutes(1)),
            close_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            contains_market_open: self.contains_market_open,
            contains_market_close: self.contains_market_close,
            is_null: self.is_null,
            is_floating: true,
            is_alignment_bar: self.is_alignment_bar,
        })
    }
}

/// Drop sub-minute precision.
pub(crate) fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t - Duration::seconds(i64::from(t.time().second()))
        - Duration::nanoseconds(i64::from(t.time().nanosecond()))
}

/// Time-ordered, capacity-bounded buffer of sealed one-minute bars.
///
/// Oldest bars are evicted first when the capacity is exceeded.
#[derive(Debug, Clone)]
pub struct BarHistory {
    data: VecDeque<Bar>,
    capacity: usize,
}

impl BarHistory {
    /// Buffer with the default capacity (10,000 bars).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Buffer with an explicit capacity bound.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append a sealed bar, evicting the oldest on overflow.
    pub fn push(&mut self, bar: Bar) {
        self.data.push_back(bar);
        while self.data.len() > self.capacity {
            self.data.pop_front();
        }
    }

    /// Number of sealed bars held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no bars are held.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Most recent sealed bar.
    pub fn last(&self) -> Option<&Bar> {
        self.data.back()
    }

    /// Bar at chronological position `i` (0 = oldest).
    pub fn get(&self, i: usize) -> Option<&Bar> {
        self.data.get(i)
    }

    /// Remove and return the most recent bar.
    pub fn pop_last(&mut self) -> Option<Bar> {
        self.data.pop_back()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.data.iter()
    }

    /// Iterate newest to oldest.
    pub fn iter_reverse(&self) -> impl Iterator<Item = &Bar> {
        self.data.iter().rev()
    }

    /// The last `n` bars in chronological order.
    pub fn tail(&self, n: usize) -> Vec<Bar> {
        let skip = self.data.len().saturating_sub(n);
        self.data.iter().skip(skip).cloned().collect()
    }

    /// Drop all bars.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl Default for BarHistory {
    fn default() -> Self {
        Self::new()
    }
}
