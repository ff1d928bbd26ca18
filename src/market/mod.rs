//! Market session rules.
//!
//! A [`MarketSessionRule`] encodes one exchange's segmented trading day:
//! which minutes the market is open, where sessions open and close, when the
//! in-progress one-minute bar must be sealed, and how higher-period
//! boundaries are laid out over the 1,440 minutes of a day.

pub mod taifex;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

pub use taifex::TaifexRule;

/// Minutes in one calendar day.
pub const MINUTES_PER_DAY: usize = 1440;

/// One sub-daily trading window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingSession {
    /// Session name (e.g. "day session")
    pub name: String,
    /// First minute of the session
    pub start: NaiveTime,
    /// Declared end time; `None` means the session runs to midnight and has
    /// no forced-seal minute of its own
    pub end: Option<NaiveTime>,
    /// True when the session logically continues past midnight
    pub cross_day: bool,
}

/// Per-period table marking which minutes of the day close a period.
///
/// Exactly [`MINUTES_PER_DAY`] entries, keyed by minute-of-day. Built once
/// per registered period and reused for every calendar day.
#[derive(Debug, Clone)]
pub struct SeparationTable {
    period: u32,
    boundaries: Vec<bool>,
}

impl SeparationTable {
    /// Build a table from a boundary predicate over minute-of-day.
    pub fn build(period: u32, mut is_boundary: impl FnMut(usize) -> bool) -> Self {
        let boundaries = (0..MINUTES_PER_DAY).map(|m| is_boundary(m)).collect();
        Self { period, boundaries }
    }

    /// Period in minutes this table was built for.
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Minute-of-day key for a timestamp.
    pub fn minute_of(t: NaiveDateTime) -> usize {
        (t.time().hour() * 60 + t.time().minute()) as usize
    }

    /// True if the given minute-of-day is a period boundary.
    ///
    /// Out-of-range minutes (below 00:00 on the unwrapped axis) are not
    /// boundaries; see the previous-boundary search in the aggregator.
    pub fn is_boundary_minute(&self, minute_of_day: i32) -> bool {
        if minute_of_day < 0 || minute_of_day as usize >= MINUTES_PER_DAY {
            return false;
        }
        self.boundaries[minute_of_day as usize]
    }

    /// True if the timestamp's minute-of-day is a period boundary.
    pub fn is_boundary_at(&self, t: NaiveDateTime) -> bool {
        self.boundaries[Self::minute_of(t)]
    }

    /// Number of entries (always [`MINUTES_PER_DAY`]).
    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    /// True when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// Count of boundary minutes, for diagnostics.
    pub fn boundary_count(&self) -> usize {
        self.boundaries.iter().filter(|b| **b).count()
    }
}

/// Capability interface over one market's trading-day structure.
///
/// All timestamps are exchange wall-clock local time, zoneless.
pub trait MarketSessionRule: Send + Sync {
    /// Human-readable market name.
    fn market_name(&self) -> &str;

    /// The market's sub-daily trading windows.
    fn sessions(&self) -> &[TradingSession];

    /// True if the market is open at `t`.
    fn is_market_open(&self, t: NaiveDateTime) -> bool;

    /// True only at the exact minute a session opens, and only when the
    /// market is actually open there.
    fn is_open_boundary(&self, t: NaiveDateTime) -> bool;

    /// True only at the exact minute a session closes, and only when the
    /// market is actually open there.
    fn is_close_boundary(&self, t: NaiveDateTime) -> bool;

    /// True when the in-progress one-minute bar should be sealed at `t`.
    ///
    /// Unconditionally true at a session's declared end time (the last bar of
    /// a session is always closed out, even on a holiday); otherwise true
    /// inside an open session except at the session's own opening minute,
    /// which seeds the next bar instead of closing one.
    fn should_seal_bar(&self, t: NaiveDateTime) -> bool;

    /// True if `date` is a trading day.
    fn is_trading_day(&self, date: NaiveDate) -> bool;

    /// True when a bar closing at `close_time` is the first bar of a session
    /// (exact clock-time match, unqualified by the calendar; used to stamp
    /// `contains_market_open`/`is_alignment_bar` and to recompute flags on
    /// legacy imports).
    fn marks_session_open(&self, close_time: NaiveDateTime) -> bool;

    /// True when a bar closing at `close_time` is the last bar of a session
    /// (exact clock-time match, unqualified by the calendar).
    fn marks_session_close(&self, close_time: NaiveDateTime) -> bool;

    /// Build the separation table for an N-minute period.
    fn build_separation_table(&self, period: u32) -> SeparationTable;
}
