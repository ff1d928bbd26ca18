//! Taiwan futures (TAIFEX) session rule.
//!
//! The trading day is partitioned into three segments:
//!
//! - segment 1 `[00:00, 05:00]` — overnight continuation of the previous
//!   evening session
//! - segment 2 `[08:45, 13:45]` — day session
//! - segment 3 `[15:00, 24:00)` — evening session
//!
//! A per-weekday base table says which segments are nominally active; the
//! holiday calendar then overrides it: a holiday closes that date's segments
//! 2 and 3 and the *following* date's segment 1 (segment 1 is the tail of the
//! previous trading day).

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use tracing::debug;

use crate::calendar::TradingCalendar;

use super::{MarketSessionRule, SeparationTable, TradingSession, MINUTES_PER_DAY};

const SEG1_START: NaiveTime = match NaiveTime::from_hms_opt(0, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const SEG1_END: NaiveTime = match NaiveTime::from_hms_opt(5, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const SEG2_START: NaiveTime = match NaiveTime::from_hms_opt(8, 45, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const SEG2_END: NaiveTime = match NaiveTime::from_hms_opt(13, 45, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const SEG3_START: NaiveTime = match NaiveTime::from_hms_opt(15, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};

// Minute-of-day of the 15:00 alignment anchor.
const ANCHOR_MINUTE: usize = 15 * 60;

// First-bar close times of segments 2 and 3 (one minute after the open).
const DAY_FIRST_BAR_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(8, 46, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const NIGHT_FIRST_BAR_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(15, 1, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Trading-day segment a minute falls into (0 = closed gap).
fn segment_of(time: NaiveTime) -> u8 {
    if time <= SEG1_END {
        1
    } else if time >= SEG2_START && time <= SEG2_END {
        2
    } else if time >= SEG3_START {
        3
    } else {
        0
    }
}

/// Which segments are nominally active on a weekday: (s1, s2, s3).
fn base_schedule(day: Weekday) -> (bool, bool, bool) {
    match day {
        Weekday::Mon => (false, true, true),
        Weekday::Tue | Weekday::Wed | Weekday::Thu | Weekday::Fri => (true, true, true),
        Weekday::Sat => (true, false, false),
        Weekday::Sun => (false, false, false),
    }
}

/// TAIFEX session rule: three-segment day template modulated by the holiday
/// calendar.
pub struct TaifexRule {
    calendar: TradingCalendar,
    sessions: Vec<TradingSession>,
}

impl TaifexRule {
    /// Rule backed by the given holiday calendar.
    pub fn new(calendar: TradingCalendar) -> Self {
        Self {
            calendar,
            sessions: vec![
                TradingSession {
                    name: "overnight continuation".to_string(),
                    start: SEG1_START,
                    end: Some(SEG1_END),
                    cross_day: true,
                },
                TradingSession {
                    name: "day session".to_string(),
                    start: SEG2_START,
                    end: Some(SEG2_END),
                    cross_day: false,
                },
                TradingSession {
                    name: "evening session".to_string(),
                    start: SEG3_START,
                    end: None, // runs to midnight; seals at the next day's 05:00
                    cross_day: false,
                },
            ],
        }
    }

    /// Rule with no holiday overrides (weekday table only).
    pub fn weekday_only() -> Self {
        Self::new(TradingCalendar::weekday_only())
    }

    /// Reload the underlying holiday calendar from its file.
    pub fn reload_calendar(&mut self) {
        self.calendar.reload();
    }

    /// Holiday influence: segment 1 inherits the *previous* date's status,
    /// segments 2 and 3 follow the current date.
    fn holiday_allows(&self, t: NaiveDateTime, segment: u8) -> bool {
        let today = t.date();
        match segment {
            1 => self.calendar.is_trading_day(today - Duration::days(1)),
            2 | 3 => self.calendar.is_trading_day(today),
            _ => false,
        }
    }
}

impl Default for TaifexRule {
    fn default() -> Self {
        Self::weekday_only()
    }
}

impl MarketSessionRule for TaifexRule {
    fn market_name(&self) -> &str {
        "TAIFEX"
    }

    fn sessions(&self) -> &[TradingSession] {
        &self.sessions
    }

    fn is_market_open(&self, t: NaiveDateTime) -> bool {
        let segment = segment_of(t.time());
        if segment == 0 {
            return false;
        }

        let (s1, s2, s3) = base_schedule(t.weekday());
        let base = match segment {
            1 => s1,
            2 => s2,
            3 => s3,
            _ => false,
        };
        if !base {
            return false;
        }

        self.holiday_allows(t, segment)
    }

    fn is_open_boundary(&self, t: NaiveDateTime) -> bool {
        let time = t.time();
        if time == SEG2_START || time == SEG3_START {
            return self.is_market_open(t);
        }
        false
    }

    fn is_close_boundary(&self, t: NaiveDateTime) -> bool {
        let time = t.time();
        if time == SEG1_END || time == SEG2_END {
            return self.is_market_open(t);
        }
        false
    }

    fn should_seal_bar(&self, t: NaiveDateTime) -> bool {
        // Declared session ends always seal, even when the calendar says the
        // market is closed; the last bar of a session must be closed out.
        let time = t.time();
        for session in &self.sessions {
            if session.end == Some(time) {
                return true;
            }
        }

        if !self.is_market_open(t) {
            return false;
        }

        // The opening minute seeds the next bar rather than closing one.
        !self.is_open_boundary(t)
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.calendar.is_trading_day(date)
    }

    fn marks_session_open(&self, close_time: NaiveDateTime) -> bool {
        let time = close_time.time();
        time == DAY_FIRST_BAR_CLOSE || time == NIGHT_FIRST_BAR_CLOSE
    }

    fn marks_session_close(&self, close_time: NaiveDateTime) -> bool {
        let time = close_time.time();
        time == SEG1_END || time == SEG2_END
    }

    fn build_separation_table(&self, period: u32) -> SeparationTable {
        // Alignment is anchored to the evening session's 15:00 start for
        // every segment, with hard boundaries at the two session closes.
        // This is a documented simplification; some period/holiday
        // combinations may not align with intuitive expectations.
        let table = SeparationTable::build(period, |minute| {
            let time_of_day = minute as u32;
            let hard_close =
                time_of_day == 5 * 60 || time_of_day == 13 * 60 + 45;
            if hard_close {
                return true;
            }

            let minutes_from_anchor = if minute >= ANCHOR_MINUTE {
                minute - ANCHOR_MINUTE
            } else {
                // Before 15:00 the most recent anchor is the previous day's.
                (MINUTES_PER_DAY - ANCHOR_MINUTE) + minute
            };

            minutes_from_anchor > 0 && minutes_from_anchor % period as usize == 0
        });

        debug!(
            period,
            boundaries = table.boundary_count(),
            "separation table built"
        );
        table
    }
}
