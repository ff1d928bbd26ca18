//! Trading calendar with day-granularity overrides.
//!
//! The calendar answers one question: is a given date a trading day? A plain
//! text override file can force individual dates open (`開市`/`OPEN`) or
//! closed (`休市`/`HOLIDAY`); dates without an override fall back to the
//! weekday rule (Monday through Friday trade, weekends do not).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, Weekday};
use tracing::{debug, warn};

const DEFAULT_FILE_TEMPLATE: &str = "\
# Trading calendar overrides
#
# One override per line: YYYY-MM-DD,<status>[,comment]
#   status OPEN    (or 開市) forces a trading day
#   status HOLIDAY (or 休市) forces a non-trading day
# Dates not listed follow the weekday rule: Mon-Fri open, Sat-Sun closed.
#
# Example:
# 2025-01-23,HOLIDAY,Lunar New Year
";

/// Day-granularity trading calendar.
///
/// Constructed once at startup and read-only afterwards; [`reload`](Self::reload)
/// is the explicit rare exception.
#[derive(Debug)]
pub struct TradingCalendar {
    holidays: HashSet<NaiveDate>,
    special_open_days: HashSet<NaiveDate>,
    path: PathBuf,
}

impl TradingCalendar {
    /// Load a calendar from the override file at `path`.
    ///
    /// A missing file is generated in place with a commented template; an
    /// unreadable file leaves the calendar on weekday defaults. Neither case
    /// is an error.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let mut calendar = Self {
            holidays: HashSet::new(),
            special_open_days: HashSet::new(),
            path: path.as_ref().to_path_buf(),
        };
        calendar.reload();
        calendar
    }

    /// Calendar with no overrides (weekday rule only).
    pub fn weekday_only() -> Self {
        Self {
            holidays: HashSet::new(),
            special_open_days: HashSet::new(),
            path: PathBuf::new(),
        }
    }

    /// Re-read the override file, replacing all current overrides.
    pub fn reload(&mut self) {
        self.holidays.clear();
        self.special_open_days.clear();

        if self.path.as_os_str().is_empty() {
            return;
        }

        if !self.path.exists() {
            if let Err(e) = fs::write(&self.path, DEFAULT_FILE_TEMPLATE) {
                warn!(path = %self.path.display(), error = %e, "could not generate default calendar file");
            }
            return;
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read calendar file, using weekday defaults");
                return;
            }
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() < 2 {
                continue;
            }

            let Ok(date) = NaiveDate::parse_from_str(parts[0].trim(), "%Y-%m-%d") else {
                debug!(line, "skipping calendar line with unparseable date");
                continue;
            };

            let status = parts[1].trim();
            if status == "休市" || status.eq_ignore_ascii_case("HOLIDAY") {
                self.holidays.insert(date);
            } else if status == "開市" || status.eq_ignore_ascii_case("OPEN") {
                self.special_open_days.insert(date);
            }
        }

        debug!(
            holidays = self.holidays.len(),
            special_open = self.special_open_days.len(),
            "calendar overrides loaded"
        );
    }

    /// True if `date` is a trading day under the loaded overrides.
    ///
    /// Precedence: forced open, then forced holiday, then the weekday rule.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if self.special_open_days.contains(&date) {
            return true;
        }

        if self.holidays.contains(&date) {
            return false;
        }

        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Number of forced-holiday overrides currently loaded.
    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }
}
