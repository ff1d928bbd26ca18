//! Text persistence for one-minute bar history.
//!
//! Line-oriented comma format with three schema generations, auto-detected by
//! field count:
//!
//! - 12 fields (current): `start,close,O,H,L,C,V,open,close,null,floating,align`
//! - 11 fields (legacy): as above minus the alignment flag; the alignment and
//!   session open/close flags are recomputed from exact clock times
//! - 6 fields (oldest): `close,O,H,L,C,V`; start is close minus one minute,
//!   flags recomputed
//!
//! Times are `yyyy/M/d HH:mm` without zero padding on month/day, booleans are
//! `1`/`0`. Malformed lines are skipped, never fatal.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, warn};

use crate::error::HistoryFileError;
use crate::market::MarketSessionRule;

use super::Bar;

const HEADER: &str =
    "開始時間,收盤時間,開盤價,最高價,最低價,收盤價,成交量,包含開盤,包含收盤,空K棒,浮動K棒,對齊K棒";

const TIME_WRITE_FORMAT: &str = "%Y/%-m/%-d %H:%M";
const TIME_READ_FORMAT: &str = "%Y/%m/%d %H:%M";

/// Write sealed bars plus an optional trailing floating bar to `path`.
pub fn save<'a>(
    path: &Path,
    bars: impl Iterator<Item = &'a Bar>,
    floating: Option<&Bar>,
) -> Result<(), HistoryFileError> {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');

    for bar in bars {
        write_line(&mut out, bar, bar.is_floating);
    }
    if let Some(bar) = floating {
        // The floating flag is forced on the trailing row regardless of what
        // the snapshot carries.
        write_line(&mut out, bar, true);
    }

    fs::write(path, out)?;
    Ok(())
}

fn write_line(out: &mut String, bar: &Bar, floating: bool) {
    let _ = writeln!(
        out,
        "{},{},{},{},{},{},{},{},{},{},{},{}",
        bar.start_time.format(TIME_WRITE_FORMAT),
        bar.close_time.format(TIME_WRITE_FORMAT),
        bar.open,
        bar.high,
        bar.low,
        bar.close,
        bar.volume,
        flag(bar.contains_market_open),
        flag(bar.contains_market_close),
        flag(bar.is_null),
        flag(floating),
        flag(bar.is_alignment_bar),
    );
}

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

/// Read a history file. Missing or unreadable files yield an empty list.
pub fn load(path: &Path, rule: &dyn MarketSessionRule) -> Vec<Bar> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if path.exists() {
                warn!(path = %path.display(), error = %e, "could not read history file");
            }
            return Vec::new();
        }
    };

    let mut bars = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if i == 0 && (line.contains("時間") || line.contains("日期")) {
            continue;
        }

        match parse_line(line, rule) {
            Some(bar) => bars.push(bar),
            None => debug!(line_number = i + 1, "skipping malformed history line"),
        }
    }
    bars
}

/// Read an MMS-flavor export: two header lines, then
/// `close_time,O,H,L,C,V[,floating]` rows with flags recomputed.
pub fn import_mms(path: &Path, rule: &dyn MarketSessionRule) -> Vec<Bar> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if path.exists() {
                warn!(path = %path.display(), error = %e, "could not read MMS history file");
            }
            return Vec::new();
        }
    };

    let mut bars = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if i < 2 {
            continue;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_mms_line(line, rule) {
            Some(bar) => bars.push(bar),
            None => debug!(line_number = i + 1, "skipping malformed MMS line"),
        }
    }
    bars
}

fn parse_line(line: &str, rule: &dyn MarketSessionRule) -> Option<Bar> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();

    if parts.len() >= 12 {
        let start_time = parse_time(parts[0])?;
        let close_time = parse_time(parts[1])?;
        // Current schema: stored flags are trusted as-is.
        Some(Bar {
            start_time,
            close_time,
            open: parts[2].parse().ok()?,
            high: parts[3].parse().ok()?,
            low: parts[4].parse().ok()?,
            close: parts[5].parse().ok()?,
            volume: parts[6].parse().ok()?,
            contains_market_open: parts[7] == "1",
            contains_market_close: parts[8] == "1",
            is_null: parts[9] == "1",
            is_floating: parts[10] == "1",
            is_alignment_bar: parts[11] == "1",
        })
    } else if parts.len() == 11 {
        let start_time = parse_time(parts[0])?;
        let close_time = parse_time(parts[1])?;
        // Legacy schema predates the alignment flag; open/close flags are
        // recomputed from clock times rather than trusted.
        Some(Bar {
            start_time,
            close_time,
            open: parts[2].parse().ok()?,
            high: parts[3].parse().ok()?,
            low: parts[4].parse().ok()?,
            close: parts[5].parse().ok()?,
            volume: parts[6].parse().ok()?,
            contains_market_open: rule.marks_session_open(close_time),
            contains_market_close: rule.marks_session_close(close_time),
            is_null: parts[9] == "1",
            is_floating: parts[10] == "1",
            is_alignment_bar: rule.marks_session_open(close_time),
        })
    } else if parts.len() >= 6 {
        let close_time = parse_time(parts[0])?;
        Some(Bar {
            start_time: close_time - Duration::minutes(1),
            close_time,
            open: parts[1].parse().ok()?,
            high: parts[2].parse().ok()?,
            low: parts[3].parse().ok()?,
            close: parts[4].parse().ok()?,
            volume: parts[5].parse().ok()?,
            contains_market_open: rule.marks_session_open(close_time),
            contains_market_close: rule.marks_session_close(close_time),
            is_null: false,
            is_floating: false,
            is_alignment_bar: rule.marks_session_open(close_time),
        })
    } else {
        None
    }
}

fn parse_mms_line(line: &str, rule: &dyn MarketSessionRule) -> Option<Bar> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 6 {
        return None;
    }

    let close_time = parse_time(parts[0])?;
    Some(Bar {
        start_time: close_time - Duration::minutes(1),
        close_time,
        open: parts[1].parse().ok()?,
        high: parts[2].parse().ok()?,
        low: parts[3].parse().ok()?,
        close: parts[4].parse().ok()?,
        volume: parts[5].parse().ok()?,
        contains_market_open: rule.marks_session_open(close_time),
        contains_market_close: rule.marks_session_close(close_time),
        is_null: false,
        is_floating: parts.get(6).copied() == Some("1"),
        is_alignment_bar: rule.marks_session_open(close_time),
    })
}

fn parse_time(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIME_READ_FORMAT).ok()
}
