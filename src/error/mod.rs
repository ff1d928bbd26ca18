//! Error types for the K-bar core.
//!
//! Two families matter here: contract violations (a caller bug, surfaced as
//! `AggregateError`) and file I/O failures on the explicit save path. Input
//! format errors (bad calendar or history lines) are never fatal and are not
//! represented as errors at all — the loaders skip them and keep going.

use thiserror::Error;

/// Contract violations in period aggregation.
///
/// These indicate a programming error in the caller, not a recoverable data
/// condition: an empty aggregation window or a query against a period that
/// was never registered.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AggregateError {
    /// Aggregating zero one-minute bars is always a defect
    #[error("cannot aggregate an empty bar window")]
    EmptyWindow,

    /// Period has no separation table
    #[error("period {0} is not registered")]
    UnregisteredPeriod(u32),

    /// The current minute is not a separation boundary for the period
    #[error("{time} is not a separation boundary for period {period}")]
    NotABoundary { period: u32, time: String },

    /// No one-minute bars available to aggregate
    #[error("no one-minute bars available")]
    NoBars,
}

/// Failures on the explicit history save path.
///
/// Loading never returns this: a missing or unreadable file yields an empty
/// history (count 0) so that partial state cannot prevent the engine from
/// running.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HistoryFileError {
    /// Writing the history file failed
    #[error("history file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
