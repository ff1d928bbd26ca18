// kbar-core: session-aware K-bar assembly and multi-period resampling
// for futures markets with a segmented trading day (TAIFEX-style).
//
// Data flow: ticks/volume -> OneMinuteBarTracker -> (on seal) ->
// PeriodAggregator -> bar-completed notification per registered period.

pub mod aggregate;
pub mod bars;
pub mod calendar;
pub mod engine;
pub mod error;
pub mod logging;
pub mod market;

pub use aggregate::PeriodAggregator;
pub use bars::{Bar, BarHistory, OneMinuteBarTracker, VolumeMode};
pub use calendar::TradingCalendar;
pub use engine::{KbarEngine, SubscriptionId};
pub use error::{AggregateError, HistoryFileError};
pub use market::{MarketSessionRule, SeparationTable, TaifexRule, TradingSession};
