//! Return, risk and trade statistics derived from a run.

pub mod performance;
pub mod stats;

pub use performance::{report, PerformanceReport, RoundTrip, TradeDirection, TradeStatistics};
