//! Portfolio, position and correlation risk checks with a sticky circuit breaker.

pub mod manager;
pub mod result;

pub use manager::{BreakerState, CircuitBreakerEvent, RiskManager, RiskSettings};
pub use result::{RiskBreach, RiskCheckKind, RiskCheckResult, RiskDetails};
