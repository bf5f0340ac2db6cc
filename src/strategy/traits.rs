//! Core strategy traits and types
//!
//! Strategies come in two flavours: order-producing (single-strategy backtests) and
//! signal-producing (multi-strategy allocation). The flavour is fixed when a strategy is
//! registered, so the engine loops never re-check it per step.

use chrono::{DateTime, Utc};

use crate::domain::{Fill, MarketView, Order, TradingSignal};
use crate::error::{GateError, Result};

// ============================================================================
// Lifecycle
// ============================================================================

/// Hooks shared by every strategy. `initialize`/`finalize` run once per run, `on_fill`
/// once per fill attributed to the strategy.
pub trait StrategyLifecycle: Send {
    /// Human-readable strategy name
    fn name(&self) -> &str;

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_fill(&mut self, _fill: &Fill) {}
}

// ============================================================================
// Strategy flavours
// ============================================================================

/// Emits orders directly
pub trait OrderStrategy: StrategyLifecycle {
    /// Called once per replayed timestamp. `data` only contains bars at or before `timestamp`.
    fn on_data(&mut self, timestamp: DateTime<Utc>, data: &MarketView<'_>) -> Result<Vec<Order>>;
}

/// Emits ranked trade ideas; sizing is left to the engine
pub trait SignalStrategy: StrategyLifecycle {
    fn generate_signals(
        &mut self,
        timestamp: DateTime<Utc>,
        data: &MarketView<'_>,
    ) -> Result<Vec<TradingSignal>>;
}

/// A strategy tagged with its capability
pub enum StrategyKind {
    Orders(Box<dyn OrderStrategy>),
    Signals(Box<dyn SignalStrategy>),
}

impl StrategyKind {
    pub fn orders(strategy: impl OrderStrategy + 'static) -> Self {
        StrategyKind::Orders(Box::new(strategy))
    }

    pub fn signals(strategy: impl SignalStrategy + 'static) -> Self {
        StrategyKind::Signals(Box::new(strategy))
    }

    pub fn name(&self) -> &str {
        match self {
            StrategyKind::Orders(s) => s.name(),
            StrategyKind::Signals(s) => s.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StrategyKind::Orders(_) => "order",
            StrategyKind::Signals(_) => "signal",
        }
    }

    pub fn into_order_strategy(self) -> Result<Box<dyn OrderStrategy>> {
        match self {
            StrategyKind::Orders(s) => Ok(s),
            StrategyKind::Signals(s) => Err(GateError::InvalidStrategy(format!(
                "{} produces signals; an order-producing strategy is required",
                s.name()
            ))),
        }
    }

    pub fn into_signal_strategy(self) -> Result<Box<dyn SignalStrategy>> {
        match self {
            StrategyKind::Signals(s) => Ok(s),
            StrategyKind::Orders(s) => Err(GateError::InvalidStrategy(format!(
                "{} produces orders; a signal-producing strategy is required",
                s.name()
            ))),
        }
    }
}

impl std::fmt::Debug for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StrategyKind::{}({})", self.kind(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quiet;

    impl StrategyLifecycle for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }
    }

    impl OrderStrategy for Quiet {
        fn on_data(&mut self, _: DateTime<Utc>, _: &MarketView<'_>) -> Result<Vec<Order>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_capability_checked_at_conversion() {
        let kind = StrategyKind::orders(Quiet);
        assert_eq!(kind.kind(), "order");
        let Err(err) = kind.into_signal_strategy() else {
            panic!("order strategy converted to a signal strategy");
        };
        assert!(matches!(err, GateError::InvalidStrategy(_)));
        assert!(StrategyKind::orders(Quiet).into_order_strategy().is_ok());
    }
}
