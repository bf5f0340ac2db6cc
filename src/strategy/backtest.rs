//! Single-strategy backtest engine
//!
//! Replays every distinct timestamp of a [`PriceHistory`] in ascending order. At each step the
//! strategy sees only bars at or before the step, the ledger is marked to market and
//! snapshotted, and the returned orders go through the [`ExecutionSimulator`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backtest_feed::DataSource;
use super::execution_sim::{
    CommissionModel, ExecutionSimConfig, ExecutionSimulator, FillOutcome, NotFilledReason,
};
use super::ledger::{Ledger, PortfolioSnapshot};
use super::traits::{OrderStrategy, StrategyKind};
use crate::analysis::{report, PerformanceReport};
use crate::domain::{Fill, Order, PriceHistory};
use crate::error::{GateError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Backtest settings shared by the single- and multi-strategy engines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: Decimal,
    pub commission: Decimal,
    pub commission_model: CommissionModel,
    pub slippage: Decimal,
    /// Fraction of current cash a full-quality signal may allocate
    pub max_position_pct: Decimal,
    /// Ceiling on gross exposure / portfolio value after a buy
    pub max_deployed_pct: Decimal,
    /// Allocation never exceeds this fraction of cash
    pub cash_safety_margin: Decimal,
    /// Sharpe estimate at which signal quality saturates
    pub sharpe_cap: Decimal,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(100000),
            commission: dec!(0.001),
            commission_model: CommissionModel::PriceFraction,
            slippage: dec!(0.0005),
            max_position_pct: dec!(0.10),
            max_deployed_pct: dec!(0.80),
            cash_safety_margin: dec!(0.99),
            sharpe_cap: dec!(2.0),
        }
    }
}

impl BacktestConfig {
    pub fn execution(&self) -> ExecutionSimConfig {
        ExecutionSimConfig {
            commission: self.commission,
            commission_model: self.commission_model,
            slippage: self.slippage,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let unit = |v: Decimal| v >= Decimal::ZERO && v <= Decimal::ONE;

        if self.initial_capital <= Decimal::ZERO {
            errors.push("backtest.initial_capital must be positive".to_string());
        }
        if self.commission < Decimal::ZERO {
            errors.push("backtest.commission must be non-negative".to_string());
        }
        if self.slippage < Decimal::ZERO || self.slippage >= Decimal::ONE {
            errors.push("backtest.slippage must be within [0, 1)".to_string());
        }
        for (name, value) in [
            ("max_position_pct", self.max_position_pct),
            ("max_deployed_pct", self.max_deployed_pct),
            ("cash_safety_margin", self.cash_safety_margin),
        ] {
            if !unit(value) {
                errors.push(format!("backtest.{} must be within [0, 1]", name));
            }
        }
        if self.sharpe_cap <= Decimal::ZERO {
            errors.push("backtest.sharpe_cap must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// An order that did not fill on its step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfilledOrder {
    pub timestamp: DateTime<Utc>,
    pub order: Order,
    pub reason: NotFilledReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: Decimal,
    /// Cash plus open positions at the last marks
    pub final_capital: Decimal,
    /// final / initial - 1
    pub total_return: Decimal,
    pub fills: Vec<Fill>,
    pub unfilled: Vec<UnfilledOrder>,
    pub history: Vec<PortfolioSnapshot>,
    /// Steps where the strategy returned an error
    pub strategy_errors: usize,
}

impl BacktestResult {
    /// Total value per recorded step, followed by the final capital
    pub fn equity_curve(&self) -> Vec<Decimal> {
        let mut curve: Vec<Decimal> = self.history.iter().map(|s| s.total_value).collect();
        if curve.last() != Some(&self.final_capital) {
            curve.push(self.final_capital);
        }
        curve
    }

    pub fn performance(&self, risk_free_annual: f64) -> PerformanceReport {
        report(&self.equity_curve(), &self.fills, risk_free_annual)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub(crate) fn from_ledger(
        strategy_name: String,
        timestamps: &[DateTime<Utc>],
        initial_capital: Decimal,
        ledger: Ledger,
        unfilled: Vec<UnfilledOrder>,
        strategy_errors: usize,
    ) -> Result<Self> {
        let (Some(start), Some(end)) = (timestamps.first(), timestamps.last()) else {
            return Err(GateError::DataUnavailable("no timestamps replayed".into()));
        };
        let final_capital = ledger.total_value();
        let total_return = if initial_capital.is_zero() {
            Decimal::ZERO
        } else {
            final_capital / initial_capital - Decimal::ONE
        };
        let (fills, history) = ledger.into_parts();

        Ok(Self {
            strategy_name,
            start: *start,
            end: *end,
            initial_capital,
            final_capital,
            total_return,
            fills,
            unfilled,
            history,
            strategy_errors,
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct BacktestEngine {
    config: BacktestConfig,
    strategy: Box<dyn OrderStrategy>,
}

impl BacktestEngine {
    /// Fails with `InvalidStrategy` unless the strategy produces orders
    pub fn new(config: BacktestConfig, strategy: StrategyKind) -> Result<Self> {
        let strategy = strategy.into_order_strategy()?;
        Ok(Self { config, strategy })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run_from_source(
        &mut self,
        source: &dyn DataSource,
        symbols: &[String],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BacktestResult> {
        let data = source.historical_data(symbols, start, end)?;
        self.run(&data)
    }

    pub fn run(&mut self, data: &PriceHistory) -> Result<BacktestResult> {
        let timestamps = data.timestamps();
        if timestamps.is_empty() {
            return Err(GateError::DataUnavailable("price history is empty".into()));
        }

        let name = self.strategy.name().to_string();
        info!(
            strategy = %name,
            steps = timestamps.len(),
            capital = %self.config.initial_capital,
            "Starting backtest"
        );

        let mut ledger = Ledger::new(self.config.initial_capital);
        let mut sim = ExecutionSimulator::with_config(self.config.execution());
        let mut unfilled = Vec::new();
        let mut strategy_errors = 0;

        self.strategy.initialize()?;

        for &ts in &timestamps {
            let view = data.view_at(ts);
            ledger.mark_to_market(&view.prices());
            ledger.record_snapshot(ts);

            let orders = match self.strategy.on_data(ts, &view) {
                Ok(orders) => orders,
                Err(e) => {
                    warn!(strategy = %name, timestamp = %ts, "strategy evaluation failed: {}", e);
                    strategy_errors += 1;
                    continue;
                }
            };

            for order in orders {
                match sim.execute(&order, view.price(order.symbol()), ledger.cash(), ts)? {
                    FillOutcome::Filled(fill) => {
                        debug!(
                            symbol = fill.symbol(),
                            side = %fill.side(),
                            qty = %fill.fill_quantity(),
                            price = %fill.fill_price(),
                            "order filled"
                        );
                        self.strategy.on_fill(&fill);
                        ledger.apply_fill(fill)?;
                    }
                    FillOutcome::NotFilled(reason) => {
                        debug!(symbol = order.symbol(), %reason, "order not filled");
                        unfilled.push(UnfilledOrder {
                            timestamp: ts,
                            order,
                            reason,
                        });
                    }
                }
            }
        }

        self.strategy.finalize()?;

        let result = BacktestResult::from_ledger(
            name,
            &timestamps,
            self.config.initial_capital,
            ledger,
            unfilled,
            strategy_errors,
        )?;
        info!(
            strategy = %result.strategy_name,
            fills = result.fills.len(),
            final_capital = %result.final_capital,
            total_return = %result.total_return,
            "Backtest complete"
        );
        Ok(result)
    }
}
