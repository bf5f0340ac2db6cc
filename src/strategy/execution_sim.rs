//! Execution Simulator for Backtesting
//!
//! Fills orders against the latest close:
//! - Market orders pay slippage against the order's side
//! - Limit orders fill at the market price only when it is at least as good as the limit
//! - Buys are refused when cash cannot cover notional plus commission
//!
//! No partial fills and no resting orders: a limit order that does not fill this step is gone.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Fill, Order, OrderSide, OrderType};
use crate::error::Result;

/// How the commission rate turns into a per-fill charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionModel {
    /// rate × execution price
    #[default]
    PriceFraction,
    /// rate × execution price × quantity
    NotionalFraction,
    /// rate × quantity
    PerShare,
}

impl CommissionModel {
    pub fn charge(&self, rate: Decimal, price: Decimal, quantity: Decimal) -> Decimal {
        match self {
            CommissionModel::PriceFraction => rate * price,
            CommissionModel::NotionalFraction => rate * price * quantity,
            CommissionModel::PerShare => rate * quantity,
        }
    }
}

/// Execution simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSimConfig {
    /// Commission rate, interpreted by `commission_model`
    pub commission: Decimal,
    pub commission_model: CommissionModel,
    /// Fractional price degradation for market orders (0.0005 = 5 bps)
    pub slippage: Decimal,
}

impl Default for ExecutionSimConfig {
    fn default() -> Self {
        Self {
            commission: dec!(0.001),
            commission_model: CommissionModel::PriceFraction,
            slippage: dec!(0.0005),
        }
    }
}

/// Why an order produced no fill this step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotFilledReason {
    NoPrice,
    LimitNotReached { limit: Decimal, market: Decimal },
    InsufficientCash { required: Decimal, available: Decimal },
}

impl std::fmt::Display for NotFilledReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFilledReason::NoPrice => write!(f, "no market price"),
            NotFilledReason::LimitNotReached { limit, market } => {
                write!(f, "limit {} not reached (market {})", limit, market)
            }
            NotFilledReason::InsufficientCash {
                required,
                available,
            } => write!(f, "insufficient cash: need {}, have {}", required, available),
        }
    }
}

/// Result of attempting one order
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    Filled(Fill),
    NotFilled(NotFilledReason),
}

impl FillOutcome {
    pub fn fill(&self) -> Option<&Fill> {
        match self {
            FillOutcome::Filled(fill) => Some(fill),
            FillOutcome::NotFilled(_) => None,
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, FillOutcome::Filled(_))
    }
}

/// Deterministic fill simulator. Fill ids are sequential per simulator.
#[derive(Debug, Clone)]
pub struct ExecutionSimulator {
    config: ExecutionSimConfig,
    next_fill: u64,
}

impl ExecutionSimulator {
    pub fn new() -> Self {
        Self::with_config(ExecutionSimConfig::default())
    }

    pub fn with_config(config: ExecutionSimConfig) -> Self {
        Self {
            config,
            next_fill: 1,
        }
    }

    pub fn config(&self) -> &ExecutionSimConfig {
        &self.config
    }

    /// Price an order against `market_price`. Only validation of the resulting fill can fail.
    pub fn execute(
        &mut self,
        order: &Order,
        market_price: Option<Decimal>,
        available_cash: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<FillOutcome> {
        let Some(market) = market_price.filter(|p| *p > Decimal::ZERO) else {
            return Ok(FillOutcome::NotFilled(NotFilledReason::NoPrice));
        };

        let price = match (order.order_type(), order.limit_price()) {
            (OrderType::Limit, Some(limit)) => {
                let favorable = match order.side() {
                    OrderSide::Buy => market <= limit,
                    OrderSide::Sell => market >= limit,
                };
                if !favorable {
                    debug!(symbol = order.symbol(), %limit, %market, "limit not reached");
                    return Ok(FillOutcome::NotFilled(NotFilledReason::LimitNotReached {
                        limit,
                        market,
                    }));
                }
                market
            }
            _ => self.slipped_price(order.side(), market),
        };

        let quantity = order.quantity();
        let commission =
            self.config
                .commission_model
                .charge(self.config.commission, price, quantity);

        if order.is_buy() {
            let required = price * quantity + commission;
            if required > available_cash {
                debug!(symbol = order.symbol(), %required, %available_cash, "buy rejected");
                return Ok(FillOutcome::NotFilled(NotFilledReason::InsufficientCash {
                    required,
                    available: available_cash,
                }));
            }
        }

        let fill_id = format!("fill-{}", self.next_fill);
        self.next_fill += 1;
        let fill = Fill::new(order.clone(), price, quantity, commission, timestamp, fill_id)?;
        Ok(FillOutcome::Filled(fill))
    }

    /// Buyers pay up, sellers receive less
    pub fn slipped_price(&self, side: OrderSide, market: Decimal) -> Decimal {
        match side {
            OrderSide::Buy => market * (Decimal::ONE + self.config.slippage),
            OrderSide::Sell => market * (Decimal::ONE - self.config.slippage),
        }
    }
}

impl Default for ExecutionSimulator {
    fn default() -> Self {
        Self::new()
    }
}
