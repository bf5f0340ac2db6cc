//! Moving-average crossover
//!
//! Buys a fixed quantity when the fast SMA crosses above the slow SMA and exits the whole
//! holding on the opposite cross.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{sma, universe, Holdings};
use crate::domain::{Fill, MarketView, Order, OrderSide};
use crate::error::{GateError, Result};
use crate::strategy::traits::{OrderStrategy, StrategyLifecycle};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmaCrossConfig {
    /// Symbols to trade; empty trades every symbol in the data
    pub symbols: Vec<String>,
    pub fast: usize,
    pub slow: usize,
    /// Shares per entry
    pub quantity: Decimal,
}

impl Default for SmaCrossConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            fast: 10,
            slow: 30,
            quantity: dec!(10),
        }
    }
}

pub struct SmaCrossover {
    config: SmaCrossConfig,
    holdings: Holdings,
}

impl SmaCrossover {
    pub fn new(config: SmaCrossConfig) -> Result<Self> {
        if config.fast == 0 || config.fast >= config.slow {
            return Err(GateError::Strategy(format!(
                "fast window ({}) must be positive and shorter than slow window ({})",
                config.fast, config.slow
            )));
        }
        if config.quantity <= Decimal::ZERO {
            return Err(GateError::Strategy("quantity must be positive".into()));
        }
        Ok(Self {
            config,
            holdings: Holdings::default(),
        })
    }

    fn cross(&self, closes: &[Decimal]) -> Option<OrderSide> {
        let prev = &closes[..closes.len() - 1];
        let fast_now = sma(closes, self.config.fast)?;
        let slow_now = sma(closes, self.config.slow)?;
        let fast_prev = sma(prev, self.config.fast)?;
        let slow_prev = sma(prev, self.config.slow)?;

        if fast_prev <= slow_prev && fast_now > slow_now {
            Some(OrderSide::Buy)
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }
}

impl StrategyLifecycle for SmaCrossover {
    fn name(&self) -> &str {
        "sma_crossover"
    }

    fn initialize(&mut self) -> Result<()> {
        self.holdings.clear();
        Ok(())
    }

    fn on_fill(&mut self, fill: &Fill) {
        self.holdings.apply(fill);
    }
}

impl OrderStrategy for SmaCrossover {
    fn on_data(&mut self, timestamp: DateTime<Utc>, data: &MarketView<'_>) -> Result<Vec<Order>> {
        let mut orders = Vec::new();

        for symbol in universe(&self.config.symbols, data) {
            let closes = data.closes(&symbol);
            if closes.len() <= self.config.slow {
                continue;
            }
            let held = self.holdings.get(&symbol);

            match self.cross(&closes) {
                Some(OrderSide::Buy) if held <= Decimal::ZERO => {
                    debug!(%symbol, %timestamp, "golden cross");
                    orders.push(Order::market(&symbol, OrderSide::Buy, self.config.quantity)?);
                }
                Some(OrderSide::Sell) if held > Decimal::ZERO => {
                    debug!(%symbol, %timestamp, "death cross");
                    orders.push(Order::market(&symbol, OrderSide::Sell, held)?);
                }
                _ => {}
            }
        }

        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, PriceHistory};
    use crate::strategy::backtest::{BacktestConfig, BacktestEngine};
    use crate::strategy::traits::StrategyKind;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_rejects_bad_windows() {
        let config = SmaCrossConfig {
            fast: 5,
            slow: 5,
            ..SmaCrossConfig::default()
        };
        assert!(SmaCrossover::new(config).is_err());
    }

    #[test]
    fn test_trades_both_crosses() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let closes = [10, 9, 8, 9, 11, 12, 10, 8, 7];
        let history = PriceHistory::from_bars(
            closes
                .iter()
                .enumerate()
                .map(|(i, c)| Bar::from_close("AAA", t0 + Duration::days(i as i64), Decimal::from(*c))),
        );

        let strategy = SmaCrossover::new(SmaCrossConfig {
            symbols: vec!["AAA".into()],
            fast: 2,
            slow: 3,
            quantity: dec!(10),
        })
        .unwrap();
        let config = BacktestConfig {
            initial_capital: dec!(1000),
            slippage: Decimal::ZERO,
            ..BacktestConfig::default()
        };
        let mut engine = BacktestEngine::new(config, StrategyKind::orders(strategy)).unwrap();
        let result = engine.run(&history).unwrap();

        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].side(), OrderSide::Buy);
        assert_eq!(result.fills[0].fill_price(), dec!(11));
        assert_eq!(result.fills[1].side(), OrderSide::Sell);
        assert_eq!(result.fills[1].fill_price(), dec!(8));
        assert_eq!(result.fills[1].fill_quantity(), dec!(10));
    }
}
