//! Trailing-return momentum
//!
//! Long-only. Signals a buy when the return over `lookback` bars clears `entry_threshold`
//! and an exit once it falls below `exit_threshold`. The Sharpe estimate is the annualized
//! Sharpe of the lookback window's bar returns.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{universe, Holdings};
use crate::analysis::stats::{mean, pct_changes, sample_std_dev, to_f64, TRADING_DAYS};
use crate::domain::{Fill, MarketView, OrderSide, TradingSignal};
use crate::error::{GateError, Result};
use crate::strategy::traits::{SignalStrategy, StrategyLifecycle};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub symbols: Vec<String>,
    pub lookback: usize,
    /// Trailing return that opens a position (0.05 = 5%)
    pub entry_threshold: Decimal,
    /// Trailing return below which a held position is exited
    pub exit_threshold: Decimal,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            lookback: 20,
            entry_threshold: dec!(0.05),
            exit_threshold: Decimal::ZERO,
        }
    }
}

pub struct MomentumSignals {
    config: MomentumConfig,
    holdings: Holdings,
}

impl MomentumSignals {
    pub fn new(config: MomentumConfig) -> Result<Self> {
        if config.lookback < 2 {
            return Err(GateError::Strategy("lookback must be at least 2 bars".into()));
        }
        if config.entry_threshold <= Decimal::ZERO || config.exit_threshold >= config.entry_threshold {
            return Err(GateError::Strategy(
                "entry threshold must be positive and above the exit threshold".into(),
            ));
        }
        Ok(Self {
            config,
            holdings: Holdings::default(),
        })
    }
}

fn window_sharpe(closes: &[Decimal]) -> Decimal {
    let returns = pct_changes(&to_f64(closes));
    let std = sample_std_dev(&returns);
    if std == 0.0 {
        return Decimal::ZERO;
    }
    let sharpe = mean(&returns) / std * TRADING_DAYS.sqrt();
    Decimal::from_f64(sharpe).unwrap_or_default().round_dp(4)
}

impl StrategyLifecycle for MomentumSignals {
    fn name(&self) -> &str {
        "momentum"
    }

    fn initialize(&mut self) -> Result<()> {
        self.holdings.clear();
        Ok(())
    }

    fn on_fill(&mut self, fill: &Fill) {
        self.holdings.apply(fill);
    }
}

impl SignalStrategy for MomentumSignals {
    fn generate_signals(
        &mut self,
        timestamp: DateTime<Utc>,
        data: &MarketView<'_>,
    ) -> Result<Vec<TradingSignal>> {
        let mut signals = Vec::new();
        let lookback = self.config.lookback;

        for symbol in universe(&self.config.symbols, data) {
            let closes = data.closes(&symbol);
            if closes.len() <= lookback {
                continue;
            }
            let window = &closes[closes.len() - 1 - lookback..];
            let (first, last) = (window[0], window[lookback]);
            if first <= Decimal::ZERO {
                continue;
            }
            let trailing = last / first - Decimal::ONE;
            let held = self.holdings.get(&symbol);

            if held <= Decimal::ZERO && trailing > self.config.entry_threshold {
                let confidence =
                    (trailing / (self.config.entry_threshold * dec!(2))).min(Decimal::ONE);
                let signal = TradingSignal::new(
                    &symbol,
                    OrderSide::Buy,
                    confidence,
                    window_sharpe(window),
                    last,
                    self.name(),
                )?
                .at(timestamp);
                signals.push(signal);
            } else if held > Decimal::ZERO && trailing < self.config.exit_threshold {
                let signal =
                    TradingSignal::new(&symbol, OrderSide::Sell, Decimal::ONE, Decimal::ZERO, last, self.name())?
                        .at(timestamp);
                signals.push(signal);
            }
        }

        Ok(signals)
    }
}
