//! Z-score mean reversion
//!
//! Long-only: buys when the latest close sits `entry_z` standard deviations below the mean of
//! the preceding `window` closes, exits once the z-score recovers above `-exit_z`.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{universe, Holdings};
use crate::analysis::stats::{mean, sample_std_dev, to_f64};
use crate::domain::{Fill, MarketView, OrderSide, TradingSignal};
use crate::error::{GateError, Result};
use crate::strategy::traits::{SignalStrategy, StrategyLifecycle};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    pub symbols: Vec<String>,
    pub window: usize,
    pub entry_z: f64,
    pub exit_z: f64,
    /// Sharpe attached to every entry signal
    pub expected_sharpe: Decimal,
    /// Stop distance below entry (0.05 = 5%)
    pub stop_loss_pct: Decimal,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            window: 20,
            entry_z: 2.0,
            exit_z: 0.5,
            expected_sharpe: dec!(1.0),
            stop_loss_pct: dec!(0.05),
        }
    }
}

pub struct MeanReversionSignals {
    config: MeanReversionConfig,
    holdings: Holdings,
}

impl MeanReversionSignals {
    pub fn new(config: MeanReversionConfig) -> Result<Self> {
        if config.window < 2 {
            return Err(GateError::Strategy("window must be at least 2 bars".into()));
        }
        if config.entry_z <= 0.0 || config.exit_z < 0.0 || config.exit_z >= config.entry_z {
            return Err(GateError::Strategy(
                "entry_z must be positive and above exit_z".into(),
            ));
        }
        Ok(Self {
            config,
            holdings: Holdings::default(),
        })
    }

    /// (z-score of the last close, mean of the window before it)
    fn z_score(&self, closes: &[Decimal]) -> Option<(f64, f64)> {
        let n = closes.len();
        if n <= self.config.window {
            return None;
        }
        let window = to_f64(&closes[n - 1 - self.config.window..n - 1]);
        let std = sample_std_dev(&window);
        if std == 0.0 {
            return None;
        }
        let m = mean(&window);
        let last = closes[n - 1].to_f64()?;
        Some(((last - m) / std, m))
    }
}

impl StrategyLifecycle for MeanReversionSignals {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn initialize(&mut self) -> Result<()> {
        self.holdings.clear();
        Ok(())
    }

    fn on_fill(&mut self, fill: &Fill) {
        self.holdings.apply(fill);
    }
}

impl SignalStrategy for MeanReversionSignals {
    fn generate_signals(
        &mut self,
        timestamp: DateTime<Utc>,
        data: &MarketView<'_>,
    ) -> Result<Vec<TradingSignal>> {
        let mut signals = Vec::new();

        for symbol in universe(&self.config.symbols, data) {
            let closes = data.closes(&symbol);
            let Some((z, window_mean)) = self.z_score(&closes) else {
                continue;
            };
            let Some(&last) = closes.last() else {
                continue;
            };
            let held = self.holdings.get(&symbol);

            if held <= Decimal::ZERO && z < -self.config.entry_z {
                let confidence = Decimal::from_f64(z.abs() / (2.0 * self.config.entry_z))
                    .unwrap_or_default()
                    .min(Decimal::ONE)
                    .round_dp(4);
                let mut signal = TradingSignal::new(
                    &symbol,
                    OrderSide::Buy,
                    confidence,
                    self.config.expected_sharpe,
                    last,
                    self.name(),
                )?
                .with_stop_loss(last * (Decimal::ONE - self.config.stop_loss_pct))?;
                if let Some(target) = Decimal::from_f64(window_mean).filter(|t| *t > Decimal::ZERO) {
                    signal = signal.with_take_profit(target.round_dp(4))?;
                }
                signals.push(signal.at(timestamp));
            } else if held > Decimal::ZERO && z > -self.config.exit_z {
                let signal =
                    TradingSignal::new(&symbol, OrderSide::Sell, Decimal::ONE, Decimal::ZERO, last, self.name())?
                        .at(timestamp);
                signals.push(signal);
            }
        }

        Ok(signals)
    }
}
