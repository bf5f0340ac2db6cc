use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::order::OrderSide;
use crate::error::ValidationError;

/// Sharpe estimate at which a signal's Sharpe contribution saturates.
pub const DEFAULT_SHARPE_CAP: Decimal = dec!(2.0);

/// A directional trade idea emitted by a signal-producing strategy.
/// Consumed once by the allocation logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    symbol: String,
    side: OrderSide,
    confidence: Decimal,
    sharpe_estimate: Decimal,
    entry_price: Decimal,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
    strategy_name: String,
    generated_at: DateTime<Utc>,
}

impl TradingSignal {
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        confidence: Decimal,
        sharpe_estimate: Decimal,
        entry_price: Decimal,
        strategy_name: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(ValidationError::InvalidSignal("symbol must not be empty".into()));
        }
        if confidence < Decimal::ZERO || confidence > Decimal::ONE {
            return Err(ValidationError::InvalidSignal(format!(
                "confidence must be within [0, 1], got {}",
                confidence
            )));
        }
        if entry_price <= Decimal::ZERO {
            return Err(ValidationError::InvalidSignal(format!(
                "entry price must be positive, got {}",
                entry_price
            )));
        }

        Ok(Self {
            symbol,
            side,
            confidence,
            sharpe_estimate,
            entry_price,
            stop_loss: None,
            take_profit: None,
            strategy_name: strategy_name.into(),
            generated_at: Utc::now(),
        })
    }

    pub fn with_stop_loss(mut self, price: Decimal) -> Result<Self, ValidationError> {
        if price <= Decimal::ZERO {
            return Err(ValidationError::InvalidSignal(format!(
                "stop loss must be positive, got {}",
                price
            )));
        }
        self.stop_loss = Some(price);
        Ok(self)
    }

    pub fn with_take_profit(mut self, price: Decimal) -> Result<Self, ValidationError> {
        if price <= Decimal::ZERO {
            return Err(ValidationError::InvalidSignal(format!(
                "take profit must be positive, got {}",
                price
            )));
        }
        self.take_profit = Some(price);
        Ok(self)
    }

    /// Stamp the signal with the (simulated) time it was produced.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.generated_at = timestamp;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn confidence(&self) -> Decimal {
        self.confidence
    }

    pub fn sharpe_estimate(&self) -> Decimal {
        self.sharpe_estimate
    }

    pub fn entry_price(&self) -> Decimal {
        self.entry_price
    }

    pub fn stop_loss(&self) -> Option<Decimal> {
        self.stop_loss
    }

    pub fn take_profit(&self) -> Option<Decimal> {
        self.take_profit
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// confidence × min(sharpe_estimate / 2, 1)
    pub fn quality_score(&self) -> Decimal {
        self.quality_score_with_cap(DEFAULT_SHARPE_CAP)
    }

    /// confidence × min(sharpe_estimate / cap, 1). A non-positive cap scores zero.
    pub fn quality_score_with_cap(&self, sharpe_cap: Decimal) -> Decimal {
        if sharpe_cap <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let sharpe_factor = (self.sharpe_estimate / sharpe_cap).min(Decimal::ONE);
        self.confidence * sharpe_factor
    }
}

/// Sort signals by quality, best first. Ties keep their original order.
pub fn rank_by_quality(signals: &mut [TradingSignal], sharpe_cap: Decimal) {
    signals.sort_by(|a, b| {
        b.quality_score_with_cap(sharpe_cap)
            .cmp(&a.quality_score_with_cap(sharpe_cap))
    });
}
