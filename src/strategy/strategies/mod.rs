//! Reference strategies
//!
//! - SmaCrossover: order-producing moving-average crossover
//! - MomentumSignals: trailing-return momentum signals
//! - MeanReversionSignals: z-score mean reversion signals

pub mod mean_reversion;
pub mod momentum;
pub mod sma_cross;

pub use mean_reversion::{MeanReversionConfig, MeanReversionSignals};
pub use momentum::{MomentumConfig, MomentumSignals};
pub use sma_cross::{SmaCrossConfig, SmaCrossover};

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::{Fill, MarketView};

/// Simple moving average of the last `n` values
pub(crate) fn sma(values: &[Decimal], n: usize) -> Option<Decimal> {
    if n == 0 || values.len() < n {
        return None;
    }
    let sum: Decimal = values[values.len() - n..].iter().copied().sum();
    Some(sum / Decimal::from(n))
}

/// Configured symbols, or everything the view has traded so far
pub(crate) fn universe(configured: &[String], data: &MarketView<'_>) -> Vec<String> {
    if configured.is_empty() {
        data.symbols().map(str::to_string).collect()
    } else {
        configured.to_vec()
    }
}

/// Net quantity per symbol built from the strategy's own fills
#[derive(Debug, Clone, Default)]
pub(crate) struct Holdings(HashMap<String, Decimal>);

impl Holdings {
    pub fn apply(&mut self, fill: &Fill) {
        let qty = self.0.entry(fill.symbol().to_string()).or_default();
        *qty += fill.signed_quantity();
        if qty.is_zero() {
            self.0.remove(fill.symbol());
        }
    }

    pub fn get(&self, symbol: &str) -> Decimal {
        self.0.get(symbol).copied().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}
