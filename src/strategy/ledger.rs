//! Cash, positions, fills and portfolio history for one simulated account

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::domain::{Fill, Position};
use crate::error::Result;

/// Portfolio state at one replayed timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cash: Decimal,
    /// Signed mark-to-market value of open positions
    pub positions_value: Decimal,
    pub total_value: Decimal,
    /// Signed value per symbol
    pub positions: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    cash: Decimal,
    positions: HashMap<String, Position>,
    last_prices: HashMap<String, Decimal>,
    fills: Vec<Fill>,
    history: Vec<PortfolioSnapshot>,
}

impl Ledger {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            cash: initial_cash,
            positions: HashMap::new(),
            last_prices: HashMap::new(),
            fills: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn history(&self) -> &[PortfolioSnapshot] {
        &self.history
    }

    pub fn into_parts(self) -> (Vec<Fill>, Vec<PortfolioSnapshot>) {
        (self.fills, self.history)
    }

    /// Last known price for `symbol`, falling back to the position's entry price
    pub fn mark_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_prices.get(symbol).copied().or_else(|| {
            self.positions
                .get(symbol)
                .map(Position::avg_entry_price)
                .filter(|p| *p > Decimal::ZERO)
        })
    }

    /// Book a fill: move cash, update the position, drop it once flat
    pub fn apply_fill(&mut self, fill: Fill) -> Result<()> {
        let symbol = fill.symbol().to_string();
        let mark = self.last_prices.get(&symbol).copied();
        let position = self
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::new(symbol.clone()));
        position.update_from_fill(&fill, mark)?;
        if position.is_flat() {
            self.positions.remove(&symbol);
        }
        self.cash += fill.net_proceeds();
        self.fills.push(fill);
        Ok(())
    }

    /// Record latest prices and refresh unrealized P&L on open positions
    pub fn mark_to_market(&mut self, prices: &BTreeMap<String, Decimal>) {
        for (symbol, price) in prices {
            self.last_prices.insert(symbol.clone(), *price);
            if let Some(position) = self.positions.get_mut(symbol) {
                position.update_unrealized_pnl(*price);
            }
        }
    }

    /// Signed value per open symbol at the latest marks
    pub fn position_values(&self) -> BTreeMap<String, Decimal> {
        self.positions
            .values()
            .filter_map(|p| {
                self.mark_price(p.symbol())
                    .map(|price| (p.symbol().to_string(), p.notional_value(price)))
            })
            .collect()
    }

    pub fn positions_value(&self) -> Decimal {
        self.position_values().values().copied().sum()
    }

    /// Sum of |value| across open positions
    pub fn gross_exposure(&self) -> Decimal {
        self.position_values().values().map(|v| v.abs()).sum()
    }

    pub fn total_value(&self) -> Decimal {
        self.cash + self.positions_value()
    }

    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> PortfolioSnapshot {
        let positions = self.position_values();
        let positions_value: Decimal = positions.values().copied().sum();
        PortfolioSnapshot {
            timestamp,
            cash: self.cash,
            positions_value,
            total_value: self.cash + positions_value,
            positions,
        }
    }

    pub fn record_snapshot(&mut self, timestamp: DateTime<Utc>) {
        let snapshot = self.snapshot(timestamp);
        self.history.push(snapshot);
    }
}
