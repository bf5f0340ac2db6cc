//! Live account state consumed by the signal pipeline

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::Position;
use crate::error::Result;

/// Point-in-time view of the trading account
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountSnapshot {
    pub portfolio_value: Decimal,
    /// Highest portfolio value seen so far
    pub peak_value: Decimal,
    pub cash: Decimal,
    pub positions: HashMap<String, Position>,
}

impl AccountSnapshot {
    pub fn new(cash: Decimal) -> Self {
        Self {
            portfolio_value: cash,
            peak_value: cash,
            cash,
            positions: HashMap::new(),
        }
    }

    /// Sum of |market value| over open positions
    pub fn deployed_value(&self) -> Decimal {
        self.positions
            .values()
            .filter(|p| !p.is_flat())
            .map(|p| p.market_value().abs())
            .sum()
    }

    /// (deployed + extra) / portfolio value; 1 when the account has no value
    pub fn deployment_fraction(&self, extra: Decimal) -> Decimal {
        if self.portfolio_value <= Decimal::ZERO {
            return Decimal::ONE;
        }
        (self.deployed_value() + extra) / self.portfolio_value
    }
}

/// Where the pipeline reads account state from
#[async_trait]
pub trait PortfolioSource: Send + Sync {
    async fn snapshot(&self) -> Result<AccountSnapshot>;

    /// Annualized volatility for sizing, when known
    async fn volatility(&self, _symbol: &str) -> Option<Decimal> {
        None
    }
}

/// In-process account updated by whoever owns the broker connection
#[derive(Debug, Default)]
pub struct SharedAccount {
    snapshot: RwLock<AccountSnapshot>,
    volatility: RwLock<HashMap<String, Decimal>>,
}

impl SharedAccount {
    pub fn new(snapshot: AccountSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            volatility: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the account state, carrying the peak forward
    pub async fn update(&self, mut snapshot: AccountSnapshot) {
        let mut current = self.snapshot.write().await;
        snapshot.peak_value = snapshot
            .peak_value
            .max(current.peak_value)
            .max(snapshot.portfolio_value);
        debug!(
            value = %snapshot.portfolio_value,
            peak = %snapshot.peak_value,
            cash = %snapshot.cash,
            positions = snapshot.positions.len(),
            "account updated"
        );
        *current = snapshot;
    }

    pub async fn set_volatility(&self, symbol: impl Into<String>, volatility: Decimal) {
        self.volatility.write().await.insert(symbol.into(), volatility);
    }
}

#[async_trait]
impl PortfolioSource for SharedAccount {
    async fn snapshot(&self) -> Result<AccountSnapshot> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn volatility(&self, symbol: &str) -> Option<Decimal> {
        self.volatility.read().await.get(symbol).copied()
    }
}
