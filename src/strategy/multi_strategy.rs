//! Multi-strategy backtest engine
//!
//! Every registered signal strategy is polled each step. The pooled signals are ranked by
//! quality across strategies and sized against one shared ledger, so allocation is never
//! siloed per strategy. Attribution is tracked on the side and never feeds back into sizing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use super::backtest::{BacktestConfig, BacktestResult, UnfilledOrder};
use super::execution_sim::{ExecutionSimulator, FillOutcome};
use super::ledger::Ledger;
use super::traits::{SignalStrategy, StrategyKind};
use crate::domain::{Fill, MarketView, Order, OrderSide, Position, PriceHistory, TradingSignal};
use crate::error::{GateError, Result};

// ============================================================================
// Decisions and attribution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Executed { fill_id: String },
    Skipped { reason: String },
}

/// What happened to one pooled signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDecision {
    pub timestamp: DateTime<Utc>,
    pub strategy: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quality: Decimal,
    /// Position in the step's global ranking, 0 = best
    pub rank: usize,
    pub outcome: DecisionOutcome,
}

impl SignalDecision {
    pub fn is_executed(&self) -> bool {
        matches!(self.outcome, DecisionOutcome::Executed { .. })
    }
}

/// Per-strategy view of the fills its signals produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttribution {
    pub signals: usize,
    pub executed: usize,
    /// |value| of the positions this strategy opened, at the latest marks
    pub deployed_capital: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub wins: usize,
    pub losses: usize,
}

#[derive(Debug, Default)]
struct AttributionBook {
    positions: HashMap<String, Position>,
    stats: StrategyAttribution,
}

impl AttributionBook {
    fn apply_fill(&mut self, fill: &Fill, mark: Option<Decimal>) -> Result<()> {
        let symbol = fill.symbol().to_string();
        let position = self
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::new(symbol));

        let before = position.quantity();
        let realized_before = position.realized_pnl();
        position.update_from_fill(fill, mark)?;

        // Only fills that reduce an open position close a trade
        let reduces = !before.is_zero()
            && before.is_sign_positive() != fill.signed_quantity().is_sign_positive();
        if reduces {
            let delta = position.realized_pnl() - realized_before;
            if delta > Decimal::ZERO {
                self.stats.wins += 1;
            } else if delta < Decimal::ZERO {
                self.stats.losses += 1;
            }
        }
        self.stats.executed += 1;
        Ok(())
    }

    fn mark(&mut self, prices: &BTreeMap<String, Decimal>) {
        for (symbol, price) in prices {
            if let Some(position) = self.positions.get_mut(symbol) {
                position.update_unrealized_pnl(*price);
            }
        }
    }

    fn summarize(&self, prices: &HashMap<String, Decimal>) -> StrategyAttribution {
        let mut stats = self.stats.clone();
        stats.realized_pnl = self.positions.values().map(Position::realized_pnl).sum();
        stats.unrealized_pnl = self.positions.values().map(Position::unrealized_pnl).sum();
        stats.deployed_capital = self
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .map(|p| {
                let price = prices
                    .get(p.symbol())
                    .copied()
                    .unwrap_or_else(|| p.avg_entry_price());
                p.notional_value(price).abs()
            })
            .sum();
        stats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiStrategyResult {
    /// Combined account, named after the registered strategies
    pub combined: BacktestResult,
    pub decisions: Vec<SignalDecision>,
    pub attribution: BTreeMap<String, StrategyAttribution>,
}

impl MultiStrategyResult {
    pub fn skipped(&self) -> impl Iterator<Item = &SignalDecision> {
        self.decisions.iter().filter(|d| !d.is_executed())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct MultiStrategyEngine {
    config: BacktestConfig,
    strategies: Vec<Box<dyn SignalStrategy>>,
}

/// Sized order for one signal, or why there is none
enum Sizing {
    Order(Order),
    Skip(String),
}

impl MultiStrategyEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            strategies: Vec::new(),
        }
    }

    /// Fails with `InvalidStrategy` for order-producing strategies or a duplicate name
    pub fn register(&mut self, strategy: StrategyKind) -> Result<()> {
        let strategy = strategy.into_signal_strategy()?;
        if self.strategies.iter().any(|s| s.name() == strategy.name()) {
            return Err(GateError::InvalidStrategy(format!(
                "a strategy named {} is already registered",
                strategy.name()
            )));
        }
        info!(strategy = strategy.name(), "registered signal strategy");
        self.strategies.push(strategy);
        Ok(())
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn run(&mut self, data: &PriceHistory) -> Result<MultiStrategyResult> {
        if self.strategies.is_empty() {
            return Err(GateError::InvalidStrategy("no strategies registered".into()));
        }
        let timestamps = data.timestamps();
        if timestamps.is_empty() {
            return Err(GateError::DataUnavailable("price history is empty".into()));
        }

        let names = self.strategy_names();
        info!(strategies = ?names, steps = timestamps.len(), "Starting multi-strategy backtest");

        let mut ledger = Ledger::new(self.config.initial_capital);
        let mut sim = ExecutionSimulator::with_config(self.config.execution());
        let mut books: Vec<AttributionBook> =
            self.strategies.iter().map(|_| AttributionBook::default()).collect();
        let mut decisions = Vec::new();
        let mut unfilled = Vec::new();
        let mut strategy_errors = 0;
        let mut last_prices = HashMap::new();

        for strategy in self.strategies.iter_mut() {
            strategy.initialize()?;
        }

        for &ts in &timestamps {
            let view = data.view_at(ts);
            let prices = view.prices();
            ledger.mark_to_market(&prices);
            for book in books.iter_mut() {
                book.mark(&prices);
            }
            last_prices.extend(prices.iter().map(|(s, p)| (s.clone(), *p)));
            ledger.record_snapshot(ts);

            // Pool (strategy index, signal) across strategies
            let mut pooled: Vec<(usize, TradingSignal)> = Vec::new();
            for (idx, strategy) in self.strategies.iter_mut().enumerate() {
                match strategy.generate_signals(ts, &view) {
                    Ok(signals) => {
                        books[idx].stats.signals += signals.len();
                        pooled.extend(signals.into_iter().map(|s| (idx, s)));
                    }
                    Err(e) => {
                        warn!(strategy = strategy.name(), timestamp = %ts, "signal generation failed: {}", e);
                        strategy_errors += 1;
                    }
                }
            }
            if pooled.is_empty() {
                continue;
            }

            let ranked = self.rank(pooled);
            for (rank, (idx, signal)) in ranked.into_iter().enumerate() {
                let quality = signal.quality_score_with_cap(self.config.sharpe_cap);
                let outcome = match self.size(&signal, quality, &ledger, &view) {
                    Sizing::Skip(reason) => DecisionOutcome::Skipped { reason },
                    Sizing::Order(order) => {
                        let market = view.price(order.symbol());
                        match sim.execute(&order, market, ledger.cash(), ts)? {
                            FillOutcome::Filled(fill) => {
                                let fill_id = fill.fill_id().to_string();
                                books[idx].apply_fill(&fill, market)?;
                                self.strategies[idx].on_fill(&fill);
                                ledger.apply_fill(fill)?;
                                DecisionOutcome::Executed { fill_id }
                            }
                            FillOutcome::NotFilled(reason) => {
                                let skipped = DecisionOutcome::Skipped {
                                    reason: reason.to_string(),
                                };
                                unfilled.push(UnfilledOrder {
                                    timestamp: ts,
                                    order,
                                    reason,
                                });
                                skipped
                            }
                        }
                    }
                };

                if let DecisionOutcome::Skipped { reason } = &outcome {
                    debug!(
                        strategy = %self.strategies[idx].name(),
                        symbol = signal.symbol(),
                        %quality,
                        "signal skipped: {}",
                        reason
                    );
                }
                decisions.push(SignalDecision {
                    timestamp: ts,
                    strategy: self.strategies[idx].name().to_string(),
                    symbol: signal.symbol().to_string(),
                    side: signal.side(),
                    quality,
                    rank,
                    outcome,
                });
            }
        }

        for strategy in self.strategies.iter_mut() {
            strategy.finalize()?;
        }

        let attribution = names
            .iter()
            .cloned()
            .zip(books.iter().map(|b| b.summarize(&last_prices)))
            .collect();
        let combined = BacktestResult::from_ledger(
            names.join("+"),
            &timestamps,
            self.config.initial_capital,
            ledger,
            unfilled,
            strategy_errors,
        )?;

        info!(
            fills = combined.fills.len(),
            decisions = decisions.len(),
            final_capital = %combined.final_capital,
            "Multi-strategy backtest complete"
        );

        Ok(MultiStrategyResult {
            combined,
            decisions,
            attribution,
        })
    }

    /// Best quality first; the stable sort keeps pooling order among ties
    fn rank(&self, mut pooled: Vec<(usize, TradingSignal)>) -> Vec<(usize, TradingSignal)> {
        let cap = self.config.sharpe_cap;
        pooled.sort_by(|a, b| {
            b.1.quality_score_with_cap(cap)
                .cmp(&a.1.quality_score_with_cap(cap))
        });
        pooled
    }

    fn size(
        &self,
        signal: &TradingSignal,
        quality: Decimal,
        ledger: &Ledger,
        view: &MarketView<'_>,
    ) -> Sizing {
        let symbol = signal.symbol();
        let Some(market) = view.price(symbol) else {
            return Sizing::Skip("no market price".into());
        };
        let held = ledger
            .position(symbol)
            .map(Position::quantity)
            .unwrap_or_default();

        // Exits close the whole opposite position and bypass the deployment limit
        let closing = match signal.side() {
            OrderSide::Sell if held > Decimal::ZERO => Some(held),
            OrderSide::Buy if held < Decimal::ZERO => Some(held.abs()),
            _ => None,
        };
        if let Some(quantity) = closing {
            return match Order::market(symbol, signal.side(), quantity) {
                Ok(order) => Sizing::Order(order),
                Err(e) => Sizing::Skip(e.to_string()),
            };
        }

        if quality <= Decimal::ZERO {
            return Sizing::Skip(format!("non-positive quality {}", quality));
        }

        let cash = ledger.cash();
        let allocation = (self.config.max_position_pct * cash * quality)
            .min(self.config.cash_safety_margin * cash);
        let quantity = (allocation / signal.entry_price()).floor();
        if quantity <= Decimal::ZERO {
            return Sizing::Skip(format!(
                "allocation {} buys no whole shares at {}",
                allocation.round_dp(2),
                signal.entry_price()
            ));
        }

        let total = ledger.total_value();
        if total <= Decimal::ZERO {
            return Sizing::Skip("portfolio value is not positive".into());
        }
        let deployed = (ledger.gross_exposure() + quantity * market) / total;
        if deployed > self.config.max_deployed_pct {
            return Sizing::Skip(format!(
                "deployment limit: {:.4} would exceed {}",
                deployed, self.config.max_deployed_pct
            ));
        }

        match Order::market(symbol, signal.side(), quantity) {
            Ok(order) => Sizing::Order(order),
            Err(e) => Sizing::Skip(e.to_string()),
        }
    }
}
