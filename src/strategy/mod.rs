//! Strategy module
//!
//! Strategies and the deterministic engines that replay them.
//!
//! ## Architecture
//!
//! - `traits` - order-producing and signal-producing strategy interfaces
//! - `backtest_feed` - historical data sources
//! - `execution_sim` / `ledger` - fill simulation and account bookkeeping
//! - `backtest` / `multi_strategy` - the single- and multi-strategy engines
//! - `strategies/` - reference strategies
//!
//! ## Usage
//!
//! ```bash
//! tradegate backtest --data ./data/daily.csv --symbols AAPL,MSFT --fast 10 --slow 30
//! tradegate multi --data ./data/daily.csv --symbols AAPL,MSFT
//! ```

pub mod backtest;
pub mod backtest_feed;
pub mod execution_sim;
pub mod ledger;
pub mod multi_strategy;
pub mod strategies;
pub mod traits;

pub use backtest::{BacktestConfig, BacktestEngine, BacktestResult, UnfilledOrder};
pub use backtest_feed::{load_bars_from_csv, CsvSource, DataSource, InMemorySource};
pub use execution_sim::{
    CommissionModel, ExecutionSimConfig, ExecutionSimulator, FillOutcome, NotFilledReason,
};
pub use ledger::{Ledger, PortfolioSnapshot};
pub use multi_strategy::{
    DecisionOutcome, MultiStrategyEngine, MultiStrategyResult, SignalDecision, StrategyAttribution,
};
pub use strategies::{
    MeanReversionConfig, MeanReversionSignals, MomentumConfig, MomentumSignals, SmaCrossConfig,
    SmaCrossover,
};
pub use traits::{OrderStrategy, SignalStrategy, StrategyKind, StrategyLifecycle};
