pub mod analysis;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod execution;
pub mod persistence;
pub mod pipeline;
pub mod risk;
pub mod strategy;
pub mod supervisor;

pub use analysis::{PerformanceReport, TradeStatistics};
pub use config::{AppConfig, LoggingConfig};
pub use domain::{Bar, Fill, MarketView, Order, OrderSide, OrderType, Position, PriceHistory, TradingSignal};
pub use error::{GateError, Result};
pub use execution::{
    ExecutionGateway, LifecycleSettings, OrderLifecycleHandler, OrderStatus, PaperGateway,
    SubmissionOutcome,
};
pub use persistence::{AuditSink, ChannelAuditSink};
pub use pipeline::{
    AccountSnapshot, ExecutionResult, ExecutionStatus, PipelineSettings, PortfolioSource,
    SharedAccount, SignalPipeline,
};
pub use risk::{RiskCheckResult, RiskManager, RiskSettings};
pub use strategy::{
    BacktestConfig, BacktestEngine, BacktestResult, MultiStrategyEngine, MultiStrategyResult,
    StrategyKind,
};
pub use supervisor::{NotificationHub, Severity};
