//! Live signal path: risk-gated sizing and submission

pub mod portfolio;
pub mod signal_pipeline;

pub use portfolio::{AccountSnapshot, PortfolioSource, SharedAccount};
pub use signal_pipeline::{ExecutionResult, ExecutionStatus, PipelineSettings, SignalPipeline};
