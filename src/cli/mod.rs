//! Command line interface
//!
//! `backtest` replays one order strategy, `multi` runs the reference signal strategies
//! against one shared account, and `paper` pushes the latest signals through the live
//! pipeline with a paper gateway.

pub mod commands;
pub mod output;

use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

pub use output::OutputMode;

#[derive(Parser, Debug)]
#[command(name = "tradegate")]
#[command(version)]
#[command(about = "Strategy backtesting, portfolio risk gating and signal execution", long_about = None)]
pub struct Cli {
    /// Configuration directory (default.toml plus the TRADEGATE_ENV overlay)
    #[arg(long, global = true, env = "TRADEGATE_CONFIG_DIR", default_value = "config")]
    pub config: PathBuf,

    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the bars come from and which slice of them to use
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// CSV file with timestamp,symbol,open,high,low,close,volume rows
    #[arg(short, long)]
    pub data: PathBuf,

    /// Comma-separated symbols; all symbols in the file when omitted
    #[arg(short, long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// First timestamp to include (RFC 3339, date or unix seconds)
    #[arg(long)]
    pub start: Option<String>,

    /// Last timestamp to include
    #[arg(long)]
    pub end: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Backtest the SMA crossover strategy
    Backtest {
        #[command(flatten)]
        data: DataArgs,

        #[arg(long, default_value_t = 10)]
        fast: usize,

        #[arg(long, default_value_t = 30)]
        slow: usize,

        /// Shares bought on each golden cross
        #[arg(short, long, default_value = "10")]
        quantity: Decimal,

        /// Annual risk-free rate for Sharpe and Sortino
        #[arg(long, default_value_t = 0.0)]
        risk_free: f64,

        /// Also list every fill
        #[arg(long)]
        fills: bool,
    },

    /// Run momentum and mean reversion together on one account
    Multi {
        #[command(flatten)]
        data: DataArgs,

        /// Momentum lookback in bars
        #[arg(long, default_value_t = 20)]
        lookback: usize,

        /// Mean reversion window in bars
        #[arg(long, default_value_t = 20)]
        window: usize,

        #[arg(long, default_value_t = 0.0)]
        risk_free: f64,

        /// Also list skipped signals
        #[arg(long)]
        skipped: bool,
    },

    /// Send the signals of the last bar through the risk-gated pipeline (paper fills)
    Paper {
        #[command(flatten)]
        data: DataArgs,

        #[arg(long, default_value_t = 20)]
        lookback: usize,

        #[arg(long, default_value_t = 20)]
        window: usize,

        /// Size and approve without submitting
        #[arg(long)]
        dry_run: bool,
    },
}
