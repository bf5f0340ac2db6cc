//! Output formatting for CLI commands.
//!
//! Two modes: human-readable tables (default) and JSON (--json).

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::analysis::PerformanceReport;
use crate::domain::Fill;
use crate::pipeline::ExecutionResult;
use crate::strategy::{BacktestResult, DecisionOutcome, SignalDecision, StrategyAttribution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(items)?;
            println!("{json}");
        }
    }
    Ok(())
}

/// Print a single Serialize item as pretty JSON.
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

pub fn print_heading(title: &str, mode: OutputMode) {
    if mode == OutputMode::Table {
        println!("\n{title}");
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct MetricRow {
    pub metric: String,
    pub value: String,
}

impl MetricRow {
    fn new(metric: &str, value: impl ToString) -> Self {
        Self {
            metric: metric.to_string(),
            value: value.to_string(),
        }
    }
}

fn pct(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

/// Headline numbers of a run
pub fn summary_rows(result: &BacktestResult, report: &PerformanceReport) -> Vec<MetricRow> {
    let trades = &report.trades;
    vec![
        MetricRow::new("strategy", &result.strategy_name),
        MetricRow::new("period", format!("{} .. {}", result.start.date_naive(), result.end.date_naive())),
        MetricRow::new("initial capital", result.initial_capital.round_dp(2)),
        MetricRow::new("final capital", result.final_capital.round_dp(2)),
        MetricRow::new("total return", pct(report.total_return)),
        MetricRow::new("annualized return", pct(report.annualized_return)),
        MetricRow::new("volatility", pct(report.volatility)),
        MetricRow::new("sharpe", format!("{:.3}", report.sharpe_ratio)),
        MetricRow::new("sortino", format!("{:.3}", report.sortino_ratio)),
        MetricRow::new("calmar", format!("{:.3}", report.calmar_ratio)),
        MetricRow::new("max drawdown", pct(report.max_drawdown)),
        MetricRow::new("fills", result.fills.len()),
        MetricRow::new("unfilled orders", result.unfilled.len()),
        MetricRow::new("round trips", trades.total_trades),
        MetricRow::new("win rate", pct(trades.win_rate)),
        MetricRow::new("profit factor", format!("{:.2}", trades.profit_factor)),
        MetricRow::new("strategy errors", result.strategy_errors),
    ]
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct FillRow {
    pub id: String,
    pub time: String,
    pub symbol: String,
    pub side: String,
    pub quantity: String,
    pub price: String,
    pub commission: String,
}

impl From<&Fill> for FillRow {
    fn from(fill: &Fill) -> Self {
        Self {
            id: fill.fill_id().to_string(),
            time: fill.timestamp().to_rfc3339(),
            symbol: fill.symbol().to_string(),
            side: fill.side().to_string(),
            quantity: fill.fill_quantity().normalize().to_string(),
            price: fill.fill_price().round_dp(4).to_string(),
            commission: fill.commission().round_dp(4).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct AttributionRow {
    pub strategy: String,
    pub signals: usize,
    pub executed: usize,
    pub deployed: String,
    pub realized: String,
    pub unrealized: String,
    pub wins: usize,
    pub losses: usize,
}

impl AttributionRow {
    pub fn new(strategy: &str, stats: &StrategyAttribution) -> Self {
        Self {
            strategy: strategy.to_string(),
            signals: stats.signals,
            executed: stats.executed,
            deployed: stats.deployed_capital.round_dp(2).to_string(),
            realized: stats.realized_pnl.round_dp(2).to_string(),
            unrealized: stats.unrealized_pnl.round_dp(2).to_string(),
            wins: stats.wins,
            losses: stats.losses,
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct DecisionRow {
    pub time: String,
    pub strategy: String,
    pub symbol: String,
    pub side: String,
    pub quality: String,
    pub outcome: String,
}

impl From<&SignalDecision> for DecisionRow {
    fn from(d: &SignalDecision) -> Self {
        let outcome = match &d.outcome {
            DecisionOutcome::Executed { fill_id } => format!("executed ({fill_id})"),
            DecisionOutcome::Skipped { reason } => format!("skipped: {reason}"),
        };
        Self {
            time: d.timestamp.to_rfc3339(),
            strategy: d.strategy.clone(),
            symbol: d.symbol.clone(),
            side: d.side.to_string(),
            quality: d.quality.round_dp(4).to_string(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct ExecutionRow {
    pub status: String,
    pub strategy: String,
    pub symbol: String,
    pub side: String,
    pub quality: String,
    pub quantity: String,
    pub notional: String,
    pub reason: String,
}

impl From<&ExecutionResult> for ExecutionRow {
    fn from(r: &ExecutionResult) -> Self {
        Self {
            status: r.status.to_string(),
            strategy: r.strategy.clone(),
            symbol: r.symbol.clone(),
            side: r.side.to_string(),
            quality: r.quality.round_dp(4).to_string(),
            quantity: r.quantity.normalize().to_string(),
            notional: r.notional.round_dp(2).to_string(),
            reason: r.reason.clone(),
        }
    }
}
