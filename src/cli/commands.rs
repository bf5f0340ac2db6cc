//! Command handlers

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::output::{
    print_heading, print_item, print_items, summary_rows, AttributionRow, DecisionRow,
    ExecutionRow, FillRow, MetricRow, OutputMode,
};
use super::DataArgs;
use crate::analysis::stats::annualized_volatility;
use crate::config::AppConfig;
use crate::domain::PriceHistory;
use crate::execution::{OrderLifecycleHandler, PaperGateway};
use crate::persistence::ChannelAuditSink;
use crate::pipeline::{AccountSnapshot, SharedAccount, SignalPipeline};
use crate::risk::RiskManager;
use crate::strategy::backtest_feed::parse_timestamp;
use crate::strategy::{
    BacktestEngine, CsvSource, DataSource, MeanReversionConfig, MeanReversionSignals,
    MomentumConfig, MomentumSignals, MultiStrategyEngine, SignalStrategy, SmaCrossConfig,
    SmaCrossover, StrategyKind, StrategyLifecycle,
};
use crate::supervisor::{LogNotifier, NotificationHub};

fn parse_bound(flag: &str, value: Option<&str>) -> anyhow::Result<Option<DateTime<Utc>>> {
    value
        .map(|v| parse_timestamp(v).ok_or_else(|| anyhow!("invalid --{flag} timestamp: {v}")))
        .transpose()
}

fn load_history(args: &DataArgs) -> anyhow::Result<PriceHistory> {
    let start = parse_bound("start", args.start.as_deref())?;
    let end = parse_bound("end", args.end.as_deref())?;
    CsvSource::new(&args.data)
        .historical_data(&args.symbols, start, end)
        .with_context(|| format!("failed to load bars from {}", args.data.display()))
}

fn signal_strategies(
    symbols: &[String],
    lookback: usize,
    window: usize,
) -> anyhow::Result<(MomentumSignals, MeanReversionSignals)> {
    let momentum = MomentumSignals::new(MomentumConfig {
        symbols: symbols.to_vec(),
        lookback,
        ..MomentumConfig::default()
    })?;
    let reversion = MeanReversionSignals::new(MeanReversionConfig {
        symbols: symbols.to_vec(),
        window,
        ..MeanReversionConfig::default()
    })?;
    Ok((momentum, reversion))
}

#[allow(clippy::too_many_arguments)]
pub fn backtest(
    config: &AppConfig,
    data: &DataArgs,
    fast: usize,
    slow: usize,
    quantity: Decimal,
    risk_free: f64,
    show_fills: bool,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let history = load_history(data)?;
    let strategy = SmaCrossover::new(SmaCrossConfig {
        symbols: data.symbols.clone(),
        fast,
        slow,
        quantity,
    })?;

    let mut engine = BacktestEngine::new(config.backtest.clone(), StrategyKind::Orders(Box::new(strategy)))?;
    let result = engine.run(&history)?;
    let report = result.performance(risk_free);

    match mode {
        OutputMode::Json => print_item(&json!({ "result": result, "performance": report }))?,
        OutputMode::Table => {
            print_items(&summary_rows(&result, &report), mode)?;
            if show_fills {
                print_heading("Fills", mode);
                let rows: Vec<FillRow> = result.fills.iter().map(FillRow::from).collect();
                print_items(&rows, mode)?;
            }
        }
    }
    Ok(())
}

pub fn multi(
    config: &AppConfig,
    data: &DataArgs,
    lookback: usize,
    window: usize,
    risk_free: f64,
    show_skipped: bool,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let history = load_history(data)?;
    let (momentum, reversion) = signal_strategies(&data.symbols, lookback, window)?;

    let mut engine = MultiStrategyEngine::new(config.backtest.clone());
    engine.register(StrategyKind::Signals(Box::new(momentum)))?;
    engine.register(StrategyKind::Signals(Box::new(reversion)))?;
    let result = engine.run(&history)?;
    let report = result.combined.performance(risk_free);

    match mode {
        OutputMode::Json => print_item(&json!({ "result": result, "performance": report }))?,
        OutputMode::Table => {
            print_items(&summary_rows(&result.combined, &report), mode)?;
            print_heading("Attribution", mode);
            let rows: Vec<AttributionRow> = result
                .attribution
                .iter()
                .map(|(name, stats)| AttributionRow::new(name, stats))
                .collect();
            print_items(&rows, mode)?;
            if show_skipped {
                print_heading("Skipped signals", mode);
                let rows: Vec<DecisionRow> = result.skipped().map(DecisionRow::from).collect();
                print_items(&rows, mode)?;
            }
        }
    }
    Ok(())
}

pub async fn paper(
    config: &AppConfig,
    data: &DataArgs,
    lookback: usize,
    window: usize,
    dry_run: bool,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let history = load_history(data)?;
    let last = history
        .timestamps()
        .last()
        .copied()
        .ok_or_else(|| anyhow!("no bars in {}", data.data.display()))?;
    let view = history.view_at(last);

    let (mut momentum, mut reversion) = signal_strategies(&data.symbols, lookback, window)?;
    momentum.initialize()?;
    reversion.initialize()?;
    let mut signals = momentum.generate_signals(last, &view)?;
    signals.extend(reversion.generate_signals(last, &view)?);
    info!(count = signals.len(), at = %last, "signals generated");

    let account = Arc::new(SharedAccount::new(AccountSnapshot::new(config.backtest.initial_capital)));
    for symbol in view.symbols() {
        let closes = view.closes(symbol);
        if let Some(vol) = annualized_volatility(&closes).and_then(Decimal::from_f64) {
            account.set_volatility(symbol, vol.round_dp(6)).await;
        }
    }

    let gateway = Arc::new(PaperGateway::new());
    let (audit, mut audit_rx) = ChannelAuditSink::new();
    let audit = Arc::new(audit);
    let lifecycle = Arc::new(
        OrderLifecycleHandler::new(gateway.clone(), config.lifecycle.clone())
            .with_audit_sink(audit.clone()),
    );
    let notifications = Arc::new(NotificationHub::new().with_notifier(Arc::new(LogNotifier)));

    let mut settings = config.pipeline.clone();
    settings.dry_run |= dry_run;
    let pipeline = SignalPipeline::new(
        settings,
        Arc::new(RiskManager::new(config.risk.clone()).with_audit_sink(audit)),
        lifecycle,
        account,
        notifications,
    );
    let results = pipeline.process_batch(signals).await?;

    let mut audited = 0usize;
    while audit_rx.try_recv().is_ok() {
        audited += 1;
    }
    let submitted = gateway.submitted().await.len();
    if submitted == 0 && !results.is_empty() && !pipeline.settings().dry_run {
        warn!("no signal reached the gateway");
    }

    match mode {
        OutputMode::Json => print_item(&results)?,
        OutputMode::Table => {
            let rows: Vec<ExecutionRow> = results.iter().map(ExecutionRow::from).collect();
            print_items(&rows, mode)?;
            print_items(
                &[
                    MetricRow {
                        metric: "orders submitted".into(),
                        value: submitted.to_string(),
                    },
                    MetricRow {
                        metric: "audit events".into(),
                        value: audited.to_string(),
                    },
                ],
                mode,
            )?;
        }
    }
    Ok(())
}
