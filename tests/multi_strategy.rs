use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tradegate::domain::{Bar, MarketView, OrderSide, PriceHistory, TradingSignal};
use tradegate::strategy::{
    BacktestConfig, DecisionOutcome, MeanReversionConfig, MeanReversionSignals, MomentumConfig,
    MomentumSignals, MultiStrategyEngine, SignalStrategy, StrategyKind, StrategyLifecycle,
};
use tradegate::Result;

fn t(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64)
}

/// TREND climbs one point a bar; DIP chops between 50 and 51 with a one-bar drop to 44
fn market() -> PriceHistory {
    let mut bars = Vec::new();
    for i in 0..31 {
        bars.push(Bar::from_close("TREND", t(i), Decimal::from(100 + i as i64)));
        let dip = match i {
            25 => 44,
            _ if i % 2 == 0 => 50,
            _ => 51,
        };
        bars.push(Bar::from_close("DIP", t(i), Decimal::from(dip)));
    }
    PriceHistory::from_bars(bars)
}

#[test]
fn momentum_and_mean_reversion_share_one_account() {
    let momentum = MomentumSignals::new(MomentumConfig {
        lookback: 10,
        ..MomentumConfig::default()
    })
    .unwrap();
    let reversion = MeanReversionSignals::new(MeanReversionConfig {
        window: 10,
        ..MeanReversionConfig::default()
    })
    .unwrap();

    let mut engine = MultiStrategyEngine::new(BacktestConfig::default());
    engine.register(StrategyKind::signals(momentum)).unwrap();
    engine.register(StrategyKind::signals(reversion)).unwrap();
    let result = engine.run(&market()).unwrap();

    assert_eq!(result.combined.strategy_name, "momentum+mean_reversion");
    assert_eq!(result.skipped().count(), 0);

    let trend = &result.attribution["momentum"];
    assert_eq!(trend.executed, 1);
    assert!(trend.unrealized_pnl > Decimal::ZERO);
    assert!(trend.deployed_capital > Decimal::ZERO);

    // Bought the drop to 44, sold the snap back to 50
    let reversion = &result.attribution["mean_reversion"];
    assert_eq!(reversion.executed, 2);
    assert_eq!(reversion.wins, 1);
    assert_eq!(reversion.losses, 0);
    assert!(reversion.realized_pnl > Decimal::ZERO);
    assert_eq!(reversion.deployed_capital, Decimal::ZERO);

    let signals: usize = result.attribution.values().map(|a| a.signals).sum();
    let executed: usize = result.attribution.values().map(|a| a.executed).sum();
    assert_eq!(signals, result.decisions.len());
    assert_eq!(executed, result.combined.fills.len());
    assert!(result.combined.history.iter().all(|s| s.cash >= Decimal::ZERO));
    assert!(result.combined.final_capital > result.combined.initial_capital);
}

/// Emits fixed buys on the first bar
struct FirstBar {
    name: &'static str,
    signals: Vec<(&'static str, Decimal)>,
    fired: bool,
}

impl StrategyLifecycle for FirstBar {
    fn name(&self) -> &str {
        self.name
    }
}

impl SignalStrategy for FirstBar {
    fn generate_signals(&mut self, ts: DateTime<Utc>, data: &MarketView<'_>) -> Result<Vec<TradingSignal>> {
        if std::mem::replace(&mut self.fired, true) {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for (symbol, confidence) in &self.signals {
            let price = data.price(symbol).unwrap_or(Decimal::ONE);
            out.push(TradingSignal::new(*symbol, OrderSide::Buy, *confidence, dec!(2), price, self.name)?.at(ts));
        }
        Ok(out)
    }
}

#[test]
fn lower_quality_signal_from_another_strategy_hits_the_deployment_limit() {
    let config = BacktestConfig {
        initial_capital: dec!(10000),
        commission: Decimal::ZERO,
        slippage: Decimal::ZERO,
        max_position_pct: dec!(1),
        max_deployed_pct: dec!(0.65),
        ..BacktestConfig::default()
    };
    let mut engine = MultiStrategyEngine::new(config);
    engine
        .register(StrategyKind::signals(FirstBar {
            name: "weak",
            signals: vec![("AAA", dec!(0.2))],
            fired: false,
        }))
        .unwrap();
    engine
        .register(StrategyKind::signals(FirstBar {
            name: "strong",
            signals: vec![("BBB", dec!(0.6))],
            fired: false,
        }))
        .unwrap();

    let data = PriceHistory::from_bars([
        Bar::from_close("AAA", t(0), dec!(10)),
        Bar::from_close("BBB", t(0), dec!(10)),
    ]);
    let result = engine.run(&data).unwrap();

    assert_eq!(result.decisions.len(), 2);
    assert_eq!(result.decisions[0].strategy, "strong");
    assert!(result.decisions[0].is_executed());
    assert_eq!(result.combined.fills[0].fill_quantity(), dec!(600));

    let second = &result.decisions[1];
    assert_eq!(second.strategy, "weak");
    assert_eq!(second.rank, 1);
    match &second.outcome {
        DecisionOutcome::Skipped { reason } => assert!(reason.contains("deployment limit")),
        other => panic!("expected a recorded skip, got {:?}", other),
    }
    assert_eq!(result.attribution["weak"].signals, 1);
    assert_eq!(result.attribution["weak"].executed, 0);
}
