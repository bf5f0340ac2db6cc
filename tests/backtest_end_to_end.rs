use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;
use std::path::PathBuf;

use tradegate::domain::{Fill, MarketView, Order, OrderSide};
use tradegate::strategy::{
    BacktestConfig, BacktestEngine, CsvSource, OrderStrategy, SmaCrossConfig, SmaCrossover,
    StrategyKind, StrategyLifecycle,
};
use tradegate::Result;

fn write_csv(name: &str, rows: &[(&str, i64)]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tradegate-e2e-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("bars.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "timestamp,symbol,open,high,low,close,volume").unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    for (i, (symbol, close)) in rows.iter().enumerate() {
        let ts = t0 + Duration::days(i as i64);
        writeln!(
            f,
            "{},{},{c},{c},{c},{c},1000",
            ts.format("%Y-%m-%d"),
            symbol,
            c = close
        )
        .unwrap();
    }
    path
}

/// Buys once on the first bar and holds
struct BuyAndHold {
    symbol: String,
    quantity: Decimal,
    done: bool,
}

impl StrategyLifecycle for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn on_fill(&mut self, _fill: &Fill) {
        self.done = true;
    }
}

impl OrderStrategy for BuyAndHold {
    fn on_data(&mut self, _ts: DateTime<Utc>, _data: &MarketView<'_>) -> Result<Vec<Order>> {
        if self.done {
            return Ok(Vec::new());
        }
        Ok(vec![Order::market(&self.symbol, OrderSide::Buy, self.quantity)?])
    }
}

#[test]
fn buy_and_hold_marks_position_to_market() {
    let path = write_csv(
        "hold",
        &[("AAPL", 100), ("AAPL", 101), ("AAPL", 102), ("AAPL", 103), ("AAPL", 104)],
    );
    let strategy = BuyAndHold {
        symbol: "AAPL".into(),
        quantity: dec!(10),
        done: false,
    };
    let config = BacktestConfig {
        initial_capital: dec!(10000),
        slippage: Decimal::ZERO,
        ..BacktestConfig::default()
    };

    let mut engine = BacktestEngine::new(config, StrategyKind::orders(strategy)).unwrap();
    let result = engine
        .run_from_source(&CsvSource::new(&path), &[], None, None)
        .unwrap();

    assert_eq!(result.fills.len(), 1);
    assert_eq!(result.fills[0].commission(), dec!(0.1));
    // 10000 - 1000 - 0.1 cash, plus 10 shares at 104
    assert_eq!(result.final_capital, dec!(10039.9));
    assert_eq!(result.total_return, dec!(0.00399));

    let report = result.performance(0.0);
    assert!(report.total_return > 0.0);
    assert_eq!(report.max_drawdown, 0.0);
    // Position still open, so no round trips
    assert_eq!(report.trades.total_trades, 0);

    let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(json["strategy_name"], "buy_and_hold");
}

#[test]
fn sma_crossover_round_trip_from_csv() {
    let closes = [10, 9, 8, 9, 11, 12, 10, 8, 7];
    let mut rows: Vec<(&str, i64)> = closes.iter().map(|c| ("AAA", *c)).collect();
    // Another symbol in the same file, filtered out by the source
    rows.push(("ZZZ", 50));
    let path = write_csv("sma", &rows);

    let strategy = SmaCrossover::new(SmaCrossConfig {
        symbols: vec!["AAA".into()],
        fast: 2,
        slow: 3,
        quantity: dec!(10),
    })
    .unwrap();
    let config = BacktestConfig {
        initial_capital: dec!(1000),
        slippage: Decimal::ZERO,
        ..BacktestConfig::default()
    };
    let mut engine = BacktestEngine::new(config, StrategyKind::orders(strategy)).unwrap();
    let result = engine
        .run_from_source(&CsvSource::new(&path), &["AAA".to_string()], None, None)
        .unwrap();

    assert_eq!(result.history.len(), closes.len());
    assert_eq!(result.fills.len(), 2);
    assert_eq!(result.fills[0].side(), OrderSide::Buy);
    assert_eq!(result.fills[1].side(), OrderSide::Sell);
    // Bought 10 at 11, sold 10 at 8, commission 0.001 × price per trade
    assert_eq!(result.final_capital, dec!(969.981));

    let report = result.performance(0.0);
    assert_eq!(report.trades.total_trades, 1);
    assert_eq!(report.trades.losing_trades, 1);
    assert!(report.max_drawdown < 0.0);
    assert!(report.sharpe_ratio < 0.0);
}

#[test]
fn date_range_outside_the_data_is_unavailable() {
    let path = write_csv("range", &[("AAPL", 100), ("AAPL", 101)]);
    let strategy = BuyAndHold {
        symbol: "AAPL".into(),
        quantity: dec!(1),
        done: false,
    };
    let mut engine =
        BacktestEngine::new(BacktestConfig::default(), StrategyKind::orders(strategy)).unwrap();
    let start = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

    let err = engine
        .run_from_source(&CsvSource::new(&path), &[], Some(start), None)
        .unwrap_err();
    assert!(err.to_string().contains("unavailable"));
}
