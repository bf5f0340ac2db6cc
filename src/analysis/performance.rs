//! Performance analyzer.
//!
//! Pure functions over an equity curve and a fill log. Ratios are `f64`, money is `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::stats::{mean, pct_changes, sample_std_dev, to_f64, TRADING_DAYS};
use crate::domain::Fill;

/// Period-over-period percent change of an equity curve. The first element is 0.
pub fn returns(equity_curve: &[Decimal]) -> Vec<f64> {
    if equity_curve.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(equity_curve.len());
    out.push(0.0);
    out.extend(pct_changes(&to_f64(equity_curve)));
    out
}

/// Annualized Sharpe ratio. 0 for an empty or flat series.
pub fn sharpe(returns: &[f64], risk_free_annual: f64) -> f64 {
    let std = sample_std_dev(returns);
    if returns.is_empty() || std == 0.0 {
        return 0.0;
    }
    let excess = mean(returns) - risk_free_annual / TRADING_DAYS;
    excess / std * TRADING_DAYS.sqrt()
}

/// Annualized Sortino ratio, using the deviation of negative returns only.
///
/// No downside at all gives `+inf` when the series has gains and 0 when its mean is not positive.
pub fn sortino(returns: &[f64], risk_free_annual: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let m = mean(returns);
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return if m > 0.0 && returns.iter().any(|r| *r > 0.0) {
            f64::INFINITY
        } else {
            0.0
        };
    }
    let downside_std = sample_std_dev(&downside);
    if downside_std == 0.0 {
        return 0.0;
    }
    (m - risk_free_annual / TRADING_DAYS) / downside_std * TRADING_DAYS.sqrt()
}

/// Worst peak-to-trough decline as a non-positive fraction. 0 for a non-decreasing curve.
pub fn max_drawdown(equity_curve: &[Decimal]) -> f64 {
    let mut running_max = f64::MIN;
    let mut worst = 0.0_f64;
    for value in to_f64(equity_curve) {
        running_max = running_max.max(value);
        if running_max > 0.0 {
            worst = worst.min((value - running_max) / running_max);
        }
    }
    worst
}

/// Compound annual growth: (last / first)^(252 / (n - 1)) - 1
pub fn annualized_return(equity_curve: &[Decimal]) -> f64 {
    let n = equity_curve.len();
    if n < 2 {
        return 0.0;
    }
    let first = equity_curve[0].to_f64().unwrap_or(0.0);
    let last = equity_curve[n - 1].to_f64().unwrap_or(0.0);
    if first <= 0.0 || last <= 0.0 {
        return 0.0;
    }
    (last / first).powf(TRADING_DAYS / (n - 1) as f64) - 1.0
}

/// Sample std-dev of returns × √252
pub fn annualized_volatility(returns: &[f64]) -> f64 {
    sample_std_dev(returns) * TRADING_DAYS.sqrt()
}

/// annualized_return / |max_drawdown|. 0 when there was no drawdown.
pub fn calmar(annualized_return: f64, max_drawdown: f64) -> f64 {
    if max_drawdown >= 0.0 {
        return 0.0;
    }
    annualized_return / max_drawdown.abs()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Long,
    Short,
}

/// A matched open/close of some quantity in one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub symbol: String,
    pub direction: TradeDirection,
    pub quantity: Decimal,
    /// Per-unit entry price including the entry commission
    pub entry_price: Decimal,
    /// Per-unit exit price including the exit commission
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStatistics {
    pub round_trips: Vec<RoundTrip>,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    /// gross profit / gross loss, 0 when there are no losses
    pub profit_factor: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub avg_trade: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
}

#[derive(Debug, Clone, Copy)]
struct OpenLot {
    /// Signed running quantity
    quantity: Decimal,
    /// Per-unit cost (long) or proceeds (short), commission included
    unit_cost: Decimal,
    opened_at: DateTime<Utc>,
}

/// Reconstruct round trips per symbol from fills in order and summarize them.
pub fn trade_statistics(fills: &[Fill]) -> TradeStatistics {
    let mut open: BTreeMap<&str, OpenLot> = BTreeMap::new();
    let mut round_trips = Vec::new();

    for fill in fills {
        let signed = fill.signed_quantity();
        let qty = fill.fill_quantity();
        let price = fill.fill_price();
        let commission_per_unit = fill.commission() / qty;

        let lot = open.entry(fill.symbol()).or_insert(OpenLot {
            quantity: Decimal::ZERO,
            unit_cost: Decimal::ZERO,
            opened_at: fill.timestamp(),
        });

        // Effective per-unit price of this fill from the trader's point of view
        let unit_in = price + commission_per_unit; // paid when buying
        let unit_out = price - commission_per_unit; // received when selling

        let same_direction = lot.quantity.is_zero()
            || lot.quantity.is_sign_positive() == signed.is_sign_positive();

        if same_direction {
            let unit = if signed > Decimal::ZERO { unit_in } else { unit_out };
            if lot.quantity.is_zero() {
                lot.opened_at = fill.timestamp();
            }
            let new_qty = lot.quantity + signed;
            lot.unit_cost = (lot.unit_cost * lot.quantity.abs() + unit * qty) / new_qty.abs();
            lot.quantity = new_qty;
            continue;
        }

        let closed = qty.min(lot.quantity.abs());
        let (direction, entry, exit, pnl) = if lot.quantity > Decimal::ZERO {
            (
                TradeDirection::Long,
                lot.unit_cost,
                unit_out,
                (unit_out - lot.unit_cost) * closed,
            )
        } else {
            (
                TradeDirection::Short,
                lot.unit_cost,
                unit_in,
                (lot.unit_cost - unit_in) * closed,
            )
        };
        round_trips.push(RoundTrip {
            symbol: fill.symbol().to_string(),
            direction,
            quantity: closed,
            entry_price: entry,
            exit_price: exit,
            pnl,
            opened_at: lot.opened_at,
            closed_at: fill.timestamp(),
        });

        let remainder = qty - closed;
        lot.quantity += fill.side().sign() * closed;
        if lot.quantity.is_zero() {
            lot.unit_cost = Decimal::ZERO;
        }
        if remainder > Decimal::ZERO {
            // Crossed through zero: the rest opens the opposite side
            lot.quantity = fill.side().sign() * remainder;
            lot.unit_cost = if signed > Decimal::ZERO { unit_in } else { unit_out };
            lot.opened_at = fill.timestamp();
        }
    }

    summarize(round_trips)
}

fn summarize(round_trips: Vec<RoundTrip>) -> TradeStatistics {
    let total = round_trips.len();
    if total == 0 {
        return TradeStatistics::default();
    }

    let wins: Vec<Decimal> = round_trips.iter().map(|t| t.pnl).filter(|p| *p > Decimal::ZERO).collect();
    let losses: Vec<Decimal> = round_trips.iter().map(|t| t.pnl).filter(|p| *p < Decimal::ZERO).collect();

    let gross_profit: Decimal = wins.iter().sum();
    let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();
    let net: Decimal = round_trips.iter().map(|t| t.pnl).sum();

    let profit_factor = if gross_loss.is_zero() {
        0.0
    } else {
        (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
    };

    let avg = |values: &[Decimal]| {
        if values.is_empty() {
            Decimal::ZERO
        } else {
            values.iter().sum::<Decimal>() / Decimal::from(values.len())
        }
    };

    TradeStatistics {
        total_trades: total,
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate: wins.len() as f64 / total as f64,
        gross_profit,
        gross_loss,
        profit_factor,
        avg_win: avg(&wins),
        avg_loss: avg(&losses),
        avg_trade: net / Decimal::from(total),
        largest_win: wins.iter().copied().max().unwrap_or(Decimal::ZERO),
        largest_loss: losses.iter().copied().min().unwrap_or(Decimal::ZERO),
        round_trips,
    }
}

/// Everything the analyzer derives from one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub trades: TradeStatistics,
}

pub fn report(equity_curve: &[Decimal], fills: &[Fill], risk_free_annual: f64) -> PerformanceReport {
    let rets = returns(equity_curve);
    let total_return = match (equity_curve.first(), equity_curve.last()) {
        (Some(first), Some(last)) if !first.is_zero() => {
            ((*last - *first) / *first).to_f64().unwrap_or(0.0)
        }
        _ => 0.0,
    };
    let annualized = annualized_return(equity_curve);
    let drawdown = max_drawdown(equity_curve);

    PerformanceReport {
        total_return,
        annualized_return: annualized,
        volatility: annualized_volatility(&rets),
        sharpe_ratio: sharpe(&rets, risk_free_annual),
        sortino_ratio: sortino(&rets, risk_free_annual),
        calmar_ratio: calmar(annualized, drawdown),
        max_drawdown: drawdown,
        trades: trade_statistics(fills),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, OrderSide};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn fill(n: i64, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal, fee: Decimal) -> Fill {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n);
        let order = Order::market(symbol, side, qty).unwrap();
        Fill::new(order, price, qty, fee, ts, format!("f{}", n)).unwrap()
    }

    #[test]
    fn test_returns_first_is_zero() {
        let r = returns(&[dec!(100), dec!(110), dec!(99)]);
        assert_eq!(r.len(), 3);
        assert_eq!(r[0], 0.0);
        assert!((r[1] - 0.1).abs() < 1e-12);
        assert!((r[2] + 0.1).abs() < 1e-12);
        assert!(returns(&[]).is_empty());
    }

    #[test]
    fn test_max_drawdown() {
        assert_eq!(max_drawdown(&[dec!(100), dec!(100), dec!(120), dec!(130)]), 0.0);
        assert_eq!(max_drawdown(&[dec!(100), dec!(120), dec!(90)]), -0.25);
    }

    #[test]
    fn test_sharpe_degenerate_cases() {
        assert_eq!(sharpe(&[], 0.0), 0.0);
        assert_eq!(sharpe(&[0.01, 0.01, 0.01], 0.0), 0.0);
        assert!(sharpe(&[0.0, 0.02, -0.01, 0.03], 0.0) > 0.0);
    }

    #[test]
    fn test_sortino_without_downside() {
        assert_eq!(sortino(&[0.0, 0.01, 0.02], 0.0), f64::INFINITY);
        assert_eq!(sortino(&[0.0, 0.0], 0.0), 0.0);
        assert!(sortino(&[0.0, 0.03, -0.01, -0.02, 0.04], 0.0) > 0.0);
    }

    #[test]
    fn test_calmar_and_annualized() {
        assert_eq!(calmar(0.3, 0.0), 0.0);
        assert!((calmar(0.3, -0.15) - 2.0).abs() < 1e-12);
        assert_eq!(annualized_return(&[dec!(100)]), 0.0);
        assert_eq!(annualized_return(&[dec!(100), dec!(100), dec!(100)]), 0.0);
        assert!(annualized_return(&[dec!(100), dec!(101), dec!(102)]) > 0.0);
    }

    #[test]
    fn test_trade_statistics_long_round_trips() {
        let fills = vec![
            fill(0, "AAPL", OrderSide::Buy, dec!(10), dec!(100), dec!(1)),
            fill(1, "AAPL", OrderSide::Sell, dec!(10), dec!(110), dec!(1)),
            fill(2, "MSFT", OrderSide::Buy, dec!(5), dec!(200), dec!(0)),
            fill(3, "MSFT", OrderSide::Sell, dec!(5), dec!(190), dec!(0)),
        ];
        let stats = trade_statistics(&fills);
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.round_trips[0].pnl, dec!(98));
        assert_eq!(stats.round_trips[1].pnl, dec!(-50));
        assert_eq!(stats.win_rate, 0.5);
        assert!((stats.profit_factor - 1.96).abs() < 1e-12);
        assert_eq!(stats.largest_loss, dec!(-50));
        assert_eq!(stats.avg_trade, dec!(24));
    }

    #[test]
    fn test_trade_statistics_short_and_flip() {
        let fills = vec![
            fill(0, "X", OrderSide::Sell, dec!(4), dec!(50), dec!(0)),
            // covers 4 (profit 20) and opens a long of 2 at 45
            fill(1, "X", OrderSide::Buy, dec!(6), dec!(45), dec!(0)),
            fill(2, "X", OrderSide::Sell, dec!(2), dec!(40), dec!(0)),
        ];
        let stats = trade_statistics(&fills);
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.round_trips[0].direction, TradeDirection::Short);
        assert_eq!(stats.round_trips[0].pnl, dec!(20));
        assert_eq!(stats.round_trips[1].direction, TradeDirection::Long);
        assert_eq!(stats.round_trips[1].pnl, dec!(-10));
        assert_eq!(stats.profit_factor, 2.0);
    }

    #[test]
    fn test_no_losses_profit_factor_zero() {
        let fills = vec![
            fill(0, "X", OrderSide::Buy, dec!(1), dec!(10), dec!(0)),
            fill(1, "X", OrderSide::Sell, dec!(1), dec!(12), dec!(0)),
        ];
        assert_eq!(trade_statistics(&fills).profit_factor, 0.0);
    }

    #[test]
    fn test_report_bundles_metrics() {
        let curve = [dec!(100), dec!(120), dec!(90), dec!(110)];
        let r = report(&curve, &[], 0.0);
        assert_eq!(r.max_drawdown, -0.25);
        assert!((r.total_return - 0.1).abs() < 1e-12);
        assert_eq!(r.trades.total_trades, 0);
    }
}
