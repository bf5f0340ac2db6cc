//! Small numeric helpers shared by the performance analyzer and the risk manager.
//!
//! Money stays in `Decimal`; ratios and statistics are computed in `f64`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Trading days per year used for annualization
pub const TRADING_DAYS: f64 = 252.0;

pub fn to_f64(values: &[Decimal]) -> Vec<f64> {
    values.iter().map(|v| v.to_f64().unwrap_or(0.0)).collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample (n-1) standard deviation. Fewer than two points gives 0.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Period-over-period fractional change. A zero base yields a zero change.
pub fn pct_changes(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] == 0.0 { 0.0 } else { w[1] / w[0] - 1.0 })
        .collect()
}

/// Pearson correlation of two equally sampled series.
///
/// Series of different length are aligned on their most recent points. Returns `None`
/// when fewer than two points overlap or either side has zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let (ma, mb) = (mean(a), mean(b));

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - ma, y - mb);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Annualized volatility of a price series: sample std-dev of its returns × √252.
pub fn annualized_volatility(prices: &[Decimal]) -> Option<f64> {
    let returns = pct_changes(&to_f64(prices));
    if returns.len() < 2 {
        return None;
    }
    Some(sample_std_dev(&returns) * TRADING_DAYS.sqrt())
}
