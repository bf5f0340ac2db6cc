//! Historical data sources for backtests
//!
//! Retrieval from real providers lives outside the core; these sources cover in-memory
//! fixtures and CSV exports.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::domain::{Bar, PriceHistory};
use crate::error::{GateError, Result};

/// Provider of time-indexed OHLCV series
pub trait DataSource {
    /// Bars for `symbols` (all symbols when empty) within [start, end]
    fn historical_data(
        &self,
        symbols: &[String],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<PriceHistory>;
}

/// Pre-loaded bars
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    history: PriceHistory,
}

impl InMemorySource {
    pub fn new(history: PriceHistory) -> Self {
        Self { history }
    }

    pub fn from_bars(bars: impl IntoIterator<Item = Bar>) -> Self {
        Self::new(PriceHistory::from_bars(bars))
    }
}

impl DataSource for InMemorySource {
    fn historical_data(
        &self,
        symbols: &[String],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<PriceHistory> {
        Ok(self.history.filter(symbols, start, end))
    }
}

/// CSV export with columns `timestamp,symbol,open,high,low,close,volume` and a header row
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DataSource for CsvSource {
    fn historical_data(
        &self,
        symbols: &[String],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<PriceHistory> {
        let bars = load_bars_from_csv(&self.path)?;
        let history = PriceHistory::from_bars(bars).filter(symbols, start, end);
        if history.is_empty() {
            return Err(GateError::DataUnavailable(format!(
                "no bars in {} for the requested symbols and range",
                self.path.display()
            )));
        }
        Ok(history)
    }
}

/// Load OHLCV bars from a CSV file
pub fn load_bars_from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Bar>> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let mut bars = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if i == 0 || line.trim().is_empty() {
            continue; // header
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 7 {
            warn!("Skipping malformed line {}: insufficient columns", i + 1);
            continue;
        }

        let timestamp = parse_timestamp(parts[0]).ok_or_else(|| {
            GateError::InvalidMarketData(format!("invalid timestamp at line {}", i + 1))
        })?;
        let field = |idx: usize, name: &str| {
            Decimal::from_str(parts[idx]).map_err(|e| {
                GateError::InvalidMarketData(format!("invalid {} at line {}: {}", name, i + 1, e))
            })
        };

        bars.push(Bar {
            timestamp,
            symbol: parts[1].to_string(),
            open: field(2, "open")?,
            high: field(3, "high")?,
            low: field(4, "low")?,
            close: field(5, "close")?,
            volume: field(6, "volume")?,
        });
    }

    info!("Loaded {} bars from CSV", bars.len());
    Ok(bars)
}

/// Unix seconds or millis, RFC 3339, or a few common naive formats (read as UTC)
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = s.parse::<i64>() {
        return if ts > 1_000_000_000_000 {
            Utc.timestamp_millis_opt(ts).single()
        } else {
            Utc.timestamp_opt(ts, 0).single()
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    // Date only
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}
