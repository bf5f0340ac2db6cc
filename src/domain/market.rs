use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Historical OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    /// A bar where every price field is `close`. Handy for close-only series.
    pub fn from_close(symbol: impl Into<String>, timestamp: DateTime<Utc>, close: Decimal) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
        }
    }
}

/// Time-indexed OHLCV series keyed by symbol. Each series is kept sorted by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    series: BTreeMap<String, Vec<Bar>>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group and sort an unordered bar list
    pub fn from_bars(bars: impl IntoIterator<Item = Bar>) -> Self {
        let mut history = Self::new();
        for bar in bars {
            history.series.entry(bar.symbol.clone()).or_default().push(bar);
        }
        for bars in history.series.values_mut() {
            bars.sort_by_key(|b| b.timestamp);
        }
        history
    }

    pub fn insert(&mut self, bar: Bar) {
        let bars = self.series.entry(bar.symbol.clone()).or_default();
        let idx = bars.partition_point(|b| b.timestamp <= bar.timestamp);
        bars.insert(idx, bar);
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn bars(&self, symbol: &str) -> &[Bar] {
        self.series.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }

    /// Restrict to `symbols` and the closed interval [start, end]
    pub fn filter(
        &self,
        symbols: &[String],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        let series = self
            .series
            .iter()
            .filter(|(symbol, _)| symbols.is_empty() || symbols.contains(symbol))
            .map(|(symbol, bars)| {
                let bars = bars
                    .iter()
                    .filter(|b| start.map_or(true, |s| b.timestamp >= s))
                    .filter(|b| end.map_or(true, |e| b.timestamp <= e))
                    .cloned()
                    .collect::<Vec<_>>();
                (symbol.clone(), bars)
            })
            .filter(|(_, bars)| !bars.is_empty())
            .collect();
        Self { series }
    }

    /// Sorted set of distinct timestamps across every symbol
    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.series
            .values()
            .flatten()
            .map(|b| b.timestamp)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// A view containing only data at or before `timestamp`
    pub fn view_at(&self, timestamp: DateTime<Utc>) -> MarketView<'_> {
        MarketView {
            timestamp,
            history: self,
        }
    }
}

/// Read-only, no-look-ahead window over a [`PriceHistory`].
#[derive(Debug, Clone, Copy)]
pub struct MarketView<'a> {
    timestamp: DateTime<Utc>,
    history: &'a PriceHistory,
}

impl<'a> MarketView<'a> {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn symbols(&self) -> impl Iterator<Item = &'a str> + '_ {
        let ts = self.timestamp;
        self.history
            .series
            .iter()
            .filter(move |(_, bars)| bars.first().map_or(false, |b| b.timestamp <= ts))
            .map(|(symbol, _)| symbol.as_str())
    }

    /// Bars for `symbol` up to and including the view's timestamp
    pub fn bars(&self, symbol: &str) -> &'a [Bar] {
        let bars = self.history.bars(symbol);
        let cutoff = bars.partition_point(|b| b.timestamp <= self.timestamp);
        &bars[..cutoff]
    }

    pub fn latest(&self, symbol: &str) -> Option<&'a Bar> {
        self.bars(symbol).last()
    }

    /// Most recent close at or before the view's timestamp
    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.latest(symbol).map(|b| b.close)
    }

    /// Closes for `symbol`, oldest first
    pub fn closes(&self, symbol: &str) -> Vec<Decimal> {
        self.bars(symbol).iter().map(|b| b.close).collect()
    }

    /// Latest close for every symbol that has traded by now
    pub fn prices(&self) -> BTreeMap<String, Decimal> {
        self.history
            .series
            .keys()
            .filter_map(|s| self.price(s).map(|p| (s.clone(), p)))
            .collect()
    }
}
