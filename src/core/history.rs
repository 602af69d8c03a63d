//! Price history abstractions and core types

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::error::SimError;

/// One daily close observation for a single symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Supplies the daily closing-price series for one symbol over a date range.
///
/// Implementations fetch from a market-data feed; tests substitute canned
/// series. Prices must be positive; the run happens entirely after fetching.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ClosePoint>>;
}

/// Closing prices for every universe asset on one trading day.
#[derive(Debug, Clone)]
pub struct TradingDay {
    pub date: NaiveDate,
    closes: BTreeMap<String, f64>,
}

impl TradingDay {
    pub fn new(date: NaiveDate, closes: BTreeMap<String, f64>) -> Self {
        TradingDay { date, closes }
    }

    /// Close for `symbol`. A gap in the feed is a data-integrity problem,
    /// not a skippable condition.
    pub fn close(&self, symbol: &str) -> Result<f64, SimError> {
        self.closes
            .get(symbol)
            .copied()
            .ok_or_else(|| SimError::MissingPrice {
                symbol: symbol.to_string(),
                date: self.date,
            })
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.closes.keys().map(String::as_str)
    }
}

/// Date-ordered table of closing prices, fully materialized before a run.
///
/// Days are strictly ascending with no duplicates. Weekend/holiday gaps
/// between days are expected; the calendar-day lookback handles them via
/// [`PriceHistory::at_or_before`].
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    days: Vec<TradingDay>,
}

impl PriceHistory {
    /// Builds a history from pre-assembled trading days.
    ///
    /// Days are sorted ascending and later duplicates of a date are
    /// dropped. No cross-symbol completeness check happens here; gaps
    /// surface later as [`SimError::MissingPrice`] at valuation time.
    pub fn new(mut days: Vec<TradingDay>) -> Self {
        days.sort_by_key(|day| day.date);
        days.dedup_by_key(|day| day.date);
        PriceHistory { days }
    }

    /// Builds a history from per-symbol close series by intersecting on date.
    ///
    /// Only dates priced for *every* symbol are kept, so each simulated day
    /// values the whole universe. Input series may be unsorted and may
    /// contain duplicate dates (last observation wins).
    pub fn from_series(series: &BTreeMap<String, Vec<ClosePoint>>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
        for (symbol, points) in series {
            for point in points {
                by_date
                    .entry(point.date)
                    .or_default()
                    .insert(symbol.clone(), point.close);
            }
        }

        let total = by_date.len();
        let days: Vec<TradingDay> = by_date
            .into_iter()
            .filter(|(_, closes)| closes.len() == series.len())
            .map(|(date, closes)| TradingDay::new(date, closes))
            .collect();
        if days.len() < total {
            debug!(
                "Dropped {} of {} dates not priced for every symbol",
                total - days.len(),
                total
            );
        }

        PriceHistory { days }
    }

    pub fn days(&self) -> &[TradingDay] {
        &self.days
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn last(&self) -> Option<&TradingDay> {
        self.days.last()
    }

    /// Most recent trading day at or before `date`, if any.
    ///
    /// This is the lookup behind the 30-calendar-day drawdown signal: the
    /// offset usually lands on a non-trading day, and the policy falls back
    /// to the nearest prior close.
    pub fn at_or_before(&self, date: NaiveDate) -> Option<&TradingDay> {
        match self.days.binary_search_by(|day| day.date.cmp(&date)) {
            Ok(index) => Some(&self.days[index]),
            Err(0) => None,
            Err(index) => Some(&self.days[index - 1]),
        }
    }
}
