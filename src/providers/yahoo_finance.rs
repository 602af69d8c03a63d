use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::history::{ClosePoint, HistoryProvider};

// YahooHistoryProvider implementation for HistoryProvider
pub struct YahooHistoryProvider {
    base_url: String,
}

impl YahooHistoryProvider {
    pub fn new(base_url: &str) -> Self {
        YahooHistoryProvider {
            base_url: base_url.to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Vec<ChartItem>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug)]
struct Quote {
    close: Option<Vec<Option<f64>>>,
}

fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

#[async_trait]
impl HistoryProvider for YahooHistoryProvider {
    #[instrument(
        name = "YahooHistoryFetch",
        skip(self),
        fields(symbol = %symbol)
    )]
    async fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ClosePoint>> {
        // period2 is exclusive on the Yahoo side, so push it one day past
        // the inclusive end of the window.
        let period1 = unix_midnight(start);
        let period2 = unix_midnight(end + chrono::Days::new(1));
        let url = format!(
            "{}/v8/finance/chart/{}?interval=1d&period1={}&period2={}",
            self.base_url, symbol, period1, period2
        );
        debug!("Requesting close history from {}", url);

        let client = reqwest::Client::builder().user_agent("foliosim/0.2").build()?;
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {} URL: {}", e, symbol, url))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for symbol: {}",
                response.status(),
                symbol
            ));
        }

        let text = response.text().await?;
        let data: YahooChartResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", symbol, e))?;
        let item = data
            .chart
            .result
            .first()
            .ok_or_else(|| anyhow!("No chart data found for symbol: {}", symbol))?;

        let timestamps = item
            .timestamp
            .as_ref()
            .ok_or_else(|| anyhow!("No timestamps in chart data for symbol: {}", symbol))?;
        let closes = item
            .indicators
            .as_ref()
            .and_then(|inds| inds.quote.first())
            .and_then(|q| q.close.as_ref())
            .ok_or_else(|| anyhow!("No close series in chart data for symbol: {}", symbol))?;

        let mut points = Vec::with_capacity(timestamps.len());
        for (ts, close) in timestamps.iter().zip(closes) {
            // Null closes appear on half-sessions and data outages.
            let Some(close) = close else { continue };
            if *close <= 0.0 {
                continue;
            }
            let Some(when) = Utc.timestamp_opt(*ts, 0).single() else {
                continue;
            };
            let date = when.date_naive();
            if date < start || date > end {
                continue;
            }
            points.push(ClosePoint {
                date,
                close: *close,
            });
        }
        points.sort_by_key(|point| point.date);
        points.dedup_by_key(|point| point.date);

        debug!("Received {} daily closes for {}", points.len(), symbol);
        Ok(points)
    }
}
