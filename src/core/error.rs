use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised by the simulation core.
///
/// All of these are unrecoverable for the run in progress: the engine fails
/// fast instead of producing a silently wrong value series. The CLI layer
/// wraps them with `anyhow` context before surfacing them.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("no closing price for {symbol} on {date}")]
    MissingPrice { symbol: String, date: NaiveDate },

    #[error("non-positive price {price} for {symbol}")]
    NonPositivePrice { symbol: String, price: f64 },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}
