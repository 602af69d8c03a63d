//! The mutable record of cash and share holdings for one simulated run.

use std::collections::BTreeMap;

use crate::core::error::SimError;
use crate::core::history::TradingDay;

/// Cash balance plus fractional share counts per symbol.
///
/// The source policy carries no risk constraints: cash may go negative and
/// rebalancing sells are never quantity-capped, so positions can go short.
/// The ledger is owned exclusively by the simulation driver and mutated only
/// through [`Ledger::buy`] and [`Ledger::sell`].
#[derive(Debug, Clone)]
pub struct Ledger {
    cash: f64,
    positions: BTreeMap<String, f64>,
}

impl Ledger {
    pub fn new(initial_cash: f64) -> Self {
        Ledger {
            cash: initial_cash,
            positions: BTreeMap::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Share count held for `symbol`; zero when never traded.
    pub fn position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).copied().unwrap_or(0.0)
    }

    /// Traded symbols with their share counts, in deterministic order.
    pub fn positions(&self) -> impl Iterator<Item = (&str, f64)> {
        self.positions.iter().map(|(s, units)| (s.as_str(), *units))
    }

    /// Marks the portfolio to market: cash plus every position at the day's
    /// close. No side effects.
    pub fn valuation(&self, day: &TradingDay) -> Result<f64, SimError> {
        let mut total = self.cash;
        for (symbol, units) in &self.positions {
            total += units * day.close(symbol)?;
        }
        Ok(total)
    }

    /// Converts `amount` of cash into shares of `symbol` at `price`.
    pub fn buy(&mut self, symbol: &str, amount: f64, price: f64) -> Result<(), SimError> {
        let units = amount / checked_price(symbol, price)?;
        *self.positions.entry(symbol.to_string()).or_insert(0.0) += units;
        self.cash -= amount;
        Ok(())
    }

    /// Converts shares of `symbol` worth `amount` back into cash at `price`.
    pub fn sell(&mut self, symbol: &str, amount: f64, price: f64) -> Result<(), SimError> {
        let units = amount / checked_price(symbol, price)?;
        *self.positions.entry(symbol.to_string()).or_insert(0.0) -= units;
        self.cash += amount;
        Ok(())
    }
}

/// A zero, negative, or non-finite price would turn a trade into an
/// infinite or NaN share count.
fn checked_price(symbol: &str, price: f64) -> Result<f64, SimError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(SimError::NonPositivePrice {
            symbol: symbol.to_string(),
            price,
        })
    }
}
