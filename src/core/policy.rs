//! Conditional contribution and rebalancing rules.
//!
//! Each rule takes the current ledger and today's prices, decides whether
//! its trigger condition holds, and applies the trade. The driver calls
//! them in a fixed order; see [`crate::core::engine`].

use chrono::{Datelike, Days};
use tracing::debug;

use crate::core::config::Plan;
use crate::core::error::SimError;
use crate::core::history::{PriceHistory, TradingDay};
use crate::core::ledger::Ledger;

/// Single-day loss beyond which the dip contribution fires.
const DIP_THRESHOLD: f64 = -0.01;
/// Trailing loss beyond which the drawdown contribution fires.
const DRAWDOWN_THRESHOLD: f64 = -0.05;
/// Calendar-day (not trading-day) offset for the trailing drawdown signal.
const DRAWDOWN_LOOKBACK_DAYS: u64 = 30;
/// Day of month on which the dip contribution and the annual rebalance run.
const CONTRIBUTION_DAY: u32 = 15;
/// Day of month on which the drawdown check runs and the monthly flag resets.
const MONTH_START_DAY: u32 = 1;

/// Applies the dip-buy rule for `today`.
///
/// Fires on day 15, at most once per calendar month (`invested_this_month`
/// is shared with the drawdown rule, which resets it on day 1), when the
/// primary asset closed more than 1% below the previous trading day.
/// Returns whether the contribution was made.
pub fn apply_dip_buy(
    plan: &Plan,
    ledger: &mut Ledger,
    invested_this_month: &mut bool,
    today: &TradingDay,
    previous: Option<&TradingDay>,
) -> Result<bool, SimError> {
    if today.date.day() != CONTRIBUTION_DAY || *invested_this_month {
        return Ok(false);
    }
    // The first row of the feed has no prior close to compare against.
    let Some(previous) = previous else {
        return Ok(false);
    };

    let primary = plan.primary();
    let close = today.close(primary)?;
    let prev_close = previous.close(primary)?;
    if !(prev_close.is_finite() && prev_close > 0.0) {
        return Err(SimError::NonPositivePrice {
            symbol: primary.to_string(),
            price: prev_close,
        });
    }

    let day_return = close / prev_close - 1.0;
    if day_return < DIP_THRESHOLD {
        ledger.buy(primary, plan.monthly_investment, close)?;
        *invested_this_month = true;
        debug!(
            date = %today.date,
            "Dip of {:.2}% triggered contribution of {} into {primary}",
            day_return * 100.0,
            plan.monthly_investment
        );
        return Ok(true);
    }
    Ok(false)
}

/// Applies the monthly drawdown rule for `today`.
///
/// Runs on day 1, which is also where the dip-buy monthly flag resets. The
/// trailing return compares today's close of the primary asset against the
/// close 30 calendar days back. That offset usually lands on a non-trading
/// day, so the lookup falls back to the nearest prior trading day; when no
/// prior day exists the check is skipped for the month. The monthly flag
/// does not gate this rule.
pub fn apply_drawdown_buy(
    plan: &Plan,
    ledger: &mut Ledger,
    invested_this_month: &mut bool,
    history: &PriceHistory,
    today: &TradingDay,
) -> Result<bool, SimError> {
    if today.date.day() != MONTH_START_DAY {
        return Ok(false);
    }
    *invested_this_month = false;

    let target = today.date - Days::new(DRAWDOWN_LOOKBACK_DAYS);
    let Some(reference) = history.at_or_before(target) else {
        debug!(
            date = %today.date,
            "No trading day at or before {target}, skipping drawdown check"
        );
        return Ok(false);
    };

    let primary = plan.primary();
    let close = today.close(primary)?;
    let ref_close = reference.close(primary)?;
    if !(ref_close.is_finite() && ref_close > 0.0) {
        return Err(SimError::NonPositivePrice {
            symbol: primary.to_string(),
            price: ref_close,
        });
    }

    let trailing_return = close / ref_close - 1.0;
    if trailing_return < DRAWDOWN_THRESHOLD {
        ledger.buy(primary, plan.additional_investment, close)?;
        debug!(
            date = %today.date,
            "Trailing drawdown of {:.2}% since {} triggered contribution of {} into {primary}",
            trailing_return * 100.0,
            reference.date,
            plan.additional_investment
        );
        return Ok(true);
    }
    Ok(false)
}

/// Rebalances every position to its target weight of total value.
///
/// Runs on day 15 of the configured rebalance month. All deltas are taken
/// against the same valuation snapshot, so the per-asset order cannot
/// change the outcome. Sells are not quantity-capped; a large enough delta
/// leaves a short position.
pub fn apply_rebalance(
    plan: &Plan,
    ledger: &mut Ledger,
    today: &TradingDay,
) -> Result<bool, SimError> {
    if today.date.day() != CONTRIBUTION_DAY || today.date.month() != plan.rebalance_month {
        return Ok(false);
    }

    let total = ledger.valuation(today)?;
    for (symbol, weight) in &plan.target_weights {
        let close = today.close(symbol)?;
        let delta = total * weight - ledger.position(symbol) * close;
        if delta > 0.0 {
            ledger.buy(symbol, delta, close)?;
        } else {
            ledger.sell(symbol, -delta, close)?;
        }
    }
    debug!(date = %today.date, "Rebalanced to target weights, total value {total:.2}");
    Ok(true)
}
