//! Day-by-day simulation of a contribution and rebalancing plan.

use chrono::NaiveDate;
use tracing::debug;

use crate::core::config::Plan;
use crate::core::error::SimError;
use crate::core::history::PriceHistory;
use crate::core::ledger::Ledger;
use crate::core::policy;

/// Portfolio value at one trading day's close, recorded before that day's
/// triggers fire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Everything one run produces: the daily value series, the final ledger,
/// and counters for the triggers that fired.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub series: Vec<ValuePoint>,
    pub ledger: Ledger,
    pub dip_buys: u32,
    pub drawdown_buys: u32,
    pub rebalances: u32,
    /// Cash converted into the primary asset by contribution triggers.
    /// Funded from the ledger's own cash balance, which may go negative.
    pub contributed: f64,
}

impl SimulationOutcome {
    pub fn final_value(&self) -> Option<f64> {
        self.series.last().map(|point| point.value)
    }
}

/// Runs the plan over the full price history.
///
/// Each trading day is processed strictly in order: mark to market, dip-buy
/// check, drawdown check (which also resets the monthly flag), rebalance
/// check. Ledger state and the monthly flag carry forward between days, so
/// no day can be computed before all prior days have been applied. An empty
/// history yields an empty series, not an error.
pub fn run(plan: &Plan, history: &PriceHistory) -> Result<SimulationOutcome, SimError> {
    plan.validate()?;

    let mut ledger = Ledger::new(plan.initial_cash);
    let mut invested_this_month = false;
    let mut series = Vec::with_capacity(history.len());
    let mut dip_buys = 0u32;
    let mut drawdown_buys = 0u32;
    let mut rebalances = 0u32;
    let mut contributed = 0.0;

    for (index, today) in history.days().iter().enumerate() {
        let value = ledger.valuation(today)?;
        series.push(ValuePoint {
            date: today.date,
            value,
        });

        let previous = index.checked_sub(1).map(|i| &history.days()[i]);
        if policy::apply_dip_buy(plan, &mut ledger, &mut invested_this_month, today, previous)? {
            dip_buys += 1;
            contributed += plan.monthly_investment;
        }
        if policy::apply_drawdown_buy(
            plan,
            &mut ledger,
            &mut invested_this_month,
            history,
            today,
        )? {
            drawdown_buys += 1;
            contributed += plan.additional_investment;
        }
        if policy::apply_rebalance(plan, &mut ledger, today)? {
            rebalances += 1;
        }
    }

    debug!(
        days = series.len(),
        dip_buys, drawdown_buys, rebalances, "Simulation finished"
    );

    Ok(SimulationOutcome {
        series,
        ledger,
        dip_buys,
        drawdown_buys,
        rebalances,
        contributed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::ClosePoint;
    use std::collections::BTreeMap;

    const EPS: f64 = 1e-9;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn single_asset_history(symbol: &str, points: &[(i32, u32, u32, f64)]) -> PriceHistory {
        let series = BTreeMap::from([(
            symbol.to_string(),
            points
                .iter()
                .map(|(y, m, d, close)| ClosePoint {
                    date: date(*y, *m, *d),
                    close: *close,
                })
                .collect(),
        )]);
        PriceHistory::from_series(&series)
    }

    fn single_asset_plan(symbol: &str) -> Plan {
        Plan {
            initial_cash: 10_000.0,
            monthly_investment: 1_000.0,
            additional_investment: 2_000.0,
            rebalance_month: 8,
            target_weights: BTreeMap::from([(symbol.to_string(), 1.0)]),
            primary_asset: None,
        }
    }

    #[test]
    fn test_empty_history_yields_empty_series() {
        let plan = single_asset_plan("VOO");
        let outcome = run(&plan, &PriceHistory::default()).unwrap();
        assert!(outcome.series.is_empty());
        assert_eq!(outcome.ledger.cash(), plan.initial_cash);
        assert_eq!(outcome.dip_buys, 0);
    }

    #[test]
    fn test_invalid_plan_is_rejected_before_running() {
        let mut plan = single_asset_plan("VOO");
        plan.rebalance_month = 0;
        let err = run(&plan, &PriceHistory::default()).unwrap_err();
        assert!(matches!(err, SimError::InvalidPlan(_)));
    }

    #[test]
    fn test_scenario_dip_buy() {
        // Day 15 follows a -2% close; the month's only dip buy happens there.
        let plan = single_asset_plan("VOO");
        let history = single_asset_history(
            "VOO",
            &[
                (2024, 3, 13, 100.0),
                (2024, 3, 14, 100.0),
                (2024, 3, 15, 98.0),
                (2024, 3, 18, 97.0),
                (2024, 3, 19, 95.0),
            ],
        );

        let outcome = run(&plan, &history).unwrap();

        assert_eq!(outcome.dip_buys, 1);
        assert_eq!(outcome.drawdown_buys, 0);
        assert!((outcome.ledger.cash() - 9_000.0).abs() < EPS);
        assert!((outcome.ledger.position("VOO") - 1_000.0 / 98.0).abs() < EPS);

        // Valuation is recorded before the day's trigger: on Mar 15 the
        // series still shows plain cash.
        assert_eq!(outcome.series[2].date, date(2024, 3, 15));
        assert!((outcome.series[2].value - 10_000.0).abs() < EPS);
        // The next day reflects the purchase marked at the new close.
        let expected = 9_000.0 + (1_000.0 / 98.0) * 97.0;
        assert!((outcome.series[3].value - expected).abs() < EPS);
    }

    #[test]
    fn test_scenario_drawdown_buy() {
        // Day 1 closes 6% below the close 30 calendar days earlier.
        let plan = single_asset_plan("VOO");
        let history = single_asset_history(
            "VOO",
            &[
                (2024, 3, 2, 100.0), // exactly 30 days before Apr 1
                (2024, 3, 15, 99.0),
                (2024, 4, 1, 94.0),
            ],
        );

        let outcome = run(&plan, &history).unwrap();

        assert_eq!(outcome.drawdown_buys, 1);
        assert!((outcome.ledger.cash() - 8_000.0).abs() < EPS);
        assert!((outcome.ledger.position("VOO") - 2_000.0 / 94.0).abs() < EPS);
    }

    #[test]
    fn test_scenario_rebalance() {
        // Two assets drifted to 0.7/0.3 of invested value; Aug 15 restores
        // the configured 0.5/0.5 split of the pre-rebalance total.
        let plan = Plan {
            initial_cash: 10_000.0,
            monthly_investment: 0.0,
            additional_investment: 0.0,
            rebalance_month: 8,
            target_weights: BTreeMap::from([
                ("AAA".to_string(), 0.5),
                ("BBB".to_string(), 0.5),
            ]),
            primary_asset: None,
        };

        let mut series = BTreeMap::new();
        series.insert(
            "AAA".to_string(),
            vec![
                ClosePoint {
                    date: date(2024, 8, 14),
                    close: 100.0,
                },
                ClosePoint {
                    date: date(2024, 8, 15),
                    close: 140.0,
                },
                ClosePoint {
                    date: date(2024, 8, 16),
                    close: 140.0,
                },
            ],
        );
        series.insert(
            "BBB".to_string(),
            vec![
                ClosePoint {
                    date: date(2024, 8, 14),
                    close: 100.0,
                },
                ClosePoint {
                    date: date(2024, 8, 15),
                    close: 100.0,
                },
                ClosePoint {
                    date: date(2024, 8, 16),
                    close: 100.0,
                },
            ],
        );
        let history = PriceHistory::from_series(&series);

        let outcome = run(&plan, &history).unwrap();
        assert_eq!(outcome.rebalances, 1);

        // After the event both positions carry equal value at Aug 15 closes,
        // and the day-after valuation reflects the new holdings.
        let aaa_value = outcome.ledger.position("AAA") * 140.0;
        let bbb_value = outcome.ledger.position("BBB") * 100.0;
        assert!((aaa_value - bbb_value).abs() < 1e-6);
        assert!((aaa_value + bbb_value - 10_000.0).abs() < 1e-6);
        assert!((outcome.series[2].value - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_dip_buy_fires_at_most_once_per_month() {
        // Two eligible day-15 dips in consecutive months both fire; the
        // flag blocks nothing across months because day 1 resets it.
        let plan = single_asset_plan("VOO");
        let history = single_asset_history(
            "VOO",
            &[
                (2024, 3, 14, 100.0),
                (2024, 3, 15, 98.0),
                (2024, 4, 1, 98.0),
                (2024, 4, 12, 100.0),
                (2024, 4, 15, 97.0),
            ],
        );

        let outcome = run(&plan, &history).unwrap();
        assert_eq!(outcome.dip_buys, 2);
        assert!((outcome.ledger.cash() - 8_000.0).abs() < EPS);
    }

    #[test]
    fn test_determinism() {
        let plan = single_asset_plan("VOO");
        let history = single_asset_history(
            "VOO",
            &[
                (2024, 2, 1, 100.0),
                (2024, 2, 15, 97.0),
                (2024, 3, 1, 92.0),
                (2024, 3, 15, 90.0),
                (2024, 8, 15, 95.0),
            ],
        );

        let first = run(&plan, &history).unwrap();
        let second = run(&plan, &history).unwrap();

        assert_eq!(first.series.len(), second.series.len());
        for (a, b) in first.series.iter().zip(&second.series) {
            assert_eq!(a.date, b.date);
            assert_eq!(a.value.to_bits(), b.value.to_bits());
        }
    }

    #[test]
    fn test_missing_price_fails_the_run() {
        use crate::core::history::TradingDay;

        // The rebalance on May 15 opens positions in both assets; the next
        // day is missing BBB, so its valuation must fail the whole run
        // rather than silently skip the day.
        let plan = Plan {
            initial_cash: 10_000.0,
            monthly_investment: 0.0,
            additional_investment: 0.0,
            rebalance_month: 5,
            target_weights: BTreeMap::from([
                ("AAA".to_string(), 0.5),
                ("BBB".to_string(), 0.5),
            ]),
            primary_asset: None,
        };
        let history = PriceHistory::new(vec![
            TradingDay::new(
                date(2024, 5, 15),
                BTreeMap::from([("AAA".to_string(), 100.0), ("BBB".to_string(), 50.0)]),
            ),
            TradingDay::new(
                date(2024, 5, 16),
                BTreeMap::from([("AAA".to_string(), 100.0)]),
            ),
        ]);

        let err = run(&plan, &history).unwrap_err();
        match err {
            SimError::MissingPrice { symbol, date: when } => {
                assert_eq!(symbol, "BBB");
                assert_eq!(when, date(2024, 5, 16));
            }
            other => panic!("expected MissingPrice, got {other}"),
        }
    }
}
