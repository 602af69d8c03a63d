use super::ui;
use crate::core::config::AppConfig;
use crate::core::engine::{self, SimulationOutcome, ValuePoint};
use crate::core::history::{ClosePoint, HistoryProvider, PriceHistory};
use anyhow::{Context, Result, bail};
use comfy_table::Cell;
use futures::future::join_all;
use rust_decimal::{Decimal, prelude::*};
use rust_finprim::rate::cagr;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Backtests the configured plan: fetches the close history for every
/// universe symbol, runs the simulation, prints the result tables, and
/// optionally writes the daily value series as CSV.
pub async fn run(
    config: &AppConfig,
    provider: &(dyn HistoryProvider + Send + Sync),
    output: Option<&Path>,
) -> Result<()> {
    config.plan.validate()?;
    if config.start_date > config.end_date {
        bail!(
            "start_date {} is after end_date {}",
            config.start_date,
            config.end_date
        );
    }

    let symbols: Vec<String> = config.plan.symbols().map(str::to_string).collect();
    info!("Fetching close history for {} symbols", symbols.len());

    let pb = ui::new_progress_bar(symbols.len() as u64, true);
    pb.set_message("Fetching close history...");

    let history_futures = symbols.iter().map(|symbol| {
        let pb_clone = pb.clone();
        async move {
            let result = provider
                .fetch_history(symbol, config.start_date, config.end_date)
                .await;
            pb_clone.inc(1);
            (symbol.clone(), result)
        }
    });
    let fetched: Vec<(String, Result<Vec<ClosePoint>>)> = join_all(history_futures).await;
    pb.finish_and_clear();

    let mut series: BTreeMap<String, Vec<ClosePoint>> = BTreeMap::new();
    for (symbol, result) in fetched {
        let points =
            result.with_context(|| format!("Failed to fetch close history for {symbol}"))?;
        if points.is_empty() {
            bail!("No close history returned for {symbol} in the configured window");
        }
        debug!("{symbol}: {} daily closes", points.len());
        series.insert(symbol, points);
    }

    let history = PriceHistory::from_series(&series);
    info!("Simulating {} trading days", history.len());

    let outcome = engine::run(&config.plan, &history).context("Simulation failed")?;

    if outcome.series.is_empty() {
        println!(
            "{}",
            ui::style_text(
                "No trading days priced for every symbol in the configured window.",
                ui::StyleType::Error
            )
        );
        return Ok(());
    }

    if let Some(path) = output {
        write_series_csv(path, &outcome.series)
            .with_context(|| format!("Failed to write value series to {}", path.display()))?;
        info!("Wrote value series to {}", path.display());
    }

    println!("{}", render_summary(config, &outcome));
    ui::print_separator();
    println!("{}", render_positions(config, &outcome, &history));

    Ok(())
}

/// Serializes the daily value series as `date,value` rows for external
/// charting.
fn write_series_csv(path: &Path, series: &[ValuePoint]) -> Result<()> {
    let mut out = String::from("date,value\n");
    for point in series {
        out.push_str(&format!("{},{:.2}\n", point.date, point.value));
    }
    std::fs::write(path, out)?;
    Ok(())
}

fn render_summary(config: &AppConfig, outcome: &SimulationOutcome) -> String {
    let first = &outcome.series[0];
    let last = &outcome.series[outcome.series.len() - 1];
    let final_value = last.value;

    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Metric"), ui::header_cell("Value")]);
    table.add_row(vec![
        Cell::new("Period"),
        Cell::new(format!("{} to {}", first.date, last.date)),
    ]);
    table.add_row(vec![
        Cell::new("Trading days"),
        Cell::new(outcome.series.len().to_string()),
    ]);
    table.add_row(vec![Cell::new("Initial cash"), ui::amount_cell(config.plan.initial_cash)]);
    table.add_row(vec![
        Cell::new("Contributions"),
        ui::amount_cell(outcome.contributed),
    ]);
    table.add_row(vec![
        Cell::new("Dip buys"),
        Cell::new(outcome.dip_buys.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Drawdown buys"),
        Cell::new(outcome.drawdown_buys.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("Rebalances"),
        Cell::new(outcome.rebalances.to_string()),
    ]);
    table.add_row(vec![Cell::new("Final cash"), ui::amount_cell(outcome.ledger.cash())]);

    // Contributions are funded from ledger cash, so initial cash is the
    // full capital base of the run.
    let total_return = (final_value / config.plan.initial_cash - 1.0) * 100.0;
    table.add_row(vec![Cell::new("Total return"), ui::change_cell(total_return)]);

    let years = (last.date - first.date).num_days() as f64 / 365.0;
    if let Some(rate) = plan_cagr(config.plan.initial_cash, final_value, years) {
        table.add_row(vec![Cell::new("CAGR"), ui::change_cell(rate)]);
    }

    let mut output = format!(
        "{}\n\n",
        ui::style_text("Backtest summary", ui::StyleType::Title)
    );
    output.push_str(&table.to_string());
    output.push_str(&format!(
        "\n\nFinal Value: {}",
        ui::style_text(&format!("{final_value:.2}"), ui::StyleType::TotalValue)
    ));
    output
}

fn render_positions(
    config: &AppConfig,
    outcome: &SimulationOutcome,
    history: &PriceHistory,
) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Units"),
        ui::header_cell("Close"),
        ui::header_cell("Value"),
        ui::header_cell("Weight (%)"),
        ui::header_cell("Target (%)"),
    ]);

    let final_value = outcome.final_value().unwrap_or(0.0);
    if let Some(last_day) = history.last() {
        for (symbol, weight) in &config.plan.target_weights {
            let units = outcome.ledger.position(symbol);
            let close = last_day.close(symbol).ok();
            let value = close.map(|c| units * c);
            let weight_pct = value
                .filter(|_| final_value != 0.0)
                .map(|v| v / final_value * 100.0);

            table.add_row(vec![
                Cell::new(symbol),
                ui::amount_cell(units),
                close.map_or(Cell::new("N/A"), ui::amount_cell),
                value.map_or(Cell::new("N/A"), ui::amount_cell),
                weight_pct.map_or(Cell::new("N/A"), |w| Cell::new(format!("{w:.2}"))),
                Cell::new(format!("{:.2}", weight * 100.0)),
            ]);
        }
    }

    format!(
        "Final positions at {}\n\n{}",
        history
            .last()
            .map_or("end of run".to_string(), |d| d.date.to_string()),
        table
    )
}

/// Compound annual growth rate from initial cash to final value, in percent.
fn plan_cagr(initial: f64, final_value: f64, years: f64) -> Option<f64> {
    if initial <= 0.0 || final_value <= 0.0 || years <= 0.0 {
        return None;
    }
    let begin_bal = Decimal::from_f64(initial)?;
    let end_bal = Decimal::from_f64(final_value)?;
    let n_years = Decimal::from_f64(years)?;
    if n_years.is_zero() {
        return None;
    }

    let rate = cagr(begin_bal, end_bal, n_years);
    (rate * Decimal::from(100)).to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::run as run_simulation;
    use crate::core::config::{Plan, ProvidersConfig};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_config() -> AppConfig {
        AppConfig {
            plan: Plan {
                initial_cash: 10_000.0,
                monthly_investment: 1_000.0,
                additional_investment: 2_000.0,
                rebalance_month: 8,
                target_weights: BTreeMap::from([("VOO".to_string(), 1.0)]),
                primary_asset: None,
            },
            start_date: date(2024, 1, 1),
            end_date: date(2024, 12, 31),
            providers: ProvidersConfig::default(),
        }
    }

    fn sample_outcome(config: &AppConfig) -> (SimulationOutcome, PriceHistory) {
        let series = BTreeMap::from([(
            "VOO".to_string(),
            vec![
                ClosePoint {
                    date: date(2024, 3, 14),
                    close: 100.0,
                },
                ClosePoint {
                    date: date(2024, 3, 15),
                    close: 98.0,
                },
                ClosePoint {
                    date: date(2024, 6, 14),
                    close: 105.0,
                },
            ],
        )]);
        let history = PriceHistory::from_series(&series);
        let outcome = run_simulation(&config.plan, &history).unwrap();
        (outcome, history)
    }

    #[test]
    fn test_write_series_csv() {
        let config = sample_config();
        let (outcome, _) = sample_outcome(&config);

        let file = tempfile::NamedTempFile::new().unwrap();
        write_series_csv(file.path(), &outcome.series).unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "date,value");
        assert_eq!(lines[1], "2024-03-14,10000.00");
        // Day-15 valuation is still pre-contribution.
        assert_eq!(lines[2], "2024-03-15,10000.00");
    }

    #[test]
    fn test_render_summary_reports_contributions() {
        let config = sample_config();
        let (outcome, _) = sample_outcome(&config);

        assert_eq!(outcome.dip_buys, 1);
        let rendered = render_summary(&config, &outcome);
        assert!(rendered.contains("Trading days"));
        assert!(rendered.contains("1000.00"));
        assert!(rendered.contains("Final Value"));
    }

    #[test]
    fn test_render_positions_lists_universe() {
        let config = sample_config();
        let (outcome, history) = sample_outcome(&config);

        let rendered = render_positions(&config, &outcome, &history);
        assert!(rendered.contains("VOO"));
        assert!(rendered.contains("100.00")); // target weight column
    }

    #[test]
    fn test_plan_cagr_doubling_in_one_year() {
        let rate = plan_cagr(1_000.0, 2_000.0, 1.0).unwrap();
        assert!((rate - 100.0).abs() < 0.5);
    }

    #[test]
    fn test_plan_cagr_rejects_degenerate_inputs() {
        assert!(plan_cagr(0.0, 1_000.0, 1.0).is_none());
        assert!(plan_cagr(1_000.0, 1_000.0, 0.0).is_none());
        assert!(plan_cagr(1_000.0, -5.0, 1.0).is_none());
    }
}
