//! Performance analytics and reporting.

use crate::engine::{PortfolioResult, SimulationReport};
use crate::viz::{allocation_chart, policy_sparklines, sparkline};
use chrono::NaiveDate;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Summary statistics of one value series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_value: f64,
    pub end_value: f64,
    pub total_return_pct: f64,
    /// Compound annual growth rate; 0 when the period is shorter than a day.
    pub cagr_pct: f64,
    /// Largest peak-to-trough decline, as a positive percentage.
    pub max_drawdown_pct: f64,
    pub volatility_annual_pct: f64,
    /// Annualized Sharpe ratio with a zero risk-free rate.
    pub sharpe_ratio: f64,
}

impl PerformanceSummary {
    /// Summarize a date-indexed value series. `None` when empty, when the
    /// lengths differ, or when the first value is not positive.
    pub fn from_series(dates: &[NaiveDate], values: &[f64]) -> Option<Self> {
        if values.is_empty() || dates.len() != values.len() {
            return None;
        }
        let start_value = values[0];
        let end_value = values[values.len() - 1];
        if start_value <= 0.0 {
            return None;
        }

        let total_return = end_value / start_value - 1.0;
        let days = (dates[dates.len() - 1] - dates[0]).num_days() as f64;
        let years = days / 365.25;
        let cagr = if years > 0.0 && end_value > 0.0 {
            (end_value / start_value).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let returns = daily_returns(values);
        let volatility = std_dev(&returns) * TRADING_DAYS_PER_YEAR.sqrt();
        let sharpe = if volatility > 0.0 {
            mean(&returns) * TRADING_DAYS_PER_YEAR / volatility
        } else {
            0.0
        };

        Some(Self {
            start_date: dates[0],
            end_date: dates[dates.len() - 1],
            start_value,
            end_value,
            total_return_pct: total_return * 100.0,
            cagr_pct: cagr * 100.0,
            max_drawdown_pct: max_drawdown(values) * 100.0,
            volatility_annual_pct: volatility * 100.0,
            sharpe_ratio: sharpe,
        })
    }
}

/// Simple daily returns of a value series.
pub fn daily_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Largest peak-to-trough decline as a fraction (0.25 = 25%).
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &v in values {
        peak = peak.max(v);
        if peak > 0.0 {
            worst = worst.max((peak - v) / peak);
        }
    }
    worst
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Rebalanced vs buy-and-hold (vs benchmark) for one portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyComparison {
    pub portfolio: String,
    pub rebalanced: PerformanceSummary,
    pub buy_and_hold: PerformanceSummary,
    pub benchmark: Option<PerformanceSummary>,
    pub benchmark_name: Option<String>,
    pub rebalance_events: usize,
    /// Final rebalanced value relative to final buy-and-hold value, in percent.
    pub rebalance_premium_pct: f64,
    pub fallback_count: usize,
}

impl PolicyComparison {
    pub fn from_result(result: &PortfolioResult) -> Option<Self> {
        let rebalanced = PerformanceSummary::from_series(&result.dates, &result.rebalanced.totals)?;
        let buy_and_hold =
            PerformanceSummary::from_series(&result.dates, &result.buy_and_hold.totals)?;
        let benchmark = result
            .benchmark
            .as_ref()
            .and_then(|b| PerformanceSummary::from_series(&result.dates, &b.values));

        let rebalance_premium_pct = if buy_and_hold.end_value > 0.0 {
            (rebalanced.end_value / buy_and_hold.end_value - 1.0) * 100.0
        } else {
            0.0
        };

        Some(Self {
            portfolio: result.name.clone(),
            rebalance_events: result.rebalanced.rebalances.len(),
            fallback_count: result.rebalanced.fallbacks().fallbacks(),
            benchmark_name: result.benchmark.as_ref().map(|b| b.instrument.id.clone()),
            rebalanced,
            buy_and_hold,
            benchmark,
            rebalance_premium_pct,
        })
    }
}

/// Terminal and JSON formatting of simulation results.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print a detailed report for one portfolio.
    pub fn print_report(result: &PortfolioResult) {
        let Some(cmp) = PolicyComparison::from_result(result) else {
            println!("{}: no data", result.name);
            return;
        };

        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", format!("  {}", result.name).bold());
        println!("{}", "═".repeat(60).blue());
        println!(
            "  Period:          {} to {}",
            cmp.rebalanced.start_date, cmp.rebalanced.end_date
        );
        println!("  Trading Days:    {}", result.dates.len());
        println!("  Rebalances:      {}", cmp.rebalance_events);
        let (reb_spark, bh_spark) = policy_sparklines(result, 40);
        println!("  Rebalanced:      {}", reb_spark);
        println!("  Buy and Hold:    {}", bh_spark);
        println!();

        Self::print_summary("Rebalanced", &cmp.rebalanced, &result.rebalanced.totals);
        Self::print_summary("Buy and Hold", &cmp.buy_and_hold, &result.buy_and_hold.totals);
        if let (Some(summary), Some(bench)) = (&cmp.benchmark, &result.benchmark) {
            Self::print_summary(
                &format!("Benchmark {}", bench.instrument.id),
                summary,
                &bench.values,
            );
        }

        println!(
            "  Rebalance premium: {}",
            Self::format_pct_change(cmp.rebalance_premium_pct)
        );

        println!();
        println!("{}", "Holdings (rebalanced, final)".bold().underline());
        let last = result.dates.len().saturating_sub(1);
        let weights = result.rebalanced.weights_at(last).unwrap_or_default();
        for (i, series) in result.rebalanced.instruments.iter().enumerate() {
            println!(
                "  {:<40} ${:>12.2}  {:>6.2}%  {}",
                truncate(&series.instrument.name, 40),
                series.values.get(last).copied().unwrap_or_default(),
                weights.get(i).copied().unwrap_or_default() * 100.0,
                if series.fallbacks.fallbacks() > 0 {
                    format!("({} fallbacks)", series.fallbacks.fallbacks())
                        .yellow()
                        .to_string()
                } else {
                    String::new()
                }
            );
        }

        // Inception weights are the targets.
        if let Some(targets) = result.buy_and_hold.weights_at(0) {
            println!();
            println!("{}", "Drift (buy and hold, final)".bold().underline());
            print!("{}", allocation_chart(&result.buy_and_hold, &targets, last, 30));
        }
        println!("{}", "═".repeat(60).blue());
    }

    fn print_summary(label: &str, summary: &PerformanceSummary, values: &[f64]) {
        println!("{}", label.bold().underline());
        println!(
            "  Final Value:     ${:>12.2}  {}",
            summary.end_value,
            Self::format_pct_change(summary.total_return_pct)
        );
        println!("  CAGR:            {:>12.2}%", summary.cagr_pct);
        println!("  Max Drawdown:    {:>12.2}%", -summary.max_drawdown_pct);
        println!("  Volatility:      {:>12.2}%", summary.volatility_annual_pct);
        println!("  Sharpe Ratio:    {:>12.2}", summary.sharpe_ratio);
        println!("  Trend:           {}", sparkline(values, 40));
        println!();
    }

    fn format_pct_change(pct: f64) -> String {
        let text = format!("{:+.2}%", pct);
        if pct >= 0.0 {
            text.green().to_string()
        } else {
            text.red().to_string()
        }
    }

    /// Print all portfolios of a batch as one table, failures underneath.
    pub fn print_table(report: &SimulationReport) {
        let mut builder = Builder::new();
        builder.push_record([
            "Portfolio",
            "Rebalanced",
            "Buy & Hold",
            "Premium %",
            "CAGR % (reb)",
            "Max DD % (reb)",
            "Benchmark",
            "Fallbacks",
        ]);

        for result in report.successes() {
            let Some(cmp) = PolicyComparison::from_result(result) else {
                continue;
            };
            builder.push_record([
                cmp.portfolio.clone(),
                format!("{:.2}", cmp.rebalanced.end_value),
                format!("{:.2}", cmp.buy_and_hold.end_value),
                format!("{:+.2}", cmp.rebalance_premium_pct),
                format!("{:.2}", cmp.rebalanced.cagr_pct),
                format!("{:.2}", -cmp.rebalanced.max_drawdown_pct),
                match (&cmp.benchmark_name, &cmp.benchmark) {
                    (Some(name), Some(b)) => format!("{} {:.2}", name, b.end_value),
                    _ => "-".to_string(),
                },
                cmp.fallback_count.to_string(),
            ]);
        }

        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);

        for (name, err) in report.failures() {
            println!("{} {}: {}", "FAILED".red().bold(), name, err);
        }
    }

    /// JSON summary of a batch: comparisons for successes, messages for failures.
    pub fn to_json(report: &SimulationReport) -> serde_json::Value {
        let successes: Vec<PolicyComparison> = report
            .successes()
            .filter_map(PolicyComparison::from_result)
            .collect();
        let failures: Vec<serde_json::Value> = report
            .failures()
            .map(|(name, err)| serde_json::json!({ "portfolio": name, "error": err.to_string() }))
            .collect();

        serde_json::json!({
            "reference": report.reference,
            "start_date": report.dates.first(),
            "end_date": report.dates.last(),
            "rebalance_dates": report.schedule.dates(),
            "portfolios": successes,
            "failures": failures,
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
