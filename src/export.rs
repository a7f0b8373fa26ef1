//! Export of simulation results.
//!
//! | Format | Content |
//! |--------|---------|
//! | CSV | Per-policy holding values, policy totals side by side |
//! | JSON | Batch report with performance summaries and failures |

use crate::analytics::ResultFormatter;
use crate::engine::{PortfolioResult, SimulationReport};
use crate::error::Result;
use crate::types::Policy;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Configuration for exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Date format for CSV exports.
    pub date_format: String,
    /// Decimal precision for dollar values.
    pub precision: usize,
    pub include_headers: bool,
    pub delimiter: char,
    /// Add a `<id>_growth_pct` column per holding to policy CSVs.
    pub include_growth: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            date_format: "%Y-%m-%d".to_string(),
            precision: 4,
            include_headers: true,
            delimiter: ',',
            include_growth: false,
        }
    }
}

/// Exporter for one portfolio's result.
pub struct Exporter<'a> {
    result: &'a PortfolioResult,
    config: ExportConfig,
}

impl<'a> Exporter<'a> {
    pub fn new(result: &'a PortfolioResult) -> Self {
        Self {
            result,
            config: ExportConfig::default(),
        }
    }

    pub fn with_config(result: &'a PortfolioResult, config: ExportConfig) -> Self {
        Self { result, config }
    }

    fn write_rows<W: Write>(
        &self,
        writer: &mut W,
        header: &[String],
        columns: &[&[f64]],
    ) -> Result<()> {
        let sep = self.config.delimiter.to_string();
        if self.config.include_headers {
            writeln!(writer, "{}", header.join(&sep))?;
        }

        let prec = self.config.precision;
        for (i, date) in self.result.dates.iter().enumerate() {
            write!(writer, "{}", date.format(&self.config.date_format))?;
            for column in columns {
                match column.get(i) {
                    Some(v) => write!(writer, "{}{:.prec$}", sep, v)?,
                    None => write!(writer, "{}", sep)?,
                }
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Holding values and total of one policy: `date,<ids...>,total`, then
    /// `<id>_growth_pct` columns when `include_growth` is set.
    pub fn export_policy_csv(&self, policy: Policy, path: impl AsRef<Path>) -> Result<()> {
        let run = self.result.policy(policy);
        let mut header = vec!["date".to_string()];
        header.extend(run.instruments.iter().map(|s| s.instrument.id.clone()));
        header.push("total".to_string());

        let growth: Vec<Vec<f64>> = if self.config.include_growth {
            header.extend(
                run.instruments
                    .iter()
                    .map(|s| format!("{}_growth_pct", s.instrument.id)),
            );
            run.instruments.iter().map(|s| s.growth_pct()).collect()
        } else {
            Vec::new()
        };

        let mut columns: Vec<&[f64]> =
            run.instruments.iter().map(|s| s.values.as_slice()).collect();
        columns.push(run.totals.as_slice());
        columns.extend(growth.iter().map(|g| g.as_slice()));

        let mut writer = BufWriter::new(File::create(path)?);
        self.write_rows(&mut writer, &header, &columns)
    }

    /// Policy totals side by side: `date,rebalanced,buy_and_hold[,benchmark]`.
    pub fn export_totals_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut header = vec![
            "date".to_string(),
            "rebalanced".to_string(),
            "buy_and_hold".to_string(),
        ];
        let mut columns: Vec<&[f64]> = vec![
            self.result.rebalanced.totals.as_slice(),
            self.result.buy_and_hold.totals.as_slice(),
        ];
        if let Some(bench) = &self.result.benchmark {
            header.push("benchmark".to_string());
            columns.push(bench.values.as_slice());
        }

        let mut writer = BufWriter::new(File::create(path)?);
        self.write_rows(&mut writer, &header, &columns)
    }

    /// Full result (every series, events and fallback counters) as JSON.
    pub fn export_result_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self.result)?;
        Ok(())
    }
}

pub fn export_policy_csv(
    result: &PortfolioResult,
    policy: Policy,
    path: impl AsRef<Path>,
) -> Result<()> {
    Exporter::new(result).export_policy_csv(policy, path)
}

pub fn export_totals_csv(result: &PortfolioResult, path: impl AsRef<Path>) -> Result<()> {
    Exporter::new(result).export_totals_csv(path)
}

/// Batch summary: comparisons for successful portfolios, messages for failures.
pub fn export_report_json(report: &SimulationReport, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &ResultFormatter::to_json(report))?;
    Ok(())
}

/// File-name friendly form of a portfolio name.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "portfolio".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write every CSV and the JSON report for a batch into `dir`.
///
/// Returns the paths written.
pub fn export_all(report: &SimulationReport, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    for result in report.successes() {
        let base = slug(&result.name);
        let exporter = Exporter::new(result);

        let path = dir.join(format!("{}_rebalanced.csv", base));
        exporter.export_policy_csv(Policy::Rebalanced, &path)?;
        written.push(path);

        let path = dir.join(format!("{}_buy_and_hold.csv", base));
        exporter.export_policy_csv(Policy::BuyAndHold, &path)?;
        written.push(path);

        let path = dir.join(format!("{}_totals.csv", base));
        exporter.export_totals_csv(&path)?;
        written.push(path);
    }

    let path = dir.join("report.json");
    export_report_json(report, &path)?;
    written.push(path);

    info!("Exported {} files to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceStore;
    use crate::engine::Simulator;
    use crate::types::{PortfolioSpec, PriceSeries};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn sample_report() -> SimulationReport {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let mut store = PriceStore::new();
        store.insert("A", PriceSeries::from_pairs(vec![(d(2), 10.0), (d(3), 20.0)]));
        store.insert("B", PriceSeries::from_pairs(vec![(d(2), 5.0), (d(3), 5.0)]));
        let specs = vec![
            PortfolioSpec::new("A & B", &["A", "B"], &[0.5, 0.5]).with_benchmark("A", None),
            PortfolioSpec::new("broken", &["A"], &[0.3]),
        ];
        Simulator::default().run(&store, &specs).unwrap()
    }

    #[test]
    fn test_policy_csv() {
        let report = sample_report();
        let result = report.get("A & B").unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bh.csv");

        export_policy_csv(result, Policy::BuyAndHold, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "date,A,B,total");
        assert_eq!(lines[2], "2024-01-03,10000.0000,5000.0000,15000.0000");
    }

    #[test]
    fn test_policy_csv_with_growth_columns() {
        let report = sample_report();
        let result = report.get("A & B").unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bh_growth.csv");

        let config = ExportConfig {
            precision: 2,
            include_growth: true,
            ..Default::default()
        };
        Exporter::with_config(result, config)
            .export_policy_csv(Policy::BuyAndHold, &path)
            .unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "date,A,B,total,A_growth_pct,B_growth_pct");
        assert_eq!(lines[1], "2024-01-02,5000.00,5000.00,10000.00,0.00,0.00");
        assert_eq!(lines[2], "2024-01-03,10000.00,5000.00,15000.00,100.00,0.00");
    }

    #[test]
    fn test_totals_csv_includes_benchmark() {
        let report = sample_report();
        let result = report.get("A & B").unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("totals.csv");

        let config = ExportConfig {
            precision: 1,
            delimiter: ';',
            ..Default::default()
        };
        Exporter::with_config(result, config).export_totals_csv(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("date;rebalanced;buy_and_hold;benchmark\n"));
        assert!(content.contains("2024-01-02;10000.0;10000.0;10000.0"));
    }

    #[test]
    fn test_export_all_and_json() {
        let report = sample_report();
        let dir = TempDir::new().unwrap();
        let written = export_all(&report, dir.path()).unwrap();
        assert_eq!(written.len(), 4);
        assert!(dir.path().join("a_b_totals.csv").exists());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(json["portfolios"].as_array().unwrap().len(), 1);
        assert_eq!(json["failures"][0]["portfolio"], "broken");
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Gold / World"), "gold_world");
        assert_eq!(slug("***"), "portfolio");
    }
}
