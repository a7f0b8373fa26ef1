//! Configuration file support for simulations.
//!
//! A single TOML file names the price directory, the global simulation
//! settings and any number of portfolios.

use crate::data::{instrument_id, load_csv, DataConfig, PriceStore};
use crate::engine::SimulationConfig;
use crate::error::{Result, SimError};
use crate::types::PortfolioSpec;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Complete simulation configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub portfolios: Vec<PortfolioSpec>,
}

/// Global simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Budget split across each portfolio at inception.
    #[serde(default = "default_budget")]
    pub initial_budget: f64,
    /// Calendar months between rebalances.
    #[serde(default = "default_cadence")]
    pub rebalance_months: u32,
    /// Start date (YYYY-MM-DD format).
    #[serde(default)]
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD format).
    #[serde(default)]
    pub end_date: Option<String>,
    /// Instrument whose trading dates drive the run.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub parallel: bool,
}

fn default_budget() -> f64 { 10_000.0 }
fn default_cadence() -> u32 { 6 }

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            initial_budget: 10_000.0,
            rebalance_months: 6,
            start_date: None,
            end_date: None,
            reference: None,
            parallel: false,
        }
    }
}

/// Data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Directory holding one CSV file per instrument.
    #[serde(default = "default_dir")]
    pub dir: String,
    /// Date format in CSV.
    pub date_format: Option<String>,
    /// CSV delimiter; auto-detected when unset.
    pub delimiter: Option<char>,
}

fn default_dir() -> String { "data".to_string() }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dir: "data".to_string(),
            date_format: None,
            delimiter: None,
        }
    }
}

/// Split a portfolio entry into instrument id and file name.
///
/// `VOO.csv` and `VOO` both name instrument `VOO` stored in `VOO.csv`.
fn resolve_entry(entry: &str) -> (String, String) {
    let is_csv = Path::new(entry)
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        let id = instrument_id(entry).unwrap_or_else(|| entry.to_string());
        (id, entry.to_string())
    } else {
        (entry.to_string(), format!("{}.csv", entry))
    }
}

fn parse_day(field: &str, value: &Option<String>) -> Result<Option<NaiveDate>> {
    value
        .as_deref()
        .map(|s| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| {
                SimError::Config(format!("{} '{}' is not a YYYY-MM-DD date: {}", field, s, e))
            })
        })
        .transpose()
}

impl FileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| SimError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Engine settings. Validation of the values happens in the engine.
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            initial_budget: self.simulation.initial_budget,
            rebalance_months: self.simulation.rebalance_months,
            reference: self
                .simulation
                .reference
                .as_deref()
                .map(|r| resolve_entry(r).0),
            parallel: self.simulation.parallel,
        }
    }

    /// Portfolio definitions with file names replaced by instrument ids.
    pub fn portfolio_specs(&self) -> Vec<PortfolioSpec> {
        self.portfolios
            .iter()
            .map(|spec| PortfolioSpec {
                instruments: spec.instruments.iter().map(|e| resolve_entry(e).0).collect(),
                benchmark: spec.benchmark.as_deref().map(|e| resolve_entry(e).0),
                ..spec.clone()
            })
            .collect()
    }

    /// Loader settings, including the date window.
    pub fn data_config(&self) -> Result<DataConfig> {
        let start = parse_day("start_date", &self.simulation.start_date)?;
        let end = parse_day("end_date", &self.simulation.end_date)?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(SimError::Config(format!(
                    "start_date {} is after end_date {}",
                    s, e
                )));
            }
        }

        let delimiter = match self.data.delimiter {
            Some(c) if c.is_ascii() => Some(c as u8),
            Some(c) => {
                return Err(SimError::Config(format!(
                    "delimiter '{}' is not an ASCII character",
                    c
                )))
            }
            None => None,
        };

        Ok(DataConfig {
            date_format: self.data.date_format.clone(),
            delimiter,
            ..Default::default()
        }
        .with_window(start, end))
    }

    /// Every distinct file referenced by the configuration, keyed by id.
    pub fn instrument_files(&self) -> BTreeMap<String, PathBuf> {
        let dir = Path::new(&self.data.dir);
        let entries = self
            .portfolios
            .iter()
            .flat_map(|p| p.instruments.iter().chain(p.benchmark.iter()))
            .chain(self.simulation.reference.iter());

        let mut files = BTreeMap::new();
        for entry in entries {
            let (id, file) = resolve_entry(entry);
            files.entry(id).or_insert_with(|| dir.join(file));
        }
        files
    }

    /// Load every referenced instrument once.
    ///
    /// A file that fails to load is logged and left out of the store, so only
    /// the portfolios that use it fail.
    pub fn load_prices(&self) -> Result<PriceStore> {
        let data_config = self.data_config()?;
        let mut store = PriceStore::new();

        for (id, path) in self.instrument_files() {
            match load_csv(&path, &data_config) {
                Ok(series) => store.insert(id, series),
                Err(e) => warn!("Failed to load {} from {}: {}", id, path.display(), e),
            }
        }

        info!("Loaded {} instruments from {}", store.len(), self.data.dir);
        Ok(store)
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Rebalancer configuration file
# Compares periodic rebalancing against buy-and-hold for each portfolio.

[simulation]
initial_budget = 10000.0
rebalance_months = 6
# start_date = "2020-01-01"
# end_date = "2024-05-20"
# reference = "SPPW.DE"     # trading dates of this instrument drive the run
parallel = false

[data]
dir = "data"                # one CSV per instrument with Date and Close columns
# date_format = "%Y-%m-%d"
# delimiter = ","

[[portfolios]]
name = "Gold / World"
instruments = ["SGLD.MI.csv", "SPPW.DE.csv"]
weights = [0.4, 0.6]
names = ["Invesco Physical Gold A", "SPDR MSCI World UCITS ETF"]
benchmark = "VOO.csv"
# benchmark_budget = 10000.0

[[portfolios]]
name = "Three fund"
instruments = ["SPPW.DE", "EUNA.DE", "SGLD.MI"]
weights = [0.6, 0.3, 0.1]
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = FileConfig::default();
        assert_eq!(config.simulation.initial_budget, 10_000.0);
        assert_eq!(config.simulation.rebalance_months, 6);
        assert_eq!(config.data.dir, "data");
        assert!(config.portfolios.is_empty());
    }

    #[test]
    fn test_load_config() {
        let toml_content = r#"
[simulation]
initial_budget = 5000.0
rebalance_months = 3
start_date = "2021-01-01"
reference = "VOO.csv"

[data]
dir = "prices"
delimiter = ";"

[[portfolios]]
name = "pair"
instruments = ["A.csv", "B.DE"]
weights = [0.5, 0.5]
benchmark = "VOO.csv"
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.simulation.initial_budget, 5000.0);
        assert_eq!(config.data.delimiter, Some(';'));

        let sim = config.simulation_config();
        assert_eq!(sim.rebalance_months, 3);
        assert_eq!(sim.reference.as_deref(), Some("VOO"));

        let specs = config.portfolio_specs();
        assert_eq!(specs[0].instruments, vec!["A", "B.DE"]);
        assert_eq!(specs[0].benchmark.as_deref(), Some("VOO"));

        let data = config.data_config().unwrap();
        assert_eq!(data.delimiter, Some(b';'));
        assert_eq!(data.start_date, NaiveDate::from_ymd_opt(2021, 1, 1));
        assert_eq!(data.end_date, None);

        let files = config.instrument_files();
        assert_eq!(files.len(), 3);
        assert_eq!(files["B.DE"], Path::new("prices").join("B.DE.csv"));
    }

    #[test]
    fn test_bad_dates_rejected() {
        let mut config = FileConfig::default();
        config.simulation.start_date = Some("01/02/2020".into());
        assert!(matches!(config.data_config(), Err(SimError::Config(_))));

        config.simulation.start_date = Some("2022-01-01".into());
        config.simulation.end_date = Some("2021-01-01".into());
        assert!(config.data_config().is_err());
    }

    #[test]
    fn test_load_prices_skips_missing_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("A.csv"),
            "Date,Close\n2024-01-02,10\n2024-01-03,11\n",
        )
        .unwrap();

        let mut config = FileConfig::default();
        config.data.dir = dir.path().to_string_lossy().into_owned();
        config.portfolios = vec![
            PortfolioSpec::new("a", &["A.csv"], &[1.0]),
            PortfolioSpec::new("b", &["A.csv", "GONE.csv"], &[0.5, 0.5]),
        ];

        let store = config.load_prices().unwrap();
        assert!(store.contains("A"));
        assert!(!store.contains("GONE"));
        assert_eq!(store.get("A").unwrap().len(), 2);
    }

    #[test]
    fn test_save_config() {
        let file = NamedTempFile::new().unwrap();
        let config: FileConfig = toml::from_str(&FileConfig::example()).unwrap();
        config.save(file.path()).unwrap();

        let loaded = FileConfig::load(file.path()).unwrap();
        assert_eq!(loaded.portfolios, config.portfolios);
        assert_eq!(loaded.simulation.initial_budget, config.simulation.initial_budget);
    }

    #[test]
    fn test_example_config() {
        let example = FileConfig::example();
        assert!(example.contains("[simulation]"));
        assert!(example.contains("[[portfolios]]"));
        let config: FileConfig = toml::from_str(&example).unwrap();
        assert_eq!(config.portfolios.len(), 2);
        assert_eq!(config.portfolio_specs()[1].instruments[0], "SPPW.DE");
    }
}
