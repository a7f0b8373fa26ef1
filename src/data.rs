//! Price data loading and management.
//!
//! Reads daily closes from CSV files (one file per instrument, `Date` and
//! `Close` columns, anything else ignored) into [`PriceSeries`].

use crate::error::{Result, SimError};
use crate::types::{PricePoint, PriceSeries};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw CSV row with flexible header names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "Datetime",
        alias = "datetime"
    )]
    date: String,
    #[serde(
        alias = "Close",
        alias = "close",
        alias = "CLOSE",
        alias = "c",
        alias = "Price",
        alias = "price"
    )]
    close: f64,
}

/// Data source configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string (e.g. "%Y-%m-%d"). Common formats are tried when None.
    pub date_format: Option<String>,
    /// Whether the CSV has headers.
    pub has_headers: bool,
    /// CSV delimiter. Auto-detected when None.
    pub delimiter: Option<u8>,
    /// Skip invalid rows instead of failing.
    pub skip_invalid: bool,
    /// First date kept (inclusive).
    pub start_date: Option<NaiveDate>,
    /// Last date kept (inclusive).
    pub end_date: Option<NaiveDate>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: None,
            skip_invalid: true,
            start_date: None,
            end_date: None,
        }
    }
}

impl DataConfig {
    /// Restrict loaded series to `[start, end]`.
    pub fn with_window(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }
}

/// Detect the CSV delimiter from the first few lines.
///
/// Picks the candidate that splits every sampled line into the same number
/// (at least two) of fields, preferring more fields.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();

    if lines.is_empty() {
        return Ok(b',');
    }

    let delimiters = [b',', b'\t', b';', b'|'];
    let mut best_delimiter = b',';
    let mut best_score = 0;

    for &delim in &delimiters {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.as_bytes().iter().filter(|&&b| b == delim).count() + 1)
            .collect();

        let first_count = counts[0];
        let consistent = counts.iter().all(|&c| c == first_count);
        if consistent && first_count >= 2 && first_count > best_score {
            best_score = first_count;
            best_delimiter = delim;
        }
    }

    debug!(
        "Detected delimiter {:?} with {} fields",
        best_delimiter as char, best_score
    );
    Ok(best_delimiter)
}

/// Parse a trading date, trying the explicit format first and then common
/// layouts. Timestamps are reduced to their calendar date.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();

    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.date_naive());
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%d-%b-%Y"];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    // Exchange-local timestamps keep their own calendar date.
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    let offset_formats = ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"];
    for fmt in &offset_formats {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.date_naive());
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    Err(SimError::DataError(format!("Could not parse date: '{}'", s)))
}

/// Load daily closes from a CSV file.
///
/// The result is sorted, de-duplicated and confined to the configured
/// window. An empty series is returned as-is; whether that is fatal is up
/// to the simulator.
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<PriceSeries> {
    let path = path.as_ref();
    info!("Loading prices from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;

    let mut points = Vec::new();
    let mut skipped = 0;

    for (idx, result) in reader.deserialize().enumerate() {
        let row_num = idx + 1;
        let row: CsvRow = match result {
            Ok(r) => r,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(SimError::CsvError(e)),
        };

        let date = match parse_date(&row.date, config.date_format.as_deref()) {
            Ok(d) => d,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let point = PricePoint::new(date, row.close);
        if !point.validate() {
            if config.skip_invalid {
                debug!("Skipping row {}: unusable close {}", row_num, row.close);
                skipped += 1;
                continue;
            }
            return Err(SimError::InvalidInput(format!(
                "Invalid close {} at row {} of {}",
                row.close,
                row_num,
                path.display()
            )));
        }

        points.push(point);
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows in {}", skipped, path.display());
    }

    let raw_len = points.len();
    let series = PriceSeries::new(points);
    if series.len() < raw_len {
        warn!(
            "Removed {} duplicate dates from {}",
            raw_len - series.len(),
            path.display()
        );
    }

    let series = series.within(config.start_date, config.end_date);
    info!(
        "Loaded {} closes from {} to {}",
        series.len(),
        series.first().map(|p| p.date.to_string()).unwrap_or_default(),
        series.last().map(|p| p.date.to_string()).unwrap_or_default()
    );

    Ok(series)
}

/// Instrument id derived from a file path: the file stem (`VOO.csv` -> `VOO`,
/// `SGLD.MI.csv` -> `SGLD.MI`).
pub fn instrument_id(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref()
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

/// Load several instruments from a map of id -> file path.
pub fn load_multi<S, P>(paths: &HashMap<S, P>, config: &DataConfig) -> Result<PriceStore>
where
    S: AsRef<str>,
    P: AsRef<Path>,
{
    let mut store = PriceStore::new();
    for (id, path) in paths {
        let series = load_csv(path, config)?;
        store.insert(id.as_ref(), series);
    }
    info!("Loaded {} instruments", store.len());
    Ok(store)
}

/// Load every file in `dir` matching a glob `pattern`; ids are file stems.
///
/// Files that fail to load are logged and skipped. Fails only when nothing
/// could be loaded and at least one file errored.
pub fn load_dir(dir: impl AsRef<Path>, pattern: &str, config: &DataConfig) -> Result<PriceStore> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(SimError::DataError(format!(
            "Not a directory: {}",
            dir.display()
        )));
    }

    let glob_pattern = dir.join(pattern);
    let glob_pattern = glob_pattern.to_string_lossy();
    let paths = glob::glob(&glob_pattern).map_err(|e| {
        SimError::DataError(format!("Invalid glob pattern '{}': {}", pattern, e))
    })?;

    let mut store = PriceStore::new();
    let mut errors = 0;

    for entry in paths {
        let path = match entry {
            Ok(p) => p,
            Err(e) => {
                warn!("Glob error: {}", e);
                errors += 1;
                continue;
            }
        };
        let Some(id) = instrument_id(&path) else {
            warn!("Could not derive instrument id from {}", path.display());
            errors += 1;
            continue;
        };
        match load_csv(&path, config) {
            Ok(series) => store.insert(id, series),
            Err(e) => {
                warn!("Failed to load {}: {}", path.display(), e);
                errors += 1;
            }
        }
    }

    if store.is_empty() && errors > 0 {
        return Err(SimError::DataError(format!(
            "No files loaded from {}. {} errors occurred.",
            dir.display(),
            errors
        )));
    }

    info!(
        "Loaded {} instruments from {} ({} errors)",
        store.len(),
        dir.display(),
        errors
    );
    Ok(store)
}

/// In-memory price data for every instrument of a run, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PriceStore {
    series: BTreeMap<String, PriceSeries>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, series: PriceSeries) {
        self.series.insert(id.into(), series);
    }

    pub fn get(&self, id: &str) -> Option<&PriceSeries> {
        self.series.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.series.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Earliest and latest date across all series.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.series.values().filter_map(|s| s.first()).map(|p| p.date).min();
        let max = self.series.values().filter_map(|s| s.last()).map(|p| p.date).max();
        min.zip(max)
    }
}

impl FromIterator<(String, PriceSeries)> for PriceStore {
    fn from_iter<I: IntoIterator<Item = (String, PriceSeries)>>(iter: I) -> Self {
        Self {
            series: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-01-15", None).unwrap(), d(2024, 1, 15));
        assert_eq!(parse_date("01/15/2024", None).unwrap(), d(2024, 1, 15));
        assert_eq!(
            parse_date("2020-01-02 00:00:00-05:00", None).unwrap(),
            d(2020, 1, 2)
        );
        assert_eq!(
            parse_date("2020-01-02T00:00:00+01:00", None).unwrap(),
            d(2020, 1, 2)
        );
        assert_eq!(
            parse_date("15|01|2024", Some("%d|%m|%Y")).unwrap(),
            d(2024, 1, 15)
        );
        assert!(parse_date("not a date", None).is_err());
    }

    #[test]
    fn test_load_yahoo_style_csv() {
        let file = write_csv(
            "Date,Open,High,Low,Close,Adj Close,Volume\n\
             2024-01-03,1,1,1,101.0,100.0,10\n\
             2024-01-02,1,1,1,100.0,99.0,10\n\
             2024-01-04,1,1,1,102.5,101.0,10\n",
        );
        let series = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.first().unwrap().date, d(2024, 1, 2));
        assert_eq!(series.price_on(d(2024, 1, 4)), Some(102.5));
    }

    #[test]
    fn test_load_skips_bad_rows_and_applies_window() {
        let file = write_csv(
            "Date;Close\n\
             2023-12-29;90.0\n\
             2024-01-02;100.0\n\
             garbage;1.0\n\
             2024-01-03;-5.0\n\
             2024-01-04;104.0\n\
             2024-02-01;110.0\n",
        );
        let config = DataConfig::default().with_window(Some(d(2024, 1, 1)), Some(d(2024, 1, 31)));
        let series = load_csv(file.path(), &config).unwrap();
        assert_eq!(series.dates(), vec![d(2024, 1, 2), d(2024, 1, 4)]);
    }

    #[test]
    fn test_strict_mode_rejects_bad_rows() {
        let file = write_csv("Date,Close\n2024-01-02,100.0\n2024-01-03,0.0\n");
        let config = DataConfig {
            skip_invalid: false,
            ..Default::default()
        };
        assert!(load_csv(file.path(), &config).is_err());
    }

    #[test]
    fn test_load_multi_keys_by_map_id() {
        let voo = write_csv("Date,Close\n2024-01-02,400.0\n2024-01-03,404.0\n");
        let gold = write_csv("Date,Close\n2024-01-02,30.0\n");
        let mut paths = HashMap::new();
        paths.insert("VOO", voo.path().to_path_buf());
        paths.insert("SGLD", gold.path().to_path_buf());

        let store = load_multi(&paths, &DataConfig::default()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("VOO").unwrap().price_on(d(2024, 1, 3)), Some(404.0));
        assert_eq!(store.get("SGLD").unwrap().len(), 1);

        paths.insert("GONE", std::path::PathBuf::from("/nonexistent/GONE.csv"));
        assert!(load_multi(&paths, &DataConfig::default()).is_err());
    }

    #[test]
    fn test_instrument_id_from_path() {
        assert_eq!(instrument_id("data/SGLD.MI.csv").as_deref(), Some("SGLD.MI"));
        assert_eq!(instrument_id("VOO.csv").as_deref(), Some("VOO"));
    }

    #[test]
    fn test_load_dir_uses_file_stems() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("VOO.csv"), "Date,Close\n2024-01-02,400.0\n").unwrap();
        std::fs::write(dir.path().join("SGLD.MI.csv"), "Date,Close\n2024-01-02,150.0\n")
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = load_dir(dir.path(), "*.csv", &DataConfig::default()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains("SGLD.MI"));
        assert_eq!(store.date_range(), Some((d(2024, 1, 2), d(2024, 1, 2))));
    }
}
