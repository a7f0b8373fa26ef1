//! Core data types: price series, instruments and portfolios.

use crate::error::{Result, SimError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Tolerance used when checking that portfolio weights sum to 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// A single daily close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, price: f64) -> Self {
        Self { date, price }
    }

    /// Validate that the close is usable as a growth-factor denominator.
    pub fn validate(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Chronologically ordered closes for one instrument, unique dates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Build a series from unordered points. Sorts by date and keeps the
    /// first point of any duplicated date.
    pub fn new(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self { points }
    }

    /// Build a series from `(date, price)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(date, price)| PricePoint::new(date, price))
                .collect(),
        )
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// All trading dates of the series, in order.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    /// Close on exactly `date`, if the instrument traded that day.
    pub fn price_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].price)
    }

    /// Latest point dated on or before `date`.
    pub fn last_on_or_before(&self, date: NaiveDate) -> Option<&PricePoint> {
        let idx = self.points.partition_point(|p| p.date <= date);
        idx.checked_sub(1).map(|i| &self.points[i])
    }

    /// Sub-series confined to `[start, end]` (either bound optional).
    pub fn within(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        let points = self
            .points
            .iter()
            .filter(|p| start.map_or(true, |s| p.date >= s))
            .filter(|p| end.map_or(true, |e| p.date <= e))
            .copied()
            .collect();
        Self { points }
    }
}

/// A tradable asset: identifier (ticker or file stem) plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub name: String,
}

impl Instrument {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.id {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.name, self.id)
        }
    }
}

/// Unvalidated portfolio definition, as written in a config file.
///
/// The three lists are parallel; `names` may be empty, in which case the
/// instrument ids double as display names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSpec {
    pub name: String,
    pub instruments: Vec<String>,
    pub weights: Vec<f64>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub benchmark: Option<String>,
    #[serde(default)]
    pub benchmark_budget: Option<f64>,
}

impl PortfolioSpec {
    pub fn new(name: impl Into<String>, instruments: &[&str], weights: &[f64]) -> Self {
        Self {
            name: name.into(),
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            weights: weights.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_benchmark(mut self, instrument: impl Into<String>, budget: Option<f64>) -> Self {
        self.benchmark = Some(instrument.into());
        self.benchmark_budget = budget;
        self
    }
}

/// One instrument of a portfolio with its target weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub instrument: Instrument,
    pub weight: f64,
}

/// Validated portfolio: non-empty, unique instruments, non-negative weights
/// summing to 1.0 within [`WEIGHT_TOLERANCE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    name: String,
    holdings: Vec<Holding>,
    benchmark: Option<Instrument>,
    benchmark_budget: Option<f64>,
}

impl Portfolio {
    /// Validate a spec. Fails with [`SimError::PortfolioConfig`] naming the portfolio.
    pub fn from_spec(spec: &PortfolioSpec) -> Result<Self> {
        let name = spec.name.as_str();

        if spec.instruments.is_empty() {
            return Err(SimError::portfolio_config(name, "no instruments"));
        }
        if spec.instruments.len() != spec.weights.len() {
            return Err(SimError::portfolio_config(
                name,
                format!(
                    "{} instruments but {} weights",
                    spec.instruments.len(),
                    spec.weights.len()
                ),
            ));
        }
        if !spec.names.is_empty() && spec.names.len() != spec.instruments.len() {
            return Err(SimError::portfolio_config(
                name,
                format!(
                    "{} instruments but {} display names",
                    spec.instruments.len(),
                    spec.names.len()
                ),
            ));
        }

        let mut seen = HashSet::new();
        for id in &spec.instruments {
            if !seen.insert(id.as_str()) {
                return Err(SimError::portfolio_config(
                    name,
                    format!("instrument '{}' listed twice", id),
                ));
            }
        }

        for (id, &w) in spec.instruments.iter().zip(&spec.weights) {
            if !w.is_finite() || w < 0.0 {
                return Err(SimError::portfolio_config(
                    name,
                    format!("weight {} for '{}' must be a non-negative number", w, id),
                ));
            }
        }

        let total: f64 = spec.weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(SimError::portfolio_config(
                name,
                format!("weights sum to {:.8}, expected 1.0", total),
            ));
        }

        if let Some(budget) = spec.benchmark_budget {
            if !(budget.is_finite() && budget > 0.0) {
                return Err(SimError::portfolio_config(
                    name,
                    format!("benchmark budget {} must be positive", budget),
                ));
            }
        }

        let holdings = spec
            .instruments
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let display = spec.names.get(i).cloned().unwrap_or_else(|| id.clone());
                Holding {
                    instrument: Instrument::new(id.clone(), display),
                    weight: spec.weights[i],
                }
            })
            .collect();

        Ok(Self {
            name: spec.name.clone(),
            holdings,
            benchmark: spec
                .benchmark
                .as_ref()
                .map(|id| Instrument::new(id.clone(), id.clone())),
            benchmark_budget: spec.benchmark_budget,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn weights(&self) -> Vec<f64> {
        self.holdings.iter().map(|h| h.weight).collect()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.holdings.iter().map(|h| &h.instrument)
    }

    pub fn benchmark(&self) -> Option<&Instrument> {
        self.benchmark.as_ref()
    }

    pub fn benchmark_budget(&self) -> Option<f64> {
        self.benchmark_budget
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }
}

/// Valuation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Policy {
    /// Reset holdings to target weights at every schedule date.
    Rebalanced,
    /// Allocate once at inception, never re-split.
    BuyAndHold,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Rebalanced => write!(f, "rebalanced"),
            Policy::BuyAndHold => write!(f, "buy-and-hold"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_series_sorts_and_dedups() {
        let series = PriceSeries::from_pairs(vec![
            (d(2024, 1, 3), 11.0),
            (d(2024, 1, 2), 10.0),
            (d(2024, 1, 3), 99.0),
        ]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.dates(), vec![d(2024, 1, 2), d(2024, 1, 3)]);
        assert_eq!(series.price_on(d(2024, 1, 3)), Some(11.0));
    }

    #[test]
    fn test_series_lookups() {
        let series = PriceSeries::from_pairs(vec![(d(2024, 1, 2), 10.0), (d(2024, 1, 5), 12.0)]);
        assert_eq!(series.price_on(d(2024, 1, 4)), None);
        assert_eq!(series.last_on_or_before(d(2024, 1, 4)).unwrap().price, 10.0);
        assert_eq!(series.last_on_or_before(d(2024, 1, 5)).unwrap().price, 12.0);
        assert!(series.last_on_or_before(d(2024, 1, 1)).is_none());

        let window = series.within(Some(d(2024, 1, 3)), None);
        assert_eq!(window.len(), 1);
        assert_eq!(window.first().unwrap().date, d(2024, 1, 5));
    }

    #[test]
    fn test_portfolio_validation() {
        let ok = PortfolioSpec::new("p", &["A", "B"], &[0.4, 0.6]).with_names(&["Alpha", "Beta"]);
        let portfolio = Portfolio::from_spec(&ok).unwrap();
        assert_eq!(portfolio.len(), 2);
        assert_eq!(portfolio.holdings()[1].instrument.name, "Beta");

        let mismatch = PortfolioSpec::new("p", &["A", "B"], &[1.0]);
        assert!(matches!(
            Portfolio::from_spec(&mismatch),
            Err(SimError::PortfolioConfig { .. })
        ));

        let bad_sum = PortfolioSpec::new("p", &["A", "B"], &[0.5, 0.6]);
        assert!(Portfolio::from_spec(&bad_sum).is_err());

        let negative = PortfolioSpec::new("p", &["A", "B"], &[1.5, -0.5]);
        assert!(Portfolio::from_spec(&negative).is_err());

        let dup = PortfolioSpec::new("p", &["A", "A"], &[0.5, 0.5]);
        assert!(Portfolio::from_spec(&dup).is_err());

        let names = PortfolioSpec::new("p", &["A", "B"], &[0.5, 0.5]).with_names(&["Alpha"]);
        assert!(Portfolio::from_spec(&names).is_err());
    }

    #[test]
    fn test_weights_within_tolerance() {
        let spec = PortfolioSpec::new("p", &["A", "B", "C"], &[0.1, 0.2, 0.7 + 1e-9]);
        assert!(Portfolio::from_spec(&spec).is_ok());
    }

    #[test]
    fn test_instrument_display() {
        assert_eq!(Instrument::new("VOO", "VOO").to_string(), "VOO");
        assert_eq!(
            Instrument::new("VOO", "Vanguard S&P 500").to_string(),
            "Vanguard S&P 500 (VOO)"
        );
    }
}
