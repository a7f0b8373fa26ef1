//! Rebalancing simulation engine.
//!
//! For every portfolio the engine walks the shared trading-date axis twice,
//! once under the periodic-rebalancing policy and once as buy-and-hold, and
//! records the dollar value of every holding and the portfolio total on
//! each date. Portfolios never share mutable state, so a batch can be run on
//! the rayon pool.

use crate::data::PriceStore;
use crate::error::{Result, SimError};
use crate::growth::{FallbackStats, GrowthTracker};
use crate::schedule::RebalanceSchedule;
use crate::types::{Instrument, Policy, Portfolio, PortfolioSpec, PriceSeries};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Portfolio field used in errors about the shared reference series.
pub const REFERENCE_SCOPE: &str = "<reference>";

/// Global simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Budget split across each portfolio at inception.
    pub initial_budget: f64,
    /// Calendar months between rebalance events.
    pub rebalance_months: u32,
    /// Instrument whose trading dates form the date axis. Defaults to the
    /// first instrument of the first portfolio.
    #[serde(default)]
    pub reference: Option<String>,
    /// Simulate portfolios in parallel.
    #[serde(default)]
    pub parallel: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_budget: 10_000.0,
            rebalance_months: 6,
            reference: None,
            parallel: false,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_budget.is_finite() && self.initial_budget > 0.0) {
            return Err(SimError::Config(format!(
                "initial budget must be positive, got {}",
                self.initial_budget
            )));
        }
        if self.rebalance_months == 0 {
            return Err(SimError::Config(
                "rebalance cadence must be at least one month".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dollar values of one holding over the date axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSeries {
    pub instrument: Instrument,
    pub values: Vec<f64>,
    /// How often the growth factor needed the missing-price fallback.
    pub fallbacks: FallbackStats,
}

impl InstrumentSeries {
    /// Percentage change of the holding's value relative to the first date.
    ///
    /// Under buy and hold this is the instrument's price growth since the
    /// start, with missing closes filled by the fallback ladder.
    pub fn growth_pct(&self) -> Vec<f64> {
        match self.values.first() {
            Some(&start) if start > 0.0 => self
                .values
                .iter()
                .map(|v| (v / start - 1.0) * 100.0)
                .collect(),
            _ => vec![0.0; self.values.len()],
        }
    }
}

/// Holdings just before and just after a rebalance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    pub total: f64,
    pub before: Vec<f64>,
    pub after: Vec<f64>,
}

/// One policy's trajectory for a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRun {
    pub policy: Policy,
    pub instruments: Vec<InstrumentSeries>,
    pub totals: Vec<f64>,
    pub rebalances: Vec<RebalanceEvent>,
}

impl PolicyRun {
    /// Look up a holding by instrument id or display name.
    pub fn series(&self, key: &str) -> Option<&InstrumentSeries> {
        self.instruments
            .iter()
            .find(|s| s.instrument.id == key)
            .or_else(|| self.instruments.iter().find(|s| s.instrument.name == key))
    }

    pub fn final_total(&self) -> Option<f64> {
        self.totals.last().copied()
    }

    /// Share of the total held in each instrument at date index `index`.
    pub fn weights_at(&self, index: usize) -> Option<Vec<f64>> {
        let total = *self.totals.get(index)?;
        if total <= 0.0 {
            return None;
        }
        self.instruments
            .iter()
            .map(|s| s.values.get(index).map(|v| v / total))
            .collect()
    }

    /// Fallback counters summed over all holdings.
    pub fn fallbacks(&self) -> FallbackStats {
        let mut stats = FallbackStats::default();
        for s in &self.instruments {
            stats.merge(&s.fallbacks);
        }
        stats
    }
}

/// Buy-and-hold of a single comparison instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub instrument: Instrument,
    pub budget: f64,
    pub values: Vec<f64>,
    pub fallbacks: FallbackStats,
}

/// Everything computed for one portfolio. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioResult {
    pub name: String,
    pub dates: Vec<NaiveDate>,
    pub rebalanced: PolicyRun,
    pub buy_and_hold: PolicyRun,
    pub benchmark: Option<BenchmarkRun>,
}

impl PortfolioResult {
    pub fn policy(&self, policy: Policy) -> &PolicyRun {
        match policy {
            Policy::Rebalanced => &self.rebalanced,
            Policy::BuyAndHold => &self.buy_and_hold,
        }
    }

    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    pub fn total_on(&self, policy: Policy, date: NaiveDate) -> Option<f64> {
        self.index_of(date)
            .and_then(|i| self.policy(policy).totals.get(i).copied())
    }

    /// `(date, value)` pairs of one holding under a policy.
    pub fn dated_values(&self, policy: Policy, key: &str) -> Option<Vec<(NaiveDate, f64)>> {
        self.policy(policy)
            .series(key)
            .map(|s| self.dates.iter().copied().zip(s.values.iter().copied()).collect())
    }
}

/// Result of one portfolio within a batch.
#[derive(Debug)]
pub struct PortfolioOutcome {
    pub name: String,
    pub outcome: Result<PortfolioResult>,
}

/// Batch output: the shared axis plus one outcome per requested portfolio.
#[derive(Debug)]
pub struct SimulationReport {
    pub reference: String,
    pub dates: Vec<NaiveDate>,
    pub schedule: RebalanceSchedule,
    pub portfolios: Vec<PortfolioOutcome>,
}

impl SimulationReport {
    /// First successful result with this portfolio name.
    pub fn get(&self, name: &str) -> Option<&PortfolioResult> {
        self.successes().find(|r| r.name == name)
    }

    pub fn successes(&self) -> impl Iterator<Item = &PortfolioResult> {
        self.portfolios.iter().filter_map(|p| p.outcome.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &SimError)> {
        self.portfolios
            .iter()
            .filter_map(|p| p.outcome.as_ref().err().map(|e| (p.name.as_str(), e)))
    }
}

/// Output of one pass over the axis, before it is attached to instruments.
struct Trajectory {
    values: Vec<Vec<f64>>,
    totals: Vec<f64>,
    fallbacks: Vec<FallbackStats>,
    rebalances: Vec<RebalanceEvent>,
}

/// Walk the date axis once.
///
/// With `schedule == None` the allocation is fixed at inception and period
/// date zero stays at the first date. On a schedule date holdings are first
/// marked to that day's prices, then the total is re-split by weight and
/// period date zero moves to that date.
fn simulate(
    ids: &[&str],
    weights: &[f64],
    series: &[&PriceSeries],
    dates: &[NaiveDate],
    schedule: Option<&RebalanceSchedule>,
    budget: f64,
) -> Trajectory {
    let n = ids.len();
    let mut allocation: Vec<f64> = weights.iter().map(|w| w * budget).collect();
    let mut trackers: Vec<GrowthTracker> = ids
        .iter()
        .zip(series)
        .map(|(id, s)| GrowthTracker::new(id, s))
        .collect();

    let mut values = vec![Vec::with_capacity(dates.len()); n];
    let mut fallbacks = vec![FallbackStats::default(); n];
    let mut totals = Vec::with_capacity(dates.len());
    let mut rebalances = Vec::new();

    for (i, &date) in dates.iter().enumerate() {
        for tracker in trackers.iter_mut() {
            tracker.advance(date);
        }

        if i == 0 {
            for tracker in trackers.iter_mut() {
                tracker.reset_period(date);
            }
        } else if schedule.map_or(false, |s| s.contains(date)) {
            let before: Vec<f64> = trackers
                .iter_mut()
                .zip(&allocation)
                .map(|(t, a)| a * t.evaluate().factor)
                .collect();
            let total: f64 = before.iter().sum();
            allocation = weights.iter().map(|w| w * total).collect();
            for tracker in trackers.iter_mut() {
                tracker.reset_period(date);
            }
            debug!("Rebalance on {}: total {:.2}", date, total);
            rebalances.push(RebalanceEvent {
                date,
                total,
                before,
                after: allocation.clone(),
            });
        }

        let mut total = 0.0;
        for (j, tracker) in trackers.iter_mut().enumerate() {
            let growth = tracker.evaluate();
            fallbacks[j].record(growth.source);
            let value = allocation[j] * growth.factor;
            values[j].push(value);
            total += value;
        }
        totals.push(total);
    }

    Trajectory {
        values,
        totals,
        fallbacks,
        rebalances,
    }
}

/// Rebalancing simulator. Holds only configuration; all price data and
/// portfolio definitions are passed to [`run`](Self::run).
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    config: SimulationConfig,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Resolve the reference instrument and its trading dates.
    pub fn date_axis(
        &self,
        store: &PriceStore,
        specs: &[PortfolioSpec],
    ) -> Result<(String, Vec<NaiveDate>)> {
        let reference = match &self.config.reference {
            Some(r) => r.clone(),
            None => specs
                .iter()
                .find_map(|s| s.instruments.first())
                .cloned()
                .ok_or_else(|| {
                    SimError::Config("no portfolio instruments to take a reference from".into())
                })?,
        };

        let series = store.get(&reference).ok_or_else(|| {
            SimError::unavailable(REFERENCE_SCOPE, &reference, "no price series loaded")
        })?;
        if series.is_empty() {
            return Err(SimError::unavailable(
                REFERENCE_SCOPE,
                &reference,
                "reference series has no trading dates in the window",
            ));
        }

        Ok((reference, series.dates()))
    }

    /// Simulate every portfolio over a shared date axis.
    ///
    /// Global configuration and reference-series problems abort the batch.
    /// Problems with one portfolio are reported in its [`PortfolioOutcome`]
    /// and do not affect the others.
    pub fn run(&self, store: &PriceStore, specs: &[PortfolioSpec]) -> Result<SimulationReport> {
        self.config.validate()?;
        let (reference, dates) = self.date_axis(store, specs)?;
        let schedule = RebalanceSchedule::build(&dates, self.config.rebalance_months);

        info!(
            "Simulating {} portfolios over {} dates ({} to {}), reference {}, {} rebalance events",
            specs.len(),
            dates.len(),
            dates[0],
            dates[dates.len() - 1],
            reference,
            schedule.len()
        );

        let run_one = |spec: &PortfolioSpec| {
            let outcome = self.run_portfolio(store, spec, &dates, &schedule);
            if let Err(e) = &outcome {
                warn!("Portfolio '{}' failed: {}", spec.name, e);
            }
            PortfolioOutcome {
                name: spec.name.clone(),
                outcome,
            }
        };

        let portfolios: Vec<PortfolioOutcome> = if self.config.parallel {
            specs.par_iter().map(run_one).collect()
        } else {
            specs.iter().map(run_one).collect()
        };

        Ok(SimulationReport {
            reference,
            dates,
            schedule,
            portfolios,
        })
    }

    /// Simulate one portfolio under both policies (and its benchmark).
    pub fn run_portfolio(
        &self,
        store: &PriceStore,
        spec: &PortfolioSpec,
        dates: &[NaiveDate],
        schedule: &RebalanceSchedule,
    ) -> Result<PortfolioResult> {
        let portfolio = Portfolio::from_spec(spec)?;
        let name = portfolio.name();

        let series: Vec<&PriceSeries> = portfolio
            .instruments()
            .map(|inst| resolve(store, name, &inst.id))
            .collect::<Result<_>>()?;
        let benchmark_series = portfolio
            .benchmark()
            .map(|inst| resolve(store, name, &inst.id))
            .transpose()?;

        let ids: Vec<&str> = portfolio.instruments().map(|i| i.id.as_str()).collect();
        let weights = portfolio.weights();
        let budget = self.config.initial_budget;

        info!("Running portfolio '{}' ({} instruments)", name, ids.len());

        let rebalanced = simulate(&ids, &weights, &series, dates, Some(schedule), budget);
        let buy_and_hold = simulate(&ids, &weights, &series, dates, None, budget);

        let rebalanced = into_policy_run(&portfolio, Policy::Rebalanced, rebalanced);
        let buy_and_hold = into_policy_run(&portfolio, Policy::BuyAndHold, buy_and_hold);

        let benchmark = match (portfolio.benchmark(), benchmark_series) {
            (Some(inst), Some(series)) => {
                let budget = portfolio.benchmark_budget().unwrap_or(budget);
                let mut run = simulate(&[inst.id.as_str()], &[1.0], &[series], dates, None, budget);
                let fallbacks = run.fallbacks.pop().unwrap_or_default();
                warn_fallbacks(name, "benchmark", &fallbacks);
                Some(BenchmarkRun {
                    instrument: inst.clone(),
                    budget,
                    values: run.values.pop().unwrap_or_default(),
                    fallbacks,
                })
            }
            _ => None,
        };

        Ok(PortfolioResult {
            name: name.to_string(),
            dates: dates.to_vec(),
            rebalanced,
            buy_and_hold,
            benchmark,
        })
    }
}

fn resolve<'s>(store: &'s PriceStore, portfolio: &str, id: &str) -> Result<&'s PriceSeries> {
    let series = store
        .get(id)
        .ok_or_else(|| SimError::unavailable(portfolio, id, "no price series loaded"))?;
    if series.is_empty() {
        return Err(SimError::unavailable(
            portfolio,
            id,
            "zero price points in the requested window",
        ));
    }
    if let Some(bad) = series.points().iter().find(|p| !p.validate()) {
        return Err(SimError::unavailable(
            portfolio,
            id,
            format!("non-positive or non-finite close on {}", bad.date),
        ));
    }
    Ok(series)
}

fn into_policy_run(portfolio: &Portfolio, policy: Policy, trajectory: Trajectory) -> PolicyRun {
    let instruments: Vec<InstrumentSeries> = portfolio
        .instruments()
        .cloned()
        .zip(trajectory.values)
        .zip(trajectory.fallbacks)
        .map(|((instrument, values), fallbacks)| InstrumentSeries {
            instrument,
            values,
            fallbacks,
        })
        .collect();

    let run = PolicyRun {
        policy,
        instruments,
        totals: trajectory.totals,
        rebalances: trajectory.rebalances,
    };
    warn_fallbacks(portfolio.name(), &policy.to_string(), &run.fallbacks());
    run
}

fn warn_fallbacks(portfolio: &str, label: &str, stats: &FallbackStats) {
    if stats.fallbacks() > 0 {
        warn!(
            "Portfolio '{}' ({}): {} missing-price fallbacks ({} held forward, {} re-anchored, {} unlisted)",
            portfolio,
            label,
            stats.fallbacks(),
            stats.held_forward,
            stats.reanchored,
            stats.unlisted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn store(entries: &[(&str, &[(NaiveDate, f64)])]) -> PriceStore {
        entries
            .iter()
            .map(|(id, pts)| (id.to_string(), PriceSeries::from_pairs(pts.iter().copied())))
            .collect()
    }

    #[test]
    fn test_config_validation() {
        assert!(SimulationConfig::default().validate().is_ok());
        let bad = SimulationConfig {
            initial_budget: 0.0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(SimError::Config(_))));
        let bad = SimulationConfig {
            rebalance_months: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_rebalance_marks_to_market_then_resets() {
        let a = [(d(2020, 1, 2), 100.0), (d(2020, 7, 2), 200.0), (d(2020, 12, 1), 400.0)];
        let b = [(d(2020, 1, 2), 50.0), (d(2020, 7, 2), 50.0), (d(2020, 12, 1), 50.0)];
        let store = store(&[("A", &a), ("B", &b)]);
        let specs = vec![PortfolioSpec::new("ab", &["A", "B"], &[0.5, 0.5])];

        let report = Simulator::default().run(&store, &specs).unwrap();
        assert_eq!(report.schedule.dates(), &[d(2020, 7, 2)]);

        let result = report.get("ab").unwrap();
        let event = &result.rebalanced.rebalances[0];
        assert_eq!(event.before, vec![10_000.0, 5_000.0]);
        assert_eq!(event.after, vec![7_500.0, 7_500.0]);
        assert_eq!(result.rebalanced.totals, vec![10_000.0, 15_000.0, 22_500.0]);
        assert_eq!(result.buy_and_hold.totals, vec![10_000.0, 15_000.0, 25_000.0]);
        assert_eq!(result.rebalanced.weights_at(1).unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_portfolio_failures_are_isolated() {
        let a = [(d(2024, 1, 2), 10.0), (d(2024, 1, 3), 11.0)];
        let store = store(&[("A", &a), ("EMPTY", &[])]);
        let specs = vec![
            PortfolioSpec::new("good", &["A"], &[1.0]),
            PortfolioSpec::new("mismatch", &["A"], &[0.5, 0.5]),
            PortfolioSpec::new("missing", &["A", "NOPE"], &[0.5, 0.5]),
            PortfolioSpec::new("empty", &["A", "EMPTY"], &[0.5, 0.5]),
        ];

        let report = Simulator::default().run(&store, &specs).unwrap();
        assert_eq!(report.successes().count(), 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 3);
        assert!(matches!(failures[0].1, SimError::PortfolioConfig { .. }));
        assert!(matches!(
            failures[1].1,
            SimError::DataAvailability { instrument, .. } if instrument == "NOPE"
        ));
        assert!(matches!(
            failures[2].1,
            SimError::DataAvailability { instrument, .. } if instrument == "EMPTY"
        ));
    }

    #[test]
    fn test_unusable_closes_fail_the_portfolio() {
        let a = [(d(2020, 1, 2), 10.0), (d(2020, 1, 3), 11.0)];
        let zero = [(d(2020, 1, 2), 0.0), (d(2020, 1, 3), 5.0)];
        let nan = [(d(2020, 1, 2), 4.0), (d(2020, 1, 3), f64::NAN)];
        let store = store(&[("A", &a), ("Z", &zero), ("N", &nan)]);
        let specs = vec![
            PortfolioSpec::new("zero", &["A", "Z"], &[0.5, 0.5]),
            PortfolioSpec::new("nan", &["A", "N"], &[0.5, 0.5]),
            PortfolioSpec::new("clean", &["A"], &[1.0]),
        ];

        let report = Simulator::default().run(&store, &specs).unwrap();
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 2);
        assert!(matches!(
            failures[0].1,
            SimError::DataAvailability { portfolio, instrument, reason }
                if portfolio == "zero" && instrument == "Z" && reason.contains("2020-01-02")
        ));
        assert!(matches!(
            failures[1].1,
            SimError::DataAvailability { instrument, reason, .. }
                if instrument == "N" && reason.contains("2020-01-03")
        ));
        let clean = report.get("clean").unwrap();
        assert!(clean.rebalanced.totals.iter().all(|t| t.is_finite()));
    }

    #[test]
    fn test_reference_problems_abort_batch() {
        let store = store(&[("A", &[])]);
        let specs = vec![PortfolioSpec::new("p", &["A"], &[1.0])];
        let err = Simulator::default().run(&store, &specs).unwrap_err();
        assert!(matches!(
            err,
            SimError::DataAvailability { portfolio, .. } if portfolio == REFERENCE_SCOPE
        ));

        let config = SimulationConfig {
            reference: Some("SPY".into()),
            ..Default::default()
        };
        assert!(Simulator::new(config).run(&store, &specs).is_err());
        assert!(Simulator::default().run(&store, &[]).is_err());
    }

    #[test]
    fn test_benchmark_uses_its_own_budget() {
        let a = [(d(2024, 1, 2), 10.0), (d(2024, 1, 3), 12.0)];
        let v = [(d(2024, 1, 2), 400.0), (d(2024, 1, 3), 440.0)];
        let store = store(&[("A", &a), ("VOO", &v)]);
        let specs =
            vec![PortfolioSpec::new("p", &["A"], &[1.0]).with_benchmark("VOO", Some(5_000.0))];
        let report = Simulator::default().run(&store, &specs).unwrap();
        let bench = report.get("p").unwrap().benchmark.as_ref().unwrap();
        assert_eq!(bench.budget, 5_000.0);
        assert!((bench.values[1] - 5_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_policy_run_lookup_by_name() {
        let a = [(d(2024, 1, 2), 10.0)];
        let store = store(&[("A", &a)]);
        let specs = vec![PortfolioSpec::new("p", &["A"], &[1.0]).with_names(&["Alpha"])];
        let report = Simulator::default().run(&store, &specs).unwrap();
        let result = report.get("p").unwrap();
        assert!(result.rebalanced.series("Alpha").is_some());
        assert!(result.rebalanced.series("A").is_some());
        assert_eq!(
            result.dated_values(Policy::BuyAndHold, "A").unwrap(),
            vec![(d(2024, 1, 2), 10_000.0)]
        );
        assert_eq!(result.total_on(Policy::Rebalanced, d(2024, 1, 2)), Some(10_000.0));
    }
}
