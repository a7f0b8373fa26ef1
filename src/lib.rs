//! Rebalancer - periodic-rebalancing portfolio simulator.
//!
//! # Overview
//!
//! Given daily closing prices for a set of instruments and one or more
//! weighted portfolios, the simulator replays history twice per portfolio:
//!
//! - **Rebalanced**: every N calendar months (on dates that are trading days
//!   of the reference instrument) holdings are reset to their target weights.
//! - **Buy and hold**: the initial allocation is left to drift.
//!
//! It reports the dollar value of every holding and the portfolio total on
//! every trading day, plus an optional benchmark bought with its own budget.
//!
//! Missing prices are handled by a fixed fallback ladder (hold the last close
//! forward, or re-anchor an instrument that was not yet listed), and every
//! use of it is counted so approximations are visible.
//!
//! # Quick Start
//!
//! ```
//! use chrono::NaiveDate;
//! use rebalancer::{PortfolioSpec, PriceSeries, PriceStore, Simulator, SimulationConfig};
//!
//! let d = |m, day| NaiveDate::from_ymd_opt(2020, m, day).unwrap();
//! let mut store = PriceStore::new();
//! let a = vec![(d(1, 2), 100.0), (d(7, 2), 200.0), (d(12, 1), 400.0)];
//! let b = vec![(d(1, 2), 50.0), (d(7, 2), 50.0), (d(12, 1), 50.0)];
//! store.insert("A", PriceSeries::from_pairs(a));
//! store.insert("B", PriceSeries::from_pairs(b));
//!
//! let specs = vec![PortfolioSpec::new("half-half", &["A", "B"], &[0.5, 0.5])];
//! let simulator = Simulator::new(SimulationConfig {
//!     initial_budget: 10_000.0,
//!     rebalance_months: 6,
//!     ..Default::default()
//! });
//! let report = simulator.run(&store, &specs).unwrap();
//! let result = report.get("half-half").unwrap();
//!
//! assert_eq!(result.rebalanced.final_total(), Some(22_500.0));
//! assert_eq!(result.buy_and_hold.final_total(), Some(25_000.0));
//! ```
//!
//! # Configuration files
//!
//! The `rebalancer` binary reads a TOML file (see [`config::FileConfig`]):
//!
//! ```bash
//! rebalancer init
//! rebalancer run -c rebalancer.toml --export-dir out
//! ```

pub mod analytics;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod export;
pub mod growth;
pub mod schedule;
pub mod types;
pub mod viz;

pub use analytics::{PerformanceSummary, PolicyComparison, ResultFormatter};
pub use config::FileConfig;
pub use data::{load_csv, DataConfig, PriceStore};
pub use engine::{
    PolicyRun, PortfolioOutcome, PortfolioResult, SimulationConfig, SimulationReport, Simulator,
};
pub use error::{Result, SimError};
pub use growth::{FallbackStats, GrowthSource};
pub use schedule::RebalanceSchedule;
pub use types::{Instrument, Policy, Portfolio, PortfolioSpec, PricePoint, PriceSeries};
