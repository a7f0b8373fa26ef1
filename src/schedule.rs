//! Rebalance schedule derivation.
//!
//! Calendar dates are generated every `cadence_months` months from the first
//! trading date and kept only when they are themselves trading dates. A
//! calendar date that lands on a weekend or holiday is dropped, not shifted.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ordered subset of the trading-date axis at which holdings are reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceSchedule {
    dates: Vec<NaiveDate>,
}

impl RebalanceSchedule {
    /// Derive the schedule from the trading-date axis.
    ///
    /// The first trading date itself is never an event; `cadence_months == 0`
    /// yields an empty schedule.
    pub fn build(trading_dates: &[NaiveDate], cadence_months: u32) -> Self {
        let (first, last) = match (trading_dates.first(), trading_dates.last()) {
            (Some(&f), Some(&l)) if cadence_months > 0 => (f, l),
            _ => return Self::default(),
        };

        let mut dates = Vec::new();
        let mut k: u32 = 1;
        // Offsets are always taken from `first` so month-end clamping
        // (Jan 31 -> Feb 29) does not drift later candidates.
        while let Some(candidate) = cadence_months
            .checked_mul(k)
            .and_then(|m| first.checked_add_months(Months::new(m)))
        {
            if candidate > last {
                break;
            }
            if trading_dates.binary_search(&candidate).is_ok() {
                dates.push(candidate);
            } else {
                debug!("Calendar rebalance date {} is not a trading day, dropped", candidate);
            }
            k += 1;
        }

        Self { dates }
    }

    /// Explicit schedule; dates outside `trading_dates` are discarded.
    pub fn from_dates(trading_dates: &[NaiveDate], mut dates: Vec<NaiveDate>) -> Self {
        dates.sort_unstable();
        dates.dedup();
        dates.retain(|d| trading_dates.binary_search(d).is_ok());
        Self { dates }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.binary_search(&date).is_ok()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_schedule_intersects_trading_dates() {
        let dates = vec![
            d(2020, 1, 2),
            d(2020, 3, 5),
            d(2020, 7, 2),
            d(2020, 10, 1),
            d(2021, 1, 4),
            d(2021, 7, 2),
        ];
        let schedule = RebalanceSchedule::build(&dates, 6);
        // 2021-01-02 is a Saturday: dropped, not moved to 2021-01-04.
        assert_eq!(schedule.dates(), &[d(2020, 7, 2), d(2021, 7, 2)]);
        assert!(schedule.contains(d(2020, 7, 2)));
        assert!(!schedule.contains(d(2021, 1, 4)));
    }

    #[test]
    fn test_short_range_gives_empty_schedule() {
        let dates = vec![d(2024, 1, 2), d(2024, 2, 1), d(2024, 3, 1)];
        assert!(RebalanceSchedule::build(&dates, 6).is_empty());
        assert!(RebalanceSchedule::build(&[], 6).is_empty());
        assert!(RebalanceSchedule::build(&dates, 0).is_empty());
    }

    #[test]
    fn test_month_end_does_not_drift() {
        let dates = vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 29), d(2024, 3, 31)];
        let schedule = RebalanceSchedule::build(&dates, 1);
        assert_eq!(schedule.dates(), &[d(2024, 2, 29), d(2024, 3, 31)]);
    }

    #[test]
    fn test_from_dates_filters_non_trading() {
        let axis = vec![d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)];
        let schedule =
            RebalanceSchedule::from_dates(&axis, vec![d(2024, 1, 4), d(2024, 1, 1), d(2024, 1, 3)]);
        assert_eq!(schedule.dates(), &[d(2024, 1, 3), d(2024, 1, 4)]);
    }
}
