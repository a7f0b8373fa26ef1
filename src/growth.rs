//! Per-instrument growth factors with missing-data fallback.
//!
//! A growth factor is `price(date) / price(period date zero)`. Instruments
//! can have holes or start trading after the portfolio's reference date, so
//! each evaluation walks a fixed ladder:
//!
//! 1. both the date and period date zero are in the series: direct ratio;
//! 2. the date is missing but period date zero is present: the last observed
//!    close is held forward;
//! 3. period date zero itself is missing: the instrument is re-anchored on
//!    its own last observed close, which makes it flat (factor 1) until it
//!    has history and then grows from that anchor.
//!
//! Steps 2 and 3 are approximations and cause drift when instruments with
//! very different listing dates are mixed; they are counted in
//! [`FallbackStats`] and logged at debug level instead of being silently
//! interpolated away.

use crate::types::{PricePoint, PriceSeries};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which rung of the ladder produced a factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowthSource {
    /// Close on the date divided by close on period date zero.
    Direct,
    /// Date missing; last observed close held forward.
    HeldForward,
    /// Period date zero missing; ratio against the instrument's own anchor.
    Reanchored,
    /// No close observed yet; treated as flat.
    Unlisted,
}

impl GrowthSource {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, GrowthSource::Direct)
    }
}

/// A growth factor and where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Growth {
    pub factor: f64,
    pub source: GrowthSource,
}

/// Counters for fallback ladder usage on one instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackStats {
    pub direct: usize,
    pub held_forward: usize,
    pub reanchored: usize,
    pub unlisted: usize,
}

impl FallbackStats {
    pub fn record(&mut self, source: GrowthSource) {
        match source {
            GrowthSource::Direct => self.direct += 1,
            GrowthSource::HeldForward => self.held_forward += 1,
            GrowthSource::Reanchored => self.reanchored += 1,
            GrowthSource::Unlisted => self.unlisted += 1,
        }
    }

    /// Number of evaluations that did not use a direct ratio.
    pub fn fallbacks(&self) -> usize {
        self.held_forward + self.reanchored + self.unlisted
    }

    pub fn merge(&mut self, other: &FallbackStats) {
        self.direct += other.direct;
        self.held_forward += other.held_forward;
        self.reanchored += other.reanchored;
        self.unlisted += other.unlisted;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Anchor {
    /// Close on period date zero.
    PeriodZero(PricePoint),
    /// Period date zero missing, anchor not yet chosen.
    Pending,
    /// Period date zero missing, anchored on the instrument's own close.
    Local(PricePoint),
}

/// Sequential growth-factor state for one instrument within one run.
///
/// Dates passed to [`advance`](Self::advance) must be non-decreasing; the
/// tracker keeps a cursor into the series rather than searching each time.
#[derive(Debug, Clone)]
pub struct GrowthTracker<'a> {
    id: &'a str,
    series: &'a PriceSeries,
    cursor: usize,
    date: Option<NaiveDate>,
    last_seen: Option<PricePoint>,
    anchor: Anchor,
}

impl<'a> GrowthTracker<'a> {
    pub fn new(id: &'a str, series: &'a PriceSeries) -> Self {
        Self {
            id,
            series,
            cursor: 0,
            date: None,
            last_seen: None,
            anchor: Anchor::Pending,
        }
    }

    /// Move to `date`, updating the last observed close.
    pub fn advance(&mut self, date: NaiveDate) {
        let points = self.series.points();
        while self.cursor < points.len() && points[self.cursor].date <= date {
            self.last_seen = Some(points[self.cursor]);
            self.cursor += 1;
        }
        self.date = Some(date);
    }

    /// Start a new holding period at `period_zero` (must already be the
    /// current date, or earlier).
    pub fn reset_period(&mut self, period_zero: NaiveDate) {
        self.anchor = match self.series.price_on(period_zero) {
            Some(price) => Anchor::PeriodZero(PricePoint::new(period_zero, price)),
            None => Anchor::Pending,
        };
    }

    /// Last close observed on or before the current date.
    pub fn last_seen(&self) -> Option<&PricePoint> {
        self.last_seen.as_ref()
    }

    /// Growth factor at the current date relative to the period anchor.
    pub fn evaluate(&mut self) -> Growth {
        let traded_today = matches!(
            (self.last_seen, self.date),
            (Some(p), Some(d)) if p.date == d
        );

        match (self.anchor, self.last_seen) {
            (Anchor::PeriodZero(zero), Some(last)) => {
                let source = if traded_today {
                    GrowthSource::Direct
                } else {
                    debug!(
                        "{}: no close on {:?}, holding {} close forward",
                        self.id, self.date, last.date
                    );
                    GrowthSource::HeldForward
                };
                Growth {
                    factor: last.price / zero.price,
                    source,
                }
            }
            (Anchor::Pending, Some(last)) => {
                debug!(
                    "{}: period date zero missing, re-anchoring on {}",
                    self.id, last.date
                );
                self.anchor = Anchor::Local(last);
                Growth {
                    factor: 1.0,
                    source: GrowthSource::Reanchored,
                }
            }
            (Anchor::Local(anchor), Some(last)) => Growth {
                factor: last.price / anchor.price,
                source: GrowthSource::Reanchored,
            },
            (_, None) => {
                debug!("{}: no close on or before {:?}, flat", self.id, self.date);
                Growth {
                    factor: 1.0,
                    source: GrowthSource::Unlisted,
                }
            }
        }
    }
}
