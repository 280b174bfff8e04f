use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::observation::PriceObservation;
use crate::statistics::StatisticsSnapshot;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted_price: f64,
}

/// Replaceable forecasting model.
///
/// `history` is ascending by time and holds at least the engine's minimum
/// number of observations; `stats` summarizes exactly that history.
/// Implementations return one point per day starting at `start_date`.
pub trait ForecastStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn forecast(
        &self,
        history: &[PriceObservation],
        stats: &StatisticsSnapshot,
        start_date: NaiveDate,
        days_ahead: u32,
    ) -> Vec<ForecastPoint>;
}

/// Average deviation from `mean` per weekday (Mon = 0). Weekdays without
/// samples get no adjustment.
pub(crate) fn weekday_factors(history: &[PriceObservation], mean: f64) -> [f64; 7] {
    let mut sums = [0.0f64; 7];
    let mut counts = [0u32; 7];

    for o in history {
        let wd = o.observed_at.weekday().num_days_from_monday() as usize;
        sums[wd] += o.price - mean;
        counts[wd] += 1;
    }

    let mut out = [0.0f64; 7];
    for wd in 0..7 {
        if counts[wd] > 0 {
            out[wd] = sums[wd] / f64::from(counts[wd]);
        }
    }
    out
}

fn factor_for(factors: &[f64; 7], date: NaiveDate) -> f64 {
    factors[date.weekday().num_days_from_monday() as usize]
}

fn horizon(start_date: NaiveDate, days_ahead: u32) -> impl Iterator<Item = NaiveDate> {
    start_date.iter_days().take(days_ahead as usize)
}

/// Linear trend from the first to the last observation plus a day-of-week
/// seasonal adjustment.
///
/// Both endpoints are de-seasonalized before the slope is taken, so a window
/// that happens to end on an expensive weekday does not inflate the baseline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrendSeasonalStrategy;

impl ForecastStrategy for TrendSeasonalStrategy {
    fn name(&self) -> &'static str {
        "trend_seasonal"
    }

    fn forecast(
        &self,
        history: &[PriceObservation],
        stats: &StatisticsSnapshot,
        start_date: NaiveDate,
        days_ahead: u32,
    ) -> Vec<ForecastPoint> {
        let (Some(first), Some(last)) = (history.first(), history.last()) else {
            return Vec::new();
        };

        let factors = weekday_factors(history, stats.mean);

        let first_base = first.price - factor_for(&factors, first.observed_at.date_naive());
        let last_date = last.observed_at.date_naive();
        let last_base = last.price - factor_for(&factors, last_date);

        let span_days =
            (last.observed_at - first.observed_at).num_seconds() as f64 / 86_400.0;
        let slope = if span_days > 0.0 {
            (last_base - first_base) / span_days
        } else {
            0.0
        };

        horizon(start_date, days_ahead)
            .map(|date| {
                let k = (date - last_date).num_days() as f64;
                let predicted = last_base + slope * k + factor_for(&factors, date);
                ForecastPoint {
                    date,
                    predicted_price: predicted.max(0.0),
                }
            })
            .collect()
    }
}

/// Simple exponential smoothing of the de-seasonalized series, re-seasonalized
/// per forecast day. Flat level, no trend term.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialSmoothingStrategy {
    pub alpha: f64,
}

impl Default for ExponentialSmoothingStrategy {
    fn default() -> Self {
        Self { alpha: 0.3 }
    }
}

impl ForecastStrategy for ExponentialSmoothingStrategy {
    fn name(&self) -> &'static str {
        "exponential_smoothing"
    }

    fn forecast(
        &self,
        history: &[PriceObservation],
        stats: &StatisticsSnapshot,
        start_date: NaiveDate,
        days_ahead: u32,
    ) -> Vec<ForecastPoint> {
        if history.is_empty() {
            return Vec::new();
        }

        let alpha = self.alpha.clamp(0.01, 1.0);
        let factors = weekday_factors(history, stats.mean);

        let mut level: Option<f64> = None;
        for o in history {
            let x = o.price - factor_for(&factors, o.observed_at.date_naive());
            level = Some(match level {
                Some(l) => alpha * x + (1.0 - alpha) * l,
                None => x,
            });
        }
        let level = level.unwrap_or(stats.mean);

        horizon(start_date, days_ahead)
            .map(|date| ForecastPoint {
                date,
                predicted_price: (level + factor_for(&factors, date)).max(0.0),
            })
            .collect()
    }
}
