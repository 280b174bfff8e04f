use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::statistics::engine::BestObservation;

/// First-to-last change (in percent) beyond which a window counts as trending.
pub const TREND_THRESHOLD_PERCENT: f64 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Percentage change from `first` to `last`. A zero baseline yields 0 when the
/// price stayed at zero and +100% for any rise from zero.
pub fn change_percent(first: f64, last: f64) -> f64 {
    if first > 0.0 {
        (last - first) / first * 100.0
    } else if last > 0.0 {
        100.0
    } else {
        0.0
    }
}

/// Trend compares the earliest and latest price only; no regression.
pub fn classify_trend(first: f64, last: f64) -> Trend {
    let pct = change_percent(first, last);
    if pct > TREND_THRESHOLD_PERCENT {
        Trend::Increasing
    } else if pct < -TREND_THRESHOLD_PERCENT {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Single-pass accumulator over observations pushed in ascending time order.
///
/// Variance uses Welford's update so large price magnitudes do not lose
/// precision to cancellation.
#[derive(Clone, Debug, Default)]
pub struct WindowAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    first: Option<f64>,
    last: Option<f64>,
    best: Option<BestObservation>,
}

impl WindowAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, price: f64, observed_at: DateTime<Utc>) {
        self.count += 1;

        let delta = price - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (price - self.mean);

        if self.count == 1 {
            self.min = price;
            self.max = price;
            self.first = Some(price);
        } else {
            self.min = self.min.min(price);
            self.max = self.max.max(price);
        }
        self.last = Some(price);

        // Strict `<` keeps the earliest observation on ties (input is ascending).
        let better = match &self.best {
            Some(b) => price < b.price,
            None => true,
        };
        if better {
            self.best = Some(BestObservation { observed_at, price });
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Mean clamped into `[min, max]` to absorb floating-point drift.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.mean.clamp(self.min, self.max)
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0).sqrt()
    }

    /// `std_dev / mean`; zero when the mean is zero.
    pub fn coefficient_of_variation(&self) -> f64 {
        let mean = self.mean();
        if mean > 0.0 { self.std_dev() / mean } else { 0.0 }
    }

    pub fn first(&self) -> Option<f64> {
        self.first
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn best(&self) -> Option<&BestObservation> {
        self.best.as_ref()
    }

    pub fn trend(&self) -> Trend {
        match (self.first, self.last) {
            (Some(first), Some(last)) => classify_trend(first, last),
            _ => Trend::Stable,
        }
    }

    pub fn change_percent(&self) -> f64 {
        match (self.first, self.last) {
            (Some(first), Some(last)) => change_percent(first, last),
            _ => 0.0,
        }
    }
}
