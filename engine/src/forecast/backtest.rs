//! Hold-out backtesting: forecast the last N days from the history before them
//! and compare against what was actually observed.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use common::time::date_days_before;
use serde::{Deserialize, Serialize};

use crate::entity::EntityKey;
use crate::forecast::engine::{Forecast, ForecastConfig, forecast_from_history};
use crate::forecast::strategy::ForecastStrategy;
use crate::observation::PriceObservation;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub entity: EntityKey,
    pub strategy: String,
    pub holdout_days: u32,
    pub training_points: usize,
    /// Held-out days that had both an observation and a prediction.
    pub samples: usize,
    /// Mean absolute error, in currency units.
    pub mae: f64,
    /// Mean absolute percentage error over days with a non-zero actual price.
    pub mape: Option<f64>,
    /// Confidence the engine reported for the held-out horizon.
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BacktestOutcome {
    Completed(BacktestReport),
    /// Too little training history before the hold-out, or nothing held out.
    InsufficientData {
        training_points: usize,
        holdout_points: usize,
    },
}

/// Runs one hold-out backtest over `history` (ascending by time).
///
/// The hold-out covers the last `holdout_days` calendar days that end on the
/// date of the newest observation. Training uses up to `lookback_days` before it.
/// Several observations on one day are averaged into a single actual.
pub fn backtest(
    strategy: &dyn ForecastStrategy,
    config: &ForecastConfig,
    entity: &EntityKey,
    history: &[PriceObservation],
    holdout_days: u32,
    lookback_days: u32,
) -> BacktestOutcome {
    let Some(last) = history.last() else {
        return BacktestOutcome::InsufficientData {
            training_points: 0,
            holdout_points: 0,
        };
    };
    if holdout_days == 0 {
        return BacktestOutcome::InsufficientData {
            training_points: history.len(),
            holdout_points: 0,
        };
    }

    let last_date = last.observed_at.date_naive();
    let holdout_start = date_days_before(last_date, u64::from(holdout_days) - 1);
    let training_start = date_days_before(holdout_start, u64::from(lookback_days));

    let split = history.partition_point(|o| o.observed_at.date_naive() < holdout_start);
    let (before, holdout) = history.split_at(split);
    let training: Vec<PriceObservation> = before
        .iter()
        .filter(|o| o.observed_at.date_naive() >= training_start)
        .cloned()
        .collect();

    if holdout.is_empty() {
        return BacktestOutcome::InsufficientData {
            training_points: training.len(),
            holdout_points: 0,
        };
    }

    let Some(generated_at) = training.last().map(|o| o.observed_at) else {
        return BacktestOutcome::InsufficientData {
            training_points: 0,
            holdout_points: holdout.len(),
        };
    };

    let forecast = forecast_from_history(
        strategy,
        config,
        entity,
        &training,
        lookback_days,
        holdout_start,
        holdout_days,
        generated_at,
    );

    let result = match forecast {
        Forecast::Ready(r) => r,
        Forecast::InsufficientData { .. } => {
            return BacktestOutcome::InsufficientData {
                training_points: training.len(),
                holdout_points: holdout.len(),
            };
        }
    };

    let mut actual_by_day: BTreeMap<NaiveDate, (f64, u32)> = BTreeMap::new();
    for o in holdout {
        let e = actual_by_day.entry(o.observed_at.date_naive()).or_default();
        e.0 += o.price;
        e.1 += 1;
    }

    let mut abs_sum = 0.0;
    let mut pct_sum = 0.0;
    let mut pct_n = 0usize;
    let mut samples = 0usize;

    for p in &result.points {
        let Some((sum, n)) = actual_by_day.get(&p.date) else {
            continue;
        };
        let actual = sum / f64::from(*n);
        let err = (p.predicted_price - actual).abs();
        abs_sum += err;
        samples += 1;
        if actual > 0.0 {
            pct_sum += err / actual * 100.0;
            pct_n += 1;
        }
    }

    if samples == 0 {
        return BacktestOutcome::InsufficientData {
            training_points: training.len(),
            holdout_points: holdout.len(),
        };
    }

    BacktestOutcome::Completed(BacktestReport {
        entity: entity.clone(),
        strategy: strategy.name().to_string(),
        holdout_days,
        training_points: training.len(),
        samples,
        mae: abs_sum / samples as f64,
        mape: (pct_n > 0).then(|| pct_sum / pct_n as f64),
        confidence: result.confidence,
    })
}
