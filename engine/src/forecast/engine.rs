use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::time::days_before;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::entity::EntityKey;
use crate::error::{EngineResult, ValidationError};
use crate::forecast::strategy::{ForecastPoint, ForecastStrategy};
use crate::observation::{ObservationStore, PriceObservation};
use crate::statistics::engine::window_start;
use crate::statistics::{StatisticsSnapshot, Trend};

#[derive(Clone, Debug)]
pub struct ForecastConfig {
    /// Observations required in the lookback window before forecasting.
    pub min_observations: usize,
    pub confidence_floor: f64,
    pub confidence_ceiling: f64,
    /// Requests beyond this horizon are clamped.
    pub max_days_ahead: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_observations: 7,
            confidence_floor: 50.0,
            confidence_ceiling: 95.0,
            max_days_ahead: 90,
        }
    }
}

/// `100 - cv * 100`, clamped to `[floor, ceiling]`. Non-finite input maps to the floor.
pub fn confidence_from_cv(cv: f64, floor: f64, ceiling: f64) -> f64 {
    if !cv.is_finite() {
        return floor;
    }
    (100.0 - cv * 100.0).clamp(floor, ceiling)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub entity: EntityKey,
    pub strategy: String,
    pub generated_at: DateTime<Utc>,
    pub lookback_days: u32,
    pub points: Vec<ForecastPoint>,
    /// 0-100; lower for more volatile history.
    pub confidence: f64,
    pub best_day_index: usize,
    pub best_day_date: NaiveDate,
    pub best_day_price: f64,
    pub last_known_price: f64,
    /// `last_known_price - best_day_price`, never negative.
    pub estimated_savings: f64,
    pub trend: Trend,
}

/// Forecast outcome. Too little history is an expected result, not an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Forecast {
    Ready(ForecastResult),
    InsufficientData {
        entity: EntityKey,
        observations: usize,
        required: usize,
    },
}

impl Forecast {
    pub fn ready(&self) -> Option<&ForecastResult> {
        match self {
            Forecast::Ready(r) => Some(r),
            Forecast::InsufficientData { .. } => None,
        }
    }
}

/// Pure forecasting step over an already-loaded, ascending history.
///
/// Shared by the live engine and the backtesting harness.
#[allow(clippy::too_many_arguments)]
pub fn forecast_from_history(
    strategy: &dyn ForecastStrategy,
    config: &ForecastConfig,
    entity: &EntityKey,
    history: &[PriceObservation],
    lookback_days: u32,
    start_date: NaiveDate,
    days_ahead: u32,
    generated_at: DateTime<Utc>,
) -> Forecast {
    let Some(last) = history.last() else {
        return Forecast::InsufficientData {
            entity: entity.clone(),
            observations: 0,
            required: config.min_observations,
        };
    };

    if history.len() < config.min_observations {
        return Forecast::InsufficientData {
            entity: entity.clone(),
            observations: history.len(),
            required: config.min_observations,
        };
    }

    let days_ahead = days_ahead.min(config.max_days_ahead);
    let window_begin = days_before(generated_at, u64::from(lookback_days));
    let stats = StatisticsSnapshot::from_history(
        entity.clone(),
        lookback_days,
        window_begin,
        generated_at,
        history,
    );

    let points = strategy.forecast(history, &stats, start_date, days_ahead);

    // Scan for the cheapest day; earliest wins ties.
    let best = points
        .iter()
        .enumerate()
        .fold(None::<(usize, &ForecastPoint)>, |acc, (i, p)| match acc {
            Some((_, b)) if b.predicted_price <= p.predicted_price => acc,
            _ => Some((i, p)),
        });

    let Some((best_day_index, best)) = best else {
        // A strategy that yields nothing for a non-empty horizon has nothing to offer.
        return Forecast::InsufficientData {
            entity: entity.clone(),
            observations: history.len(),
            required: config.min_observations,
        };
    };

    let best_day_date = best.date;
    let best_day_price = best.predicted_price;

    Forecast::Ready(ForecastResult {
        entity: entity.clone(),
        strategy: strategy.name().to_string(),
        generated_at,
        lookback_days,
        confidence: confidence_from_cv(
            stats.coefficient_of_variation,
            config.confidence_floor,
            config.confidence_ceiling,
        ),
        best_day_index,
        best_day_date,
        best_day_price,
        last_known_price: last.price,
        estimated_savings: (last.price - best_day_price).max(0.0),
        trend: stats.trend,
        points,
    })
}

/// Produces forecasts from the observation log via a pluggable strategy.
pub struct ForecastEngine {
    observations: Arc<ObservationStore>,
    strategy: Arc<dyn ForecastStrategy>,
    config: ForecastConfig,
}

impl ForecastEngine {
    pub fn new(
        observations: Arc<ObservationStore>,
        strategy: Arc<dyn ForecastStrategy>,
        config: ForecastConfig,
    ) -> Self {
        Self {
            observations,
            strategy,
            config,
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn strategy(&self) -> &dyn ForecastStrategy {
        self.strategy.as_ref()
    }

    /// Forecasts `days_ahead` days starting tomorrow (relative to `now`),
    /// from the trailing `lookback_days` of history.
    #[instrument(skip(self), target = "forecast", fields(entity = %entity, strategy = self.strategy.name()))]
    pub async fn predict(
        &self,
        entity: &EntityKey,
        days_ahead: u32,
        lookback_days: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<Forecast> {
        if days_ahead == 0 {
            return Err(ValidationError::InvalidWindow(days_ahead).into());
        }
        let since = window_start(now, lookback_days)?;

        let mut history = self.observations.query(entity, since).await?;
        history.retain(|o| o.observed_at <= now);

        let start_date = now.date_naive() + Duration::days(1);

        let forecast = forecast_from_history(
            self.strategy.as_ref(),
            &self.config,
            entity,
            &history,
            lookback_days,
            start_date,
            days_ahead,
            now,
        );

        match &forecast {
            Forecast::Ready(r) => debug!(
                confidence = r.confidence,
                best_day = %r.best_day_date,
                best_price = r.best_day_price,
                "forecast ready"
            ),
            Forecast::InsufficientData { observations, .. } => {
                debug!(observations, "insufficient data for forecast")
            }
        }

        Ok(forecast)
    }
}
