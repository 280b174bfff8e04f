use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use common::time::days_before;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::entity::EntityKey;
use crate::error::{EngineResult, ValidationError};
use crate::observation::{ObservationStore, PriceObservation};
use crate::statistics::welford::{Trend, WindowAccumulator};

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// The lowest-priced observation in a window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BestObservation {
    pub observed_at: DateTime<Utc>,
    pub price: f64,
}

impl BestObservation {
    pub fn date(&self) -> NaiveDate {
        self.observed_at.date_naive()
    }
}

/// Descriptive statistics for one entity over a trailing window.
///
/// An empty window is a valid result: `count == 0`, numeric fields are zero and
/// the optional fields are `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub entity: EntityKey,
    pub window_days: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub coefficient_of_variation: f64,
    pub trend: Trend,
    pub first_price: Option<f64>,
    pub latest_price: Option<f64>,
    pub price_change_percent: f64,
    pub best_observation: Option<BestObservation>,
}

impl StatisticsSnapshot {
    pub fn empty(
        entity: EntityKey,
        window_days: u32,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            entity,
            window_days,
            window_start,
            window_end,
            count: 0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            std_dev: 0.0,
            coefficient_of_variation: 0.0,
            trend: Trend::Stable,
            first_price: None,
            latest_price: None,
            price_change_percent: 0.0,
            best_observation: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn from_accumulator(
        entity: EntityKey,
        window_days: u32,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        acc: &WindowAccumulator,
    ) -> Self {
        if acc.is_empty() {
            return Self::empty(entity, window_days, window_start, window_end);
        }

        Self {
            entity,
            window_days,
            window_start,
            window_end,
            count: acc.count(),
            min: acc.min(),
            max: acc.max(),
            mean: acc.mean(),
            std_dev: acc.std_dev(),
            coefficient_of_variation: acc.coefficient_of_variation(),
            trend: acc.trend(),
            first_price: acc.first(),
            latest_price: acc.last(),
            price_change_percent: acc.change_percent(),
            best_observation: acc.best().cloned(),
        }
    }

    /// Summarizes an already-loaded window. `history` must be ascending by time.
    pub fn from_history(
        entity: EntityKey,
        window_days: u32,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        history: &[PriceObservation],
    ) -> Self {
        let mut acc = WindowAccumulator::new();
        for o in history {
            acc.push(o.price, o.observed_at);
        }
        Self::from_accumulator(entity, window_days, window_start, window_end, &acc)
    }
}

pub(crate) fn window_start(now: DateTime<Utc>, window_days: u32) -> EngineResult<DateTime<Utc>> {
    if window_days == 0 {
        return Err(ValidationError::InvalidWindow(window_days).into());
    }
    Ok(days_before(now, u64::from(window_days)))
}

/// Read-only statistics over the observation log. Computed on demand.
pub struct StatisticsEngine {
    observations: Arc<ObservationStore>,
}

impl StatisticsEngine {
    pub fn new(observations: Arc<ObservationStore>) -> Self {
        Self { observations }
    }

    /// Single pass over the window `[now - window_days, now]`.
    #[instrument(skip(self), target = "statistics", fields(entity = %entity))]
    pub async fn summarize(
        &self,
        entity: &EntityKey,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<StatisticsSnapshot> {
        let start = window_start(now, window_days)?;

        let mut acc = WindowAccumulator::new();
        let mut rows = self.observations.stream(entity, start);

        while let Some(o) = rows.try_next().await? {
            if o.observed_at > now {
                break;
            }
            acc.push(o.price, o.observed_at);
        }

        debug!(count = acc.count(), "window summarized");

        Ok(StatisticsSnapshot::from_accumulator(
            entity.clone(),
            window_days,
            start,
            now,
            &acc,
        ))
    }

    /// Lowest observed price in the window; ties go to the earliest observation.
    pub async fn best_time_to_book(
        &self,
        entity: &EntityKey,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<BestObservation>> {
        Ok(self
            .summarize(entity, window_days, now)
            .await?
            .best_observation)
    }
}
