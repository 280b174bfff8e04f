use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::logger::warn_if_slow;
use common::time::days_before;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use crate::entity::EntityKey;
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::metrics::counters::{Counters, bump};
use crate::observation::model::{BatchReport, InsertOutcome, NewObservation, PriceObservation};
use crate::observation::repository::ObservationRepository;

/// Ingestion and read facade over the observation log.
///
/// Owns validation; the repository below it only persists rows.
pub struct ObservationStore {
    repo: Arc<dyn ObservationRepository>,
    counters: Counters,
}

impl ObservationStore {
    pub fn new(repo: Arc<dyn ObservationRepository>, counters: Counters) -> Self {
        Self { repo, counters }
    }

    /// Validates and appends one observation. A repeated natural key is
    /// reported as `Duplicate`, not as an error.
    #[instrument(
        skip(self, obs),
        target = "observations",
        fields(entity = %obs.entity, price = obs.price)
    )]
    pub async fn record(&self, obs: NewObservation) -> EngineResult<InsertOutcome> {
        if let Err(e) = obs.validate() {
            bump(&self.counters.observations_rejected, 1);
            debug!(error = %e, "observation rejected");
            return Err(e.into());
        }

        let outcome = warn_if_slow("db_insert_observation", Duration::from_millis(50), async {
            self.repo.insert(&obs, Utc::now()).await
        })
        .await
        .map_err(EngineError::store)?;

        match outcome {
            InsertOutcome::Inserted => bump(&self.counters.observations_recorded, 1),
            InsertOutcome::Duplicate => {
                bump(&self.counters.observations_duplicate, 1);
                debug!("duplicate observation skipped");
            }
        }

        Ok(outcome)
    }

    /// Bulk insert. Invalid rows are listed in `rejected`, valid rows are
    /// written together, duplicates are counted and skipped.
    #[instrument(skip(self, batch), target = "observations", fields(size = batch.len()))]
    pub async fn record_batch(&self, batch: Vec<NewObservation>) -> EngineResult<BatchReport> {
        let mut report = BatchReport::default();
        let mut valid = Vec::with_capacity(batch.len());

        for (idx, obs) in batch.into_iter().enumerate() {
            match obs.validate() {
                Ok(()) => valid.push(obs),
                Err(e) => report.rejected.push((idx, e)),
            }
        }

        if !report.rejected.is_empty() {
            bump(&self.counters.observations_rejected, report.rejected.len() as u64);
            warn!(
                rejected = report.rejected.len(),
                "batch contained invalid observations"
            );
        }

        if valid.is_empty() {
            return Ok(report);
        }

        let (inserted, duplicates) =
            warn_if_slow("db_insert_observation_batch", Duration::from_millis(200), async {
                self.repo.insert_batch(&valid, Utc::now()).await
            })
            .await
            .map_err(EngineError::store)?;

        report.inserted = inserted;
        report.duplicates = duplicates;

        bump(&self.counters.observations_recorded, inserted);
        bump(&self.counters.observations_duplicate, duplicates);

        info!(inserted, duplicates, "observation batch recorded");
        Ok(report)
    }

    /// Lazy scan of one entity's observations since `since`, oldest first.
    /// Calling it again restarts the scan.
    pub fn stream<'a>(
        &'a self,
        entity: &EntityKey,
        since: DateTime<Utc>,
    ) -> BoxStream<'a, EngineResult<PriceObservation>> {
        self.repo
            .stream_since(entity, since)
            .map_err(EngineError::store)
            .boxed()
    }

    /// Materialized form of [`stream`](Self::stream).
    pub async fn query(
        &self,
        entity: &EntityKey,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<PriceObservation>> {
        warn_if_slow("db_query_observations", Duration::from_millis(200), async {
            self.stream(entity, since).try_collect().await
        })
        .await
    }

    pub async fn latest(&self, entity: &EntityKey) -> EngineResult<Option<PriceObservation>> {
        warn_if_slow("db_latest_observation", Duration::from_millis(50), async {
            self.repo.latest(entity).await
        })
        .await
        .map_err(EngineError::store)
    }

    /// Retention sweep: removes observations older than `days` before `now`.
    #[instrument(skip(self), target = "observations")]
    pub async fn purge_older_than(&self, days: u32, now: DateTime<Utc>) -> EngineResult<u64> {
        if days == 0 {
            return Err(ValidationError::InvalidWindow(days).into());
        }

        let cutoff = days_before(now, u64::from(days));

        let removed = warn_if_slow("db_purge_observations", Duration::from_millis(500), async {
            self.repo.delete_older_than(cutoff).await
        })
        .await
        .map_err(EngineError::store)?;

        bump(&self.counters.observations_purged, removed);
        info!(removed, %cutoff, "retention sweep complete");
        Ok(removed)
    }
}
