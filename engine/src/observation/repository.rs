use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::entity::EntityKey;
use crate::observation::model::{InsertOutcome, NewObservation, PriceObservation};

/// Persistence seam for observations. Implementations only store and map rows;
/// validation happens in `ObservationStore`.
#[async_trait]
pub trait ObservationRepository: Send + Sync {
    /// Inserts one row; an existing natural key (entity, observed_at, source) is a no-op.
    async fn insert(
        &self,
        obs: &NewObservation,
        recorded_at: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    /// Inserts all rows atomically. Returns `(inserted, duplicates)`.
    async fn insert_batch(
        &self,
        obs: &[NewObservation],
        recorded_at: DateTime<Utc>,
    ) -> Result<(u64, u64)>;

    /// Observations with `observed_at >= since`, ascending by `(observed_at, id)`.
    /// Each call starts a fresh scan.
    fn stream_since<'a>(
        &'a self,
        entity: &EntityKey,
        since: DateTime<Utc>,
    ) -> BoxStream<'a, Result<PriceObservation>>;

    async fn latest(&self, entity: &EntityKey) -> Result<Option<PriceObservation>>;

    /// Deletes rows with `observed_at < cutoff`. Returns the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
