use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::alerts::model::{AlertRequest, AlertStatus, PriceAlert};
use crate::entity::EntityKey;

/// Persistence seam for alerts.
///
/// Every status change goes through [`AlertRepository::transition`], which only
/// applies when the row still carries the expected prior status.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Inserts a new ACTIVE alert, or updates the user's existing ACTIVE alert
    /// for the same entity in place. Returns the resulting row.
    async fn upsert_active(
        &self,
        request: &AlertRequest,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PriceAlert>;

    async fn fetch_by_id(&self, alert_id: &Uuid) -> anyhow::Result<Option<PriceAlert>>;

    async fn fetch_active_for_entity(&self, entity: &EntityKey)
    -> anyhow::Result<Vec<PriceAlert>>;

    /// Compare-and-swap status move. `Ok(false)` means another writer got there
    /// first.
    ///
    /// `triggered_price` is recorded when moving to TRIGGERED.
    async fn transition(
        &self,
        alert_id: &Uuid,
        from: AlertStatus,
        to: AlertStatus,
        triggered_price: Option<f64>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Compare-and-swap move from `from` back to ACTIVE. Clears the trigger
    /// record and replaces the expiry with `expires_at`. `Ok(false)` also covers
    /// another ACTIVE alert already occupying the (user, entity) key.
    async fn reactivate(
        &self,
        alert_id: &Uuid,
        from: AlertStatus,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// ACTIVE alerts whose expiry has passed become EXPIRED. Returns their ids.
    async fn expire_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>>;

    /// Distinct entities with at least one ACTIVE, unexpired alert.
    async fn tracked_entities(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<EntityKey>>;
}
