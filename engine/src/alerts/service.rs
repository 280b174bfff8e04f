use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::alerts::model::{AlertRequest, AlertStatus, PriceAlert};
use crate::alerts::repository::AlertRepository;
use crate::entity::EntityKey;
use crate::error::{EngineError, EngineResult};
use crate::metrics::counters::{Counters, bump};

/// Alert lifecycle operations outside of matching.
pub struct AlertService {
    repo: Arc<dyn AlertRepository>,
    counters: Counters,
}

impl AlertService {
    pub fn new(repo: Arc<dyn AlertRepository>, counters: Counters) -> Self {
        Self { repo, counters }
    }

    /// Creates an ACTIVE alert, or updates the user's existing ACTIVE alert for
    /// the same entity. Never leaves two ACTIVE alerts for one (user, entity).
    #[instrument(
        skip(self, request),
        target = "alerts",
        fields(user_id = %request.user_id, entity = %request.entity)
    )]
    pub async fn create_or_update_alert(
        &self,
        request: AlertRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<PriceAlert> {
        request.validate()?;

        let alert = self
            .repo
            .upsert_active(&request, now)
            .await
            .map_err(EngineError::store)?;

        info!(alert_id = %alert.id, target = alert.target_price, "alert saved");
        Ok(alert)
    }

    pub async fn get(&self, alert_id: Uuid) -> EngineResult<PriceAlert> {
        self.repo
            .fetch_by_id(&alert_id)
            .await
            .map_err(EngineError::store)?
            .ok_or(EngineError::AlertNotFound { alert_id })
    }

    /// ACTIVE -> CANCELLED.
    #[instrument(skip(self), target = "alerts")]
    pub async fn cancel(&self, alert_id: Uuid, now: DateTime<Utc>) -> EngineResult<PriceAlert> {
        self.move_status(alert_id, &[AlertStatus::Active], AlertStatus::Cancelled, now)
            .await
    }

    /// TRIGGERED or EXPIRED -> ACTIVE. An expiry at or before `now` is dropped;
    /// a future expiry is kept. Fails with a conflict when the user already has
    /// another ACTIVE alert for the entity.
    #[instrument(skip(self), target = "alerts")]
    pub async fn reactivate(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<PriceAlert> {
        let current = self.get(alert_id).await?;

        if !matches!(current.status, AlertStatus::Triggered | AlertStatus::Expired) {
            warn!(%alert_id, from = %current.status, "reactivation not allowed");
            return Err(EngineError::ConcurrencyConflict { alert_id });
        }

        let expires_at = current.expires_at.filter(|at| *at > now);
        let applied = self
            .repo
            .reactivate(&alert_id, current.status, expires_at, now)
            .await
            .map_err(EngineError::store)?;

        if !applied {
            return Err(EngineError::ConcurrencyConflict { alert_id });
        }

        info!(
            %alert_id,
            from = %current.status,
            expiry_cleared = current.expires_at.is_some() && expires_at.is_none(),
            "alert reactivated"
        );
        self.get(alert_id).await
    }

    /// Moves every ACTIVE alert past its expiry to EXPIRED.
    #[instrument(skip(self), target = "alerts")]
    pub async fn expire_due(&self, now: DateTime<Utc>) -> EngineResult<Vec<Uuid>> {
        let expired = self.repo.expire_due(now).await.map_err(EngineError::store)?;
        if !expired.is_empty() {
            bump(&self.counters.alerts_expired, expired.len() as u64);
            info!(count = expired.len(), "alerts expired");
        }
        Ok(expired)
    }

    /// Entities that currently have at least one ACTIVE, unexpired alert.
    pub async fn tracked_entities(&self, now: DateTime<Utc>) -> EngineResult<Vec<EntityKey>> {
        self.repo
            .tracked_entities(now)
            .await
            .map_err(EngineError::store)
    }

    async fn move_status(
        &self,
        alert_id: Uuid,
        allowed_from: &[AlertStatus],
        to: AlertStatus,
        now: DateTime<Utc>,
    ) -> EngineResult<PriceAlert> {
        let current = self.get(alert_id).await?;

        if !allowed_from.contains(&current.status) {
            warn!(
                %alert_id,
                from = %current.status,
                to = %to,
                "status transition not allowed"
            );
            return Err(EngineError::ConcurrencyConflict { alert_id });
        }

        let applied = self
            .repo
            .transition(&alert_id, current.status, to, None, now)
            .await
            .map_err(EngineError::store)?;

        if !applied {
            return Err(EngineError::ConcurrencyConflict { alert_id });
        }

        info!(%alert_id, from = %current.status, to = %to, "alert status changed");
        self.get(alert_id).await
    }
}
