use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::logger::warn_if_slow;
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::alerts::model::{AlertDecision, AlertStatus};
use crate::alerts::repository::AlertRepository;
use crate::entity::{EntityKey, validate_price};
use crate::error::{EngineError, EngineResult};
use crate::metrics::counters::{Counters, bump};

/// Outcome of matching one entity's latest price against its active alerts.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Evaluation {
    pub decisions: Vec<AlertDecision>,
    /// Alerts found past their expiry during this evaluation. The matcher moves
    /// them to EXPIRED itself (ACTIVE -> EXPIRED compare-and-swap) and never
    /// matches them; an id appears here only when this evaluation's write applied.
    pub expired: Vec<Uuid>,
    /// Alerts another process transitioned between our read and our write.
    pub conflicts: u64,
}

/// Decides which ACTIVE alerts fire for an observed price.
///
/// A decision is only emitted when this matcher's own ACTIVE -> TRIGGERED write
/// applied, so concurrent matchers over the same alert produce one decision.
/// Expired alerts met along the way are transitioned here rather than left for
/// the scheduler's sweep.
pub struct AlertMatcher {
    repo: Arc<dyn AlertRepository>,
    counters: Counters,
}

impl AlertMatcher {
    pub fn new(repo: Arc<dyn AlertRepository>, counters: Counters) -> Self {
        Self { repo, counters }
    }

    #[instrument(skip(self), target = "alerts", fields(entity = %entity))]
    pub async fn evaluate(
        &self,
        entity: &EntityKey,
        latest_price: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<Evaluation> {
        validate_price(latest_price)?;

        let active = warn_if_slow("db_fetch_active_alerts", Duration::from_millis(50), async {
            self.repo.fetch_active_for_entity(entity).await
        })
        .await
        .map_err(EngineError::store)?;

        let mut out = Evaluation::default();

        for alert in active {
            if alert.is_expired(now) {
                let applied = self
                    .repo
                    .transition(&alert.id, AlertStatus::Active, AlertStatus::Expired, None, now)
                    .await
                    .map_err(EngineError::store)?;
                if applied {
                    bump(&self.counters.alerts_expired, 1);
                    out.expired.push(alert.id);
                }
                continue;
            }

            let Some(reason) = alert.trigger_reason(latest_price) else {
                continue;
            };

            let applied = self
                .repo
                .transition(
                    &alert.id,
                    AlertStatus::Active,
                    AlertStatus::Triggered,
                    Some(latest_price),
                    now,
                )
                .await
                .map_err(EngineError::store)?;

            if !applied {
                // someone else already moved it; not ours to announce
                bump(&self.counters.alert_trigger_conflicts, 1);
                out.conflicts += 1;
                debug!(alert_id = %alert.id, "alert already transitioned elsewhere");
                continue;
            }

            bump(&self.counters.alerts_triggered, 1);
            info!(
                alert_id = %alert.id,
                user_id = %alert.user_id,
                price = latest_price,
                target = alert.target_price,
                ?reason,
                "alert triggered"
            );

            out.decisions.push(AlertDecision {
                alert_id: alert.id,
                user_id: alert.user_id,
                entity: alert.entity,
                entity_name: alert.entity_name,
                channels: alert.channels,
                triggered_price: latest_price,
                target_price: alert.target_price,
                currency: alert.currency,
                reason,
                decided_at: now,
            });
        }

        Ok(out)
    }
}
