use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::time::{from_ms, to_ms};
use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::{AnyPool, Row};

use crate::entity::{EntityKey, EntityType};
use crate::observation::model::{InsertOutcome, NewObservation, ObservationContext, PriceObservation};
use crate::observation::repository::ObservationRepository;

const INSERT_SQL: &str = r#"
INSERT INTO price_observations
  (entity_type, entity_id, price, currency, observed_at_ms, source, context_json, recorded_at_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (entity_type, entity_id, observed_at_ms, source) DO NOTHING;
"#;

const SELECT_SINCE_SQL: &str = r#"
SELECT id, entity_type, entity_id, price, currency, observed_at_ms, source, context_json
FROM price_observations
WHERE entity_type = ? AND entity_id = ? AND observed_at_ms >= ?
ORDER BY observed_at_ms ASC, id ASC;
"#;

const SELECT_LATEST_SQL: &str = r#"
SELECT id, entity_type, entity_id, price, currency, observed_at_ms, source, context_json
FROM price_observations
WHERE entity_type = ? AND entity_id = ?
ORDER BY observed_at_ms DESC, id DESC
LIMIT 1;
"#;

/// SQLx-backed implementation of ObservationRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxObservationRepository {
    pool: AnyPool,
}

impl SqlxObservationRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn encode_context(obs: &NewObservation) -> anyhow::Result<Option<String>> {
    obs.context
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("failed to encode observation context")
}

#[async_trait]
impl ObservationRepository for SqlxObservationRepository {
    async fn insert(
        &self,
        obs: &NewObservation,
        recorded_at: DateTime<Utc>,
    ) -> anyhow::Result<InsertOutcome> {
        let res = sqlx::query(INSERT_SQL)
            .bind(obs.entity.entity_type.as_str())
            .bind(obs.entity.entity_id.clone())
            .bind(obs.price)
            .bind(obs.currency.clone())
            .bind(to_ms(obs.observed_at))
            .bind(obs.source.clone())
            .bind(encode_context(obs)?)
            .bind(to_ms(recorded_at))
            .execute(&self.pool)
            .await
            .context("insert observation")?;

        Ok(if res.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn insert_batch(
        &self,
        obs: &[NewObservation],
        recorded_at: DateTime<Utc>,
    ) -> anyhow::Result<(u64, u64)> {
        let mut tx = self.pool.begin().await.context("begin batch insert")?;

        let mut inserted = 0u64;
        let mut duplicates = 0u64;

        for o in obs {
            let res = sqlx::query(INSERT_SQL)
                .bind(o.entity.entity_type.as_str())
                .bind(o.entity.entity_id.clone())
                .bind(o.price)
                .bind(o.currency.clone())
                .bind(to_ms(o.observed_at))
                .bind(o.source.clone())
                .bind(encode_context(o)?)
                .bind(to_ms(recorded_at))
                .execute(&mut *tx)
                .await
                .context("insert observation in batch")?;

            if res.rows_affected() == 0 {
                duplicates += 1;
            } else {
                inserted += 1;
            }
        }

        tx.commit().await.context("commit batch insert")?;
        Ok((inserted, duplicates))
    }

    fn stream_since<'a>(
        &'a self,
        entity: &EntityKey,
        since: DateTime<Utc>,
    ) -> BoxStream<'a, anyhow::Result<PriceObservation>> {
        sqlx::query(SELECT_SINCE_SQL)
            .bind(entity.entity_type.as_str())
            .bind(entity.entity_id.clone())
            .bind(to_ms(since))
            .fetch(&self.pool)
            .filter_map(|res| async move {
                match res {
                    Ok(row) => match row_to_observation(&row) {
                        Ok(o) => Some(Ok(o)),
                        Err(e) => {
                            // poison-row resilience: skip but don't fail the scan
                            tracing::warn!(error = %e, "skipping malformed observation row");
                            None
                        }
                    },
                    Err(e) => Some(Err(anyhow::Error::from(e).context("scan observations"))),
                }
            })
            .boxed()
    }

    async fn latest(&self, entity: &EntityKey) -> anyhow::Result<Option<PriceObservation>> {
        let row = sqlx::query(SELECT_LATEST_SQL)
            .bind(entity.entity_type.as_str())
            .bind(entity.entity_id.clone())
            .fetch_optional(&self.pool)
            .await
            .context("fetch latest observation")?;

        row.as_ref().map(row_to_observation).transpose()
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM price_observations WHERE observed_at_ms < ?;")
            .bind(to_ms(cutoff))
            .execute(&self.pool)
            .await
            .context("purge observations")?;

        Ok(res.rows_affected())
    }
}

/* =========================
Row mapping
========================= */

fn row_to_observation(r: &sqlx::any::AnyRow) -> anyhow::Result<PriceObservation> {
    let entity_type: String = r.try_get("entity_type")?;
    let entity_type: EntityType = entity_type.parse()?;

    let observed_at_ms: i64 = r.try_get("observed_at_ms")?;
    let observed_at =
        from_ms(observed_at_ms).ok_or_else(|| anyhow!("invalid observed_at_ms: {observed_at_ms}"))?;

    let context = r
        .try_get::<Option<String>, _>("context_json")?
        .map(|raw| serde_json::from_str::<ObservationContext>(&raw))
        .transpose()
        .context("invalid context_json")?;

    Ok(PriceObservation {
        id: r.try_get("id")?,
        entity: EntityKey::new(entity_type, r.try_get::<String, _>("entity_id")?),
        price: r.try_get("price")?,
        currency: r.try_get("currency")?,
        observed_at,
        source: r.try_get("source")?,
        context,
    })
}
