use std::collections::BTreeSet;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::time::{from_ms, to_ms};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::alerts::model::{AlertRequest, AlertStatus, NotificationChannel, PriceAlert};
use crate::alerts::repository::AlertRepository;
use crate::entity::{EntityKey, EntityType};

const ALERT_COLUMNS: &str = "id, user_id, entity_type, entity_id, entity_name, target_price, \
     current_price_at_creation, currency, price_drop_percentage, status, channels_json, \
     expires_at_ms, triggered_price, triggered_at_ms, created_at_ms, updated_at_ms";

const UPSERT_ACTIVE_SQL: &str = r#"
INSERT INTO price_alerts
  (id, user_id, entity_type, entity_id, entity_name, target_price, current_price_at_creation,
   currency, price_drop_percentage, status, channels_json, expires_at_ms,
   triggered_price, triggered_at_ms, created_at_ms, updated_at_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'ACTIVE', ?, ?, NULL, NULL, ?, ?)
ON CONFLICT (user_id, entity_type, entity_id) WHERE status = 'ACTIVE' DO UPDATE SET
  entity_name = excluded.entity_name,
  target_price = excluded.target_price,
  current_price_at_creation = excluded.current_price_at_creation,
  currency = excluded.currency,
  price_drop_percentage = excluded.price_drop_percentage,
  channels_json = excluded.channels_json,
  expires_at_ms = excluded.expires_at_ms,
  updated_at_ms = excluded.updated_at_ms;
"#;

const TRIGGER_SQL: &str = r#"
UPDATE price_alerts
SET status = 'TRIGGERED', triggered_price = ?, triggered_at_ms = ?, updated_at_ms = ?
WHERE id = ? AND status = ?;
"#;

const STATUS_ONLY_SQL: &str = r#"
UPDATE price_alerts SET status = ?, updated_at_ms = ?
WHERE id = ? AND status = ?;
"#;

const REACTIVATE_SQL: &str = r#"
UPDATE price_alerts
SET status = 'ACTIVE', triggered_price = NULL, triggered_at_ms = NULL,
    expires_at_ms = ?, updated_at_ms = ?
WHERE id = ? AND status = ?;
"#;

const SELECT_DUE_SQL: &str = r#"
SELECT id FROM price_alerts
WHERE status = 'ACTIVE' AND expires_at_ms IS NOT NULL AND expires_at_ms <= ?;
"#;

const EXPIRE_ONE_SQL: &str = r#"
UPDATE price_alerts SET status = 'EXPIRED', updated_at_ms = ?
WHERE id = ? AND status = 'ACTIVE';
"#;

const TRACKED_ENTITIES_SQL: &str = r#"
SELECT DISTINCT entity_type, entity_id FROM price_alerts
WHERE status = 'ACTIVE' AND (expires_at_ms IS NULL OR expires_at_ms > ?)
ORDER BY entity_type ASC, entity_id ASC;
"#;

/// SQLx-backed implementation of AlertRepository.
pub struct SqlxAlertRepository {
    pool: AnyPool,
}

impl SqlxAlertRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn encode_channels(channels: &BTreeSet<NotificationChannel>) -> anyhow::Result<String> {
    serde_json::to_string(channels).context("failed to encode channels")
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl AlertRepository for SqlxAlertRepository {
    async fn upsert_active(
        &self,
        request: &AlertRequest,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PriceAlert> {
        let now_ms = to_ms(now);
        let mut tx = self.pool.begin().await.context("begin alert upsert")?;

        sqlx::query(UPSERT_ACTIVE_SQL)
            .bind(Uuid::new_v4().to_string())
            .bind(request.user_id.clone())
            .bind(request.entity.entity_type.as_str())
            .bind(request.entity.entity_id.clone())
            .bind(request.entity_name.clone())
            .bind(request.target_price)
            .bind(request.current_price)
            .bind(request.currency.clone())
            .bind(request.price_drop_percentage)
            .bind(encode_channels(&request.effective_channels())?)
            .bind(request.expires_at.map(to_ms))
            .bind(now_ms)
            .bind(now_ms)
            .execute(&mut *tx)
            .await
            .context("upsert alert")?;

        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM price_alerts \
             WHERE user_id = ? AND entity_type = ? AND entity_id = ? AND status = 'ACTIVE';"
        );
        let row = sqlx::query(&sql)
            .bind(request.user_id.clone())
            .bind(request.entity.entity_type.as_str())
            .bind(request.entity.entity_id.clone())
            .fetch_one(&mut *tx)
            .await
            .context("reload upserted alert")?;

        let alert = row_to_alert(&row)?;
        tx.commit().await.context("commit alert upsert")?;
        Ok(alert)
    }

    async fn fetch_by_id(&self, alert_id: &Uuid) -> anyhow::Result<Option<PriceAlert>> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM price_alerts WHERE id = ?;");
        let row = sqlx::query(&sql)
            .bind(alert_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("fetch alert by id")?;

        row.as_ref().map(row_to_alert).transpose()
    }

    async fn fetch_active_for_entity(
        &self,
        entity: &EntityKey,
    ) -> anyhow::Result<Vec<PriceAlert>> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM price_alerts \
             WHERE entity_type = ? AND entity_id = ? AND status = 'ACTIVE' \
             ORDER BY created_at_ms ASC, id ASC;"
        );
        let rows = sqlx::query(&sql)
            .bind(entity.entity_type.as_str())
            .bind(entity.entity_id.clone())
            .fetch_all(&self.pool)
            .await
            .context("fetch active alerts")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_alert(&r) {
                Ok(a) => out.push(a),
                Err(e) => {
                    tracing::warn!(error = %e, entity = %entity, "skipping malformed alert row");
                }
            }
        }
        Ok(out)
    }

    async fn transition(
        &self,
        alert_id: &Uuid,
        from: AlertStatus,
        to: AlertStatus,
        triggered_price: Option<f64>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let now_ms = to_ms(now);

        // Terminal moves only touch status; the trigger record stays as it was.
        let res = if to == AlertStatus::Triggered {
            sqlx::query(TRIGGER_SQL)
                .bind(triggered_price)
                .bind(now_ms)
                .bind(now_ms)
                .bind(alert_id.to_string())
                .bind(from.as_str())
                .execute(&self.pool)
                .await
        } else {
            sqlx::query(STATUS_ONLY_SQL)
                .bind(to.as_str())
                .bind(now_ms)
                .bind(alert_id.to_string())
                .bind(from.as_str())
                .execute(&self.pool)
                .await
        };

        let r = res.context("transition alert status")?;
        Ok(r.rows_affected() == 1)
    }

    async fn reactivate(
        &self,
        alert_id: &Uuid,
        from: AlertStatus,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(REACTIVATE_SQL)
            .bind(expires_at.map(to_ms))
            .bind(to_ms(now))
            .bind(alert_id.to_string())
            .bind(from.as_str())
            .execute(&self.pool)
            .await;

        match res {
            Ok(r) => Ok(r.rows_affected() == 1),
            // another ACTIVE alert already holds the (user, entity) key
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(anyhow::Error::from(e).context("reactivate alert")),
        }
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        let now_ms = to_ms(now);
        let mut tx = self.pool.begin().await.context("begin expiry sweep")?;

        let ids: Vec<String> = sqlx::query(SELECT_DUE_SQL)
            .bind(now_ms)
            .fetch_all(&mut *tx)
            .await
            .context("select due alerts")?
            .iter()
            .map(|r| r.try_get::<String, _>("id"))
            .collect::<Result<_, _>>()?;

        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            let res = sqlx::query(EXPIRE_ONE_SQL)
                .bind(now_ms)
                .bind(id.clone())
                .execute(&mut *tx)
                .await
                .context("expire alert")?;

            if res.rows_affected() == 1 {
                expired.push(Uuid::parse_str(&id).context("invalid alert id")?);
            }
        }

        tx.commit().await.context("commit expiry sweep")?;
        Ok(expired)
    }

    async fn tracked_entities(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<EntityKey>> {
        let rows = sqlx::query(TRACKED_ENTITIES_SQL)
            .bind(to_ms(now))
            .fetch_all(&self.pool)
            .await
            .context("fetch tracked entities")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let raw: String = r.try_get("entity_type")?;
            match raw.parse::<EntityType>() {
                Ok(t) => out.push(EntityKey::new(t, r.try_get::<String, _>("entity_id")?)),
                Err(e) => tracing::warn!(error = %e, "skipping alert with unknown entity type"),
            }
        }
        Ok(out)
    }
}

/* =========================
Row mapping
========================= */

fn ms_to_time(ms: i64, field: &str) -> anyhow::Result<DateTime<Utc>> {
    from_ms(ms).ok_or_else(|| anyhow!("invalid {field}: {ms}"))
}

fn row_to_alert(r: &sqlx::any::AnyRow) -> anyhow::Result<PriceAlert> {
    let id: String = r.try_get("id")?;
    let entity_type: String = r.try_get("entity_type")?;
    let status: String = r.try_get("status")?;
    let channels: String = r.try_get("channels_json")?;

    Ok(PriceAlert {
        id: Uuid::parse_str(&id).context("invalid alert id")?,
        user_id: r.try_get("user_id")?,
        entity: EntityKey::new(
            entity_type.parse::<EntityType>()?,
            r.try_get::<String, _>("entity_id")?,
        ),
        entity_name: r.try_get("entity_name")?,
        target_price: r.try_get("target_price")?,
        current_price_at_creation: r.try_get("current_price_at_creation")?,
        currency: r.try_get("currency")?,
        price_drop_percentage: r.try_get("price_drop_percentage")?,
        status: status.parse()?,
        channels: serde_json::from_str(&channels).context("invalid channels_json")?,
        expires_at: r
            .try_get::<Option<i64>, _>("expires_at_ms")?
            .map(|ms| ms_to_time(ms, "expires_at_ms"))
            .transpose()?,
        triggered_price: r.try_get("triggered_price")?,
        triggered_at: r
            .try_get::<Option<i64>, _>("triggered_at_ms")?
            .map(|ms| ms_to_time(ms, "triggered_at_ms"))
            .transpose()?,
        created_at: ms_to_time(r.try_get("created_at_ms")?, "created_at_ms")?,
        updated_at: ms_to_time(r.try_get("updated_at_ms")?, "updated_at_ms")?,
    })
}
