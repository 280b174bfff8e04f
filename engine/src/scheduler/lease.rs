use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::time::to_ms;
use sqlx::AnyPool;

use crate::scheduler::report::{RunReport, RunStatus};

/// Cross-process guard for scheduler cycles plus run bookkeeping.
///
/// A lease is a single row per scheduler name. Holding it means no other
/// runner, in this process or another, starts a cycle until it is released
/// or its expiry passes.
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Claims the lease for `holder` if it is free or expired.
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> anyhow::Result<bool>;

    /// Frees the lease if `holder` still owns it and records the outcome.
    async fn release(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        status: RunStatus,
    ) -> anyhow::Result<()>;

    /// Appends a row to the run history.
    async fn record_run(&self, report: &RunReport) -> anyhow::Result<()>;
}

const ENSURE_ROW_SQL: &str = r#"
INSERT INTO scheduler_lease (name, holder, lease_until_ms, last_started_ms, last_finished_ms, last_status)
VALUES (?, NULL, 0, 0, 0, NULL)
ON CONFLICT (name) DO NOTHING;
"#;

const ACQUIRE_SQL: &str = r#"
UPDATE scheduler_lease
SET holder = ?, lease_until_ms = ?, last_started_ms = ?
WHERE name = ? AND (holder IS NULL OR lease_until_ms <= ?);
"#;

const RELEASE_SQL: &str = r#"
UPDATE scheduler_lease
SET holder = NULL, lease_until_ms = 0, last_finished_ms = ?, last_status = ?
WHERE name = ? AND holder = ?;
"#;

const INSERT_RUN_SQL: &str = r#"
INSERT INTO scheduler_runs
  (run_id, started_ms, finished_ms, status, entities_processed, entities_deferred,
   alerts_triggered, alerts_expired, failures_json)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#;

pub struct SqlxLeaseRepository {
    pool: AnyPool,
}

impl SqlxLeaseRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

fn to_i64(v: u64, field: &str) -> anyhow::Result<i64> {
    i64::try_from(v).with_context(|| format!("{field} out of range: {v}"))
}

#[async_trait]
impl LeaseRepository for SqlxLeaseRepository {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> anyhow::Result<bool> {
        let now_ms = to_ms(now);
        let ttl_ms = i64::try_from(ttl.as_millis()).context("lease ttl out of range")?;

        sqlx::query(ENSURE_ROW_SQL)
            .bind(name.to_string())
            .execute(&self.pool)
            .await
            .context("ensure lease row")?;

        let res = sqlx::query(ACQUIRE_SQL)
            .bind(holder.to_string())
            .bind(now_ms.saturating_add(ttl_ms))
            .bind(now_ms)
            .bind(name.to_string())
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .context("acquire lease")?;

        Ok(res.rows_affected() == 1)
    }

    async fn release(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        status: RunStatus,
    ) -> anyhow::Result<()> {
        let res = sqlx::query(RELEASE_SQL)
            .bind(to_ms(now))
            .bind(status.as_str())
            .bind(name.to_string())
            .bind(holder.to_string())
            .execute(&self.pool)
            .await
            .context("release lease")?;

        if res.rows_affected() == 0 {
            // expired mid-cycle and someone else took it over
            tracing::warn!(lease = name, holder, "lease was no longer held at release");
        }
        Ok(())
    }

    async fn record_run(&self, report: &RunReport) -> anyhow::Result<()> {
        let failures =
            serde_json::to_string(&report.failures).context("failed to encode run failures")?;

        sqlx::query(INSERT_RUN_SQL)
            .bind(report.run_id.clone())
            .bind(to_ms(report.started_at))
            .bind(to_ms(report.finished_at))
            .bind(report.status.as_str())
            .bind(to_i64(report.entities_processed, "entities_processed")?)
            .bind(to_i64(report.entities_deferred.len() as u64, "entities_deferred")?)
            .bind(to_i64(report.alerts_triggered, "alerts_triggered")?)
            .bind(to_i64(report.alerts_expired, "alerts_expired")?)
            .bind(failures)
            .execute(&self.pool)
            .await
            .context("insert run history")?;

        Ok(())
    }
}
