use anyhow::Context;
use sqlx::AnyPool;

/// Idempotent schema bootstrap. Safe to run on every start.
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Observations: append-only, deleted only by the retention sweep.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS price_observations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  entity_type TEXT NOT NULL,
  entity_id TEXT NOT NULL,
  price REAL NOT NULL CHECK (price >= 0),
  currency TEXT NOT NULL,
  observed_at_ms BIGINT NOT NULL,
  source TEXT NOT NULL,
  context_json TEXT,
  recorded_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await
    .context("create price_observations")?;

    // Alerts: the only mutable shared table. Status moves are guarded by the
    // expected prior status in the UPDATE itself.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS price_alerts (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  entity_type TEXT NOT NULL,
  entity_id TEXT NOT NULL,
  entity_name TEXT NOT NULL,
  target_price REAL NOT NULL CHECK (target_price >= 0),
  current_price_at_creation REAL NOT NULL,
  currency TEXT NOT NULL,
  price_drop_percentage REAL,
  status TEXT NOT NULL,
  channels_json TEXT NOT NULL,
  expires_at_ms BIGINT,
  triggered_price REAL,
  triggered_at_ms BIGINT,
  created_at_ms BIGINT NOT NULL,
  updated_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await
    .context("create price_alerts")?;

    // Single-row lease per scheduler name.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS scheduler_lease (
  name TEXT PRIMARY KEY,
  holder TEXT,
  lease_until_ms BIGINT NOT NULL,
  last_started_ms BIGINT NOT NULL,
  last_finished_ms BIGINT NOT NULL,
  last_status TEXT
);
"#,
    )
    .execute(pool)
    .await
    .context("create scheduler_lease")?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS scheduler_runs (
  run_id TEXT PRIMARY KEY,
  started_ms BIGINT NOT NULL,
  finished_ms BIGINT NOT NULL,
  status TEXT NOT NULL,
  entities_processed BIGINT NOT NULL,
  entities_deferred BIGINT NOT NULL,
  alerts_triggered BIGINT NOT NULL,
  alerts_expired BIGINT NOT NULL,
  failures_json TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await
    .context("create scheduler_runs")?;

    for ddl in [
        r#"CREATE INDEX IF NOT EXISTS idx_obs_entity_time ON price_observations(entity_type, entity_id, observed_at_ms);"#,
        r#"CREATE UNIQUE INDEX IF NOT EXISTS ux_obs_natural_key ON price_observations(entity_type, entity_id, observed_at_ms, source);"#,
        r#"CREATE INDEX IF NOT EXISTS idx_obs_observed_at ON price_observations(observed_at_ms);"#,
        r#"CREATE INDEX IF NOT EXISTS idx_alerts_entity_status ON price_alerts(entity_type, entity_id, status);"#,
        r#"CREATE INDEX IF NOT EXISTS idx_alerts_user_entity ON price_alerts(user_id, entity_type, entity_id);"#,
        r#"CREATE UNIQUE INDEX IF NOT EXISTS ux_alerts_one_active ON price_alerts(user_id, entity_type, entity_id) WHERE status = 'ACTIVE';"#,
    ] {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("create index: {ddl}"))?;
    }

    Ok(())
}
