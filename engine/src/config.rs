use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// `production` switches logs to JSON.
    pub app_env: String,

    /// Pool size. SQLite in-memory databases want 1.
    pub max_connections: u32,

    // =========================
    // Analytics windows
    // =========================
    /// Observations older than this are removed by the retention sweep.
    pub retention_days: u32,

    /// Trailing window for `summarize`.
    pub stats_window_days: u32,

    /// History the forecaster looks back over.
    pub forecast_lookback_days: u32,

    /// Default horizon for `predict`.
    pub forecast_days_ahead: u32,

    // =========================
    // Scheduler configuration
    // =========================
    /// Pause between cycles.
    pub cycle_interval: Duration,

    /// Pause between retention sweeps.
    pub purge_interval: Duration,

    /// Wall-clock budget for one cycle. Entities not started in time are
    /// deferred to the next cycle.
    pub cycle_budget: Duration,

    /// Upper bound for any single collaborator call (collector, notifier).
    pub call_timeout: Duration,

    /// How long a cycle's lease lives. A crashed holder blocks others at most
    /// this long.
    pub lease_ttl: Duration,

    /// Entities processed concurrently within a cycle.
    pub entity_concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://price_engine.db?mode=rwc".to_string(),
            app_env: "development".to_string(),
            max_connections: 5,
            retention_days: 90,
            stats_window_days: 30,
            forecast_lookback_days: 30,
            forecast_days_ahead: 7,
            cycle_interval: Duration::from_secs(300),
            purge_interval: Duration::from_secs(86_400),
            cycle_budget: Duration::from_millis(60_000),
            call_timeout: Duration::from_millis(5_000),
            lease_ttl: Duration::from_millis(120_000),
            entity_concurrency: 8,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Missing keys use the default;
    /// malformed or zero values fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();

        Self {
            database_url: lookup("DATABASE_URL").unwrap_or(d.database_url),
            app_env: lookup("APP_ENV").unwrap_or(d.app_env),
            max_connections: parse_positive(&lookup, "DB_MAX_CONNECTIONS", d.max_connections),
            retention_days: parse_positive(&lookup, "RETENTION_DAYS", d.retention_days),
            stats_window_days: parse_positive(&lookup, "STATS_WINDOW_DAYS", d.stats_window_days),
            forecast_lookback_days: parse_positive(
                &lookup,
                "FORECAST_LOOKBACK_DAYS",
                d.forecast_lookback_days,
            ),
            forecast_days_ahead: parse_positive(
                &lookup,
                "FORECAST_DAYS_AHEAD",
                d.forecast_days_ahead,
            ),
            cycle_interval: Duration::from_secs(parse_positive(
                &lookup,
                "CYCLE_INTERVAL_SECS",
                d.cycle_interval.as_secs(),
            )),
            purge_interval: Duration::from_secs(parse_positive(
                &lookup,
                "PURGE_INTERVAL_SECS",
                d.purge_interval.as_secs(),
            )),
            cycle_budget: Duration::from_millis(parse_positive(
                &lookup,
                "CYCLE_BUDGET_MS",
                d.cycle_budget.as_millis() as u64,
            )),
            call_timeout: Duration::from_millis(parse_positive(
                &lookup,
                "CALL_TIMEOUT_MS",
                d.call_timeout.as_millis() as u64,
            )),
            lease_ttl: Duration::from_millis(parse_positive(
                &lookup,
                "LEASE_TTL_MS",
                d.lease_ttl.as_millis() as u64,
            )),
            entity_concurrency: parse_positive(
                &lookup,
                "ENTITY_CONCURRENCY",
                d.entity_concurrency,
            ),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => v,
        _ => {
            warn!(key, value = %raw, %default, "ignoring invalid config value");
            default
        }
    }
}
