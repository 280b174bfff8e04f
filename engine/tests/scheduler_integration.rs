use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use price_engine::alerts::{
    AlertDecision, AlertRequest, AlertService, AlertStatus, SqlxAlertRepository,
};
use price_engine::collector::{IngestOnlyCollector, PriceCollector};
use price_engine::db::Db;
use price_engine::entity::{EntityKey, EntityType};
use price_engine::forecast::{ForecastConfig, ForecastEngine, TrendSeasonalStrategy};
use price_engine::metrics::counters::Counters;
use price_engine::notify::Notifier;
use price_engine::observation::repository_sqlx::SqlxObservationRepository;
use price_engine::observation::{NewObservation, ObservationStore};
use price_engine::scheduler::{
    LeaseRepository, RunStage, RunStatus, Runner, RunnerConfig, SqlxLeaseRepository,
};

/* =========================
Test doubles
========================= */

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<AlertDecision>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, decision: &AlertDecision) -> anyhow::Result<()> {
        self.sent.lock().push(decision.clone());
        Ok(())
    }
}

/// Returns a scripted price per entity; entity ids starting with "broken"
/// fail, ids starting with "slow" hang.
#[derive(Default)]
struct ScriptedCollector {
    prices: Mutex<Vec<(EntityKey, f64)>>,
    at: Mutex<Option<DateTime<Utc>>>,
}

impl ScriptedCollector {
    fn with(prices: Vec<(EntityKey, f64)>, at: DateTime<Utc>) -> Self {
        Self {
            prices: Mutex::new(prices),
            at: Mutex::new(Some(at)),
        }
    }
}

#[async_trait]
impl PriceCollector for ScriptedCollector {
    async fn collect(&self, entity: &EntityKey) -> anyhow::Result<Option<NewObservation>> {
        if entity.entity_id.starts_with("broken") {
            anyhow::bail!("upstream returned 503");
        }
        if entity.entity_id.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }

        let price = self
            .prices
            .lock()
            .iter()
            .find(|(k, _)| k == entity)
            .map(|(_, p)| *p);
        let at = (*self.at.lock()).unwrap_or_else(Utc::now);

        Ok(price.map(|p| NewObservation::new(entity.clone(), p, "THB", at, "scripted")))
    }
}

/* =========================
Harness
========================= */

struct Harness {
    pool: AnyPool,
    observations: Arc<ObservationStore>,
    alerts: AlertService,
    counters: Counters,
}

async fn setup() -> Harness {
    let url = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let db = Db::connect(&url, 1).await.unwrap();
    db.migrate().await.unwrap();

    let counters = Counters::default();
    let observations = Arc::new(ObservationStore::new(
        Arc::new(SqlxObservationRepository::new(db.pool.clone())),
        counters.clone(),
    ));

    Harness {
        alerts: AlertService::new(
            Arc::new(SqlxAlertRepository::new(db.pool.clone())),
            counters.clone(),
        ),
        pool: db.pool,
        observations,
        counters,
    }
}

fn config() -> RunnerConfig {
    RunnerConfig {
        call_timeout: Duration::from_millis(100),
        ..RunnerConfig::default()
    }
}

fn runner(
    h: &Harness,
    collector: Arc<dyn PriceCollector>,
    notifier: Arc<dyn Notifier>,
    config: RunnerConfig,
) -> Runner {
    Runner::new(
        h.observations.clone(),
        Arc::new(SqlxAlertRepository::new(h.pool.clone())),
        Arc::new(ForecastEngine::new(
            h.observations.clone(),
            Arc::new(TrendSeasonalStrategy),
            ForecastConfig::default(),
        )),
        collector,
        notifier,
        Arc::new(SqlxLeaseRepository::new(h.pool.clone())),
        h.counters.clone(),
        config,
    )
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 6, 0, 0).unwrap()
}

fn hotel(id: &str) -> EntityKey {
    EntityKey::new(EntityType::Hotel, id)
}

async fn track(h: &Harness, entity: EntityKey, target: f64) -> Uuid {
    h.alerts
        .create_or_update_alert(
            AlertRequest {
                user_id: "user-1".into(),
                entity,
                entity_name: "Some Hotel".into(),
                target_price: target,
                current_price: 1500.0,
                currency: "THB".into(),
                price_drop_percentage: None,
                channels: BTreeSet::new(),
                expires_at: None,
            },
            t0() - ChronoDuration::days(1),
        )
        .await
        .unwrap()
        .id
}

async fn seed(h: &Harness, entity: &EntityKey, price: f64, at: DateTime<Utc>) {
    h.observations
        .record(NewObservation::new(entity.clone(), price, "THB", at, "seed"))
        .await
        .unwrap();
}

/* =========================
Tests
========================= */

#[tokio::test]
async fn cycle_matches_stored_prices_and_notifies() {
    let h = setup().await;
    let entity = hotel("test-001");
    let alert_id = track(&h, entity.clone(), 1100.0).await;
    seed(&h, &entity, 1080.0, t0() - ChronoDuration::hours(1)).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let r = runner(&h, Arc::new(IngestOnlyCollector), notifier.clone(), config());

    let report = r.run_cycle_at(t0()).await;

    assert_eq!(report.status, RunStatus::Ok);
    assert_eq!(report.entities_due, 1);
    assert_eq!(report.entities_processed, 1);
    assert_eq!(report.alerts_triggered, 1);
    assert!(report.failures.is_empty());

    let sent = notifier.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].alert_id, alert_id);
    assert_eq!(h.counters.snapshot().notifications_sent, 1);

    // nothing left to track: the next cycle has no due entities
    let next = r.run_cycle_at(t0() + ChronoDuration::minutes(5)).await;
    assert_eq!(next.status, RunStatus::Ok);
    assert_eq!(next.entities_due, 0);
    assert_eq!(notifier.sent.lock().len(), 1);
}

#[tokio::test]
async fn collected_prices_are_recorded_before_matching() {
    let h = setup().await;
    let entity = hotel("test-001");
    track(&h, entity.clone(), 1100.0).await;

    let collector = Arc::new(ScriptedCollector::with(vec![(entity.clone(), 1090.0)], t0()));
    let notifier = Arc::new(RecordingNotifier::default());
    let report = runner(&h, collector, notifier.clone(), config())
        .run_cycle_at(t0())
        .await;

    assert_eq!(report.alerts_triggered, 1);
    let latest = h.observations.latest(&entity).await.unwrap().unwrap();
    assert_eq!(latest.price, 1090.0);
    assert_eq!(latest.source, "scripted");
}

#[tokio::test]
async fn no_price_yet_is_processed_without_decisions() {
    let h = setup().await;
    track(&h, hotel("fresh"), 1100.0).await;

    let report = runner(
        &h,
        Arc::new(IngestOnlyCollector),
        Arc::new(RecordingNotifier::default()),
        config(),
    )
    .run_cycle_at(t0())
    .await;

    assert_eq!(report.status, RunStatus::Ok);
    assert_eq!(report.entities_processed, 1);
    assert_eq!(report.alerts_triggered, 0);
}

#[tokio::test]
async fn one_failing_entity_degrades_the_cycle() {
    let h = setup().await;
    let good = hotel("test-001");
    track(&h, good.clone(), 1100.0).await;
    track(&h, hotel("broken-007"), 1100.0).await;

    let collector = Arc::new(ScriptedCollector::with(vec![(good.clone(), 1000.0)], t0()));
    let report = runner(
        &h,
        collector,
        Arc::new(RecordingNotifier::default()),
        config(),
    )
    .run_cycle_at(t0())
    .await;

    assert_eq!(report.status, RunStatus::Degraded);
    assert_eq!(report.entities_due, 2);
    assert_eq!(report.entities_processed, 1);
    assert_eq!(report.alerts_triggered, 1);

    assert_eq!(report.failures.len(), 1);
    let f = &report.failures[0];
    assert_eq!(f.entity, hotel("broken-007"));
    assert_eq!(f.stage, RunStage::Collecting);
    assert_eq!(f.kind, "collection");
    assert!(f.message.contains("503"));
    assert_eq!(h.counters.snapshot().entities_failed, 1);
}

#[tokio::test]
async fn cycle_with_no_successes_is_failed() {
    let h = setup().await;
    track(&h, hotel("broken-1"), 1100.0).await;
    track(&h, hotel("broken-2"), 1100.0).await;

    let report = runner(
        &h,
        Arc::new(ScriptedCollector::default()),
        Arc::new(RecordingNotifier::default()),
        config(),
    )
    .run_cycle_at(t0())
    .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failures.len(), 2);
}

#[tokio::test]
async fn slow_collection_times_out_per_entity() {
    let h = setup().await;
    track(&h, hotel("slow-1"), 1100.0).await;
    let good = hotel("test-001");
    track(&h, good.clone(), 1100.0).await;
    seed(&h, &good, 1200.0, t0() - ChronoDuration::hours(1)).await;

    let report = runner(
        &h,
        Arc::new(ScriptedCollector::default()),
        Arc::new(RecordingNotifier::default()),
        config(),
    )
    .run_cycle_at(t0())
    .await;

    assert_eq!(report.status, RunStatus::Degraded);
    assert_eq!(report.entities_processed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, "timeout");
    assert_eq!(report.failures[0].stage, RunStage::Collecting);
}

#[tokio::test]
async fn exhausted_budget_defers_entities() {
    let h = setup().await;
    track(&h, hotel("a"), 1100.0).await;
    track(&h, hotel("b"), 1100.0).await;

    let cfg = RunnerConfig {
        cycle_budget: Duration::ZERO,
        ..config()
    };
    let report = runner(
        &h,
        Arc::new(IngestOnlyCollector),
        Arc::new(RecordingNotifier::default()),
        cfg,
    )
    .run_cycle_at(t0())
    .await;

    assert_eq!(report.status, RunStatus::Degraded);
    assert_eq!(report.entities_processed, 0);
    assert_eq!(report.entities_deferred.len(), 2);
    assert!(report.failures.is_empty());
    assert_eq!(h.counters.snapshot().entities_deferred, 2);
}

#[tokio::test]
async fn held_lease_skips_the_cycle() {
    let h = setup().await;
    let entity = hotel("test-001");
    track(&h, entity.clone(), 1100.0).await;
    seed(&h, &entity, 1000.0, t0() - ChronoDuration::hours(1)).await;

    let cfg = config();
    let lease = SqlxLeaseRepository::new(h.pool.clone());
    assert!(
        lease
            .try_acquire(&cfg.name, "other-runner", t0(), cfg.lease_ttl)
            .await
            .unwrap()
    );

    let notifier = Arc::new(RecordingNotifier::default());
    let r = runner(&h, Arc::new(IngestOnlyCollector), notifier.clone(), cfg.clone());

    let skipped = r.run_cycle_at(t0() + ChronoDuration::seconds(10)).await;
    assert_eq!(skipped.status, RunStatus::Skipped);
    assert_eq!(h.counters.snapshot().cycles_skipped_lease, 1);
    assert!(notifier.sent.lock().is_empty());

    // the other holder never released; its lease lapses after the ttl
    let ttl = ChronoDuration::from_std(cfg.lease_ttl).unwrap();
    let report = r.run_cycle_at(t0() + ttl + ChronoDuration::seconds(1)).await;
    assert_eq!(report.status, RunStatus::Ok);
    assert_eq!(report.alerts_triggered, 1);
}

#[tokio::test]
async fn finished_cycle_releases_lease_and_records_history() {
    let h = setup().await;
    let entity = hotel("test-001");
    track(&h, entity.clone(), 1100.0).await;
    seed(&h, &entity, 1000.0, t0() - ChronoDuration::hours(1)).await;

    let r = runner(
        &h,
        Arc::new(IngestOnlyCollector),
        Arc::new(RecordingNotifier::default()),
        config(),
    );
    let report = r.run_cycle_at(t0()).await;

    let lease = sqlx::query(
        "SELECT holder, last_status, last_started_ms FROM scheduler_lease WHERE name = ?",
    )
    .bind(r.config().name.clone())
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(lease.try_get::<Option<String>, _>("holder").unwrap(), None);
    assert_eq!(
        lease.try_get::<Option<String>, _>("last_status").unwrap(),
        Some("OK".to_string())
    );
    assert_eq!(
        lease.try_get::<i64, _>("last_started_ms").unwrap(),
        t0().timestamp_millis()
    );

    let run = sqlx::query(
        "SELECT status, entities_processed, alerts_triggered FROM scheduler_runs WHERE run_id = ?",
    )
    .bind(report.run_id.clone())
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(run.try_get::<String, _>("status").unwrap(), "OK");
    assert_eq!(run.try_get::<i64, _>("entities_processed").unwrap(), 1);
    assert_eq!(run.try_get::<i64, _>("alerts_triggered").unwrap(), 1);

    // a fresh cycle can take the lease straight away
    let next = r.run_cycle_at(t0() + ChronoDuration::seconds(1)).await;
    assert_ne!(next.status, RunStatus::Skipped);
}

#[tokio::test]
async fn expiry_sweep_runs_before_matching() {
    let h = setup().await;
    let entity = hotel("test-001");
    let alert = h
        .alerts
        .create_or_update_alert(
            AlertRequest {
                user_id: "user-1".into(),
                entity: entity.clone(),
                entity_name: "Some Hotel".into(),
                target_price: 1100.0,
                current_price: 1500.0,
                currency: "THB".into(),
                price_drop_percentage: None,
                channels: BTreeSet::new(),
                expires_at: Some(t0() - ChronoDuration::minutes(1)),
            },
            t0() - ChronoDuration::days(1),
        )
        .await
        .unwrap();
    seed(&h, &entity, 900.0, t0() - ChronoDuration::hours(1)).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let report = runner(&h, Arc::new(IngestOnlyCollector), notifier.clone(), config())
        .run_cycle_at(t0())
        .await;

    assert_eq!(report.alerts_expired, 1);
    assert_eq!(report.entities_due, 0);
    assert!(notifier.sent.lock().is_empty());
    assert_eq!(
        h.alerts.get(alert.id).await.unwrap().status,
        AlertStatus::Expired
    );
}
