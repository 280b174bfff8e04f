use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::{AnyPool, Row};
use tokio::task::JoinSet;
use uuid::Uuid;

use price_engine::alerts::{
    AlertMatcher, AlertRequest, AlertService, AlertStatus, NotificationChannel,
    SqlxAlertRepository, TriggerReason,
};
use price_engine::db::Db;
use price_engine::entity::{EntityKey, EntityType};
use price_engine::error::EngineError;
use price_engine::metrics::counters::Counters;
use price_engine::observation::repository_sqlx::SqlxObservationRepository;
use price_engine::observation::{NewObservation, ObservationStore};

struct Harness {
    pool: AnyPool,
    service: AlertService,
    matcher: Arc<AlertMatcher>,
    observations: ObservationStore,
    counters: Counters,
}

async fn setup() -> Harness {
    let url = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let db = Db::connect(&url, 1).await.unwrap();
    db.migrate().await.unwrap();

    let counters = Counters::default();
    let repo = Arc::new(SqlxAlertRepository::new(db.pool.clone()));

    Harness {
        pool: db.pool.clone(),
        service: AlertService::new(repo.clone(), counters.clone()),
        matcher: Arc::new(AlertMatcher::new(repo, counters.clone())),
        observations: ObservationStore::new(
            Arc::new(SqlxObservationRepository::new(db.pool.clone())),
            counters.clone(),
        ),
        counters,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
}

fn hotel() -> EntityKey {
    EntityKey::new(EntityType::Hotel, "test-001")
}

fn request(target: f64, current: f64) -> AlertRequest {
    AlertRequest {
        user_id: "user-42".into(),
        entity: hotel(),
        entity_name: "Test Hotel Phuket".into(),
        target_price: target,
        current_price: current,
        currency: "THB".into(),
        price_drop_percentage: None,
        channels: BTreeSet::from([NotificationChannel::Email, NotificationChannel::Push]),
        expires_at: None,
    }
}

async fn latest_price(h: &Harness) -> f64 {
    h.observations.latest(&hotel()).await.unwrap().unwrap().price
}

async fn active_rows(pool: &AnyPool) -> i64 {
    sqlx::query("SELECT COUNT(*) AS n FROM price_alerts WHERE status = 'ACTIVE'")
        .fetch_one(pool)
        .await
        .unwrap()
        .try_get("n")
        .unwrap()
}

#[tokio::test]
async fn alert_fires_once_when_price_crosses_target() {
    let h = setup().await;
    let alert = h
        .service
        .create_or_update_alert(request(1100.0, 1150.0), t0())
        .await
        .unwrap();

    h.observations
        .record(NewObservation::new(hotel(), 1150.0, "THB", t0(), "agoda"))
        .await
        .unwrap();
    let eval = h
        .matcher
        .evaluate(&hotel(), latest_price(&h).await, t0())
        .await
        .unwrap();
    assert!(eval.decisions.is_empty());

    let later = t0() + Duration::hours(6);
    h.observations
        .record(NewObservation::new(hotel(), 1080.0, "THB", later, "agoda"))
        .await
        .unwrap();
    let eval = h
        .matcher
        .evaluate(&hotel(), latest_price(&h).await, later)
        .await
        .unwrap();

    assert_eq!(eval.decisions.len(), 1);
    let d = &eval.decisions[0];
    assert_eq!(d.alert_id, alert.id);
    assert_eq!(d.user_id, "user-42");
    assert_eq!(d.triggered_price, 1080.0);
    assert_eq!(d.reason, TriggerReason::TargetReached);
    assert_eq!(d.channels, alert.channels);

    let stored = h.service.get(alert.id).await.unwrap();
    assert_eq!(stored.status, AlertStatus::Triggered);
    assert_eq!(stored.triggered_price, Some(1080.0));
    assert_eq!(stored.triggered_at, Some(later));

    let again = h.matcher.evaluate(&hotel(), 1080.0, later).await.unwrap();
    assert!(again.decisions.is_empty());
}

#[tokio::test]
async fn second_request_updates_the_active_alert_in_place() {
    let h = setup().await;

    let first = h
        .service
        .create_or_update_alert(request(1100.0, 1500.0), t0())
        .await
        .unwrap();
    let second = h
        .service
        .create_or_update_alert(request(1000.0, 1450.0), t0() + Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.target_price, 1000.0);
    assert_eq!(second.current_price_at_creation, 1450.0);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.updated_at, t0() + Duration::minutes(5));
    assert_eq!(active_rows(&h.pool).await, 1);

    let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM price_alerts")
        .fetch_one(&h.pool)
        .await
        .unwrap()
        .try_get("n")
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn different_users_track_the_same_entity_independently() {
    let h = setup().await;

    h.service
        .create_or_update_alert(request(1100.0, 1500.0), t0())
        .await
        .unwrap();
    let mut other = request(1200.0, 1500.0);
    other.user_id = "user-7".into();
    h.service.create_or_update_alert(other, t0()).await.unwrap();

    assert_eq!(active_rows(&h.pool).await, 2);

    let eval = h.matcher.evaluate(&hotel(), 1150.0, t0()).await.unwrap();
    assert_eq!(eval.decisions.len(), 1);
    assert_eq!(eval.decisions[0].user_id, "user-7");
}

#[tokio::test]
async fn concurrent_matchers_emit_exactly_one_decision() {
    let h = setup().await;
    let alert = h
        .service
        .create_or_update_alert(request(1100.0, 1500.0), t0())
        .await
        .unwrap();

    let mut set = JoinSet::new();
    for _ in 0..16 {
        let matcher = h.matcher.clone();
        set.spawn(async move { matcher.evaluate(&hotel(), 1050.0, t0()).await.unwrap() });
    }

    let mut decisions = 0;
    let mut conflicts = 0;
    while let Some(res) = set.join_next().await {
        let eval = res.unwrap();
        decisions += eval.decisions.len();
        conflicts += eval.conflicts;
    }

    assert_eq!(decisions, 1);
    assert_eq!(h.counters.snapshot().alerts_triggered, 1);
    assert_eq!(h.counters.snapshot().alert_trigger_conflicts, conflicts);

    let stored = h.service.get(alert.id).await.unwrap();
    assert_eq!(stored.status, AlertStatus::Triggered);
}

#[tokio::test]
async fn percentage_drop_triggers_above_target() {
    let h = setup().await;
    let mut req = request(500.0, 2000.0);
    req.price_drop_percentage = Some(15.0);
    h.service.create_or_update_alert(req, t0()).await.unwrap();

    let none = h.matcher.evaluate(&hotel(), 1750.0, t0()).await.unwrap();
    assert!(none.decisions.is_empty());

    let eval = h.matcher.evaluate(&hotel(), 1600.0, t0()).await.unwrap();
    assert_eq!(eval.decisions.len(), 1);
    match eval.decisions[0].reason {
        TriggerReason::PercentageDrop { drop_percent } => {
            assert!((drop_percent - 20.0).abs() < 1e-9)
        }
        ref other => panic!("unexpected reason {other:?}"),
    }
}

#[tokio::test]
async fn expired_alerts_are_skipped_and_marked() {
    let h = setup().await;
    let mut req = request(1100.0, 1500.0);
    req.expires_at = Some(t0() + Duration::days(1));
    let alert = h.service.create_or_update_alert(req, t0()).await.unwrap();

    let after = t0() + Duration::days(2);
    let eval = h.matcher.evaluate(&hotel(), 900.0, after).await.unwrap();

    assert!(eval.decisions.is_empty());
    assert_eq!(eval.expired, vec![alert.id]);
    assert_eq!(
        h.service.get(alert.id).await.unwrap().status,
        AlertStatus::Expired
    );
}

#[tokio::test]
async fn expiry_sweep_moves_only_due_alerts() {
    let h = setup().await;

    let mut due = request(1100.0, 1500.0);
    due.expires_at = Some(t0() + Duration::hours(1));
    let due = h.service.create_or_update_alert(due, t0()).await.unwrap();

    let mut later = request(1100.0, 1500.0);
    later.user_id = "user-7".into();
    later.expires_at = Some(t0() + Duration::days(30));
    let later = h.service.create_or_update_alert(later, t0()).await.unwrap();

    let mut open = request(1100.0, 1500.0);
    open.user_id = "user-8".into();
    h.service.create_or_update_alert(open, t0()).await.unwrap();

    let expired = h.service.expire_due(t0() + Duration::hours(2)).await.unwrap();
    assert_eq!(expired, vec![due.id]);
    assert_eq!(h.counters.snapshot().alerts_expired, 1);

    assert_eq!(
        h.service.get(later.id).await.unwrap().status,
        AlertStatus::Active
    );
    assert!(
        h.service
            .expire_due(t0() + Duration::hours(2))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn tracked_entities_are_distinct_and_exclude_expired() {
    let h = setup().await;

    h.service
        .create_or_update_alert(request(1100.0, 1500.0), t0())
        .await
        .unwrap();
    let mut same_entity = request(1000.0, 1500.0);
    same_entity.user_id = "user-7".into();
    h.service.create_or_update_alert(same_entity, t0()).await.unwrap();

    let flight = EntityKey::new(EntityType::Flight, "bkk-hkt-2026-06-01");
    let mut stale = request(2000.0, 3000.0);
    stale.entity = flight;
    stale.expires_at = Some(t0());
    h.service.create_or_update_alert(stale, t0()).await.unwrap();

    let tracked = h
        .service
        .tracked_entities(t0() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(tracked, vec![hotel()]);
}

#[tokio::test]
async fn cancelled_alert_never_fires() {
    let h = setup().await;
    let alert = h
        .service
        .create_or_update_alert(request(1100.0, 1500.0), t0())
        .await
        .unwrap();

    let cancelled = h.service.cancel(alert.id, t0()).await.unwrap();
    assert_eq!(cancelled.status, AlertStatus::Cancelled);

    let eval = h.matcher.evaluate(&hotel(), 900.0, t0()).await.unwrap();
    assert!(eval.decisions.is_empty());

    let err = h.service.cancel(alert.id, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::ConcurrencyConflict { alert_id } if alert_id == alert.id));
}

#[tokio::test]
async fn reactivated_alert_can_fire_again() {
    let h = setup().await;
    let alert = h
        .service
        .create_or_update_alert(request(1100.0, 1500.0), t0())
        .await
        .unwrap();
    h.matcher.evaluate(&hotel(), 1000.0, t0()).await.unwrap();

    let later = t0() + Duration::days(1);
    let reactivated = h.service.reactivate(alert.id, later).await.unwrap();
    assert_eq!(reactivated.status, AlertStatus::Active);
    assert_eq!(reactivated.triggered_price, None);
    assert_eq!(reactivated.triggered_at, None);

    let eval = h.matcher.evaluate(&hotel(), 1050.0, later).await.unwrap();
    assert_eq!(eval.decisions.len(), 1);
}

#[tokio::test]
async fn reactivated_expired_alert_is_tracked_and_fires() {
    let h = setup().await;
    let alert = h
        .service
        .create_or_update_alert(
            AlertRequest {
                expires_at: Some(t0() + Duration::hours(1)),
                ..request(1000.0, 1500.0)
            },
            t0(),
        )
        .await
        .unwrap();

    let next_day = t0() + Duration::days(1);
    assert_eq!(h.service.expire_due(next_day).await.unwrap(), vec![alert.id]);

    let reactivated = h.service.reactivate(alert.id, next_day).await.unwrap();
    assert_eq!(reactivated.status, AlertStatus::Active);
    assert_eq!(reactivated.expires_at, None);

    assert_eq!(h.service.tracked_entities(next_day).await.unwrap(), vec![hotel()]);
    assert!(h.service.expire_due(next_day).await.unwrap().is_empty());

    let eval = h.matcher.evaluate(&hotel(), 900.0, next_day).await.unwrap();
    assert_eq!(eval.decisions.len(), 1);
    assert!(eval.expired.is_empty());
    assert_eq!(
        h.service.get(alert.id).await.unwrap().status,
        AlertStatus::Triggered
    );
}

#[tokio::test]
async fn reactivation_keeps_a_future_expiry() {
    let h = setup().await;
    let expires_at = t0() + Duration::days(7);
    let alert = h
        .service
        .create_or_update_alert(
            AlertRequest {
                expires_at: Some(expires_at),
                ..request(1100.0, 1500.0)
            },
            t0(),
        )
        .await
        .unwrap();
    h.matcher.evaluate(&hotel(), 1000.0, t0()).await.unwrap();

    let reactivated = h
        .service
        .reactivate(alert.id, t0() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(reactivated.status, AlertStatus::Active);
    assert_eq!(reactivated.expires_at, Some(expires_at));
}

#[tokio::test]
async fn reactivation_conflicts_with_a_newer_active_alert() {
    let h = setup().await;
    let old = h
        .service
        .create_or_update_alert(request(1100.0, 1500.0), t0())
        .await
        .unwrap();
    h.matcher.evaluate(&hotel(), 1000.0, t0()).await.unwrap();

    let fresh = h
        .service
        .create_or_update_alert(request(900.0, 1000.0), t0() + Duration::hours(1))
        .await
        .unwrap();
    assert_ne!(fresh.id, old.id);

    let err = h
        .service
        .reactivate(old.id, t0() + Duration::hours(2))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrencyConflict { .. }));
    assert_eq!(active_rows(&h.pool).await, 1);
    assert_eq!(
        h.service.get(old.id).await.unwrap().status,
        AlertStatus::Triggered
    );
}

#[tokio::test]
async fn active_alert_cannot_be_reactivated() {
    let h = setup().await;
    let alert = h
        .service
        .create_or_update_alert(request(1100.0, 1500.0), t0())
        .await
        .unwrap();

    let err = h.service.reactivate(alert.id, t0()).await.unwrap_err();
    assert_eq!(err.kind(), "concurrency_conflict");
}

#[tokio::test]
async fn unknown_alert_is_not_found() {
    let h = setup().await;
    let id = Uuid::new_v4();

    let err = h.service.get(id).await.unwrap_err();
    assert!(matches!(err, EngineError::AlertNotFound { alert_id } if alert_id == id));
}

#[tokio::test]
async fn invalid_request_is_rejected_without_writing() {
    let h = setup().await;

    let err = h
        .service
        .create_or_update_alert(request(-1.0, 1500.0), t0())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let mut blank_user = request(1100.0, 1500.0);
    blank_user.user_id = String::new();
    assert!(h.service.create_or_update_alert(blank_user, t0()).await.is_err());

    assert_eq!(active_rows(&h.pool).await, 0);
}

#[tokio::test]
async fn ceiling_alerts_are_accepted() {
    let h = setup().await;

    let alert = h
        .service
        .create_or_update_alert(request(2500.0, 1500.0), t0())
        .await
        .unwrap();
    assert_eq!(alert.status, AlertStatus::Active);

    // already at or below the ceiling: fires on the next evaluation
    let eval = h.matcher.evaluate(&hotel(), 1500.0, t0()).await.unwrap();
    assert_eq!(eval.decisions.len(), 1);
}

#[tokio::test]
async fn empty_channel_set_defaults_to_email() {
    let h = setup().await;
    let mut req = request(1100.0, 1500.0);
    req.channels.clear();

    let alert = h.service.create_or_update_alert(req, t0()).await.unwrap();
    assert_eq!(alert.channels, BTreeSet::from([NotificationChannel::Email]));
}
