//! Scheduler/runner for the price pipeline.
//!
//! Responsibilities:
//! - Guard each cycle with a cross-process lease so overlapping invocations
//!   never process the same entity twice.
//! - Sweep expired alerts, then drive every due entity through
//!   COLLECTING -> SUMMARIZING -> MATCHING -> NOTIFYING.
//! - Isolate per-entity failures and report them on the run.
//!
//! Non-responsibilities:
//! - Cadence (the binary's serve loop owns the timer).
//! - Delivery semantics (the notifier decides how to reach a user).
//!
//! Liveness:
//! - Entities not started within the cycle budget are deferred, not failed.
//! - Every collaborator call is bounded by the per-call timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::logger::{TraceId, annotate_entity, child_span, root_span};
use futures::StreamExt;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, warn};

use crate::alerts::{AlertDecision, AlertMatcher, AlertRepository, AlertService};
use crate::collector::PriceCollector;
use crate::config::AppConfig;
use crate::entity::EntityKey;
use crate::error::{EngineError, EngineResult};
use crate::forecast::{Forecast, ForecastEngine};
use crate::metrics::counters::{Counters, bump};
use crate::notify::Notifier;
use crate::observation::ObservationStore;
use crate::scheduler::lease::LeaseRepository;
use crate::scheduler::report::{DeliveryFailure, EntityFailure, RunReport, RunStage};
use crate::statistics::StatisticsEngine;

pub const DEFAULT_SCHEDULER_NAME: &str = "price-cycle";

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Lease row name. Runners sharing a name exclude each other.
    pub name: String,
    pub cycle_budget: Duration,
    pub call_timeout: Duration,
    pub lease_ttl: Duration,
    pub entity_concurrency: usize,
    pub stats_window_days: u32,
    pub forecast_lookback_days: u32,
    pub forecast_days_ahead: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RunnerConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            name: DEFAULT_SCHEDULER_NAME.to_string(),
            cycle_budget: cfg.cycle_budget,
            call_timeout: cfg.call_timeout,
            lease_ttl: cfg.lease_ttl,
            entity_concurrency: cfg.entity_concurrency.max(1),
            stats_window_days: cfg.stats_window_days,
            forecast_lookback_days: cfg.forecast_lookback_days,
            forecast_days_ahead: cfg.forecast_days_ahead,
        }
    }
}

enum EntityOutcome {
    Processed {
        triggered: u64,
        expired: u64,
        delivery_failures: Vec<DeliveryFailure>,
    },
    Failed(EntityFailure),
    Deferred(EntityKey),
}

/// Drives scheduled cycles. Cheap to share behind an `Arc`.
pub struct Runner {
    observations: Arc<ObservationStore>,
    statistics: StatisticsEngine,
    forecasts: Arc<ForecastEngine>,
    alerts: AlertService,
    matcher: AlertMatcher,
    collector: Arc<dyn PriceCollector>,
    notifier: Arc<dyn Notifier>,
    lease: Arc<dyn LeaseRepository>,
    counters: Counters,
    config: RunnerConfig,
}

impl Runner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        observations: Arc<ObservationStore>,
        alert_repo: Arc<dyn AlertRepository>,
        forecasts: Arc<ForecastEngine>,
        collector: Arc<dyn PriceCollector>,
        notifier: Arc<dyn Notifier>,
        lease: Arc<dyn LeaseRepository>,
        counters: Counters,
        config: RunnerConfig,
    ) -> Self {
        Self {
            statistics: StatisticsEngine::new(observations.clone()),
            observations,
            forecasts,
            alerts: AlertService::new(alert_repo.clone(), counters.clone()),
            matcher: AlertMatcher::new(alert_repo, counters.clone()),
            collector,
            notifier,
            lease,
            counters,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub async fn run_cycle(&self) -> RunReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// Runs one cycle as of `now`. Never fails as a whole: problems end up in
    /// the report's status, failures and error fields.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> RunReport {
        let trace_id = TraceId::default();
        let span = root_span("run_cycle", &trace_id);
        self.cycle(trace_id, now).instrument(span).await
    }

    async fn cycle(&self, trace_id: TraceId, now: DateTime<Utc>) -> RunReport {
        let run_id = trace_id.as_str().to_string();
        let started = Instant::now();

        match self
            .lease
            .try_acquire(&self.config.name, &run_id, now, self.config.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                bump(&self.counters.cycles_skipped_lease, 1);
                info!(lease = %self.config.name, "lease held by another runner; skipping cycle");
                return RunReport::skipped(run_id, now);
            }
            Err(e) => {
                error!(error = ?e, "failed to acquire scheduler lease");
                let mut report = RunReport::new(run_id, now);
                report.error = Some(format!("lease unavailable: {e:#}"));
                report.finish(elapsed_since(now, started));
                return report;
            }
        }

        let mut report = RunReport::new(run_id.clone(), now);
        self.run_entities(&mut report, now, started).await;
        report.finish(elapsed_since(now, started));

        bump(&self.counters.cycles_run, 1);

        if let Err(e) = self.lease.record_run(&report).await {
            warn!(error = ?e, "failed to record run history");
        }
        if let Err(e) = self
            .lease
            .release(&self.config.name, &run_id, report.finished_at, report.status)
            .await
        {
            warn!(error = ?e, "failed to release scheduler lease");
        }

        info!(
            status = report.status.as_str(),
            due = report.entities_due,
            processed = report.entities_processed,
            deferred = report.entities_deferred.len(),
            failed = report.failures.len(),
            triggered = report.alerts_triggered,
            expired = report.alerts_expired,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle finished"
        );

        report
    }

    async fn run_entities(&self, report: &mut RunReport, now: DateTime<Utc>, started: Instant) {
        match self.alerts.expire_due(now).await {
            Ok(ids) => report.alerts_expired += ids.len() as u64,
            Err(e) => {
                error!(error = %e, "expiry sweep failed");
                report.error = Some(e.to_string());
                return;
            }
        }

        let due = match self.alerts.tracked_entities(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to load due entities");
                report.error = Some(e.to_string());
                return;
            }
        };

        report.entities_due = due.len() as u64;
        if due.is_empty() {
            debug!("no entities due");
            return;
        }

        let deadline = started + self.config.cycle_budget;

        let outcomes: Vec<EntityOutcome> = futures::stream::iter(due)
            .map(|entity| async move {
                if Instant::now() >= deadline {
                    return EntityOutcome::Deferred(entity);
                }
                let span = child_span("process_entity");
                self.process_entity(entity, now).instrument(span).await
            })
            .buffer_unordered(self.config.entity_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                EntityOutcome::Processed {
                    triggered,
                    expired,
                    delivery_failures,
                } => {
                    report.entities_processed += 1;
                    report.alerts_triggered += triggered;
                    report.alerts_expired += expired;
                    report.delivery_failures.extend(delivery_failures);
                }
                EntityOutcome::Failed(f) => {
                    bump(&self.counters.entities_failed, 1);
                    report.failures.push(f);
                }
                EntityOutcome::Deferred(entity) => {
                    bump(&self.counters.entities_deferred, 1);
                    report.entities_deferred.push(entity);
                }
            }
        }

        if !report.entities_deferred.is_empty() {
            warn!(
                deferred = report.entities_deferred.len(),
                budget_ms = self.config.cycle_budget.as_millis() as u64,
                "cycle budget exhausted; deferring remaining entities"
            );
        }
    }

    async fn process_entity(&self, entity: EntityKey, now: DateTime<Utc>) -> EntityOutcome {
        annotate_entity(entity.entity_type.as_str(), &entity.entity_id);

        let mut stage = RunStage::Collecting;
        match self.pipeline(&entity, now, &mut stage).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(stage = ?stage, kind = e.kind(), error = %e, "entity failed");
                EntityOutcome::Failed(EntityFailure {
                    entity,
                    stage,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn pipeline(
        &self,
        entity: &EntityKey,
        now: DateTime<Utc>,
        stage: &mut RunStage,
    ) -> EngineResult<EntityOutcome> {
        *stage = RunStage::Collecting;
        let fresh = self
            .bounded("collect", self.collector.collect(entity))
            .await?
            .map_err(EngineError::Collection)?;
        if let Some(obs) = fresh {
            self.observations.record(obs).await?;
        }

        *stage = RunStage::Summarizing;
        let stats = self
            .statistics
            .summarize(entity, self.config.stats_window_days, now)
            .await?;
        let forecast = self
            .forecasts
            .predict(
                entity,
                self.config.forecast_days_ahead,
                self.config.forecast_lookback_days,
                now,
            )
            .await?;
        match &forecast {
            Forecast::Ready(f) => debug!(
                mean = stats.mean,
                trend = ?stats.trend,
                best_day = %f.best_day_date,
                best_price = f.best_day_price,
                confidence = f.confidence,
                "entity summarized"
            ),
            Forecast::InsufficientData { observations, .. } => {
                debug!(count = stats.count, observations, "entity summarized without forecast")
            }
        }

        let Some(latest) = self.observations.latest(entity).await? else {
            debug!("no observations yet; nothing to match");
            *stage = RunStage::Idle;
            return Ok(EntityOutcome::Processed {
                triggered: 0,
                expired: 0,
                delivery_failures: Vec::new(),
            });
        };

        *stage = RunStage::Matching;
        let evaluation = self.matcher.evaluate(entity, latest.price, now).await?;

        *stage = RunStage::Notifying;
        let delivery_failures = self.dispatch(&evaluation.decisions).await;

        *stage = RunStage::Idle;
        Ok(EntityOutcome::Processed {
            triggered: evaluation.decisions.len() as u64,
            expired: evaluation.expired.len() as u64,
            delivery_failures,
        })
    }

    /// Delivers decisions concurrently. Failures are logged and returned; the
    /// alerts involved stay TRIGGERED.
    async fn dispatch(&self, decisions: &[AlertDecision]) -> Vec<DeliveryFailure> {
        let results = join_all(decisions.iter().map(|d| async move {
            let res = match self.bounded("notify", self.notifier.notify(d)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(source)) => Err(EngineError::NotificationDelivery {
                    alert_id: d.alert_id,
                    source,
                }),
                Err(timeout) => Err(timeout),
            };
            (d, res)
        }))
        .await;

        let mut failures = Vec::new();
        for (d, res) in results {
            match res {
                Ok(()) => bump(&self.counters.notifications_sent, 1),
                Err(e) => {
                    bump(&self.counters.notifications_failed, 1);
                    warn!(
                        alert_id = %d.alert_id,
                        user_id = %d.user_id,
                        kind = e.kind(),
                        error = %e,
                        "notification delivery failed; alert stays triggered"
                    );
                    failures.push(DeliveryFailure {
                        alert_id: d.alert_id,
                        entity: d.entity.clone(),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        failures
    }

    async fn bounded<F, T>(&self, operation: &'static str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.config.call_timeout, fut)
            .await
            .map_err(|_| EngineError::Timeout {
                operation,
                after_ms: self.config.call_timeout.as_millis() as u64,
            })
    }
}

fn elapsed_since(start: DateTime<Utc>, started: Instant) -> DateTime<Utc> {
    chrono::Duration::from_std(started.elapsed())
        .map(|d| start + d)
        .unwrap_or(start)
}
