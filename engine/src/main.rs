mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use common::logger::init_tracing;
use common::time::days_before;
use serde::Serialize;

use price_engine::{
    alerts::SqlxAlertRepository,
    collector::IngestOnlyCollector,
    config::AppConfig,
    db::Db,
    forecast::{ForecastConfig, ForecastEngine, ForecastStrategy, backtest},
    metrics::counters::Counters,
    notify::LogNotifier,
    observation::{NewObservation, ObservationStore, repository_sqlx::SqlxObservationRepository},
    scheduler::{Runner, RunnerConfig, RunStatus, SqlxLeaseRepository},
    statistics::StatisticsEngine,
};

use crate::cli::{Cli, Command, strategy_from_cli};

struct App {
    db: Db,
    observations: Arc<ObservationStore>,
    forecasts: Arc<ForecastEngine>,
    counters: Counters,
}

/// Connects, migrates and wires the stores shared by every subcommand.
async fn init_app(cfg: &AppConfig, strategy: Arc<dyn ForecastStrategy>) -> anyhow::Result<App> {
    let db = Db::connect(&cfg.database_url, cfg.max_connections).await?;
    db.migrate().await?;

    let counters = Counters::default();
    let repo = Arc::new(SqlxObservationRepository::new(db.pool.clone()));
    let observations = Arc::new(ObservationStore::new(repo, counters.clone()));
    let forecasts = Arc::new(ForecastEngine::new(
        observations.clone(),
        strategy,
        ForecastConfig::default(),
    ));

    Ok(App {
        db,
        observations,
        forecasts,
        counters,
    })
}

fn build_runner(app: &App, cfg: &AppConfig) -> Runner {
    Runner::new(
        app.observations.clone(),
        Arc::new(SqlxAlertRepository::new(app.db.pool.clone())),
        app.forecasts.clone(),
        Arc::new(IngestOnlyCollector),
        Arc::new(LogNotifier),
        Arc::new(SqlxLeaseRepository::new(app.db.pool.clone())),
        app.counters.clone(),
        RunnerConfig::from(cfg),
    )
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Starts the cycle loop (fixed cadence).
fn start_cycle_loop(runner: Arc<Runner>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let report = runner.run_cycle().await;
            if report.status == RunStatus::Failed {
                tracing::error!(run_id = %report.run_id, error = ?report.error, "cycle failed");
            }
        }
    });
}

/// Starts the retention sweep loop.
fn start_purge_loop(observations: Arc<ObservationStore>, retention_days: u32, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            if let Err(e) = observations
                .purge_older_than(retention_days, Utc::now())
                .await
            {
                tracing::error!(error = %e, "retention sweep failed");
            }
        }
    });
}

/// Accepts either a JSON array or one JSON object per line.
fn parse_observations(raw: &str) -> anyhow::Result<Vec<NewObservation>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("invalid observation array");
    }

    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid observation on line {}", n + 1))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::from_env();

    init_tracing("price-engine", cfg.is_production());

    let app = init_app(&cfg, strategy_from_cli(cli.strategy)).await?;
    let now = Utc::now();

    match cli.command {
        Command::Serve => {
            tracing::info!(
                cycle_interval_s = cfg.cycle_interval.as_secs(),
                purge_interval_s = cfg.purge_interval.as_secs(),
                "starting price engine"
            );

            let runner = Arc::new(build_runner(&app, &cfg));
            start_cycle_loop(runner, cfg.cycle_interval);
            start_purge_loop(app.observations.clone(), cfg.retention_days, cfg.purge_interval);

            tokio::signal::ctrl_c().await?;
            tracing::info!(counters = ?app.counters.snapshot(), "shutdown signal received");
        }

        Command::Cycle => {
            let report = build_runner(&app, &cfg).run_cycle().await;
            print_json(&report)?;
            if report.status == RunStatus::Failed {
                anyhow::bail!("cycle {} failed", report.run_id);
            }
        }

        Command::Purge { days } => {
            let removed = app
                .observations
                .purge_older_than(days.unwrap_or(cfg.retention_days), now)
                .await?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }

        Command::Ingest { path } => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let batch = parse_observations(&raw)?;
            let report = app.observations.record_batch(batch).await?;

            let rejected: Vec<_> = report
                .rejected
                .iter()
                .map(|(idx, e)| serde_json::json!({ "index": idx, "error": e.to_string() }))
                .collect();
            print_json(&serde_json::json!({
                "inserted": report.inserted,
                "duplicates": report.duplicates,
                "rejected": rejected,
            }))?;
        }

        Command::Summarize {
            target,
            window_days,
        } => {
            let stats = StatisticsEngine::new(app.observations.clone())
                .summarize(
                    &target.key(),
                    window_days.unwrap_or(cfg.stats_window_days),
                    now,
                )
                .await?;
            print_json(&stats)?;
        }

        Command::Predict {
            target,
            days_ahead,
            lookback_days,
        } => {
            let forecast = app
                .forecasts
                .predict(
                    &target.key(),
                    days_ahead.unwrap_or(cfg.forecast_days_ahead),
                    lookback_days.unwrap_or(cfg.forecast_lookback_days),
                    now,
                )
                .await?;
            print_json(&forecast)?;
        }

        Command::Backtest {
            target,
            holdout_days,
            lookback_days,
        } => {
            let entity = target.key();
            let lookback = lookback_days.unwrap_or(cfg.forecast_lookback_days);
            let since = days_before(now, u64::from(lookback) + u64::from(holdout_days));
            let history = app.observations.query(&entity, since).await?;

            let outcome = backtest(
                app.forecasts.strategy(),
                app.forecasts.config(),
                &entity,
                &history,
                holdout_days,
                lookback,
            );
            print_json(&outcome)?;
        }
    }

    Ok(())
}
