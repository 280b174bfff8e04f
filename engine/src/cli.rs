use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};

use price_engine::entity::{EntityKey, EntityType};
use price_engine::forecast::{ExponentialSmoothingStrategy, ForecastStrategy, TrendSeasonalStrategy};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyCli {
    /// Linear trend between de-seasonalized endpoints plus weekday factors.
    TrendSeasonal,
    /// Simple exponential smoothing plus weekday factors.
    Smoothing,
}

#[derive(Debug, Parser)]
#[clap(name = "price-engine", version, about = "Price observation, forecasting and alerting engine")]
pub struct Cli {
    /// Forecast strategy used by cycles, `predict` and `backtest`.
    #[clap(long, value_enum, global = true, default_value_t = StrategyCli::TrendSeasonal)]
    pub strategy: StrategyCli,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run cycles and retention sweeps on their cadences until Ctrl-C.
    Serve,

    /// Run a single cycle and print its report as JSON.
    Cycle,

    /// Remove observations older than the retention window.
    Purge {
        /// Overrides RETENTION_DAYS.
        #[clap(long)]
        days: Option<u32>,
    },

    /// Ingest observations from a JSON array or JSON-lines file.
    Ingest {
        path: PathBuf,
    },

    /// Print statistics for one entity.
    Summarize {
        #[clap(flatten)]
        target: EntityArgs,

        #[clap(long)]
        window_days: Option<u32>,
    },

    /// Print a forecast for one entity.
    Predict {
        #[clap(flatten)]
        target: EntityArgs,

        #[clap(long)]
        days_ahead: Option<u32>,

        #[clap(long)]
        lookback_days: Option<u32>,
    },

    /// Replay the last `holdout_days` of history against the forecast strategy.
    Backtest {
        #[clap(flatten)]
        target: EntityArgs,

        #[clap(long, default_value_t = 7)]
        holdout_days: u32,

        #[clap(long)]
        lookback_days: Option<u32>,
    },
}

#[derive(Debug, Args)]
pub struct EntityArgs {
    /// hotel, flight or tour
    #[clap(long)]
    pub entity_type: EntityType,

    #[clap(long)]
    pub entity_id: String,
}

impl EntityArgs {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id.clone())
    }
}

pub(crate) fn strategy_from_cli(s: StrategyCli) -> Arc<dyn ForecastStrategy> {
    match s {
        StrategyCli::TrendSeasonal => Arc::new(TrendSeasonalStrategy),
        StrategyCli::Smoothing => Arc::new(ExponentialSmoothingStrategy::default()),
    }
}
