//! Forecast Engine: bounded-horizon price predictions with a confidence score.

pub mod backtest;
pub mod engine;
pub mod strategy;

pub use backtest::{BacktestOutcome, BacktestReport, backtest};
pub use engine::{Forecast, ForecastConfig, ForecastEngine, ForecastResult, confidence_from_cv};
pub use strategy::{
    ExponentialSmoothingStrategy, ForecastPoint, ForecastStrategy, TrendSeasonalStrategy,
};
