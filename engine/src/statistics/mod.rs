//! Statistics Engine: descriptive statistics and trend over a trailing window.

pub mod engine;
pub mod welford;

pub use engine::{BestObservation, StatisticsEngine, StatisticsSnapshot};
pub use welford::{Trend, WindowAccumulator, classify_trend};
