//! Observation Store: durable, append-only log of observed prices.

pub mod model;
pub mod repository;
pub mod repository_sqlx;
pub mod store;

pub use model::{BatchReport, InsertOutcome, NewObservation, ObservationContext, PriceObservation};
pub use store::ObservationStore;
