pub mod lease;
pub mod report;
pub mod runner;

pub use lease::{LeaseRepository, SqlxLeaseRepository};
pub use report::{DeliveryFailure, EntityFailure, RunReport, RunStage, RunStatus};
pub use runner::{Runner, RunnerConfig};
