pub mod matcher;
pub mod model;
pub mod repository;
pub mod repository_sqlx;
pub mod service;

pub use matcher::{AlertMatcher, Evaluation};
pub use model::{
    AlertDecision, AlertRequest, AlertStatus, NotificationChannel, PriceAlert, TriggerReason,
};
pub use repository::AlertRepository;
pub use repository_sqlx::SqlxAlertRepository;
pub use service::AlertService;
