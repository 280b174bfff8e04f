use thiserror::Error;
use uuid::Uuid;

/// Malformed input rejected synchronously at the ingestion or alerting boundary.
/// Nothing is written when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("price must be non-negative, got {0}")]
    NegativePrice(f64),

    #[error("price must be a finite number")]
    NonFinitePrice,

    #[error("unknown entity type: {0:?}")]
    UnknownEntityType(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid currency code: {0:?}")]
    InvalidCurrency(String),

    #[error("price drop percentage must be within (0, 100], got {0}")]
    InvalidPercentage(f64),

    #[error("context of kind {context} does not belong to a {entity} entity")]
    ContextMismatch {
        entity: &'static str,
        context: &'static str,
    },

    #[error("window must cover at least one day, got {0}")]
    InvalidWindow(u32),
}

/// Errors surfaced by the engine's public boundaries.
///
/// "Not enough data" is not an error: the statistics and forecast paths model it
/// as data (`StatisticsSnapshot::is_empty`, `Forecast::InsufficientData`).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("store unavailable: {0:#}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("alert {alert_id} was concurrently transitioned by another process")]
    ConcurrencyConflict { alert_id: Uuid },

    #[error("alert {alert_id} not found")]
    AlertNotFound { alert_id: Uuid },

    #[error("notification delivery failed for alert {alert_id}: {source:#}")]
    NotificationDelivery {
        alert_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("price collection failed: {0:#}")]
    Collection(#[source] anyhow::Error),

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },
}

impl EngineError {
    pub fn store(e: anyhow::Error) -> Self {
        Self::StoreUnavailable(e)
    }

    /// Stable, low-cardinality label used in run reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::AlertNotFound { .. } => "alert_not_found",
            Self::NotificationDelivery { .. } => "notification_delivery",
            Self::Collection(_) => "collection",
            Self::Timeout { .. } => "timeout",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
