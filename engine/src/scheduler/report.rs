use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityKey;

/// Per-entity pipeline stage. `Failed` is terminal for the entity only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStage {
    Idle,
    Collecting,
    Summarizing,
    Matching,
    Notifying,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Ok,
    Degraded,
    Failed,
    /// Another runner held the lease.
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "OK",
            RunStatus::Degraded => "DEGRADED",
            RunStatus::Failed => "FAILED",
            RunStatus::Skipped => "SKIPPED",
        }
    }
}

/// One entity that did not make it through the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity: EntityKey,
    /// Stage the entity was in when it failed.
    pub stage: RunStage,
    /// Stable error label, see `EngineError::kind`.
    pub kind: String,
    pub message: String,
}

/// A trigger whose notification could not be delivered. The alert stays TRIGGERED.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub alert_id: Uuid,
    pub entity: EntityKey,
    pub kind: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities_due: u64,
    pub entities_processed: u64,
    pub entities_deferred: Vec<EntityKey>,
    pub alerts_triggered: u64,
    pub alerts_expired: u64,
    pub failures: Vec<EntityFailure>,
    pub delivery_failures: Vec<DeliveryFailure>,
    /// Set when the cycle could not start its per-entity work at all.
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Ok,
            started_at,
            finished_at: started_at,
            entities_due: 0,
            entities_processed: 0,
            entities_deferred: Vec::new(),
            alerts_triggered: 0,
            alerts_expired: 0,
            failures: Vec::new(),
            delivery_failures: Vec::new(),
            error: None,
        }
    }

    pub fn skipped(run_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Skipped,
            ..Self::new(run_id, now)
        }
    }

    /// Derives the status from the collected outcome and stamps `finished_at`.
    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = finished_at;
        self.status = self.derive_status();
    }

    fn derive_status(&self) -> RunStatus {
        if self.status == RunStatus::Skipped {
            return RunStatus::Skipped;
        }
        if self.error.is_some() {
            return RunStatus::Failed;
        }
        if self.entities_due > 0 && self.entities_processed == 0 && !self.failures.is_empty() {
            return RunStatus::Failed;
        }
        if !self.failures.is_empty()
            || !self.entities_deferred.is_empty()
            || !self.delivery_failures.is_empty()
        {
            return RunStatus::Degraded;
        }
        RunStatus::Ok
    }
}
