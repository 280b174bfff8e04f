use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility. Cloning shares the underlying cells.
#[derive(Clone, Default)]
pub struct Counters {
    // ingestion
    pub observations_recorded: Arc<AtomicU64>,
    pub observations_duplicate: Arc<AtomicU64>,
    pub observations_rejected: Arc<AtomicU64>,
    pub observations_purged: Arc<AtomicU64>,

    // alerting
    pub alerts_triggered: Arc<AtomicU64>,
    pub alert_trigger_conflicts: Arc<AtomicU64>,
    pub alerts_expired: Arc<AtomicU64>,
    pub notifications_sent: Arc<AtomicU64>,
    pub notifications_failed: Arc<AtomicU64>,

    // scheduler
    pub cycles_run: Arc<AtomicU64>,
    pub cycles_skipped_lease: Arc<AtomicU64>,
    pub entities_failed: Arc<AtomicU64>,
    pub entities_deferred: Arc<AtomicU64>,
}

/// Point-in-time copy of all counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub observations_recorded: u64,
    pub observations_duplicate: u64,
    pub observations_rejected: u64,
    pub observations_purged: u64,
    pub alerts_triggered: u64,
    pub alert_trigger_conflicts: u64,
    pub alerts_expired: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub cycles_run: u64,
    pub cycles_skipped_lease: u64,
    pub entities_failed: u64,
    pub entities_deferred: u64,
}

pub(crate) fn bump(cell: &AtomicU64, by: u64) {
    cell.fetch_add(by, Ordering::Relaxed);
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        let r = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);
        CountersSnapshot {
            observations_recorded: r(&self.observations_recorded),
            observations_duplicate: r(&self.observations_duplicate),
            observations_rejected: r(&self.observations_rejected),
            observations_purged: r(&self.observations_purged),
            alerts_triggered: r(&self.alerts_triggered),
            alert_trigger_conflicts: r(&self.alert_trigger_conflicts),
            alerts_expired: r(&self.alerts_expired),
            notifications_sent: r(&self.notifications_sent),
            notifications_failed: r(&self.notifications_failed),
            cycles_run: r(&self.cycles_run),
            cycles_skipped_lease: r(&self.cycles_skipped_lease),
            entities_failed: r(&self.entities_failed),
            entities_deferred: r(&self.entities_deferred),
        }
    }
}
