use async_trait::async_trait;
use tracing::info;

use crate::alerts::AlertDecision;

/// Delivery collaborator for trigger decisions.
///
/// Delivery failures never undo a trigger: the alert stays TRIGGERED and the
/// failure is reported on the run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, decision: &AlertDecision) -> anyhow::Result<()>;
}

/// Writes decisions to the log. Default for the binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, decision: &AlertDecision) -> anyhow::Result<()> {
        info!(
            target: "notifications",
            alert_id = %decision.alert_id,
            user_id = %decision.user_id,
            entity = %decision.entity,
            entity_name = %decision.entity_name,
            price = decision.triggered_price,
            target_price = decision.target_price,
            currency = %decision.currency,
            channels = ?decision.channels,
            reason = ?decision.reason,
            "price alert notification"
        );
        Ok(())
    }
}
