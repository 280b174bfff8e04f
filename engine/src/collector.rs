use async_trait::async_trait;

use crate::entity::EntityKey;
use crate::observation::NewObservation;

/// Source of fresh prices, polled by the scheduler once per due entity.
///
/// `Ok(None)` means the source had nothing new; the cycle then matches against
/// the latest stored observation.
#[async_trait]
pub trait PriceCollector: Send + Sync {
    async fn collect(&self, entity: &EntityKey) -> anyhow::Result<Option<NewObservation>>;
}

/// Collector for deployments where observations arrive only through ingestion.
#[derive(Clone, Copy, Debug, Default)]
pub struct IngestOnlyCollector;

#[async_trait]
impl PriceCollector for IngestOnlyCollector {
    async fn collect(&self, _entity: &EntityKey) -> anyhow::Result<Option<NewObservation>> {
        Ok(None)
    }
}
