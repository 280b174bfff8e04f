use std::time::{Duration, Instant};

use tracing::{Span, field};

use super::TraceId;

/// Root span for a scheduler cycle or a one-shot command.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        entity_type = field::Empty,
        entity_id = field::Empty
    )
}

/// Child span; inherits `trace_id` from the enclosing root span.
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        entity_type = field::Empty,
        entity_id = field::Empty
    )
}

/// Records the entity identity on the current span.
pub fn annotate_entity(entity_type: &str, entity_id: &str) {
    let span = Span::current();
    span.record("entity_type", field::display(entity_type));
    span.record("entity_id", field::display(entity_id));
}

/// Awaits `fut` and emits a `performance` warning if it took longer than `max`.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
