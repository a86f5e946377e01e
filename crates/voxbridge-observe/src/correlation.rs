//! Correlation spans.
//!
//! Every log line emitted while handling a call carries the call's
//! correlation id. Per-call tasks are instrumented with the span returned by
//! [`call_span`], so fields set here show up on events from all layers.

use tracing::Span;
use voxbridge_types::Dependency;

/// Span covering the whole lifetime of one call.
pub fn call_span(call_id: &str, stream_id: &str) -> Span {
    tracing::info_span!("call", call_id = %call_id, stream_id = %stream_id)
}

/// Child span for a single request to a downstream dependency.
///
/// Clients instrument each breaker-guarded call with it.
pub fn dependency_span(dependency: Dependency) -> Span {
    tracing::debug_span!("dependency", dependency = dependency.as_str())
}
