//! OpenTelemetry-compatible span helpers
//!
//! Structured `tracing` spans for the routing pipeline. Field names use
//! dot notation so they export cleanly as OTel attributes.
//!
//! # Span Hierarchy
//!
//! ```text
//! router.route          (classify + rank, one per request)
//! router.dispatch       (one per request)
//!   └─ router.attempt   (one per backend call)
//! ```

use tracing::Span;

// ── Span Name Constants ──────────────────────────────────────────────

pub const SPAN_ROUTE: &str = "router.route";
pub const SPAN_DISPATCH: &str = "router.dispatch";
pub const SPAN_ATTEMPT: &str = "router.attempt";

// ── Field Name Constants ─────────────────────────────────────────────

pub const FIELD_REQUEST_ID: &str = "router.request_id";
pub const FIELD_LABEL: &str = "router.label";
pub const FIELD_BACKEND: &str = "router.backend";
pub const FIELD_MODEL: &str = "router.model";
pub const FIELD_CANDIDATES: &str = "router.candidates";
pub const FIELD_ATTEMPT: &str = "router.attempt.index";
pub const FIELD_OUTCOME: &str = "router.outcome";
pub const FIELD_RETRY_COUNT: &str = "router.retry_count";
pub const FIELD_SUCCESS: &str = "router.success";
pub const FIELD_DURATION_MS: &str = "router.duration_ms";

// ── Span Builders ────────────────────────────────────────────────────

/// Span around classification and ranking.
///
/// Fields filled later via [`record_route_result`]: primary backend, candidate count.
pub fn route_span(request_id: &str, label: &str) -> Span {
    tracing::info_span!(
        "router.route",
        "router.request_id" = %request_id,
        "router.label" = %label,
        "router.backend" = tracing::field::Empty,
        "router.candidates" = tracing::field::Empty,
        "router.success" = tracing::field::Empty,
    )
}

pub fn record_route_result(span: &Span, primary: Option<&str>, candidates: usize) {
    span.record("router.success", primary.is_some());
    span.record("router.candidates", candidates as u64);
    if let Some(primary) = primary {
        span.record("router.backend", primary);
    }
}

/// Span around a full dispatch, fallbacks included.
///
/// Fields filled later via [`record_dispatch_result`]: success, backend, retries, duration.
pub fn dispatch_span(request_id: &str, label: &str, candidates: usize) -> Span {
    tracing::info_span!(
        "router.dispatch",
        "router.request_id" = %request_id,
        "router.label" = %label,
        "router.candidates" = candidates as u64,
        "router.backend" = tracing::field::Empty,
        "router.success" = tracing::field::Empty,
        "router.retry_count" = tracing::field::Empty,
        "router.duration_ms" = tracing::field::Empty,
    )
}

pub fn record_dispatch_result(
    span: &Span,
    success: bool,
    backend: &str,
    retry_count: u32,
    duration_ms: u64,
) {
    span.record("router.success", success);
    if !backend.is_empty() {
        span.record("router.backend", backend);
    }
    span.record("router.retry_count", retry_count);
    span.record("router.duration_ms", duration_ms);
}

/// Span around one backend call.
pub fn attempt_span(backend: &str, model: &str, index: u32) -> Span {
    tracing::info_span!(
        "router.attempt",
        "router.backend" = %backend,
        "router.model" = %model,
        "router.attempt.index" = index,
        "router.outcome" = tracing::field::Empty,
        "router.duration_ms" = tracing::field::Empty,
    )
}

pub fn record_attempt_result(span: &Span, outcome: &str, duration_ms: u64) {
    span.record("router.outcome", outcome);
    span.record("router.duration_ms", duration_ms);
}
