//! Dispatcher: sequential fallback over a routing decision.
//!
//! # Attempt loop
//!
//! ```text
//! for candidate in decision (primary first):
//!     cancelled?            → Cancelled
//!     budget exhausted?     → skip rest, AllBackendsFailed
//!     circuit open & more?  → skip
//!     no adapter?           → Fatal(Configuration)
//!     submit ⟂ timeout ⟂ cancel
//!         ok        → DispatchResult
//!         transient → record, next
//!         fatal     → Fatal
//! all tried         → AllBackendsFailed
//! ```
//!
//! Attempts are strictly sequential; there is no hedging.

pub mod backend;
pub mod health;

pub use backend::{AdapterSet, Backend, BackendRequest, RawResponse, TokenUsage};
pub use health::{AttemptPermit, BackendHealth, CircuitState, HealthTracker};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::error::{BackendError, DispatchError};
use crate::otel;
use crate::router::RoutingDecision;
use crate::types::{BackendId, TaskRequest};

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { error: BackendError },
    /// Not called at all (open circuit, exhausted budget).
    Skipped { reason: String },
    Cancelled,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { error } => write!(f, "failed ({})", error),
            Self::Skipped { reason } => write!(f, "skipped ({})", reason),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One entry of the attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub backend: BackendId,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    pub at: DateTime<Utc>,
}

impl AttemptRecord {
    fn new(backend: BackendId, outcome: AttemptOutcome, latency_ms: u64) -> Self {
        Self {
            backend,
            outcome,
            latency_ms,
            at: Utc::now(),
        }
    }

    pub fn succeeded(backend: BackendId, latency_ms: u64) -> Self {
        Self::new(backend, AttemptOutcome::Succeeded, latency_ms)
    }

    pub fn failed(backend: BackendId, error: BackendError, latency_ms: u64) -> Self {
        Self::new(backend, AttemptOutcome::Failed { error }, latency_ms)
    }

    pub fn skipped(backend: BackendId, reason: impl Into<String>) -> Self {
        Self::new(
            backend,
            AttemptOutcome::Skipped {
                reason: reason.into(),
            },
            0,
        )
    }

    pub fn cancelled(backend: BackendId, latency_ms: u64) -> Self {
        Self::new(backend, AttemptOutcome::Cancelled, latency_ms)
    }

    /// A call was made and it failed.
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed { .. })
    }
}

/// Whether the answering backend was the decision's primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Primary,
    Fallback,
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Normalized successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub request_id: Uuid,
    pub backend: BackendId,
    /// Provider-reported model, else the adapter's configured model.
    pub model: String,
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    /// Latency of the successful attempt.
    pub latency_ms: u64,
    /// Wall time across every attempt.
    pub total_latency_ms: u64,
    pub status: DispatchStatus,
    /// Failed attempts before the successful one. Skips are not retries.
    pub retry_count: u32,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on a single backend call.
    pub attempt_timeout_ms: u64,
    /// Consecutive transient failures that open a circuit; 0 disables.
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 120_000,
            circuit_failure_threshold: 3,
            circuit_cooldown_secs: 60,
        }
    }
}

impl DispatchConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.attempt_timeout_ms == 0 {
            return Err("attempt_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

enum Step {
    Done(Result<RawResponse, BackendError>),
    Cancelled,
}

/// Executes routing decisions against the adapter set.
#[derive(Debug)]
pub struct Dispatcher {
    adapters: AdapterSet,
    config: DispatchConfig,
    health: Arc<HealthTracker>,
}

impl Dispatcher {
    pub fn new(adapters: AdapterSet, config: DispatchConfig) -> Self {
        let health = Arc::new(HealthTracker::new(
            config.circuit_failure_threshold,
            Duration::from_secs(config.circuit_cooldown_secs),
        ));
        Self {
            adapters,
            config,
            health,
        }
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub async fn dispatch(
        &self,
        decision: &RoutingDecision,
        request: &TaskRequest,
    ) -> Result<DispatchResult, DispatchError> {
        self.dispatch_with_cancel(decision, request, &CancellationToken::new())
            .await
    }

    /// Dispatch, aborting the in-flight call when `cancel` fires.
    pub async fn dispatch_with_cancel(
        &self,
        decision: &RoutingDecision,
        request: &TaskRequest,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, DispatchError> {
        let span = otel::dispatch_span(&request.id.to_string(), &request.label, decision.len());
        let started = Instant::now();
        let result = self
            .run(decision, request, cancel, started)
            .instrument(span.clone())
            .await;
        let total_ms = elapsed_ms(started);
        match &result {
            Ok(r) => {
                otel::record_dispatch_result(&span, true, r.backend.as_str(), r.retry_count, total_ms);
                info!(
                    request_id = %request.id,
                    backend = %r.backend,
                    status = %r.status,
                    retry_count = r.retry_count,
                    latency_ms = r.latency_ms,
                    "Dispatch succeeded"
                );
            }
            Err(e) => {
                otel::record_dispatch_result(&span, false, "", e.failure_count(), total_ms);
                warn!(request_id = %request.id, error = %e, "Dispatch failed");
            }
        }
        result
    }

    async fn run(
        &self,
        decision: &RoutingDecision,
        request: &TaskRequest,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<DispatchResult, DispatchError> {
        let backend_request = BackendRequest::from_task(request);
        let candidates = decision.candidates();
        let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(candidates.len());

        for (index, candidate) in candidates.iter().enumerate() {
            let id = &candidate.backend;
            let is_last = index + 1 == candidates.len();

            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled {
                    backend: None,
                    attempts,
                });
            }

            let remaining = match request.latency_budget {
                Some(budget) => {
                    let left = budget.saturating_sub(started.elapsed());
                    if left.is_zero() {
                        for rest in &candidates[index..] {
                            warn!(backend = %rest.backend, "Skipping candidate: latency budget exhausted");
                            attempts.push(AttemptRecord::skipped(
                                rest.backend.clone(),
                                "latency budget exhausted",
                            ));
                        }
                        return Err(DispatchError::AllBackendsFailed { attempts });
                    }
                    Some(left)
                }
                None => None,
            };

            let permit = self.health.try_acquire(id);
            if permit.is_none() && !is_last {
                let reason = match self.health.state(id) {
                    CircuitState::HalfOpen => "circuit half-open, trial in flight",
                    _ => "circuit open",
                };
                warn!(backend = %id, reason, "Skipping candidate");
                attempts.push(AttemptRecord::skipped(id.clone(), reason));
                continue;
            }

            let Some(adapter) = self.adapters.get(id) else {
                let error = BackendError::Configuration(format!("no adapter registered for '{}'", id));
                attempts.push(AttemptRecord::failed(id.clone(), error.clone(), 0));
                return Err(DispatchError::Fatal {
                    backend: id.clone(),
                    source: error,
                    attempts,
                });
            };

            let timeout = remaining.map_or(self.config.attempt_timeout(), |left| {
                left.min(self.config.attempt_timeout())
            });

            let span = otel::attempt_span(id.as_str(), adapter.model(), index as u32);
            let attempt_started = Instant::now();
            let step = async {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Cancelled,
                    res = tokio::time::timeout(timeout, adapter.submit(&backend_request)) => {
                        Step::Done(res.unwrap_or(Err(BackendError::Timeout(timeout))))
                    }
                }
            }
            .instrument(span.clone())
            .await;
            let latency = attempt_started.elapsed();
            let latency_ms = latency.as_millis() as u64;

            match step {
                Step::Cancelled => {
                    otel::record_attempt_result(&span, "cancelled", latency_ms);
                    info!(backend = %id, "Dispatch cancelled mid-attempt");
                    attempts.push(AttemptRecord::cancelled(id.clone(), latency_ms));
                    return Err(DispatchError::Cancelled {
                        backend: Some(id.clone()),
                        attempts,
                    });
                }
                Step::Done(Ok(raw)) => {
                    otel::record_attempt_result(&span, "succeeded", latency_ms);
                    self.health.record_success(id, latency);
                    let retry_count = attempts.iter().filter(|a| a.is_failure()).count() as u32;
                    attempts.push(AttemptRecord::succeeded(id.clone(), latency_ms));
                    return Ok(DispatchResult {
                        request_id: request.id,
                        backend: id.clone(),
                        model: raw.model.unwrap_or_else(|| adapter.model().to_string()),
                        content: raw.content,
                        usage: raw.usage,
                        finish_reason: raw.finish_reason,
                        latency_ms,
                        total_latency_ms: elapsed_ms(started),
                        status: if index == 0 {
                            DispatchStatus::Primary
                        } else {
                            DispatchStatus::Fallback
                        },
                        retry_count,
                        attempts,
                    });
                }
                Step::Done(Err(error)) => {
                    let category = error.retry_category();
                    otel::record_attempt_result(&span, &category.to_string(), latency_ms);
                    self.health.record_failure(id, &error);
                    attempts.push(AttemptRecord::failed(id.clone(), error.clone(), latency_ms));
                    if !category.is_retriable() {
                        warn!(backend = %id, error = %error, "Fatal backend failure, not falling back");
                        return Err(DispatchError::Fatal {
                            backend: id.clone(),
                            source: error,
                            attempts,
                        });
                    }
                    warn!(
                        backend = %id,
                        error = %error,
                        remaining = candidates.len() - index - 1,
                        "Transient backend failure, falling back"
                    );
                }
            }
        }

        Err(DispatchError::AllBackendsFailed { attempts })
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
