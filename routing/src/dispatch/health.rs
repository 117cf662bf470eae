//! Per-backend health and circuit breaking.
//!
//! Consecutive *transient* failures trip a backend's circuit. While open the
//! dispatcher skips that backend unless it is the last candidate left. After
//! the cooldown the circuit goes half-open and admits a single trial attempt
//! at a time (see [`HealthTracker::try_acquire`]); one success closes it
//! again, a transient failure reopens it.
//!
//! Health never edits the registry. Availability stays an explicit operator
//! decision; the circuit only affects dispatch order within a decision.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

use crate::error::BackendError;
use crate::types::BackendId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy; attempts allowed.
    Closed,
    /// Tripped; skipped until the cooldown expires.
    Open,
    /// Cooldown expired; the next attempt is a trial.
    HalfOpen,
}

/// Observed statistics for one backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendHealth {
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Running mean over successful attempts.
    pub avg_latency_ms: f64,
    pub last_error: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    last_failure_instant: Option<Instant>,
    #[serde(skip)]
    trial_in_flight: bool,
}

impl BackendHealth {
    pub fn success_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            1.0
        } else {
            self.total_successes as f64 / total as f64
        }
    }
}

/// Thread-safe health tracker shared by every dispatch.
#[derive(Debug)]
pub struct HealthTracker {
    entries: Mutex<HashMap<BackendId, BackendHealth>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

impl HealthTracker {
    /// A `failure_threshold` of 0 disables circuit breaking.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            failure_threshold,
            cooldown,
        }
    }

    pub fn record_success(&self, backend: &BackendId, latency: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let health = entries.entry(backend.clone()).or_default();
        health.consecutive_failures = 0;
        health.last_failure_instant = None;
        health.total_successes += 1;
        let n = health.total_successes as f64;
        let ms = latency.as_secs_f64() * 1000.0;
        health.avg_latency_ms += (ms - health.avg_latency_ms) / n;
    }

    /// Record a failed attempt. Only transient failures count toward
    /// tripping the circuit; a fatal error says nothing about availability.
    pub fn record_failure(&self, backend: &BackendId, error: &BackendError) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let health = entries.entry(backend.clone()).or_default();
        health.total_failures += 1;
        health.last_error = Some(error.to_string());
        health.last_failure_at = Some(Utc::now());
        if !error.is_transient() {
            return;
        }
        health.consecutive_failures += 1;
        health.last_failure_instant = Some(Instant::now());
        if self.failure_threshold > 0 && health.consecutive_failures == self.failure_threshold {
            warn!(
                backend = %backend,
                failures = health.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit opened"
            );
        }
    }

    pub fn state(&self, backend: &BackendId) -> CircuitState {
        if self.failure_threshold == 0 {
            return CircuitState::Closed;
        }
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(health) = entries.get(backend) else {
            return CircuitState::Closed;
        };
        if health.consecutive_failures < self.failure_threshold {
            return CircuitState::Closed;
        }
        match health.last_failure_instant {
            Some(at) if at.elapsed() < self.cooldown => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    /// Closed or half-open. A half-open backend may still refuse
    /// [`try_acquire`](Self::try_acquire) while its trial is running.
    pub fn is_available(&self, backend: &BackendId) -> bool {
        self.state(backend) != CircuitState::Open
    }

    /// Ask to send one attempt to `backend`.
    ///
    /// Closed circuits always admit. Open circuits never do. A half-open
    /// circuit admits exactly one trial until its permit is dropped.
    pub fn try_acquire(&self, backend: &BackendId) -> Option<AttemptPermit<'_>> {
        let trial = match self.state(backend) {
            CircuitState::Closed => false,
            CircuitState::Open => return None,
            CircuitState::HalfOpen => {
                let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
                let health = entries.entry(backend.clone()).or_default();
                if health.trial_in_flight {
                    return None;
                }
                health.trial_in_flight = true;
                true
            }
        };
        Some(AttemptPermit {
            tracker: self,
            backend: backend.clone(),
            trial,
        })
    }

    /// Whether a half-open trial is currently running against `backend`.
    pub fn trial_in_flight(&self, backend: &BackendId) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(backend).is_some_and(|h| h.trial_in_flight)
    }

    fn release_trial(&self, backend: &BackendId) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(health) = entries.get_mut(backend) {
            health.trial_in_flight = false;
        }
    }

    pub fn health(&self, backend: &BackendId) -> Option<BackendHealth> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(backend).cloned()
    }

    /// Clear every recorded statistic.
    pub fn reset(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Admission for one attempt. Dropping it frees the half-open trial slot,
/// including when the attempt is cancelled mid-flight.
#[must_use]
#[derive(Debug)]
pub struct AttemptPermit<'a> {
    tracker: &'a HealthTracker,
    backend: BackendId,
    trial: bool,
}

impl AttemptPermit<'_> {
    /// True when this attempt is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

impl Drop for AttemptPermit<'_> {
    fn drop(&mut self) {
        if self.trial {
            self.tracker.release_trial(&self.backend);
        }
    }
}
