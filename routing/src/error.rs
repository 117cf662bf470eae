//! Error taxonomy for registry, routing and dispatch.
//!
//! ## Retry classification
//!
//! | Error                               | Category  | Effect                         |
//! |-------------------------------------|-----------|--------------------------------|
//! | `BackendError::Timeout`             | transient | advance to next candidate      |
//! | `BackendError::UpstreamTimeout`     | transient | advance to next candidate      |
//! | `BackendError::RateLimited`         | transient | advance to next candidate      |
//! | `BackendError::Server`              | transient | advance to next candidate      |
//! | `BackendError::Connection`          | transient | advance to next candidate      |
//! | `BackendError::BadRequest`          | fatal     | stop, surface `DispatchError::Fatal` |
//! | `BackendError::Auth`                | fatal     | stop, surface `DispatchError::Fatal` |
//! | `BackendError::InvalidResponse`     | fatal     | stop, surface `DispatchError::Fatal` |
//! | `BackendError::Configuration`       | fatal     | stop, surface `DispatchError::Fatal` |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::AttemptRecord;
use crate::types::{BackendId, Capability};

/// Errors from the backend registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("Backend not found: {0}")]
    NotFound(BackendId),

    #[error("Invalid backend profile '{id}': {message}")]
    InvalidProfile { id: BackendId, message: String },
}

/// Errors from the router.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    /// Registry empty, nothing available, or every available backend lacks a
    /// required capability.
    #[error(
        "No eligible backend for required capabilities [{}] ({registered} registered, {available} available)",
        join_capabilities(.required)
    )]
    NoEligibleBackend {
        required: Vec<Capability>,
        registered: usize,
        available: usize,
    },
}

fn join_capabilities(caps: &[Capability]) -> String {
    caps.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whether a backend failure may be retried on the next candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCategory {
    /// Retry via fallback to the next candidate.
    Transient,
    /// Surface immediately; no fallback.
    Fatal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Failure of a single backend attempt.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendError {
    // ── Transient ─────────────────────────────────────────────────────────
    /// Local attempt deadline hit.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered 408.
    #[error("Upstream timed out ({status}): {message}")]
    UpstreamTimeout { status: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Connection failed: {0}")]
    Connection(String),

    // ── Fatal ─────────────────────────────────────────────────────────────
    #[error("Bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BackendError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Timeout(_)
            | Self::UpstreamTimeout { .. }
            | Self::RateLimited(_)
            | Self::Server { .. }
            | Self::Connection(_) => RetryCategory::Transient,
            Self::BadRequest { .. }
            | Self::Auth { .. }
            | Self::InvalidResponse(_)
            | Self::Configuration(_) => RetryCategory::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.retry_category().is_retriable()
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(status: u16, message: impl Into<String>) -> Self {
        Self::BadRequest {
            status,
            message: message.into(),
        }
    }

    pub fn auth(status: u16, message: impl Into<String>) -> Self {
        Self::Auth {
            status,
            message: message.into(),
        }
    }

    /// Map an HTTP status of a failed response onto the taxonomy.
    ///
    /// 408, 429 and 5xx are transient; every other non-success status is fatal.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            401 | 403 => Self::auth(status, message),
            408 => Self::UpstreamTimeout { status, message },
            429 => Self::RateLimited(message),
            500..=599 => Self::server(status, message),
            _ => Self::bad_request(status, message),
        }
    }
}

/// Errors from the dispatcher. Every variant carries the attempt history.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// A non-transient failure; later candidates were not attempted.
    #[error("Fatal failure from backend '{backend}': {source}")]
    Fatal {
        backend: BackendId,
        #[source]
        source: BackendError,
        attempts: Vec<AttemptRecord>,
    },

    /// Every candidate failed transiently or was skipped.
    #[error(
        "All {} candidate backend(s) failed: {}",
        .attempts.len(),
        summarize_attempts(.attempts)
    )]
    AllBackendsFailed { attempts: Vec<AttemptRecord> },

    /// The caller cancelled; the in-flight call was dropped.
    #[error("Dispatch cancelled after {} attempt(s)", .attempts.len())]
    Cancelled {
        backend: Option<BackendId>,
        attempts: Vec<AttemptRecord>,
    },
}

impl DispatchError {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Fatal { attempts, .. }
            | Self::AllBackendsFailed { attempts }
            | Self::Cancelled { attempts, .. } => attempts,
        }
    }

    /// Attempts that reached a backend and failed. Skips and cancellations
    /// are not counted.
    pub fn failure_count(&self) -> u32 {
        self.attempts().iter().filter(|a| a.is_failure()).count() as u32
    }
}

fn summarize_attempts(attempts: &[AttemptRecord]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.backend, a.outcome))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Invalid router configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid {section} config: {message}")]
    Invalid {
        section: &'static str,
        message: String,
    },

    #[error("Environment variable {var}={value:?} is not a valid {expected}")]
    BadEnv {
        var: String,
        value: String,
        expected: &'static str,
    },
}

/// Error returned by the single call surface.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
