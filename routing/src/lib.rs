//! Capability-based model routing.
//!
//! Picks which model backend should serve a task and falls back across
//! alternatives when a backend fails.
//!
//! # Modules
//!
//! - [`registry`]: catalog of backends and their capability profiles
//! - [`router`]: task classification and deterministic backend ranking
//! - [`dispatch`]: sequential fallback with timeouts, cancellation and circuit breaking
//! - [`service`]: the single `execute` entry point tying the above together
//! - [`otel`]: span helpers with OTel-style field names
//!
//! Classification and ranking are pure and synchronous; only dispatch
//! performs I/O.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod otel;
pub mod registry;
pub mod router;
pub mod service;
pub mod types;

pub use config::RouterConfig;
pub use dispatch::{
    AdapterSet, AttemptOutcome, AttemptRecord, Backend, BackendRequest, DispatchConfig,
    DispatchResult, DispatchStatus, Dispatcher, RawResponse, TokenUsage,
};
pub use error::{
    BackendError, ConfigError, DispatchError, RegistryError, RetryCategory, RouteError,
    RouterError,
};
pub use registry::{BackendRegistry, RegistrySnapshot};
pub use router::{
    AffinityRule, RequirementVector, Router, RouterPolicy, RoutingDecision, ScoringWeights,
    TaskClassifier,
};
pub use service::RoutingService;
pub use types::{
    BackendId, BackendProfile, Capability, CapabilityHints, TaskComplexity, TaskPriority,
    TaskRequest,
};
