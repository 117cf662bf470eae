//! Task classification and backend ranking.
//!
//! A [`TaskRequest`](crate::types::TaskRequest) flows through two pure steps:
//!
//! ```text
//! TaskRequest ─► TaskClassifier ─► RequirementVector ─► Router ─► RoutingDecision
//!                                                         ▲
//!                                              RegistrySnapshot
//! ```
//!
//! Neither step performs I/O; the same inputs always produce the same output.

pub mod classifier;
pub mod decision;
pub mod scoring;

pub use classifier::{ClassifierConfig, Demand, RequirementVector, TaskClassifier};
pub use decision::{RoutingDecision, ScoredBackend};
pub use scoring::{AffinityRule, Router, RouterPolicy, ScoringWeights};
