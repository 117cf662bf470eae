//! Routing decision types
//!
//! Final output of the router: an explicit, inspectable candidate order.

use serde::{Deserialize, Serialize};

use super::classifier::RequirementVector;
use crate::types::BackendId;

/// One eligible backend with the score that placed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredBackend {
    pub backend: BackendId,
    pub score: f64,
    pub cost_weight: f64,
}

/// Ordered candidates for one task: primary first, then fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    candidates: Vec<ScoredBackend>,
    /// Available backends dropped for lacking a required capability.
    pub excluded: Vec<BackendId>,
    pub requirements: RequirementVector,
    /// Human-readable explanation for logs
    pub rationale: String,
}

impl RoutingDecision {
    pub fn new(
        candidates: Vec<ScoredBackend>,
        excluded: Vec<BackendId>,
        requirements: RequirementVector,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            candidates,
            excluded,
            requirements,
            rationale: rationale.into(),
        }
    }

    /// A decision over a fixed order with zero scores.
    ///
    /// Useful when the caller pins the order itself and skips scoring.
    pub fn ordered(backends: impl IntoIterator<Item = impl Into<BackendId>>) -> Self {
        let candidates = backends
            .into_iter()
            .map(|b| ScoredBackend {
                backend: b.into(),
                score: 0.0,
                cost_weight: 0.0,
            })
            .collect();
        Self::new(
            candidates,
            Vec::new(),
            RequirementVector::default(),
            "pinned order",
        )
    }

    pub fn candidates(&self) -> &[ScoredBackend] {
        &self.candidates
    }

    pub fn primary(&self) -> Option<&ScoredBackend> {
        self.candidates.first()
    }

    pub fn fallbacks(&self) -> &[ScoredBackend] {
        self.candidates.get(1..).unwrap_or_default()
    }

    pub fn backend_ids(&self) -> Vec<&BackendId> {
        self.candidates.iter().map(|c| &c.backend).collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
