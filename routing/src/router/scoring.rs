//! Capability scoring and candidate ordering.
//!
//! # Score
//!
//! ```text
//! score(b) =  Σ required c           required_weight  × weight(c)
//!           + Σ preferred c ∈ caps(b) capability_match × weight(c)
//!           − cost_penalty × cost_weight(b) × cost_sensitivity
//!           − context_shortfall_penalty          (prompt > max_context(b))
//!           + Σ matching affinity bonuses for b
//! ```
//!
//! Backends lacking a required capability are excluded before scoring.
//! Order: score desc, then cost asc, then registration order.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::RequirementVector;
use super::decision::{RoutingDecision, ScoredBackend};
use crate::error::RouteError;
use crate::registry::RegistrySnapshot;
use crate::types::{BackendId, BackendProfile, Capability, TaskComplexity, TaskPriority};

/// Tunable weights of the score formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Multiplier for a met required demand.
    pub required_weight: f64,
    /// Multiplier for a met preferred demand.
    pub capability_match: f64,
    /// Penalty per unit of cost weight.
    pub cost_penalty: f64,
    /// Flat penalty when the estimated prompt exceeds the backend's context.
    pub context_shortfall_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            required_weight: 2.0,
            capability_match: 1.0,
            cost_penalty: 0.5,
            context_shortfall_penalty: 5.0,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("required_weight", self.required_weight),
            ("capability_match", self.capability_match),
            ("cost_penalty", self.cost_penalty),
            ("context_shortfall_penalty", self.context_shortfall_penalty),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be finite and >= 0, got {value}"));
            }
        }
        Ok(())
    }
}

/// Bonus for a named backend when a task matches every stated condition.
///
/// Unset conditions match anything. A capability condition matches when the
/// capability is demanded at all (required or preferred).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityRule {
    pub backend: BackendId,
    #[serde(default)]
    pub complexity: Option<TaskComplexity>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub capability: Option<Capability>,
    pub bonus: f64,
}

impl AffinityRule {
    pub fn matches(&self, vector: &RequirementVector) -> bool {
        self.complexity.map_or(true, |c| c == vector.complexity)
            && self.priority.map_or(true, |p| p == vector.priority)
            && self
                .capability
                .map_or(true, |c| vector.demand(c).is_some())
    }
}

/// Complete router policy: weights, affinities and candidate cap.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterPolicy {
    pub weights: ScoringWeights,
    pub affinities: Vec<AffinityRule>,
    /// Maximum candidates in a decision. Clamped to at least 2 so a
    /// fallback survives whenever two backends are eligible.
    pub max_candidates: Option<usize>,
}

impl RouterPolicy {
    pub fn validate(&self) -> Result<(), String> {
        self.weights.validate()?;
        for rule in &self.affinities {
            if !rule.bonus.is_finite() {
                return Err(format!(
                    "affinity bonus for '{}' must be finite, got {}",
                    rule.backend, rule.bonus
                ));
            }
        }
        if self.max_candidates == Some(0) {
            return Err("max_candidates must be > 0 when set".to_string());
        }
        Ok(())
    }
}

struct Scored<'a> {
    profile: &'a BackendProfile,
    position: usize,
    score: f64,
}

/// Pure, synchronous scorer over a registry snapshot.
#[derive(Debug, Clone, Default)]
pub struct Router {
    policy: RouterPolicy,
}

impl Router {
    pub fn new(policy: RouterPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RouterPolicy {
        &self.policy
    }

    /// Rank every available backend that satisfies the required capabilities.
    pub fn route(
        &self,
        vector: &RequirementVector,
        snapshot: &RegistrySnapshot,
    ) -> Result<RoutingDecision, RouteError> {
        let required = vector.required();
        let mut available = 0usize;
        let mut excluded = Vec::new();
        let mut scored: Vec<Scored<'_>> = Vec::new();

        for (position, profile) in snapshot.iter() {
            if !profile.available {
                continue;
            }
            available += 1;
            if !profile.satisfies(required.iter()) {
                excluded.push(profile.id.clone());
                continue;
            }
            let score = self.score(profile, vector);
            debug!(backend = %profile.id, score, "Scored backend");
            scored.push(Scored {
                profile,
                position,
                score,
            });
        }

        if scored.is_empty() {
            return Err(RouteError::NoEligibleBackend {
                required,
                registered: snapshot.len(),
                available,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.profile.cost_weight.total_cmp(&b.profile.cost_weight))
                .then_with(|| a.position.cmp(&b.position))
        });

        if let Some(max) = self.policy.max_candidates {
            scored.truncate(max.max(2));
        }

        let candidates: Vec<ScoredBackend> = scored
            .iter()
            .map(|s| ScoredBackend {
                backend: s.profile.id.clone(),
                score: s.score,
                cost_weight: s.profile.cost_weight,
            })
            .collect();

        let rationale = build_rationale(&candidates, &excluded, vector);
        Ok(RoutingDecision::new(
            candidates,
            excluded,
            vector.clone(),
            rationale,
        ))
    }

    /// Score one eligible backend.
    pub fn score(&self, profile: &BackendProfile, vector: &RequirementVector) -> f64 {
        let w = &self.policy.weights;
        let mut score = 0.0;

        for (capability, demand) in &vector.demands {
            if !profile.has(*capability) {
                continue;
            }
            let multiplier = if demand.required {
                w.required_weight
            } else {
                w.capability_match
            };
            score += multiplier * demand.weight;
        }

        score -= w.cost_penalty * profile.cost_weight * vector.cost_sensitivity;

        if vector.estimated_tokens > profile.max_context {
            score -= w.context_shortfall_penalty;
        }

        score += self
            .policy
            .affinities
            .iter()
            .filter(|rule| rule.backend == profile.id && rule.matches(vector))
            .map(|rule| rule.bonus)
            .sum::<f64>();

        score
    }
}

fn build_rationale(
    candidates: &[ScoredBackend],
    excluded: &[BackendId],
    vector: &RequirementVector,
) -> String {
    let mut parts = Vec::new();
    if let Some(primary) = candidates.first() {
        parts.push(format!("primary={} ({:.2})", primary.backend, primary.score));
    }
    if candidates.len() > 1 {
        let fallbacks = candidates[1..]
            .iter()
            .map(|c| c.backend.to_string())
            .collect::<Vec<_>>()
            .join(" → ");
        parts.push(format!("fallbacks={}", fallbacks));
    }
    if !excluded.is_empty() {
        parts.push(format!("excluded={}", excluded.len()));
    }
    parts.push(vector.summary());
    parts.join(", ")
}
