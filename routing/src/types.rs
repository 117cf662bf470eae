//! Core value types shared by the registry, classifier, router and dispatcher.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// An enumerated skill a task may require or prefer and a backend may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Code generation, review, debugging
    Code,
    /// Multi-step reasoning, analysis, planning
    Reasoning,
    /// Image understanding
    Vision,
    /// General-purpose chat and writing
    General,
    /// Fast turnaround for interactive or realtime work
    LowLatency,
}

impl Capability {
    /// Every capability, in declaration order.
    pub fn all() -> &'static [Capability] {
        &[
            Capability::Code,
            Capability::Reasoning,
            Capability::Vision,
            Capability::General,
            Capability::LowLatency,
        ]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Reasoning => write!(f, "reasoning"),
            Self::Vision => write!(f, "vision"),
            Self::General => write!(f, "general"),
            Self::LowLatency => write!(f, "low_latency"),
        }
    }
}

/// Stable identifier of a registered backend (e.g. `"codestral"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BackendId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn default_available() -> bool {
    true
}

/// Capability profile of one hosted model endpoint.
///
/// Profiles are values: the registry replaces them wholesale on
/// re-registration and never edits one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    pub id: BackendId,
    pub capabilities: BTreeSet<Capability>,
    /// Relative cost; higher is more expensive. Must be finite and >= 0.
    pub cost_weight: f64,
    /// Maximum context window in tokens
    pub max_context: u32,
    #[serde(default = "default_available")]
    pub available: bool,
}

impl BackendProfile {
    /// Create an available profile with unit cost and a 128K context window.
    pub fn new(id: impl Into<BackendId>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().collect(),
            cost_weight: 1.0,
            max_context: 128_000,
            available: true,
        }
    }

    pub fn with_cost(mut self, cost_weight: f64) -> Self {
        self.cost_weight = cost_weight;
        self
    }

    pub fn with_max_context(mut self, max_context: u32) -> Self {
        self.max_context = max_context;
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Whether this backend offers every capability in `required`.
    pub fn satisfies<'a>(&self, mut required: impl Iterator<Item = &'a Capability>) -> bool {
        required.all(|c| self.has(*c))
    }

    /// Check the numeric fields; returns a message describing the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("backend id must not be empty".to_string());
        }
        if !self.cost_weight.is_finite() || self.cost_weight < 0.0 {
            return Err(format!(
                "cost_weight must be finite and >= 0, got {}",
                self.cost_weight
            ));
        }
        if self.max_context == 0 {
            return Err("max_context must be > 0".to_string());
        }
        Ok(())
    }
}

/// How much a task asks of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Trivial,
    Low,
    Medium,
    High,
    Ultra,
}

impl std::fmt::Display for TaskComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trivial => write!(f, "trivial"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Ultra => write!(f, "ultra"),
        }
    }
}

/// What the caller wants optimised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Quality,
    Speed,
    #[default]
    Balanced,
    Cost,
    Reasoning,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quality => write!(f, "quality"),
            Self::Speed => write!(f, "speed"),
            Self::Balanced => write!(f, "balanced"),
            Self::Cost => write!(f, "cost"),
            Self::Reasoning => write!(f, "reasoning"),
        }
    }
}

/// Capabilities the caller states explicitly. These override anything the
/// classifier infers from the instruction text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityHints {
    #[serde(default)]
    pub required: BTreeSet<Capability>,
    #[serde(default)]
    pub preferred: BTreeSet<Capability>,
}

impl CapabilityHints {
    pub fn require(mut self, capability: Capability) -> Self {
        self.preferred.remove(&capability);
        self.required.insert(capability);
        self
    }

    pub fn prefer(mut self, capability: Capability) -> Self {
        if !self.required.contains(&capability) {
            self.preferred.insert(capability);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.preferred.is_empty()
    }
}

/// One routing request, owned by the caller for the duration of the call.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Correlation id for logs; not used for routing.
    pub id: Uuid,
    pub instruction: String,
    pub hints: Option<CapabilityHints>,
    pub priority: Option<TaskPriority>,
    pub complexity: Option<TaskComplexity>,
    /// Wall-clock budget for the whole dispatch, fallbacks included.
    pub latency_budget: Option<Duration>,
    /// Human-readable label for logs (issue id, step name, ...).
    pub label: String,
}

impl TaskRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instruction: instruction.into(),
            hints: None,
            priority: None,
            complexity: None,
            latency_budget: None,
            label: String::new(),
        }
    }

    pub fn with_hints(mut self, hints: CapabilityHints) -> Self {
        self.hints = Some(hints);
        self
    }

    /// Shorthand for a hint set that requires `capability`.
    pub fn requiring(self, capability: Capability) -> Self {
        let hints = self.hints.clone().unwrap_or_default().require(capability);
        self.with_hints(hints)
    }

    /// Shorthand for a hint set that prefers `capability`.
    pub fn preferring(self, capability: Capability) -> Self {
        let hints = self.hints.clone().unwrap_or_default().prefer(capability);
        self.with_hints(hints)
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_complexity(mut self, complexity: TaskComplexity) -> Self {
        self.complexity = Some(complexity);
        self
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = Some(budget);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
