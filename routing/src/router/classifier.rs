//! Task classification
//!
//! Turns a [`TaskRequest`] into a [`RequirementVector`] using cheap,
//! deterministic heuristics over the instruction text. Explicit hints on the
//! request always win over anything inferred here.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{Capability, CapabilityHints, TaskComplexity, TaskPriority, TaskRequest};

/// How strongly a task asks for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    /// Backends without this capability are excluded outright.
    pub required: bool,
    /// Relative importance when scoring backends that have it.
    pub weight: f64,
}

impl Demand {
    pub fn required(weight: f64) -> Self {
        Self {
            required: true,
            weight,
        }
    }

    pub fn preferred(weight: f64) -> Self {
        Self {
            required: false,
            weight,
        }
    }
}

/// Capability requirements derived from one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementVector {
    pub demands: BTreeMap<Capability, Demand>,
    pub complexity: TaskComplexity,
    pub priority: TaskPriority,
    /// Multiplier applied to every backend's cost penalty.
    pub cost_sensitivity: f64,
    /// Rough prompt size in tokens.
    pub estimated_tokens: u32,
}

impl Default for RequirementVector {
    /// A general-purpose task with nothing special about it.
    fn default() -> Self {
        let mut demands = BTreeMap::new();
        demands.insert(Capability::General, Demand::preferred(1.0));
        Self {
            demands,
            complexity: TaskComplexity::Trivial,
            priority: TaskPriority::Balanced,
            cost_sensitivity: 1.0,
            estimated_tokens: 0,
        }
    }
}

impl RequirementVector {
    pub fn demand(&self, capability: Capability) -> Option<&Demand> {
        self.demands.get(&capability)
    }

    pub fn is_required(&self, capability: Capability) -> bool {
        self.demand(capability).is_some_and(|d| d.required)
    }

    /// Required capabilities in capability order.
    pub fn required(&self) -> Vec<Capability> {
        self.demands
            .iter()
            .filter(|(_, d)| d.required)
            .map(|(c, _)| *c)
            .collect()
    }

    /// Preferred (non-required) capabilities in capability order.
    pub fn preferred(&self) -> Vec<Capability> {
        self.demands
            .iter()
            .filter(|(_, d)| !d.required)
            .map(|(c, _)| *c)
            .collect()
    }

    /// Raise a preference to at least `weight`. Never downgrades a required demand.
    fn prefer(&mut self, capability: Capability, weight: f64) {
        self.demands
            .entry(capability)
            .and_modify(|d| d.weight = d.weight.max(weight))
            .or_insert(Demand::preferred(weight));
    }

    /// Compact summary for logging
    pub fn summary(&self) -> String {
        let fmt = |caps: Vec<Capability>| {
            caps.iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "required=[{}] preferred=[{}] complexity={} priority={} tokens~{}",
            fmt(self.required()),
            fmt(self.preferred()),
            self.complexity,
            self.priority,
            self.estimated_tokens
        )
    }
}

fn strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// Heuristic thresholds and keyword lists for [`TaskClassifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub code_keywords: Vec<String>,
    pub reasoning_keywords: Vec<String>,
    pub vision_keywords: Vec<String>,
    pub latency_keywords: Vec<String>,
    /// Weight of an explicitly hinted capability.
    pub hint_weight: f64,
    /// Weight of a capability inferred from the text.
    pub inferred_weight: f64,
    /// Weight of the baseline `general` preference every task carries.
    pub general_weight: f64,
    /// Texts shorter than this with no cues are `trivial`.
    pub short_text_chars: usize,
    /// Texts longer than this gain a complexity level (and another at 4x).
    pub long_text_chars: usize,
    /// A latency budget at or below this adds a `low_latency` preference.
    pub tight_latency_budget_ms: u64,
    /// Cost sensitivity under `TaskPriority::Cost`.
    pub cost_priority_sensitivity: f64,
    /// Cost sensitivity under `TaskPriority::Quality`.
    pub quality_priority_sensitivity: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            code_keywords: strings(&[
                "code",
                "function",
                "implement",
                "refactor",
                "debug",
                "compile",
                "bug",
                "stack trace",
                "unit test",
                "script",
                "sql",
                "regex",
                "api endpoint",
                "rust",
                "python",
                "typescript",
                "javascript",
            ]),
            reasoning_keywords: strings(&[
                "analyze",
                "analyse",
                "reason",
                "prove",
                "derive",
                "step by step",
                "plan",
                "compare",
                "trade-off",
                "tradeoff",
                "evaluate",
                "why",
                "strategy",
                "architecture",
                "decompose",
            ]),
            vision_keywords: strings(&[
                "image",
                "picture",
                "photo",
                "screenshot",
                "diagram",
                "chart",
                "ocr",
            ]),
            latency_keywords: strings(&[
                "quick",
                "quickly",
                "fast",
                "realtime",
                "real-time",
                "asap",
                "autocomplete",
            ]),
            hint_weight: 1.0,
            inferred_weight: 0.6,
            general_weight: 0.2,
            short_text_chars: 40,
            long_text_chars: 2_000,
            tight_latency_budget_ms: 3_000,
            cost_priority_sensitivity: 2.0,
            quality_priority_sensitivity: 0.5,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("hint_weight", self.hint_weight),
            ("inferred_weight", self.inferred_weight),
            ("general_weight", self.general_weight),
            ("cost_priority_sensitivity", self.cost_priority_sensitivity),
            ("quality_priority_sensitivity", self.quality_priority_sensitivity),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be finite and >= 0, got {value}"));
            }
        }
        if self.long_text_chars <= self.short_text_chars {
            return Err(format!(
                "long_text_chars ({}) must exceed short_text_chars ({})",
                self.long_text_chars, self.short_text_chars
            ));
        }
        Ok(())
    }
}

/// Source-code shapes that mark a task as code work even without keywords.
fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(```|\bfn\s+\w+\s*\(|\bdef\s+\w+\s*\(|\bclass\s+\w+\s*[:({]|#include\s*<|\bimport\s+[\w.]+|\w+::\w+|\w+\([^()]*\)\s*[;{]|=>\s*\{)",
        )
        .expect("code pattern is a valid regex")
    })
}

/// Whole-word matcher over one keyword list.
#[derive(Debug, Clone)]
struct KeywordSet {
    pattern: Option<Regex>,
}

impl KeywordSet {
    fn new(name: &str, keywords: &[String]) -> Self {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(word_pattern)
            .collect();
        if alternatives.is_empty() {
            return Self { pattern: None };
        }
        let source = format!("(?:{})", alternatives.join("|"));
        let pattern = match Regex::new(&source) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(list = name, error = %e, "Keyword list does not compile; ignoring it");
                None
            }
        };
        Self { pattern }
    }

    /// Number of distinct keywords present in `lower`.
    fn hits(&self, lower: &str) -> usize {
        let Some(pattern) = &self.pattern else {
            return 0;
        };
        pattern
            .find_iter(lower)
            .map(|m| m.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Escaped keyword, anchored at word boundaries where its edges are word characters.
fn word_pattern(keyword: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let lead = if is_word(keyword.chars().next()) { r"\b" } else { "" };
    let trail = if is_word(keyword.chars().next_back()) { r"\b" } else { "" };
    format!("{lead}{}{trail}", regex::escape(&keyword.to_lowercase()))
}

/// Classifies tasks into requirement vectors.
#[derive(Debug, Clone)]
pub struct TaskClassifier {
    config: ClassifierConfig,
    code: KeywordSet,
    reasoning: KeywordSet,
    vision: KeywordSet,
    latency: KeywordSet,
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl TaskClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            code: KeywordSet::new("code", &config.code_keywords),
            reasoning: KeywordSet::new("reasoning", &config.reasoning_keywords),
            vision: KeywordSet::new("vision", &config.vision_keywords),
            latency: KeywordSet::new("latency", &config.latency_keywords),
            config,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a task. Never fails; identical inputs give identical output.
    pub fn classify(&self, request: &TaskRequest) -> RequirementVector {
        let text = request.instruction.trim();
        let estimated_tokens = estimate_tokens(text);

        let priority = request.priority.unwrap_or_default();

        let mut vector = if text.chars().any(char::is_alphanumeric) {
            self.infer(text, request, priority)
        } else {
            let mut general_only = RequirementVector::default();
            general_only.demands.insert(
                Capability::General,
                Demand::preferred(self.config.general_weight),
            );
            general_only
        };
        vector.estimated_tokens = estimated_tokens;
        vector.priority = priority;
        vector.cost_sensitivity = self.cost_sensitivity(priority);

        if let Some(complexity) = request.complexity {
            vector.complexity = complexity;
        }
        if let Some(hints) = &request.hints {
            self.apply_hints(&mut vector, hints);
        }
        vector
    }

    fn cost_sensitivity(&self, priority: TaskPriority) -> f64 {
        match priority {
            TaskPriority::Cost => self.config.cost_priority_sensitivity,
            TaskPriority::Quality => self.config.quality_priority_sensitivity,
            _ => 1.0,
        }
    }

    fn infer(&self, text: &str, request: &TaskRequest, priority: TaskPriority) -> RequirementVector {
        let cfg = &self.config;
        let lower = text.to_lowercase();
        let code_hits = self.code.hits(&lower) + usize::from(code_pattern().is_match(text));
        let reasoning_hits = self.reasoning.hits(&lower) + numbered_steps(text);
        let vision_hits = self.vision.hits(&lower);
        let latency_hits = self.latency.hits(&lower);

        let complexity = request
            .complexity
            .unwrap_or_else(|| self.estimate_complexity(text, reasoning_hits));

        let mut vector = RequirementVector {
            demands: BTreeMap::new(),
            complexity,
            priority,
            cost_sensitivity: self.cost_sensitivity(priority),
            estimated_tokens: 0,
        };

        vector.prefer(Capability::General, cfg.general_weight);
        if code_hits > 0 {
            vector.prefer(Capability::Code, cfg.inferred_weight);
        }
        if reasoning_hits > 0 || complexity >= TaskComplexity::High {
            vector.prefer(Capability::Reasoning, cfg.inferred_weight);
        }
        if vision_hits > 0 {
            vector.prefer(Capability::Vision, cfg.inferred_weight);
        }
        if latency_hits > 0 {
            vector.prefer(Capability::LowLatency, cfg.inferred_weight);
        }

        match priority {
            TaskPriority::Speed => vector.prefer(Capability::LowLatency, cfg.hint_weight),
            TaskPriority::Reasoning => vector.prefer(Capability::Reasoning, cfg.hint_weight),
            _ => {}
        }

        let tight = request
            .latency_budget
            .is_some_and(|b| b.as_millis() <= u128::from(cfg.tight_latency_budget_ms));
        if tight {
            vector.prefer(Capability::LowLatency, cfg.inferred_weight);
        }

        vector
    }

    /// Complexity from text length and reasoning cues.
    fn estimate_complexity(&self, text: &str, reasoning_hits: usize) -> TaskComplexity {
        let len = text.chars().count();
        let mut score = 1usize;
        score += reasoning_hits.min(2);
        if len > self.config.long_text_chars {
            score += 1;
        }
        if len > self.config.long_text_chars.saturating_mul(4) {
            score += 1;
        }

        match score {
            1 if len < self.config.short_text_chars => TaskComplexity::Trivial,
            1 => TaskComplexity::Low,
            2 => TaskComplexity::Medium,
            3 => TaskComplexity::High,
            _ => TaskComplexity::Ultra,
        }
    }

    /// Hinted capabilities replace inferred entries wholesale.
    fn apply_hints(&self, vector: &mut RequirementVector, hints: &CapabilityHints) {
        for &capability in &hints.preferred {
            vector
                .demands
                .insert(capability, Demand::preferred(self.config.hint_weight));
        }
        for &capability in &hints.required {
            vector
                .demands
                .insert(capability, Demand::required(self.config.hint_weight));
        }
    }
}

/// Roughly four characters per token.
fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Count of numbered list lines (`1.`, `2)`), capped at one cue.
fn numbered_steps(text: &str) -> usize {
    let steps = text
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            let digits = line.chars().take_while(char::is_ascii_digit).count();
            digits > 0 && matches!(line[digits..].chars().next(), Some('.') | Some(')'))
        })
        .count();
    usize::from(steps >= 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn classify(text: &str) -> RequirementVector {
        TaskClassifier::default().classify(&TaskRequest::new(text))
    }

    #[test]
    fn test_empty_text_is_general_only() {
        for text in ["", "   ", "\n\t", "?!..."] {
            let v = classify(text);
            assert_eq!(v.demands.len(), 1, "text {text:?}");
            assert!(v.demand(Capability::General).is_some());
            assert!(v.required().is_empty());
        }
    }

    #[test]
    fn test_code_keyword_detected() {
        let v = classify("Refactor this function to avoid the extra allocation");
        assert!(v.demand(Capability::Code).is_some());
        assert!(!v.is_required(Capability::Code));
    }

    #[test]
    fn test_code_syntax_detected_without_keywords() {
        let v = classify("what does `fn parse(input: &str)` return here");
        assert!(v.demand(Capability::Code).is_some());

        let v = classify("call std::mem::take on it");
        assert!(v.demand(Capability::Code).is_some());
    }

    #[test]
    fn test_reasoning_and_steps() {
        let v = classify("Analyze the trade-off between the two designs step by step");
        assert!(v.demand(Capability::Reasoning).is_some());
        assert!(v.complexity >= TaskComplexity::Medium);

        let v = classify("Do this:\n1. gather data\n2. summarise it\n3. report back");
        assert!(v.demand(Capability::Reasoning).is_some());
    }

    #[test]
    fn test_vision_and_latency_cues() {
        let v = classify("Describe the screenshot quickly");
        assert!(v.demand(Capability::Vision).is_some());
        assert!(v.demand(Capability::LowLatency).is_some());
    }

    #[test]
    fn test_complexity_by_length() {
        assert_eq!(classify("hello there").complexity, TaskComplexity::Trivial);
        assert_eq!(
            classify("write a short note to the team about friday").complexity,
            TaskComplexity::Low
        );
        let long = "lorem ipsum ".repeat(900);
        let v = classify(&long);
        assert!(v.complexity >= TaskComplexity::High);
        assert!(v.demand(Capability::Reasoning).is_some());
        assert_eq!(v.estimated_tokens, (long.trim().chars().count() as u32).div_ceil(4));
    }

    #[test]
    fn test_hints_override_inferred() {
        let classifier = TaskClassifier::default();
        let request = TaskRequest::new("implement a quicksort function").requiring(Capability::Reasoning);
        let v = classifier.classify(&request);
        assert!(v.is_required(Capability::Reasoning));
        // Inferred code stays as a mere preference.
        assert!(!v.is_required(Capability::Code));
        assert!(v.demand(Capability::Code).is_some());

        let request = TaskRequest::new("implement a quicksort function").preferring(Capability::Code);
        let v = classifier.classify(&request);
        assert_eq!(v.demand(Capability::Code).unwrap().weight, 1.0);
    }

    #[test]
    fn test_hints_apply_to_empty_text() {
        let v = TaskClassifier::default()
            .classify(&TaskRequest::new("").requiring(Capability::Code));
        assert!(v.is_required(Capability::Code));
        assert!(v.demand(Capability::General).is_some());
    }

    #[test]
    fn test_priority_effects() {
        let classifier = TaskClassifier::default();
        let v = classifier
            .classify(&TaskRequest::new("summarise this memo").with_priority(TaskPriority::Speed));
        assert!(v.demand(Capability::LowLatency).is_some());

        let v = classifier
            .classify(&TaskRequest::new("summarise this memo").with_priority(TaskPriority::Cost));
        assert_eq!(v.cost_sensitivity, 2.0);

        let v = classifier.classify(
            &TaskRequest::new("summarise this memo").with_priority(TaskPriority::Quality),
        );
        assert_eq!(v.cost_sensitivity, 0.5);

        let v = classifier.classify(
            &TaskRequest::new("summarise this memo").with_priority(TaskPriority::Reasoning),
        );
        assert_eq!(v.demand(Capability::Reasoning).unwrap().weight, 1.0);
    }

    #[test]
    fn test_tight_latency_budget_prefers_low_latency() {
        let v = TaskClassifier::default().classify(
            &TaskRequest::new("summarise this memo").with_latency_budget(Duration::from_secs(2)),
        );
        assert!(v.demand(Capability::LowLatency).is_some());

        let v = TaskClassifier::default().classify(
            &TaskRequest::new("summarise this memo").with_latency_budget(Duration::from_secs(60)),
        );
        assert!(v.demand(Capability::LowLatency).is_none());
    }

    #[test]
    fn test_complexity_hint_wins() {
        let v = TaskClassifier::default()
            .classify(&TaskRequest::new("hi").with_complexity(TaskComplexity::Ultra));
        assert_eq!(v.complexity, TaskComplexity::Ultra);
        assert!(v.demand(Capability::Reasoning).is_some());
    }

    #[test]
    fn test_deterministic_for_identical_input() {
        let classifier = TaskClassifier::default();
        let text = "Analyze this Rust code and explain the bug:\n```\nfn main() {}\n```";
        let a = classifier.classify(&TaskRequest::new(text).preferring(Capability::Vision));
        let b = classifier.classify(&TaskRequest::new(text).preferring(Capability::Vision));
        assert_eq!(a, b);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        for text in [
            "Write a short essay on the history of democracy",
            "Tell me about trust in teams",
            "What did you eat for breakfast",
        ] {
            let v = classify(text);
            assert_eq!(v.preferred(), vec![Capability::General], "text {text:?}");
        }

        let v = classify("Give an explanation of photosynthesis");
        assert!(v.demand(Capability::Reasoning).is_none());

        let v = classify("make a plan for the offsite");
        assert!(v.demand(Capability::Reasoning).is_some());
        let v = classify("Rust, trust me");
        assert!(v.demand(Capability::Code).is_some());
    }

    #[test]
    fn test_overlapping_keywords_count_once_each() {
        let classifier = TaskClassifier::default();
        assert_eq!(classifier.code.hits("debug the crash"), 1);
        assert_eq!(classifier.code.hits("debug this bug"), 2);
        assert_eq!(classifier.reasoning.hits("weigh the trade-off"), 1);
        assert_eq!(classifier.reasoning.hits("compare, then compare again"), 1);
    }

    #[test]
    fn test_keywords_with_symbol_edges() {
        let config = ClassifierConfig {
            code_keywords: vec!["c++".to_string(), " ".to_string()],
            ..ClassifierConfig::default()
        };
        let classifier = TaskClassifier::new(config);
        assert_eq!(classifier.code.hits("port it to c++ please"), 1);
        assert_eq!(classifier.code.hits("plain prose here"), 0);

        let empty = TaskClassifier::new(ClassifierConfig {
            vision_keywords: Vec::new(),
            ..ClassifierConfig::default()
        });
        assert_eq!(empty.vision.hits("image"), 0);
    }

    #[test]
    fn test_priority_hint_kept_on_empty_text() {
        let classifier = TaskClassifier::default();
        let v = classifier.classify(&TaskRequest::new("").with_priority(TaskPriority::Cost));
        assert_eq!(v.priority, TaskPriority::Cost);
        assert_eq!(v.cost_sensitivity, 2.0);
        assert_eq!(v.demands.len(), 1);

        let v = classifier.classify(&TaskRequest::new("  ?! ").with_priority(TaskPriority::Quality));
        assert_eq!(v.priority, TaskPriority::Quality);
        assert_eq!(v.cost_sensitivity, 0.5);
    }

    #[test]
    fn test_custom_keywords_are_case_insensitive() {
        let config = ClassifierConfig {
            vision_keywords: vec!["Whiteboard".to_string()],
            ..ClassifierConfig::default()
        };
        let v = TaskClassifier::new(config).classify(&TaskRequest::new("transcribe the WHITEBOARD"));
        assert!(v.demand(Capability::Vision).is_some());
    }

    #[test]
    fn test_config_validation() {
        assert!(ClassifierConfig::default().validate().is_ok());
        let bad = ClassifierConfig {
            inferred_weight: -1.0,
            ..ClassifierConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = ClassifierConfig {
            long_text_chars: 10,
            ..ClassifierConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_summary_mentions_required() {
        let v = TaskClassifier::default()
            .classify(&TaskRequest::new("write code").requiring(Capability::Code));
        assert!(v.summary().contains("required=[code]"));
    }
}
