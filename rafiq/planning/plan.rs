use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::instruction::Language;

/// Predicate applied to a prior step's outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionTest {
    /// The referenced step succeeded.
    Succeeded,
    /// The referenced step failed.
    Failed,
    /// The referenced step's textual output contains the needle.
    OutputContains(String),
}

/// Gate deciding whether a step runs, evaluated against earlier results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepCondition {
    /// Zero-based index of the step whose outcome is inspected.
    /// Must be strictly less than the owning step's index.
    pub step: usize,
    /// Predicate applied to that step's record.
    pub test: ConditionTest,
}

/// Alternative operation tried when the primary operation fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFallback {
    /// Registered operation name.
    pub operation: String,
    /// Parameter overrides; `None` reuses the step's own parameters.
    #[serde(default)]
    pub parameters: Option<serde_json::Map<String, Value>>,
}

/// One atomic action within a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Name of the registered operation to run.
    pub operation: String,
    /// Human readable description of the step.
    pub description: String,
    /// Flat-or-nested parameter map handed to the handler.
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
    /// Per-step confidence in [0, 1].
    pub confidence: f32,
    /// Optional gate; absence means "always run".
    #[serde(default)]
    pub condition: Option<StepCondition>,
    /// Ordered alternatives tried if the primary operation fails.
    /// An empty list marks the step critical: its failure halts the plan.
    #[serde(default)]
    pub fallbacks: Vec<StepFallback>,
}

impl PlanStep {
    /// Creates a minimal step for the given operation.
    #[must_use]
    pub fn new(operation: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            description: description.into(),
            parameters: serde_json::Map::new(),
            confidence: 1.0,
            condition: None,
            fallbacks: Vec::new(),
        }
    }

    /// Sets a parameter, returning self for chaining.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Whether failure of this step aborts the remainder of the plan.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.fallbacks.is_empty()
    }
}

/// Validated, ordered list of steps satisfying one instruction.
///
/// Never mutated after validation; retries append new steps rather than
/// rewriting existing ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Correlation identifier for auditing.
    pub id: String,
    /// Language the plan was produced for.
    pub language: Language,
    /// Overall confidence in [0, 1].
    pub confidence: f32,
    /// Ordered, non-empty step sequence.
    pub steps: Vec<PlanStep>,
    /// Free-text suggestions surfaced when the plan cannot be executed.
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl Plan {
    /// Creates a plan with a fresh correlation id.
    #[must_use]
    pub fn new(language: Language, confidence: f32, steps: Vec<PlanStep>) -> Self {
        Self {
            id: generate_plan_id(),
            language,
            confidence,
            steps,
            alternatives: Vec::new(),
        }
    }
}

/// Mints a `plan-` prefixed alphanumeric correlation id.
#[must_use]
pub fn generate_plan_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("plan-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_means_no_fallbacks() {
        let mut step = PlanStep::new("echo", "say hi");
        assert!(step.is_critical());
        step.fallbacks.push(StepFallback {
            operation: "shell-command".into(),
            parameters: None,
        });
        assert!(!step.is_critical());
    }

    #[test]
    fn plan_ids_are_unique() {
        let a = Plan::new(Language::English, 0.9, vec![PlanStep::new("echo", "a")]);
        let b = Plan::new(Language::English, 0.9, vec![PlanStep::new("echo", "b")]);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("plan-"));
    }
}
