use serde_json::{json, Value};

use crate::{
    instruction::{Instruction, Language},
    parser::PlanError,
    plan::{Plan, PlanStep},
};

/// Confidence assigned to deterministically matched plans.
const FALLBACK_CONFIDENCE: f32 = 0.6;

/// One deterministic text-to-operation mapping.
///
/// Pure data: plain phrase strings, never embedded code, so a bad table row
/// can fail validation but can never break the process.
#[derive(Debug, Clone)]
pub struct PatternRule {
    /// Phrases matched case-insensitively against the normalized text.
    pub phrases: Vec<&'static str>,
    /// Restricts the rule to one language; `None` matches any.
    pub language: Option<Language>,
    /// Registered operation the rule maps to.
    pub operation: &'static str,
    /// Description attached to the generated step.
    pub description: &'static str,
    /// Parameters handed to the handler.
    pub parameters: serde_json::Map<String, Value>,
}

impl PatternRule {
    fn new(
        phrases: Vec<&'static str>,
        language: Option<Language>,
        operation: &'static str,
        description: &'static str,
        parameters: Value,
    ) -> Self {
        let parameters = match parameters {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            phrases,
            language,
            operation,
            description,
            parameters,
        }
    }
}

/// Deterministic backup invoked when the model path fails.
///
/// Either matches immediately or reports no match; it never blocks and
/// never produces a plan referencing an unregistered operation (the table
/// is checked against the registry at startup).
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    rules: Vec<PatternRule>,
}

impl PatternMatcher {
    /// Creates a matcher from an explicit rule table.
    #[must_use]
    pub fn new(rules: Vec<PatternRule>) -> Self {
        Self { rules }
    }

    /// Creates a matcher covering the highest-value builtin operations in
    /// English and Arabic.
    #[must_use]
    pub fn with_builtin_rules() -> Self {
        let rules = vec![
            PatternRule::new(
                vec!["list files", "show files", "what files are"],
                Some(Language::English),
                "file-list",
                "List entries of the current directory",
                json!({ "path": "." }),
            ),
            PatternRule::new(
                vec!["اعرض الملفات", "قائمة الملفات", "ما هي الملفات"],
                Some(Language::Arabic),
                "file-list",
                "List entries of the current directory",
                json!({ "path": "." }),
            ),
            PatternRule::new(
                vec!["what time", "current time", "what is the date", "today's date"],
                Some(Language::English),
                "clock",
                "Report the current date and time",
                json!({}),
            ),
            PatternRule::new(
                vec!["كم الساعة", "ما الوقت", "ما هو التاريخ"],
                Some(Language::Arabic),
                "clock",
                "Report the current date and time",
                json!({}),
            ),
            PatternRule::new(
                vec!["system status", "system info", "how much memory"],
                Some(Language::English),
                "system-info",
                "Report host resource information",
                json!({}),
            ),
            PatternRule::new(
                vec!["حالة النظام", "معلومات النظام"],
                Some(Language::Arabic),
                "system-info",
                "Report host resource information",
                json!({}),
            ),
        ];
        Self::new(rules)
    }

    /// Checks every rule against the registered operation names.
    ///
    /// # Errors
    /// [`PlanError::Validation`] naming the first unregistered operation;
    /// run at startup so a bad table row never reaches execution.
    pub fn validate_against(&self, registered: &[String]) -> Result<(), PlanError> {
        for rule in &self.rules {
            if !registered.iter().any(|name| name == rule.operation) {
                return Err(PlanError::Validation {
                    step: None,
                    field: "operation",
                    detail: format!(
                        "fallback rule maps to unregistered operation `{}`",
                        rule.operation
                    ),
                });
            }
        }
        Ok(())
    }

    /// Attempts a deterministic match, first rule wins.
    #[must_use]
    pub fn try_match(&self, instruction: &Instruction) -> Option<Plan> {
        let normalized = instruction.normalized_text();
        for rule in &self.rules {
            if let Some(language) = &rule.language {
                if language != &instruction.language {
                    continue;
                }
            }
            if rule
                .phrases
                .iter()
                .any(|phrase| normalized.contains(&phrase.to_lowercase()))
            {
                let mut step = PlanStep::new(rule.operation, rule.description);
                step.parameters = rule.parameters.clone();
                step.confidence = FALLBACK_CONFIDENCE;
                return Some(Plan::new(
                    instruction.language.clone(),
                    FALLBACK_CONFIDENCE,
                    vec![step],
                ));
            }
        }
        None
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::with_builtin_rules()
    }
}
