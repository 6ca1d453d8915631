use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::{
    instruction::Language,
    plan::{ConditionTest, Plan, PlanStep, StepCondition, StepFallback},
};

/// Failure channels of the plan parser/validator.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The raw response held no deserializable payload.
    #[error("malformed plan payload: {detail}")]
    Parse {
        /// What went wrong while deserializing.
        detail: String,
    },
    /// The payload deserialized but violated the plan schema.
    #[error("invalid plan (step {step:?}, field `{field}`): {detail}")]
    Validation {
        /// Offending step index, when step-local.
        step: Option<usize>,
        /// Offending field name.
        field: &'static str,
        /// What the field violated.
        detail: String,
    },
}

/// Converts a raw model response into a validated [`Plan`].
///
/// Pure transformation: no I/O, no model calls, exactly one extraction
/// strategy per response. Unknown extra fields are ignored for forward
/// compatibility; missing required fields are fatal.
pub struct PlanParser {
    fence: Regex,
}

impl PlanParser {
    /// Creates a parser.
    ///
    /// # Panics
    /// Never: the fence pattern is a fixed literal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fence: Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("fixed fence pattern"),
        }
    }

    /// Parses and validates a raw response.
    ///
    /// # Errors
    /// [`PlanError::Parse`] when no structured payload can be deserialized,
    /// [`PlanError::Validation`] when the payload violates the schema.
    pub fn parse(&self, raw: &str, language_hint: &Language) -> Result<Plan, PlanError> {
        let candidate = self.extract_payload(raw);
        let value: Value = serde_json::from_str(&candidate).map_err(|err| PlanError::Parse {
            detail: err.to_string(),
        })?;
        self.validate(&value, language_hint)
    }

    /// Picks exactly one candidate payload out of the raw response: the
    /// first fenced block if any, else the outermost brace slice, else the
    /// trimmed response itself.
    fn extract_payload(&self, raw: &str) -> String {
        if let Some(captures) = self.fence.captures(raw) {
            return captures[1].trim().to_string();
        }
        if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
            if start < end {
                return raw[start..=end].to_string();
            }
        }
        raw.trim().to_string()
    }

    fn validate(&self, value: &Value, language_hint: &Language) -> Result<Plan, PlanError> {
        let Some(envelope) = value.as_object() else {
            return Err(PlanError::Validation {
                step: None,
                field: "plan",
                detail: "payload is not a JSON object".into(),
            });
        };

        let language = envelope
            .get("language")
            .and_then(Value::as_str)
            .map_or_else(|| language_hint.clone(), Language::from_code);

        let confidence = match envelope.get("confidence") {
            None => 0.5,
            Some(value) => read_confidence(value, None)?,
        };

        let raw_steps = envelope
            .get("plan")
            .and_then(Value::as_array)
            .ok_or(PlanError::Validation {
                step: None,
                field: "plan",
                detail: "missing `plan` array".into(),
            })?;
        if raw_steps.is_empty() {
            return Err(PlanError::Validation {
                step: None,
                field: "plan",
                detail: "a plan with zero steps is invalid".into(),
            });
        }

        let mut steps = Vec::with_capacity(raw_steps.len());
        for (index, raw_step) in raw_steps.iter().enumerate() {
            steps.push(validate_step(raw_step, index)?);
        }

        let alternatives = envelope
            .get("alternatives")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut plan = Plan::new(language, confidence, steps);
        plan.alternatives = alternatives;
        Ok(plan)
    }
}

impl Default for PlanParser {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_step(raw: &Value, index: usize) -> Result<PlanStep, PlanError> {
    let Some(step) = raw.as_object() else {
        return Err(PlanError::Validation {
            step: Some(index),
            field: "plan",
            detail: "step is not a JSON object".into(),
        });
    };

    let operation = step
        .get("operation")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or(PlanError::Validation {
            step: Some(index),
            field: "operation",
            detail: "missing or empty operation name".into(),
        })?
        .to_string();

    let description = step
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let parameters = match step.get("parameters") {
        None | Some(Value::Null) => serde_json::Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(PlanError::Validation {
                step: Some(index),
                field: "parameters",
                detail: "parameters must be a key/value map".into(),
            })
        }
    };

    let confidence = match step.get("confidence") {
        None => 1.0,
        Some(value) => read_confidence(value, Some(index))?,
    };

    let condition = match step.get("condition") {
        None | Some(Value::Null) => None,
        Some(raw_condition) => Some(validate_condition(raw_condition, index)?),
    };

    let fallbacks = match step.get("fallbacks") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut fallbacks = Vec::with_capacity(items.len());
            for item in items {
                fallbacks.push(validate_fallback(item, index)?);
            }
            fallbacks
        }
        Some(_) => {
            return Err(PlanError::Validation {
                step: Some(index),
                field: "fallbacks",
                detail: "fallbacks must be an array".into(),
            })
        }
    };

    Ok(PlanStep {
        operation,
        description,
        parameters,
        confidence,
        condition,
        fallbacks,
    })
}

fn validate_condition(raw: &Value, index: usize) -> Result<StepCondition, PlanError> {
    let Some(condition) = raw.as_object() else {
        return Err(PlanError::Validation {
            step: Some(index),
            field: "condition",
            detail: "condition must be an object".into(),
        });
    };

    let referenced = condition
        .get("step")
        .and_then(Value::as_u64)
        .and_then(|step| usize::try_from(step).ok())
        .ok_or(PlanError::Validation {
            step: Some(index),
            field: "condition",
            detail: "condition is missing a `step` index".into(),
        })?;

    if referenced >= index {
        return Err(PlanError::Validation {
            step: Some(index),
            field: "condition",
            detail: format!("condition references step {referenced}, which is not earlier"),
        });
    }

    let test = match condition.get("test") {
        Some(Value::String(name)) => match name.as_str() {
            "succeeded" => ConditionTest::Succeeded,
            "failed" => ConditionTest::Failed,
            other => {
                return Err(PlanError::Validation {
                    step: Some(index),
                    field: "condition",
                    detail: format!("unknown condition test `{other}`"),
                })
            }
        },
        Some(Value::Object(map)) => {
            let needle =
                map.get("output_contains")
                    .and_then(Value::as_str)
                    .ok_or(PlanError::Validation {
                        step: Some(index),
                        field: "condition",
                        detail: "unknown condition test object".into(),
                    })?;
            ConditionTest::OutputContains(needle.to_string())
        }
        _ => {
            return Err(PlanError::Validation {
                step: Some(index),
                field: "condition",
                detail: "condition is missing a `test`".into(),
            })
        }
    };

    Ok(StepCondition {
        step: referenced,
        test,
    })
}

fn validate_fallback(raw: &Value, index: usize) -> Result<StepFallback, PlanError> {
    let Some(fallback) = raw.as_object() else {
        return Err(PlanError::Validation {
            step: Some(index),
            field: "fallbacks",
            detail: "fallback entry must be an object".into(),
        });
    };

    let operation = fallback
        .get("operation")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or(PlanError::Validation {
            step: Some(index),
            field: "fallbacks",
            detail: "fallback entry is missing an operation name".into(),
        })?
        .to_string();

    let parameters = match fallback.get("parameters") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => {
            return Err(PlanError::Validation {
                step: Some(index),
                field: "fallbacks",
                detail: "fallback parameters must be a key/value map".into(),
            })
        }
    };

    Ok(StepFallback {
        operation,
        parameters,
    })
}

fn read_confidence(value: &Value, step: Option<usize>) -> Result<f32, PlanError> {
    let Some(number) = value.as_f64() else {
        return Err(PlanError::Validation {
            step,
            field: "confidence",
            detail: "confidence must be a number".into(),
        });
    };
    if !(0.0..=1.0).contains(&number) {
        return Err(PlanError::Validation {
            step,
            field: "confidence",
            detail: format!("confidence {number} is outside [0, 1]"),
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    let confidence = number as f32;
    Ok(confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Plan, PlanError> {
        PlanParser::new().parse(raw, &Language::English)
    }

    #[test]
    fn parses_fenced_payload_wrapped_in_prose() {
        let raw = "Sure, here is the plan:\n```json\n{\"language\": \"en\", \"confidence\": 0.92, \"plan\": [{\"operation\": \"file-list\", \"description\": \"list cwd\", \"parameters\": {\"path\": \".\"}, \"confidence\": 0.95}]}\n```\nLet me know!";
        let plan = parse(raw).unwrap();
        assert_eq!(plan.language, Language::English);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].operation, "file-list");
        assert_eq!(plan.steps[0].parameters["path"], ".");
        assert!(plan.confidence >= 0.9);
    }

    #[test]
    fn parses_bare_payload_without_fences() {
        let raw = "{\"plan\": [{\"operation\": \"echo\", \"parameters\": {\"text\": \"hi\"}}]}";
        let plan = parse(raw).unwrap();
        assert_eq!(plan.steps[0].operation, "echo");
        assert!((plan.steps[0].confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn truncated_json_is_a_parse_error() {
        let raw = "{\"plan\": [{\"operation\": \"echo\"";
        assert!(matches!(parse(raw), Err(PlanError::Parse { .. })));
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = parse("{\"plan\": []}").unwrap_err();
        match err {
            PlanError::Validation { field, .. } => assert_eq!(field, "plan"),
            PlanError::Parse { .. } => panic!("expected validation error"),
        }
    }

    #[test]
    fn missing_operation_names_the_step() {
        let raw = "{\"plan\": [{\"operation\": \"echo\"}, {\"description\": \"no op\"}]}";
        match parse(raw).unwrap_err() {
            PlanError::Validation { step, field, .. } => {
                assert_eq!(step, Some(1));
                assert_eq!(field, "operation");
            }
            PlanError::Parse { .. } => panic!("expected validation error"),
        }
    }

    #[test]
    fn forward_condition_reference_is_rejected() {
        let raw = "{\"plan\": [{\"operation\": \"echo\", \"condition\": {\"step\": 0, \"test\": \"succeeded\"}}]}";
        match parse(raw).unwrap_err() {
            PlanError::Validation { step, field, .. } => {
                assert_eq!(step, Some(0));
                assert_eq!(field, "condition");
            }
            PlanError::Parse { .. } => panic!("expected validation error"),
        }
    }

    #[test]
    fn scalar_parameters_are_rejected() {
        let raw = "{\"plan\": [{\"operation\": \"echo\", \"parameters\": \"hi\"}]}";
        match parse(raw).unwrap_err() {
            PlanError::Validation { field, .. } => assert_eq!(field, "parameters"),
            PlanError::Parse { .. } => panic!("expected validation error"),
        }
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let raw = "{\"confidence\": 1.4, \"plan\": [{\"operation\": \"echo\"}]}";
        assert!(matches!(
            parse(raw),
            Err(PlanError::Validation {
                field: "confidence",
                ..
            })
        ));
    }

    #[test]
    fn conditions_and_fallbacks_round_trip() {
        let raw = r#"{"plan": [
            {"operation": "shell-command", "parameters": {"command": "true"}},
            {"operation": "echo",
             "condition": {"step": 0, "test": {"output_contains": "ok"}},
             "fallbacks": [{"operation": "file-list", "parameters": {"path": "."}}]}
        ]}"#;
        let plan = parse(raw).unwrap();
        let second = &plan.steps[1];
        assert_eq!(
            second.condition,
            Some(StepCondition {
                step: 0,
                test: ConditionTest::OutputContains("ok".into()),
            })
        );
        assert_eq!(second.fallbacks[0].operation, "file-list");
        assert!(!second.is_critical());
    }

    #[test]
    fn unknown_extra_fields_are_ignored() {
        let raw = "{\"model\": \"x\", \"plan\": [{\"operation\": \"echo\", \"mood\": \"sunny\"}]}";
        assert!(parse(raw).is_ok());
    }
}
