use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instruction::Instruction;

/// Prompt handed to the external model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Instruction the request was built for.
    pub instruction_id: Uuid,
    /// Language code the model must answer in.
    pub language: String,
    /// Fully rendered prompt text.
    pub prompt: String,
}

/// Builds deterministic model requests from instructions.
///
/// Pure: the same instruction and configuration always render the same
/// prompt, and no I/O happens here. An empty instruction still produces a
/// request; it fails downstream validation instead.
#[derive(Debug, Clone)]
pub struct PlanRequestBuilder {
    context_window: usize,
    operations: Vec<String>,
}

impl PlanRequestBuilder {
    /// Creates a builder embedding at most `context_window` prior exchanges.
    #[must_use]
    pub fn new(context_window: usize, operations: Vec<String>) -> Self {
        Self {
            context_window,
            operations,
        }
    }

    /// Number of prior exchanges embedded in each prompt.
    #[must_use]
    pub const fn context_window(&self) -> usize {
        self.context_window
    }

    /// Renders the model request for an instruction.
    #[must_use]
    pub fn build(&self, instruction: &Instruction) -> ModelRequest {
        let mut prompt = String::new();
        prompt.push_str(
            "You translate a user's natural-language instruction into a strict JSON action plan.\n\
             Respond with JSON only, no commentary, matching this schema:\n\
             {\n  \"language\": \"<code>\",\n  \"confidence\": <0.0-1.0>,\n  \"plan\": [\n    {\n      \"step\": <1-based index>,\n      \"description\": \"<what this step does>\",\n      \"operation\": \"<registered operation name>\",\n      \"parameters\": { },\n      \"confidence\": <0.0-1.0>,\n      \"condition\": {\"step\": <earlier 0-based index>, \"test\": \"succeeded\"},\n      \"fallbacks\": [{\"operation\": \"<name>\", \"parameters\": { }}]\n    }\n  ],\n  \"alternatives\": [\"<human readable suggestion>\"]\n}\n\
             `condition` and `fallbacks` are optional. A condition may only reference an earlier step.\n",
        );

        prompt.push_str("\nRegistered operations:\n");
        for operation in &self.operations {
            let _ = writeln!(prompt, "- {operation}");
        }

        let window = instruction.context.window(self.context_window);
        if !window.is_empty() {
            prompt.push_str("\nRecent exchanges (oldest first):\n");
            for exchange in window {
                let status = if exchange.succeeded { "ok" } else { "failed" };
                let _ = writeln!(
                    prompt,
                    "- [{status}] \"{}\" -> {}",
                    exchange.instruction, exchange.outcome
                );
            }
        }

        let _ = write!(
            prompt,
            "\nInstruction language: {}\nInstruction:\n{}\n",
            instruction.language.code(),
            instruction.text
        );

        ModelRequest {
            instruction_id: instruction.id,
            language: instruction.language.code().to_string(),
            prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{ConversationContext, Exchange};

    fn builder() -> PlanRequestBuilder {
        PlanRequestBuilder::new(2, vec!["echo".into(), "file-list".into()])
    }

    #[test]
    fn embeds_text_language_and_operations() {
        let instruction = Instruction::new("list files in the current directory");
        let request = builder().build(&instruction);
        assert_eq!(request.language, "en");
        assert!(request.prompt.contains("list files in the current directory"));
        assert!(request.prompt.contains("- file-list"));
        assert!(request.prompt.contains("\"plan\""));
    }

    #[test]
    fn bounds_embedded_context() {
        let mut context = ConversationContext::new(8);
        for idx in 0..5 {
            context.push(Exchange {
                instruction: format!("older {idx}"),
                outcome: "done".into(),
                succeeded: true,
            });
        }
        let instruction = Instruction::new("next").with_context(context);
        let prompt = builder().build(&instruction).prompt;
        assert!(!prompt.contains("older 2"));
        assert!(prompt.contains("older 3"));
        assert!(prompt.contains("older 4"));
    }

    #[test]
    fn empty_text_still_builds() {
        let request = builder().build(&Instruction::new(""));
        assert!(request.prompt.contains("Instruction:"));
    }
}
