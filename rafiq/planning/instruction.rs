use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Language an instruction was written in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Language {
    /// English text.
    English,
    /// Arabic text.
    Arabic,
    /// Any other declared language code.
    Other(String),
}

impl Language {
    /// Returns the short language code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::English => "en",
            Self::Arabic => "ar",
            Self::Other(code) => code,
        }
    }

    /// Parses a declared language code, defaulting unknown codes to `Other`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "en" | "eng" | "english" => Self::English,
            "ar" | "ara" | "arabic" => Self::Arabic,
            other => Self::Other(other.to_string()),
        }
    }

    /// Detects the language of a text by script.
    ///
    /// Any Arabic-block character marks the text Arabic; everything else is
    /// treated as English, which is the dominant default for shell-adjacent
    /// instructions.
    #[must_use]
    pub fn detect(text: &str) -> Self {
        let arabic = text
            .chars()
            .any(|c| ('\u{0600}'..='\u{06FF}').contains(&c) || ('\u{0750}'..='\u{077F}').contains(&c));
        if arabic {
            Self::Arabic
        } else {
            Self::English
        }
    }
}

/// Caller-supplied flags attached to an instruction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstructionMetadata {
    /// Suppresses downstream confirmations when set.
    pub fast_mode: bool,
    /// Optional operator identity.
    pub requester: Option<String>,
}

/// One prior instruction/outcome pair retained for context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// Raw text of the earlier instruction.
    pub instruction: String,
    /// Short summary of what happened.
    pub outcome: String,
    /// Whether the earlier plan succeeded overall.
    pub succeeded: bool,
}

/// Bounded, ordered history of prior exchanges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    exchanges: VecDeque<Exchange>,
    capacity: usize,
}

impl ConversationContext {
    /// Creates an empty context retaining at most `capacity` exchanges.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            exchanges: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Records an exchange, evicting the oldest once over capacity.
    pub fn push(&mut self, exchange: Exchange) {
        self.exchanges.push_back(exchange);
        while self.exchanges.len() > self.capacity {
            self.exchanges.pop_front();
        }
    }

    /// Returns the most recent `n` exchanges, oldest first.
    #[must_use]
    pub fn window(&self, n: usize) -> Vec<&Exchange> {
        let skip = self.exchanges.len().saturating_sub(n);
        self.exchanges.iter().skip(skip).collect()
    }

    /// Number of retained exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// Whether no exchanges are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Normalized unit of natural-language work.
///
/// Immutable once created; the plan built for it refers back via `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    /// Unique identifier.
    pub id: Uuid,
    /// Raw user text, verbatim.
    pub text: String,
    /// Declared or detected language.
    pub language: Language,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Caller-supplied flags.
    pub metadata: InstructionMetadata,
    /// Bounded history of prior exchanges.
    pub context: ConversationContext,
}

impl Instruction {
    /// Creates an instruction, detecting the language from the text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let language = Language::detect(&text);
        Self::with_language(text, language)
    }

    /// Creates an instruction with a declared language.
    #[must_use]
    pub fn with_language(text: impl Into<String>, language: Language) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            language,
            created_at: Utc::now(),
            metadata: InstructionMetadata::default(),
            context: ConversationContext::default(),
        }
    }

    /// Attaches metadata, returning self for chaining.
    #[must_use]
    pub fn with_metadata(mut self, metadata: InstructionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attaches conversation context, returning self for chaining.
    #[must_use]
    pub fn with_context(mut self, context: ConversationContext) -> Self {
        self.context = context;
        self
    }

    /// Normalized form of the text used for fingerprinting and matching:
    /// trimmed, lowercased, inner whitespace collapsed.
    #[must_use]
    pub fn normalized_text(&self) -> String {
        self.text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Computes the stable cache fingerprint over the normalized text, the
    /// language code, and the same bounded context slice the request builder
    /// embeds. Two materially identical requests share a fingerprint.
    #[must_use]
    pub fn fingerprint(&self, context_window: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized_text().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.language.code().as_bytes());
        for exchange in self.context.window(context_window) {
            hasher.update([0u8]);
            hasher.update(exchange.instruction.as_bytes());
            hasher.update([if exchange.succeeded { 1u8 } else { 0u8 }]);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_arabic_script() {
        assert_eq!(Language::detect("اعرض الملفات"), Language::Arabic);
        assert_eq!(Language::detect("list files"), Language::English);
    }

    #[test]
    fn context_is_bounded() {
        let mut context = ConversationContext::new(2);
        for idx in 0..5 {
            context.push(Exchange {
                instruction: format!("i{idx}"),
                outcome: "ok".into(),
                succeeded: true,
            });
        }
        assert_eq!(context.len(), 2);
        let window = context.window(2);
        assert_eq!(window[0].instruction, "i3");
        assert_eq!(window[1].instruction, "i4");
    }

    #[test]
    fn fingerprint_ignores_incidental_whitespace() {
        let a = Instruction::new("  List   Files ");
        let b = Instruction::new("list files");
        assert_eq!(a.fingerprint(4), b.fingerprint(4));
    }

    #[test]
    fn fingerprint_changes_with_language_and_context() {
        let a = Instruction::with_language("hello", Language::English);
        let b = Instruction::with_language("hello", Language::Arabic);
        assert_ne!(a.fingerprint(4), b.fingerprint(4));

        let mut context = ConversationContext::new(4);
        context.push(Exchange {
            instruction: "earlier".into(),
            outcome: "ok".into(),
            succeeded: true,
        });
        let c = Instruction::with_language("hello", Language::English).with_context(context);
        assert_ne!(a.fingerprint(4), c.fingerprint(4));
    }
}
