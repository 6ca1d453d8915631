use std::{
    path::{Component, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Step-local failures reported while resolving or running an operation.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The named operation has no registered handler.
    #[error("unknown operation `{name}`")]
    UnknownOperation {
        /// Operation name that failed to resolve.
        name: String,
    },
    /// The handler did not finish within the per-step timeout.
    #[error("operation timed out after {limit_ms} ms")]
    Timeout {
        /// Timeout that was exceeded, in milliseconds.
        limit_ms: u64,
    },
    /// The parameter map was missing or malformed for this handler.
    #[error("invalid parameter `{field}`: {detail}")]
    InvalidParameters {
        /// Offending parameter name.
        field: &'static str,
        /// What the parameter violated.
        detail: String,
    },
    /// Handler-reported failure with a message.
    #[error("{0}")]
    Handler(String),
    /// Execution was cancelled cooperatively before the step ran.
    #[error("execution cancelled")]
    Cancelled,
}

/// Builds the sentinel passed where a referenced step produced no output.
///
/// Handlers receive this object instead of an empty string so they can
/// distinguish "no data" from "empty data".
#[must_use]
pub fn missing_value(step: usize) -> Value {
    json!({ "$missing": step })
}

/// Whether a value is the missing-output sentinel.
#[must_use]
pub fn is_missing(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.contains_key("$missing"))
}

/// Cooperative cancellation flag shared between a caller and a running plan.
///
/// Checked between steps only; in-flight handlers are opaque and are
/// bounded by the per-step timeout instead.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the owning plan.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Context handed to every handler invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Base directory that relative file paths resolve against.
    pub working_dir: PathBuf,
    /// Per-step execution timeout.
    pub step_timeout: Duration,
    /// Cooperative cancellation flag for the owning plan.
    pub cancel: CancelFlag,
    /// Suppresses interactive confirmations downstream.
    pub fast_mode: bool,
    /// Language code of the originating instruction ("en", "ar", ...).
    pub language: String,
}

impl ExecutionContext {
    /// Creates a context rooted at `working_dir` with defaults elsewhere.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            step_timeout: Duration::from_secs(30),
            cancel: CancelFlag::new(),
            fast_mode: false,
            language: "en".into(),
        }
    }

    /// Overrides the per-step timeout.
    #[must_use]
    pub const fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Attaches a cancellation flag.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the instruction language code.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Resolves a possibly relative path against the working directory.
    ///
    /// Relative paths are confined to the working directory: a `..` chain
    /// that would climb above it is rejected before any filesystem access.
    ///
    /// # Errors
    /// [`OperationError::InvalidParameters`] when a relative path escapes
    /// the working directory.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, OperationError> {
        let candidate = PathBuf::from(raw);
        if candidate.is_absolute() {
            return Ok(candidate);
        }
        let mut depth: usize = 0;
        for component in candidate.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| OperationError::InvalidParameters {
                            field: "path",
                            detail: format!("`{raw}` escapes the working directory"),
                        })?;
                }
                _ => depth += 1,
            }
        }
        Ok(self.working_dir.join(candidate))
    }
}

/// Registered capability that executes a step's named operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Stable name used verbatim as a step's operation identifier.
    fn name(&self) -> &str;

    /// One-line human readable description.
    fn describe(&self) -> &str;

    /// Cheap structural check of the parameter map before execution.
    ///
    /// # Errors
    /// [`OperationError::InvalidParameters`] naming the offending field.
    fn validate(&self, _parameters: &Map<String, Value>) -> Result<(), OperationError> {
        Ok(())
    }

    /// Executes the operation and returns its structured output.
    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, OperationError>;
}

/// Reads a required string parameter.
///
/// # Errors
/// [`OperationError::InvalidParameters`] when absent or not a string.
pub fn require_str<'a>(
    parameters: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, OperationError> {
    parameters
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| OperationError::InvalidParameters {
            field,
            detail: "expected a string value".into(),
        })
}

/// Reads an optional string parameter with a default.
#[must_use]
pub fn optional_str<'a>(
    parameters: &'a Map<String, Value>,
    field: &str,
    default: &'a str,
) -> &'a str {
    parameters
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trips() {
        let sentinel = missing_value(3);
        assert!(is_missing(&sentinel));
        assert!(!is_missing(&json!({"path": "."})));
        assert!(!is_missing(&json!("")));
    }

    #[test]
    fn cancel_flag_is_shared_across_clones() {
        let flag = CancelFlag::new();
        let peer = flag.clone();
        assert!(!peer.is_cancelled());
        flag.cancel();
        assert!(peer.is_cancelled());
    }

    #[test]
    fn relative_paths_resolve_against_working_dir() {
        let ctx = ExecutionContext::new("/tmp/rafiq");
        assert_eq!(
            ctx.resolve_path("notes.txt").unwrap(),
            PathBuf::from("/tmp/rafiq/notes.txt")
        );
        assert_eq!(ctx.resolve_path("/etc/hosts").unwrap(), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn parent_traversal_out_of_working_dir_is_rejected() {
        let ctx = ExecutionContext::new("/tmp/rafiq");
        assert!(matches!(
            ctx.resolve_path("../escaped.txt"),
            Err(OperationError::InvalidParameters { field: "path", .. })
        ));
        assert!(matches!(
            ctx.resolve_path("sub/../../escaped.txt"),
            Err(OperationError::InvalidParameters { field: "path", .. })
        ));
        // Descending and coming back up stays inside.
        assert!(ctx.resolve_path("sub/../notes.txt").is_ok());
    }
}
