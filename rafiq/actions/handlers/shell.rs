use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use crate::operations::{require_str, ExecutionContext, OperationError, OperationHandler};

/// Runs one shell command line and captures its output.
///
/// The child is spawned with `kill_on_drop`, so a controller-enforced
/// timeout reaps it rather than leaking a runaway process.
#[derive(Debug, Clone)]
pub struct ShellCommandHandler {
    shell: String,
}

impl Default for ShellCommandHandler {
    fn default() -> Self {
        Self { shell: "sh".into() }
    }
}

impl ShellCommandHandler {
    /// Creates a handler using a specific shell binary.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl OperationHandler for ShellCommandHandler {
    fn name(&self) -> &str {
        "shell-command"
    }

    fn describe(&self) -> &str {
        "Execute a shell command line and capture stdout, stderr, and the exit code"
    }

    fn validate(&self, parameters: &Map<String, Value>) -> Result<(), OperationError> {
        require_str(parameters, "command").map(|_| ())
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let command = require_str(parameters, "command")?;
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.working_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| OperationError::Handler(format!("failed to spawn shell: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(json!({
                "stdout": stdout,
                "stderr": stderr,
                "exit_code": output.status.code().unwrap_or(0),
            }))
        } else {
            let detail = if stderr.trim().is_empty() {
                format!("command exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            Err(OperationError::Handler(detail))
        }
    }
}
