use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};

use crate::request::ModelRequest;

/// Failures reported by the external model backend.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The backend did not answer within the allotted time.
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    /// The backend could not be reached or crashed.
    #[error("model transport failure: {0}")]
    Transport(String),
    /// The backend answered with nothing usable.
    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Seam to the external inference backend.
///
/// The backend itself (local process, remote service) is an external
/// collaborator; the pipeline only depends on this trait.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Sends the prompt and returns the raw response text.
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

/// Model client that pipes the prompt into an external command's stdin and
/// reads the response from its stdout.
#[derive(Debug, Clone)]
pub struct ProcessModelClient {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessModelClient {
    /// Creates a client spawning `program` with `args` per request.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Parses a full command line ("program arg1 arg2") into a client.
    #[must_use]
    pub fn from_command_line(line: &str, timeout: Duration) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?.to_string();
        let args = parts.map(str::to_string).collect();
        Some(Self::new(program, args, timeout))
    }
}

#[async_trait]
impl ModelClient for ProcessModelClient {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ModelError::Transport(err.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|err| ModelError::Transport(err.to_string()))?;
            drop(stdin);
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|err| ModelError::Transport(err.to_string()))?,
            Err(_) => return Err(ModelError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(ModelError::Transport(format!(
                "model command exited with {}",
                output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(text)
    }
}
