use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::fs;

use crate::operations::{
    optional_str, require_str, ExecutionContext, OperationError, OperationHandler,
};

fn io_error(detail: std::io::Error) -> OperationError {
    OperationError::Handler(detail.to_string())
}

/// Creates or overwrites a file with the given content.
#[derive(Debug, Clone, Copy)]
pub struct FileWriteHandler;

#[async_trait]
impl OperationHandler for FileWriteHandler {
    fn name(&self) -> &str {
        "file-write"
    }

    fn describe(&self) -> &str {
        "Create or overwrite a file with the given content"
    }

    fn validate(&self, parameters: &Map<String, Value>) -> Result<(), OperationError> {
        require_str(parameters, "path").map(|_| ())
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let path = ctx.resolve_path(require_str(parameters, "path")?)?;
        let content = optional_str(parameters, "content", "");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        fs::write(&path, content.as_bytes()).await.map_err(io_error)?;
        Ok(json!({ "path": path, "bytes": content.len() }))
    }
}

/// Appends content to a file, creating it if absent.
#[derive(Debug, Clone, Copy)]
pub struct FileAppendHandler;

#[async_trait]
impl OperationHandler for FileAppendHandler {
    fn name(&self) -> &str {
        "file-append"
    }

    fn describe(&self) -> &str {
        "Append content to a file, creating it if absent"
    }

    fn validate(&self, parameters: &Map<String, Value>) -> Result<(), OperationError> {
        require_str(parameters, "path").map(|_| ())
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let path = ctx.resolve_path(require_str(parameters, "path")?)?;
        let content = optional_str(parameters, "content", "");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let existing = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(io_error(err)),
        };
        let mut combined = existing;
        combined.extend_from_slice(content.as_bytes());
        fs::write(&path, &combined).await.map_err(io_error)?;
        Ok(json!({ "path": path, "bytes": combined.len() }))
    }
}

/// Reads a file's content as UTF-8 text.
#[derive(Debug, Clone, Copy)]
pub struct FileReadHandler;

#[async_trait]
impl OperationHandler for FileReadHandler {
    fn name(&self) -> &str {
        "file-read"
    }

    fn describe(&self) -> &str {
        "Read a file's content as text"
    }

    fn validate(&self, parameters: &Map<String, Value>) -> Result<(), OperationError> {
        require_str(parameters, "path").map(|_| ())
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let path = ctx.resolve_path(require_str(parameters, "path")?)?;
        let content = fs::read_to_string(&path).await.map_err(io_error)?;
        Ok(json!({ "path": path, "content": content }))
    }
}

/// Deletes a single file.
#[derive(Debug, Clone, Copy)]
pub struct FileDeleteHandler;

#[async_trait]
impl OperationHandler for FileDeleteHandler {
    fn name(&self) -> &str {
        "file-delete"
    }

    fn describe(&self) -> &str {
        "Delete a single file"
    }

    fn validate(&self, parameters: &Map<String, Value>) -> Result<(), OperationError> {
        require_str(parameters, "path").map(|_| ())
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let path = ctx.resolve_path(require_str(parameters, "path")?)?;
        fs::remove_file(&path).await.map_err(io_error)?;
        Ok(json!({ "path": path, "deleted": true }))
    }
}

/// Lists the entry names of a directory.
#[derive(Debug, Clone, Copy)]
pub struct FileListHandler;

#[async_trait]
impl OperationHandler for FileListHandler {
    fn name(&self) -> &str {
        "file-list"
    }

    fn describe(&self) -> &str {
        "List the entry names of a directory (default: the working directory)"
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let path = ctx.resolve_path(optional_str(parameters, "path", "."))?;
        let mut reader = fs::read_dir(&path).await.map_err(io_error)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(io_error)? {
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        entries.sort();
        Ok(json!({ "path": path, "entries": entries }))
    }
}
