use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::operations::{ExecutionContext, OperationError, OperationHandler};

/// Returns its `text` parameter unchanged.
///
/// The missing-output sentinel is passed through as-is so callers can see
/// that an interpolation had no data rather than receiving a blank string.
#[derive(Debug, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl OperationHandler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    fn describe(&self) -> &str {
        "Return the `text` parameter as the step output"
    }

    fn validate(&self, parameters: &Map<String, Value>) -> Result<(), OperationError> {
        if parameters.contains_key("text") {
            Ok(())
        } else {
            Err(OperationError::InvalidParameters {
                field: "text",
                detail: "echo requires a `text` parameter".into(),
            })
        }
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        _ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        self.validate(parameters)?;
        Ok(parameters["text"].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::missing_value;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn echoes_text_values_verbatim() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let mut params = Map::new();
        params.insert("text".into(), json!("مرحبا"));
        assert_eq!(EchoHandler.execute(&params, &ctx).await.unwrap(), json!("مرحبا"));
    }

    #[tokio::test]
    async fn surfaces_the_missing_sentinel() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let mut params = Map::new();
        params.insert("text".into(), missing_value(2));
        let output = EchoHandler.execute(&params, &ctx).await.unwrap();
        assert!(crate::operations::is_missing(&output));
    }

    #[tokio::test]
    async fn missing_text_is_invalid() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        assert!(EchoHandler.execute(&Map::new(), &ctx).await.is_err());
    }
}
