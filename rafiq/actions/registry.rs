use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    handlers::{
        CalculatorHandler, ClockHandler, EchoHandler, FileAppendHandler, FileDeleteHandler,
        FileListHandler, FileReadHandler, FileWriteHandler, ShellCommandHandler,
        SystemInfoHandler,
    },
    operations::OperationHandler,
};

/// Process-wide table of registered operation handlers.
///
/// Populated once at startup and read-only afterwards; shared across plans
/// via `Arc`. Lookups never panic: an unknown name resolves to `None` and
/// surfaces as an `UnknownOperation` step failure.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    handlers: IndexMap<String, Arc<dyn OperationHandler>>,
}

impl OperationRegistry {
    /// Builds a registry seeded with the builtin handlers.
    #[must_use]
    pub fn production_default() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(ShellCommandHandler::default()));
        registry.register(Arc::new(FileWriteHandler));
        registry.register(Arc::new(FileAppendHandler));
        registry.register(Arc::new(FileReadHandler));
        registry.register(Arc::new(FileDeleteHandler));
        registry.register(Arc::new(FileListHandler));
        registry.register(Arc::new(SystemInfoHandler));
        registry.register(Arc::new(ClockHandler));
        registry.register(Arc::new(CalculatorHandler));
        registry.register(Arc::new(EchoHandler));
        registry
    }

    /// Registers a handler under its declared name.
    pub fn register(&mut self, handler: Arc<dyn OperationHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// Resolves a handler by operation name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered operation names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Name/description pairs for operator consoles.
    #[must_use]
    pub fn describe_all(&self) -> Vec<(String, String)> {
        self.handlers
            .values()
            .map(|handler| (handler.name().to_string(), handler.describe().to_string()))
            .collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_registry_covers_builtin_operations() {
        let registry = OperationRegistry::production_default();
        for name in [
            "shell-command",
            "file-write",
            "file-append",
            "file-read",
            "file-delete",
            "file-list",
            "system-info",
            "clock",
            "calculator",
            "echo",
        ] {
            assert!(registry.resolve(name).is_some(), "missing handler {name}");
        }
    }

    #[test]
    fn unknown_names_resolve_to_none() {
        let registry = OperationRegistry::production_default();
        assert!(registry.resolve("mouse-move").is_none());
    }
}
