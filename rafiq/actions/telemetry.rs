use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use rafiq_journal::{JsonLogger, LogLevel, LogRecord};
use serde_json::Value;

/// Builder for action telemetry sinks.
pub struct ActionTelemetryBuilder {
    component: String,
    log_path: Option<PathBuf>,
}

impl ActionTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            log_path: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Builds the telemetry handle.
    ///
    /// # Errors
    /// Propagates logger creation failures.
    pub fn build(self) -> Result<ActionTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?),
            None => None,
        };
        Ok(ActionTelemetry {
            inner: Arc::new(TelemetryInner {
                component: self.component,
                logger,
            }),
        })
    }
}

/// Telemetry handle shared by the controller and its call sites.
#[derive(Clone)]
pub struct ActionTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    component: String,
    logger: Option<JsonLogger>,
}

impl fmt::Debug for ActionTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTelemetry")
            .field("component", &self.inner.component)
            .finish()
    }
}

impl ActionTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(component: impl Into<String>) -> ActionTelemetryBuilder {
        ActionTelemetryBuilder::new(component)
    }

    /// Creates a handle with no sinks (events are dropped).
    ///
    /// # Panics
    /// Never: building without a log path cannot fail.
    #[must_use]
    pub fn disabled() -> Self {
        Self::builder("actions").build().expect("no sink to fail")
    }

    /// Logs a structured event; sink errors are reported, never fatal.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(logger) = &self.inner.logger {
            let record =
                LogRecord::new(&self.inner.component, level, message).with_metadata(metadata);
            if let Err(err) = logger.log(&record) {
                eprintln!("action telemetry write failed: {err:?}");
            }
        }
    }
}
