use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use rafiq_journal::{JsonLogger, LogLevel, LogRecord};
use serde_json::Value;

/// Builder for planning telemetry sinks.
pub struct PlanningTelemetryBuilder {
    component: String,
    log_path: Option<PathBuf>,
}

impl PlanningTelemetryBuilder {
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
    pub fn build(self) -> Result<PlanningTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?),
            None => None,
        };
        Ok(PlanningTelemetry {
            inner: Arc::new(TelemetryInner {
                component: self.component,
                logger,
            }),
        })
    }
}

/// Telemetry handle shared across planning components.
#[derive(Clone)]
pub struct PlanningTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    component: String,
    logger: Option<JsonLogger>,
}

impl fmt::Debug for PlanningTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanningTelemetry")
            .field("component", &self.inner.component)
            .finish()
    }
}

impl PlanningTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(component: impl Into<String>) -> PlanningTelemetryBuilder {
        PlanningTelemetryBuilder::new(component)
    }

    /// Creates a handle with no sinks (events are dropped).
    ///
    /// # Panics
    /// Never: building without a log path cannot fail.
    #[must_use]
    pub fn disabled() -> Self {
        Self::builder("planning").build().expect("no sink to fail")
    }

    /// Logs a structured event; sink errors are reported, never fatal.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(logger) = &self.inner.logger {
            let record =
                LogRecord::new(&self.inner.component, level, message).with_metadata(metadata);
            if let Err(err) = logger.log(&record) {
                eprintln!("planning telemetry write failed: {err:?}");
            }
        }
    }
}
