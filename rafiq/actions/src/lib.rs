#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Rafiq operation execution: handler interface, registry, builtin
//! handlers, and the sequential plan execution controller.

/// Handler trait, error taxonomy, execution context, cancellation.
#[path = "../operations.rs"]
pub mod operations;

/// Process-wide operation registry.
#[path = "../registry.rs"]
pub mod registry;

/// Builtin operation handlers.
#[path = "../handlers/main.rs"]
pub mod handlers;

/// Sequential plan execution state machine.
#[path = "../controller.rs"]
pub mod controller;

/// Telemetry helpers for action execution.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Prelude exports for consumers of the action fabric.
pub mod prelude {
    pub use crate::controller::{
        ExecutionController, PlanResult, SkipReason, StepRecord, StepStatus,
    };
    pub use crate::operations::{
        is_missing, missing_value, CancelFlag, ExecutionContext, OperationError, OperationHandler,
    };
    pub use crate::registry::OperationRegistry;
    pub use crate::telemetry::{ActionTelemetry, ActionTelemetryBuilder};
}
