#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Rafiq plan acquisition: instruction modeling, model requests, parsing
//! and validation, caching, and the deterministic bilingual fallback.

/// Instruction model, language detection, conversation context.
#[path = "../instruction.rs"]
pub mod instruction;

/// Plan, step, condition, and fallback data model.
#[path = "../plan.rs"]
pub mod plan;

/// Deterministic model request builder.
#[path = "../request.rs"]
pub mod request;

/// Plan parser and schema validator.
#[path = "../parser.rs"]
pub mod parser;

/// TTL + LRU memoization of validated plans.
#[path = "../cache.rs"]
pub mod cache;

/// Deterministic bilingual text-to-operation fallback table.
#[path = "../fallback.rs"]
pub mod fallback;

/// Seam to the external inference backend.
#[path = "../model.rs"]
pub mod model;

/// End-to-end plan acquisition pipeline.
#[path = "../pipeline.rs"]
pub mod pipeline;

/// Telemetry helpers for planning components.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Prelude exports for consumers of the planning stack.
pub mod prelude {
    pub use crate::cache::{CacheStats, PlanCache};
    pub use crate::fallback::PatternMatcher;
    pub use crate::instruction::{ConversationContext, Exchange, Instruction, InstructionMetadata, Language};
    pub use crate::model::{ModelClient, ModelError, ProcessModelClient};
    pub use crate::parser::{PlanError, PlanParser};
    pub use crate::pipeline::{AcquiredPlan, PlanOrigin, PlanPipeline, UnderstandError};
    pub use crate::plan::{ConditionTest, Plan, PlanStep, StepCondition, StepFallback};
    pub use crate::request::{ModelRequest, PlanRequestBuilder};
    pub use crate::telemetry::{PlanningTelemetry, PlanningTelemetryBuilder};
}
