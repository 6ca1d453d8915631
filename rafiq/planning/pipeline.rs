use std::sync::Arc;

use rafiq_journal::LogLevel;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    cache::PlanCache,
    fallback::PatternMatcher,
    instruction::Instruction,
    model::ModelClient,
    parser::PlanParser,
    plan::Plan,
    request::PlanRequestBuilder,
    telemetry::PlanningTelemetry,
};

/// Where an acquired plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOrigin {
    /// Served from the plan cache.
    Cache,
    /// Freshly parsed from a model response.
    Model,
    /// Produced by the deterministic pattern matcher.
    Fallback,
}

impl PlanOrigin {
    /// Returns a short label for logs and history entries.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Model => "model",
            Self::Fallback => "fallback",
        }
    }
}

/// A validated plan plus its provenance.
#[derive(Debug, Clone)]
pub struct AcquiredPlan {
    /// The validated plan.
    pub plan: Plan,
    /// Which stage produced it.
    pub origin: PlanOrigin,
}

/// Raised only after the model, the parser, and the pattern matcher have
/// all failed to make sense of an instruction.
#[derive(Debug, Error)]
#[error("could not understand instruction {instruction_id}: {detail}")]
pub struct UnderstandError {
    /// Instruction that could not be understood.
    pub instruction_id: Uuid,
    /// Chain of failures leading here.
    pub detail: String,
}

/// Builder for [`PlanPipeline`].
pub struct PlanPipelineBuilder {
    model: Option<Arc<dyn ModelClient>>,
    cache: Arc<PlanCache>,
    matcher: PatternMatcher,
    request_builder: PlanRequestBuilder,
    telemetry: PlanningTelemetry,
}

impl PlanPipelineBuilder {
    /// Creates a builder around the two mandatory collaborators.
    #[must_use]
    pub fn new(cache: Arc<PlanCache>, request_builder: PlanRequestBuilder) -> Self {
        Self {
            model: None,
            cache,
            matcher: PatternMatcher::with_builtin_rules(),
            request_builder,
            telemetry: PlanningTelemetry::disabled(),
        }
    }

    /// Attaches the external model client.
    #[must_use]
    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    /// Overrides the fallback matcher.
    #[must_use]
    pub fn matcher(mut self, matcher: PatternMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn telemetry(mut self, telemetry: PlanningTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Finalizes the pipeline.
    #[must_use]
    pub fn build(self) -> PlanPipeline {
        PlanPipeline {
            model: self.model,
            cache: self.cache,
            matcher: self.matcher,
            request_builder: self.request_builder,
            parser: PlanParser::new(),
            telemetry: self.telemetry,
        }
    }
}

/// Turns instructions into validated plans: cache, then model, then the
/// deterministic fallback.
pub struct PlanPipeline {
    model: Option<Arc<dyn ModelClient>>,
    cache: Arc<PlanCache>,
    matcher: PatternMatcher,
    request_builder: PlanRequestBuilder,
    parser: PlanParser,
    telemetry: PlanningTelemetry,
}

impl PlanPipeline {
    /// Creates a builder.
    #[must_use]
    pub fn builder(cache: Arc<PlanCache>, request_builder: PlanRequestBuilder) -> PlanPipelineBuilder {
        PlanPipelineBuilder::new(cache, request_builder)
    }

    /// Acquires a plan for the instruction.
    ///
    /// Cache hits perform zero model calls. Model or validation failures
    /// route to the pattern matcher; matcher plans are never cached.
    ///
    /// # Errors
    /// [`UnderstandError`] when every stage failed.
    pub async fn acquire(&self, instruction: &Instruction) -> Result<AcquiredPlan, UnderstandError> {
        let fingerprint = instruction.fingerprint(self.request_builder.context_window());

        if let Some(plan) = self.cache.get(&fingerprint) {
            self.telemetry.log(
                LogLevel::Info,
                "plan.cache.hit",
                json!({
                    "instruction_id": instruction.id,
                    "fingerprint": fingerprint,
                    "plan_id": plan.id,
                }),
            );
            return Ok(AcquiredPlan {
                plan,
                origin: PlanOrigin::Cache,
            });
        }

        let failure = match self.acquire_from_model(instruction).await {
            Ok(plan) => {
                self.cache.put(fingerprint, plan.clone());
                self.telemetry.log(
                    LogLevel::Info,
                    "plan.model.accepted",
                    json!({
                        "instruction_id": instruction.id,
                        "plan_id": plan.id,
                        "steps": plan.steps.len(),
                        "confidence": plan.confidence,
                    }),
                );
                return Ok(AcquiredPlan {
                    plan,
                    origin: PlanOrigin::Model,
                });
            }
            Err(detail) => detail,
        };

        self.telemetry.log(
            LogLevel::Warn,
            "plan.model.rejected",
            json!({ "instruction_id": instruction.id, "detail": failure }),
        );

        if let Some(plan) = self.matcher.try_match(instruction) {
            self.telemetry.log(
                LogLevel::Info,
                "plan.fallback.matched",
                json!({
                    "instruction_id": instruction.id,
                    "plan_id": plan.id,
                    "operation": plan.steps[0].operation,
                }),
            );
            return Ok(AcquiredPlan {
                plan,
                origin: PlanOrigin::Fallback,
            });
        }

        self.telemetry.log(
            LogLevel::Warn,
            "plan.not_understood",
            json!({ "instruction_id": instruction.id, "detail": failure }),
        );
        Err(UnderstandError {
            instruction_id: instruction.id,
            detail: failure,
        })
    }

    /// Runs the model stage and parses its response; the error side carries
    /// a human readable failure chain for logging.
    async fn acquire_from_model(&self, instruction: &Instruction) -> Result<Plan, String> {
        let Some(model) = &self.model else {
            return Err("no model client configured".into());
        };
        let request = self.request_builder.build(instruction);
        let raw = model
            .complete(&request)
            .await
            .map_err(|err| format!("model call failed: {err}"))?;
        self.parser
            .parse(&raw, &instruction.language)
            .map_err(|err| format!("model response rejected: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use async_trait::async_trait;
    use chrono::Duration;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Model double replaying canned responses and counting calls.
    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, ModelError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(&self, _request: &crate::request::ModelRequest) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(Err(ModelError::EmptyResponse))
        }
    }

    fn pipeline(model: Arc<ScriptedModel>) -> PlanPipeline {
        let cache = Arc::new(PlanCache::new(8, Duration::minutes(5)));
        let builder = PlanRequestBuilder::new(3, vec!["file-list".into(), "echo".into()]);
        PlanPipeline::builder(cache, builder).model(model).build()
    }

    const VALID_RESPONSE: &str = "{\"language\": \"en\", \"confidence\": 0.9, \"plan\": [{\"operation\": \"echo\", \"parameters\": {\"text\": \"hi\"}}]}";

    #[tokio::test]
    async fn model_plans_are_cached_and_reused_without_new_calls() {
        let model = ScriptedModel::new(vec![Ok(VALID_RESPONSE.into())]);
        let pipeline = pipeline(Arc::clone(&model));
        let instruction = Instruction::new("say hi");

        let first = pipeline.acquire(&instruction).await.unwrap();
        assert_eq!(first.origin, PlanOrigin::Model);
        assert_eq!(model.calls(), 1);

        let repeat = Instruction::new("say hi");
        let second = pipeline.acquire(&repeat).await.unwrap();
        assert_eq!(second.origin, PlanOrigin::Cache);
        assert_eq!(second.plan.id, first.plan.id);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_model_output_falls_back_to_patterns() {
        let model = ScriptedModel::new(vec![Ok("{\"plan\": [{\"operatio".into())]);
        let pipeline = pipeline(Arc::clone(&model));

        let acquired = pipeline
            .acquire(&Instruction::new("list files please"))
            .await
            .unwrap();
        assert_eq!(acquired.origin, PlanOrigin::Fallback);
        assert_eq!(acquired.plan.steps[0].operation, "file-list");
    }

    #[tokio::test]
    async fn fallback_plans_are_not_cached() {
        let model = ScriptedModel::new(vec![
            Err(ModelError::Transport("down".into())),
            Err(ModelError::Transport("down".into())),
        ]);
        let pipeline = pipeline(Arc::clone(&model));

        let instruction = Instruction::new("list files");
        let first = pipeline.acquire(&instruction).await.unwrap();
        assert_eq!(first.origin, PlanOrigin::Fallback);

        let again = Instruction::new("list files");
        let second = pipeline.acquire(&again).await.unwrap();
        assert_eq!(second.origin, PlanOrigin::Fallback);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn total_failure_is_a_structured_understand_error() {
        let model = ScriptedModel::new(vec![Err(ModelError::Timeout(
            std::time::Duration::from_secs(1),
        ))]);
        let pipeline = pipeline(model);

        let instruction = Instruction::new("frobnicate the widget");
        let err = pipeline.acquire(&instruction).await.unwrap_err();
        assert_eq!(err.instruction_id, instruction.id);
        assert!(err.detail.contains("model call failed"));
    }

    #[tokio::test]
    async fn empty_model_plan_is_rejected_then_matched() {
        let model = ScriptedModel::new(vec![Ok("{\"plan\": []}".into())]);
        let pipeline = pipeline(model);

        let acquired = pipeline
            .acquire(&Instruction::new("what time is it"))
            .await
            .unwrap();
        assert_eq!(acquired.origin, PlanOrigin::Fallback);
        assert_eq!(acquired.plan.steps[0].operation, "clock");
    }
}
