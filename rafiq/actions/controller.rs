use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use rafiq_journal::LogLevel;
use rafiq_planning::plan::{ConditionTest, Plan, PlanStep, StepCondition};
use serde_json::{json, Map, Value};
use tokio::time::timeout;

use crate::{
    operations::{missing_value, ExecutionContext, OperationError, OperationHandler},
    registry::OperationRegistry,
    telemetry::ActionTelemetry,
};

/// Why a step did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The step's condition evaluated false.
    ConditionFalse,
    /// The plan was cancelled before the step started.
    Cancelled,
    /// An earlier critical step failed and halted the plan.
    HaltedByFailure,
}

/// Terminal state of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The primary operation or one of its fallbacks succeeded.
    Succeeded,
    /// Every attempt failed.
    Failed,
    /// The step never ran.
    Skipped(SkipReason),
}

impl StepStatus {
    /// Short label used in logs and history entries.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped(SkipReason::ConditionFalse) => "skipped",
            Self::Skipped(SkipReason::Cancelled) => "skipped(cancelled)",
            Self::Skipped(SkipReason::HaltedByFailure) => "skipped(halted)",
        }
    }
}

/// Per-step record appended to the plan result.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Original index of the step within the plan.
    pub index: usize,
    /// Operation that actually ran (the primary name for skipped steps).
    pub operation: String,
    /// Terminal state.
    pub status: StepStatus,
    /// Captured output on success.
    pub output: Option<Value>,
    /// Error detail when failed.
    pub error: Option<String>,
    /// Elapsed wall time in milliseconds.
    pub duration_ms: u64,
    /// Which fallback ran, or the condition that skipped the step.
    pub note: Option<String>,
}

impl StepRecord {
    const fn succeeded(&self) -> bool {
        matches!(self.status, StepStatus::Succeeded)
    }
}

/// Aggregated outcome of one plan, one record per original step in order.
#[derive(Debug, Clone)]
pub struct PlanResult {
    /// Identifier of the executed plan.
    pub plan_id: String,
    /// One record per plan step, in step order.
    pub records: Vec<StepRecord>,
    /// True when every step either succeeded or was skipped by a false
    /// condition; failures, cancellations, and halts clear it.
    pub success: bool,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
}

impl PlanResult {
    /// Output of step `index`, when it succeeded and produced one.
    #[must_use]
    pub fn output_of(&self, index: usize) -> Option<&Value> {
        self.records
            .get(index)
            .filter(|record| record.succeeded())
            .and_then(|record| record.output.as_ref())
    }
}

/// Runs one plan, strictly sequentially, with conditional skips, fallback
/// attempts, per-step timeouts, and cooperative cancellation.
///
/// Independent plans share only the read-only registry (and whatever the
/// handlers themselves touch); concurrent callers may run their own plans
/// in parallel.
pub struct ExecutionController {
    registry: Arc<OperationRegistry>,
    telemetry: ActionTelemetry,
}

impl ExecutionController {
    /// Creates a controller over a registry.
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            telemetry: ActionTelemetry::disabled(),
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ActionTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Executes the plan, producing exactly one record per step.
    pub async fn execute(&self, plan: &Plan, ctx: &ExecutionContext) -> PlanResult {
        let started_at = Utc::now();
        let mut records: Vec<StepRecord> = Vec::with_capacity(plan.steps.len());
        let mut halted = false;

        for (index, step) in plan.steps.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                records.push(self.skip(plan, index, step, SkipReason::Cancelled, None));
                continue;
            }
            if halted {
                records.push(self.skip(plan, index, step, SkipReason::HaltedByFailure, None));
                continue;
            }
            if let Some(condition) = &step.condition {
                if !evaluate_condition(condition, &records) {
                    let note = format!(
                        "condition on step {} ({}) evaluated false",
                        condition.step,
                        describe_test(&condition.test)
                    );
                    records.push(self.skip(plan, index, step, SkipReason::ConditionFalse, Some(note)));
                    continue;
                }
            }

            let record = self.run_step(plan, index, step, ctx, &records).await;
            if matches!(record.status, StepStatus::Failed) && step.is_critical() {
                halted = true;
            }
            records.push(record);
        }

        let success = records.iter().all(|record| match record.status {
            StepStatus::Succeeded | StepStatus::Skipped(SkipReason::ConditionFalse) => true,
            StepStatus::Failed | StepStatus::Skipped(_) => false,
        });

        let result = PlanResult {
            plan_id: plan.id.clone(),
            records,
            success,
            started_at,
            finished_at: Utc::now(),
        };
        self.telemetry.log(
            LogLevel::Info,
            "plan.finished",
            json!({
                "plan_id": result.plan_id,
                "steps": result.records.len(),
                "success": result.success,
            }),
        );
        result
    }

    fn skip(
        &self,
        plan: &Plan,
        index: usize,
        step: &PlanStep,
        reason: SkipReason,
        note: Option<String>,
    ) -> StepRecord {
        let status = StepStatus::Skipped(reason);
        self.telemetry.log(
            LogLevel::Info,
            "step.skipped",
            json!({
                "plan_id": plan.id,
                "step": index,
                "operation": step.operation,
                "reason": status.label(),
            }),
        );
        StepRecord {
            index,
            operation: step.operation.clone(),
            status,
            output: None,
            error: None,
            duration_ms: 0,
            note,
        }
    }

    async fn run_step(
        &self,
        plan: &Plan,
        index: usize,
        step: &PlanStep,
        ctx: &ExecutionContext,
        prior: &[StepRecord],
    ) -> StepRecord {
        let started = Instant::now();
        let base_parameters = interpolate(&step.parameters, prior);

        let mut attempts: Vec<(String, Map<String, Value>)> =
            vec![(step.operation.clone(), base_parameters.clone())];
        for fallback in &step.fallbacks {
            let parameters = fallback
                .parameters
                .as_ref()
                .map_or_else(|| base_parameters.clone(), |overrides| interpolate(overrides, prior));
            attempts.push((fallback.operation.clone(), parameters));
        }

        let mut last_error = String::new();
        for (attempt_index, (operation, parameters)) in attempts.iter().enumerate() {
            self.telemetry.log(
                LogLevel::Debug,
                "step.attempt",
                json!({
                    "plan_id": plan.id,
                    "step": index,
                    "operation": operation,
                    "attempt": attempt_index,
                }),
            );
            match self.try_operation(operation, parameters, ctx).await {
                Ok(output) => {
                    let note = (attempt_index > 0)
                        .then(|| format!("fallback `{operation}` ran after `{}` failed", step.operation));
                    self.telemetry.log(
                        LogLevel::Info,
                        "step.succeeded",
                        json!({
                            "plan_id": plan.id,
                            "step": index,
                            "operation": operation,
                            "duration_ms": millis(started.elapsed()),
                        }),
                    );
                    return StepRecord {
                        index,
                        operation: operation.clone(),
                        status: StepStatus::Succeeded,
                        output: Some(output),
                        error: None,
                        duration_ms: millis(started.elapsed()),
                        note,
                    };
                }
                Err(err) => {
                    last_error = err.to_string();
                    self.telemetry.log(
                        LogLevel::Warn,
                        "step.attempt_failed",
                        json!({
                            "plan_id": plan.id,
                            "step": index,
                            "operation": operation,
                            "error": last_error,
                        }),
                    );
                }
            }
        }

        let note = (attempts.len() > 1)
            .then(|| format!("exhausted {} fallback(s)", attempts.len() - 1));
        StepRecord {
            index,
            operation: step.operation.clone(),
            status: StepStatus::Failed,
            output: None,
            error: Some(last_error),
            duration_ms: millis(started.elapsed()),
            note,
        }
    }

    async fn try_operation(
        &self,
        operation: &str,
        parameters: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let handler: Arc<dyn OperationHandler> =
            self.registry
                .resolve(operation)
                .ok_or_else(|| OperationError::UnknownOperation {
                    name: operation.to_string(),
                })?;
        handler.validate(parameters)?;
        match timeout(ctx.step_timeout, handler.execute(parameters, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(OperationError::Timeout {
                limit_ms: millis(ctx.step_timeout),
            }),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: std::time::Duration) -> u64 {
    duration.as_millis() as u64
}

/// Evaluates a condition against the records accumulated so far.
fn evaluate_condition(condition: &StepCondition, records: &[StepRecord]) -> bool {
    let Some(record) = records.get(condition.step) else {
        // Validation guarantees the index is earlier; a missing record can
        // only mean the referenced step was itself cancelled out of order.
        return false;
    };
    match &condition.test {
        ConditionTest::Succeeded => record.succeeded(),
        ConditionTest::Failed => matches!(record.status, StepStatus::Failed),
        ConditionTest::OutputContains(needle) => record
            .output
            .as_ref()
            .is_some_and(|output| output_text(output).contains(needle)),
    }
}

fn describe_test(test: &ConditionTest) -> String {
    match test {
        ConditionTest::Succeeded => "succeeded".into(),
        ConditionTest::Failed => "failed".into(),
        ConditionTest::OutputContains(needle) => format!("output_contains {needle:?}"),
    }
}

fn output_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Replaces `"$output[K]"` string values with the output of step K, or the
/// missing-value sentinel when K produced nothing. Nested maps and arrays
/// are walked; other values pass through untouched.
fn interpolate(parameters: &Map<String, Value>, prior: &[StepRecord]) -> Map<String, Value> {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), interpolate_value(value, prior)))
        .collect()
}

fn interpolate_value(value: &Value, prior: &[StepRecord]) -> Value {
    match value {
        Value::String(text) => parse_output_ref(text).map_or_else(
            || value.clone(),
            |step| {
                prior
                    .get(step)
                    .filter(|record| record.succeeded())
                    .and_then(|record| record.output.clone())
                    .unwrap_or_else(|| missing_value(step))
            },
        ),
        Value::Object(map) => Value::Object(interpolate(map, prior)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, prior))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn parse_output_ref(text: &str) -> Option<usize> {
    let inner = text.strip_prefix("$output[")?.strip_suffix(']')?;
    inner.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::is_missing;
    use rafiq_planning::{
        instruction::Language,
        plan::{Plan, PlanStep, StepFallback},
    };
    use std::time::Duration;
    use tempfile::tempdir;

    fn controller() -> ExecutionController {
        ExecutionController::new(Arc::new(OperationRegistry::production_default()))
    }

    fn echo_step(text: &str) -> PlanStep {
        PlanStep::new("echo", format!("echo {text}")).with_parameter("text", json!(text))
    }

    fn plan_of(steps: Vec<PlanStep>) -> Plan {
        Plan::new(Language::English, 0.9, steps)
    }

    #[tokio::test]
    async fn one_record_per_step_in_order() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let mut failing = PlanStep::new("no-such-op", "fails");
        failing.fallbacks.push(StepFallback {
            operation: "also-missing".into(),
            parameters: None,
        });
        let plan = plan_of(vec![echo_step("a"), failing, echo_step("b")]);

        let result = controller().execute(&plan, &ctx).await;
        assert_eq!(result.records.len(), 3);
        assert_eq!(
            result.records.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(result.records[1].status, StepStatus::Failed);
        assert_eq!(result.records[2].status, StepStatus::Succeeded);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn unknown_primary_with_registered_fallback_succeeds() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let mut step = PlanStep::new("voice-output", "say hi");
        step.parameters.insert("text".into(), json!("hi"));
        step.fallbacks.push(StepFallback {
            operation: "echo".into(),
            parameters: None,
        });
        let plan = plan_of(vec![step]);

        let result = controller().execute(&plan, &ctx).await;
        let record = &result.records[0];
        assert_eq!(record.status, StepStatus::Succeeded);
        assert_eq!(record.operation, "echo");
        assert!(record.note.as_deref().unwrap().contains("fallback `echo`"));
        assert!(result.success);
    }

    #[tokio::test]
    async fn critical_failure_halts_remaining_steps() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let plan = plan_of(vec![
            PlanStep::new("no-such-op", "critical, no fallbacks"),
            echo_step("never runs"),
            echo_step("never runs either"),
        ]);

        let result = controller().execute(&plan, &ctx).await;
        assert_eq!(result.records[0].status, StepStatus::Failed);
        assert_eq!(
            result.records[1].status,
            StepStatus::Skipped(SkipReason::HaltedByFailure)
        );
        assert_eq!(
            result.records[2].status,
            StepStatus::Skipped(SkipReason::HaltedByFailure)
        );
        assert!(!result.success);
    }

    #[tokio::test]
    async fn cancellation_skips_every_remaining_step() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        ctx.cancel.cancel();
        let plan = plan_of(vec![echo_step("a"), echo_step("b")]);

        let result = controller().execute(&plan, &ctx).await;
        assert!(result
            .records
            .iter()
            .all(|r| r.status == StepStatus::Skipped(SkipReason::Cancelled)));
        assert!(!result.success);
    }

    #[tokio::test]
    async fn false_condition_skips_and_is_recorded() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let mut gated = echo_step("gated");
        gated.condition = Some(StepCondition {
            step: 0,
            test: ConditionTest::Failed,
        });
        let plan = plan_of(vec![echo_step("first"), gated]);

        let result = controller().execute(&plan, &ctx).await;
        assert_eq!(
            result.records[1].status,
            StepStatus::Skipped(SkipReason::ConditionFalse)
        );
        assert!(result.records[1].note.as_deref().unwrap().contains("step 0"));
        assert!(result.success);
    }

    #[tokio::test]
    async fn output_contains_condition_gates_on_prior_output() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let mut gated = echo_step("seen");
        gated.condition = Some(StepCondition {
            step: 0,
            test: ConditionTest::OutputContains("hello".into()),
        });
        let plan = plan_of(vec![echo_step("hello world"), gated]);

        let result = controller().execute(&plan, &ctx).await;
        assert_eq!(result.records[1].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn interpolation_passes_prior_output_and_missing_sentinel() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let mut failing = PlanStep::new("no-such-op", "fails");
        failing.fallbacks.push(StepFallback {
            operation: "still-missing".into(),
            parameters: None,
        });
        let carried = PlanStep::new("echo", "carry forward")
            .with_parameter("text", json!("$output[0]"));
        let missing = PlanStep::new("echo", "missing ref")
            .with_parameter("text", json!("$output[1]"));
        let plan = plan_of(vec![echo_step("payload"), failing, carried, missing]);

        let result = controller().execute(&plan, &ctx).await;
        assert_eq!(result.records[2].output, Some(json!("payload")));
        assert!(is_missing(result.records[3].output.as_ref().unwrap()));
    }

    #[tokio::test]
    async fn pattern_matched_listing_plan_reports_directory_entries() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), "hi").unwrap();
        let ctx = ExecutionContext::new(dir.path());

        let matcher = rafiq_planning::fallback::PatternMatcher::with_builtin_rules();
        let instruction =
            rafiq_planning::instruction::Instruction::new("list files in the current directory");
        let plan = matcher.try_match(&instruction).unwrap();

        let result = controller().execute(&plan, &ctx).await;
        assert!(result.success);
        let output = result.output_of(0).unwrap();
        assert_eq!(output["entries"], json!(["readme.md"]));
    }

    #[tokio::test]
    async fn slow_handler_times_out_and_reports_timeout() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path())
            .with_step_timeout(Duration::from_millis(50));
        let step = PlanStep::new("shell-command", "sleep")
            .with_parameter("command", json!("sleep 5"));
        let plan = plan_of(vec![step]);

        let result = controller().execute(&plan, &ctx).await;
        assert_eq!(result.records[0].status, StepStatus::Failed);
        assert!(result.records[0].error.as_deref().unwrap().contains("timed out"));
    }
}
