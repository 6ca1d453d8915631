use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::runtime::Runtime;

use rafiq_actions::prelude::{
    ActionTelemetry, ExecutionContext, ExecutionController, OperationRegistry, PlanResult,
    StepStatus,
};
use rafiq_journal::{HistoryEntry, HistoryLog, StepSummary};
use rafiq_planning::prelude::{
    AcquiredPlan, ConversationContext, Exchange, Instruction, InstructionMetadata, Language,
    ModelClient, PatternMatcher, PlanCache, PlanPipeline, PlanRequestBuilder, PlanningTelemetry,
    ProcessModelClient,
};

#[derive(Parser, Debug)]
#[command(name = "rafiq", version, about = "Multilingual natural-language command assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Executes a single instruction and prints the result.
    Run(RunArgs),
    /// Executes instructions from a file, one per line.
    Batch(BatchArgs),
    /// Shows recently executed instructions and their outcomes.
    History(HistoryArgs),
    /// Lists the registered operations.
    Ops,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// The natural-language instruction.
    instruction: String,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct BatchArgs {
    /// File with one instruction per line; blank lines and `#` are skipped.
    file: PathBuf,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct HistoryArgs {
    /// Maximum number of entries to show, oldest first.
    #[arg(long, default_value_t = 10)]
    limit: usize,
    /// Optional JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding the history file; overrides the config.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CommonArgs {
    /// Declared language code ("en", "ar"); detected from text when absent.
    #[arg(long)]
    lang: Option<String>,
    /// Suppresses confirmations downstream.
    #[arg(long)]
    fast: bool,
    /// External model command; its stdin receives the prompt.
    #[arg(long)]
    model_cmd: Option<String>,
    /// Optional JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory for telemetry and history files; overrides the config.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Prints the machine-readable result instead of the human summary.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RuntimeConfig {
    context_window: usize,
    cache_capacity: usize,
    cache_ttl_secs: i64,
    step_timeout_secs: u64,
    model_timeout_secs: u64,
    log_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            context_window: 4,
            cache_capacity: 64,
            cache_ttl_secs: 900,
            step_timeout_secs: 30,
            model_timeout_secs: 60,
            log_dir: None,
        }
    }
}

impl RuntimeConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("parsing config {}", path.display()))
            }
        }
    }
}

/// Everything one session needs: pipeline, controller, history.
struct Assistant {
    pipeline: PlanPipeline,
    controller: ExecutionController,
    history: Option<HistoryLog>,
    config: RuntimeConfig,
    context: ConversationContext,
}

impl Assistant {
    fn new(common: &CommonArgs) -> Result<Self> {
        let mut config = RuntimeConfig::load(common.config.as_deref())?;
        if let Some(log_dir) = &common.log_dir {
            config.log_dir = Some(log_dir.clone());
        }
        let registry = Arc::new(OperationRegistry::production_default());

        let matcher = PatternMatcher::with_builtin_rules();
        matcher
            .validate_against(&registry.names())
            .context("fallback table references an unregistered operation")?;

        let (planning_telemetry, action_telemetry, history) = match &config.log_dir {
            Some(dir) => (
                PlanningTelemetry::builder("pipeline")
                    .log_path(dir.join("planning.log"))
                    .build()?,
                ActionTelemetry::builder("controller")
                    .log_path(dir.join("actions.log"))
                    .build()?,
                Some(HistoryLog::new(dir.join("history.jsonl"))?),
            ),
            None => (
                PlanningTelemetry::disabled(),
                ActionTelemetry::disabled(),
                None,
            ),
        };

        let cache = Arc::new(PlanCache::new(
            config.cache_capacity,
            chrono::Duration::seconds(config.cache_ttl_secs),
        ));
        let request_builder = PlanRequestBuilder::new(config.context_window, registry.names());
        let mut pipeline_builder = PlanPipeline::builder(cache, request_builder)
            .matcher(matcher)
            .telemetry(planning_telemetry);
        if let Some(command_line) = &common.model_cmd {
            let client = ProcessModelClient::from_command_line(
                command_line,
                Duration::from_secs(config.model_timeout_secs),
            )
            .context("empty --model-cmd")?;
            let client: Arc<dyn ModelClient> = Arc::new(client);
            pipeline_builder = pipeline_builder.model(client);
        }

        let pipeline = pipeline_builder.build();
        let controller = ExecutionController::new(registry).with_telemetry(action_telemetry);

        Ok(Self {
            pipeline,
            controller,
            history,
            context: ConversationContext::new(config.context_window.max(1)),
            config,
        })
    }

    /// Runs one instruction end to end; `Ok(None)` means "not understood".
    async fn run_instruction(
        &mut self,
        text: &str,
        common: &CommonArgs,
    ) -> Result<Option<(AcquiredPlan, PlanResult)>> {
        let language = common
            .lang
            .as_deref()
            .map_or_else(|| Language::detect(text), Language::from_code);
        let instruction = Instruction::with_language(text, language)
            .with_metadata(InstructionMetadata {
                fast_mode: common.fast,
                requester: None,
            })
            .with_context(self.context.clone());

        let acquired = match self.pipeline.acquire(&instruction).await {
            Ok(acquired) => acquired,
            Err(err) => {
                eprintln!("rafiq: {err}");
                self.context.push(Exchange {
                    instruction: instruction.text.clone(),
                    outcome: "not understood".into(),
                    succeeded: false,
                });
                return Ok(None);
            }
        };

        let working_dir = std::env::current_dir().context("resolving working directory")?;
        let ctx = ExecutionContext::new(working_dir)
            .with_step_timeout(Duration::from_secs(self.config.step_timeout_secs))
            .with_language(instruction.language.code());
        let result = self.controller.execute(&acquired.plan, &ctx).await;

        let succeeded_steps = result
            .records
            .iter()
            .filter(|record| matches!(record.status, StepStatus::Succeeded))
            .count();
        self.context.push(Exchange {
            instruction: instruction.text.clone(),
            outcome: format!(
                "{succeeded_steps}/{} steps succeeded",
                result.records.len()
            ),
            succeeded: result.success,
        });

        if let Some(history) = &self.history {
            history.append(&HistoryEntry {
                instruction_id: instruction.id,
                text: instruction.text.clone(),
                language: instruction.language.code().to_string(),
                plan_id: result.plan_id.clone(),
                plan_origin: acquired.origin.label().to_string(),
                success: result.success,
                steps: result
                    .records
                    .iter()
                    .map(|record| StepSummary {
                        operation: record.operation.clone(),
                        status: record.status.label().to_string(),
                    })
                    .collect(),
                recorded_at: Utc::now(),
            })?;
        }

        Ok(Some((acquired, result)))
    }
}

fn print_result(acquired: &AcquiredPlan, result: &PlanResult, as_json: bool) {
    if as_json {
        let payload = json!({
            "plan_id": result.plan_id,
            "origin": acquired.origin.label(),
            "success": result.success,
            "steps": result.records.iter().map(|record| json!({
                "index": record.index,
                "operation": record.operation,
                "status": record.status.label(),
                "output": record.output,
                "error": record.error,
                "duration_ms": record.duration_ms,
                "note": record.note,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
        return;
    }

    println!(
        "plan {} ({}, {} step(s)) -> {}",
        result.plan_id,
        acquired.origin.label(),
        result.records.len(),
        if result.success { "ok" } else { "failed" }
    );
    for record in &result.records {
        let detail = record
            .error
            .as_deref()
            .or(record.note.as_deref())
            .unwrap_or("");
        println!(
            "  [{}] {} {} {}",
            record.index,
            record.operation,
            record.status.label(),
            detail
        );
        if let Some(output) = &record.output {
            match output {
                serde_json::Value::String(text) => println!("      {text}"),
                other => println!("      {other}"),
            }
        }
    }
}

fn run_single(args: &RunArgs) -> Result<ExitCode> {
    let mut assistant = Assistant::new(&args.common)?;
    let runtime = Runtime::new()?;
    let outcome = runtime.block_on(assistant.run_instruction(&args.instruction, &args.common))?;
    Ok(match outcome {
        Some((acquired, result)) => {
            print_result(&acquired, &result, args.common.json);
            if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        None => ExitCode::from(2),
    })
}

fn run_batch(args: &BatchArgs) -> Result<ExitCode> {
    let content = fs::read_to_string(&args.file)
        .with_context(|| format!("reading batch file {}", args.file.display()))?;
    let mut assistant = Assistant::new(&args.common)?;
    let runtime = Runtime::new()?;

    let mut all_ok = true;
    for line in content.lines() {
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        println!("> {text}");
        match runtime.block_on(assistant.run_instruction(text, &args.common))? {
            Some((acquired, result)) => {
                print_result(&acquired, &result, args.common.json);
                all_ok &= result.success;
            }
            None => all_ok = false,
        }
    }
    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn run_history(args: &HistoryArgs) -> Result<ExitCode> {
    let mut config = RuntimeConfig::load(args.config.as_deref())?;
    if let Some(log_dir) = &args.log_dir {
        config.log_dir = Some(log_dir.clone());
    }
    let Some(dir) = config.log_dir else {
        eprintln!("rafiq: no log directory configured, nothing to show");
        return Ok(ExitCode::from(2));
    };

    let history = HistoryLog::new(dir.join("history.jsonl"))?;
    for entry in history.read_recent(args.limit)? {
        let steps = entry
            .steps
            .iter()
            .map(|step| format!("{} {}", step.operation, step.status))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "[{}] ({}) {} -> {} [{steps}]",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.plan_origin,
            entry.text,
            if entry.success { "ok" } else { "failed" },
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_ops() -> ExitCode {
    let registry = OperationRegistry::production_default();
    for (name, description) in registry.describe_all() {
        println!("{name:<16} {description}");
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = match &cli.command {
        Commands::Run(args) => run_single(args),
        Commands::Batch(args) => run_batch(args),
        Commands::History(args) => run_history(args),
        Commands::Ops => Ok(run_ops()),
    };
    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("rafiq: {err:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn config_defaults_apply_to_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{\"cache_capacity\": 8}").unwrap();
        let config = RuntimeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.context_window, 4);
        assert_eq!(config.step_timeout_secs, 30);
    }

    #[test]
    fn history_subcommand_reads_recorded_entries() {
        let dir = tempdir().unwrap();
        let history = HistoryLog::new(dir.path().join("history.jsonl")).unwrap();
        history
            .append(&HistoryEntry {
                instruction_id: Instruction::new("list files").id,
                text: "list files".into(),
                language: "en".into(),
                plan_id: "plan-test".into(),
                plan_origin: "fallback".into(),
                success: true,
                steps: vec![StepSummary {
                    operation: "file-list".into(),
                    status: "succeeded".into(),
                }],
                recorded_at: Utc::now(),
            })
            .unwrap();

        let args = HistoryArgs {
            limit: 5,
            config: None,
            log_dir: Some(dir.path().to_path_buf()),
        };
        assert!(run_history(&args).is_ok());
    }

    #[test]
    fn absent_config_uses_defaults() {
        let config = RuntimeConfig::load(None).unwrap();
        assert_eq!(config.cache_ttl_secs, 900);
        assert!(config.log_dir.is_none());
    }
}
