use async_trait::async_trait;
use chrono::{Datelike, Local, Timelike};
use serde_json::{json, Map, Value};

use crate::operations::{ExecutionContext, OperationError, OperationHandler};

/// Reports host resource information.
///
/// Sources degrade gracefully: `/proc` fields are reported only where
/// readable, so the handler works on any Unix-like host.
#[derive(Debug, Clone, Copy)]
pub struct SystemInfoHandler;

#[async_trait]
impl OperationHandler for SystemInfoHandler {
    fn name(&self) -> &str {
        "system-info"
    }

    fn describe(&self) -> &str {
        "Report CPU count, memory, and uptime of the host"
    }

    async fn execute(
        &self,
        _parameters: &Map<String, Value>,
        _ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let cpus = std::thread::available_parallelism().map_or(0, std::num::NonZeroUsize::get);
        let mut report = json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "cpus": cpus,
        });

        if let Some((total_kb, available_kb)) = read_meminfo() {
            report["memory_total_kb"] = json!(total_kb);
            report["memory_available_kb"] = json!(available_kb);
        }
        if let Some(uptime) = read_uptime_secs() {
            report["uptime_secs"] = json!(uptime);
        }
        Ok(report)
    }
}

fn read_meminfo() -> Option<(u64, u64)> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = parse_kb(rest);
        }
    }
    Some((total?, available?))
}

fn parse_kb(rest: &str) -> Option<u64> {
    rest.split_whitespace().next()?.parse().ok()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn read_uptime_secs() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/uptime").ok()?;
    let first = content.split_whitespace().next()?;
    first.parse::<f64>().ok().map(|secs| secs as u64)
}

const ARABIC_WEEKDAYS: [&str; 7] = [
    "الاثنين",
    "الثلاثاء",
    "الأربعاء",
    "الخميس",
    "الجمعة",
    "السبت",
    "الأحد",
];

const ARABIC_MONTHS: [&str; 12] = [
    "يناير",
    "فبراير",
    "مارس",
    "أبريل",
    "مايو",
    "يونيو",
    "يوليو",
    "أغسطس",
    "سبتمبر",
    "أكتوبر",
    "نوفمبر",
    "ديسمبر",
];

/// Reports the current local date and time, localized for Arabic callers.
#[derive(Debug, Clone, Copy)]
pub struct ClockHandler;

#[async_trait]
impl OperationHandler for ClockHandler {
    fn name(&self) -> &str {
        "clock"
    }

    fn describe(&self) -> &str {
        "Report the current date and time"
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let now = Local::now();
        if let Some(format) = parameters.get("format").and_then(Value::as_str) {
            return Ok(json!({ "formatted": now.format(format).to_string() }));
        }

        #[allow(clippy::cast_possible_truncation)]
        let weekday_index = now.weekday().num_days_from_monday() as usize;
        #[allow(clippy::cast_possible_truncation)]
        let month_index = now.month0() as usize;

        let (weekday, month) = if ctx.language == "ar" {
            (
                ARABIC_WEEKDAYS[weekday_index].to_string(),
                ARABIC_MONTHS[month_index].to_string(),
            )
        } else {
            (now.format("%A").to_string(), now.format("%B").to_string())
        };

        Ok(json!({
            "iso": now.to_rfc3339(),
            "date": now.format("%Y-%m-%d").to_string(),
            "time": format!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second()),
            "weekday": weekday,
            "month": month,
            "day": now.day(),
            "year": now.year(),
        }))
    }
}
