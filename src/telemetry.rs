//! JSONL telemetry for conversation turns and the `telemetry report` summary.
//!
//! Each line is one [`TelemetryRecord`]: a fixed envelope (time, event name,
//! run, command, conversation session) followed by the event's own fields.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RuntimeConfig;

pub fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct TelemetryRecord<'a> {
    pub ts_unix_ms: u64,
    pub event: &'a str,
    pub run_id: &'a str,
    pub command: &'a str,
    pub session_id: &'a str,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug)]
struct JsonlFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

/// Handle shared by every orchestrator in the process. Clones write to the
/// same file under one lock.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    /// `None` when telemetry is off; `emit` is then a no-op.
    file: Option<Arc<JsonlFile>>,
    run_id: Arc<str>,
    command: Arc<str>,
    session_id: Arc<str>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, command: String) -> Self {
        let file = cfg.telemetry_enabled.then(|| {
            Arc::new(JsonlFile {
                path: PathBuf::from(&cfg.telemetry_path),
                write_lock: Mutex::new(()),
            })
        });
        Self {
            file,
            run_id: format!("run-{}-{}", unix_ms_now(), std::process::id()).into(),
            command: command.into(),
            session_id: cfg.session_id.as_str().into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            file: None,
            run_id: "".into(),
            command: "".into(),
            session_id: "".into(),
        }
    }

    /// Same file and run, tagged with another conversation session.
    pub fn for_session(&self, session_id: &str) -> Self {
        Self {
            session_id: session_id.into(),
            ..self.clone()
        }
    }

    /// Appends one record. Non-object payloads are recorded with no extra fields.
    /// Write failures are logged and otherwise ignored.
    pub fn emit(&self, event: &str, payload: Value) {
        let Some(file) = self.file.as_deref() else {
            return;
        };

        let record = TelemetryRecord {
            ts_unix_ms: unix_ms_now(),
            event,
            run_id: &self.run_id,
            command: &self.command,
            session_id: &self.session_id,
            fields: match payload {
                Value::Object(fields) => fields,
                _ => Map::new(),
            },
        };
        if let Err(err) = file.append(&record) {
            tracing::warn!(
                event = event,
                path = %file.path.display(),
                error = %format!("{err:#}"),
                "telemetry write failed"
            );
        }
    }
}

impl JsonlFile {
    fn append(&self, record: &TelemetryRecord<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(record)
            .with_context(|| format!("failed to serialize telemetry event '{}'", record.event))?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create telemetry directory '{}'", parent.display())
            })?;
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(&line))
            .with_context(|| format!("failed to append to telemetry file '{}'", self.path.display()))
    }
}

/// The envelope and payload fields the report reads back. Everything else
/// in a line is ignored.
#[derive(Debug, Deserialize)]
struct RecordedEvent {
    event: String,
    #[serde(default)]
    ts_unix_ms: Option<u64>,
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    route: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    elapsed_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ToolOutcomes {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteOutcomes {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_elapsed_ms: u64,
}

impl RouteOutcomes {
    pub fn mean_elapsed_ms(&self) -> Option<u64> {
        let finished = (self.completed + self.failed) as u64;
        (finished > 0).then(|| self.total_elapsed_ms / finished)
    }
}

#[derive(Debug, Default)]
pub struct TelemetrySummary {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub parse_errors: usize,
    pub runs: BTreeSet<String>,
    pub sessions: BTreeSet<String>,
    pub turns_started: usize,
    pub routes: BTreeMap<String, RouteOutcomes>,
    pub tools: BTreeMap<String, ToolOutcomes>,
    pub llm_failures: BTreeMap<String, usize>,
    pub last_event_ts_unix_ms: Option<u64>,
}

impl TelemetrySummary {
    pub fn turns_completed(&self) -> usize {
        self.routes.values().map(|route| route.completed).sum()
    }

    pub fn turns_failed(&self) -> usize {
        self.routes.values().map(|route| route.failed).sum()
    }

    fn record(&mut self, event: RecordedEvent) {
        if !event.run_id.is_empty() {
            self.runs.insert(event.run_id);
        }
        if !event.session_id.is_empty() {
            self.sessions.insert(event.session_id);
        }
        if let Some(ts) = event.ts_unix_ms {
            self.last_event_ts_unix_ms = self.last_event_ts_unix_ms.max(Some(ts));
        }

        let route = event.route.unwrap_or_default();
        let tool = event.tool.unwrap_or_default();
        match event.event.as_str() {
            "turn.started" => self.turns_started += 1,
            "route.selected" => self.routes.entry(route).or_default().selected += 1,
            "turn.completed" | "turn.failed" => {
                let outcomes = self.routes.entry(route).or_default();
                if event.event == "turn.completed" {
                    outcomes.completed += 1;
                } else {
                    outcomes.failed += 1;
                }
                outcomes.total_elapsed_ms += event.elapsed_ms.unwrap_or_default();
            }
            "tool.requested" => self.tools.entry(tool).or_default().requested += 1,
            "tool.succeeded" => self.tools.entry(tool).or_default().succeeded += 1,
            "tool.failed" => self.tools.entry(tool).or_default().failed += 1,
            "llm.failed" => {
                let phase = event.phase.unwrap_or_else(|| "unknown".to_string());
                *self.llm_failures.entry(phase).or_default() += 1;
            }
            _ => {}
        }
    }
}

/// Summarizes the most recent `limit` lines (at least one).
pub fn summarize_telemetry_lines(lines: Vec<String>, limit: usize) -> TelemetrySummary {
    let mut summary = TelemetrySummary {
        total_lines: lines.len(),
        ..TelemetrySummary::default()
    };

    for line in lines.iter().rev().take(limit.max(1)) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RecordedEvent>(line) {
            Ok(event) => {
                summary.parsed_events += 1;
                summary.record(event);
            }
            Err(_) => summary.parse_errors += 1,
        }
    }

    summary
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open telemetry file '{}'", path.display()))?;
    BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to read telemetry file '{}'", path.display()))
}

pub fn format_telemetry_report(path: &Path, summary: &TelemetrySummary) -> String {
    let mut out = format!(
        "Telemetry report for {}\n\
         Events analyzed: {} of {} lines (unreadable: {})\n\
         Runs: {} | Conversation sessions: {}\n\
         Turns: started={} completed={} failed={}\n",
        path.display(),
        summary.parsed_events,
        summary.total_lines,
        summary.parse_errors,
        summary.runs.len(),
        summary.sessions.len(),
        summary.turns_started,
        summary.turns_completed(),
        summary.turns_failed(),
    );

    if !summary.routes.is_empty() {
        out.push_str("Workflows:\n");
        for (route, outcomes) in &summary.routes {
            let mean = outcomes
                .mean_elapsed_ms()
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "  {route:<24} selected={} completed={} failed={} mean={mean}\n",
                outcomes.selected, outcomes.completed, outcomes.failed
            ));
        }
    }

    if !summary.tools.is_empty() {
        out.push_str("Calendar tools:\n");
        for (tool, outcomes) in &summary.tools {
            out.push_str(&format!(
                "  {tool:<24} requested={} succeeded={} failed={}\n",
                outcomes.requested, outcomes.succeeded, outcomes.failed
            ));
        }
    }

    if !summary.llm_failures.is_empty() {
        let phases = summary
            .llm_failures
            .iter()
            .map(|(phase, count)| format!("{phase}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("Model failures: {phases}\n"));
    }

    if let Some(last_ts) = summary.last_event_ts_unix_ms {
        out.push_str(&format!("Last event ts_unix_ms: {last_ts}\n"));
    }
    out
}

pub fn run_telemetry_report(
    cfg: &RuntimeConfig,
    path_override: Option<String>,
    limit: usize,
) -> Result<()> {
    let path = PathBuf::from(path_override.unwrap_or_else(|| cfg.telemetry_path.clone()));
    if !path.exists() {
        println!("No telemetry file found at '{}'.", path.display());
        return Ok(());
    }

    let summary = summarize_telemetry_lines(read_lines(&path)?, limit);
    print!("{}", format_telemetry_report(&path, &summary));
    Ok(())
}
