//! History Log
//!
//! Append-only text logs of task runs and user feedback:
//! - `log.txt`: `<unix_timestamp>,<task_name>`
//! - `user_feedback.log`: `<unix_timestamp>,<task_name>,<action>`
//!
//! Lines are never rewritten. A malformed line is skipped with a warning and
//! never aborts the rest of the read.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors for a single history record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("bad timestamp: {0}")]
    BadTimestamp(String),
    #[error("bad number in column {column}: {value}")]
    BadNumber { column: &'static str, value: String },
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

/// Feedback actions a user can record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    /// User triggered the task by hand
    ManualRun,
    /// User wants the task to run less often
    Increase,
    /// User wants the task to run more often
    Decrease,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualRun => "manual_run",
            Self::Increase => "increase",
            Self::Decrease => "decrease",
        }
    }
}

impl std::str::FromStr for FeedbackAction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual_run" => Ok(Self::ManualRun),
            "increase" => Ok(Self::Increase),
            "decrease" => Ok(Self::Decrease),
            other => Err(ParseError::UnknownAction(other.to_string())),
        }
    }
}

/// One completed task run
#[derive(Debug, Clone, PartialEq)]
pub struct RunEvent {
    pub timestamp: f64,
    pub task: String,
}

impl RunEvent {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (ts, task) = line
            .trim()
            .split_once(',')
            .ok_or(ParseError::MissingField("task"))?;
        let task = task.trim();
        if task.is_empty() {
            return Err(ParseError::MissingField("task"));
        }
        Ok(Self {
            timestamp: parse_timestamp(ts)?,
            task: task.to_string(),
        })
    }

    pub fn to_line(&self) -> String {
        format!("{},{}\n", self.timestamp, self.task)
    }
}

/// One user feedback signal
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEvent {
    pub timestamp: f64,
    pub task: String,
    pub action: FeedbackAction,
}

impl FeedbackEvent {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut fields = line.trim().splitn(3, ',');
        let ts = fields.next().ok_or(ParseError::MissingField("timestamp"))?;
        let task = fields
            .next()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ParseError::MissingField("task"))?;
        let action = fields.next().ok_or(ParseError::MissingField("action"))?;

        Ok(Self {
            timestamp: parse_timestamp(ts)?,
            task: task.to_string(),
            action: action.trim().parse()?,
        })
    }

    pub fn to_line(&self) -> String {
        format!("{},{},{}\n", self.timestamp, self.task, self.action.as_str())
    }
}

fn parse_timestamp(raw: &str) -> Result<f64, ParseError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .ok_or_else(|| ParseError::BadTimestamp(raw.to_string()))
}

/// Current wall-clock time as fractional unix seconds
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Run and feedback logs
#[derive(Debug, Clone)]
pub struct HistoryLog {
    run_log: PathBuf,
    feedback_log: PathBuf,
}

impl HistoryLog {
    pub fn new(run_log: impl Into<PathBuf>, feedback_log: impl Into<PathBuf>) -> Self {
        Self {
            run_log: run_log.into(),
            feedback_log: feedback_log.into(),
        }
    }

    pub fn append_run(&self, event: &RunEvent) -> std::io::Result<()> {
        append_line(&self.run_log, &event.to_line())
    }

    pub fn append_feedback(&self, event: &FeedbackEvent) -> std::io::Result<()> {
        append_line(&self.feedback_log, &event.to_line())
    }

    /// All parseable run events in write order; missing log means no runs
    pub fn read_runs(&self) -> std::io::Result<Vec<RunEvent>> {
        read_lines(&self.run_log, RunEvent::parse)
    }

    /// All parseable feedback events in write order
    pub fn read_feedback(&self) -> std::io::Result<Vec<FeedbackEvent>> {
        read_lines(&self.feedback_log, FeedbackEvent::parse)
    }

    /// Run timestamps grouped by task
    pub fn runs_by_task(&self) -> std::io::Result<HashMap<String, Vec<f64>>> {
        let mut grouped: HashMap<String, Vec<f64>> = HashMap::new();
        for event in self.read_runs()? {
            grouped.entry(event.task).or_default().push(event.timestamp);
        }
        Ok(grouped)
    }

    /// Most recent run timestamp per task
    pub fn last_runs(&self) -> std::io::Result<HashMap<String, f64>> {
        let mut last: HashMap<String, f64> = HashMap::new();
        for event in self.read_runs()? {
            let entry = last.entry(event.task).or_insert(event.timestamp);
            if event.timestamp > *entry {
                *entry = event.timestamp;
            }
        }
        Ok(last)
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())
}

fn read_lines<T>(
    path: &Path,
    parse: impl Fn(&str) -> Result<T, ParseError>,
) -> std::io::Result<Vec<T>> {
    let mut records = Vec::new();
    for (lineno, line) in read_text_lines(path)? {
        if line.trim().is_empty() {
            continue;
        }
        match parse(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = lineno + 1,
                "Skipping malformed history record: {}",
                e
            ),
        }
    }
    Ok(records)
}

/// Lines of `path` with their 0-based line numbers
///
/// A line that is not valid UTF-8 is skipped with a warning; a missing file
/// has no lines.
pub(crate) fn read_text_lines(path: &Path) -> std::io::Result<Vec<(usize, String)>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut lines = Vec::new();
    for (lineno, raw) in bytes.split(|&b| b == b'\n').enumerate() {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        match String::from_utf8(raw.to_vec()) {
            Ok(line) => lines.push((lineno, line)),
            Err(e) => warn!(
                path = %path.display(),
                line = lineno + 1,
                "Skipping undecodable line: {}",
                e
            ),
        }
    }
    Ok(lines)
}
