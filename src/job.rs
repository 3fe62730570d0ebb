//! Job status model and progress tracking
//!
//! The web API reports job status either by name ("running", "succeeded", ...)
//! or by a raw numeric code. Both encodings decode into `JobStatus`, which
//! classifies each status as pending, finished or fatal for the poller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use crate::{ControllerError, Result};

/// Raw numeric status codes that mean the job reached a terminal state
/// whose result should be fetched
pub const FINISHED_STATUS_CODES: &[i64] = &[2, 3, 4, 5, 8];

/// Decoded job status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Aborted,
    Lost,
    Preempted,
    /// Raw numeric encoding
    Code(i64),
    Other(String),
}

/// What the poller should do after observing a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Pending,
    Finished,
    Fatal,
}

impl JobStatus {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64).map(|f| f as i64))
                .map(JobStatus::Code)
                .unwrap_or_else(|| JobStatus::Other(n.to_string())),
            Value::String(s) => Self::parse(s),
            Value::Null => JobStatus::Other(String::new()),
            other => JobStatus::Other(other.to_string()),
        }
    }

    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(code) = trimmed.parse::<i64>() {
            return JobStatus::Code(code);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "queued" | "pending" => JobStatus::Queued,
            "running" | "started" | "active" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            "aborted" => JobStatus::Aborted,
            "lost" => JobStatus::Lost,
            "preempted" => JobStatus::Preempted,
            _ => JobStatus::Other(trimmed.to_string()),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            JobStatus::Succeeded | JobStatus::Aborted | JobStatus::Failed => Disposition::Finished,
            JobStatus::Lost | JobStatus::Preempted => Disposition::Fatal,
            JobStatus::Code(code) if FINISHED_STATUS_CODES.contains(code) => Disposition::Finished,
            _ => Disposition::Pending,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Aborted => write!(f, "aborted"),
            JobStatus::Lost => write!(f, "lost"),
            JobStatus::Preempted => write!(f, "preempted"),
            JobStatus::Code(code) => write!(f, "{}", code),
            JobStatus::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// Job envelope returned by `GET job/{jobpk}/`
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub jobpk: Option<String>,
    pub status: JobStatus,
    pub status_text: Option<String>,
    pub progress: Option<f64>,
}

impl JobState {
    pub fn new(status: JobStatus) -> Self {
        Self {
            jobpk: None,
            status,
            status_text: None,
            progress: None,
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.status_text = Some(text.to_string());
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| ControllerError::Server {
            status: 200,
            message: format!("job status is not a JSON object: {}", value),
            traceback: None,
        })?;

        let status = object.get("status").map(JobStatus::from_value).unwrap_or(JobStatus::Other(String::new()));
        let status_text = object
            .get("status_text")
            .and_then(Value::as_str)
            .map(str::to_string);
        let progress = object.get("progress").and_then(|p| match p {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        });

        Ok(Self {
            jobpk: object.get("jobpk").or_else(|| object.get("pk")).and_then(primary_key),
            status,
            status_text,
            progress,
        })
    }
}

/// Latest result entry of a task
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskResult {
    pub pk: Option<String>,
    pub errormessage: Option<String>,
    pub errorcode: Option<String>,
    pub output: Value,
}

impl TaskResult {
    pub fn from_value(value: &Value) -> Self {
        let errormessage = value
            .get("errormessage")
            .and_then(Value::as_str)
            .map(str::to_string);
        let errorcode = value
            .get("errorcode")
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|c| c.to_string())));
        Self {
            pk: value.get("pk").and_then(primary_key),
            errormessage,
            errorcode,
            output: value.get("output").cloned().unwrap_or(Value::Null),
        }
    }

    /// Convert into the task output, failing when the entry carries an error
    pub fn into_output(self) -> Result<Value> {
        match self.errormessage {
            Some(message) if !message.trim().is_empty() => Err(ControllerError::Task {
                code: self.errorcode,
                message,
            }),
            _ => Ok(self.output),
        }
    }
}

/// Normalize a primary key that may arrive as string or number
pub fn primary_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One observed poll, as reported to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub jobpk: String,
    pub status: String,
    pub status_text: String,
    /// Running maximum of reported progress
    pub progress: f64,
    /// Raw value reported by the server for this poll
    pub raw_progress: Option<f64>,
    pub text_changed: bool,
}

/// Tracks progress and status text across one poll sequence
///
/// Progress is the running maximum of every value seen so a spurious
/// decrease from the server is never passed on. Status text is flagged as
/// changed only when it differs from the previous poll.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    max_progress: f64,
    last_status_text: Option<String>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, jobpk: &str, state: &JobState) -> JobProgress {
        if let Some(raw) = state.progress {
            if raw.is_finite() && raw > self.max_progress {
                self.max_progress = raw.min(1.0);
            }
        }

        let status_text = state
            .status_text
            .clone()
            .unwrap_or_else(|| state.status.to_string());
        let text_changed = self.last_status_text.as_deref() != Some(status_text.as_str());
        if text_changed {
            self.last_status_text = Some(status_text.clone());
        }

        JobProgress {
            jobpk: jobpk.to_string(),
            status: state.status.to_string(),
            status_text,
            progress: self.max_progress,
            raw_progress: state.progress,
            text_changed,
        }
    }

    pub fn progress(&self) -> f64 {
        self.max_progress
    }
}
