//! Job progress state for real-time job status streaming.

use std::collections::VecDeque;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum number of log entries retained per job.
pub const MAX_LOG_ENTRIES: usize = 500;

/// Status of a job run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Declared for queued runs; `ProgressTracker::start` never assigns it.
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Severity of a job log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    /// Level used when mirroring to the process logger.
    pub fn to_log_level(self) -> log::Level {
        match self {
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// A single line in a job's log trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: &str, data: Option<Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            data,
        }
    }
}

/// Point-in-time view of a job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub job_name: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub current_step_index: u32,
    pub total_steps: u32,
    pub current_step: String,
    pub items_processed: u64,
    pub items_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    /// Percent of the current step, 0-100.
    pub step_progress: u8,
    /// Percent of the whole run, 0-100.
    pub overall_progress: u8,
    pub logs: VecDeque<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
}

fn percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

impl JobProgress {
    /// Creates a running job at step 0. `total_steps` of 0 is treated as 1.
    pub fn new(job_id: &str, job_name: &str, total_steps: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            current_step_index: 0,
            total_steps: total_steps.max(1),
            current_step: String::new(),
            items_processed: 0,
            items_total: 0,
            current_item: None,
            step_progress: 0,
            overall_progress: 0,
            logs: VecDeque::with_capacity(16),
            error: None,
            result: None,
        }
    }

    /// Appends a log entry, dropping the oldest once the buffer is full.
    pub fn push_log(&mut self, entry: LogEntry) {
        while self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }

    /// Moves to a new step and resets the item cursor.
    pub fn apply_step(&mut self, step_index: u32, label: &str, items_total: u64) {
        self.current_step_index = step_index;
        self.current_step = label.to_string();
        self.items_processed = 0;
        self.items_total = items_total;
        self.current_item = None;
        self.step_progress = 0;
        self.overall_progress =
            percent(step_index as f64 / self.total_steps as f64 * 100.0);
    }

    /// Updates the item cursor. Overall progress never moves backwards.
    pub fn apply_items(
        &mut self,
        items_processed: u64,
        items_total: Option<u64>,
        current_item: Option<&str>,
    ) {
        if let Some(total) = items_total {
            self.items_total = total;
        }
        self.items_processed = items_processed;
        if let Some(item) = current_item {
            self.current_item = Some(item.to_string());
        }

        self.step_progress = if self.items_total > 0 {
            percent(self.items_processed as f64 / self.items_total as f64 * 100.0)
        } else {
            0
        };

        let steps = self.total_steps as f64;
        let overall = percent(
            self.current_step_index as f64 / steps * 100.0
                + (self.step_progress as f64 / 100.0) * (100.0 / steps),
        );
        self.overall_progress = self.overall_progress.max(overall);
    }

    /// Moves into a terminal status. Completion pins progress at 100.
    pub fn finish(&mut self, status: JobStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
        if status == JobStatus::Completed {
            self.step_progress = 100;
            self.overall_progress = 100;
        }
    }

    /// Wall-clock duration, up to now for running jobs.
    pub fn duration_ms(&self) -> i64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
