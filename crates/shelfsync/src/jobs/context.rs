use std::sync::Arc;

use serde_json::Value;

use crate::broadcast::{CancelFlag, LogLevel, ProgressTracker};
use crate::error::TrackerError;

/// Handle a job body uses to report progress for its own run.
#[derive(Clone)]
pub struct JobContext {
    job_id: String,
    job_name: String,
    tracker: Arc<ProgressTracker>,
    cancel: CancelFlag,
}

impl JobContext {
    pub fn new(
        job_id: &str,
        job_name: &str,
        tracker: Arc<ProgressTracker>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            tracker,
            cancel,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// The run's cancel flag, for threading into item loops.
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn set_step(&self, step_index: u32, label: &str, items_total: u64) -> Result<(), TrackerError> {
        self.tracker.set_step(&self.job_id, step_index, label, items_total)
    }

    pub fn update_items(
        &self,
        items_processed: u64,
        items_total: Option<u64>,
        current_item: Option<&str>,
    ) -> Result<(), TrackerError> {
        self.tracker
            .update_items(&self.job_id, items_processed, items_total, current_item)
    }

    pub fn log(&self, level: LogLevel, message: &str, data: Option<Value>) {
        if let Err(e) = self.tracker.log(&self.job_id, level, message, data) {
            log::debug!("Dropping log line for {}: {}", self.job_id, e);
        }
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message, None);
    }
}
