use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::broadcast::history::format_timestamp;
use crate::error::JobError;

use super::context::JobContext;
use super::runner::{JobBody, JobSummary};

pub const HISTORY_CLEANUP_JOB: &str = "history-cleanup";

/// Drops run history older than the retention window.
pub struct HistoryCleanupJob {
    retention_days: u32,
}

impl HistoryCleanupJob {
    pub fn new(retention_days: u32) -> Self {
        Self { retention_days }
    }
}

/// Start of the retention window. Saturates at the earliest representable
/// instant, which keeps every row.
fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(retention_days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl JobBody for HistoryCleanupJob {
    async fn run(&self, ctx: &JobContext) -> Result<JobSummary, JobError> {
        let cutoff = retention_cutoff(Utc::now(), self.retention_days);
        ctx.set_step(0, "Pruning run history", 1)?;

        let deleted = ctx.tracker().history().prune(cutoff)?;
        ctx.update_items(1, None, None)?;
        ctx.info(&format!(
            "Removed {} run(s) completed before {}",
            deleted,
            format_timestamp(cutoff)
        ));

        let mut summary = JobSummary::new();
        summary.insert("deleted".to_string(), json!(deleted));
        summary.insert("cutoff".to_string(), json!(format_timestamp(cutoff)));
        Ok(summary)
    }
}
