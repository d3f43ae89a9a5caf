//! Durable job run history behind a persistence port.
//!
//! The tracker only knows about [`RunHistory`]; the database-backed and no-op
//! implementations are picked when the tracker is constructed.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broadcast::job_progress::{JobProgress, JobStatus};
use crate::db::job_run_repo::{self, JobRunFilter, JobRunRow};
use crate::db::{Database, DatabaseError};

/// One finished job run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRunRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub job_id: String,
    pub job_name: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub items_processed: u64,
    pub items_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Snapshot of the job result, `Value::Null` when there was none.
    pub metadata: Value,
}

impl JobRunRecord {
    /// Builds a record from a job that has reached a terminal status.
    pub fn from_progress(progress: &JobProgress) -> Self {
        let completed_at = progress.completed_at.unwrap_or_else(Utc::now);
        Self {
            id: None,
            job_id: progress.job_id.clone(),
            job_name: progress.job_name.clone(),
            status: progress.status,
            started_at: progress.started_at,
            completed_at,
            duration_ms: (completed_at - progress.started_at)
                .num_milliseconds()
                .max(0),
            items_processed: progress.items_processed,
            items_total: progress.items_total,
            error_message: progress.error.clone(),
            metadata: progress
                .result
                .clone()
                .map(Value::Object)
                .unwrap_or(Value::Null),
        }
    }

    fn to_row(&self) -> Result<JobRunRow, DatabaseError> {
        let metadata = match self.metadata {
            Value::Null => None,
            ref value => Some(serde_json::to_string(value)?),
        };
        Ok(JobRunRow {
            id: self.id.unwrap_or_default(),
            job_id: self.job_id.clone(),
            job_name: self.job_name.clone(),
            status: self.status.as_str().to_string(),
            started_at: format_timestamp(self.started_at),
            completed_at: format_timestamp(self.completed_at),
            duration_ms: self.duration_ms,
            items_processed: self.items_processed as i64,
            items_total: self.items_total as i64,
            error_message: self.error_message.clone(),
            metadata,
        })
    }

    fn from_row(row: JobRunRow) -> Result<Self, DatabaseError> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|_| DatabaseError::InvalidValue {
                column: "status",
                value: row.status.clone(),
            })?;
        let metadata = match row.metadata.as_deref() {
            Some(raw) => serde_json::from_str(raw)?,
            None => Value::Null,
        };
        Ok(Self {
            id: Some(row.id),
            job_id: row.job_id,
            job_name: row.job_name,
            status,
            started_at: parse_timestamp(&row.started_at, "started_at")?,
            completed_at: parse_timestamp(&row.completed_at, "completed_at")?,
            duration_ms: row.duration_ms,
            items_processed: row.items_processed.max(0) as u64,
            items_total: row.items_total.max(0) as u64,
            error_message: row.error_message,
            metadata,
        })
    }
}

pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str, column: &'static str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidValue {
            column,
            value: s.to_string(),
        })
}

/// History listing parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub job_name: Option<String>,
    pub status: Option<JobStatus>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
}

/// Persistence port for finished runs.
pub trait RunHistory: Send + Sync {
    /// Appends a finished run.
    fn record(&self, run: &JobRunRecord) -> Result<(), DatabaseError>;

    /// Lists runs, most recent first.
    fn recent(&self, query: &HistoryQuery) -> Result<Vec<JobRunRecord>, DatabaseError>;

    /// Drops runs that completed before `cutoff`; returns how many went.
    fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError>;
}

/// Keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistory;

impl RunHistory for NoopHistory {
    fn record(&self, _run: &JobRunRecord) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn recent(&self, _query: &HistoryQuery) -> Result<Vec<JobRunRecord>, DatabaseError> {
        Ok(Vec::new())
    }

    fn prune(&self, _cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
        Ok(0)
    }
}

/// History stored in the `job_runs` table.
#[derive(Clone)]
pub struct SqliteHistory {
    db: Database,
}

impl SqliteHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl RunHistory for SqliteHistory {
    fn record(&self, run: &JobRunRecord) -> Result<(), DatabaseError> {
        job_run_repo::insert(&self.db, &run.to_row()?)?;
        Ok(())
    }

    fn recent(&self, query: &HistoryQuery) -> Result<Vec<JobRunRecord>, DatabaseError> {
        let filter = JobRunFilter {
            job_name: query.job_name.clone(),
            status: query.status.map(|s| s.as_str().to_string()),
            completed_after: query.since.map(format_timestamp),
            completed_before: None,
            limit: query.limit,
            offset: None,
        };
        let (rows, _) = job_run_repo::query(&self.db, &filter)?;
        rows.into_iter().map(JobRunRecord::from_row).collect()
    }

    fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
        job_run_repo::delete_older_than(&self.db, &format_timestamp(cutoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn finished(job_id: &str, name: &str, status: JobStatus) -> JobProgress {
        let mut progress = JobProgress::new(job_id, name, 2);
        progress.apply_step(1, "Writing", 4);
        progress.apply_items(3, None, None);
        if status == JobStatus::Failed {
            progress.error = Some("root missing".to_string());
        }
        if status == JobStatus::Completed {
            let mut result = serde_json::Map::new();
            result.insert("created".to_string(), json!(3));
            progress.result = Some(result);
        }
        progress.finish(status);
        progress
    }

    #[test]
    fn test_record_from_progress() {
        let record = JobRunRecord::from_progress(&finished("j1", "library-sync", JobStatus::Completed));
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.items_processed, 3);
        assert_eq!(record.items_total, 4);
        assert_eq!(record.metadata, json!({"created": 3}));
        assert!(record.duration_ms >= 0);
    }

    #[test]
    fn test_noop_history_keeps_nothing() {
        let history = NoopHistory;
        let record = JobRunRecord::from_progress(&finished("j1", "x", JobStatus::Completed));
        history.record(&record).unwrap();
        assert!(history.recent(&HistoryQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_history_round_trip() {
        let history = SqliteHistory::new(Database::open_in_memory().unwrap());
        let record = JobRunRecord::from_progress(&finished("j1", "library-sync", JobStatus::Failed));
        history.record(&record).unwrap();

        let runs = history.recent(&HistoryQuery::default()).unwrap();
        assert_eq!(runs.len(), 1);
        let stored = &runs[0];
        assert!(stored.id.is_some());
        assert_eq!(stored.job_id, "j1");
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("root missing"));
        assert_eq!(stored.metadata, Value::Null);
    }

    #[test]
    fn test_sqlite_history_filters_by_name_and_limit() {
        let history = SqliteHistory::new(Database::open_in_memory().unwrap());
        for i in 0..3 {
            let mut record =
                JobRunRecord::from_progress(&finished(&format!("s{}", i), "library-sync", JobStatus::Completed));
            record.completed_at = record.completed_at + Duration::seconds(i);
            history.record(&record).unwrap();
        }
        history
            .record(&JobRunRecord::from_progress(&finished("c", "history-cleanup", JobStatus::Completed)))
            .unwrap();

        let runs = history
            .recent(&HistoryQuery {
                job_name: Some("library-sync".to_string()),
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].job_id, "s2");
        assert_eq!(runs[1].job_id, "s1");
    }

    #[test]
    fn test_sqlite_history_prune() {
        let history = SqliteHistory::new(Database::open_in_memory().unwrap());
        let mut old = JobRunRecord::from_progress(&finished("old", "x", JobStatus::Completed));
        old.completed_at = Utc::now() - Duration::days(40);
        history.record(&old).unwrap();
        history
            .record(&JobRunRecord::from_progress(&finished("new", "x", JobStatus::Cancelled)))
            .unwrap();

        let removed = history.prune(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        let runs = history.recent(&HistoryQuery::default()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, JobStatus::Cancelled);
    }
}
