//! Job run repository: append-only history of finished job runs.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job run row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRunRow {
    /// Row id; ignored on insert.
    pub id: i64,
    pub job_id: String,
    pub job_name: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: String,
    pub duration_ms: i64,
    pub items_processed: i64,
    pub items_total: i64,
    pub error_message: Option<String>,
    pub metadata: Option<String>,
}

impl JobRunRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            job_name: row.get("job_name")?,
            status: row.get("status")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            duration_ms: row.get("duration_ms")?,
            items_processed: row.get("items_processed")?,
            items_total: row.get("items_total")?,
            error_message: row.get("error_message")?,
            metadata: row.get("metadata")?,
        })
    }
}

/// Query filter for job run history.
#[derive(Debug, Default, Clone)]
pub struct JobRunFilter {
    pub job_name: Option<String>,
    pub status: Option<String>,
    /// Inclusive lower bound on `completed_at` (RFC 3339).
    pub completed_after: Option<String>,
    /// Inclusive upper bound on `completed_at` (RFC 3339).
    pub completed_before: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Appends a job run row and returns its new id.
pub fn insert(db: &Database, run: &JobRunRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_runs (job_id, job_name, status, started_at, completed_at,
             duration_ms, items_processed, items_total, error_message, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.job_id,
                run.job_name,
                run.status,
                run.started_at,
                run.completed_at,
                run.duration_ms,
                run.items_processed,
                run.items_total,
                run.error_message,
                run.metadata,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Queries job runs, most recent first. Returns (rows, total_count).
pub fn query(db: &Database, filter: &JobRunFilter) -> Result<(Vec<JobRunRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref job_name) = filter.job_name {
            conditions.push(format!("job_name = ?{}", param_values.len() + 1));
            param_values.push(Box::new(job_name.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref after) = filter.completed_after {
            conditions.push(format!("completed_at >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(after.clone()));
        }
        if let Some(ref before) = filter.completed_before {
            conditions.push(format!("completed_at <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(before.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM job_runs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(50) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM job_runs {} ORDER BY completed_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRunRow> = stmt
            .query_map(params_ref.as_slice(), JobRunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Deletes runs that completed before `cutoff`. Returns the number removed.
pub fn delete_older_than(db: &Database, cutoff: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM job_runs WHERE completed_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    })
}
