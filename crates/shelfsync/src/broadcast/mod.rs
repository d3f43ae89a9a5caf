//! Job progress tracking with real-time fan-out and durable run history.

pub mod history;
pub mod job_progress;
pub mod tracker;

pub use history::{HistoryQuery, JobRunRecord, NoopHistory, RunHistory, SqliteHistory};
pub use job_progress::{JobProgress, JobStatus, LogEntry, LogLevel, MAX_LOG_ENTRIES};
pub use tracker::{
    CancelFlag, ProgressTracker, Subscription, SubscriptionScope, TrackerOptions,
};
