//! Named background jobs: registration, execution, scheduling.

pub mod context;
pub mod history_cleanup;
pub mod library_sync;
pub mod runner;
pub mod schedule;
pub mod scheduler;

pub use context::JobContext;
pub use history_cleanup::{HistoryCleanupJob, HISTORY_CLEANUP_JOB};
pub use library_sync::{LibrarySyncJob, LIBRARY_SYNC_JOB};
pub use runner::{JobBody, JobRunner, JobSummary};
pub use schedule::Trigger;
pub use scheduler::JobScheduler;
