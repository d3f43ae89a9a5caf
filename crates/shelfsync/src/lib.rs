pub mod batch;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod library;
pub mod logging;
pub mod storage;

pub use broadcast::{JobProgress, JobStatus, ProgressTracker, RunHistory, SqliteHistory};
pub use config::{load_config, Config, OutputConfig, OutputMode};
pub use error::{
    ConfigError, JobError, LibraryError, Result, ShelfError, StorageError, TrackerError,
};
pub use jobs::{JobRunner, JobScheduler, LibrarySyncJob, HISTORY_CLEANUP_JOB, LIBRARY_SYNC_JOB};
pub use library::{LibraryReconciler, ReconcileSummary, RecommendationCandidate};
