//! Isolated environment for running jobs end to end.
//!
//! Each harness owns a temp directory with an output root and a candidate
//! export directory, an in-memory database and a runner with the library
//! sync and history cleanup jobs registered.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use shelfsync::broadcast::{ProgressTracker, SqliteHistory, TrackerOptions};
use shelfsync::config::{OutputConfig, OutputMode};
use shelfsync::db::settings_repo::{self, LibrarySettingsRow};
use shelfsync::db::Database;
use shelfsync::jobs::{
    HistoryCleanupJob, JobRunner, LibrarySyncJob, HISTORY_CLEANUP_JOB, LIBRARY_SYNC_JOB,
};
use shelfsync::library::{JsonDirectorySource, LibraryReconciler, NoImages, RecommendationCandidate};

pub const NAMESPACE: &str = "recommendations";

pub struct TestHarness {
    temp_dir: TempDir,
    /// Output root the reconciler writes under.
    pub output_root: PathBuf,
    /// Directory of per-user candidate exports.
    pub candidates_dir: PathBuf,
    pub db: Database,
    pub tracker: Arc<ProgressTracker>,
    pub runner: Arc<JobRunner>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_mode(OutputMode::Flat)
    }

    pub fn with_mode(mode: OutputMode) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let output_root = temp_dir.path().join("output");
        let candidates_dir = temp_dir.path().join("candidates");
        std::fs::create_dir_all(&output_root).expect("Failed to create output root");
        std::fs::create_dir_all(&candidates_dir).expect("Failed to create candidates dir");

        let db = Database::open_in_memory().expect("Failed to open database");
        let history = Arc::new(SqliteHistory::new(db.clone()));
        let tracker = Arc::new(ProgressTracker::new(history, TrackerOptions::default()));

        let output = OutputConfig {
            mode,
            root_write_path: output_root.to_string_lossy().to_string(),
            root_server_visible_path: "/media/server".to_string(),
            namespace: NAMESPACE.to_string(),
            download_images: false,
        };
        let reconciler = Arc::new(LibraryReconciler::new(output, Arc::new(NoImages)));
        let source = Arc::new(JsonDirectorySource::new(&candidates_dir));

        let mut runner = JobRunner::new(Arc::clone(&tracker));
        runner
            .register(
                LIBRARY_SYNC_JOB,
                Arc::new(LibrarySyncJob::new(db.clone(), source, reconciler)),
            )
            .register(HISTORY_CLEANUP_JOB, Arc::new(HistoryCleanupJob::new(30)));

        Self {
            temp_dir,
            output_root,
            candidates_dir,
            db,
            tracker,
            runner: Arc::new(runner),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Enables a user library, optionally overriding the output mode.
    pub fn enable_user(&self, user_id: &str, display_name: &str, mode: Option<&str>) {
        settings_repo::upsert(
            &self.db,
            &LibrarySettingsRow {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                include_explanations: true,
                output_mode: mode.map(str::to_string),
                enabled: true,
                updated_at: String::new(),
            },
        )
        .expect("Failed to store settings");
    }

    /// Writes the candidate export the library sync job reads for `user_id`.
    pub fn write_candidates(&self, user_id: &str, candidates: &[RecommendationCandidate]) {
        let export = json!({
            "generatedAt": "2026-05-01T12:00:00Z",
            "candidates": candidates,
        });
        std::fs::write(
            self.candidates_dir.join(format!("{}.json", user_id)),
            serde_json::to_vec_pretty(&export).expect("Failed to encode export"),
        )
        .expect("Failed to write export");
    }

    /// A user folder under the namespace.
    pub fn user_dir(&self, folder: &str) -> PathBuf {
        self.output_root.join(NAMESPACE).join(folder)
    }

    /// Sorted entry names directly under `dir`.
    pub fn entries(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("Failed to read directory")
            .map(|e| e.expect("bad entry").file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}
