use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShelfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid schedule for job '{job}': {reason}")]
    InvalidSchedule { job: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move '{from}' to '{to}': {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create symlink from '{link}' to '{target}': {source}")]
    CreateSymlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list directory '{path}': {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Job '{0}' is already tracked")]
    AlreadyStarted(String),

    #[error("Job '{0}' is not tracked")]
    UnknownJob(String),

    #[error("Job '{0}' has already finished")]
    AlreadyFinished(String),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("No job named '{0}' is registered")]
    UnknownJobName(String),

    #[error("Job '{name}' failed: {message}")]
    Failed { name: String, message: String },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job task panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Library output is misconfigured: {0}")]
    Misconfigured(String),

    #[error("Library root '{path}' is not accessible: {source}")]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load candidates for user '{user_id}': {reason}")]
    CandidateSource { user_id: String, reason: String },

    #[error("Failed to download '{url}': {reason}")]
    Download { url: String, reason: String },

    #[error("Failed to render sidecar: {0}")]
    Sidecar(#[source] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, ShelfError>;
