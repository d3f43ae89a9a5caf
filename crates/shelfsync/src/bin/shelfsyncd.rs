//! shelfsyncd: runs scheduled library syncs until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{mpsc, Arc};

use clap::Parser;
use tokio::sync::broadcast;

use shelfsync::broadcast::{ProgressTracker, SqliteHistory, TrackerOptions};
use shelfsync::config::{default_config_path, load_config, Config};
use shelfsync::db::Database;
use shelfsync::jobs::{
    HistoryCleanupJob, JobRunner, JobScheduler, LibrarySyncJob, HISTORY_CLEANUP_JOB,
    LIBRARY_SYNC_JOB,
};
use shelfsync::library::{HttpImageSource, JsonDirectorySource, LibraryReconciler};
use shelfsync::{logging, JobError, ShelfError};

#[derive(Parser, Debug)]
#[command(name = "shelfsyncd", version, about = "Materializes recommendation libraries on a schedule")]
struct Args {
    /// Config file (default: ~/.shelfsync/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Run one job by name and exit instead of starting the scheduler
    #[arg(long, value_name = "JOB", conflicts_with = "trigger")]
    run_once: Option<String>,

    /// Trigger a job as soon as the scheduler starts (repeatable)
    #[arg(long, value_name = "JOB")]
    trigger: Vec<String>,
}

fn build_runner(config: &Config, db: Database) -> Result<Arc<JobRunner>, ShelfError> {
    let history = Arc::new(SqliteHistory::new(db.clone()));
    let tracker = Arc::new(ProgressTracker::new(history, TrackerOptions::default()));

    let images = Arc::new(HttpImageSource::new()?);
    let reconciler = Arc::new(LibraryReconciler::new(config.output.clone(), images));
    let source = Arc::new(JsonDirectorySource::new(config.candidates_directory()));

    let mut runner = JobRunner::new(tracker);
    runner
        .register(
            LIBRARY_SYNC_JOB,
            Arc::new(LibrarySyncJob::new(db, source, reconciler)),
        )
        .register(
            HISTORY_CLEANUP_JOB,
            Arc::new(HistoryCleanupJob::new(config.history_retention_days)),
        );
    Ok(Arc::new(runner))
}

fn run_once(runner: Arc<JobRunner>, job_name: &str) -> Result<(), ShelfError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let job_id = uuid::Uuid::new_v4().to_string();
    let summary = rt.block_on(runner.run(job_name, &job_id))?;
    log::info!(
        "{} finished: {}",
        job_name,
        serde_json::Value::Object(summary)
    );
    Ok(())
}

fn serve(runner: Arc<JobRunner>, config: &Config, triggers: Vec<String>) -> Result<(), ShelfError> {
    for name in &triggers {
        if !runner.has_job(name) {
            return Err(JobError::UnknownJobName(name.clone()).into());
        }
    }

    let (trigger_tx, trigger_rx) = broadcast::channel::<String>(16.max(triggers.len()));
    let scheduler = JobScheduler::new(runner, config.schedules.clone());
    let handle = scheduler.start(trigger_rx);
    for name in triggers {
        log::info!("Triggering '{}' at startup", name);
        if trigger_tx.send(name).is_err() {
            log::warn!("Scheduler stopped before startup triggers were delivered");
            break;
        }
    }

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        log::warn!("Could not install signal handler: {}", e);
    }

    log::info!("shelfsyncd running, press Ctrl+C to stop");
    let _ = stop_rx.recv();

    log::info!("Shutting down scheduler");
    scheduler.stop();
    drop(trigger_tx);
    if handle.join().is_err() {
        log::error!("Scheduler thread panicked");
    }
    Ok(())
}

fn run(args: Args) -> Result<(), ShelfError> {
    logging::init(args.json_logs)?;

    let config_path = args
        .config
        .or_else(default_config_path)
        .ok_or_else(|| shelfsync::ConfigError::Validation {
            message: "no config path given and no home directory found".to_string(),
        })?;
    let config = load_config(&config_path)?;
    log::info!(
        "shelfsyncd v{} using {}",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    let db_path = config
        .database_path()
        .ok_or_else(|| shelfsync::ConfigError::Validation {
            message: "no database path configured and no home directory found".to_string(),
        })?;
    let db = Database::open(&db_path)?;

    let runner = build_runner(&config, db)?;

    match args.run_once {
        Some(job_name) => run_once(runner, &job_name),
        None => serve(runner, &config, args.trigger),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("shelfsyncd: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfsync::config::load_config_from_str;

    #[test]
    fn test_trigger_flag_is_repeatable() {
        let args = Args::try_parse_from([
            "shelfsyncd",
            "--trigger",
            "library-sync",
            "--trigger",
            "history-cleanup",
        ])
        .unwrap();
        assert_eq!(args.trigger, vec!["library-sync", "history-cleanup"]);
        assert!(args.run_once.is_none());
    }

    #[test]
    fn test_trigger_conflicts_with_run_once() {
        let result = Args::try_parse_from([
            "shelfsyncd",
            "--run-once",
            "library-sync",
            "--trigger",
            "library-sync",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_startup_trigger_is_rejected() {
        let config = load_config_from_str(
            r#"{"version": "1.0", "candidates_directory": "/c",
                "output": {"root_write_path": "/w", "root_server_visible_path": "/s"}}"#,
        )
        .unwrap();
        let runner = Arc::new(JobRunner::new(Arc::new(ProgressTracker::in_memory())));

        let err = serve(runner, &config, vec!["nope".to_string()]).unwrap_err();

        assert!(matches!(err, ShelfError::Job(JobError::UnknownJobName(ref n)) if n == "nope"));
    }
}
