//! Progress tracker service.
//!
//! One `ProgressTracker` is constructed at startup and shared by `Arc`. Job
//! bodies mutate their own run through it; observers poll [`ProgressTracker::get`]
//! or hold a [`Subscription`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::broadcast::history::{JobRunRecord, NoopHistory, RunHistory};
use crate::broadcast::job_progress::{JobProgress, JobStatus, LogEntry, LogLevel};
use crate::error::TrackerError;

/// Shared cooperative-cancellation flag for one job run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Tunables for the tracker.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// How long completed and cancelled runs stay fetchable.
    pub completed_ttl: Duration,
    /// How long failed runs stay fetchable.
    pub failed_ttl: Duration,
    /// Capacity of the broadcast channel feeding subscribers.
    pub channel_capacity: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            completed_ttl: Duration::minutes(5),
            failed_ttl: Duration::minutes(10),
            channel_capacity: 256,
        }
    }
}

/// Which runs a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope {
    Job(String),
    All,
}

impl SubscriptionScope {
    fn matches(&self, progress: &JobProgress) -> bool {
        match self {
            SubscriptionScope::Job(id) => progress.job_id == *id,
            SubscriptionScope::All => true,
        }
    }
}

/// A live feed of progress snapshots. Dropping it unsubscribes.
pub struct Subscription {
    scope: SubscriptionScope,
    receiver: broadcast::Receiver<Arc<JobProgress>>,
}

impl Subscription {
    /// Waits for the next snapshot in scope. `None` once the tracker is gone.
    pub async fn recv(&mut self) -> Option<Arc<JobProgress>> {
        loop {
            match self.receiver.recv().await {
                Ok(progress) if self.scope.matches(&progress) => return Some(progress),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Progress subscriber lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered snapshot in scope without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<JobProgress>> {
        loop {
            match self.receiver.try_recv() {
                Ok(progress) if self.scope.matches(&progress) => return Some(progress),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    log::warn!("Progress subscriber lagged, skipped {} updates", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    /// Ends the subscription.
    pub fn unsubscribe(self) {}
}

struct TrackedJob {
    progress: JobProgress,
    cancel: CancelFlag,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory registry of job runs with pub/sub fan-out and durable history.
pub struct ProgressTracker {
    jobs: RwLock<HashMap<String, TrackedJob>>,
    sender: broadcast::Sender<Arc<JobProgress>>,
    history: Arc<dyn RunHistory>,
    options: TrackerOptions,
}

impl ProgressTracker {
    /// Creates a tracker persisting finished runs through `history`.
    pub fn new(history: Arc<dyn RunHistory>, options: TrackerOptions) -> Self {
        let (sender, _) = broadcast::channel(options.channel_capacity.max(1));
        Self {
            jobs: RwLock::new(HashMap::new()),
            sender,
            history,
            options,
        }
    }

    /// Creates a tracker that keeps no durable history.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoopHistory), TrackerOptions::default())
    }

    pub fn history(&self) -> &Arc<dyn RunHistory> {
        &self.history
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TrackedJob>> {
        match self.jobs.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Progress tracker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TrackedJob>> {
        match self.jobs.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Progress tracker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn broadcast(&self, progress: &JobProgress) {
        // No active receivers is fine
        let _ = self.sender.send(Arc::new(progress.clone()));
    }

    fn prune_expired(jobs: &mut HashMap<String, TrackedJob>, now: DateTime<Utc>) {
        jobs.retain(|id, job| match job.expires_at {
            Some(deadline) if deadline <= now => {
                log::debug!("Evicting finished job {} from memory", id);
                false
            }
            _ => true,
        });
    }

    /// Drops finished runs whose retention window has passed.
    pub fn evict_expired(&self) {
        Self::prune_expired(&mut self.write(), Utc::now());
    }

    /// Starts tracking a run. Fails if `job_id` is already tracked.
    pub fn start(
        &self,
        job_id: &str,
        job_name: &str,
        total_steps: u32,
    ) -> Result<JobProgress, TrackerError> {
        let mut jobs = self.write();
        Self::prune_expired(&mut jobs, Utc::now());

        if jobs.contains_key(job_id) {
            return Err(TrackerError::AlreadyStarted(job_id.to_string()));
        }

        let mut progress = JobProgress::new(job_id, job_name, total_steps);
        let message = format!("Started {} ({} steps)", job_name, progress.total_steps);
        log::info!("[{}:{}] {}", job_name, job_id, message);
        progress.push_log(LogEntry::new(LogLevel::Info, &message, None));

        self.broadcast(&progress);
        let snapshot = progress.clone();
        jobs.insert(
            job_id.to_string(),
            TrackedJob {
                progress,
                cancel: CancelFlag::new(),
                expires_at: None,
            },
        );
        Ok(snapshot)
    }

    /// Applies `f` to a running job and broadcasts the result. Finished jobs
    /// are left untouched.
    fn mutate_running<F>(&self, job_id: &str, f: F) -> Result<(), TrackerError>
    where
        F: FnOnce(&mut JobProgress),
    {
        let mut jobs = self.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| TrackerError::UnknownJob(job_id.to_string()))?;

        if job.progress.is_finished() {
            log::debug!(
                "Ignoring progress update for finished job {} ({})",
                job_id,
                job.progress.status
            );
            return Ok(());
        }

        f(&mut job.progress);
        self.broadcast(&job.progress);
        Ok(())
    }

    /// Moves to step `step_index` and resets the item cursor.
    pub fn set_step(
        &self,
        job_id: &str,
        step_index: u32,
        label: &str,
        items_total: u64,
    ) -> Result<(), TrackerError> {
        self.mutate_running(job_id, |progress| {
            if step_index < progress.current_step_index {
                log::warn!(
                    "Job {} moved back from step {} to {}",
                    job_id,
                    progress.current_step_index,
                    step_index
                );
            }
            progress.apply_step(step_index, label, items_total);
        })
    }

    /// Updates the item cursor of the current step. Broadcasts on every call.
    pub fn update_items(
        &self,
        job_id: &str,
        items_processed: u64,
        items_total: Option<u64>,
        current_item: Option<&str>,
    ) -> Result<(), TrackerError> {
        self.mutate_running(job_id, |progress| {
            progress.apply_items(items_processed, items_total, current_item);
        })
    }

    /// Appends a log line and mirrors it to the process logger.
    pub fn log(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        data: Option<Value>,
    ) -> Result<(), TrackerError> {
        let mut jobs = self.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| TrackerError::UnknownJob(job_id.to_string()))?;

        log::log!(
            level.to_log_level(),
            "[{}:{}] {}",
            job.progress.job_name,
            job_id,
            message
        );
        job.progress.push_log(LogEntry::new(level, message, data));
        self.broadcast(&job.progress);
        Ok(())
    }

    /// Marks the run completed with an optional result summary.
    pub fn complete(
        &self,
        job_id: &str,
        result: Option<Map<String, Value>>,
    ) -> Result<(), TrackerError> {
        self.finish(job_id, JobStatus::Completed, |progress| {
            progress.result = result;
            progress.push_log(LogEntry::new(LogLevel::Info, "Job completed", None));
        })
    }

    /// Marks the run failed.
    pub fn fail(&self, job_id: &str, error_message: &str) -> Result<(), TrackerError> {
        self.finish(job_id, JobStatus::Failed, |progress| {
            progress.error = Some(error_message.to_string());
            progress.push_log(LogEntry::new(
                LogLevel::Error,
                &format!("Job failed: {}", error_message),
                None,
            ));
        })
    }

    /// Marks the run cancelled and raises its cancel flag. Work already in
    /// flight is not interrupted; only loops polling the flag stop.
    pub fn cancel(&self, job_id: &str) -> Result<(), TrackerError> {
        self.finish(job_id, JobStatus::Cancelled, |progress| {
            progress.push_log(LogEntry::new(
                LogLevel::Warn,
                "Cancellation requested",
                None,
            ));
        })
    }

    fn finish<F>(&self, job_id: &str, status: JobStatus, f: F) -> Result<(), TrackerError>
    where
        F: FnOnce(&mut JobProgress),
    {
        let record = {
            let mut jobs = self.write();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| TrackerError::UnknownJob(job_id.to_string()))?;

            if job.progress.is_finished() {
                log::warn!(
                    "Job {} already finished as {}, ignoring {}",
                    job_id,
                    job.progress.status,
                    status
                );
                return Err(TrackerError::AlreadyFinished(job_id.to_string()));
            }

            f(&mut job.progress);
            job.progress.finish(status);
            if status == JobStatus::Cancelled {
                job.cancel.cancel();
            }

            let ttl = match status {
                JobStatus::Failed => self.options.failed_ttl,
                _ => self.options.completed_ttl,
            };
            job.expires_at = Some(Utc::now() + ttl);

            log::info!(
                "[{}:{}] Finished as {} after {}ms",
                job.progress.job_name,
                job_id,
                status,
                job.progress.duration_ms()
            );

            self.broadcast(&job.progress);
            JobRunRecord::from_progress(&job.progress)
        };

        if let Err(e) = self.history.record(&record) {
            log::error!("Failed to persist run history for job {}: {}", job_id, e);
        }
        Ok(())
    }

    /// Cooperative cancellation poll. Unknown jobs are not cancelled.
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.read()
            .get(job_id)
            .map(|job| job.cancel.is_cancelled())
            .unwrap_or(false)
    }

    /// Returns the cancel flag of a tracked job, for threading into loops.
    pub fn cancel_flag(&self, job_id: &str) -> Option<CancelFlag> {
        self.read().get(job_id).map(|job| job.cancel.clone())
    }

    /// Returns a snapshot of a tracked job.
    pub fn get(&self, job_id: &str) -> Option<JobProgress> {
        let now = Utc::now();
        self.read()
            .get(job_id)
            .filter(|job| job.expires_at.map(|d| d > now).unwrap_or(true))
            .map(|job| job.progress.clone())
    }

    /// Returns all tracked jobs, newest first.
    pub fn active(&self) -> Vec<JobProgress> {
        let now = Utc::now();
        let mut result: Vec<JobProgress> = self
            .read()
            .values()
            .filter(|job| job.expires_at.map(|d| d > now).unwrap_or(true))
            .map(|job| job.progress.clone())
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result
    }

    /// Whether any run with this name is currently running.
    pub fn is_name_running(&self, job_name: &str) -> bool {
        self.read().values().any(|job| {
            job.progress.job_name == job_name && job.progress.status == JobStatus::Running
        })
    }

    /// Subscribes to one job or to every job.
    pub fn subscribe(&self, scope: SubscriptionScope) -> Subscription {
        Subscription {
            scope,
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::history::{HistoryQuery, SqliteHistory};
    use crate::broadcast::job_progress::MAX_LOG_ENTRIES;
    use crate::db::Database;
    use serde_json::json;

    fn drain(sub: &mut Subscription) -> Vec<Arc<JobProgress>> {
        let mut out = Vec::new();
        while let Some(p) = sub.try_recv() {
            out.push(p);
        }
        out
    }

    #[test]
    fn test_start_broadcasts_running_state() {
        let tracker = ProgressTracker::in_memory();
        let mut sub = tracker.subscribe(SubscriptionScope::All);

        let progress = tracker.start("job-1", "library-sync", 3).unwrap();
        assert_eq!(progress.status, JobStatus::Running);
        assert_eq!(progress.logs.len(), 1);

        let received = sub.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.status, JobStatus::Running);
    }

    #[test]
    fn test_start_twice_fails() {
        let tracker = ProgressTracker::in_memory();
        tracker.start("job-1", "x", 1).unwrap();
        assert_eq!(
            tracker.start("job-1", "x", 1).unwrap_err(),
            TrackerError::AlreadyStarted("job-1".to_string())
        );
    }

    #[test]
    fn test_unknown_job_errors() {
        let tracker = ProgressTracker::in_memory();
        assert!(matches!(
            tracker.set_step("nope", 1, "x", 0),
            Err(TrackerError::UnknownJob(_))
        ));
        assert!(!tracker.is_cancelled("nope"));
    }

    #[test]
    fn test_set_step_exact_overall() {
        let tracker = ProgressTracker::in_memory();
        tracker.start("job-1", "x", 6).unwrap();
        for i in 0..=6u32 {
            tracker.set_step("job-1", i, "step", 0).unwrap();
            let expected = (i as f64 / 6.0 * 100.0).round() as u8;
            assert_eq!(tracker.get("job-1").unwrap().overall_progress, expected);
        }
    }

    #[test]
    fn test_overall_monotonic_then_100_on_complete() {
        let tracker = ProgressTracker::in_memory();
        let mut sub = tracker.subscribe(SubscriptionScope::Job("job-1".to_string()));
        tracker.start("job-1", "x", 3).unwrap();

        for step in 0..3u32 {
            tracker.set_step("job-1", step, "step", 7).unwrap();
            for item in 1..=7u64 {
                tracker.update_items("job-1", item, None, None).unwrap();
            }
        }
        tracker.complete("job-1", None).unwrap();

        let snapshots = drain(&mut sub);
        let mut last = 0;
        for snapshot in &snapshots {
            assert!(snapshot.overall_progress >= last);
            last = snapshot.overall_progress;
        }
        let final_state = snapshots.last().unwrap();
        assert_eq!(final_state.status, JobStatus::Completed);
        assert_eq!(final_state.overall_progress, 100);
    }

    #[test]
    fn test_every_item_update_broadcasts_in_order() {
        let tracker = ProgressTracker::in_memory();
        tracker.start("job-1", "x", 1).unwrap();
        let mut sub = tracker.subscribe(SubscriptionScope::Job("job-1".to_string()));

        for i in 1..=10u64 {
            tracker.update_items("job-1", i, Some(10), None).unwrap();
        }

        let processed: Vec<u64> = drain(&mut sub).iter().map(|p| p.items_processed).collect();
        assert_eq!(processed, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_scoped_subscription_filters_other_jobs() {
        let tracker = ProgressTracker::in_memory();
        let mut only_b = tracker.subscribe(SubscriptionScope::Job("b".to_string()));
        let mut all = tracker.subscribe(SubscriptionScope::All);

        tracker.start("a", "x", 1).unwrap();
        tracker.start("b", "y", 1).unwrap();

        assert_eq!(drain(&mut only_b).len(), 1);
        assert_eq!(drain(&mut all).len(), 2);
    }

    #[test]
    fn test_log_ring_buffer_capped() {
        let tracker = ProgressTracker::in_memory();
        tracker.start("job-1", "x", 1).unwrap();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            tracker
                .log("job-1", LogLevel::Debug, &format!("line {}", i), None)
                .unwrap();
        }
        let progress = tracker.get("job-1").unwrap();
        assert_eq!(progress.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(
            progress.logs.back().unwrap().message,
            format!("line {}", MAX_LOG_ENTRIES + 9)
        );
    }

    #[test]
    fn test_log_carries_structured_data() {
        let tracker = ProgressTracker::in_memory();
        tracker.start("job-1", "x", 1).unwrap();
        tracker
            .log("job-1", LogLevel::Warn, "skipped", Some(json!({"id": "tt1"})))
            .unwrap();
        let progress = tracker.get("job-1").unwrap();
        let entry = progress.logs.back().unwrap();
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.data, Some(json!({"id": "tt1"})));
    }

    #[test]
    fn test_terminal_transition_happens_once() {
        let tracker = ProgressTracker::in_memory();
        tracker.start("job-1", "x", 1).unwrap();
        tracker.fail("job-1", "boom").unwrap();

        assert_eq!(
            tracker.complete("job-1", None).unwrap_err(),
            TrackerError::AlreadyFinished("job-1".to_string())
        );
        let progress = tracker.get("job-1").unwrap();
        assert_eq!(progress.status, JobStatus::Failed);
        assert_eq!(progress.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_updates_after_finish_are_ignored() {
        let tracker = ProgressTracker::in_memory();
        tracker.start("job-1", "x", 2).unwrap();
        tracker.cancel("job-1").unwrap();
        tracker.update_items("job-1", 5, Some(10), None).unwrap();
        let progress = tracker.get("job-1").unwrap();
        assert_eq!(progress.status, JobStatus::Cancelled);
        assert_eq!(progress.items_processed, 0);
    }

    #[test]
    fn test_cancel_raises_flag() {
        let tracker = ProgressTracker::in_memory();
        tracker.start("job-1", "x", 1).unwrap();
        let flag = tracker.cancel_flag("job-1").unwrap();
        assert!(!flag.is_cancelled());

        tracker.cancel("job-1").unwrap();
        assert!(flag.is_cancelled());
        assert!(tracker.is_cancelled("job-1"));
    }

    #[test]
    fn test_is_name_running() {
        let tracker = ProgressTracker::in_memory();
        tracker.start("job-1", "library-sync", 1).unwrap();
        assert!(tracker.is_name_running("library-sync"));
        assert!(!tracker.is_name_running("history-cleanup"));

        tracker.complete("job-1", None).unwrap();
        assert!(!tracker.is_name_running("library-sync"));
    }

    #[test]
    fn test_finished_jobs_evicted_after_ttl() {
        let options = TrackerOptions {
            completed_ttl: Duration::zero(),
            failed_ttl: Duration::minutes(10),
            ..Default::default()
        };
        let tracker = ProgressTracker::new(Arc::new(NoopHistory), options);
        tracker.start("done", "x", 1).unwrap();
        tracker.start("broken", "x", 1).unwrap();
        tracker.complete("done", None).unwrap();
        tracker.fail("broken", "boom").unwrap();

        assert!(tracker.get("done").is_none());
        tracker.evict_expired();
        assert!(tracker.get("broken").is_some());
        assert_eq!(tracker.active().len(), 1);

        // An evicted id can be reused.
        tracker.start("done", "x", 1).unwrap();
    }

    #[test]
    fn test_terminal_runs_are_persisted() {
        let history = Arc::new(SqliteHistory::new(Database::open_in_memory().unwrap()));
        let tracker = ProgressTracker::new(history.clone(), TrackerOptions::default());

        tracker.start("ok", "library-sync", 1).unwrap();
        tracker.update_items("ok", 2, Some(2), None).unwrap();
        let mut result = Map::new();
        result.insert("created".to_string(), json!(2));
        tracker.complete("ok", Some(result)).unwrap();

        tracker.start("bad", "library-sync", 1).unwrap();
        tracker.fail("bad", "root missing").unwrap();

        let runs = history
            .recent(&HistoryQuery {
                job_name: Some("library-sync".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(runs.len(), 2);
        let ok = runs.iter().find(|r| r.job_id == "ok").unwrap();
        assert_eq!(ok.status, JobStatus::Completed);
        assert_eq!(ok.metadata, json!({"created": 2}));
        assert_eq!(ok.items_processed, 2);
        let bad = runs.iter().find(|r| r.job_id == "bad").unwrap();
        assert_eq!(bad.error_message.as_deref(), Some("root missing"));
    }

    #[tokio::test]
    async fn test_async_subscriber_receives_final_state() {
        let tracker = Arc::new(ProgressTracker::in_memory());
        let mut sub = tracker.subscribe(SubscriptionScope::Job("job-1".to_string()));

        let worker = Arc::clone(&tracker);
        let handle = tokio::spawn(async move {
            worker.start("job-1", "x", 1).unwrap();
            worker.complete("job-1", None).unwrap();
        });

        let mut last = None;
        while let Some(progress) = sub.recv().await {
            let done = progress.is_finished();
            last = Some(progress);
            if done {
                break;
            }
        }
        handle.await.unwrap();
        assert_eq!(last.unwrap().status, JobStatus::Completed);
    }
}
