use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::broadcast::ProgressTracker;
use crate::error::{JobError, TrackerError};

use super::context::JobContext;

/// Summary a job body hands back on success. Becomes the run's `result`.
pub type JobSummary = Map<String, Value>;

/// A named unit of background work.
#[async_trait]
pub trait JobBody: Send + Sync {
    /// Number of steps reported to the tracker at start.
    fn total_steps(&self) -> u32 {
        1
    }

    async fn run(&self, ctx: &JobContext) -> Result<JobSummary, JobError>;
}

type RunningCounts = Arc<Mutex<HashMap<String, usize>>>;

fn lock_counts(counts: &RunningCounts) -> MutexGuard<'_, HashMap<String, usize>> {
    counts.lock().unwrap_or_else(|poisoned| {
        log::warn!("Running-job marker lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Marks a job name as running until dropped.
struct RunningGuard {
    counts: RunningCounts,
    name: String,
}

impl RunningGuard {
    fn enter(counts: &RunningCounts, name: &str) -> Self {
        *lock_counts(counts).entry(name.to_string()).or_insert(0) += 1;
        Self {
            counts: Arc::clone(counts),
            name: name.to_string(),
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut counts = lock_counts(&self.counts);
        if let Some(count) = counts.get_mut(&self.name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&self.name);
            }
        }
    }
}

/// Dispatches job names to their bodies and drives the tracker lifecycle.
pub struct JobRunner {
    tracker: Arc<ProgressTracker>,
    jobs: HashMap<String, Arc<dyn JobBody>>,
    running: RunningCounts,
}

impl JobRunner {
    pub fn new(tracker: Arc<ProgressTracker>) -> Self {
        Self {
            tracker,
            jobs: HashMap::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Adds (or replaces) a job in the dispatch table.
    pub fn register(&mut self, name: &str, body: Arc<dyn JobBody>) -> &mut Self {
        if self.jobs.insert(name.to_string(), body).is_some() {
            log::warn!("Job '{}' registered twice, keeping the latest", name);
        }
        self
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Registered job names, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Whether a run of `name` started by this runner has not returned yet.
    pub fn is_running(&self, name: &str) -> bool {
        lock_counts(&self.running).contains_key(name)
    }

    /// Runs `job_name` to completion under `job_id`.
    ///
    /// Unknown names fail before anything is tracked. The running marker for
    /// the name is released on every exit path, panics included. Overlapping
    /// runs of the same name are allowed here; callers that need single-flight
    /// check [`JobRunner::is_running`] first.
    pub async fn run(&self, job_name: &str, job_id: &str) -> Result<JobSummary, JobError> {
        let body = self
            .jobs
            .get(job_name)
            .cloned()
            .ok_or_else(|| JobError::UnknownJobName(job_name.to_string()))?;

        let _running = RunningGuard::enter(&self.running, job_name);

        self.tracker.start(job_id, job_name, body.total_steps())?;
        let cancel = self.tracker.cancel_flag(job_id).unwrap_or_default();
        let ctx = JobContext::new(job_id, job_name, Arc::clone(&self.tracker), cancel);

        let span = tracing::info_span!("job", job_id = %job_id, job_name = %job_name);
        let outcome = AssertUnwindSafe(body.run(&ctx))
            .catch_unwind()
            .instrument(span)
            .await;

        match outcome {
            Ok(Ok(summary)) => {
                if ctx.is_cancelled() {
                    log::info!("Job {} returned after cancellation", job_id);
                } else {
                    self.finish_quietly(self.tracker.complete(job_id, Some(summary.clone())))?;
                }
                Ok(summary)
            }
            Ok(Err(err)) => {
                if !ctx.is_cancelled() {
                    self.finish_quietly(self.tracker.fail(job_id, &err.to_string()))?;
                }
                Err(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.finish_quietly(
                    self.tracker
                        .fail(job_id, &format!("Job panicked: {}", message)),
                )?;
                Err(JobError::Panicked(message))
            }
        }
    }

    /// Starts `job_name` on the current tokio runtime under a fresh id and
    /// returns the id without waiting.
    pub fn run_detached(self: &Arc<Self>, job_name: &str) -> Result<String, JobError> {
        if !self.has_job(job_name) {
            return Err(JobError::UnknownJobName(job_name.to_string()));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let runner = Arc::clone(self);
        let name = job_name.to_string();
        let id = job_id.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run(&name, &id).await {
                log::error!("Job {} ({}) failed: {}", name, id, e);
            }
        });

        Ok(job_id)
    }

    /// A terminal transition racing a concurrent cancel is not an error.
    fn finish_quietly(&self, result: Result<(), TrackerError>) -> Result<(), JobError> {
        match result {
            Ok(()) | Err(TrackerError::AlreadyFinished(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
