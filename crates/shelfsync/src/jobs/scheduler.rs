//! Fires configured jobs on their triggers.
//!
//! The loop runs on its own thread with a current-thread runtime, so every
//! scheduled run shares one event loop. Manual runs can be requested by job
//! name through a broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::config::ScheduleEntry;

use super::runner::JobRunner;

/// Upper bound on one sleep, so `stop()` is noticed without a wake-up.
const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

pub struct JobScheduler {
    runner: Arc<JobRunner>,
    entries: Vec<ScheduleEntry>,
    shutdown: Arc<AtomicBool>,
}

impl JobScheduler {
    pub fn new(runner: Arc<JobRunner>, entries: Vec<ScheduleEntry>) -> Self {
        Self {
            runner,
            entries,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the loop in a background thread. `trigger_rx` carries job names
    /// for manual runs.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<String>) -> JoinHandle<()> {
        let runner = Arc::clone(&self.runner);
        let shutdown = Arc::clone(&self.shutdown);
        let entries = self.entries.clone();

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to build scheduler runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut schedule: Vec<(ScheduleEntry, DateTime<Utc>)> = entries
                    .into_iter()
                    .filter(|entry| {
                        let known = runner.has_job(&entry.job);
                        if !known {
                            log::warn!("Ignoring schedule for unknown job '{}'", entry.job);
                        }
                        known
                    })
                    .map(|entry| {
                        let next = entry.trigger.next_after(Utc::now());
                        log::info!("Scheduled '{}', first run at {}", entry.job, next);
                        (entry, next)
                    })
                    .collect();

                let mut in_flight: JoinSet<()> = JoinSet::new();
                let mut triggers_open = true;

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let now = Utc::now();
                    let wait = schedule
                        .iter()
                        .map(|(_, next)| (*next - now).to_std().unwrap_or(Duration::ZERO))
                        .min()
                        .unwrap_or(SHUTDOWN_POLL)
                        .min(SHUTDOWN_POLL);

                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {},
                        msg = trigger_rx.recv(), if triggers_open => match msg {
                            Ok(name) => {
                                if runner.has_job(&name) {
                                    log::info!("Manual run of '{}' triggered", name);
                                    spawn_run(&mut in_flight, &runner, &name);
                                } else {
                                    log::warn!("Manual trigger for unknown job '{}'", name);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Scheduler missed {} manual triggers", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                triggers_open = false;
                            }
                        },
                        Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                            if let Err(e) = joined {
                                log::error!("Scheduled job task ended abnormally: {}", e);
                            }
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let now = Utc::now();
                    for (entry, next) in schedule.iter_mut() {
                        if *next > now {
                            continue;
                        }
                        *next = entry.trigger.next_after(now);
                        // A cancelled run keeps its marker until the body returns.
                        if runner.is_running(&entry.job) {
                            log::info!("Skipping '{}', previous run still in progress", entry.job);
                            continue;
                        }
                        spawn_run(&mut in_flight, &runner, &entry.job);
                    }
                }

                if !in_flight.is_empty() {
                    log::info!("Scheduler stopping, abandoning {} running job(s)", in_flight.len());
                }
                in_flight.shutdown().await;
            });
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

fn spawn_run(in_flight: &mut JoinSet<()>, runner: &Arc<JobRunner>, job_name: &str) {
    let runner = Arc::clone(runner);
    let name = job_name.to_string();
    let job_id = uuid::Uuid::new_v4().to_string();
    in_flight.spawn(async move {
        if let Err(e) = runner.run(&name, &job_id).await {
            log::error!("Job '{}' ({}) failed: {}", name, job_id, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ProgressTracker;
    use crate::error::JobError;
    use crate::jobs::context::JobContext;
    use crate::jobs::runner::{JobBody, JobSummary};
    use crate::jobs::schedule::Trigger;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl JobBody for Counting {
        async fn run(&self, _ctx: &JobContext) -> Result<JobSummary, JobError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(JobSummary::new())
        }
    }

    fn counting_runner(count: &Arc<AtomicUsize>) -> Arc<JobRunner> {
        let mut runner = JobRunner::new(Arc::new(ProgressTracker::in_memory()));
        runner.register("count", Arc::new(Counting(Arc::clone(count))));
        Arc::new(runner)
    }

    #[test]
    fn test_scheduler_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = JobScheduler::new(
            counting_runner(&count),
            vec![ScheduleEntry {
                job: "count".to_string(),
                trigger: Trigger::Interval { seconds: 3600 },
            }],
        );

        let (_trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        std::thread::sleep(Duration::from_millis(50));
        scheduler.stop();

        handle.join().expect("scheduler thread panicked");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_trigger_runs_job() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = JobScheduler::new(counting_runner(&count), Vec::new());

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        trigger_tx.send("count".to_string()).unwrap();
        trigger_tx.send("unknown".to_string()).unwrap();

        for _ in 0..100 {
            if count.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        scheduler.stop();
        handle.join().expect("scheduler thread panicked");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interval_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let scheduler = JobScheduler::new(
            counting_runner(&count),
            vec![ScheduleEntry {
                job: "count".to_string(),
                trigger: Trigger::Interval { seconds: 1 },
            }],
        );

        let (_trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        for _ in 0..300 {
            if count.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        scheduler.stop();
        handle.join().expect("scheduler thread panicked");
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
