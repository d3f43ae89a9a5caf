use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::broadcast::{CancelFlag, LogLevel};
use crate::config::OutputMode;
use crate::db::{settings_repo, Database};
use crate::error::{JobError, LibraryError};
use crate::library::{
    CandidateSource, LibraryOwner, LibraryReconciler, ReconcileEvent, ReconcileProgress,
    ReconcileRequest, ReconcileSummary, RecommendationCandidate,
};

use super::context::JobContext;
use super::runner::{JobBody, JobSummary};

pub const LIBRARY_SYNC_JOB: &str = "library-sync";

/// Rebuilds the recommendation folder of every enabled user.
pub struct LibrarySyncJob {
    db: Database,
    source: Arc<dyn CandidateSource>,
    reconciler: Arc<LibraryReconciler>,
}

impl LibrarySyncJob {
    pub fn new(
        db: Database,
        source: Arc<dyn CandidateSource>,
        reconciler: Arc<LibraryReconciler>,
    ) -> Self {
        Self {
            db,
            source,
            reconciler,
        }
    }
}

/// Forwards reconciler events into the run's tracker entry.
struct JobProgressBridge<'a> {
    ctx: &'a JobContext,
    processed: AtomicU64,
}

impl ReconcileProgress for JobProgressBridge<'_> {
    fn report(&self, event: ReconcileEvent) {
        match event {
            ReconcileEvent::ItemFinished { label } => {
                let done = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Err(e) = self.ctx.update_items(done, None, Some(&label)) {
                    log::debug!("Progress update for {} dropped: {}", self.ctx.job_id(), e);
                }
            }
            ReconcileEvent::Log { level, message } => self.ctx.log(level, &message, None),
        }
    }

    fn cancel_flag(&self) -> CancelFlag {
        self.ctx.cancel_flag().clone()
    }
}

struct LoadedLibrary {
    owner: LibraryOwner,
    mode: Option<OutputMode>,
    candidates: Vec<RecommendationCandidate>,
}

#[async_trait]
impl JobBody for LibrarySyncJob {
    fn total_steps(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &JobContext) -> Result<JobSummary, JobError> {
        ctx.set_step(0, "Loading libraries", 0)?;
        self.reconciler.check_root().await?;

        let rows = settings_repo::list_enabled(&self.db)?;
        ctx.update_items(0, Some(rows.len() as u64), None)?;

        let mut loaded = Vec::with_capacity(rows.len());
        let mut failures: Vec<Value> = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            if ctx.is_cancelled() {
                break;
            }
            let mode = match row.output_mode.as_deref() {
                Some(raw) => {
                    let parsed = OutputMode::parse(raw);
                    if parsed.is_none() {
                        ctx.warn(&format!(
                            "Unknown output mode '{}' for {}, using the default",
                            raw, row.user_id
                        ));
                    }
                    parsed
                }
                None => None,
            };

            match self.source.load(&row.user_id).await {
                Ok(candidates) => loaded.push(LoadedLibrary {
                    owner: LibraryOwner {
                        user_id: row.user_id.clone(),
                        display_name: row.display_name.clone(),
                        include_explanations: row.include_explanations,
                    },
                    mode,
                    candidates,
                }),
                Err(e) => {
                    ctx.error(&format!("Skipping {}: {}", row.user_id, e));
                    failures.push(json!({ "userId": row.user_id, "error": e.to_string() }));
                }
            }
            ctx.update_items(index as u64 + 1, None, Some(&row.user_id))?;
        }

        let items_total: u64 = loaded.iter().map(|l| l.candidates.len() as u64).sum();
        ctx.set_step(1, "Reconciling libraries", items_total)?;

        let bridge = JobProgressBridge {
            ctx,
            processed: AtomicU64::new(0),
        };
        let anchor = Utc::now();
        let mut totals = ReconcileSummary::default();
        let mut libraries: Vec<Value> = Vec::new();

        for library in &loaded {
            if ctx.is_cancelled() {
                totals.cancelled = true;
                break;
            }
            let request = ReconcileRequest {
                owner: &library.owner,
                candidates: &library.candidates,
                mode: library.mode,
                anchor,
            };
            match self.reconciler.reconcile(request, &bridge).await {
                Ok(report) => {
                    totals.merge(&report.summary);
                    libraries.push(json!({
                        "userId": library.owner.user_id,
                        "mode": report.mode.as_str(),
                        "writePath": report.write_path.to_string_lossy(),
                        "serverPath": report.server_path.to_string_lossy(),
                        "migrated": report.migrated,
                        "summary": report.summary,
                    }));
                }
                Err(e @ (LibraryError::RootInaccessible { .. } | LibraryError::Misconfigured(_))) => {
                    return Err(e.into());
                }
                Err(e) => {
                    ctx.error(&format!("Library for {} failed: {}", library.owner.user_id, e));
                    failures.push(json!({ "userId": library.owner.user_id, "error": e.to_string() }));
                }
            }
        }
        if ctx.is_cancelled() {
            totals.cancelled = true;
        }

        if !rows.is_empty() && libraries.is_empty() && !failures.is_empty() && !totals.cancelled {
            return Err(JobError::Failed {
                name: ctx.job_name().to_string(),
                message: format!("all {} libraries failed", failures.len()),
            });
        }

        ctx.log(
            LogLevel::Info,
            &format!(
                "Synced {} of {} libraries ({} failed)",
                libraries.len(),
                rows.len(),
                failures.len()
            ),
            None,
        );

        let mut summary = totals.to_map();
        summary.insert("users".to_string(), json!(rows.len()));
        summary.insert("usersFailed".to_string(), json!(failures.len()));
        summary.insert("libraries".to_string(), Value::Array(libraries));
        summary.insert("failures".to_string(), Value::Array(failures));
        Ok(summary)
    }
}
