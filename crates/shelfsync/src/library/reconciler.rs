//! Applies a [`LibraryPlan`] to a user folder.
//!
//! The plan is computed in full before the first filesystem call. Applying
//! it writes pointers, sidecars and links in batches, downloads artwork in
//! smaller batches, then removes managed entries the plan no longer expects.
//! A failure confined to one candidate is logged and counted; only an
//! unusable output root aborts the run.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::batch::{run_batches, run_in_batches, FILE_BATCH_SIZE, IMAGE_BATCH_SIZE};
use crate::broadcast::LogLevel;
use crate::config::{OutputConfig, OutputMode};
use crate::error::LibraryError;
use crate::storage::{FileStorage, SymlinkManager, WriteOutcome};

use super::artwork::ImageSource;
use super::candidate::{LibraryOwner, RecommendationCandidate};
use super::naming;
use super::nfo::render_nfo;
use super::plan::{plan, LibraryPlan, PlanOptions, PlannedItem};
use super::progress::{ReconcileEvent, ReconcileProgress};

/// Counts for one reconciliation. `failed` counts per-candidate operations
/// that went wrong (skips, write errors, link errors without fallback,
/// downloads).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub failed: u64,
    pub linked: u64,
    pub fallback_pointers: u64,
    pub images_downloaded: u64,
    pub cancelled: bool,
}

impl ReconcileSummary {
    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created += 1,
            WriteOutcome::Updated => self.updated += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn merge(&mut self, other: &ReconcileSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.linked += other.linked;
        self.fallback_pointers += other.fallback_pointers;
        self.images_downloaded += other.images_downloaded;
        self.cancelled |= other.cancelled;
    }

    /// Key/value form used as a job result.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Input for one user folder.
pub struct ReconcileRequest<'a> {
    pub owner: &'a LibraryOwner,
    /// Best first; `rank` decides order.
    pub candidates: &'a [RecommendationCandidate],
    /// Per-user override of the configured output mode.
    pub mode: Option<OutputMode>,
    /// Timestamp given to rank 1.
    pub anchor: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub summary: ReconcileSummary,
    pub mode: OutputMode,
    /// User folder as written by this process.
    pub write_path: PathBuf,
    /// Same folder as the media server sees it.
    pub server_path: PathBuf,
    /// Set when a legacy folder was renamed into place.
    pub migrated: bool,
}

pub struct LibraryReconciler {
    output: OutputConfig,
    storage: FileStorage,
    images: Arc<dyn ImageSource>,
    links: SymlinkManager,
}

impl LibraryReconciler {
    pub fn new(output: OutputConfig, images: Arc<dyn ImageSource>) -> Self {
        let storage = FileStorage::new(output.write_root());
        Self {
            output,
            storage,
            images,
            links: SymlinkManager::default(),
        }
    }

    pub fn with_symlink_manager(mut self, links: SymlinkManager) -> Self {
        self.links = links;
        self
    }

    pub fn output(&self) -> &OutputConfig {
        &self.output
    }

    /// Checks the configured roots before anything is written. Creates the
    /// namespace folder when the root itself exists.
    pub async fn check_root(&self) -> Result<(), LibraryError> {
        if self.output.root_write_path.trim().is_empty() {
            return Err(LibraryError::Misconfigured(
                "output root write path is empty".to_string(),
            ));
        }
        if self.output.root_server_visible_path.trim().is_empty() {
            return Err(LibraryError::Misconfigured(
                "output server-visible root is empty".to_string(),
            ));
        }

        let root = crate::config::expand_home(&self.output.root_write_path);
        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|e| LibraryError::RootInaccessible {
                path: root.clone(),
                source: e,
            })?;
        if !meta.is_dir() {
            return Err(LibraryError::RootInaccessible {
                path: root,
                source: std::io::Error::new(ErrorKind::Other, "not a directory"),
            });
        }

        self.storage.ensure_directory("").await?;
        Ok(())
    }

    /// Brings one user folder in line with `request`.
    pub async fn reconcile(
        &self,
        request: ReconcileRequest<'_>,
        progress: &dyn ReconcileProgress,
    ) -> Result<ReconcileReport, LibraryError> {
        self.check_root().await?;

        let mode = request.mode.unwrap_or(self.output.mode);
        let plan = plan(
            request.owner,
            request.candidates,
            PlanOptions {
                mode,
                download_images: self.output.download_images,
            },
            request.anchor,
        );

        let migrated = self.resolve_user_folder(&plan, progress).await?;
        let folder = PathBuf::from(&plan.user_folder);
        self.storage.ensure_directory(&folder).await?;

        let mut summary = ReconcileSummary::default();
        for skipped in &plan.skipped {
            summary.failed += 1;
            log_event(
                progress,
                LogLevel::Warn,
                format!("Skipping candidate {}: {}", skipped.id, skipped.reason),
            );
            progress.report(ReconcileEvent::ItemFinished {
                label: skipped.id.clone(),
            });
        }

        let cancel = progress.cancel_flag();
        let include_explanations = request.owner.include_explanations;

        let outcome = run_batches(
            plan.items.iter(),
            FILE_BATCH_SIZE,
            &cancel,
            |item| self.apply_item(&folder, item, mode, include_explanations, progress),
            |_| {},
        )
        .await;
        for item_summary in &outcome.results {
            summary.merge(item_summary);
        }

        if outcome.cancelled {
            return Ok(self.finish_cancelled(summary, &plan, migrated, progress));
        }

        if self.output.download_images {
            let downloads: Vec<(PathBuf, &str)> = plan
                .items
                .iter()
                .flat_map(|item| {
                    let dir = match mode {
                        OutputMode::Flat => folder.clone(),
                        OutputMode::FolderLink => folder.join(&item.base_name),
                    };
                    item.artwork
                        .iter()
                        .map(move |art| (dir.join(item.artwork_name(art.kind, mode)), art.url.as_str()))
                })
                .collect();

            let images = run_batches(
                downloads,
                IMAGE_BATCH_SIZE,
                &cancel,
                |(path, url)| self.download_artwork(path, url, progress),
                |_| {},
            )
            .await;
            for image_summary in &images.results {
                summary.merge(image_summary);
            }
            if images.cancelled {
                return Ok(self.finish_cancelled(summary, &plan, migrated, progress));
            }
        }

        summary.merge(&self.remove_stale(&folder, &plan, progress).await);

        log_event(
            progress,
            LogLevel::Info,
            format!(
                "Reconciled {} for {}: {} created, {} updated, {} unchanged, {} deleted, {} failed",
                plan.user_folder,
                request.owner.user_id,
                summary.created,
                summary.updated,
                summary.unchanged,
                summary.deleted,
                summary.failed
            ),
        );

        Ok(self.report(summary, &plan, migrated))
    }

    fn report(&self, summary: ReconcileSummary, plan: &LibraryPlan, migrated: bool) -> ReconcileReport {
        ReconcileReport {
            summary,
            mode: plan.mode,
            write_path: self.storage.path(&plan.user_folder),
            server_path: self.output.server_root().join(&plan.user_folder),
            migrated,
        }
    }

    fn finish_cancelled(
        &self,
        mut summary: ReconcileSummary,
        plan: &LibraryPlan,
        migrated: bool,
        progress: &dyn ReconcileProgress,
    ) -> ReconcileReport {
        summary.cancelled = true;
        log_event(
            progress,
            LogLevel::Warn,
            format!("Reconciliation of {} cancelled, stale entries kept", plan.user_folder),
        );
        self.report(summary, plan, migrated)
    }

    /// Renames a legacy-named folder into the current name when only the
    /// legacy one exists.
    async fn resolve_user_folder(
        &self,
        plan: &LibraryPlan,
        progress: &dyn ReconcileProgress,
    ) -> Result<bool, LibraryError> {
        if plan.legacy_user_folder == plan.user_folder
            || self.storage.exists(&plan.user_folder).await
            || !self.storage.is_directory(&plan.legacy_user_folder).await
        {
            return Ok(false);
        }

        self.storage
            .rename(&plan.legacy_user_folder, &plan.user_folder)
            .await?;
        log_event(
            progress,
            LogLevel::Info,
            format!(
                "Moved legacy folder {} to {}",
                plan.legacy_user_folder, plan.user_folder
            ),
        );
        Ok(true)
    }

    async fn apply_item(
        &self,
        folder: &Path,
        item: &PlannedItem,
        mode: OutputMode,
        include_explanations: bool,
        progress: &dyn ReconcileProgress,
    ) -> ReconcileSummary {
        let summary = match mode {
            OutputMode::Flat => self.apply_flat_item(folder, item, include_explanations, progress).await,
            OutputMode::FolderLink => {
                self.apply_folder_item(folder, item, include_explanations, progress)
                    .await
            }
        };
        progress.report(ReconcileEvent::ItemFinished {
            label: item.base_name.clone(),
        });
        summary
    }

    async fn write_sidecar(
        &self,
        dir: &Path,
        item: &PlannedItem,
        include_explanations: bool,
        summary: &mut ReconcileSummary,
        progress: &dyn ReconcileProgress,
    ) -> bool {
        match render_nfo(&item.candidate, item.added_at, include_explanations) {
            Ok(nfo) => {
                self.write_file(&dir.join(item.sidecar_name()), nfo.as_bytes(), summary, progress)
                    .await
            }
            Err(e) => {
                summary.failed += 1;
                log_event(progress, LogLevel::Error, e.to_string());
                false
            }
        }
    }

    async fn write_file(
        &self,
        path: &Path,
        content: &[u8],
        summary: &mut ReconcileSummary,
        progress: &dyn ReconcileProgress,
    ) -> bool {
        match self.storage.write_if_changed(path, content).await {
            Ok(outcome) => {
                summary.record(outcome);
                true
            }
            Err(e) => {
                summary.failed += 1;
                log_event(progress, LogLevel::Error, e.to_string());
                false
            }
        }
    }

    async fn apply_flat_item(
        &self,
        folder: &Path,
        item: &PlannedItem,
        include_explanations: bool,
        progress: &dyn ReconcileProgress,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        if let Some(locator) = item.candidate.pointer_locator() {
            let pointer = format!("{}\n", locator);
            self.write_file(
                &folder.join(item.pointer_name()),
                pointer.as_bytes(),
                &mut summary,
                progress,
            )
            .await;
        }

        self.write_sidecar(folder, item, include_explanations, &mut summary, progress)
            .await;

        summary
    }

    async fn apply_folder_item(
        &self,
        folder: &Path,
        item: &PlannedItem,
        include_explanations: bool,
        progress: &dyn ReconcileProgress,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let item_dir = folder.join(&item.base_name);

        if self.storage.exists(&item_dir).await && !self.storage.is_directory(&item_dir).await {
            if let Err(e) = self.storage.remove(&item_dir).await {
                summary.failed += 1;
                log_event(progress, LogLevel::Error, e.to_string());
                return summary;
            }
        }
        if let Err(e) = self.storage.ensure_directory(&item_dir).await {
            summary.failed += 1;
            log_event(progress, LogLevel::Error, e.to_string());
            return summary;
        }

        let artwork_names: Vec<String> = item
            .artwork
            .iter()
            .map(|art| item.artwork_name(art.kind, OutputMode::FolderLink))
            .collect();
        let mut produced: HashSet<String> = artwork_names.iter().cloned().collect();

        let linked = match (
            item.candidate.source_media_path.as_deref(),
            item.link_name(),
        ) {
            (Some(source), Some(link_name)) => {
                let source = Path::new(source);
                let link_path = self.storage.path(item_dir.join(&link_name));
                match self.links.link(source, &link_path).await {
                    Ok(outcome) => {
                        summary.record(outcome);
                        summary.linked += 1;
                        produced.insert(link_name);
                        match self
                            .links
                            .mirror_siblings(
                                source,
                                &self.storage.path(&item_dir),
                                &item.base_name,
                                &artwork_names,
                            )
                            .await
                        {
                            Ok(mirrored) => produced.extend(mirrored),
                            Err(e) => log_event(
                                progress,
                                LogLevel::Warn,
                                format!("Could not mirror artwork for {}: {}", item.base_name, e),
                            ),
                        }
                        true
                    }
                    Err(e) => {
                        log_event(
                            progress,
                            LogLevel::Warn,
                            format!("Link failed for {}, writing pointer instead: {}", item.base_name, e),
                        );
                        false
                    }
                }
            }
            _ => false,
        };

        if !linked {
            match item.candidate.pointer_locator() {
                Some(locator) => {
                    let pointer = format!("{}\n", locator);
                    if self
                        .write_file(
                            &item_dir.join(item.pointer_name()),
                            pointer.as_bytes(),
                            &mut summary,
                            progress,
                        )
                        .await
                    {
                        summary.fallback_pointers += 1;
                        produced.insert(item.pointer_name());
                    }
                }
                None => summary.failed += 1,
            }
        }

        if self
            .write_sidecar(&item_dir, item, include_explanations, &mut summary, progress)
            .await
        {
            produced.insert(item.sidecar_name());
        }

        summary.deleted += self.clean_item_dir(&item_dir, &produced, progress).await;
        summary
    }

    /// Removes links and managed files inside an item folder that this run
    /// did not produce. Anything else in the folder is left alone.
    async fn clean_item_dir(
        &self,
        item_dir: &Path,
        produced: &HashSet<String>,
        progress: &dyn ReconcileProgress,
    ) -> u64 {
        let entries = match self.storage.list(item_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Skipping cleanup of {}: {}", item_dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries {
            if produced.contains(&entry.name) || entry.is_dir {
                continue;
            }
            if !entry.is_symlink && !naming::is_managed_item_file(&entry.name) {
                continue;
            }
            match self.storage.remove(item_dir.join(&entry.name)).await {
                Ok(()) => removed += 1,
                Err(e) => log_event(progress, LogLevel::Warn, e.to_string()),
            }
        }
        removed
    }

    async fn download_artwork(
        &self,
        path: PathBuf,
        url: &str,
        progress: &dyn ReconcileProgress,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        if self.storage.exists(&path).await {
            summary.unchanged += 1;
            return summary;
        }

        match self.images.fetch(url).await {
            Ok(bytes) => {
                if self.write_file(&path, &bytes, &mut summary, progress).await {
                    summary.images_downloaded += 1;
                }
            }
            Err(e) => {
                summary.failed += 1;
                log_event(progress, LogLevel::Warn, e.to_string());
            }
        }
        summary
    }

    /// Deletes managed entries under the user folder that the plan does not
    /// expect. A folder that cannot be listed has nothing to delete.
    async fn remove_stale(
        &self,
        folder: &Path,
        plan: &LibraryPlan,
        progress: &dyn ReconcileProgress,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let entries = match self.storage.list(folder).await {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Nothing to delete: {}", e);
                return summary;
            }
        };

        let stale: Vec<String> = entries
            .into_iter()
            .filter(|entry| naming::is_managed_entry(&entry.name, entry.is_dir))
            .filter(|entry| !plan.expected.contains(&entry.name))
            .map(|entry| entry.name)
            .collect();

        let results = run_in_batches(stale.iter(), FILE_BATCH_SIZE, |name| async move {
            let result = self.storage.remove(folder.join(name)).await;
            (name, result)
        })
        .await;

        for (name, result) in results {
            match result {
                Ok(()) => {
                    summary.deleted += 1;
                    log::debug!("Removed stale entry {}", name);
                }
                Err(e) => {
                    summary.failed += 1;
                    log_event(progress, LogLevel::Warn, e.to_string());
                }
            }
        }
        summary
    }
}

fn log_event(progress: &dyn ReconcileProgress, level: LogLevel, message: String) {
    progress.report(ReconcileEvent::Log { level, message });
}
