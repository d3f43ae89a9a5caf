//! Pure planning: computes the target entries of a user folder before any
//! filesystem access.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::config::OutputMode;

use super::candidate::{LibraryOwner, RecommendationCandidate};
use super::naming::{self, FANART_SUFFIX, POINTER_EXTENSION, POSTER_SUFFIX, SIDECAR_EXTENSION};

/// Spacing between consecutive ranks on the synthetic timeline.
pub const RANK_INTERVAL_MINUTES: i64 = 1;

/// Synthetic "added" time for a rank: rank 1 gets `anchor`, every following
/// rank one interval earlier.
pub fn assigned_timestamp(anchor: DateTime<Utc>, rank: u32) -> DateTime<Utc> {
    let steps = i64::from(rank.max(1) - 1);
    anchor - Duration::minutes(steps * RANK_INTERVAL_MINUTES)
}

/// Drops sub-second precision so sidecars only change when the anchor moves
/// by at least a second.
pub fn normalize_anchor(anchor: DateTime<Utc>) -> DateTime<Utc> {
    anchor
        .duration_trunc(Duration::seconds(1))
        .unwrap_or(anchor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    pub mode: OutputMode,
    pub download_images: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtworkKind {
    Poster,
    Fanart,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedArtwork {
    pub kind: ArtworkKind,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedItem {
    pub candidate: RecommendationCandidate,
    pub base_name: String,
    pub added_at: DateTime<Utc>,
    pub artwork: Vec<PlannedArtwork>,
}

impl PlannedItem {
    pub fn pointer_name(&self) -> String {
        format!("{}.{}", self.base_name, POINTER_EXTENSION)
    }

    pub fn sidecar_name(&self) -> String {
        format!("{}.{}", self.base_name, SIDECAR_EXTENSION)
    }

    /// Artwork file name for this item in the given mode.
    pub fn artwork_name(&self, kind: ArtworkKind, mode: OutputMode) -> String {
        match (mode, kind) {
            (OutputMode::Flat, ArtworkKind::Poster) => format!("{}{}", self.base_name, POSTER_SUFFIX),
            (OutputMode::Flat, ArtworkKind::Fanart) => format!("{}{}", self.base_name, FANART_SUFFIX),
            (OutputMode::FolderLink, ArtworkKind::Poster) => naming::FOLDER_POSTER.to_string(),
            (OutputMode::FolderLink, ArtworkKind::Fanart) => naming::FOLDER_FANART.to_string(),
        }
    }

    /// Name of the symlink inside the item folder, keeping the source's
    /// extension.
    pub fn link_name(&self) -> Option<String> {
        let source = self.candidate.source_media_path.as_deref()?;
        let ext = std::path::Path::new(source)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mkv");
        Some(format!("{}.{}", self.base_name, ext))
    }
}

/// A candidate that cannot be materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCandidate {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryPlan {
    pub mode: OutputMode,
    pub user_folder: String,
    pub legacy_user_folder: String,
    /// Items in rank order, best first.
    pub items: Vec<PlannedItem>,
    /// Names expected directly under the user folder.
    pub expected: BTreeSet<String>,
    pub skipped: Vec<SkippedCandidate>,
}

/// Computes the target state of one user folder.
pub fn plan(
    owner: &LibraryOwner,
    candidates: &[RecommendationCandidate],
    options: PlanOptions,
    anchor: DateTime<Utc>,
) -> LibraryPlan {
    let anchor = normalize_anchor(anchor);

    let mut ordered: Vec<&RecommendationCandidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| c.rank);

    let mut seen = HashSet::new();
    let mut skipped = Vec::new();
    let mut usable = Vec::new();
    for candidate in ordered {
        if !seen.insert(candidate.id.as_str()) {
            skipped.push(SkippedCandidate {
                id: candidate.id.clone(),
                reason: format!("duplicate of a better-ranked entry (rank {})", candidate.rank),
            });
            continue;
        }
        // Folder mode falls back to a pointer, so both modes need a locator.
        if candidate.pointer_locator().is_none() {
            skipped.push(SkippedCandidate {
                id: candidate.id.clone(),
                reason: "no stream locator or source media path".to_string(),
            });
            continue;
        }
        usable.push(candidate);
    }

    let base_names = naming::assign_base_names(&usable);

    let items: Vec<PlannedItem> = usable
        .into_iter()
        .zip(base_names)
        .map(|(candidate, base_name)| {
            let mut artwork = Vec::new();
            if options.download_images {
                if let Some(url) = candidate.poster_url.as_ref().filter(|u| !u.is_empty()) {
                    artwork.push(PlannedArtwork {
                        kind: ArtworkKind::Poster,
                        url: url.clone(),
                    });
                }
                if let Some(url) = candidate.backdrop_url.as_ref().filter(|u| !u.is_empty()) {
                    artwork.push(PlannedArtwork {
                        kind: ArtworkKind::Fanart,
                        url: url.clone(),
                    });
                }
            }
            PlannedItem {
                added_at: assigned_timestamp(anchor, candidate.rank),
                candidate: candidate.clone(),
                base_name,
                artwork,
            }
        })
        .collect();

    let mut expected = BTreeSet::new();
    for item in &items {
        match options.mode {
            OutputMode::Flat => {
                expected.insert(item.pointer_name());
                expected.insert(item.sidecar_name());
                for art in &item.artwork {
                    expected.insert(item.artwork_name(art.kind, OutputMode::Flat));
                }
            }
            OutputMode::FolderLink => {
                expected.insert(item.base_name.clone());
            }
        }
    }

    LibraryPlan {
        mode: options.mode,
        user_folder: naming::user_folder_name(owner),
        legacy_user_folder: naming::legacy_user_folder_name(owner),
        items,
        expected,
        skipped,
    }
}
