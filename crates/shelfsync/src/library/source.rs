use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::LibraryError;

use super::candidate::RecommendationCandidate;
use super::naming::sanitize_component;

/// Supplies each user's ranked candidate list.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Vec<RecommendationCandidate>, LibraryError>;
}

/// Export written by the scoring engine, one file per user.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateExport {
    #[serde(default)]
    generated_at: Option<DateTime<Utc>>,
    candidates: Vec<RecommendationCandidate>,
}

/// Reads `<directory>/<user_id>.json`.
pub struct JsonDirectorySource {
    directory: PathBuf,
}

impl JsonDirectorySource {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    fn export_path(&self, user_id: &str) -> PathBuf {
        self.directory
            .join(format!("{}.json", sanitize_component(user_id)))
    }
}

#[async_trait]
impl CandidateSource for JsonDirectorySource {
    async fn load(&self, user_id: &str) -> Result<Vec<RecommendationCandidate>, LibraryError> {
        let path = self.export_path(user_id);
        let source_err = |reason: String| LibraryError::CandidateSource {
            user_id: user_id.to_string(),
            reason,
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| source_err(format!("{}: {}", path.display(), e)))?;
        let export: CandidateExport = serde_json::from_str(&content)
            .map_err(|e| source_err(format!("{}: {}", path.display(), e)))?;

        if let Some(generated_at) = export.generated_at {
            log::debug!(
                "Loaded {} candidates for {} generated at {}",
                export.candidates.len(),
                user_id,
                generated_at
            );
        }
        Ok(export.candidates)
    }
}

/// Candidate lists held in memory, replaceable at runtime.
#[derive(Default)]
pub struct MemoryCandidateSource {
    lists: RwLock<HashMap<String, Vec<RecommendationCandidate>>>,
}

impl MemoryCandidateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: &str, candidates: Vec<RecommendationCandidate>) {
        let mut lists = self.lists.write().unwrap_or_else(|p| p.into_inner());
        lists.insert(user_id.to_string(), candidates);
    }
}

#[async_trait]
impl CandidateSource for MemoryCandidateSource {
    async fn load(&self, user_id: &str) -> Result<Vec<RecommendationCandidate>, LibraryError> {
        let lists = self.lists.read().unwrap_or_else(|p| p.into_inner());
        lists
            .get(user_id)
            .cloned()
            .ok_or_else(|| LibraryError::CandidateSource {
                user_id: user_id.to_string(),
                reason: "no candidate list".to_string(),
            })
    }
}
