use serde::{Deserialize, Serialize};

/// One ranked recommendation, as exported by the scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationCandidate {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
    /// 1 is the best recommendation.
    pub rank: u32,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub backdrop_url: Option<String>,
    /// Path of the real media file, as seen by both this process and the
    /// media server.
    #[serde(default)]
    pub source_media_path: Option<String>,
    /// Locator written into pointer files. Defaults to the source path.
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl RecommendationCandidate {
    /// What a pointer file for this candidate should contain.
    pub fn pointer_locator(&self) -> Option<&str> {
        [self.stream_url.as_deref(), self.source_media_path.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
    }
}

/// The user a library is materialized for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryOwner {
    pub user_id: String,
    pub display_name: String,
    /// Whether sidecars carry the recommendation explanation.
    pub include_explanations: bool,
}
