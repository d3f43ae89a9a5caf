//! Builders for test data.

#![allow(dead_code)]

use shelfsync::library::RecommendationCandidate;

pub struct CandidateBuilder {
    candidate: RecommendationCandidate,
}

impl CandidateBuilder {
    /// A candidate with a stream locator, no year and rank 1.
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            candidate: RecommendationCandidate {
                id: id.to_string(),
                title: title.to_string(),
                year: None,
                rank: 1,
                score: 0.5,
                poster_url: None,
                backdrop_url: None,
                source_media_path: None,
                stream_url: Some(format!("http://stream.local/{}", id)),
                explanation: None,
            },
        }
    }

    pub fn year(mut self, year: u16) -> Self {
        self.candidate.year = Some(year);
        self
    }

    pub fn rank(mut self, rank: u32) -> Self {
        self.candidate.rank = rank;
        self
    }

    pub fn source(mut self, path: &str) -> Self {
        self.candidate.source_media_path = Some(path.to_string());
        self
    }

    pub fn no_stream(mut self) -> Self {
        self.candidate.stream_url = None;
        self
    }

    pub fn explanation(mut self, text: &str) -> Self {
        self.candidate.explanation = Some(text.to_string());
        self
    }

    pub fn build(self) -> RecommendationCandidate {
        self.candidate
    }
}
