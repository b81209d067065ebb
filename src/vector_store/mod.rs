//! VectorStore - Capability consumed by the search engine
//!
//! The engine only reads: point lookups, filtered scans and fused hybrid
//! searches. All writes belong to the indexing pipeline.

mod memory;

pub use memory::MemoryVectorStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Upper bound on rows returned by any store call
pub const SEARCH_LIMIT: usize = 10_000;

/// One stored keyframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// `<video_id>#<frame_number>`
    pub frame_id: String,
    /// Dense embeddings keyed by index field
    #[serde(default)]
    pub vectors: BTreeMap<String, Vec<f32>>,
    /// Text payloads (OCR etc.) keyed by index field
    #[serde(default)]
    pub texts: BTreeMap<String, String>,
}

impl FrameRecord {
    pub fn new(frame_id: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
            vectors: BTreeMap::new(),
            texts: BTreeMap::new(),
        }
    }

    pub fn with_vector(mut self, field: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(field.to_string(), vector);
        self
    }

    pub fn with_text(mut self, field: &str, text: &str) -> Self {
        self.texts.insert(field.to_string(), text.to_string());
        self
    }

    /// Split into `(video_id, frame_number)`
    pub fn split_id(&self) -> Option<(&str, &str)> {
        self.frame_id.split_once('#')
    }
}

/// Similarity metric for dense requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Metric {
    Cosine,
    Ip,
}

/// Query payload of a single sub-request
#[derive(Debug, Clone, PartialEq)]
pub enum SearchData {
    /// Dense vector, already normalised
    Dense(Vec<f32>),
    /// Sparse/full-text query against a text field
    Text(String),
}

/// One sub-request of a hybrid search
#[derive(Debug, Clone, PartialEq)]
pub struct AnnRequest {
    pub data: SearchData,
    pub field: String,
    pub metric: Metric,
    pub nprobe: Option<u32>,
    pub limit: usize,
}

impl AnnRequest {
    pub fn dense(vector: Vec<f32>, field: &str, nprobe: u32, limit: usize) -> Self {
        Self {
            data: SearchData::Dense(vector),
            field: field.to_string(),
            metric: Metric::Cosine,
            nprobe: Some(nprobe),
            limit,
        }
    }

    pub fn text(text: &str, field: &str, limit: usize) -> Self {
        Self {
            data: SearchData::Text(text.to_string()),
            field: field.to_string(),
            metric: Metric::Ip,
            nprobe: None,
            limit,
        }
    }
}

/// How sub-request rankings are fused
#[derive(Debug, Clone, PartialEq)]
pub enum Ranker {
    /// Weighted sum of per-request scores, one weight per request
    Weighted(Vec<f32>),
    /// Sum of `1 / (k + rank)` over requests
    ReciprocalRank { k: u32 },
}

impl Ranker {
    pub fn rrf() -> Self {
        Ranker::ReciprocalRank { k: 60 }
    }
}

/// Ranked search hit; higher `distance` is better
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub entity: Arc<FrameRecord>,
    pub distance: f32,
}

/// Disjunction of `frame_id LIKE "<prefix>#%"` clauses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameFilter {
    pub video_ids: Vec<String>,
}

impl FrameFilter {
    pub fn videos(video_ids: &[String]) -> Self {
        Self {
            video_ids: video_ids.iter().map(|v| v.trim().to_string()).collect(),
        }
    }

    /// An empty filter matches everything
    pub fn matches(&self, frame_id: &str) -> bool {
        if self.video_ids.is_empty() {
            return true;
        }
        match frame_id.split_once('#') {
            Some((video_id, _)) => self.video_ids.iter().any(|v| v == video_id),
            None => false,
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub row_count: u64,
}

/// Read-side vector store operations
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Point lookup by frame id
    async fn get(&self, frame_id: &str) -> Result<Option<Arc<FrameRecord>>>;

    /// Filtered scan in storage order
    async fn query(&self, filter: &FrameFilter, offset: usize, limit: usize)
        -> Result<Vec<Arc<FrameRecord>>>;

    /// Run every request and fuse the rankings with `ranker`
    async fn hybrid_search(
        &self,
        requests: Vec<AnnRequest>,
        ranker: Ranker,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Hit>>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_whole_video_id() {
        let filter = FrameFilter::videos(&["L01_V001".to_string(), " L02_V002 ".to_string()]);
        assert!(filter.matches("L01_V001#0042"));
        assert!(filter.matches("L02_V002#7"));
        assert!(!filter.matches("L01_V0011#7"));
        assert!(!filter.matches("L01_V001"));
        assert!(FrameFilter::default().matches("anything#1"));
    }

    #[test]
    fn test_record_roundtrip_from_snapshot_line() {
        let line = r#"{"frame_id":"L01_V001#12","vectors":{"clip":[0.5,0.5]},"texts":{"ocr":"stop"}}"#;
        let record: FrameRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.split_id(), Some(("L01_V001", "12")));
        assert_eq!(record.vectors["clip"], vec![0.5, 0.5]);
        assert_eq!(record.texts["ocr"], "stop");
    }
}
