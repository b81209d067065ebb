//! In-memory vector store with brute-force scoring
//!
//! Dense requests are scored by cosine similarity over every record carrying
//! the field (`nprobe` has no effect on an exhaustive scan). Text requests
//! score the fraction of query terms present in the field. Scores are then
//! fused by the requested ranker.

use super::{
    AnnRequest, FrameFilter, FrameRecord, Hit, Metric, Ranker, SearchData, StoreStats,
    VectorStore, SEARCH_LIMIT,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Rows {
    records: Vec<Arc<FrameRecord>>,
    index: HashMap<String, usize>,
}

/// Brute-force store backed by a vector of records
#[derive(Default)]
pub struct MemoryVectorStore {
    rows: RwLock<Rows>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records, keeping their order
    pub async fn from_records(records: impl IntoIterator<Item = FrameRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record).await;
        }
        store
    }

    /// Load a JSON-lines snapshot, one [`FrameRecord`] per line
    pub async fn load_jsonl(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let store = Self::new();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: FrameRecord = serde_json::from_str(line).map_err(|e| {
                Error::VectorStore(format!(
                    "{}:{}: invalid record: {}",
                    path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            store.upsert(record).await;
        }

        tracing::info!(
            path = %path.display(),
            rows = store.len().await,
            "Loaded vector snapshot"
        );
        Ok(store)
    }

    /// Insert or replace by frame id
    pub async fn upsert(&self, record: FrameRecord) {
        let mut rows = self.rows.write().await;

        match rows.index.get(&record.frame_id).copied() {
            Some(pos) => rows.records[pos] = Arc::new(record),
            None => {
                let pos = rows.records.len();
                rows.index.insert(record.frame_id.clone(), pos);
                rows.records.push(Arc::new(record));
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Per-request ranking: (record position, score), best first
fn rank_request(records: &[Arc<FrameRecord>], request: &AnnRequest) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = match &request.data {
        SearchData::Dense(query) => records
            .iter()
            .enumerate()
            .filter_map(|(pos, r)| {
                r.vectors
                    .get(&request.field)
                    .map(|v| (pos, dense_score(query, v, request.metric)))
            })
            .collect(),
        SearchData::Text(query) => {
            let query = query.to_lowercase();
            let terms: Vec<&str> = query.split_whitespace().collect();
            records
                .iter()
                .enumerate()
                .filter_map(|(pos, r)| {
                    let text = r.texts.get(&request.field)?.to_lowercase();
                    let score = term_overlap(&terms, &text);
                    (score > 0.0).then_some((pos, score))
                })
                .collect()
        }
    };

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(request.limit.min(SEARCH_LIMIT));
    scored
}

fn dense_score(query: &[f32], vector: &[f32], metric: Metric) -> f32 {
    let dot: f32 = query.iter().zip(vector).map(|(a, b)| a * b).sum();
    match metric {
        Metric::Ip => dot,
        Metric::Cosine => {
            let qn = query.iter().map(|x| x * x).sum::<f32>().sqrt();
            let vn = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            if qn == 0.0 || vn == 0.0 {
                0.0
            } else {
                dot / (qn * vn)
            }
        }
    }
}

fn term_overlap(terms: &[&str], text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let matched = terms.iter().filter(|t| text.contains(*t)).count();
    matched as f32 / terms.len() as f32
}

/// Map a raw score to [0, 1] before weighting
fn normalize_score(score: f32, request: &AnnRequest) -> f32 {
    match (&request.data, request.metric) {
        (SearchData::Dense(_), Metric::Cosine) => (1.0 + score) / 2.0,
        (SearchData::Dense(_), Metric::Ip) => 0.5 + score.atan() / std::f32::consts::PI,
        (SearchData::Text(_), _) => score,
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn get(&self, frame_id: &str) -> Result<Option<Arc<FrameRecord>>> {
        let rows = self.rows.read().await;
        Ok(rows.index.get(frame_id).map(|&pos| rows.records[pos].clone()))
    }

    async fn query(
        &self,
        filter: &FrameFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Arc<FrameRecord>>> {
        let rows = self.rows.read().await;
        Ok(rows
            .records
            .iter()
            .filter(|r| filter.matches(&r.frame_id))
            .skip(offset)
            .take(limit.min(SEARCH_LIMIT))
            .cloned()
            .collect())
    }

    async fn hybrid_search(
        &self,
        requests: Vec<AnnRequest>,
        ranker: Ranker,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Hit>> {
        if let Ranker::Weighted(weights) = &ranker {
            if weights.len() != requests.len() {
                return Err(Error::VectorStore(format!(
                    "weighted ranker has {} weights for {} requests",
                    weights.len(),
                    requests.len()
                )));
            }
        }

        let rows = self.rows.read().await;
        let records = &rows.records;
        // position -> fused score; first-seen order breaks ties
        let mut fused: Vec<(usize, f32)> = Vec::new();
        let mut slot: HashMap<usize, usize> = HashMap::new();

        for (i, request) in requests.iter().enumerate() {
            for (rank, (pos, score)) in rank_request(records, request).into_iter().enumerate() {
                let contribution = match &ranker {
                    Ranker::Weighted(weights) => weights[i] * normalize_score(score, request),
                    Ranker::ReciprocalRank { k } => 1.0 / (*k as f32 + rank as f32 + 1.0),
                };
                let at = *slot.entry(pos).or_insert_with(|| {
                    fused.push((pos, 0.0));
                    fused.len() - 1
                });
                fused[at].1 += contribution;
            }
        }

        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(fused
            .into_iter()
            .skip(offset)
            .take(limit.min(SEARCH_LIMIT))
            .map(|(pos, distance)| Hit {
                entity: records[pos].clone(),
                distance,
            })
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            row_count: self.len().await as u64,
        })
    }
}
