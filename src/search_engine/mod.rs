//! SearchEngine - Similarity, temporal and video-listing search
//!
//! ## Responsibilities
//!
//! - Turn a parsed query into hybrid search requests per modality
//! - Weighted fusion of text-embedding and OCR requests
//! - Ordered temporal sequence search over per-step candidate pools
//! - Video frame listing with "jump to selected frame" paging
//! - Memoize temporal and listing results in the owned [`ResultCache`]
//!
//! ## Modes
//!
//! - 0 steps: simple (video filter listing)
//! - 1 step: similarity
//! - 2+ steps: temporal

mod temporal;

pub use temporal::{combine_temporal_results, OrderingKey, TemporalChain};

use crate::embedding::FeatureModality;
use crate::error::{Error, Result};
use crate::query_parser::{self, QueryMode, QueryStep};
use crate::result_cache::{CacheKey, ResultCache};
use crate::vector_store::{AnnRequest, FrameFilter, FrameRecord, Hit, Ranker, VectorStore, SEARCH_LIMIT};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

const CACHE_TEMPORAL_SEARCH: &str = "temporal_search";
const CACHE_GET_VIDEOS: &str = "get_videos";

/// Caller-tunable search parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchParams {
    pub offset: usize,
    pub limit: usize,
    /// Index fields to search; empty means every configured one
    pub target_features: Vec<String>,
    pub nprobe: u32,
    pub temporal_k: usize,
    pub ocr_weight: f32,
    pub max_interval: u32,
    pub selected: Option<String>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
            target_features: Vec::new(),
            nprobe: 8,
            temporal_k: 10_000,
            ocr_weight: 1.0,
            max_interval: 250,
            selected: None,
        }
    }
}

/// One result row
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFrame {
    pub entity: Arc<FrameRecord>,
    /// Fused score; absent for plain listings
    pub distance: Option<f32>,
    /// Frame numbers spanned by the match
    pub time_line: Vec<String>,
}

impl RankedFrame {
    fn single(entity: Arc<FrameRecord>, distance: Option<f32>) -> Self {
        let time_line = entity
            .split_id()
            .map(|(_, frame)| vec![frame.to_string()])
            .unwrap_or_default();
        Self {
            entity,
            distance,
            time_line,
        }
    }
}

impl From<Hit> for RankedFrame {
    fn from(hit: Hit) -> Self {
        RankedFrame::single(hit.entity, Some(hit.distance))
    }
}

impl From<TemporalChain> for RankedFrame {
    fn from(chain: TemporalChain) -> Self {
        Self {
            entity: chain.entity,
            distance: Some(chain.distance),
            time_line: chain.time_line,
        }
    }
}

/// A page of results
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<RankedFrame>,
    pub total: u64,
    pub offset: usize,
}

impl SearchOutcome {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            total: 0,
            offset: 0,
        }
    }
}

#[derive(Serialize)]
struct TemporalCacheParams<'a> {
    steps: &'a [QueryStep],
    target_features: &'a [String],
    ocr_weight: f32,
    nprobe: u32,
    temporal_k: usize,
    max_interval: u32,
}

type CachedFrames = Arc<Vec<RankedFrame>>;

/// Search service owning its modalities, store handle and cache
pub struct SearchEngine {
    store: Arc<dyn VectorStore>,
    /// index field -> modality
    features: BTreeMap<String, Arc<FeatureModality>>,
    ocr_field: Option<String>,
    cache: ResultCache<CachedFrames>,
}

impl SearchEngine {
    /// Create an engine; fails when no modality defines a target feature
    pub fn new(
        store: Arc<dyn VectorStore>,
        modalities: Vec<FeatureModality>,
        ocr_field: Option<String>,
    ) -> Result<Self> {
        Self::with_cache(store, modalities, ocr_field, ResultCache::unbounded())
    }

    pub fn with_cache(
        store: Arc<dyn VectorStore>,
        modalities: Vec<FeatureModality>,
        ocr_field: Option<String>,
        cache: ResultCache<CachedFrames>,
    ) -> Result<Self> {
        let mut features = BTreeMap::new();
        for modality in modalities {
            if modality.index_fields.is_empty() {
                return Err(Error::Config(format!(
                    "{} does not have target features",
                    modality.name
                )));
            }
            let modality = Arc::new(modality);
            for field in &modality.index_fields {
                if features.insert(field.clone(), modality.clone()).is_some() {
                    return Err(Error::Config(format!(
                        "target feature {} is defined twice",
                        field
                    )));
                }
            }
            tracing::info!(
                modality = %modality.name,
                embedder = %modality.embedder.name(),
                fields = ?modality.index_fields,
                "Loaded modality for searching"
            );
        }

        if features.is_empty() {
            return Err(Error::Config("no searchable modality configured".to_string()));
        }

        Ok(Self {
            store,
            features,
            ocr_field,
            cache,
        })
    }

    /// Names of every searchable index field
    pub fn target_features(&self) -> Vec<String> {
        self.features.keys().cloned().collect()
    }

    pub fn supports_ocr(&self) -> bool {
        self.ocr_field.is_some()
    }

    pub fn cache(&self) -> &ResultCache<CachedFrames> {
        &self.cache
    }

    pub async fn get(&self, frame_id: &str) -> Result<Option<Arc<FrameRecord>>> {
        self.store.get(frame_id).await
    }

    /// Parse `q` and run the matching mode
    pub async fn search_multimodal(&self, q: &str, params: &SearchParams) -> Result<SearchOutcome> {
        let started = Instant::now();
        let query = query_parser::parse(q);

        let outcome = match query.mode() {
            QueryMode::Simple => {
                tracing::debug!(video_ids = ?query.video_id_filter, "searcher: get videos");
                self.list_video_frames(
                    &query.video_id_filter,
                    params.offset,
                    params.limit,
                    params.selected.as_deref(),
                )
                .await?
            }
            QueryMode::Similarity => {
                tracing::debug!(step = ?query.steps[0], "searcher: similarity search");
                let hits = self
                    .similarity_search(
                        &query.steps[0],
                        params.offset,
                        params.limit,
                        &params.target_features,
                        params.ocr_weight,
                        params.nprobe,
                    )
                    .await?;
                SearchOutcome {
                    results: hits.into_iter().map(RankedFrame::from).collect(),
                    total: self.store.stats().await?.row_count,
                    offset: params.offset,
                }
            }
            QueryMode::Temporal => {
                tracing::debug!(steps = query.steps.len(), "searcher: temporal search");
                let (results, total) = self.temporal_search(&query.steps, params).await?;
                SearchOutcome {
                    results,
                    total: total as u64,
                    offset: params.offset,
                }
            }
        };

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "searcher: extract and search finished"
        );
        Ok(outcome)
    }

    /// Requested names filtered to known modalities; empty selects all
    fn resolve_features(&self, target_features: &[String]) -> Vec<(String, Arc<FeatureModality>)> {
        if target_features.is_empty() {
            return self
                .features
                .iter()
                .map(|(name, m)| (name.clone(), m.clone()))
                .collect();
        }

        target_features
            .iter()
            .filter_map(|name| match self.features.get(name) {
                Some(m) => Some((name.clone(), m.clone())),
                None => {
                    tracing::warn!(feature = %name, "searcher: invalid target feature, skipping");
                    None
                }
            })
            .collect()
    }

    /// One weighted hybrid search for a single step
    pub async fn similarity_search(
        &self,
        step: &QueryStep,
        offset: usize,
        limit: usize,
        target_features: &[String],
        ocr_weight: f32,
        nprobe: u32,
    ) -> Result<Vec<Hit>> {
        let ocr_weight = if ocr_weight.is_nan() { 0.0 } else { ocr_weight.clamp(0.0, 1.0) };
        let request_limit = offset.saturating_add(limit).min(SEARCH_LIMIT);

        let mut text_requests = Vec::new();
        if let Some(text) = &step.text {
            // one embedding per modality, shared by its index fields
            let mut embedded: HashMap<String, Vec<f32>> = HashMap::new();
            for (field, modality) in self.resolve_features(target_features) {
                let vector = match embedded.get(&modality.name) {
                    Some(vector) => vector.clone(),
                    None => {
                        let vector = modality.embed_query(text).await?;
                        embedded.insert(modality.name.clone(), vector.clone());
                        vector
                    }
                };
                text_requests.push(AnnRequest::dense(vector, &field, nprobe, request_limit));
            }
        }

        let mut ocr_requests = Vec::new();
        if let Some(ocr_field) = &self.ocr_field {
            for phrase in &step.ocr_phrases {
                ocr_requests.push(AnnRequest::text(phrase, ocr_field, request_limit));
            }
        }

        let weights = fusion_weights(text_requests.len(), ocr_requests.len(), ocr_weight);
        let mut requests = text_requests;
        requests.extend(ocr_requests);

        if requests.is_empty() {
            tracing::warn!(step = ?step, "searcher: no searchable request for step");
            return Ok(Vec::new());
        }

        self.store
            .hybrid_search(requests, Ranker::Weighted(weights), offset, limit)
            .await
    }

    /// Ordered multi-step search; returns the requested page and the chain count
    pub async fn temporal_search(
        &self,
        steps: &[QueryStep],
        params: &SearchParams,
    ) -> Result<(Vec<RankedFrame>, usize)> {
        let key = CacheKey::digest(
            CACHE_TEMPORAL_SEARCH,
            &TemporalCacheParams {
                steps,
                target_features: &params.target_features,
                ocr_weight: params.ocr_weight,
                nprobe: params.nprobe,
                temporal_k: params.temporal_k,
                max_interval: params.max_interval,
            },
        )?;

        let chains = self
            .cache
            .get_or_try_insert_with(key, || async {
                let started = Instant::now();
                let mut pools = Vec::with_capacity(steps.len());
                for step in steps {
                    let pool = self
                        .similarity_search(
                            step,
                            0,
                            params.temporal_k,
                            &params.target_features,
                            params.ocr_weight,
                            params.nprobe,
                        )
                        .await?;
                    pools.push(pool);
                }
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "searcher: temporal candidate pools fetched"
                );

                let started = Instant::now();
                let chains = combine_temporal_results(pools, i64::from(params.max_interval));
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    chains = chains.len(),
                    "searcher: temporal results combined"
                );

                Ok::<_, Error>(Arc::new(chains.into_iter().map(RankedFrame::from).collect()))
            })
            .await?;

        Ok((page(&chains, params.offset, params.limit), chains.len()))
    }

    /// Every frame of the given videos, sorted by frame id
    ///
    /// With `selected`, the offset is moved to the page holding that frame.
    pub async fn list_video_frames(
        &self,
        video_ids: &[String],
        offset: usize,
        limit: usize,
        selected: Option<&str>,
    ) -> Result<SearchOutcome> {
        if video_ids.is_empty() {
            return Ok(SearchOutcome::empty());
        }

        let key = CacheKey::digest(CACHE_GET_VIDEOS, &video_ids)?;
        let frames = self
            .cache
            .get_or_try_insert_with(key, || async {
                let filter = FrameFilter::videos(video_ids);
                let mut records = self.store.query(&filter, 0, SEARCH_LIMIT).await?;
                records.sort_by(|a, b| a.frame_id.cmp(&b.frame_id));
                Ok::<_, Error>(Arc::new(
                    records
                        .into_iter()
                        .map(|r| RankedFrame::single(r, None))
                        .collect(),
                ))
            })
            .await?;

        let limit = limit.max(1);
        let mut offset = offset;
        if let Some(selected) = selected {
            if let Some(pos) = frames.iter().position(|f| f.entity.frame_id == selected) {
                offset = (pos / limit) * limit;
            }
        }

        Ok(SearchOutcome {
            results: page(&frames, offset, limit),
            total: frames.len() as u64,
            offset,
        })
    }

    /// Rank frames by similarity to a stored frame's own embeddings
    pub async fn search_image(
        &self,
        frame_id: &str,
        offset: usize,
        limit: usize,
        target_features: &[String],
        nprobe: u32,
    ) -> Result<SearchOutcome> {
        let Some(record) = self.get(frame_id).await? else {
            return Ok(SearchOutcome::empty());
        };

        let request_limit = offset.saturating_add(limit).min(SEARCH_LIMIT);
        let requests: Vec<AnnRequest> = self
            .resolve_features(target_features)
            .into_iter()
            .filter_map(|(field, _)| match record.vectors.get(&field) {
                Some(vector) => Some(AnnRequest::dense(vector.clone(), &field, nprobe, request_limit)),
                None => {
                    tracing::debug!(frame_id = %frame_id, feature = %field, "Record has no embedding");
                    None
                }
            })
            .collect();

        if requests.is_empty() {
            return Ok(SearchOutcome::empty());
        }

        let hits = self
            .store
            .hybrid_search(requests, Ranker::rrf(), offset, limit)
            .await?;

        Ok(SearchOutcome {
            results: hits.into_iter().map(RankedFrame::from).collect(),
            total: self.store.stats().await?.row_count,
            offset,
        })
    }
}

/// Text requests share `1 - ocr_weight`, OCR requests share `ocr_weight`.
/// When one side is absent the other receives the whole weight.
fn fusion_weights(num_text: usize, num_ocr: usize, ocr_weight: f32) -> Vec<f32> {
    let (text_share, ocr_share) = match (num_text, num_ocr) {
        (_, 0) => (1.0, 0.0),
        (0, _) => (0.0, 1.0),
        _ => (1.0 - ocr_weight, ocr_weight),
    };

    let mut weights = Vec::with_capacity(num_text + num_ocr);
    weights.extend(std::iter::repeat(text_share / num_text.max(1) as f32).take(num_text));
    weights.extend(std::iter::repeat(ocr_share / num_ocr.max(1) as f32).take(num_ocr));
    weights
}

fn page(frames: &[RankedFrame], offset: usize, limit: usize) -> Vec<RankedFrame> {
    if offset >= frames.len() {
        return Vec::new();
    }
    let end = offset.saturating_add(limit).min(frames.len());
    frames[offset..end].to_vec()
}
