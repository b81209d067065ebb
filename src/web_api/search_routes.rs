//! Search backend routes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::collections::HashMap;

use super::params::{self, QueryPairs};
use crate::error::Result;
use crate::models::{FrameDto, FramesResponse, ResultParams, TargetFeaturesResponse, MESSAGE_SUCCESS};
use crate::search_engine::{SearchOutcome, SearchParams};
use crate::state::SearchState;

pub fn search_router(state: SearchState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search/multimodal", get(search_multimodal))
        .route("/search/image", get(search_image))
        .route("/target_features", get(target_features))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn search_multimodal(
    State(state): State<SearchState>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Json<FramesResponse>> {
    let q = params::required(&pairs, "q")?;
    let params = params::search_params(&pairs)?;

    let outcome = state
        .engine
        .search_multimodal(&q, &params)
        .await
        .map_err(|e| e.during("search_multimodal"))?;

    Ok(Json(frames_response(&state, outcome, &params).await))
}

async fn search_image(
    State(state): State<SearchState>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Json<FramesResponse>> {
    // `q` is the older spelling of `id`
    let id = params::required(&pairs, "id").or_else(|_| params::required(&pairs, "q"))?;
    let params = params::search_params(&pairs)?;

    let outcome = state
        .engine
        .search_image(&id, params.offset, params.limit, &params.target_features, params.nprobe)
        .await
        .map_err(|e| e.during("search_image"))?;

    Ok(Json(frames_response(&state, outcome, &params).await))
}

async fn target_features(State(state): State<SearchState>) -> impl IntoResponse {
    Json(TargetFeaturesResponse {
        message: None,
        target_features: state.engine.target_features(),
    })
}

async fn frames_response(state: &SearchState, outcome: SearchOutcome, params: &SearchParams) -> FramesResponse {
    let mut fps_by_video: HashMap<String, f64> = HashMap::new();
    let mut frames = Vec::with_capacity(outcome.results.len());

    for ranked in &outcome.results {
        let Some((video_id, _)) = ranked.entity.split_id() else {
            tracing::warn!(frame_id = %ranked.entity.frame_id, "Skipping frame without video id");
            continue;
        };
        let fps = match fps_by_video.get(video_id) {
            Some(fps) => *fps,
            None => {
                let fps = state.files.fps(video_id).await;
                fps_by_video.insert(video_id.to_string(), fps);
                fps
            }
        };
        if let Some(frame) = FrameDto::from_ranked(ranked, fps) {
            frames.push(frame);
        }
    }

    FramesResponse {
        message: MESSAGE_SUCCESS.to_string(),
        total: outcome.total,
        frames,
        offset: outcome.offset,
        result_params: ResultParams::from(params),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, FeatureModality, InputKind};
    use crate::error::Error;
    use crate::file_store::FileStore;
    use crate::search_engine::SearchEngine;
    use crate::vector_store::{FrameRecord, MemoryVectorStore, VectorStore};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn name(&self) -> &str {
            "axis"
        }

        fn required_input_kind(&self) -> InputKind {
            InputKind::Image
        }

        async fn embed_text(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|t| match t.as_str() {
                    "x" => Ok(vec![1.0, 0.0]),
                    "y" => Ok(vec![0.0, 1.0]),
                    _ => Err(Error::Embedding(format!("model cannot embed {}", t))),
                })
                .collect()
        }

        async fn embed_image(&self, _image: &[u8]) -> crate::error::Result<Vec<f32>> {
            Err(Error::Embedding("unsupported".to_string()))
        }
    }

    async fn app(dir: &std::path::Path) -> Router {
        let store = MemoryVectorStore::from_records(vec![
            FrameRecord::new("L01_V001#10").with_vector("clip", vec![1.0, 0.0]),
            FrameRecord::new("L01_V001#15").with_vector("clip", vec![0.0, 1.0]),
            FrameRecord::new("L01_V002#3").with_vector("clip", vec![0.7, 0.7]),
        ])
        .await;
        let store: Arc<dyn VectorStore> = Arc::new(store);
        let modality = FeatureModality {
            name: "clip".to_string(),
            embedder: Arc::new(AxisEmbedder),
            index_fields: vec!["clip".to_string()],
        };
        let engine = SearchEngine::new(store, vec![modality], None).unwrap();
        search_router(SearchState {
            engine: Arc::new(engine),
            files: Arc::new(FileStore::new(dir)),
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_similarity_response_shape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data/video_info")).unwrap();
        std::fs::write(dir.path().join("data/video_info/L01_V001.json"), r#"{"fps": 30}"#).unwrap();

        let (status, body) = get_json(app(dir.path()).await, "/search/multimodal?q=x&limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "success");
        assert_eq!(body["total"], 3);
        assert_eq!(body["offset"], 0);
        assert_eq!(body["frames"].as_array().unwrap().len(), 2);
        assert_eq!(body["frames"][0]["id"], "L01_V001#10");
        assert_eq!(body["frames"][0]["video_id"], "L01_V001");
        assert_eq!(body["frames"][0]["frame_id"], "10");
        assert_eq!(body["frames"][0]["time_line"], serde_json::json!(["10"]));
        assert_eq!(body["frames"][0]["fps"], 30.0);
        assert_eq!(body["result_params"]["limit"], 2);
        assert_eq!(body["result_params"]["nprobe"], 8);
        assert_eq!(body["result_params"]["max_interval"], 250);
    }

    #[tokio::test]
    async fn test_simple_mode_lists_video() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(dir.path()).await, "/search/multimodal?q=%5Bvideo%3AL01_V001%5D").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["frames"][0]["fps"], 25.0);
    }

    #[tokio::test]
    async fn test_missing_q_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(dir.path()).await, "/search/multimodal?limit=5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "q is required");
    }

    #[tokio::test]
    async fn test_embedding_failure_hides_detail() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(dir.path()).await, "/search/multimodal?q=zebra").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({"message": "search_multimodal errors"}));
    }

    #[tokio::test]
    async fn test_image_search_and_target_features() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(dir.path()).await, "/search/image?id=L01_V001%2315").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["frames"][0]["id"], "L01_V001#15");

        let (status, body) = get_json(app(dir.path()).await, "/target_features").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"target_features": ["clip"]}));

        let (status, _) = get_json(app(dir.path()).await, "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_offset_past_end_returns_empty_page() {
        let dir = tempfile::tempdir().unwrap();
        for uri in [
            "/search/multimodal?q=x&offset=18446744073709551615",
            "/search/image?id=L01_V001%2315&offset=18446744073709551615",
        ] {
            let (status, body) = get_json(app(dir.path()).await, uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(body["frames"], serde_json::json!([]), "{}", uri);
            assert_eq!(body["offset"], serde_json::json!(u64::MAX), "{}", uri);
        }
    }
}
