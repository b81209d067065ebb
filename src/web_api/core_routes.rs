//! Router routes: every data request is answered with a redirect

use axum::{
    extract::{OriginalUri, State},
    response::Redirect,
    routing::get,
    Json, Router,
};

use crate::error::Result;
use crate::models::{TargetFeaturesResponse, MESSAGE_SUCCESS};
use crate::proxy_router::{BackendRole, HEALTH_ENDPOINT};
use crate::state::CoreState;

pub fn core_router(state: CoreState) -> Router {
    Router::new()
        .route("/search/multimodal", get(search_multimodal))
        .route("/search/image", get(search_image))
        .route("/target_features", get(target_features))
        .route("/file_info/:video_id/:frame_id", get(frame_info))
        .route("/file/:video_id/:frame_id", get(get_frame))
        .route("/file/:video_id", get(get_video))
        .with_state(state)
}

/// Probe `probe_path` and redirect to the same request on the winner
async fn redirect(
    state: &CoreState,
    role: BackendRole,
    operation: &str,
    probe_path: &str,
    uri: &OriginalUri,
) -> Result<Redirect> {
    let target = state
        .router
        .resolve_redirect(role, operation, probe_path, uri.path(), uri.query())
        .await?;
    Ok(Redirect::temporary(target.as_str()))
}

/// `/file/v1/7` -> `/health/v1/7`, keeping the client's encoding
fn file_health_path(path: &str, prefix: &str) -> String {
    format!("{}{}", HEALTH_ENDPOINT, path.strip_prefix(prefix).unwrap_or(path))
}

async fn search_multimodal(State(state): State<CoreState>, uri: OriginalUri) -> Result<Redirect> {
    redirect(&state, BackendRole::Search, "search_multimodal", HEALTH_ENDPOINT, &uri).await
}

async fn search_image(State(state): State<CoreState>, uri: OriginalUri) -> Result<Redirect> {
    redirect(&state, BackendRole::Search, "search_image", HEALTH_ENDPOINT, &uri).await
}

async fn target_features(State(state): State<CoreState>) -> Result<Json<TargetFeaturesResponse>> {
    Ok(Json(TargetFeaturesResponse {
        message: Some(MESSAGE_SUCCESS.to_string()),
        target_features: state.router.target_features().await?,
    }))
}

async fn frame_info(State(state): State<CoreState>, uri: OriginalUri) -> Result<Redirect> {
    let probe = file_health_path(uri.path(), "/file_info");
    redirect(&state, BackendRole::File, "frame_info", &probe, &uri).await
}

async fn get_frame(State(state): State<CoreState>, uri: OriginalUri) -> Result<Redirect> {
    let probe = file_health_path(uri.path(), "/file");
    redirect(&state, BackendRole::File, "get_frame", &probe, &uri).await
}

async fn get_video(State(state): State<CoreState>, uri: OriginalUri) -> Result<Redirect> {
    let probe = file_health_path(uri.path(), "/file");
    redirect(&state, BackendRole::File, "get_video", &probe, &uri).await
}
