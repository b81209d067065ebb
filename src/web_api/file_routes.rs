//! File backend routes: health probes, frame info, thumbnails, video ranges

use axum::{
    extract::{Path, State},
    http::{
        header::{ACCEPT_RANGES, CONTENT_RANGE, CONTENT_TYPE, HOST, RANGE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::error::{Error, Result};
use crate::file_store::parse_range;
use crate::models::{FrameInfoResponse, MessageResponse};
use crate::state::FileState;

const VIDEO_MEDIA_TYPE: &str = "video/mp4";
const IMAGE_MEDIA_TYPE: &str = "image/jpeg";

pub fn file_router(state: FileState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/:video_id", get(video_health))
        .route("/health/:video_id/:frame_id", get(frame_health))
        .route("/file_info/:video_id/:frame_id", get(frame_info))
        .route("/file/:video_id", get(get_video))
        .route("/file/:video_id/:frame_id", get(get_frame))
        .with_state(state)
}

async fn health() -> Json<MessageResponse> {
    Json(MessageResponse::new("alive"))
}

fn availability(available: bool) -> (StatusCode, Json<MessageResponse>) {
    if available {
        (StatusCode::OK, Json(MessageResponse::new("available")))
    } else {
        (StatusCode::NOT_FOUND, Json(MessageResponse::new("unavailable")))
    }
}

async fn video_health(State(state): State<FileState>, Path(video_id): Path<String>) -> impl IntoResponse {
    availability(state.files.has_video(&video_id).await)
}

async fn frame_health(
    State(state): State<FileState>,
    Path((video_id, frame_id)): Path<(String, String)>,
) -> impl IntoResponse {
    availability(state.files.has_thumbnail(&video_id, &frame_id).await)
}

async fn frame_info(
    State(state): State<FileState>,
    Path((video_id, frame_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Json<FrameInfoResponse> {
    let fps = state.files.fps(&video_id).await;
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");

    Json(FrameInfoResponse {
        id: format!("{}#{}", video_id, frame_id),
        video_uri: format!("http://{}/file/{}", host, video_id),
        video_id,
        frame_id,
        fps,
    })
}

async fn get_frame(
    State(state): State<FileState>,
    Path((video_id, frame_id)): Path<(String, String)>,
) -> Result<Response> {
    let image = state.files.read_thumbnail(&video_id, &frame_id).await?;
    Ok(([(CONTENT_TYPE, IMAGE_MEDIA_TYPE)], image).into_response())
}

async fn get_video(
    State(state): State<FileState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let total = state.files.video_size(&video_id).await?;
    let header = headers
        .get(RANGE)
        .map(|h| {
            h.to_str()
                .map_err(|_| Error::Validation("invalid range header".to_string()))
        })
        .transpose()?;

    let range = match parse_range(header, total) {
        Ok(range) => range,
        Err(Error::RangeNotSatisfiable(detail)) => {
            tracing::debug!(video_id = %video_id, range = %detail, total, "Range not satisfiable");
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(CONTENT_RANGE, format!("bytes */{}", total))],
                Json(MessageResponse::new("range not satisfiable")),
            )
                .into_response());
        }
        Err(e) => return Err(e),
    };

    let body = state.files.read_range(&video_id, range).await?;
    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (CONTENT_TYPE, VIDEO_MEDIA_TYPE.to_string()),
            (CONTENT_RANGE, range.content_range()),
            (ACCEPT_RANGES, "bytes".to_string()),
        ],
        body,
    )
        .into_response())
}
