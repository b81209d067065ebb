//! Response bodies shared by the search, file and core services

use crate::search_engine::{RankedFrame, SearchParams};
use serde::{Deserialize, Serialize};

pub const MESSAGE_SUCCESS: &str = "success";

/// `{"message": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One result row as the web UI consumes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDto {
    /// `<video_id>#<frame_id>`
    pub id: String,
    pub video_id: String,
    pub frame_id: String,
    pub time_line: Vec<String>,
    pub fps: f64,
}

impl FrameDto {
    /// `None` for ids without a `#` separator
    pub fn from_ranked(frame: &RankedFrame, fps: f64) -> Option<Self> {
        let (video_id, frame_id) = frame.entity.split_id()?;
        Some(Self {
            id: frame.entity.frame_id.clone(),
            video_id: video_id.to_string(),
            frame_id: frame_id.to_string(),
            time_line: frame.time_line.clone(),
            fps,
        })
    }
}

/// Parameters echoed back with every search page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultParams {
    pub limit: usize,
    pub target_features: Vec<String>,
    pub nprobe: u32,
    pub temporal_k: usize,
    pub ocr_weight: f32,
    pub max_interval: u32,
}

impl From<&SearchParams> for ResultParams {
    fn from(params: &SearchParams) -> Self {
        Self {
            limit: params.limit,
            target_features: params.target_features.clone(),
            nprobe: params.nprobe,
            temporal_k: params.temporal_k,
            ocr_weight: params.ocr_weight,
            max_interval: params.max_interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramesResponse {
    pub message: String,
    pub total: u64,
    pub frames: Vec<FrameDto>,
    pub offset: usize,
    pub result_params: ResultParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFeaturesResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub target_features: Vec<String>,
}

/// Frame metadata served by the file backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfoResponse {
    pub id: String,
    pub video_id: String,
    pub frame_id: String,
    pub fps: f64,
    pub video_uri: String,
}
