//! FileStore - Keyframe thumbnails and video bytes on local disk
//!
//! ## Responsibilities
//!
//! - Resolve video, thumbnail and video-info paths under the work directory
//! - Availability checks used by health probes
//! - HTTP byte-range parsing and partial reads
//! - Per-video fps lookup
//!
//! ## Layout
//!
//! ```text
//! <work_dir>/data/videos/<video_id>.mp4
//! <work_dir>/data/thumbnails/<video_id>/<frame_id>.jpg
//! <work_dir>/data/video_info/<video_id>.json   {"fps": 25.0, ...}
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Bytes served for an open-ended or missing Range
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Fallback when `video_info/<id>.json` has no usable fps
pub const DEFAULT_FPS: f64 = 25.0;

/// Inclusive byte span of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive
    pub end: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Resolve a `Range` header against a file of `total` bytes
///
/// Supports one `bytes=` span: `a-b`, `a-` (one chunk) and `-n` (suffix).
/// A missing header yields the first chunk.
pub fn parse_range(header: Option<&str>, total: u64) -> Result<ByteRange> {
    if total == 0 {
        return Err(Error::RangeNotSatisfiable("file is empty".to_string()));
    }
    let last = total - 1;

    let Some(header) = header.map(str::trim) else {
        return Ok(ByteRange {
            start: 0,
            end: (CHUNK_SIZE - 1).min(last),
            total,
        });
    };

    let spec = header
        .strip_prefix("bytes=")
        .ok_or_else(|| Error::Validation(format!("unsupported range unit: {}", header)))?;
    if spec.contains(',') {
        return Err(Error::Validation("multiple ranges are not supported".to_string()));
    }
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| Error::Validation(format!("invalid range: {}", header)))?;
    let (start, end) = (start.trim(), end.trim());

    let parse = |value: &str| {
        value
            .parse::<u64>()
            .map_err(|_| Error::Validation(format!("invalid range: {}", header)))
    };

    let range = match (start.is_empty(), end.is_empty()) {
        (true, true) => return Err(Error::Validation(format!("invalid range: {}", header))),
        // suffix: last n bytes
        (true, false) => {
            let n = parse(end)?;
            if n == 0 {
                return Err(Error::RangeNotSatisfiable(header.to_string()));
            }
            ByteRange {
                start: total - n.min(total),
                end: last,
                total,
            }
        }
        (false, true) => {
            let start = parse(start)?;
            ByteRange {
                start,
                end: start.saturating_add(CHUNK_SIZE - 1).min(last),
                total,
            }
        }
        (false, false) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if end < start {
                return Err(Error::RangeNotSatisfiable(header.to_string()));
            }
            ByteRange {
                start,
                end: end.min(last),
                total,
            }
        }
    };

    if range.start > last {
        return Err(Error::RangeNotSatisfiable(header.to_string()));
    }
    Ok(range)
}

#[derive(Deserialize)]
struct VideoInfo {
    fps: Option<f64>,
}

/// Read-only view of the media directory
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: work_dir.as_ref().join("data"),
        }
    }

    pub fn video_path(&self, video_id: &str) -> Result<PathBuf> {
        let video_id = safe_segment(video_id)?;
        Ok(self.data_dir.join("videos").join(format!("{}.mp4", video_id)))
    }

    pub fn thumbnail_path(&self, video_id: &str, frame_id: &str) -> Result<PathBuf> {
        let video_id = safe_segment(video_id)?;
        let frame_id = safe_segment(frame_id)?;
        Ok(self
            .data_dir
            .join("thumbnails")
            .join(video_id)
            .join(format!("{}.jpg", frame_id)))
    }

    fn video_info_path(&self, video_id: &str) -> Result<PathBuf> {
        let video_id = safe_segment(video_id)?;
        Ok(self.data_dir.join("video_info").join(format!("{}.json", video_id)))
    }

    pub async fn has_video(&self, video_id: &str) -> bool {
        match self.video_path(video_id) {
            Ok(path) => is_file(&path).await,
            Err(_) => false,
        }
    }

    pub async fn has_thumbnail(&self, video_id: &str, frame_id: &str) -> bool {
        match self.thumbnail_path(video_id, frame_id) {
            Ok(path) => is_file(&path).await,
            Err(_) => false,
        }
    }

    /// fps of a video, [`DEFAULT_FPS`] when unknown
    pub async fn fps(&self, video_id: &str) -> f64 {
        let Ok(path) = self.video_info_path(video_id) else {
            return DEFAULT_FPS;
        };

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(video_id = %video_id, error = %e, "No video info, using default fps");
                return DEFAULT_FPS;
            }
        };

        match serde_json::from_slice::<VideoInfo>(&raw) {
            Ok(VideoInfo { fps: Some(fps) }) if fps.is_finite() && fps > 0.0 => fps,
            Ok(_) => DEFAULT_FPS,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable video info");
                DEFAULT_FPS
            }
        }
    }

    /// Size of a stored video in bytes
    pub async fn video_size(&self, video_id: &str) -> Result<u64> {
        let path = self.video_path(video_id)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(Error::NotFound(format!("video {}", video_id))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("video {}", video_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read `range` of a stored video
    pub async fn read_range(&self, video_id: &str, range: ByteRange) -> Result<Vec<u8>> {
        let path = self.video_path(video_id)?;
        let mut file = fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("video {}", video_id)),
            _ => e.into(),
        })?;

        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = Vec::with_capacity(range.len() as usize);
        file.take(range.len()).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_thumbnail(&self, video_id: &str, frame_id: &str) -> Result<Vec<u8>> {
        let path = self.thumbnail_path(video_id, frame_id)?;
        fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("thumbnail {}/{}", video_id, frame_id))
            }
            _ => e.into(),
        })
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// Reject ids that could escape the data directory
fn safe_segment(segment: &str) -> Result<&str> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0']);
    if valid {
        Ok(segment)
    } else {
        Err(Error::NotFound(format!("invalid path segment: {:?}", segment)))
    }
}
