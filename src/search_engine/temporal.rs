//! Temporal sequence combination
//!
//! Steps are merged from the last to the first. A candidate of step `i`
//! survives if step `i+1` (already merged) has a chain starting in the same
//! video within `[frame, frame + max_interval)`; its cumulative distance is
//! its own plus the best chain in that window.

use crate::vector_store::{FrameRecord, Hit};
use std::cmp::Ordering;
use std::sync::Arc;

/// `(video, frame)` pair used for every sequence comparison
///
/// The video part strips the literal `L` and `_V` from the video id and
/// parses the rest, so `L21_V003` becomes `21003`. Ids with different
/// zero-padding widths can collide (`L2_V0013` and `L21_V003`); the rule is
/// kept as-is because existing datasets are ranked with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderingKey {
    pub video: u64,
    pub frame: i64,
}

impl OrderingKey {
    pub fn from_parts(video_id: &str, frame_number: &str) -> Option<Self> {
        let video = video_id.replace('L', "").replace("_V", "");
        Some(Self {
            video: video.trim().parse().ok()?,
            frame: frame_number.trim().parse().ok()?,
        })
    }

    /// Parse `<video_id>#<frame_number>`
    pub fn from_frame_id(frame_id: &str) -> Option<Self> {
        let (video_id, frame_number) = frame_id.split_once('#')?;
        Self::from_parts(video_id, frame_number)
    }

    /// Exclusive upper bound of the continuation window
    fn window_end(&self, max_interval: i64) -> Self {
        Self {
            video: self.video,
            frame: self.frame.saturating_add(max_interval),
        }
    }
}

/// Candidate chain: first frame, cumulative score and the frames it spans
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalChain {
    pub entity: Arc<FrameRecord>,
    pub distance: f32,
    /// Frame numbers from this step to the last step
    pub time_line: Vec<String>,
}

struct Keyed {
    key: OrderingKey,
    chain: TemporalChain,
}

fn frame_number(record: &FrameRecord) -> String {
    record
        .split_id()
        .map(|(_, frame)| frame.to_string())
        .unwrap_or_default()
}

fn keyed_pool(pool: Vec<Hit>) -> Vec<Keyed> {
    pool.into_iter()
        .filter_map(|hit| match OrderingKey::from_frame_id(&hit.entity.frame_id) {
            Some(key) => Some(Keyed {
                key,
                chain: TemporalChain {
                    time_line: vec![frame_number(&hit.entity)],
                    entity: hit.entity,
                    distance: hit.distance,
                },
            }),
            None => {
                tracing::warn!(
                    frame_id = %hit.entity.frame_id,
                    "Skipping candidate without a parseable ordering key"
                );
                None
            }
        })
        .collect()
}

/// Merge per-step candidate pools (in temporal order) into ranked chains
pub fn combine_temporal_results(pools: Vec<Vec<Hit>>, max_interval: i64) -> Vec<TemporalChain> {
    let mut pools: Vec<Vec<Keyed>> = pools.into_iter().map(keyed_pool).collect();

    let Some(mut best) = pools.pop() else {
        return Vec::new();
    };

    while let Some(mut current) = pools.pop() {
        current.sort_by_key(|c| c.key);
        best.sort_by_key(|b| b.key);

        let mut merged = Vec::new();
        let mut low_idx = 0;
        let mut high_idx = 0;

        for cur in current {
            let low = cur.key;
            let high = cur.key.window_end(max_interval);

            while low_idx < best.len() && best[low_idx].key < low {
                low_idx += 1;
            }
            while high_idx < best.len() && best[high_idx].key < high {
                high_idx += 1;
            }

            if low_idx >= high_idx {
                continue;
            }

            // First maximum wins so the continuation is deterministic
            let mut top = &best[low_idx];
            for candidate in &best[low_idx + 1..high_idx] {
                if candidate.chain.distance > top.chain.distance {
                    top = candidate;
                }
            }

            let mut time_line = cur.chain.time_line;
            time_line.extend(top.chain.time_line.iter().cloned());

            merged.push(Keyed {
                key: cur.key,
                chain: TemporalChain {
                    entity: cur.chain.entity,
                    distance: cur.chain.distance + top.chain.distance,
                    time_line,
                },
            });
        }

        merged.sort_by(|a, b| {
            b.chain
                .distance
                .partial_cmp(&a.chain.distance)
                .unwrap_or(Ordering::Equal)
        });
        best = merged;
    }

    best.into_iter().map(|k| k.chain).collect()
}
