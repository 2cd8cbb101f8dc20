//! # Seek Resolver
//!
//! The inverse of the cursor resolver: a tap on the rendered score becomes a
//! music time to seek to.
//!
//! 1. Find the system whose band (`y - margin` to `y + height + margin`)
//!    contains the tap. Where the grown bands of neighbouring systems overlap,
//!    the system whose box is closest wins.
//! 2. Find the measure on that system whose `[x, x + width]` contains the tap.
//! 3. Pick a timemap entry for that measure (see [`SeekPolicy`]).
//! 4. Map the horizontal offset into the entry's time span.
//!
//! Any miss along the way yields `None`, and the tap is ignored.

use serde::{Deserialize, Serialize};

use crate::map::{MeasureBox, PlaybackMap, TimemapEntry};

/// Which pass to pick when the tapped measure is played more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeekPolicy {
    /// Always the first time the measure is played.
    FirstMatch,
    /// The pass closest to the current playhead, so tapping during the
    /// second time through a repeat stays in the second pass.
    #[default]
    NearestToPlayhead,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapPoint {
    pub x: f64,
    pub y: f64,
}

impl TapPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Resolve a tap to a music time in milliseconds.
pub fn resolve_seek(
    map: &PlaybackMap,
    tap: TapPoint,
    margin: f64,
    policy: SeekPolicy,
    playhead_ms: f64,
) -> Option<f64> {
    if !tap.x.is_finite() || !tap.y.is_finite() {
        return None;
    }

    let system_idx = find_system(map, tap.y, margin)?;
    let measure = find_measure(map, system_idx, tap.x)?;
    let entry = select_entry(map.timemap(), measure.measure_idx, policy, playhead_ms)?;

    let offset_ratio = if measure.width > 0.0 {
        ((tap.x - measure.x) / measure.width).clamp(0.0, 1.0)
    } else {
        0.0
    };
    Some(entry.timestamp_ms + offset_ratio * entry.duration_ms)
}

fn find_system(map: &PlaybackMap, y: f64, margin: f64) -> Option<usize> {
    map.systems()
        .iter()
        .enumerate()
        .filter(|(_, system)| {
            let (top, bottom) = system.band(margin);
            y >= top && y <= bottom
        })
        .min_by(|(_, a), (_, b)| a.distance_to(y).total_cmp(&b.distance_to(y)))
        .map(|(idx, _)| idx)
}

fn find_measure(map: &PlaybackMap, system_idx: usize, x: f64) -> Option<&MeasureBox> {
    map.measures()
        .iter()
        .find(|m| m.system_idx == system_idx && m.contains_x(x))
}

fn select_entry(
    timemap: &[TimemapEntry],
    measure_idx: usize,
    policy: SeekPolicy,
    playhead_ms: f64,
) -> Option<&TimemapEntry> {
    let mut candidates = timemap.iter().filter(|e| e.original_index == measure_idx);
    match policy {
        SeekPolicy::FirstMatch => candidates.next(),
        SeekPolicy::NearestToPlayhead => {
            let playhead = if playhead_ms.is_finite() { playhead_ms } else { 0.0 };
            // min_by keeps the earliest of equally distant passes
            candidates.min_by(|a, b| a.distance_to(playhead).total_cmp(&b.distance_to(playhead)))
        }
    }
}
