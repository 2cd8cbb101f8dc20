//! Playback map record types
//!
//! These mirror the JSON emitted by the score-compilation service.

use serde::{Deserialize, Serialize};

/// Visual box of one original score measure.
///
/// # Fields
/// - `measure_idx`: index of the measure in the original score
/// - `x`, `width`: horizontal extent in image units
/// - `system_idx`: which system (line of music) the measure sits on
/// - `note_positions`: `(ratio, x)` pairs, ratio in `[0, 1]` and strictly
///   increasing, used to follow uneven note spacing inside the measure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureBox {
    pub measure_idx: usize,
    pub x: f64,
    pub width: f64,
    pub system_idx: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note_positions: Vec<(f64, f64)>,
}

impl MeasureBox {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn contains_x(&self, x: f64) -> bool {
        x >= self.x && x <= self.right()
    }
}

/// Visual box of one system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemBox {
    pub y: f64,
    pub height: f64,
}

impl SystemBox {
    /// Top and bottom of the box grown by `margin` on both sides.
    pub fn band(&self, margin: f64) -> (f64, f64) {
        (self.y - margin, self.y + self.height + margin)
    }

    /// Vertical distance from `y` to the unexpanded box, zero inside it.
    pub fn distance_to(&self, y: f64) -> f64 {
        if y < self.y {
            self.y - y
        } else if y > self.y + self.height {
            y - (self.y + self.height)
        } else {
            0.0
        }
    }
}

/// One measure of the unrolled performance.
///
/// Repeats and jumps are already expanded, so several entries may share an
/// `original_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimemapEntry {
    pub index: usize,
    pub original_index: usize,
    pub timestamp_ms: f64,
    pub duration_ms: f64,
    pub tempo_bpm: f64,
}

impl TimemapEntry {
    pub fn end_ms(&self) -> f64 {
        self.timestamp_ms + self.duration_ms
    }

    /// Distance from `time_ms` to this entry's span, zero inside it.
    pub fn distance_to(&self, time_ms: f64) -> f64 {
        if time_ms < self.timestamp_ms {
            self.timestamp_ms - time_ms
        } else if time_ms > self.end_ms() {
            time_ms - self.end_ms()
        } else {
            0.0
        }
    }
}

/// Wire form of the playback map, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPlaybackMap {
    #[serde(default)]
    pub measures: Vec<MeasureBox>,
    #[serde(default)]
    pub systems: Vec<SystemBox>,
    #[serde(default)]
    pub timemap: Vec<TimemapEntry>,
}
