//! # Cursor Position Resolver
//!
//! Turns music time into a cursor box on the rendered score.
//!
//! ## Steps
//! 1. Clamp the time to `[0, total duration]`
//! 2. Binary-search the timemap for the last entry starting at or before it
//! 3. Look up that entry's original measure box
//! 4. Compute how far through the entry the time is (`ratio`)
//! 5. Interpolate `x` across the measure's note positions, or across the
//!    whole measure when it has fewer than two
//! 6. Take `y`/`height` from the system box, grown by a margin
//!
//! [`CursorTracker`] adds the stateful part: it only asks the surface to
//! bring a system into view when the cursor moves onto a different system.
//!
//! ## Example
//! ```rust
//! use scoresync::cursor::resolve_cursor;
//! use scoresync::PlaybackMap;
//!
//! let map = PlaybackMap::from_json(r#"{
//!   "measures": [{"measure_idx": 0, "x": 0.0, "width": 100.0, "system_idx": 0}],
//!   "systems": [{"y": 10.0, "height": 40.0}],
//!   "timemap": [{"index": 0, "original_index": 0, "timestamp_ms": 0.0,
//!                "duration_ms": 1000.0, "tempo_bpm": 120.0}]
//! }"#).unwrap();
//!
//! let cursor = resolve_cursor(&map, 250.0, 5.0).unwrap();
//! assert_eq!(cursor.x, 25.0);
//! assert_eq!(cursor.y, 5.0);
//! assert_eq!(cursor.height, 50.0);
//! ```

use serde::Serialize;

use crate::map::{MeasureBox, PlaybackMap, TimemapEntry};

/// Where to draw the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    pub height: f64,
    pub system_idx: usize,
    pub measure_idx: usize,
    /// Position in the unrolled timemap.
    pub timemap_index: usize,
    /// Progress through the measure, in `[0, 1]`.
    pub ratio: f64,
}

/// Index of the last timemap entry with `timestamp_ms <= time_ms`.
///
/// When several entries share a timestamp the last one wins, so zero-length
/// entries are skipped over.
pub fn find_timemap_entry(timemap: &[TimemapEntry], time_ms: f64) -> Option<usize> {
    let after = timemap.partition_point(|e| e.timestamp_ms <= time_ms);
    after.checked_sub(1)
}

/// Progress through `entry` at `time_ms`.
pub fn entry_ratio(entry: &TimemapEntry, time_ms: f64) -> f64 {
    if entry.duration_ms > 0.0 {
        ((time_ms - entry.timestamp_ms) / entry.duration_ms).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Horizontal cursor position inside `measure` at `ratio`.
pub fn interpolate_x(measure: &MeasureBox, ratio: f64) -> f64 {
    let notes = &measure.note_positions;
    if notes.len() < 2 {
        return measure.x + ratio * measure.width;
    }

    // Measure edges bracket the first and last note.
    let upper = notes.partition_point(|&(r, _)| r <= ratio);
    let (r0, x0) = if upper == 0 {
        (0.0, measure.x)
    } else {
        notes[upper - 1]
    };
    let (r1, x1) = if upper < notes.len() {
        notes[upper]
    } else {
        (1.0, measure.right())
    };

    if r1 > r0 {
        x0 + (ratio - r0) / (r1 - r0) * (x1 - x0)
    } else {
        x0
    }
}

/// Resolve `time_ms` to a cursor box, or `None` when the map has nothing to
/// show for that instant.
pub fn resolve_cursor(map: &PlaybackMap, time_ms: f64, margin: f64) -> Option<CursorPosition> {
    if !time_ms.is_finite() {
        return None;
    }
    let time_ms = time_ms.clamp(0.0, map.total_duration_ms());

    let timemap = map.timemap();
    let timemap_index = find_timemap_entry(timemap, time_ms)?;
    let entry = &timemap[timemap_index];

    let measure = map.measure(entry.original_index)?;
    let system = map.system(measure.system_idx)?;

    let ratio = entry_ratio(entry, time_ms);
    let (top, bottom) = system.band(margin);

    Some(CursorPosition {
        x: interpolate_x(measure, ratio),
        y: top,
        height: bottom - top,
        system_idx: measure.system_idx,
        measure_idx: measure.measure_idx,
        timemap_index,
        ratio,
    })
}

/// One resolved cursor plus an optional "bring this system into view" request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub time_ms: f64,
    pub position: CursorPosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_to_system: Option<usize>,
}

/// Remembers the last resolved system so scrolling is edge-triggered.
#[derive(Debug, Clone)]
pub struct CursorTracker {
    margin: f64,
    last_system: Option<usize>,
}

impl CursorTracker {
    pub fn new(margin: f64) -> Self {
        Self {
            margin,
            last_system: None,
        }
    }

    pub fn update(&mut self, map: &PlaybackMap, time_ms: f64) -> Option<CursorUpdate> {
        let position = resolve_cursor(map, time_ms, self.margin)?;
        let scroll_to_system = if self.last_system != Some(position.system_idx) {
            self.last_system = Some(position.system_idx);
            Some(position.system_idx)
        } else {
            None
        };
        Some(CursorUpdate {
            time_ms,
            position,
            scroll_to_system,
        })
    }

    /// Forget the last system, so the next update scrolls again.
    pub fn reset(&mut self) {
        self.last_system = None;
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }
}
