//! # Playback Map Module
//!
//! The immutable lookup table that ties music time to positions on the
//! rendered score.
//!
//! ## Contents
//! - `measures` - one visual box per original score measure
//! - `systems` - one visual box per line of music
//! - `timemap` - the unrolled performance, one entry per played measure,
//!   sorted by `timestamp_ms`
//!
//! A map is produced once per (document, mixing options) pair and shared
//! read-only (`Arc<PlaybackMap>`) by the cursor and seek resolvers.
//!
//! ## Validation
//! [`PlaybackMap::new`] and [`PlaybackMap::from_json`] reject maps that break
//! the timemap ordering, use negative durations, reference unknown measures,
//! or carry unordered note positions. A measure pointing at a missing system
//! is accepted with a warning; lookups for it simply come back empty.
//!
//! ## Example
//! ```rust
//! use scoresync::PlaybackMap;
//!
//! let json = r#"{
//!   "measures": [{"measure_idx": 0, "x": 50.0, "width": 200.0, "system_idx": 0}],
//!   "systems": [{"y": 100.0, "height": 40.0}],
//!   "timemap": [{"index": 0, "original_index": 0, "timestamp_ms": 0.0,
//!                "duration_ms": 2000.0, "tempo_bpm": 120.0}]
//! }"#;
//!
//! let map = PlaybackMap::from_json(json).unwrap();
//! assert_eq!(map.total_duration_ms(), 2000.0);
//! assert!(map.measure(0).is_some());
//! ```

mod types;

#[cfg(test)]
pub(crate) mod fixtures;
#[cfg(test)]
mod tests;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub use types::{MeasureBox, SystemBox, TimemapEntry};
use types::RawPlaybackMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawPlaybackMap", into = "RawPlaybackMap")]
pub struct PlaybackMap {
    measures: Vec<MeasureBox>,
    systems: Vec<SystemBox>,
    timemap: Vec<TimemapEntry>,
    /// `measure_idx` -> position in `measures`
    measure_lookup: HashMap<usize, usize>,
}

impl PlaybackMap {
    pub fn new(
        measures: Vec<MeasureBox>,
        systems: Vec<SystemBox>,
        timemap: Vec<TimemapEntry>,
    ) -> Result<Self, SyncError> {
        let mut measure_lookup = HashMap::with_capacity(measures.len());
        for (pos, measure) in measures.iter().enumerate() {
            validate_measure(measure)?;
            if measure_lookup.insert(measure.measure_idx, pos).is_some() {
                return Err(SyncError::InvalidMap(format!(
                    "measure {} appears more than once",
                    measure.measure_idx
                )));
            }
            if measure.system_idx >= systems.len() {
                log::warn!(
                    "measure {} references missing system {}",
                    measure.measure_idx,
                    measure.system_idx
                );
            }
        }

        for (i, system) in systems.iter().enumerate() {
            if !system.y.is_finite() || !system.height.is_finite() || system.height < 0.0 {
                return Err(SyncError::InvalidMap(format!(
                    "system {} has an invalid box (y {}, height {})",
                    i, system.y, system.height
                )));
            }
        }

        validate_timemap(&timemap, &measure_lookup)?;

        Ok(Self {
            measures,
            systems,
            timemap,
            measure_lookup,
        })
    }

    /// Parse and validate the JSON produced by the score-compilation service.
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let raw: RawPlaybackMap =
            serde_json::from_str(json).map_err(|e| SyncError::MapParseError {
                line: e.line(),
                column: e.column(),
                message: e.to_string(),
            })?;
        Self::try_from(raw)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn measures(&self) -> &[MeasureBox] {
        &self.measures
    }

    pub fn systems(&self) -> &[SystemBox] {
        &self.systems
    }

    pub fn timemap(&self) -> &[TimemapEntry] {
        &self.timemap
    }

    /// Visual box of an original score measure.
    pub fn measure(&self, measure_idx: usize) -> Option<&MeasureBox> {
        self.measure_lookup
            .get(&measure_idx)
            .and_then(|&pos| self.measures.get(pos))
    }

    pub fn system(&self, system_idx: usize) -> Option<&SystemBox> {
        self.systems.get(system_idx)
    }

    /// End of the last timemap entry, or zero for an empty timemap.
    pub fn total_duration_ms(&self) -> f64 {
        self.timemap.last().map_or(0.0, TimemapEntry::end_ms)
    }
}

impl TryFrom<RawPlaybackMap> for PlaybackMap {
    type Error = SyncError;

    fn try_from(raw: RawPlaybackMap) -> Result<Self, Self::Error> {
        PlaybackMap::new(raw.measures, raw.systems, raw.timemap)
    }
}

impl From<PlaybackMap> for RawPlaybackMap {
    fn from(map: PlaybackMap) -> Self {
        RawPlaybackMap {
            measures: map.measures,
            systems: map.systems,
            timemap: map.timemap,
        }
    }
}

fn validate_measure(measure: &MeasureBox) -> Result<(), SyncError> {
    if !measure.x.is_finite() || !measure.width.is_finite() || measure.width < 0.0 {
        return Err(SyncError::InvalidMap(format!(
            "measure {} has an invalid box (x {}, width {})",
            measure.measure_idx, measure.x, measure.width
        )));
    }

    let mut previous: Option<f64> = None;
    for &(ratio, x) in &measure.note_positions {
        if !(0.0..=1.0).contains(&ratio) || !x.is_finite() {
            return Err(SyncError::InvalidMap(format!(
                "measure {} has note position ({}, {}) outside the measure",
                measure.measure_idx, ratio, x
            )));
        }
        if let Some(prev) = previous {
            if ratio <= prev {
                return Err(SyncError::InvalidMap(format!(
                    "measure {} note positions are not strictly increasing at ratio {}",
                    measure.measure_idx, ratio
                )));
            }
        }
        previous = Some(ratio);
    }
    Ok(())
}

fn validate_timemap(
    timemap: &[TimemapEntry],
    measure_lookup: &HashMap<usize, usize>,
) -> Result<(), SyncError> {
    let mut previous_ts = f64::NEG_INFINITY;
    for (i, entry) in timemap.iter().enumerate() {
        if !entry.timestamp_ms.is_finite() || !entry.duration_ms.is_finite() {
            return Err(SyncError::InvalidMap(format!(
                "timemap entry {} has non-finite timing",
                i
            )));
        }
        if entry.timestamp_ms < previous_ts {
            return Err(SyncError::InvalidMap(format!(
                "timemap entry {} starts at {} ms, before the previous entry ({} ms)",
                i, entry.timestamp_ms, previous_ts
            )));
        }
        if entry.duration_ms < 0.0 {
            return Err(SyncError::InvalidMap(format!(
                "timemap entry {} has negative duration {}",
                i, entry.duration_ms
            )));
        }
        if !measure_lookup.contains_key(&entry.original_index) {
            return Err(SyncError::InvalidMap(format!(
                "timemap entry {} references unknown measure {}",
                i, entry.original_index
            )));
        }
        previous_ts = entry.timestamp_ms;
    }
    Ok(())
}
