//! Maps shared by unit tests across modules.

use super::{MeasureBox, PlaybackMap, SystemBox, TimemapEntry};

pub(crate) fn entry(index: usize, original_index: usize, ts: f64, dur: f64) -> TimemapEntry {
    TimemapEntry {
        index,
        original_index,
        timestamp_ms: ts,
        duration_ms: dur,
        tempo_bpm: 120.0,
    }
}

pub(crate) fn measure(measure_idx: usize, x: f64, width: f64, system_idx: usize) -> MeasureBox {
    MeasureBox {
        measure_idx,
        x,
        width,
        system_idx,
        note_positions: Vec::new(),
    }
}

/// Two systems, four measures; measures 0-1 are repeated once.
///
/// Play order: m0 m1 m0 m1 m2 m3, 11 seconds in total.
pub(crate) fn repeated_section_map() -> PlaybackMap {
    let mut m2 = measure(2, 50.0, 300.0, 1);
    m2.note_positions = vec![(0.0, 60.0), (0.5, 120.0), (0.75, 300.0)];
    PlaybackMap::new(
        vec![
            measure(0, 50.0, 200.0, 0),
            measure(1, 250.0, 200.0, 0),
            m2,
            measure(3, 350.0, 100.0, 1),
        ],
        vec![
            SystemBox { y: 100.0, height: 40.0 },
            SystemBox { y: 250.0, height: 40.0 },
        ],
        vec![
            entry(0, 0, 0.0, 2000.0),
            entry(1, 1, 2000.0, 2000.0),
            entry(2, 0, 4000.0, 2000.0),
            entry(3, 1, 6000.0, 2000.0),
            entry(4, 2, 8000.0, 2000.0),
            entry(5, 3, 10000.0, 1000.0),
        ],
    )
    .unwrap()
}

/// Three measures on one system with uneven durations.
pub(crate) fn uneven_map() -> PlaybackMap {
    PlaybackMap::new(
        vec![
            measure(0, 0.0, 100.0, 0),
            measure(1, 100.0, 100.0, 0),
            measure(2, 200.0, 100.0, 0),
        ],
        vec![SystemBox { y: 0.0, height: 50.0 }],
        vec![
            entry(0, 0, 0.0, 1000.0),
            entry(1, 1, 1000.0, 500.0),
            entry(2, 2, 1500.0, 2000.0),
        ],
    )
    .unwrap()
}
