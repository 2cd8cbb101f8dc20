use super::fixtures::{entry, measure, repeated_section_map};
use super::*;

#[test]
fn test_map_from_json() {
    let json = r#"{
        "measures": [
            {"measure_idx": 0, "x": 50.0, "width": 200.0, "system_idx": 0,
             "note_positions": [[0.0, 60.0], [0.5, 150.0]]},
            {"measure_idx": 1, "x": 250.0, "width": 180.0, "system_idx": 0}
        ],
        "systems": [{"y": 100.0, "height": 40.0}],
        "timemap": [
            {"index": 0, "original_index": 0, "timestamp_ms": 0.0, "duration_ms": 2000.0, "tempo_bpm": 120.0},
            {"index": 1, "original_index": 1, "timestamp_ms": 2000.0, "duration_ms": 2000.0, "tempo_bpm": 120.0},
            {"index": 2, "original_index": 0, "timestamp_ms": 4000.0, "duration_ms": 2000.0, "tempo_bpm": 120.0}
        ]
    }"#;
    let map = PlaybackMap::from_json(json).unwrap();

    assert_eq!(map.measures().len(), 2);
    assert_eq!(map.systems().len(), 1);
    assert_eq!(map.timemap().len(), 3);
    assert_eq!(map.total_duration_ms(), 6000.0);
    assert_eq!(map.measure(0).unwrap().note_positions.len(), 2);
    assert!(map.measure(1).unwrap().note_positions.is_empty());
    assert!(map.measure(7).is_none());
}

#[test]
fn test_map_json_round_trip_keeps_lookup() {
    let map = repeated_section_map();
    let reparsed = PlaybackMap::from_json(&map.to_json()).unwrap();
    assert_eq!(reparsed.timemap(), map.timemap());
    assert_eq!(reparsed.measure(2), map.measure(2));
}

#[test]
fn test_map_syntax_error_has_location() {
    let result = PlaybackMap::from_json("{\n  \"measures\": [,]\n}");
    match result {
        Err(SyncError::MapParseError { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected MapParseError, got {:?}", other),
    }
}

#[test]
fn test_empty_map_is_valid() {
    let map = PlaybackMap::from_json("{}").unwrap();
    assert_eq!(map.total_duration_ms(), 0.0);
    assert!(map.timemap().is_empty());
}

#[test]
fn test_timemap_must_not_go_backwards() {
    let result = PlaybackMap::new(
        vec![measure(0, 0.0, 100.0, 0)],
        vec![SystemBox { y: 0.0, height: 40.0 }],
        vec![entry(0, 0, 1000.0, 500.0), entry(1, 0, 900.0, 500.0)],
    );
    assert!(matches!(result, Err(SyncError::InvalidMap(_))));
}

#[test]
fn test_equal_timestamps_allowed() {
    let result = PlaybackMap::new(
        vec![measure(0, 0.0, 100.0, 0)],
        vec![SystemBox { y: 0.0, height: 40.0 }],
        vec![entry(0, 0, 0.0, 0.0), entry(1, 0, 0.0, 500.0)],
    );
    assert!(result.is_ok());
}

#[test]
fn test_negative_duration_rejected() {
    let result = PlaybackMap::new(
        vec![measure(0, 0.0, 100.0, 0)],
        vec![SystemBox { y: 0.0, height: 40.0 }],
        vec![entry(0, 0, 0.0, -1.0)],
    );
    assert!(matches!(result, Err(SyncError::InvalidMap(_))));
}

#[test]
fn test_unknown_original_index_rejected() {
    let result = PlaybackMap::new(
        vec![measure(0, 0.0, 100.0, 0)],
        vec![SystemBox { y: 0.0, height: 40.0 }],
        vec![entry(0, 3, 0.0, 1000.0)],
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("unknown measure 3"), "{}", err);
}

#[test]
fn test_unordered_note_positions_rejected() {
    let mut m = measure(0, 0.0, 100.0, 0);
    m.note_positions = vec![(0.0, 10.0), (0.5, 50.0), (0.5, 60.0)];
    let result = PlaybackMap::new(
        vec![m],
        vec![SystemBox { y: 0.0, height: 40.0 }],
        vec![entry(0, 0, 0.0, 1000.0)],
    );
    assert!(matches!(result, Err(SyncError::InvalidMap(_))));
}

#[test]
fn test_missing_system_is_tolerated() {
    let result = PlaybackMap::new(
        vec![measure(0, 0.0, 100.0, 4)],
        vec![SystemBox { y: 0.0, height: 40.0 }],
        vec![entry(0, 0, 0.0, 1000.0)],
    );
    let map = result.unwrap();
    assert!(map.system(4).is_none());
}

#[test]
fn test_duplicate_measure_rejected() {
    let result = PlaybackMap::new(
        vec![measure(0, 0.0, 100.0, 0), measure(0, 100.0, 100.0, 0)],
        vec![SystemBox { y: 0.0, height: 40.0 }],
        vec![],
    );
    assert!(matches!(result, Err(SyncError::InvalidMap(_))));
}
