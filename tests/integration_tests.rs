//! Integration tests for scoresync
//!
//! Drives whole documents through `ScoreSync`: playback map JSON in, a
//! simulated engine on a manual clock underneath, and a recording surface on
//! top.

use std::sync::Arc;

use scoresync::clock::{ManualClock, SharedClock};
use scoresync::cursor::CursorPosition;
use scoresync::surface::{CallTicket, RenderingSurface};
use scoresync::transport::{Capabilities, SimulatedPlayer, StrategyTransport};
use scoresync::{
    resolve_cursor, PlaybackMap, PlaybackState, ScoreSync, SessionEvent, SyncConfig, SyncError,
};

/// Two measures on the first line, repeated, then two on the second line.
const REPEATED_MAP: &str = r#"{
  "measures": [
    {"measure_idx": 0, "x": 50.0,  "width": 200.0, "system_idx": 0},
    {"measure_idx": 1, "x": 250.0, "width": 200.0, "system_idx": 0},
    {"measure_idx": 2, "x": 50.0,  "width": 300.0, "system_idx": 1,
     "note_positions": [[0.0, 60.0], [0.5, 120.0], [0.75, 300.0]]},
    {"measure_idx": 3, "x": 350.0, "width": 100.0, "system_idx": 1}
  ],
  "systems": [{"y": 100.0, "height": 40.0}, {"y": 250.0, "height": 40.0}],
  "timemap": [
    {"index": 0, "original_index": 0, "timestamp_ms": 0.0,    "duration_ms": 2000.0, "tempo_bpm": 120.0},
    {"index": 1, "original_index": 1, "timestamp_ms": 2000.0, "duration_ms": 2000.0, "tempo_bpm": 120.0},
    {"index": 2, "original_index": 0, "timestamp_ms": 4000.0, "duration_ms": 2000.0, "tempo_bpm": 120.0},
    {"index": 3, "original_index": 1, "timestamp_ms": 6000.0, "duration_ms": 2000.0, "tempo_bpm": 120.0},
    {"index": 4, "original_index": 2, "timestamp_ms": 8000.0, "duration_ms": 2000.0, "tempo_bpm": 120.0},
    {"index": 5, "original_index": 3, "timestamp_ms": 10000.0, "duration_ms": 1000.0, "tempo_bpm": 60.0}
  ]
}"#;

/// Type 1 file, 480 ticks per quarter, 120 BPM, one note held to `end_tick`.
fn smf(end_tick: u32) -> Vec<u8> {
    fn vlq(mut value: u32) -> Vec<u8> {
        let mut bytes = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            bytes.push(((value & 0x7F) as u8) | 0x80);
            value >>= 7;
        }
        bytes.reverse();
        bytes
    }
    fn chunk(id: &[u8], data: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(data);
        out
    }

    let mut tempo = vec![0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20];
    tempo.extend(vlq(end_tick));
    tempo.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    let mut notes = vec![0x00, 0x90, 60, 100];
    notes.extend(vlq(end_tick));
    notes.extend_from_slice(&[0x80, 60, 0, 0x00, 0xFF, 0x2F, 0x00]);

    let mut out = chunk(b"MThd", &[0, 1, 0, 2, 0x01, 0xE0]);
    out.extend(chunk(b"MTrk", &tempo));
    out.extend(chunk(b"MTrk", &notes));
    out
}

/// 11 seconds of audio, matching `REPEATED_MAP`.
fn repeated_asset() -> Vec<u8> {
    smf(22 * 480)
}

#[derive(Default)]
struct Recorder {
    updates: Vec<(f64, Option<CursorPosition>)>,
    scrolls: Vec<usize>,
    held: Vec<CallTicket>,
    hold: bool,
}

impl RenderingSurface for Recorder {
    fn update_position(&mut self, time_ms: f64, cursor: Option<CursorPosition>, ticket: CallTicket) {
        self.updates.push((time_ms, cursor));
        if self.hold {
            self.held.push(ticket);
        }
    }

    fn scroll_to_system(&mut self, system_idx: usize) {
        self.scrolls.push(system_idx);
    }

    fn begin_animation(&mut self, _from_ms: f64, _rate: f64) {}

    fn freeze_at(&mut self, _at_ms: f64) {}
}

type Harness = ScoreSync<StrategyTransport<SimulatedPlayer>, Recorder>;

fn setup(capabilities: Capabilities, config: SyncConfig) -> (Harness, ManualClock) {
    let map = PlaybackMap::from_json(REPEATED_MAP).unwrap();
    let clock = ManualClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let player = SimulatedPlayer::new(Arc::clone(&shared), capabilities);
    let transport = StrategyTransport::new(player, Arc::clone(&shared));
    let mut sync = ScoreSync::new(Arc::new(map), transport, Recorder::default(), shared, config);
    sync.load_asset(&repeated_asset()).unwrap();
    sync.take_events();
    (sync, clock)
}

fn run(sync: &mut Harness, clock: &ManualClock, ms: u64) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    for _ in 0..ms / 16 {
        clock.advance_ms(16);
        sync.tick();
        events.extend(sync.take_events());
    }
    events
}

#[test]
fn test_cursor_lookup_worked_example() {
    let json = r#"{
      "measures": [
        {"measure_idx": 0, "x": 0.0,   "width": 100.0, "system_idx": 0},
        {"measure_idx": 1, "x": 100.0, "width": 100.0, "system_idx": 0},
        {"measure_idx": 2, "x": 200.0, "width": 100.0, "system_idx": 0}
      ],
      "systems": [{"y": 0.0, "height": 50.0}],
      "timemap": [
        {"index": 0, "original_index": 0, "timestamp_ms": 0.0,    "duration_ms": 1000.0, "tempo_bpm": 120.0},
        {"index": 1, "original_index": 1, "timestamp_ms": 1000.0, "duration_ms": 500.0,  "tempo_bpm": 120.0},
        {"index": 2, "original_index": 2, "timestamp_ms": 1500.0, "duration_ms": 2000.0, "tempo_bpm": 120.0}
      ]
    }"#;
    let map = PlaybackMap::from_json(json).unwrap();
    let cursor = resolve_cursor(&map, 1200.0, 0.0).unwrap();
    assert_eq!(cursor.timemap_index, 1);
    assert!((cursor.ratio - 0.4).abs() < 1e-9);
    assert!((cursor.x - 140.0).abs() < 1e-9);
}

#[test]
fn test_invalid_map_is_rejected() {
    let json = REPEATED_MAP.replace("\"timestamp_ms\": 6000.0", "\"timestamp_ms\": 1000.0");
    let result = PlaybackMap::from_json(&json);
    assert!(matches!(result, Err(SyncError::InvalidMap(_))));
}

#[test]
fn test_full_playback_with_repeats() {
    let config = SyncConfig::from_yaml("repeat-count: 2\nrestart-delay-ms: 100").unwrap();
    let (mut sync, clock) = setup(Capabilities::FULL, config);
    sync.play();
    let events = run(&mut sync, &clock, 25_000);

    let completions: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Completed { .. }))
        .collect();
    assert_eq!(completions.len(), 2);
    assert_eq!(sync.state(), PlaybackState::Stopped);
    assert_eq!(sync.position_ms(), 0.0);

    // each pass scrolls to system 0, then system 1, and stopping returns to the top
    assert_eq!(sync.surface().scrolls, vec![0, 1, 0, 1, 0]);
}

#[test]
fn test_tempo_rewrite_engine_plays_faster() {
    let config = SyncConfig {
        speed: 2.0,
        ..SyncConfig::default()
    };
    let (mut sync, clock) = setup(Capabilities::MINIMAL, config);
    assert!((sync.session().duration_ms() - 11_000.0).abs() < 1e-6);

    sync.play();
    let events = run(&mut sync, &clock, 6000);
    assert!(events.contains(&SessionEvent::Completed { remaining: 0 }));
    assert_eq!(sync.state(), PlaybackState::Stopped);
}

#[test]
fn test_tap_round_trip_through_transport() {
    let (mut sync, _) = setup(Capabilities::FULL, SyncConfig::default());

    // second pass, measure 1: stays in the second pass
    sync.seek(6100.0);
    let target = sync.tap(350.0, 120.0).unwrap();
    assert!((target - 7000.0).abs() < 1e-6);
    assert!((sync.position_ms() - 7000.0).abs() < 1e-6);

    let (_, cursor) = sync.surface().updates.last().copied().unwrap();
    let cursor = cursor.unwrap();
    assert!((cursor.x - 350.0).abs() < 1e-6);
    assert_eq!(cursor.timemap_index, 3);
}

#[test]
fn test_tap_with_first_match_policy() {
    let config = SyncConfig::from_yaml("seek-policy: first-match").unwrap();
    let (mut sync, _) = setup(Capabilities::FULL, config);
    sync.seek(6100.0);
    let target = sync.tap(350.0, 120.0).unwrap();
    assert!((target - 3000.0).abs() < 1e-6);
}

#[test]
fn test_speed_change_mid_play_keeps_cursor() {
    let (mut sync, clock) = setup(Capabilities::MINIMAL, SyncConfig::default());
    sync.play();
    run(&mut sync, &clock, 1600);
    let before = sync.position_ms();

    sync.set_speed(0.5).unwrap();
    assert!((sync.position_ms() - before).abs() < 1.0);
    assert_eq!(sync.state(), PlaybackState::Playing);

    run(&mut sync, &clock, 1600);
    assert!((sync.position_ms() - (before + 800.0)).abs() < 1.0);
}

#[test]
fn test_mute_does_not_move_cursor() {
    let (mut sync, clock) = setup(Capabilities::MINIMAL, SyncConfig::default());
    sync.play();
    run(&mut sync, &clock, 1600);
    let before = sync.position_ms();

    sync.set_muted(true);
    assert!((sync.position_ms() - before).abs() < 1e-6);
    run(&mut sync, &clock, 1600);
    sync.set_muted(false);
    assert!((sync.position_ms() - (before + 1600.0)).abs() < 1.0);
}

#[test]
fn test_stop_twice_is_stable() {
    let (mut sync, clock) = setup(Capabilities::FULL, SyncConfig::default());
    sync.play();
    run(&mut sync, &clock, 800);
    sync.stop();
    sync.take_events();

    sync.stop();
    assert!(sync.take_events().is_empty());
    assert_eq!(sync.state(), PlaybackState::Stopped);
    assert_eq!(sync.position_ms(), 0.0);
}

#[test]
fn test_slow_surface_never_has_two_calls_outstanding() {
    let (mut sync, clock) = setup(Capabilities::FULL, SyncConfig::default());
    sync.surface_mut().hold = true;
    sync.play();
    run(&mut sync, &clock, 320);

    assert_eq!(sync.surface().updates.len(), 1);
    assert_eq!(sync.skipped_updates(), 20);

    sync.surface_mut().held.clear();
    run(&mut sync, &clock, 16);
    assert_eq!(sync.surface().updates.len(), 2);
}

#[test]
fn test_seek_burst_against_slow_surface_stays_bounded() {
    let (mut sync, clock) = setup(Capabilities::FULL, SyncConfig::default());
    sync.surface_mut().hold = true;
    sync.play();
    for target in [1000.0, 3000.0, 5000.0, 7000.0] {
        sync.seek(target);
    }
    sync.tap(350.0, 120.0);
    run(&mut sync, &clock, 160);

    assert_eq!(sync.surface().held.len(), 1);
    assert_eq!(sync.surface().updates.len(), 1);
    assert!(!sync.surface().held[0].is_current());

    sync.surface_mut().held.clear();
    run(&mut sync, &clock, 16);
    assert_eq!(sync.surface().held.len(), 1);
    let (time_ms, _) = sync.surface().updates[1];
    assert!((time_ms - sync.position_ms()).abs() < 1e-6);
}

#[test]
fn test_broken_asset_leaves_document_inert() {
    let map = PlaybackMap::from_json(REPEATED_MAP).unwrap();
    let clock = ManualClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let player = SimulatedPlayer::new(Arc::clone(&shared), Capabilities::FULL);
    let transport = StrategyTransport::new(player, Arc::clone(&shared));
    let mut sync = ScoreSync::new(
        Arc::new(map),
        transport,
        Recorder::default(),
        shared,
        SyncConfig::default(),
    );

    let err = sync.load_asset(b"MThd").unwrap_err();
    assert!(matches!(err, SyncError::TransportInitError(_)));

    sync.play();
    run(&mut sync, &clock, 160);
    assert_eq!(sync.state(), PlaybackState::Stopped);
    assert_eq!(sync.position_ms(), 0.0);
}
