//! # Score Sync
//!
//! [`ScoreSync`] ties one document together: its [`PlaybackMap`], the
//! [`PlaybackSession`] that owns the transport, and the [`CursorDriver`]
//! that feeds the rendering surface.
//!
//! Every control entry point supersedes any outstanding surface call,
//! forwards to the session, and then brings the surface up to date in one
//! transition. A burst of entry points against a slow surface still leaves
//! at most one call outstanding. [`ScoreSync::tick`] should be called at
//! [`SyncConfig::tick_interval`].
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use scoresync::clock::{ManualClock, SharedClock};
//! use scoresync::surface::{CallTicket, RenderingSurface};
//! use scoresync::cursor::CursorPosition;
//! use scoresync::transport::{Capabilities, SimulatedPlayer, StrategyTransport};
//! use scoresync::{PlaybackMap, ScoreSync, SyncConfig};
//!
//! #[derive(Default)]
//! struct Log(Vec<f64>);
//!
//! impl RenderingSurface for Log {
//!     fn update_position(&mut self, time_ms: f64, _: Option<CursorPosition>, _: CallTicket) {
//!         self.0.push(time_ms);
//!     }
//!     fn scroll_to_system(&mut self, _: usize) {}
//!     fn begin_animation(&mut self, _: f64, _: f64) {}
//!     fn freeze_at(&mut self, _: f64) {}
//! }
//!
//! let map = PlaybackMap::from_json(r#"{
//!   "measures": [{"measure_idx": 0, "x": 0.0, "width": 100.0, "system_idx": 0}],
//!   "systems": [{"y": 0.0, "height": 40.0}],
//!   "timemap": [{"index": 0, "original_index": 0, "timestamp_ms": 0.0,
//!                "duration_ms": 2000.0, "tempo_bpm": 120.0}]
//! }"#).unwrap();
//!
//! let clock = ManualClock::new();
//! let shared: SharedClock = Arc::new(clock.clone());
//! let player = SimulatedPlayer::new(shared.clone(), Capabilities::FULL);
//! let transport = StrategyTransport::new(player, shared.clone());
//! let mut sync = ScoreSync::new(Arc::new(map), transport, Log::default(), shared, SyncConfig::default());
//!
//! // the tap resolves, but with no audio loaded the seek is a no-op
//! assert_eq!(sync.tap(50.0, 20.0), Some(1000.0));
//! assert_eq!(sync.position_ms(), 0.0);
//! ```

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::map::PlaybackMap;
use crate::seek::{resolve_seek, TapPoint};
use crate::session::{PlaybackSession, PlaybackState, SessionEvent};
use crate::surface::{CursorDriver, RenderingSurface};
use crate::transport::Transport;

pub struct ScoreSync<T: Transport, S: RenderingSurface> {
    map: Arc<PlaybackMap>,
    session: PlaybackSession<T>,
    driver: CursorDriver,
    surface: S,
    clock: SharedClock,
    config: SyncConfig,
    events: Vec<SessionEvent>,
}

impl<T: Transport, S: RenderingSurface> ScoreSync<T, S> {
    pub fn new(
        map: Arc<PlaybackMap>,
        transport: T,
        surface: S,
        clock: SharedClock,
        config: SyncConfig,
    ) -> Self {
        let session = PlaybackSession::new(transport, Arc::clone(&clock), &config);
        let driver = CursorDriver::new(
            config.cadence,
            config.system_margin,
            config.drift_tolerance_ms,
            Arc::clone(&clock),
        );
        Self {
            map,
            session,
            driver,
            surface,
            clock,
            config,
            events: Vec::new(),
        }
    }

    /// Prepare the audio asset for the current document.
    pub fn load_asset(&mut self, asset: &[u8]) -> Result<f64, SyncError> {
        self.driver.reset();
        let result = self.session.load(asset);
        self.transition();
        result
    }

    /// Switch to another document. The old session is torn down completely,
    /// transport included, before `make_transport` builds the new one.
    pub fn load_document<F>(
        &mut self,
        map: Arc<PlaybackMap>,
        make_transport: F,
        asset: &[u8],
    ) -> Result<f64, SyncError>
    where
        F: FnOnce() -> T,
    {
        self.session.teardown();
        self.events.extend(self.session.take_events());
        let transport = make_transport();
        self.session = PlaybackSession::new(transport, Arc::clone(&self.clock), &self.config);
        self.map = map;
        log::info!(
            "document switched: {} measures, {} timemap entries",
            self.map.measures().len(),
            self.map.timemap().len()
        );
        self.load_asset(asset)
    }

    pub fn play(&mut self) {
        self.driver.cancel_in_flight();
        self.session.play();
        self.transition();
    }

    pub fn pause(&mut self) {
        self.driver.cancel_in_flight();
        self.session.pause();
        self.transition();
    }

    pub fn stop(&mut self) {
        self.driver.cancel_in_flight();
        self.session.stop();
        self.transition();
    }

    pub fn seek(&mut self, target_ms: f64) {
        self.driver.cancel_in_flight();
        self.session.seek(target_ms);
        self.transition();
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<(), SyncError> {
        self.driver.cancel_in_flight();
        let result = self.session.set_speed(speed);
        self.config.speed = self.session.speed();
        self.transition();
        result
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.driver.cancel_in_flight();
        self.session.set_muted(muted);
        self.config.muted = muted;
        self.transition();
    }

    pub fn set_repeat_count(&mut self, count: u32) {
        self.driver.cancel_in_flight();
        self.session.set_repeat_count(count);
        self.config.repeat_count = self.session.repeat_total();
        self.transition();
    }

    pub fn interrupt(&mut self) {
        self.driver.cancel_in_flight();
        self.session.interrupt();
        self.transition();
    }

    pub fn resume_after_interruption(&mut self) {
        self.driver.cancel_in_flight();
        self.session.resume_after_interruption();
        self.transition();
    }

    /// Seek to the music time under a tap on the score. Returns the target,
    /// or `None` if the tap missed every measure.
    pub fn tap(&mut self, x: f64, y: f64) -> Option<f64> {
        let target = resolve_seek(
            &self.map,
            TapPoint::new(x, y),
            self.config.system_margin,
            self.config.seek_policy,
            self.session.position_ms(),
        );
        match target {
            Some(target_ms) => {
                log::debug!("tap ({}, {}) -> {:.1} ms", x, y, target_ms);
                self.seek(target_ms);
            }
            None => log::debug!("tap ({}, {}) hit no measure", x, y),
        }
        target
    }

    pub fn tick(&mut self) {
        self.session.tick();
        let events = self.session.take_events();
        if !events.is_empty() {
            self.events.extend(events);
            self.refresh_surface();
            return;
        }
        let time_ms = self.session.position_ms();
        let advancing = self.session.is_advancing();
        self.driver
            .on_tick(&mut self.surface, &self.map, time_ms, advancing, self.session.speed());
    }

    /// Events produced since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn position_ms(&self) -> f64 {
        self.session.position_ms()
    }

    pub fn state(&self) -> PlaybackState {
        self.session.state()
    }

    pub fn session(&self) -> &PlaybackSession<T> {
        &self.session
    }

    pub fn map(&self) -> &Arc<PlaybackMap> {
        &self.map
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn skipped_updates(&self) -> u64 {
        self.driver.skipped_updates()
    }

    fn transition(&mut self) {
        self.events.extend(self.session.take_events());
        self.refresh_surface();
    }

    fn refresh_surface(&mut self) {
        let time_ms = self.session.position_ms();
        let advancing = self.session.is_advancing();
        let rate = self.session.speed();
        self.driver
            .on_transition(&mut self.surface, &self.map, time_ms, advancing, rate);
    }
}
