//! # Session Module
//!
//! The position tracker: a small state machine that owns one [`Transport`]
//! and turns user commands and transport completions into a consistent
//! playback state.
//!
//! ## States
//! ```text
//! Stopped --play--> Playing --pause--> Paused --play--> Playing
//! Playing/Paused --stop--> Stopped
//! Playing --completion, passes left--> Playing (after the settle delay)
//! Playing --completion, last pass--> Stopped
//! ```
//!
//! ## Timing
//! The session never spawns threads or timers. The owner calls
//! [`PlaybackSession::tick`] at the cursor cadence; each tick drains
//! transport events, fires a due repeat restart, and polls for an end the
//! transport did not report. A repeat restart is tagged with the session
//! *generation*, and every command bumps the generation, so a restart can
//! never fire after the user has done something else.
//!
//! ## Position
//! `position_ms` is always read back from the transport and is music time,
//! independent of speed.

mod types;


use std::time::Duration;

use crate::clock::SharedClock;
use crate::config::{clamp_speed, SyncConfig};
use crate::error::SyncError;
use crate::transport::{Transport, TransportEvent};

pub use types::{PlaybackState, SessionEvent};
use types::PendingRestart;

/// Below this a `play()` from `Stopped` counts as starting from the top.
const START_THRESHOLD_MS: f64 = 1.0;

pub struct PlaybackSession<T: Transport> {
    transport: T,
    clock: SharedClock,
    state: PlaybackState,
    loaded: bool,
    duration_ms: f64,
    speed: f64,
    muted: bool,
    repeat_total: u32,
    repeat_remaining: u32,
    generation: u64,
    pending_restart: Option<PendingRestart>,
    restart_delay: Duration,
    end_epsilon_ms: f64,
    interrupted: bool,
    events: Vec<SessionEvent>,
}

impl<T: Transport> PlaybackSession<T> {
    pub fn new(mut transport: T, clock: SharedClock, config: &SyncConfig) -> Self {
        let speed = clamp_speed(config.speed);
        if let Err(e) = transport.set_rate(speed) {
            log::warn!("could not apply initial speed {}: {}", speed, e);
        }
        transport.set_muted(config.muted);
        let repeat_total = config.repeat_count.max(1);

        Self {
            transport,
            clock,
            state: PlaybackState::Stopped,
            loaded: false,
            duration_ms: 0.0,
            speed,
            muted: config.muted,
            repeat_total,
            repeat_remaining: repeat_total,
            generation: 0,
            pending_restart: None,
            restart_delay: config.restart_delay(),
            end_epsilon_ms: config.end_epsilon_ms,
            interrupted: false,
            events: Vec::new(),
        }
    }

    /// Prepare an audio asset. On failure the session stays `Stopped` with
    /// a zero duration and ignores transport commands until a load succeeds.
    pub fn load(&mut self, asset: &[u8]) -> Result<f64, SyncError> {
        self.cancel_pending_restart();
        self.interrupted = false;
        self.set_state(PlaybackState::Stopped);
        self.repeat_remaining = self.repeat_total;

        match self.transport.prepare(asset) {
            Ok(duration) => {
                self.loaded = true;
                self.duration_ms = duration;
                log::info!("session loaded, duration {:.1} ms", duration);
                self.events.push(SessionEvent::Loaded {
                    duration_ms: duration,
                });
                Ok(duration)
            }
            Err(e) => {
                self.loaded = false;
                self.duration_ms = 0.0;
                log::warn!("session load failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn play(&mut self) {
        self.cancel_pending_restart();
        if !self.loaded {
            log::warn!("play ignored: nothing loaded");
            return;
        }
        if self.state == PlaybackState::Playing {
            if !self.transport.is_playing() {
                // inside a settle delay: start the next pass now
                self.transport.play();
            }
            return;
        }
        // a pause between passes also sits at zero, so only a stopped
        // session starts the count over
        if self.state == PlaybackState::Stopped
            && self.transport.position_ms() < START_THRESHOLD_MS
        {
            self.repeat_remaining = self.repeat_total;
        }
        self.start_transport();
    }

    pub fn pause(&mut self) {
        self.cancel_pending_restart();
        if self.state != PlaybackState::Playing {
            return;
        }
        let position = self.transport.pause();
        log::debug!("paused at {:.1} ms", position);
        self.set_state(PlaybackState::Paused);
    }

    /// Halt and rewind. Calling it again is a no-op.
    pub fn stop(&mut self) {
        self.cancel_pending_restart();
        self.interrupted = false;
        if self.state == PlaybackState::Stopped {
            return;
        }
        self.transport.stop();
        self.repeat_remaining = self.repeat_total;
        self.set_state(PlaybackState::Stopped);
    }

    /// Jump to `target_ms` (clamped to the asset). Seeking away from zero
    /// while stopped leaves the session paused there.
    pub fn seek(&mut self, target_ms: f64) {
        let restart_was_pending = self.cancel_pending_restart();
        if !self.loaded {
            return;
        }
        if !target_ms.is_finite() {
            log::warn!("seek to non-finite position ignored");
            return;
        }

        let target = target_ms.clamp(0.0, self.duration_ms);
        self.transport.seek(target);
        self.events.push(SessionEvent::Seeked {
            position_ms: target,
        });

        match self.state {
            PlaybackState::Stopped if target > 0.0 => self.set_state(PlaybackState::Paused),
            PlaybackState::Playing if restart_was_pending || !self.transport.is_playing() => {
                self.transport.play();
            }
            _ => {}
        }
    }

    /// Change speed. Position is preserved. A failed tempo-rewrite reload
    /// leaves the session stopped with nothing loaded.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), SyncError> {
        let restart_was_pending = self.cancel_pending_restart();
        let speed = clamp_speed(speed);
        if speed == self.speed {
            self.rearm_restart(restart_was_pending);
            return Ok(());
        }
        self.speed = speed;

        if let Err(e) = self.transport.set_rate(speed) {
            log::warn!("speed change to {} failed: {}", speed, e);
            self.loaded = false;
            self.duration_ms = 0.0;
            self.set_state(PlaybackState::Stopped);
            return Err(e);
        }
        self.events.push(SessionEvent::SpeedChanged { speed });
        self.rearm_restart(restart_was_pending);
        Ok(())
    }

    pub fn set_muted(&mut self, muted: bool) {
        let restart_was_pending = self.cancel_pending_restart();
        if muted != self.muted {
            self.muted = muted;
            self.transport.set_muted(muted);
            self.events.push(SessionEvent::MuteChanged { muted });
        }
        self.rearm_restart(restart_was_pending);
    }

    /// Change the number of passes. Passes already played still count.
    pub fn set_repeat_count(&mut self, count: u32) {
        let restart_was_pending = self.cancel_pending_restart();
        let count = count.max(1);
        let completed = self.repeat_total.saturating_sub(self.repeat_remaining);
        self.repeat_total = count;
        self.repeat_remaining = count.saturating_sub(completed).max(1);
        log::debug!(
            "repeat count {}, {} passes remaining",
            self.repeat_total,
            self.repeat_remaining
        );
        self.rearm_restart(restart_was_pending);
    }

    /// Audio focus lost: pause and remember to come back.
    pub fn interrupt(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.pause();
        self.interrupted = true;
        self.events.push(SessionEvent::Interrupted {
            position_ms: self.position_ms(),
        });
    }

    /// Audio focus regained: resume from wherever the transport is.
    pub fn resume_after_interruption(&mut self) {
        if !self.interrupted {
            return;
        }
        self.interrupted = false;
        if self.state != PlaybackState::Paused {
            return;
        }
        self.cancel_pending_restart();
        self.start_transport();
    }

    /// Drain transport events, start a due repeat, and detect an end the
    /// transport did not report.
    pub fn tick(&mut self) {
        while let Some(event) = self.transport.try_next_event() {
            match event {
                TransportEvent::NaturalCompletion { epoch } => {
                    if epoch == self.transport.epoch()
                        && self.state == PlaybackState::Playing
                        && self.pending_restart.is_none()
                    {
                        self.on_completion();
                    } else {
                        log::debug!("ignoring stale completion from epoch {}", epoch);
                    }
                }
            }
        }

        if let Some(pending) = self.pending_restart {
            if pending.generation == self.generation && self.clock.now() >= pending.due {
                self.pending_restart = None;
                self.transport.play();
                let pass = self.repeat_total - self.repeat_remaining + 1;
                log::debug!("repeat pass {} of {}", pass, self.repeat_total);
                self.events.push(SessionEvent::Restarted { pass });
            }
        }

        if self.state == PlaybackState::Playing
            && self.pending_restart.is_none()
            && self.loaded
            && !self.transport.is_playing()
            && self.transport.position_ms() >= self.duration_ms - self.end_epsilon_ms
        {
            log::debug!("end of playback detected by polling");
            self.on_completion();
        }
    }

    /// Drop the transport's asset and forget everything loaded.
    pub fn teardown(&mut self) {
        self.cancel_pending_restart();
        self.transport.release();
        self.loaded = false;
        self.duration_ms = 0.0;
        self.interrupted = false;
        self.set_state(PlaybackState::Stopped);
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn position_ms(&self) -> f64 {
        if !self.loaded {
            return 0.0;
        }
        self.transport.position_ms()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// `Playing` and the transport is actually producing time, i.e. not
    /// inside a repeat settle delay.
    pub fn is_advancing(&self) -> bool {
        self.state == PlaybackState::Playing && self.transport.is_playing()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn repeat_total(&self) -> u32 {
        self.repeat_total
    }

    pub fn repeat_remaining(&self) -> u32 {
        self.repeat_remaining
    }

    pub fn is_restart_pending(&self) -> bool {
        self.pending_restart.is_some()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn start_transport(&mut self) {
        self.transport.play();
        self.interrupted = false;
        self.set_state(PlaybackState::Playing);
    }

    fn on_completion(&mut self) {
        self.repeat_remaining = self.repeat_remaining.saturating_sub(1);
        self.events.push(SessionEvent::Completed {
            remaining: self.repeat_remaining,
        });

        if self.repeat_remaining > 0 {
            self.transport.seek(0.0);
            self.schedule_restart();
        } else {
            log::debug!("all {} passes played", self.repeat_total);
            self.transport.stop();
            self.repeat_remaining = self.repeat_total;
            self.set_state(PlaybackState::Stopped);
        }
    }

    fn schedule_restart(&mut self) {
        self.generation += 1;
        self.pending_restart = Some(PendingRestart {
            due: self.clock.now() + self.restart_delay,
            generation: self.generation,
        });
    }

    /// Returns whether a restart was waiting.
    fn cancel_pending_restart(&mut self) -> bool {
        self.generation += 1;
        self.pending_restart.take().is_some()
    }

    fn rearm_restart(&mut self, was_pending: bool) {
        if was_pending && self.loaded && self.state == PlaybackState::Playing {
            self.schedule_restart();
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            log::debug!("session {:?} -> {:?}", self.state, state);
            self.state = state;
            self.events.push(SessionEvent::StateChanged { state });
        }
    }
}
