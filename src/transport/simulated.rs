//! A software [`NativePlayer`] driven by a [`Clock`](crate::clock::Clock).
//!
//! It does not synthesize anything. It knows the file's duration, advances
//! its position with the clock while running, and calls the finish handler
//! both when it reaches the end and when it is halted, the way several
//! platform engines do. Time only moves when it is observed, so with a
//! [`ManualClock`](crate::clock::ManualClock) every run is deterministic.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{Capabilities, FinishHandler, NativePlayer};
use crate::clock::{elapsed_ms, SharedClock};
use crate::error::SyncError;
use crate::midi;

#[derive(Debug)]
struct SimState {
    loaded: bool,
    duration_ms: f64,
    /// Native position at `running_since`, or the resting position.
    position_ms: f64,
    running_since: Option<Instant>,
    rate: f64,
    gain: f32,
    load_count: usize,
    midi_messages: usize,
    fail_loads: bool,
}

impl SimState {
    /// Move the position up to `now`. Returns true if the end was reached.
    fn advance(&mut self, now: Instant) -> bool {
        let Some(since) = self.running_since else {
            return false;
        };
        self.position_ms += elapsed_ms(since, now) * self.rate;
        if self.position_ms >= self.duration_ms {
            self.position_ms = self.duration_ms;
            self.running_since = None;
            true
        } else {
            self.running_since = Some(now);
            false
        }
    }
}

pub struct SimulatedPlayer {
    clock: SharedClock,
    capabilities: Capabilities,
    state: Arc<Mutex<SimState>>,
    finish_handler: Arc<Mutex<Option<FinishHandler>>>,
}

impl SimulatedPlayer {
    pub fn new(clock: SharedClock, capabilities: Capabilities) -> Self {
        Self {
            clock,
            capabilities,
            state: Arc::new(Mutex::new(SimState {
                loaded: false,
                duration_ms: 0.0,
                position_ms: 0.0,
                running_since: None,
                rate: 1.0,
                gain: 1.0,
                load_count: 0,
                midi_messages: 0,
                fail_loads: false,
            })),
            finish_handler: Arc::new(Mutex::new(None)),
        }
    }

    /// A handle for inspecting the player after it has been moved into a
    /// transport.
    pub fn probe(&self) -> PlayerProbe {
        PlayerProbe {
            state: Arc::clone(&self.state),
        }
    }

    /// Advance and, if the end was reached, notify. The state lock is
    /// released before the handler runs.
    fn sync_to_clock(&self) {
        let finished = self.state.lock().advance(self.clock.now());
        if finished {
            log::debug!("simulated player reached the end");
            self.notify_finished();
        }
    }

    fn notify_finished(&self) {
        if let Some(handler) = self.finish_handler.lock().as_mut() {
            handler();
        }
    }
}

impl NativePlayer for SimulatedPlayer {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn load(&mut self, bytes: &[u8]) -> Result<f64, SyncError> {
        let mut state = self.state.lock();
        if state.fail_loads {
            return Err(SyncError::TransportInitError(
                "simulated engine refused the asset".to_string(),
            ));
        }
        let duration = midi::inspect(bytes)?.duration_ms();
        state.loaded = true;
        state.duration_ms = duration;
        state.position_ms = 0.0;
        state.running_since = None;
        state.load_count += 1;
        Ok(duration)
    }

    fn unload(&mut self) {
        let mut state = self.state.lock();
        state.loaded = false;
        state.duration_ms = 0.0;
        state.position_ms = 0.0;
        state.running_since = None;
    }

    fn start(&mut self) {
        let mut state = self.state.lock();
        if !state.loaded || state.running_since.is_some() {
            return;
        }
        state.running_since = Some(self.clock.now());
    }

    fn halt(&mut self) {
        let was_running = {
            let mut state = self.state.lock();
            state.advance(self.clock.now());
            state.running_since.take().is_some()
        };
        if was_running {
            self.notify_finished();
        }
    }

    fn position_ms(&self) -> f64 {
        self.sync_to_clock();
        self.state.lock().position_ms
    }

    fn set_position_ms(&mut self, position_ms: f64) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.advance(now);
        state.position_ms = position_ms.clamp(0.0, state.duration_ms);
        if state.running_since.is_some() {
            state.running_since = Some(now);
        }
    }

    fn is_running(&self) -> bool {
        self.sync_to_clock();
        self.state.lock().running_since.is_some()
    }

    fn set_rate(&mut self, rate: f64) {
        if !self.capabilities.rate_control {
            log::warn!("simulated engine has no rate control, ignoring rate {}", rate);
            return;
        }
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.advance(now);
        state.rate = rate;
    }

    fn set_gain(&mut self, gain: f32) {
        if !self.capabilities.silent_output {
            log::warn!("simulated engine cannot run silently, ignoring gain {}", gain);
            return;
        }
        self.state.lock().gain = gain;
    }

    fn send_midi(&mut self, _message: &[u8; 3]) {
        self.state.lock().midi_messages += 1;
    }

    fn set_finish_handler(&mut self, handler: FinishHandler) {
        *self.finish_handler.lock() = Some(handler);
    }
}

/// Read-only view of a [`SimulatedPlayer`]'s internals, plus a switch to make
/// later loads fail.
#[derive(Clone)]
pub struct PlayerProbe {
    state: Arc<Mutex<SimState>>,
}

impl PlayerProbe {
    pub fn load_count(&self) -> usize {
        self.state.lock().load_count
    }

    /// Channel messages sent so far. Each sound flush sends 48.
    pub fn midi_messages(&self) -> usize {
        self.state.lock().midi_messages
    }

    pub fn gain(&self) -> f32 {
        self.state.lock().gain
    }

    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    /// Whether the engine is producing sound, as of its last observation.
    pub fn is_running(&self) -> bool {
        self.state.lock().running_since.is_some()
    }

    /// Native duration of the loaded file.
    pub fn native_duration_ms(&self) -> f64 {
        self.state.lock().duration_ms
    }

    pub fn fail_loads(&self, fail: bool) {
        self.state.lock().fail_loads = fail;
    }
}
