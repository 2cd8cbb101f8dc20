use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use super::{Capabilities, NativePlayer, Transport, TransportEvent};
use crate::clock::{elapsed_ms, SharedClock};
use crate::config::clamp_speed;
use crate::error::SyncError;
use crate::midi::{self, SILENCE_MESSAGES};

/// Room for completions that arrive between two ticks. Anything beyond this
/// is necessarily stale and is dropped.
const EVENT_QUEUE_CAPACITY: usize = 8;

const RATE_EPSILON: f64 = 1e-9;

/// How playback speed is realised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedStrategy {
    /// The engine's rate property. Native position is music time.
    NativeRate,
    /// Tempo events are scaled and the file reloaded.
    /// Native position is music time divided by speed.
    TempoRewrite,
}

/// How mute is realised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteStrategy {
    /// Output gain goes to zero and the engine keeps running.
    GainZero,
    /// The engine is halted and position advances on the clock.
    VirtualClock,
}

impl SpeedStrategy {
    pub fn for_capabilities(capabilities: Capabilities) -> Self {
        if capabilities.rate_control {
            SpeedStrategy::NativeRate
        } else {
            SpeedStrategy::TempoRewrite
        }
    }
}

impl MuteStrategy {
    pub fn for_capabilities(capabilities: Capabilities) -> Self {
        if capabilities.silent_output {
            MuteStrategy::GainZero
        } else {
            MuteStrategy::VirtualClock
        }
    }
}

/// Where the virtual clock was last pinned, in music time.
#[derive(Debug, Clone, Copy)]
struct VirtualAnchor {
    position_ms: f64,
    at: Instant,
    running: bool,
}

/// A [`Transport`] over any [`NativePlayer`], filling capability gaps with
/// the strategies chosen at construction.
pub struct StrategyTransport<P: NativePlayer> {
    player: P,
    clock: SharedClock,
    speed_strategy: SpeedStrategy,
    mute_strategy: MuteStrategy,
    /// Unscaled asset, kept for tempo rewrites.
    source: Vec<u8>,
    loaded: bool,
    duration_ms: f64,
    rate: f64,
    muted: bool,
    /// Set by `play`, cleared by `pause` and `stop`.
    playing: bool,
    /// Present while muted under the virtual clock strategy.
    anchor: Option<VirtualAnchor>,
    epoch: Arc<AtomicU64>,
    /// Epoch whose natural end should be reported.
    armed: Arc<AtomicU64>,
    events: Receiver<TransportEvent>,
}

impl<P: NativePlayer> StrategyTransport<P> {
    pub fn new(mut player: P, clock: SharedClock) -> Self {
        let capabilities = player.capabilities();
        let speed_strategy = SpeedStrategy::for_capabilities(capabilities);
        let mute_strategy = MuteStrategy::for_capabilities(capabilities);
        log::debug!(
            "transport strategies: speed {:?}, mute {:?}",
            speed_strategy,
            mute_strategy
        );

        let epoch = Arc::new(AtomicU64::new(1));
        let armed = Arc::new(AtomicU64::new(0));
        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);
        player.set_finish_handler(completion_handler(
            Arc::clone(&epoch),
            Arc::clone(&armed),
            tx,
        ));

        Self {
            player,
            clock,
            speed_strategy,
            mute_strategy,
            source: Vec::new(),
            loaded: false,
            duration_ms: 0.0,
            rate: 1.0,
            muted: false,
            playing: false,
            anchor: None,
            epoch,
            armed,
            events: rx,
        }
    }

    pub fn speed_strategy(&self) -> SpeedStrategy {
        self.speed_strategy
    }

    pub fn mute_strategy(&self) -> MuteStrategy {
        self.mute_strategy
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Report the natural end of the current run.
    fn arm(&self) {
        self.armed
            .store(self.epoch.load(Ordering::Acquire), Ordering::Release);
    }

    fn flush_sound(&mut self) {
        for message in SILENCE_MESSAGES.iter() {
            self.player.send_midi(message);
        }
    }

    fn native_to_music(&self, native_ms: f64) -> f64 {
        match self.speed_strategy {
            SpeedStrategy::NativeRate => native_ms,
            SpeedStrategy::TempoRewrite => native_ms * self.rate,
        }
    }

    fn music_to_native(&self, music_ms: f64) -> f64 {
        match self.speed_strategy {
            SpeedStrategy::NativeRate => music_ms,
            SpeedStrategy::TempoRewrite => music_ms / self.rate,
        }
    }

    fn virtual_position(&self) -> Option<f64> {
        let anchor = self.anchor?;
        let mut position = anchor.position_ms;
        if anchor.running {
            position += elapsed_ms(anchor.at, self.clock.now()) * self.rate;
        }
        Some(position.min(self.duration_ms))
    }

    fn pin_anchor(&mut self, position_ms: f64, running: bool) {
        self.anchor = Some(VirtualAnchor {
            position_ms,
            at: self.clock.now(),
            running,
        });
    }

    fn apply_gain(&mut self) {
        if self.mute_strategy == MuteStrategy::GainZero {
            self.player.set_gain(if self.muted { 0.0 } else { 1.0 });
        }
    }

    fn clear_loaded_state(&mut self) {
        self.loaded = false;
        self.duration_ms = 0.0;
        self.playing = false;
        self.anchor = None;
    }

    /// Tempo-rewrite speed change: rebuild the asset, then put the playhead
    /// back where it was.
    fn reload_at_rate(&mut self, rate: f64) -> Result<(), SyncError> {
        let position = self.position_ms();
        let was_playing = self.is_playing();
        if was_playing {
            self.pause();
        }

        let rewritten = match midi::scale_tempo(&self.source, rate) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("tempo rewrite for speed {} failed: {}", rate, e);
                self.release();
                return Err(init_error(e));
            }
        };
        self.bump_epoch();
        self.player.unload();
        if let Err(e) = self.player.load(&rewritten) {
            log::warn!("reload at speed {} failed: {}", rate, e);
            self.clear_loaded_state();
            self.source.clear();
            return Err(init_error(e));
        }
        self.rate = rate;
        self.apply_gain();
        self.seek(position);
        if was_playing {
            self.play();
        }
        log::debug!("tempo rewritten for speed {}, resumed at {} ms", rate, position);
        Ok(())
    }
}

/// Runs on the engine's thread: atomics and a non-blocking send only.
fn completion_handler(
    epoch: Arc<AtomicU64>,
    armed: Arc<AtomicU64>,
    tx: Sender<TransportEvent>,
) -> super::FinishHandler {
    Box::new(move || {
        let current = epoch.load(Ordering::Acquire);
        if armed.load(Ordering::Acquire) == current {
            let _ = tx.try_send(TransportEvent::NaturalCompletion { epoch: current });
        }
    })
}

fn init_error(e: SyncError) -> SyncError {
    match e {
        SyncError::TransportInitError(_) => e,
        other => SyncError::TransportInitError(other.to_string()),
    }
}

impl<P: NativePlayer> Transport for StrategyTransport<P> {
    fn prepare(&mut self, asset: &[u8]) -> Result<f64, SyncError> {
        self.release();

        if asset.is_empty() {
            return Err(SyncError::TransportInitError("asset is empty".to_string()));
        }

        let (bytes, music_duration) = match self.speed_strategy {
            SpeedStrategy::NativeRate => (asset.to_vec(), None),
            SpeedStrategy::TempoRewrite => {
                let duration = midi::inspect(asset).map_err(init_error)?.duration_ms();
                let bytes = if (self.rate - 1.0).abs() < RATE_EPSILON {
                    asset.to_vec()
                } else {
                    midi::scale_tempo(asset, self.rate).map_err(init_error)?
                };
                (bytes, Some(duration))
            }
        };

        let native_duration = self.player.load(&bytes).map_err(init_error)?;
        self.bump_epoch();
        self.loaded = true;
        self.duration_ms = music_duration.unwrap_or(native_duration);
        if self.speed_strategy == SpeedStrategy::TempoRewrite {
            self.source = asset.to_vec();
        } else {
            self.player.set_rate(self.rate);
        }
        self.apply_gain();
        if self.muted && self.mute_strategy == MuteStrategy::VirtualClock {
            self.pin_anchor(0.0, false);
        }

        log::info!(
            "transport prepared: {} bytes, {:.1} ms",
            asset.len(),
            self.duration_ms
        );
        Ok(self.duration_ms)
    }

    fn play(&mut self) {
        if !self.loaded {
            log::warn!("play ignored: no asset loaded");
            return;
        }
        if self.is_playing() {
            return;
        }

        let position = self.position_ms();
        self.bump_epoch();
        self.playing = true;
        if self.anchor.is_some() {
            self.pin_anchor(position, true);
        } else {
            self.arm();
            self.player.start();
        }
    }

    fn pause(&mut self) -> f64 {
        if !self.loaded {
            return 0.0;
        }

        let position = self.position_ms();
        self.bump_epoch();
        self.playing = false;
        if self.anchor.is_some() {
            self.pin_anchor(position, false);
        } else {
            self.player.halt();
            self.flush_sound();
            // halting can leave the engine a few frames past the captured point
            let native = self.music_to_native(position);
            self.player.set_position_ms(native);
        }
        position
    }

    fn stop(&mut self) {
        if !self.loaded {
            return;
        }

        self.bump_epoch();
        self.playing = false;
        self.player.halt();
        self.flush_sound();
        self.player.set_position_ms(0.0);
        if self.anchor.is_some() {
            self.pin_anchor(0.0, false);
        }
    }

    fn seek(&mut self, target_ms: f64) {
        if !self.loaded {
            return;
        }
        if !target_ms.is_finite() {
            log::warn!("seek to non-finite position ignored");
            return;
        }

        let target = target_ms.clamp(0.0, self.duration_ms);
        let was_running = self.is_playing();
        self.bump_epoch();
        self.flush_sound();
        let native = self.music_to_native(target);
        self.player.set_position_ms(native);
        if self.anchor.is_some() {
            self.pin_anchor(target, was_running);
        } else if self.player.is_running() {
            self.arm();
        }
    }

    fn set_rate(&mut self, rate: f64) -> Result<(), SyncError> {
        let rate = clamp_speed(rate);
        if (rate - self.rate).abs() < RATE_EPSILON {
            return Ok(());
        }
        if !self.loaded {
            self.rate = rate;
            return Ok(());
        }

        match self.speed_strategy {
            SpeedStrategy::NativeRate => {
                let position = self.position_ms();
                self.rate = rate;
                self.player.set_rate(rate);
                if let Some(anchor) = self.anchor {
                    self.pin_anchor(position, anchor.running);
                }
                Ok(())
            }
            SpeedStrategy::TempoRewrite => self.reload_at_rate(rate),
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if muted == self.muted {
            return;
        }
        if !self.loaded {
            self.muted = muted;
            return;
        }

        match self.mute_strategy {
            MuteStrategy::GainZero => {
                self.muted = muted;
                self.apply_gain();
            }
            MuteStrategy::VirtualClock if muted => {
                let position = self.position_ms();
                let running = self.is_playing();
                self.bump_epoch();
                self.player.halt();
                self.flush_sound();
                self.muted = true;
                self.pin_anchor(position, running);
            }
            MuteStrategy::VirtualClock => {
                let position = self.position_ms();
                let running = self.is_playing();
                self.anchor = None;
                self.muted = false;
                self.bump_epoch();
                let native = self.music_to_native(position);
                self.player.set_position_ms(native);
                if running {
                    self.arm();
                    self.player.start();
                }
            }
        }
    }

    fn position_ms(&self) -> f64 {
        if !self.loaded {
            return 0.0;
        }
        if let Some(position) = self.virtual_position() {
            return position;
        }
        self.native_to_music(self.player.position_ms())
            .clamp(0.0, self.duration_ms)
    }

    fn is_playing(&self) -> bool {
        if !self.loaded {
            return false;
        }
        match self.anchor {
            Some(anchor) => {
                anchor.running
                    && self
                        .virtual_position()
                        .map_or(false, |position| position < self.duration_ms)
            }
            None => self.playing && self.player.is_running(),
        }
    }

    fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn try_next_event(&self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    fn release(&mut self) {
        if self.loaded {
            self.bump_epoch();
            self.player.halt();
            self.flush_sound();
            self.player.unload();
            log::debug!("transport released");
        }
        self.clear_loaded_state();
        self.source.clear();
        while self.events.try_recv().is_ok() {}
    }
}

impl<P: NativePlayer> Drop for StrategyTransport<P> {
    fn drop(&mut self) {
        self.release();
    }
}
