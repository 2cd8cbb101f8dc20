//! # Transport Module
//!
//! Everything between the position tracker and the platform audio engine.
//!
//! ## Layers
//! - [`Transport`] - what the position tracker drives: play, pause, stop,
//!   seek, speed and mute, all in **music time**
//! - [`NativePlayer`] - what a platform engine offers: load a file, start,
//!   halt, read and set its own (native) position, and optionally change
//!   playback rate or output gain
//! - [`StrategyTransport`] - bridges the two. It inspects
//!   [`Capabilities`] once and picks a speed strategy and a mute strategy:
//!
//! | Capability missing | Fallback |
//! |---|---|
//! | `rate_control` | [`SpeedStrategy::TempoRewrite`]: rewrite the file's tempo events and reload |
//! | `silent_output` | [`MuteStrategy::VirtualClock`]: halt the engine and advance a clock instead |
//!
//! ## Sub-modules
//! - `strategy` - [`StrategyTransport`]
//! - `simulated` - [`SimulatedPlayer`], a clock-driven software engine
//!
//! ## Completion events
//!
//! Engines report "finished" through a callback that may run on an audio
//! thread, and many also call it when playback is halted on purpose. Each
//! programmatic operation therefore bumps the transport's *epoch*, and the
//! callback only posts [`TransportEvent::NaturalCompletion`] for the run it
//! was armed for. Consumers should still compare the event's epoch with
//! [`Transport::epoch`] before acting on it.

mod strategy;
pub mod simulated;


use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub use simulated::{PlayerProbe, SimulatedPlayer};
pub use strategy::{MuteStrategy, SpeedStrategy, StrategyTransport};

/// What a [`NativePlayer`] can do without help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Playback rate can be changed while loaded.
    pub rate_control: bool,
    /// Output gain can be set to zero while the engine keeps running.
    pub silent_output: bool,
}

impl Capabilities {
    pub const FULL: Capabilities = Capabilities {
        rate_control: true,
        silent_output: true,
    };

    pub const MINIMAL: Capabilities = Capabilities {
        rate_control: false,
        silent_output: false,
    };
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::FULL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The asset played to its end without being stopped, paused or seeked.
    NaturalCompletion { epoch: u64 },
}

/// Callback invoked by an engine when it stops producing sound.
pub type FinishHandler = Box<dyn FnMut() + Send>;

/// A platform audio engine playing one loaded file.
///
/// Positions are in the engine's own time base. After a tempo rewrite that
/// differs from music time.
pub trait NativePlayer: Send {
    fn capabilities(&self) -> Capabilities;

    /// Load a file, replacing the current one. Returns its native duration.
    fn load(&mut self, bytes: &[u8]) -> Result<f64, SyncError>;

    fn unload(&mut self);

    fn start(&mut self);

    fn halt(&mut self);

    fn position_ms(&self) -> f64;

    fn set_position_ms(&mut self, position_ms: f64);

    fn is_running(&self) -> bool;

    /// Only meaningful when `capabilities().rate_control` is set.
    fn set_rate(&mut self, rate: f64);

    /// Only meaningful when `capabilities().silent_output` is set.
    fn set_gain(&mut self, gain: f32);

    /// Send a raw channel message straight to the synthesizer.
    fn send_midi(&mut self, message: &[u8; 3]);

    /// Install the callback run when the engine stops producing sound.
    ///
    /// It may be called from another thread and must not block.
    fn set_finish_handler(&mut self, handler: FinishHandler);
}

/// Music-time playback control, as seen by the position tracker.
pub trait Transport {
    /// Load an asset, releasing any previous one first. Returns the duration
    /// in music time.
    fn prepare(&mut self, asset: &[u8]) -> Result<f64, SyncError>;

    /// Resume from the current position.
    fn play(&mut self);

    /// Pause, silence ringing notes, and return the position paused at.
    fn pause(&mut self) -> f64;

    /// Halt and rewind to zero.
    fn stop(&mut self);

    fn seek(&mut self, target_ms: f64);

    /// Change the playback speed multiplier. Position is preserved.
    fn set_rate(&mut self, rate: f64) -> Result<(), SyncError>;

    fn set_muted(&mut self, muted: bool);

    fn position_ms(&self) -> f64;

    fn is_playing(&self) -> bool;

    /// Duration in music time; zero when nothing is loaded.
    fn duration_ms(&self) -> f64;

    /// Tag of the current run. Changes on every programmatic operation.
    fn epoch(&self) -> u64;

    /// Next pending event, without blocking.
    fn try_next_event(&self) -> Option<TransportEvent>;

    /// Stop and free the loaded asset.
    fn release(&mut self);
}
