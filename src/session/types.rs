//! Session state and event types.

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Something the position tracker did, for whoever drives the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    Loaded { duration_ms: f64 },
    StateChanged { state: PlaybackState },
    Seeked { position_ms: f64 },
    /// One pass finished. `remaining` passes are still to come.
    Completed { remaining: u32 },
    /// A repeat pass started after the settle delay.
    Restarted { pass: u32 },
    SpeedChanged { speed: f64 },
    MuteChanged { muted: bool },
    Interrupted { position_ms: f64 },
}

/// A repeat pass waiting for its settle delay.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingRestart {
    pub due: Instant,
    pub generation: u64,
}
