//! # Configuration
//!
//! Session settings read from YAML. Every key is optional and falls back to
//! the defaults below.
//!
//! ```yaml
//! speed: 0.75
//! muted: false
//! repeat-count: 2
//! restart-delay-ms: 150
//! end-epsilon-ms: 1.0
//! system-margin: 20.0
//! cadence: surface-animated
//! tick-interval-ms: 250
//! drift-tolerance-ms: 40.0
//! seek-policy: nearest-to-playhead
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::seek::SeekPolicy;

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 5.0;

/// Clamp a requested playback speed into `[MIN_SPEED, MAX_SPEED]`.
///
/// Non-finite requests fall back to normal speed.
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

/// How the rendering surface is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cadence {
    /// A position update on every display frame, at most one in flight.
    #[default]
    Continuous,
    /// The surface animates on its own; updates only at transitions.
    SurfaceAnimated,
}

impl Cadence {
    pub fn default_tick_interval_ms(self) -> u64 {
        match self {
            Cadence::Continuous => 16,
            Cadence::SurfaceAnimated => 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SyncConfig {
    pub speed: f64,
    pub muted: bool,
    pub repeat_count: u32,
    /// Settle delay between a natural completion and the next repeat.
    pub restart_delay_ms: u64,
    /// Tolerance for "position reached the end".
    pub end_epsilon_ms: f64,
    /// Extra space above and below a system box for cursor and tap hit-testing.
    pub system_margin: f64,
    pub cadence: Cadence,
    /// Recommended interval between `tick()` calls. `None` uses the cadence default.
    pub tick_interval_ms: Option<u64>,
    pub drift_tolerance_ms: f64,
    pub seek_policy: SeekPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            muted: false,
            repeat_count: 1,
            restart_delay_ms: 150,
            end_epsilon_ms: 1.0,
            system_margin: 20.0,
            cadence: Cadence::default(),
            tick_interval_ms: None,
            drift_tolerance_ms: 40.0,
            seek_policy: SeekPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_yaml(content: &str) -> Result<Self, SyncError> {
        let config: SyncConfig =
            serde_yaml::from_str(content).map_err(|e| SyncError::ConfigError(e.to_string()))?;
        config.validate()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// Check ranges and normalise the speed.
    pub fn validate(mut self) -> Result<Self, SyncError> {
        if self.repeat_count == 0 {
            return Err(SyncError::ConfigError(
                "repeat-count must be at least 1".to_string(),
            ));
        }
        if !self.end_epsilon_ms.is_finite() || self.end_epsilon_ms < 0.0 {
            return Err(SyncError::ConfigError(format!(
                "end-epsilon-ms must be a non-negative number, got {}",
                self.end_epsilon_ms
            )));
        }
        if !self.system_margin.is_finite() || self.system_margin < 0.0 {
            return Err(SyncError::ConfigError(format!(
                "system-margin must be a non-negative number, got {}",
                self.system_margin
            )));
        }
        if !self.drift_tolerance_ms.is_finite() || self.drift_tolerance_ms < 0.0 {
            return Err(SyncError::ConfigError(format!(
                "drift-tolerance-ms must be a non-negative number, got {}",
                self.drift_tolerance_ms
            )));
        }
        if self.tick_interval_ms == Some(0) {
            return Err(SyncError::ConfigError(
                "tick-interval-ms must be greater than zero".to_string(),
            ));
        }
        self.speed = clamp_speed(self.speed);
        Ok(self)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(
            self.tick_interval_ms
                .unwrap_or_else(|| self.cadence.default_tick_interval_ms()),
        )
    }
}
