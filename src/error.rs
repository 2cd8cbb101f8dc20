//! # Error Types
//!
//! All fallible operations in the crate return [`SyncError`].
//!
//! Absent lookups (a tap outside every measure, a timemap entry whose measure
//! has no system box) are not errors: the resolvers return `None` instead.
//!
//! ## Error Types
//! - `TransportInitError` - the audio asset could not be loaded
//! - `MapParseError` / `InvalidMap` - the playback map is malformed
//! - `MidiError` - the Standard MIDI File is truncated or unsupported
//! - `ConfigError` - the YAML configuration is invalid
//! - `Io` - a file could not be read or written

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The transport could not prepare the audio asset.
    ///
    /// The session stays `Stopped` with a zero duration, and transport
    /// commands are ignored until a later load succeeds.
    ///
    /// # Example
    /// ```
    /// # use scoresync::SyncError;
    /// let err = SyncError::TransportInitError("asset is empty".to_string());
    /// assert_eq!(err.to_string(), "Transport init error: asset is empty");
    /// ```
    #[error("Transport init error: {0}")]
    TransportInitError(String),

    /// The playback map JSON is not syntactically valid.
    #[error("Playback map parse error at line {line}, column {column}: {message}")]
    MapParseError {
        line: usize,
        column: usize,
        message: String,
    },

    /// The playback map parsed but violates an invariant.
    ///
    /// # Example
    /// ```
    /// # use scoresync::SyncError;
    /// let err = SyncError::InvalidMap("timemap entry 3 goes back in time".to_string());
    /// assert_eq!(err.to_string(), "Invalid playback map: timemap entry 3 goes back in time");
    /// ```
    #[error("Invalid playback map: {0}")]
    InvalidMap(String),

    /// Malformed Standard MIDI File data.
    #[error("MIDI error at byte {offset}: {message}")]
    MidiError { offset: usize, message: String },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },
}

impl SyncError {
    pub(crate) fn midi(offset: usize, message: impl Into<String>) -> Self {
        SyncError::MidiError {
            offset,
            message: message.into(),
        }
    }
}
