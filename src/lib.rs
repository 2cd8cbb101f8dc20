pub mod clock;
pub mod config;
pub mod cursor;
pub mod error;
pub mod map;
pub mod midi;
pub mod seek;
pub mod session;
pub mod surface;
pub mod sync;
pub mod transport;

pub use config::SyncConfig;
pub use cursor::{resolve_cursor, CursorPosition};
pub use error::*;
pub use map::PlaybackMap;
pub use seek::{resolve_seek, SeekPolicy, TapPoint};
pub use session::{PlaybackSession, PlaybackState, SessionEvent};
pub use surface::RenderingSurface;
pub use sync::ScoreSync;
pub use transport::{Capabilities, StrategyTransport, Transport};

/// Read and validate a playback map file.
pub fn load_map<P: AsRef<std::path::Path>>(path: P) -> Result<PlaybackMap, SyncError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|e| SyncError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    PlaybackMap::from_json(&json)
}

/// Read an audio asset file.
pub fn read_asset<P: AsRef<std::path::Path>>(path: P) -> Result<Vec<u8>, SyncError> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| SyncError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
