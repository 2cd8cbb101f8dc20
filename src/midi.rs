//! # Standard MIDI File support
//!
//! The audio asset handed to the transport is a Standard MIDI File: a tempo
//! map in track 0 followed by one track per instrument. The sync engine
//! never plays notes itself, but it needs three things from the file:
//!
//! - its **duration**, integrated through every tempo change;
//! - a **tempo rewrite** that scales each `FF 51 03` set-tempo payload by
//!   `1 / speed`, for players that have no playback-rate control;
//! - a fixed **silence sequence** to cut voices that are still ringing when
//!   playback pauses or seeks.
//!
//! ## Example
//! ```rust
//! use scoresync::midi::{inspect, scale_tempo};
//!
//! // format 0, one track, 480 ticks per quarter, one quarter note at 120 BPM
//! let mut smf = b"MThd".to_vec();
//! smf.extend_from_slice(&[0, 0, 0, 6, 0, 0, 0, 1, 0x01, 0xE0]);
//! smf.extend_from_slice(b"MTrk");
//! smf.extend_from_slice(&[0, 0, 0, 20]);
//! smf.extend_from_slice(&[0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]);
//! smf.extend_from_slice(&[0x00, 0x90, 60, 100]);
//! smf.extend_from_slice(&[0x83, 0x60, 0x80, 60, 0]);
//! smf.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
//!
//! let summary = inspect(&smf).unwrap();
//! assert_eq!(summary.duration_ms(), 500.0);
//!
//! let doubled = scale_tempo(&smf, 2.0).unwrap();
//! assert_eq!(inspect(&doubled).unwrap().duration_ms(), 250.0);
//! ```

use crate::error::SyncError;

/// Tempo in effect before the first set-tempo event (120 BPM).
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

/// Largest value a set-tempo payload can hold.
pub const MAX_MICROS_PER_QUARTER: u32 = 0x00FF_FFFF;

const META_SET_TEMPO: u8 = 0x51;
const META_END_OF_TRACK: u8 = 0x2F;

const CC_SUSTAIN: u8 = 64;
const CC_ALL_SOUND_OFF: u8 = 120;
const CC_ALL_NOTES_OFF: u8 = 123;

/// Sustain off, all sound off and all notes off on all 16 channels.
///
/// Built at compile time so flushing sound never allocates.
pub static SILENCE_MESSAGES: [[u8; 3]; 48] = build_silence_messages();

const fn build_silence_messages() -> [[u8; 3]; 48] {
    let mut out = [[0u8; 3]; 48];
    let mut channel = 0;
    while channel < 16 {
        let status = 0xB0 | channel as u8;
        out[channel * 3] = [status, CC_SUSTAIN, 0];
        out[channel * 3 + 1] = [status, CC_ALL_SOUND_OFF, 0];
        out[channel * 3 + 2] = [status, CC_ALL_NOTES_OFF, 0];
        channel += 1;
    }
    out
}

/// One set-tempo event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChange {
    /// Absolute tick in its track.
    pub tick: u64,
    pub micros_per_quarter: u32,
    /// Byte offset of the 3-byte payload within the file.
    pub payload_offset: usize,
}

impl TempoChange {
    pub fn bpm(&self) -> f64 {
        60_000_000.0 / self.micros_per_quarter.max(1) as f64
    }
}

/// What the sync engine needs to know about a Standard MIDI File.
#[derive(Debug, Clone, PartialEq)]
pub struct SmfSummary {
    pub format: u16,
    pub track_count: u16,
    pub ticks_per_quarter: u16,
    /// All set-tempo events across all tracks, sorted by tick.
    pub tempo_changes: Vec<TempoChange>,
    /// Tick of the last event in the longest track.
    pub end_tick: u64,
    /// Byte offset of the first `MTrk` chunk header.
    first_track_offset: Option<usize>,
}

impl SmfSummary {
    /// Wall-clock time at `tick`, following the tempo map.
    pub fn tick_to_ms(&self, tick: u64) -> f64 {
        let tpq = self.ticks_per_quarter.max(1) as f64;
        let mut ms = 0.0;
        let mut last_tick = 0u64;
        let mut uspq = DEFAULT_MICROS_PER_QUARTER;

        for change in &self.tempo_changes {
            if change.tick >= tick {
                break;
            }
            ms += (change.tick - last_tick) as f64 * uspq as f64 / tpq / 1000.0;
            last_tick = change.tick;
            uspq = change.micros_per_quarter;
        }
        ms + (tick - last_tick) as f64 * uspq as f64 / tpq / 1000.0
    }

    pub fn duration_ms(&self) -> f64 {
        self.tick_to_ms(self.end_tick)
    }

    pub fn initial_bpm(&self) -> f64 {
        match self.tempo_changes.first() {
            Some(change) if change.tick == 0 => change.bpm(),
            _ => 60_000_000.0 / DEFAULT_MICROS_PER_QUARTER as f64,
        }
    }
}

/// Walk the file and summarise it.
pub fn inspect(bytes: &[u8]) -> Result<SmfSummary, SyncError> {
    let mut reader = ByteReader::new(bytes);

    let id = reader.take(4)?;
    if id != b"MThd" {
        return Err(SyncError::midi(0, "missing MThd header"));
    }
    let header_len = reader.read_u32()? as usize;
    if header_len < 6 {
        return Err(SyncError::midi(4, "header chunk shorter than 6 bytes"));
    }
    let header_start = reader.pos;
    let format = reader.read_u16()?;
    let track_count = reader.read_u16()?;
    let division_offset = reader.pos;
    let division = reader.read_u16()?;
    if division & 0x8000 != 0 {
        return Err(SyncError::midi(
            division_offset,
            "SMPTE time division is not supported",
        ));
    }
    if division == 0 {
        return Err(SyncError::midi(division_offset, "zero ticks per quarter note"));
    }
    reader.seek(header_start + header_len)?;

    let mut tempo_changes = Vec::new();
    let mut end_tick = 0u64;
    let mut tracks_seen = 0u16;
    let mut first_track_offset = None;

    while !reader.is_at_end() {
        let chunk_offset = reader.pos;
        let id = reader.take(4)?;
        let len = reader.read_u32()? as usize;
        let data_start = reader.pos;
        let data_end = data_start
            .checked_add(len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| SyncError::midi(chunk_offset, "chunk runs past end of file"))?;

        if id == b"MTrk" {
            first_track_offset.get_or_insert(chunk_offset);
            let track_end = walk_track(bytes, data_start, data_end, |tick, payload_offset| {
                let uspq = u32::from_be_bytes([
                    0,
                    bytes[payload_offset],
                    bytes[payload_offset + 1],
                    bytes[payload_offset + 2],
                ]);
                tempo_changes.push(TempoChange {
                    tick,
                    micros_per_quarter: uspq,
                    payload_offset,
                });
            })?;
            end_tick = end_tick.max(track_end);
            tracks_seen += 1;
        } else {
            log::debug!(
                "skipping unknown chunk {:?} at byte {}",
                String::from_utf8_lossy(id),
                chunk_offset
            );
        }
        reader.seek(data_end)?;
    }

    if tracks_seen == 0 {
        return Err(SyncError::midi(bytes.len(), "file contains no tracks"));
    }
    if tracks_seen != track_count {
        log::warn!(
            "header declares {} tracks but file contains {}",
            track_count,
            tracks_seen
        );
    }

    tempo_changes.sort_by_key(|c| c.tick);

    Ok(SmfSummary {
        format,
        track_count: tracks_seen,
        ticks_per_quarter: division,
        tempo_changes,
        end_tick,
        first_track_offset,
    })
}

/// Rewrite every set-tempo event so the file plays `speed` times faster.
///
/// A file without tempo events gets one inserted at tick 0 of its first
/// track, so the default 120 BPM is scaled too.
pub fn scale_tempo(bytes: &[u8], speed: f64) -> Result<Vec<u8>, SyncError> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(SyncError::midi(0, format!("invalid speed {}", speed)));
    }
    let summary = inspect(bytes)?;
    let scale = |uspq: u32| -> [u8; 3] {
        let scaled = (uspq as f64 / speed).round().clamp(1.0, MAX_MICROS_PER_QUARTER as f64) as u32;
        let be = scaled.to_be_bytes();
        [be[1], be[2], be[3]]
    };

    let mut out = bytes.to_vec();

    if summary.tempo_changes.is_empty() {
        let chunk = summary
            .first_track_offset
            .ok_or_else(|| SyncError::midi(0, "file contains no tracks"))?;
        let len_offset = chunk + 4;
        let old_len = u32::from_be_bytes([
            out[len_offset],
            out[len_offset + 1],
            out[len_offset + 2],
            out[len_offset + 3],
        ]);
        let payload = scale(DEFAULT_MICROS_PER_QUARTER);
        let event = [0x00, 0xFF, META_SET_TEMPO, 0x03, payload[0], payload[1], payload[2]];
        let new_len = old_len
            .checked_add(event.len() as u32)
            .ok_or_else(|| SyncError::midi(len_offset, "track too long"))?;
        out[len_offset..len_offset + 4].copy_from_slice(&new_len.to_be_bytes());
        let data_start = len_offset + 4;
        out.splice(data_start..data_start, event);
        return Ok(out);
    }

    for change in &summary.tempo_changes {
        let at = change.payload_offset;
        out[at..at + 3].copy_from_slice(&scale(change.micros_per_quarter));
    }
    Ok(out)
}

/// Decode one track's events, reporting each set-tempo payload as
/// `(tick, payload_offset)`. Returns the tick of the last event.
fn walk_track(
    bytes: &[u8],
    start: usize,
    end: usize,
    mut on_tempo: impl FnMut(u64, usize),
) -> Result<u64, SyncError> {
    let mut reader = ByteReader::new(&bytes[..end]);
    reader.seek(start)?;
    let mut tick = 0u64;
    let mut running_status: Option<u8> = None;

    while !reader.is_at_end() {
        tick += reader.read_vlq()? as u64;
        let event_offset = reader.pos;

        let first = reader.peek()?;
        let status = if first & 0x80 != 0 {
            reader.pos += 1;
            first
        } else {
            running_status
                .ok_or_else(|| SyncError::midi(event_offset, "data byte without running status"))?
        };

        match status {
            0xFF => {
                running_status = None;
                let meta_type = reader.read_u8()?;
                let len = reader.read_vlq()? as usize;
                let payload_offset = reader.pos;
                reader.skip(len)?;
                match meta_type {
                    META_SET_TEMPO if len == 3 => on_tempo(tick, payload_offset),
                    META_SET_TEMPO => {
                        return Err(SyncError::midi(event_offset, "set-tempo payload is not 3 bytes"))
                    }
                    META_END_OF_TRACK => return Ok(tick),
                    _ => {}
                }
            }
            0xF0 | 0xF7 => {
                running_status = None;
                let len = reader.read_vlq()? as usize;
                reader.skip(len)?;
            }
            0x80..=0xEF => {
                running_status = Some(status);
                let data_len = match status & 0xF0 {
                    0xC0 | 0xD0 => 1,
                    _ => 2,
                };
                reader.skip(data_len)?;
            }
            other => {
                return Err(SyncError::midi(
                    event_offset,
                    format!("unexpected status byte 0x{:02X}", other),
                ))
            }
        }
    }

    log::debug!("track at byte {} has no end-of-track event", start);
    Ok(tick)
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn seek(&mut self, pos: usize) -> Result<(), SyncError> {
        if pos > self.data.len() {
            return Err(SyncError::midi(self.data.len(), "unexpected end of data"));
        }
        self.pos = pos;
        Ok(())
    }

    fn skip(&mut self, n: usize) -> Result<(), SyncError> {
        let target = self
            .pos
            .checked_add(n)
            .ok_or_else(|| SyncError::midi(self.pos, "length overflow"))?;
        self.seek(target)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SyncError> {
        let start = self.pos;
        self.skip(n)?;
        Ok(&self.data[start..start + n])
    }

    fn peek(&self) -> Result<u8, SyncError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| SyncError::midi(self.pos, "unexpected end of data"))
    }

    fn read_u8(&mut self) -> Result<u8, SyncError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16, SyncError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, SyncError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Variable-length quantity, at most four bytes.
    fn read_vlq(&mut self) -> Result<u32, SyncError> {
        let start = self.pos;
        let mut value = 0u32;
        for _ in 0..4 {
            let b = self.read_u8()?;
            value = (value << 7) | (b & 0x7F) as u32;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(SyncError::midi(start, "variable-length quantity longer than 4 bytes"))
    }
}
