//! # Rendering Surface
//!
//! The rendering surface draws the score and the cursor. It is driven in
//! one of two cadences (see [`Cadence`]):
//!
//! - **Continuous** - every tick resolves the cursor and calls
//!   [`RenderingSurface::update_position`]. Calls may complete
//!   asynchronously, so an [`InFlightGate`] admits at most one outstanding
//!   call. The surface holds a [`CallTicket`] for it and the gate reopens
//!   when the ticket is dropped. Ticks that find the gate closed are skipped
//!   and counted. Transitions that find it closed mark the outstanding call
//!   superseded and leave one coalesced refresh for the first tick after
//!   the gate reopens.
//! - **SurfaceAnimated** - the surface animates the cursor itself. It gets
//!   one [`begin_animation`](RenderingSurface::begin_animation) or
//!   [`freeze_at`](RenderingSurface::freeze_at) per transition, and slow
//!   polls only re-seed the animation when it has drifted from the
//!   transport.
//!
//! Scroll requests are edge-triggered in both cadences: a system is asked
//! for once when the cursor first lands on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::clock::{elapsed_ms, SharedClock};
use crate::config::Cadence;
use crate::cursor::{CursorPosition, CursorTracker};
use crate::map::PlaybackMap;

pub trait RenderingSurface {
    /// Move the cursor. `cursor` is `None` when the time has no drawable
    /// position. Dropping `ticket` tells the driver the call is complete.
    fn update_position(&mut self, time_ms: f64, cursor: Option<CursorPosition>, ticket: CallTicket);

    fn scroll_to_system(&mut self, system_idx: usize);

    /// Start animating from `from_ms`, advancing `rate` music milliseconds
    /// per wall-clock millisecond.
    fn begin_animation(&mut self, from_ms: f64, rate: f64);

    /// Stop animating and hold the cursor at `at_ms`.
    fn freeze_at(&mut self, at_ms: f64);
}

/// Admits one outstanding surface call at a time.
#[derive(Debug, Default)]
pub struct InFlightGate {
    /// Generation of the outstanding call, zero when free.
    outstanding: Arc<AtomicU64>,
    /// Calls up to this generation have been superseded.
    superseded: Arc<AtomicU64>,
    issued: u64,
}

impl InFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&mut self) -> Option<CallTicket> {
        if self.is_busy() {
            return None;
        }
        self.issued += 1;
        self.outstanding.store(self.issued, Ordering::Release);
        Some(CallTicket {
            slot: Arc::clone(&self.outstanding),
            superseded: Arc::clone(&self.superseded),
            generation: self.issued,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) != 0
    }

    /// Mark every call issued so far as superseded. The gate stays closed
    /// until the outstanding ticket is dropped.
    pub fn cancel(&self) {
        self.superseded.store(self.issued, Ordering::Release);
    }
}

/// Proof of an outstanding `update_position` call. Releases the gate on
/// drop.
#[derive(Debug)]
pub struct CallTicket {
    slot: Arc<AtomicU64>,
    superseded: Arc<AtomicU64>,
    generation: u64,
}

impl CallTicket {
    pub fn complete(self) {}

    /// Whether the call still matters. A superseded call can be abandoned;
    /// a fresher position follows once this ticket is dropped.
    pub fn is_current(&self) -> bool {
        self.slot.load(Ordering::Acquire) == self.generation
            && self.superseded.load(Ordering::Acquire) < self.generation
    }
}

impl Drop for CallTicket {
    fn drop(&mut self) {
        let _ = self.slot.compare_exchange(
            self.generation,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

#[derive(Debug, Clone, Copy)]
struct Animation {
    from_ms: f64,
    rate: f64,
    started: Instant,
}

/// Feeds a [`RenderingSurface`] at the configured cadence.
pub struct CursorDriver {
    cadence: Cadence,
    tracker: CursorTracker,
    gate: InFlightGate,
    clock: SharedClock,
    drift_tolerance_ms: f64,
    animation: Option<Animation>,
    /// A transition arrived while the gate was closed.
    refresh_pending: bool,
    skipped: u64,
}

impl CursorDriver {
    pub fn new(cadence: Cadence, margin: f64, drift_tolerance_ms: f64, clock: SharedClock) -> Self {
        Self {
            cadence,
            tracker: CursorTracker::new(margin),
            gate: InFlightGate::new(),
            clock,
            drift_tolerance_ms,
            animation: None,
            refresh_pending: false,
            skipped: 0,
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Ticks dropped because a surface call was still outstanding.
    pub fn skipped_updates(&self) -> u64 {
        self.skipped
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn cancel_in_flight(&self) {
        self.gate.cancel();
    }

    /// Whether a transition is waiting for the gate to reopen.
    pub fn is_refresh_pending(&self) -> bool {
        self.refresh_pending
    }

    /// Forget per-document state before a new map is shown.
    pub fn reset(&mut self) {
        self.gate.cancel();
        self.tracker.reset();
        self.animation = None;
        self.refresh_pending = false;
    }

    /// Periodic poll. `time_ms` is the transport position; `advancing` is
    /// whether it is currently moving.
    pub fn on_tick<S: RenderingSurface>(
        &mut self,
        surface: &mut S,
        map: &PlaybackMap,
        time_ms: f64,
        advancing: bool,
        rate: f64,
    ) {
        match self.cadence {
            Cadence::Continuous => {
                if advancing || self.refresh_pending {
                    self.push_position(surface, map, time_ms);
                }
            }
            Cadence::SurfaceAnimated => {
                if !advancing {
                    return;
                }
                self.scroll_if_needed(surface, map, time_ms);
                match self.animation {
                    Some(animation) => {
                        let expected = animation.from_ms
                            + elapsed_ms(animation.started, self.clock.now()) * animation.rate;
                        if (expected - time_ms).abs() > self.drift_tolerance_ms {
                            log::debug!(
                                "animation drifted {:.1} ms, re-seeding",
                                expected - time_ms
                            );
                            self.begin(surface, time_ms, rate);
                        }
                    }
                    None => self.begin(surface, time_ms, rate),
                }
            }
        }
    }

    /// Something changed (play, pause, seek, speed, restart). Supersedes any
    /// outstanding call and brings the surface up to date, at once if the
    /// gate is open and otherwise on the first tick after it reopens.
    pub fn on_transition<S: RenderingSurface>(
        &mut self,
        surface: &mut S,
        map: &PlaybackMap,
        time_ms: f64,
        advancing: bool,
        rate: f64,
    ) {
        self.gate.cancel();
        match self.cadence {
            Cadence::Continuous if self.gate.is_busy() => {
                log::trace!("surface busy, refresh to {:.1} ms deferred", time_ms);
                self.refresh_pending = true;
            }
            Cadence::Continuous => self.push_position(surface, map, time_ms),
            Cadence::SurfaceAnimated => {
                self.scroll_if_needed(surface, map, time_ms);
                if advancing {
                    self.begin(surface, time_ms, rate);
                } else {
                    self.animation = None;
                    surface.freeze_at(time_ms);
                }
            }
        }
    }

    fn push_position<S: RenderingSurface>(&mut self, surface: &mut S, map: &PlaybackMap, time_ms: f64) {
        let Some(ticket) = self.gate.try_acquire() else {
            self.skipped += 1;
            return;
        };
        self.refresh_pending = false;
        let update = self.tracker.update(map, time_ms);
        if let Some(system_idx) = update.and_then(|u| u.scroll_to_system) {
            surface.scroll_to_system(system_idx);
        }
        surface.update_position(time_ms, update.map(|u| u.position), ticket);
    }

    fn scroll_if_needed<S: RenderingSurface>(&mut self, surface: &mut S, map: &PlaybackMap, time_ms: f64) {
        if let Some(system_idx) = self
            .tracker
            .update(map, time_ms)
            .and_then(|u| u.scroll_to_system)
        {
            surface.scroll_to_system(system_idx);
        }
    }

    fn begin<S: RenderingSurface>(&mut self, surface: &mut S, from_ms: f64, rate: f64) {
        self.animation = Some(Animation {
            from_ms,
            rate,
            started: self.clock.now(),
        });
        surface.begin_animation(from_ms, rate);
    }
}


#[cfg(test)]
mod tests {
    use super::recording::{RecordingSurface, SurfaceCall};
    use super::*;
    use crate::clock::ManualClock;
    use crate::map::fixtures::repeated_section_map;

    fn driver(cadence: Cadence, clock: &ManualClock) -> CursorDriver {
        CursorDriver::new(cadence, 20.0, 40.0, Arc::new(clock.clone()))
    }

    fn resolve_x(map: &PlaybackMap, time_ms: f64) -> Option<f64> {
        crate::cursor::resolve_cursor(map, time_ms, 20.0).map(|c| c.x)
    }

    #[test]
    fn test_gate_admits_one_call() {
        let mut gate = InFlightGate::new();
        let ticket = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        ticket.complete();
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_cancel_supersedes_but_keeps_gate_closed() {
        let mut gate = InFlightGate::new();
        let stale = gate.try_acquire().unwrap();
        assert!(stale.is_current());
        gate.cancel();
        assert!(!stale.is_current());
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        drop(stale);
        let fresh = gate.try_acquire().unwrap();
        assert!(fresh.is_current());
    }

    #[test]
    fn test_continuous_skips_while_busy() {
        let clock = ManualClock::new();
        let map = repeated_section_map();
        let mut driver = driver(Cadence::Continuous, &clock);
        let mut surface = RecordingSurface {
            hold_tickets: true,
            ..Default::default()
        };

        for i in 0..5 {
            driver.on_tick(&mut surface, &map, i as f64 * 16.0, true, 1.0);
        }
        assert_eq!(surface.updates(), 1);
        assert_eq!(driver.skipped_updates(), 4);

        surface.release_all();
        driver.on_tick(&mut surface, &map, 100.0, true, 1.0);
        assert_eq!(surface.updates(), 2);
    }

    #[test]
    fn test_continuous_idle_ticks_do_nothing() {
        let clock = ManualClock::new();
        let map = repeated_section_map();
        let mut driver = driver(Cadence::Continuous, &clock);
        let mut surface = RecordingSurface::default();

        driver.on_tick(&mut surface, &map, 0.0, false, 1.0);
        assert!(surface.calls.is_empty());
    }

    #[test]
    fn test_transition_supersedes_outstanding_call() {
        let clock = ManualClock::new();
        let map = repeated_section_map();
        let mut driver = driver(Cadence::Continuous, &clock);
        let mut surface = RecordingSurface {
            hold_tickets: true,
            ..Default::default()
        };

        driver.on_tick(&mut surface, &map, 0.0, true, 1.0);
        driver.on_transition(&mut surface, &map, 5000.0, false, 1.0);
        assert_eq!(surface.updates(), 1);
        assert!(!surface.held[0].is_current());
        assert!(driver.is_refresh_pending());

        // still drawing: the refresh waits even though nothing is advancing
        driver.on_tick(&mut surface, &map, 5000.0, false, 1.0);
        assert_eq!(surface.updates(), 1);

        surface.release_all();
        driver.on_tick(&mut surface, &map, 5000.0, false, 1.0);
        assert_eq!(surface.updates(), 2);
        assert_eq!(
            surface.calls.last(),
            Some(&SurfaceCall::Update {
                time_ms: 5000.0,
                x: resolve_x(&map, 5000.0)
            })
        );
        assert!(!driver.is_refresh_pending());

        surface.release_all();
        driver.on_tick(&mut surface, &map, 5000.0, false, 1.0);
        assert_eq!(surface.updates(), 2);
    }

    #[test]
    fn test_transition_burst_coalesces_to_one_call() {
        let clock = ManualClock::new();
        let map = repeated_section_map();
        let mut driver = driver(Cadence::Continuous, &clock);
        let mut surface = RecordingSurface {
            hold_tickets: true,
            ..Default::default()
        };

        for t in [1000.0, 2000.0, 3000.0, 4000.0, 5000.0] {
            driver.on_transition(&mut surface, &map, t, false, 1.0);
        }
        assert_eq!(surface.held.len(), 1);
        assert_eq!(surface.updates(), 1);

        surface.release_all();
        driver.on_tick(&mut surface, &map, 5000.0, false, 1.0);
        assert_eq!(surface.held.len(), 1);
        assert!(matches!(
            surface.calls.last(),
            Some(SurfaceCall::Update { time_ms, .. }) if *time_ms == 5000.0
        ));
    }

    #[test]
    fn test_scroll_is_edge_triggered() {
        let clock = ManualClock::new();
        let map = repeated_section_map();
        let mut driver = driver(Cadence::Continuous, &clock);
        let mut surface = RecordingSurface::default();

        // system 0 until 8000 ms, then system 1
        for t in [0.0, 1000.0, 3000.0, 8500.0, 9000.0, 10_500.0] {
            driver.on_tick(&mut surface, &map, t, true, 1.0);
        }
        assert_eq!(surface.scrolls(), vec![0, 1]);
    }

    #[test]
    fn test_animated_begins_once_and_freezes() {
        let clock = ManualClock::new();
        let map = repeated_section_map();
        let mut driver = driver(Cadence::SurfaceAnimated, &clock);
        let mut surface = RecordingSurface::default();

        driver.on_transition(&mut surface, &map, 0.0, true, 1.0);
        for step in 1..=4 {
            clock.advance_ms(250);
            driver.on_tick(&mut surface, &map, step as f64 * 250.0, true, 1.0);
        }
        driver.on_transition(&mut surface, &map, 1000.0, false, 1.0);

        let begins: Vec<_> = surface
            .calls
            .iter()
            .filter(|c| matches!(c, SurfaceCall::Begin { .. }))
            .collect();
        assert_eq!(begins.len(), 1);
        assert_eq!(surface.calls.last(), Some(&SurfaceCall::Freeze(1000.0)));
        assert_eq!(surface.updates(), 0);
    }

    #[test]
    fn test_animated_reseeds_on_drift() {
        let clock = ManualClock::new();
        let map = repeated_section_map();
        let mut driver = driver(Cadence::SurfaceAnimated, &clock);
        let mut surface = RecordingSurface::default();

        driver.on_transition(&mut surface, &map, 0.0, true, 1.0);
        clock.advance_ms(250);
        // the transport lagged 100 ms behind the animation
        driver.on_tick(&mut surface, &map, 150.0, true, 1.0);

        assert_eq!(
            surface.calls.last(),
            Some(&SurfaceCall::Begin {
                from_ms: 150.0,
                rate: 1.0
            })
        );
    }
}
