//! Time sources and the playback clock renderers compare timestamps against.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic time in microseconds.
pub trait TimeSource: Send + Sync {
    fn now_us(&self) -> i64;
}

/// Wall-clock time since construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_us(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_micros()).unwrap_or(i64::MAX)
    }
}

/// Time that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, us: i64) {
        self.now.store(us, Ordering::Release);
    }

    pub fn advance(&self, us: i64) {
        self.now.fetch_add(us, Ordering::AcqRel);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_us(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}

/// A clock owned by someone else, read in microseconds.
pub type ExternalClock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Elapsed playback time.
///
/// Runs from a [`TimeSource`] scaled by the playback rate, or, once an
/// external clock is attached, reads `clock() - base`.
pub struct PlaybackClock {
    time: Arc<dyn TimeSource>,
    started_at: Option<i64>,
    /// Position when `started_at` was taken.
    origin_us: i64,
    paused_at: Option<i64>,
    rate: f64,
    external: Option<(ExternalClock, i64)>,
}

impl PlaybackClock {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            time,
            started_at: None,
            origin_us: 0,
            paused_at: None,
            rate: 1.0,
            external: None,
        }
    }

    /// Start counting from zero. No-op once started.
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(self.time.now_us());
        }
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some() || self.external.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }

    pub fn elapsed_us(&self) -> i64 {
        if let Some(paused) = self.paused_at {
            return paused;
        }
        if let Some((clock, base)) = &self.external {
            return clock() - base;
        }
        match self.started_at {
            Some(start) => {
                let wall = (self.time.now_us() - start) as f64 * self.rate;
                self.origin_us + wall as i64
            }
            None => 0,
        }
    }

    /// Freeze the elapsed time.
    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(self.elapsed_us());
        }
    }

    /// Continue from where [`PlaybackClock::pause`] froze.
    pub fn resume(&mut self) {
        if let Some(position) = self.paused_at.take() {
            if self.external.is_none() {
                self.rebase(position);
            }
        }
    }

    /// Change speed without jumping.
    pub fn set_rate(&mut self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            tracing::warn!(rate, "ignoring invalid playback rate");
            return;
        }
        if self.paused_at.is_none() && self.external.is_none() {
            let position = self.elapsed_us();
            self.rebase(position);
        }
        self.rate = rate;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Jump to `position_us`.
    pub fn seek(&mut self, position_us: i64) {
        self.rebase(position_us);
        if self.paused_at.is_some() {
            self.paused_at = Some(position_us);
        }
    }

    /// Follow `clock`, reporting `clock() - base_us` as elapsed time.
    pub fn set_external(&mut self, clock: ExternalClock, base_us: i64) {
        self.external = Some((clock, base_us));
    }

    /// Go back to the time source, continuing from the current position.
    pub fn clear_external(&mut self) {
        if self.external.is_some() {
            let position = self.elapsed_us();
            self.external = None;
            self.rebase(position);
        }
    }

    /// Forget all timing state.
    pub fn reset(&mut self) {
        self.started_at = None;
        self.origin_us = 0;
        self.paused_at = None;
        self.rate = 1.0;
        self.external = None;
    }

    fn rebase(&mut self, position_us: i64) {
        self.origin_us = position_us;
        self.started_at = Some(self.time.now_us());
    }
}

impl fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackClock")
            .field("started_at", &self.started_at)
            .field("origin_us", &self.origin_us)
            .field("paused_at", &self.paused_at)
            .field("rate", &self.rate)
            .field("external", &self.external.as_ref().map(|(_, base)| base))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual() -> (Arc<ManualTimeSource>, PlaybackClock) {
        let time = Arc::new(ManualTimeSource::new());
        let clock = PlaybackClock::new(time.clone());
        (time, clock)
    }

    #[test]
    fn test_elapsed_after_start() {
        let (time, mut clock) = manual();
        time.set(5_000);
        assert_eq!(clock.elapsed_us(), 0);
        clock.start();
        time.advance(40_000);
        assert_eq!(clock.elapsed_us(), 40_000);
        // Second start is ignored
        clock.start();
        assert_eq!(clock.elapsed_us(), 40_000);
    }

    #[test]
    fn test_pause_freezes() {
        let (time, mut clock) = manual();
        clock.start();
        time.advance(10_000);
        clock.pause();
        time.advance(500_000);
        assert_eq!(clock.elapsed_us(), 10_000);
        clock.resume();
        time.advance(5_000);
        assert_eq!(clock.elapsed_us(), 15_000);
    }

    #[test]
    fn test_rate_change_keeps_position() {
        let (time, mut clock) = manual();
        clock.start();
        time.advance(100_000);
        clock.set_rate(2.0);
        assert_eq!(clock.elapsed_us(), 100_000);
        time.advance(100_000);
        assert_eq!(clock.elapsed_us(), 300_000);

        clock.set_rate(0.0);
        assert_eq!(clock.rate(), 2.0);
    }

    #[test]
    fn test_seek() {
        let (time, mut clock) = manual();
        clock.start();
        time.advance(1_000);
        clock.seek(4_000_000);
        time.advance(1_000);
        assert_eq!(clock.elapsed_us(), 4_001_000);

        clock.pause();
        clock.seek(0);
        assert_eq!(clock.elapsed_us(), 0);
    }

    #[test]
    fn test_external_clock() {
        let (_time, mut clock) = manual();
        let audio = Arc::new(ManualTimeSource::new());
        audio.set(2_000_000);
        let reader = audio.clone();
        clock.set_external(Arc::new(move || reader.now_us()), 1_500_000);

        assert!(clock.is_started());
        assert_eq!(clock.elapsed_us(), 500_000);
        audio.advance(20_000);
        assert_eq!(clock.elapsed_us(), 520_000);

        clock.clear_external();
        assert!(!clock.is_external());
        assert_eq!(clock.elapsed_us(), 520_000);
    }

    #[test]
    fn test_reset() {
        let (time, mut clock) = manual();
        clock.start();
        clock.set_rate(1.5);
        time.advance(1_000);
        clock.reset();
        assert!(!clock.is_started());
        assert_eq!(clock.elapsed_us(), 0);
        assert_eq!(clock.rate(), 1.0);
    }
}
