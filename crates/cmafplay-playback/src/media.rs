//! Decoded media handles.
//!
//! Decoded frames and audio buffers hold platform resources. A handle
//! releases its resource when dropped; [`VideoFrame::close`] and
//! [`AudioData::close`] make the release explicit at call sites.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

/// Counts decoded resources that are alive and released.
///
/// Platforms attach a tracker to every handle they produce; tests use it to
/// prove nothing leaks.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    inner: Arc<Counts>,
}

#[derive(Debug, Default)]
struct Counts {
    live: AtomicUsize,
    released: AtomicUsize,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently alive.
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Handles released so far.
    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::Acquire)
    }

    pub fn lease(&self) -> Lease {
        self.inner.live.fetch_add(1, Ordering::AcqRel);
        Lease {
            tracker: self.clone(),
        }
    }
}

/// One outstanding resource; released on drop.
pub struct Lease {
    tracker: ResourceTracker,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.tracker.inner.live.fetch_sub(1, Ordering::AcqRel);
        self.tracker.inner.released.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").finish_non_exhaustive()
    }
}

/// A decoded picture.
#[derive(Debug)]
pub struct VideoFrame {
    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub width: u32,
    pub height: u32,
    /// Pixel data in a platform-defined layout.
    pub data: Bytes,
    lease: Option<Lease>,
}

impl VideoFrame {
    pub fn new(timestamp_us: i64, duration_us: i64, width: u32, height: u32, data: Bytes) -> Self {
        Self {
            timestamp_us,
            duration_us,
            width,
            height,
            data,
            lease: None,
        }
    }

    /// Tie this frame to a tracker.
    pub fn tracked(mut self, tracker: &ResourceTracker) -> Self {
        self.lease = Some(tracker.lease());
        self
    }

    /// Release the frame.
    pub fn close(self) {}
}

/// A decoded block of PCM audio.
#[derive(Debug)]
pub struct AudioData {
    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples, `frames * channels` long.
    pub pcm: Arc<[f32]>,
    lease: Option<Lease>,
}

impl AudioData {
    pub fn new(timestamp_us: i64, sample_rate: u32, channels: u16, pcm: Arc<[f32]>) -> Self {
        Self {
            timestamp_us,
            sample_rate,
            channels,
            pcm,
            lease: None,
        }
    }

    pub fn tracked(mut self, tracker: &ResourceTracker) -> Self {
        self.lease = Some(tracker.lease());
        self
    }

    /// Sample frames per channel.
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            n => self.pcm.len() / n as usize,
        }
    }

    pub fn duration_us(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as i64 * 1_000_000) / self.sample_rate as i64
    }

    /// Release the buffer.
    pub fn close(self) {}
}
