//! A/V sync controller: shared queues for both media types drained against
//! one playback clock with a lateness threshold.
//!
//! Decoder callbacks push from whichever thread they run on; the render loop
//! drains. Each queue sits behind its own lock and callbacks run with no lock
//! held.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{PlaybackClock, TimeSource};
use crate::media::{AudioData, VideoFrame};

/// Default lateness/earliness window.
pub const DEFAULT_SYNC_THRESHOLD: Duration = Duration::from_millis(50);

/// What one [`SyncController::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncTick {
    pub video_rendered: usize,
    pub audio_rendered: usize,
    pub dropped: usize,
}

/// Shared A/V queues gated by a playback clock.
///
/// An item is taken once its timestamp is within the threshold of the clock
/// (`ts <= elapsed + threshold`). Taken items are handed out when they are no
/// more than the threshold late, and released unseen otherwise.
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<Shared>,
}

struct Shared {
    video: Mutex<VecDeque<VideoFrame>>,
    audio: Mutex<VecDeque<AudioData>>,
    clock: Mutex<PlaybackClock>,
    threshold_us: i64,
    dropped: AtomicU64,
}

impl SyncController {
    pub fn new(time: Arc<dyn TimeSource>, threshold: Duration) -> Self {
        Self {
            inner: Arc::new(Shared {
                video: Mutex::new(VecDeque::new()),
                audio: Mutex::new(VecDeque::new()),
                clock: Mutex::new(PlaybackClock::new(time)),
                threshold_us: i64::try_from(threshold.as_micros()).unwrap_or(i64::MAX),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn push_video(&self, frame: VideoFrame) {
        self.inner.video.lock().push_back(frame);
    }

    pub fn push_audio(&self, data: AudioData) {
        self.inner.audio.lock().push_back(data);
    }

    /// Start the clock at position zero.
    pub fn start(&self) {
        self.inner.clock.lock().start();
    }

    pub fn elapsed_us(&self) -> i64 {
        self.inner.clock.lock().elapsed_us()
    }

    /// Hand out due items. `on_video` and `on_audio` take ownership and must
    /// release what they receive.
    pub fn tick(&self, mut on_video: impl FnMut(VideoFrame), mut on_audio: impl FnMut(AudioData)) -> SyncTick {
        let elapsed = {
            let clock = self.inner.clock.lock();
            if !clock.is_started() || clock.is_paused() {
                return SyncTick::default();
            }
            clock.elapsed_us()
        };

        let mut tick = SyncTick::default();
        let (rendered, dropped) = self.drain(&self.inner.video, elapsed, |f| f.timestamp_us, &mut on_video);
        tick.video_rendered = rendered;
        tick.dropped += dropped;
        let (rendered, dropped) = self.drain(&self.inner.audio, elapsed, |a| a.timestamp_us, &mut on_audio);
        tick.audio_rendered = rendered;
        tick.dropped += dropped;

        if tick.dropped > 0 {
            self.inner.dropped.fetch_add(tick.dropped as u64, Ordering::Relaxed);
            tracing::debug!(dropped = tick.dropped, elapsed_us = elapsed, "dropped late media");
        }
        tick
    }

    fn drain<T>(
        &self,
        queue: &Mutex<VecDeque<T>>,
        elapsed: i64,
        timestamp: impl Fn(&T) -> i64,
        deliver: &mut impl FnMut(T),
    ) -> (usize, usize) {
        let threshold = self.inner.threshold_us;
        let horizon = elapsed.saturating_add(threshold);
        let floor = elapsed.saturating_sub(threshold);
        let (mut rendered, mut dropped) = (0, 0);

        loop {
            let next = {
                let mut queue = queue.lock();
                match queue.front() {
                    Some(item) if timestamp(item) <= horizon => queue.pop_front(),
                    _ => None,
                }
            };
            let Some(item) = next else {
                break;
            };

            if timestamp(&item) >= floor {
                deliver(item);
                rendered += 1;
            } else {
                drop(item);
                dropped += 1;
            }
        }

        (rendered, dropped)
    }

    pub fn pause(&self) {
        self.inner.clock.lock().pause();
    }

    pub fn resume(&self) {
        self.inner.clock.lock().resume();
    }

    /// Discard everything queued and continue from `position_us`.
    pub fn seek(&self, position_us: i64) {
        self.clear_queues();
        self.inner.clock.lock().seek(position_us);
    }

    /// Change speed, keeping the current position.
    pub fn set_playback_rate(&self, rate: f64) {
        self.inner.clock.lock().set_rate(rate);
    }

    /// Discard everything queued and stop the clock.
    pub fn reset(&self) {
        self.clear_queues();
        self.inner.clock.lock().reset();
        self.inner.dropped.store(0, Ordering::Relaxed);
    }

    /// Queued `(video, audio)` counts.
    pub fn queued(&self) -> (usize, usize) {
        (self.inner.video.lock().len(), self.inner.audio.lock().len())
    }

    /// Items dropped for lateness since creation or the last reset.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn clear_queues(&self) {
        let video: Vec<_> = self.inner.video.lock().drain(..).collect();
        let audio: Vec<_> = self.inner.audio.lock().drain(..).collect();
        drop(video);
        drop(audio);
    }
}

impl std::fmt::Debug for SyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (video, audio) = self.queued();
        f.debug_struct("SyncController")
            .field("video_queued", &video)
            .field("audio_queued", &audio)
            .field("threshold_us", &self.inner.threshold_us)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use crate::media::ResourceTracker;
    use bytes::Bytes;

    fn frame(ts: i64, tracker: &ResourceTracker) -> VideoFrame {
        VideoFrame::new(ts, 33_333, 64, 64, Bytes::new()).tracked(tracker)
    }

    fn audio(ts: i64, tracker: &ResourceTracker) -> AudioData {
        let pcm: Arc<[f32]> = vec![0.0; 2048].into();
        AudioData::new(ts, 48_000, 2, pcm).tracked(tracker)
    }

    fn controller() -> (Arc<ManualTimeSource>, SyncController) {
        let time = Arc::new(ManualTimeSource::new());
        let sync = SyncController::new(time.clone(), DEFAULT_SYNC_THRESHOLD);
        (time, sync)
    }

    #[test]
    fn test_late_frame_is_dropped() {
        let tracker = ResourceTracker::new();
        let (time, sync) = controller();
        sync.start();
        time.advance(1_000_000);

        // 100ms behind the clock: beyond the 50ms threshold
        sync.push_video(frame(900_000, &tracker));
        // 20ms behind: within threshold
        sync.push_video(frame(980_000, &tracker));

        let mut shown = Vec::new();
        let tick = sync.tick(|f| shown.push(f.timestamp_us), |_| {});
        assert_eq!(shown, vec![980_000]);
        assert_eq!(tick.dropped, 1);
        assert_eq!(sync.dropped(), 1);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_early_items_wait() {
        let tracker = ResourceTracker::new();
        let (time, sync) = controller();
        sync.start();
        sync.push_video(frame(40_000, &tracker));
        sync.push_video(frame(100_000, &tracker));
        sync.push_audio(audio(30_000, &tracker));

        // Within threshold ahead: taken now
        let tick = sync.tick(|f| f.close(), |a| a.close());
        assert_eq!(tick.video_rendered, 1);
        assert_eq!(tick.audio_rendered, 1);
        assert_eq!(sync.queued(), (1, 0));

        time.advance(60_000);
        let tick = sync.tick(|f| f.close(), |a| a.close());
        assert_eq!(tick.video_rendered, 1);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_not_started_or_paused_delivers_nothing() {
        let tracker = ResourceTracker::new();
        let (time, sync) = controller();
        sync.push_video(frame(0, &tracker));
        assert_eq!(sync.tick(|f| f.close(), |a| a.close()), SyncTick::default());

        sync.start();
        sync.pause();
        time.advance(1_000_000);
        assert_eq!(sync.tick(|f| f.close(), |a| a.close()), SyncTick::default());
        assert_eq!(sync.elapsed_us(), 0);

        sync.resume();
        assert_eq!(sync.tick(|f| f.close(), |a| a.close()).video_rendered, 1);
    }

    #[test]
    fn test_seek_clears_and_repositions() {
        let tracker = ResourceTracker::new();
        let (time, sync) = controller();
        sync.start();
        sync.push_video(frame(0, &tracker));
        sync.push_audio(audio(0, &tracker));

        sync.seek(10_000_000);
        assert_eq!(sync.queued(), (0, 0));
        assert_eq!(tracker.live(), 0);

        time.advance(5_000);
        assert_eq!(sync.elapsed_us(), 10_005_000);
    }

    #[test]
    fn test_rate_keeps_position() {
        let (time, sync) = controller();
        sync.start();
        time.advance(100_000);
        sync.set_playback_rate(2.0);
        assert_eq!(sync.elapsed_us(), 100_000);
        time.advance(10_000);
        assert_eq!(sync.elapsed_us(), 120_000);
    }

    #[test]
    fn test_reset() {
        let tracker = ResourceTracker::new();
        let (time, sync) = controller();
        sync.start();
        time.advance(1_000_000);
        sync.push_video(frame(0, &tracker));
        sync.tick(|f| f.close(), |a| a.close());
        sync.push_video(frame(2_000_000, &tracker));

        sync.reset();
        assert_eq!(sync.queued(), (0, 0));
        assert_eq!(sync.dropped(), 0);
        assert_eq!(sync.elapsed_us(), 0);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_push_from_other_thread() {
        let tracker = ResourceTracker::new();
        let (_time, sync) = controller();
        sync.start();

        let producer = sync.clone();
        let frames = tracker.clone();
        std::thread::spawn(move || {
            for i in 0..10 {
                producer.push_video(frame(i, &frames));
            }
        })
        .join()
        .unwrap();

        let tick = sync.tick(|f| f.close(), |a| a.close());
        assert_eq!(tick.video_rendered, 10);
        assert_eq!(tracker.live(), 0);
    }
}
