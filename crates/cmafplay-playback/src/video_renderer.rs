//! Timed presentation of decoded video frames.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::{ExternalClock, PlaybackClock, TimeSource};
use crate::media::VideoFrame;

/// Where presented frames go.
pub trait FrameSink: Send {
    fn render(&mut self, frame: &VideoFrame);
}

/// Producer side of a renderer's frame FIFO, handed to decoder callbacks.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    tx: mpsc::UnboundedSender<VideoFrame>,
}

impl FrameQueue {
    /// Append a frame. If the renderer is gone the frame is released.
    pub fn push(&self, frame: VideoFrame) {
        if let Err(mpsc::error::SendError(frame)) = self.tx.send(frame) {
            frame.close();
        }
    }
}

/// Counters kept by a [`VideoRenderer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStats {
    pub rendered: u64,
    /// Frames released without drawing because they were too late.
    pub dropped: u64,
    /// Frames released by [`VideoRenderer::clear`].
    pub discarded: u64,
}

/// Presents frames in FIFO order once the clock reaches their timestamp.
///
/// On its own clock, timestamps are taken relative to the first frame and
/// elapsed time counts from its arrival. With an external clock attached
/// timestamps are compared as-is.
pub struct VideoRenderer<S> {
    sink: S,
    rx: mpsc::UnboundedReceiver<VideoFrame>,
    tx: mpsc::UnboundedSender<VideoFrame>,
    queue: VecDeque<VideoFrame>,
    clock: PlaybackClock,
    first_timestamp: Option<i64>,
    late_threshold_us: Option<i64>,
    stats: VideoStats,
}

impl<S: FrameSink> VideoRenderer<S> {
    pub fn new(sink: S, time: Arc<dyn TimeSource>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sink,
            rx,
            tx,
            queue: VecDeque::new(),
            clock: PlaybackClock::new(time),
            first_timestamp: None,
            late_threshold_us: None,
            stats: VideoStats::default(),
        }
    }

    /// Drop frames that are more than `threshold` behind an external clock.
    pub fn with_late_threshold(mut self, threshold: Duration) -> Self {
        self.late_threshold_us = i64::try_from(threshold.as_micros()).ok();
        self
    }

    pub fn queue(&self) -> FrameQueue {
        FrameQueue { tx: self.tx.clone() }
    }

    /// Append a frame from the owning thread.
    pub fn enqueue(&mut self, frame: VideoFrame) {
        self.accept(frame);
    }

    /// Slave presentation to `clock`; elapsed time becomes `clock() - base_us`.
    pub fn set_clock(&mut self, clock: ExternalClock, base_us: i64) {
        tracing::debug!(base_us, "video following external clock");
        self.clock.set_external(clock, base_us);
    }

    pub fn is_external_clock(&self) -> bool {
        self.clock.is_external()
    }

    pub fn pause(&mut self) {
        self.clock.pause();
    }

    pub fn resume(&mut self) {
        self.clock.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    /// Present every frame that is due. Returns the number drawn.
    pub fn tick(&mut self) -> usize {
        self.pull();
        if self.clock.is_paused() || !self.clock.is_started() {
            return 0;
        }

        let elapsed = self.clock.elapsed_us();
        let external = self.clock.is_external();
        let mut drawn = 0;

        while let Some(front) = self.queue.front() {
            let frame_time = self.frame_time(front.timestamp_us);
            if frame_time > elapsed {
                break;
            }
            let Some(frame) = self.queue.pop_front() else {
                break;
            };

            let late = elapsed - frame_time;
            if external && self.late_threshold_us.is_some_and(|limit| late > limit) {
                tracing::trace!(timestamp_us = frame.timestamp_us, late_us = late, "dropping late frame");
                self.stats.dropped += 1;
            } else {
                self.sink.render(&frame);
                self.stats.rendered += 1;
                drawn += 1;
            }
            frame.close();
        }

        drawn
    }

    /// Frames waiting to be presented.
    pub fn queued(&mut self) -> usize {
        self.pull();
        self.queue.len()
    }

    /// Release every queued frame and reset timing.
    pub fn clear(&mut self) {
        self.pull();
        let discarded = self.queue.len() as u64;
        // Dropping the frames releases them.
        self.queue.clear();
        self.stats.discarded += discarded;
        self.first_timestamp = None;
        self.clock.reset();
        if discarded > 0 {
            tracing::debug!(discarded, "video queue cleared");
        }
    }

    pub fn stats(&self) -> VideoStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Tick every `interval` until `cancel` fires, then clear.
    pub async fn run(&mut self, interval: Duration, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
        self.clear();
    }

    fn pull(&mut self) {
        while let Ok(frame) = self.rx.try_recv() {
            self.accept(frame);
        }
    }

    fn accept(&mut self, frame: VideoFrame) {
        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(frame.timestamp_us);
            self.clock.start();
        }
        self.queue.push_back(frame);
    }

    fn frame_time(&self, timestamp_us: i64) -> i64 {
        if self.clock.is_external() {
            timestamp_us
        } else {
            timestamp_us - self.first_timestamp.unwrap_or(timestamp_us)
        }
    }
}

impl<S> Drop for VideoRenderer<S> {
    fn drop(&mut self) {
        self.rx.close();
        while let Ok(frame) = self.rx.try_recv() {
            frame.close();
        }
    }
}
