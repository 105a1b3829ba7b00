//! Scheduling of decoded audio onto an output timeline.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clock::{ExternalClock, TimeSource};
use crate::media::AudioData;

/// An audio device accepting PCM at positions on its own timeline.
pub trait AudioOutput: Send {
    /// The output timeline, in microseconds.
    fn timeline(&self) -> Arc<dyn TimeSource>;

    /// Play `data` starting at `at_us` on the output timeline.
    fn schedule(&mut self, data: &AudioData, at_us: i64);
}

impl<T: AudioOutput + ?Sized> AudioOutput for Box<T> {
    fn timeline(&self) -> Arc<dyn TimeSource> {
        (**self).timeline()
    }

    fn schedule(&mut self, data: &AudioData, at_us: i64) {
        (**self).schedule(data, at_us)
    }
}

/// Producer side of an [`AudioRenderer`] queue.
#[derive(Debug, Clone)]
pub struct AudioQueue {
    tx: mpsc::UnboundedSender<AudioData>,
}

impl AudioQueue {
    pub fn push(&self, data: AudioData) {
        if let Err(mpsc::error::SendError(data)) = self.tx.send(data) {
            data.close();
        }
    }
}

/// The pairing of the first buffer's timestamp with the output time it was
/// scheduled at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioBase {
    pub timestamp_us: i64,
    pub output_us: i64,
}

type BaseCallback = Box<dyn FnMut(AudioBase) + Send>;

/// Schedules buffers at `base.output + (timestamp - base.timestamp)`, never
/// earlier than the output's current time.
///
/// Buffers received before [`AudioRenderer::start`] wait in the queue.
pub struct AudioRenderer<O> {
    output: O,
    timeline: Arc<dyn TimeSource>,
    rx: mpsc::UnboundedReceiver<AudioData>,
    tx: mpsc::UnboundedSender<AudioData>,
    queue: VecDeque<AudioData>,
    started: bool,
    base: Option<AudioBase>,
    on_base: Option<BaseCallback>,
    scheduled: u64,
    /// Output time at which the last scheduled buffer ends.
    scheduled_until_us: i64,
}

impl<O: AudioOutput> AudioRenderer<O> {
    pub fn new(output: O) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let timeline = output.timeline();
        Self {
            output,
            timeline,
            rx,
            tx,
            queue: VecDeque::new(),
            started: false,
            base: None,
            on_base: None,
            scheduled: 0,
            scheduled_until_us: 0,
        }
    }

    /// Called once, when the first buffer fixes the base pair.
    pub fn on_base(mut self, callback: impl FnMut(AudioBase) + Send + 'static) -> Self {
        self.on_base = Some(Box::new(callback));
        self
    }

    pub fn queue(&self) -> AudioQueue {
        AudioQueue { tx: self.tx.clone() }
    }

    pub fn enqueue(&mut self, data: AudioData) {
        self.queue.push_back(data);
    }

    /// Begin scheduling, including anything queued so far.
    pub fn start(&mut self) {
        if !self.started {
            self.started = true;
            self.tick();
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Schedule every queued buffer. Returns the number scheduled.
    pub fn tick(&mut self) -> usize {
        while let Ok(data) = self.rx.try_recv() {
            self.queue.push_back(data);
        }
        if !self.started {
            return 0;
        }

        let mut count = 0;
        while let Some(data) = self.queue.pop_front() {
            self.schedule(data);
            count += 1;
        }
        count
    }

    pub fn base(&self) -> Option<AudioBase> {
        self.base
    }

    /// A clock reading media time from the output timeline, once the base is
    /// known. Returned as `(clock, base)` for [`crate::VideoRenderer::set_clock`].
    pub fn media_clock(&self) -> Option<(ExternalClock, i64)> {
        let base = self.base?;
        let timeline = Arc::clone(&self.timeline);
        let clock: ExternalClock = Arc::new(move || timeline.now_us());
        Some((clock, base.output_us - base.timestamp_us))
    }

    /// Whether everything scheduled has finished playing.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.timeline.now_us() >= self.scheduled_until_us
    }

    pub fn scheduled(&self) -> u64 {
        self.scheduled
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Release queued buffers and reset timing state. Required before reuse;
    /// scheduling resumes only after another [`AudioRenderer::start`].
    pub fn clear(&mut self) {
        while let Ok(data) = self.rx.try_recv() {
            data.close();
        }
        self.queue.clear();
        self.started = false;
        self.base = None;
        self.scheduled = 0;
        self.scheduled_until_us = 0;
    }

    fn schedule(&mut self, data: AudioData) {
        let now = self.timeline.now_us();
        let base = match self.base {
            Some(base) => base,
            None => {
                let base = AudioBase {
                    timestamp_us: data.timestamp_us,
                    output_us: now,
                };
                tracing::debug!(timestamp_us = base.timestamp_us, output_us = base.output_us, "audio base set");
                self.base = Some(base);
                if let Some(callback) = self.on_base.as_mut() {
                    callback(base);
                }
                base
            }
        };

        let at = (base.output_us + (data.timestamp_us - base.timestamp_us)).max(now);
        self.output.schedule(&data, at);
        self.scheduled += 1;
        self.scheduled_until_us = self.scheduled_until_us.max(at + data.duration_us());
        data.close();
    }
}

impl<O> Drop for AudioRenderer<O> {
    fn drop(&mut self) {
        self.rx.close();
        while let Ok(data) = self.rx.try_recv() {
            data.close();
        }
    }
}
