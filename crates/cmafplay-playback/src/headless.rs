//! Platform implementations with no real codec or device.
//!
//! [`PassthroughDecodeService`] turns every submitted chunk into one decoded
//! frame or audio buffer on a background task, so the whole pipeline can run
//! and be measured without a media stack.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use cmafplay_media::defaults;
use tokio::sync::{mpsc, oneshot};

use crate::audio_renderer::AudioOutput;
use crate::clock::{SystemTimeSource, TimeSource};
use crate::decoder::{
    AudioDecoderConfig, CodecState, DecodeService, EncodedChunk, ErrorCallback, OutputCallback,
    PlatformDecoder, VideoDecoderConfig,
};
use crate::media::{AudioData, ResourceTracker, VideoFrame};
use crate::video_renderer::FrameSink;
use crate::{Error, Result};

/// Decode service accepting H.264 (`avc1.*`) and AAC (`mp4a.*`).
#[derive(Debug, Clone)]
pub struct PassthroughDecodeService {
    available: bool,
    tracker: ResourceTracker,
}

impl PassthroughDecodeService {
    pub fn new() -> Self {
        Self::with_tracker(ResourceTracker::new())
    }

    /// Attach `tracker` to every frame and buffer produced.
    pub fn with_tracker(tracker: ResourceTracker) -> Self {
        Self {
            available: true,
            tracker,
        }
    }

    /// A service reporting that the platform cannot decode at all.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            tracker: ResourceTracker::new(),
        }
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }
}

impl Default for PassthroughDecodeService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DecodeService for PassthroughDecodeService {
    fn is_supported(&self) -> bool {
        self.available
    }

    async fn is_video_config_supported(&self, config: &VideoDecoderConfig) -> bool {
        (config.codec.starts_with("avc1.") || config.codec.starts_with("avc3."))
            && config.coded_width > 0
            && config.coded_height > 0
    }

    async fn is_audio_config_supported(&self, config: &AudioDecoderConfig) -> bool {
        config.codec.starts_with("mp4a.") && config.sample_rate > 0 && config.channels > 0
    }

    fn create_video_decoder(
        &self,
        output: OutputCallback<VideoFrame>,
        error: ErrorCallback,
    ) -> Result<Box<dyn PlatformDecoder<VideoDecoderConfig>>> {
        Ok(Box::new(PassthroughDecoder::new(
            output,
            error,
            self.tracker.clone(),
            video_frame,
        )))
    }

    fn create_audio_decoder(
        &self,
        output: OutputCallback<AudioData>,
        error: ErrorCallback,
    ) -> Result<Box<dyn PlatformDecoder<AudioDecoderConfig>>> {
        Ok(Box::new(PassthroughDecoder::new(
            output,
            error,
            self.tracker.clone(),
            audio_data,
        )))
    }
}

fn video_frame(config: &VideoDecoderConfig, chunk: &EncodedChunk) -> VideoFrame {
    VideoFrame::new(
        chunk.timestamp_us,
        chunk.duration_us,
        config.coded_width,
        config.coded_height,
        chunk.data.clone(),
    )
}

fn audio_data(config: &AudioDecoderConfig, chunk: &EncodedChunk) -> AudioData {
    let frames = if chunk.duration_us > 0 {
        (chunk.duration_us * config.sample_rate as i64 + 500_000) / 1_000_000
    } else {
        defaults::AAC_FRAME_SAMPLES as i64
    };
    let len = frames.max(0) as usize * config.channels as usize;
    AudioData::new(
        chunk.timestamp_us,
        config.sample_rate,
        config.channels,
        vec![0.0; len].into(),
    )
}

enum Command {
    Decode(EncodedChunk),
    Flush(oneshot::Sender<()>),
}

type Produce<C, T> = fn(&C, &EncodedChunk) -> T;

struct PassthroughDecoder<C, T> {
    state: CodecState,
    output: OutputCallback<T>,
    error: ErrorCallback,
    tracker: ResourceTracker,
    produce: Produce<C, T>,
    tx: Option<mpsc::UnboundedSender<Command>>,
}

impl<C, T> PassthroughDecoder<C, T> {
    fn new(output: OutputCallback<T>, error: ErrorCallback, tracker: ResourceTracker, produce: Produce<C, T>) -> Self {
        Self {
            state: CodecState::Unconfigured,
            output,
            error,
            tracker,
            produce,
            tx: None,
        }
    }
}

/// Decoded output that can carry a resource lease.
trait Tracked {
    fn track(self, tracker: &ResourceTracker) -> Self;
}

impl Tracked for VideoFrame {
    fn track(self, tracker: &ResourceTracker) -> Self {
        self.tracked(tracker)
    }
}

impl Tracked for AudioData {
    fn track(self, tracker: &ResourceTracker) -> Self {
        self.tracked(tracker)
    }
}

#[async_trait::async_trait]
impl<C, T> PlatformDecoder<C> for PassthroughDecoder<C, T>
where
    C: Clone + Send + Sync + 'static,
    T: Tracked + Send + 'static,
{
    fn configure(&mut self, config: &C) -> Result<()> {
        if self.state == CodecState::Closed {
            return Err(Error::DecoderConfig("decoder is closed".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::unsupported(format!("no async runtime: {e}")))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = config.clone();
        let output = Arc::clone(&self.output);
        let error = Arc::clone(&self.error);
        let tracker = self.tracker.clone();
        let produce = self.produce;

        runtime.spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Decode(chunk) if chunk.data.is_empty() => {
                        error(Error::Decode(format!("empty chunk at {}us", chunk.timestamp_us)));
                    }
                    Command::Decode(chunk) => output(produce(&config, &chunk).track(&tracker)),
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        // Replacing the sender ends any previous worker once it drains.
        self.tx = Some(tx);
        self.state = CodecState::Configured;
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        let tx = match (&self.tx, self.state) {
            (Some(tx), CodecState::Configured) => tx,
            _ => return Err(Error::Decode("decoder is not configured".into())),
        };
        tx.send(Command::Decode(chunk))
            .map_err(|_| Error::Decode("decoder worker stopped".into()))
    }

    async fn flush(&mut self) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        let (done, wait) = oneshot::channel();
        tx.send(Command::Flush(done))
            .map_err(|_| Error::Decode("decoder worker stopped".into()))?;
        wait.await
            .map_err(|_| Error::Decode("decoder worker stopped during flush".into()))
    }

    fn close(&mut self) {
        self.state = CodecState::Closed;
        self.tx = None;
    }

    fn state(&self) -> CodecState {
        self.state
    }
}

/// Frame sink that counts presented frames.
///
/// Clones share their counters.
#[derive(Debug, Clone, Default)]
pub struct CountingFrameSink {
    frames: Arc<AtomicU64>,
    last_timestamp_us: Arc<AtomicI64>,
}

impl CountingFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn last_timestamp_us(&self) -> Option<i64> {
        (self.frames() > 0).then(|| self.last_timestamp_us.load(Ordering::Relaxed))
    }
}

impl FrameSink for CountingFrameSink {
    fn render(&mut self, frame: &VideoFrame) {
        self.last_timestamp_us.store(frame.timestamp_us, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Audio output whose timeline is the monotonic wall clock.
///
/// Clones share their counters.
#[derive(Debug, Clone)]
pub struct SystemAudioOutput {
    timeline: Arc<SystemTimeSource>,
    buffers: Arc<AtomicU64>,
    frames: Arc<AtomicU64>,
}

impl SystemAudioOutput {
    pub fn new() -> Self {
        Self {
            timeline: Arc::new(SystemTimeSource::new()),
            buffers: Arc::new(AtomicU64::new(0)),
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Buffers scheduled so far.
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    /// PCM frames scheduled so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Default for SystemAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for SystemAudioOutput {
    fn timeline(&self) -> Arc<dyn TimeSource> {
        self.timeline.clone()
    }

    fn schedule(&mut self, data: &AudioData, at_us: i64) {
        tracing::trace!(timestamp_us = data.timestamp_us, at_us, "audio scheduled");
        self.buffers.fetch_add(1, Ordering::Relaxed);
        self.frames.fetch_add(data.frames() as u64, Ordering::Relaxed);
    }
}
