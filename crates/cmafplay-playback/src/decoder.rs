//! Platform decode service abstraction and the state shared by the video and
//! audio decoder wrappers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use cmafplay_media::{AudioConfig, Sample, SampleKind, VideoConfig};

use crate::media::{AudioData, VideoFrame};
use crate::{Error, Result};

/// Receives decoder output, possibly from another thread.
pub type OutputCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Receives errors a decoder reports after submission.
pub type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

/// Lifecycle of a decoder; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    Unconfigured,
    Configured,
    Closed,
}

/// Parameters a platform video decoder is configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDecoderConfig {
    pub codec: String,
    /// `avcC` record.
    pub description: Bytes,
    pub coded_width: u32,
    pub coded_height: u32,
}

impl From<&VideoConfig> for VideoDecoderConfig {
    fn from(track: &VideoConfig) -> Self {
        Self {
            codec: track.codec.clone(),
            description: track.description.clone(),
            coded_width: track.coded_width.into(),
            coded_height: track.coded_height.into(),
        }
    }
}

/// Parameters a platform audio decoder is configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDecoderConfig {
    pub codec: String,
    /// AudioSpecificConfig, when the init segment carried one.
    pub description: Option<Bytes>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl From<&AudioConfig> for AudioDecoderConfig {
    fn from(track: &AudioConfig) -> Self {
        Self {
            codec: track.codec.clone(),
            description: track.description.clone(),
            sample_rate: track.sample_rate,
            channels: track.channels,
        }
    }
}

/// A sample in the form a platform decoder accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub kind: SampleKind,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub data: Bytes,
}

impl From<&Sample> for EncodedChunk {
    fn from(sample: &Sample) -> Self {
        Self {
            kind: sample.kind,
            timestamp_us: sample.timestamp_us,
            duration_us: sample.duration_us,
            data: sample.payload.clone(),
        }
    }
}

/// Entry point to the platform's codecs.
#[async_trait::async_trait]
pub trait DecodeService: Send + Sync {
    /// Whether the platform can decode at all.
    fn is_supported(&self) -> bool;

    async fn is_video_config_supported(&self, config: &VideoDecoderConfig) -> bool;

    async fn is_audio_config_supported(&self, config: &AudioDecoderConfig) -> bool;

    /// Create an unconfigured video decoder delivering frames to `output`.
    fn create_video_decoder(
        &self,
        output: OutputCallback<VideoFrame>,
        error: ErrorCallback,
    ) -> Result<Box<dyn PlatformDecoder<VideoDecoderConfig>>>;

    /// Create an unconfigured audio decoder delivering buffers to `output`.
    fn create_audio_decoder(
        &self,
        output: OutputCallback<AudioData>,
        error: ErrorCallback,
    ) -> Result<Box<dyn PlatformDecoder<AudioDecoderConfig>>>;
}

/// One platform decoder session.
///
/// Output is delivered through the callbacks given at creation, possibly
/// after `decode` has returned.
#[async_trait::async_trait]
pub trait PlatformDecoder<C>: Send {
    fn configure(&mut self, config: &C) -> Result<()>;

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()>;

    /// Resolve once every submitted chunk has produced output or been discarded.
    async fn flush(&mut self) -> Result<()>;

    fn close(&mut self);

    fn state(&self) -> CodecState;
}

/// Lifecycle handling shared by [`crate::VideoDecoder`] and
/// [`crate::AudioDecoder`].
///
/// The closed flag is set before the platform decoder is told to close, and
/// output callbacks check it, so nothing is delivered once `close` returns.
pub(crate) struct DecoderCore<C> {
    label: &'static str,
    decoder: Option<Box<dyn PlatformDecoder<C>>>,
    state: CodecState,
    closed: Arc<AtomicBool>,
    on_error: ErrorCallback,
    submitted: u64,
}

impl<C> DecoderCore<C> {
    pub(crate) fn new(label: &'static str, on_error: ErrorCallback) -> Self {
        Self {
            label,
            decoder: None,
            state: CodecState::Unconfigured,
            closed: Arc::new(AtomicBool::new(false)),
            on_error,
            submitted: 0,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> CodecState {
        self.state
    }

    pub(crate) fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Wrap an output callback so it goes quiet once the wrapper closes.
    /// Items arriving afterwards are dropped, which releases them.
    pub(crate) fn gate<T: 'static>(&self, output: OutputCallback<T>) -> OutputCallback<T> {
        let closed = Arc::clone(&self.closed);
        Arc::new(move |item: T| {
            if !closed.load(Ordering::Acquire) {
                output(item);
            }
        })
    }

    pub(crate) fn error_callback(&self) -> ErrorCallback {
        let closed = Arc::clone(&self.closed);
        let on_error = Arc::clone(&self.on_error);
        Arc::new(move |err: Error| {
            if !closed.load(Ordering::Acquire) {
                on_error(err);
            }
        })
    }

    pub(crate) fn report(&self, err: Error) {
        tracing::warn!(decoder = self.label, error = %err, "decoder error");
        (self.on_error)(err);
    }

    /// Configure `decoder` and make it current, replacing any earlier one.
    pub(crate) fn install(&mut self, mut decoder: Box<dyn PlatformDecoder<C>>, config: &C) -> bool {
        if let Err(err) = decoder.configure(config) {
            decoder.close();
            self.report(err);
            return false;
        }
        if let Some(mut previous) = self.decoder.replace(decoder) {
            previous.close();
        }
        self.state = CodecState::Configured;
        true
    }

    /// Submit a chunk. Does nothing once closed or before configuration.
    pub(crate) fn decode(&mut self, chunk: EncodedChunk) {
        if self.is_closed() {
            return;
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        if decoder.state() != CodecState::Configured {
            return;
        }

        self.submitted += 1;
        if let Err(err) = decoder.decode(chunk) {
            self.report(err);
        }
    }

    /// Best-effort drain; errors are logged and dropped.
    pub(crate) async fn flush(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Some(decoder) = self.decoder.as_mut() {
            if let Err(err) = decoder.flush().await {
                tracing::debug!(decoder = self.label, error = %err, "flush failed");
            }
        }
    }

    pub(crate) fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state = CodecState::Closed;
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
        tracing::debug!(decoder = self.label, submitted = self.submitted, "decoder closed");
    }
}

impl<C> Drop for DecoderCore<C> {
    fn drop(&mut self) {
        self.close();
    }
}
