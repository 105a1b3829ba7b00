//! Video decoder wrapper.

use std::sync::Arc;

use cmafplay_media::{Sample, VideoConfig};

use crate::decoder::{CodecState, DecodeService, DecoderCore, EncodedChunk, OutputCallback, VideoDecoderConfig};
use crate::media::VideoFrame;
use crate::Error;

/// Drives a platform video decoder through `unconfigured -> configured -> closed`.
///
/// Failures are reported through the error callback; no method returns an
/// error.
pub struct VideoDecoder {
    service: Arc<dyn DecodeService>,
    on_frame: OutputCallback<VideoFrame>,
    core: DecoderCore<VideoDecoderConfig>,
}

impl VideoDecoder {
    pub fn new(
        service: Arc<dyn DecodeService>,
        on_frame: impl Fn(VideoFrame) + Send + Sync + 'static,
        on_error: impl Fn(Error) + Send + Sync + 'static,
    ) -> Self {
        Self {
            service,
            on_frame: Arc::new(on_frame),
            core: DecoderCore::new("video", Arc::new(on_error)),
        }
    }

    /// Check support for `track` and create a decoder for it.
    ///
    /// Returns `false` after reporting the reason when the platform cannot
    /// decode the track or the wrapper is closed.
    pub async fn configure(&mut self, track: &VideoConfig) -> bool {
        if self.core.is_closed() {
            return false;
        }
        if !self.service.is_supported() {
            self.core.report(Error::unsupported("video decoding is not available"));
            return false;
        }

        let config = VideoDecoderConfig::from(track);
        if !self.service.is_video_config_supported(&config).await {
            self.core.report(Error::DecoderConfig(format!(
                "{} {}x{} is not supported",
                config.codec, config.coded_width, config.coded_height
            )));
            return false;
        }

        let output = self.core.gate(Arc::clone(&self.on_frame));
        let decoder = match self.service.create_video_decoder(output, self.core.error_callback()) {
            Ok(decoder) => decoder,
            Err(err) => {
                self.core.report(err);
                return false;
            }
        };

        let configured = self.core.install(decoder, &config);
        if configured {
            tracing::debug!(
                codec = %config.codec,
                width = config.coded_width,
                height = config.coded_height,
                "video decoder configured"
            );
        }
        configured
    }

    /// Submit a sample. No-op when closed or not configured.
    pub fn decode(&mut self, sample: &Sample) {
        let mut chunk = EncodedChunk::from(sample);
        if chunk.duration_us <= 0 {
            chunk.duration_us = 1;
        }
        self.core.decode(chunk);
    }

    /// Wait for submitted samples to come out. Errors are ignored.
    pub async fn flush(&mut self) {
        self.core.flush().await;
    }

    /// Release the decoder. Idempotent.
    pub fn close(&mut self) {
        self.core.close();
    }

    pub fn state(&self) -> CodecState {
        self.core.state()
    }

    pub fn is_configured(&self) -> bool {
        self.core.state() == CodecState::Configured
    }

    /// Samples handed to the platform decoder.
    pub fn submitted(&self) -> u64 {
        self.core.submitted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::PassthroughDecodeService;
    use crate::media::ResourceTracker;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use cmafplay_media::SampleKind;
    use parking_lot::Mutex;

    fn track(codec: &str) -> VideoConfig {
        VideoConfig {
            track_id: 1,
            timescale: 90_000,
            codec: codec.to_string(),
            description: Bytes::from_static(&[1, 0x42, 0xE0, 0x1E]),
            coded_width: 640,
            coded_height: 360,
        }
    }

    fn sample(ts: i64, duration: i64) -> Sample {
        Sample {
            kind: SampleKind::Key,
            timestamp_us: ts,
            duration_us: duration,
            payload: Bytes::from_static(&[0, 0, 0, 1, 0x65]),
        }
    }

    struct Harness {
        decoder: VideoDecoder,
        frames: Arc<Mutex<Vec<VideoFrame>>>,
        errors: Arc<Mutex<Vec<Error>>>,
    }

    fn harness(service: PassthroughDecodeService) -> Harness {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (f, e) = (frames.clone(), errors.clone());
        let decoder = VideoDecoder::new(
            Arc::new(service),
            move |frame| f.lock().push(frame),
            move |err| e.lock().push(err),
        );
        Harness { decoder, frames, errors }
    }

    #[tokio::test]
    async fn test_decode_and_flush() {
        let mut h = harness(PassthroughDecodeService::new());
        assert_eq!(h.decoder.state(), CodecState::Unconfigured);
        assert!(h.decoder.configure(&track("avc1.42E01E")).await);
        assert!(h.decoder.is_configured());

        h.decoder.decode(&sample(0, 33_333));
        h.decoder.decode(&sample(33_333, 0));
        h.decoder.flush().await;

        let frames = h.frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].width, 640);
        assert_eq!(frames[1].timestamp_us, 33_333);
        // Zero duration is raised to one microsecond
        assert_eq!(frames[1].duration_us, 1);
    }

    #[tokio::test]
    async fn test_unsupported_codec_returns_false() {
        let mut h = harness(PassthroughDecodeService::new());
        assert!(!h.decoder.configure(&track("hvc1.1.6.L93.B0")).await);
        assert_eq!(h.decoder.state(), CodecState::Unconfigured);
        assert_matches!(h.errors.lock().as_slice(), [Error::DecoderConfig(_)]);
    }

    #[tokio::test]
    async fn test_unavailable_platform_returns_false() {
        let mut h = harness(PassthroughDecodeService::unavailable());
        assert!(!h.decoder.configure(&track("avc1.42E01E")).await);
        assert_matches!(h.errors.lock().as_slice(), [Error::Unsupported(_)]);
    }

    #[tokio::test]
    async fn test_decode_before_configure_is_ignored() {
        let mut h = harness(PassthroughDecodeService::new());
        h.decoder.decode(&sample(0, 33_333));
        h.decoder.flush().await;
        assert_eq!(h.decoder.submitted(), 0);
        assert!(h.frames.lock().is_empty());
    }

    #[tokio::test]
    async fn test_decode_after_close_is_noop() {
        let tracker = ResourceTracker::new();
        let mut h = harness(PassthroughDecodeService::with_tracker(tracker.clone()));
        assert!(h.decoder.configure(&track("avc1.42E01E")).await);

        // Submitted but possibly not yet decoded when close runs
        h.decoder.decode(&sample(0, 33_333));
        h.decoder.close();
        h.decoder.decode(&sample(33_333, 33_333));
        h.decoder.flush().await;
        tokio::task::yield_now().await;

        assert_eq!(h.decoder.state(), CodecState::Closed);
        assert_eq!(h.decoder.submitted(), 1);
        assert!(h.errors.lock().is_empty());
        // Whatever the worker produced after close was released, not delivered
        let delivered = h.frames.lock().len();
        assert!(delivered <= 1);
        assert_eq!(tracker.live(), delivered);

        h.decoder.close();
        assert!(!h.decoder.configure(&track("avc1.42E01E")).await);
    }

    #[tokio::test]
    async fn test_decode_error_keeps_configured_state() {
        let mut h = harness(PassthroughDecodeService::new());
        assert!(h.decoder.configure(&track("avc1.42E01E")).await);

        let mut empty = sample(0, 33_333);
        empty.payload = Bytes::new();
        h.decoder.decode(&empty);
        h.decoder.decode(&sample(33_333, 33_333));
        h.decoder.flush().await;

        assert_matches!(h.errors.lock().as_slice(), [Error::Decode(_)]);
        assert!(h.decoder.is_configured());
        assert_eq!(h.frames.lock().len(), 1);
    }
}
