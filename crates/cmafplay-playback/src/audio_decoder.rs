//! Audio decoder wrapper.

use std::sync::Arc;

use cmafplay_media::{AudioConfig, Sample};

use crate::decoder::{AudioDecoderConfig, CodecState, DecodeService, DecoderCore, EncodedChunk, OutputCallback};
use crate::media::AudioData;
use crate::Error;

/// Drives a platform audio decoder through `unconfigured -> configured -> closed`.
pub struct AudioDecoder {
    service: Arc<dyn DecodeService>,
    on_data: OutputCallback<AudioData>,
    core: DecoderCore<AudioDecoderConfig>,
}

impl AudioDecoder {
    pub fn new(
        service: Arc<dyn DecodeService>,
        on_data: impl Fn(AudioData) + Send + Sync + 'static,
        on_error: impl Fn(Error) + Send + Sync + 'static,
    ) -> Self {
        Self {
            service,
            on_data: Arc::new(on_data),
            core: DecoderCore::new("audio", Arc::new(on_error)),
        }
    }

    pub async fn configure(&mut self, track: &AudioConfig) -> bool {
        if self.core.is_closed() {
            return false;
        }
        if !self.service.is_supported() {
            self.core.report(Error::unsupported("audio decoding is not available"));
            return false;
        }

        let config = AudioDecoderConfig::from(track);
        if !self.service.is_audio_config_supported(&config).await {
            self.core.report(Error::DecoderConfig(format!(
                "{} {}Hz {}ch is not supported",
                config.codec, config.sample_rate, config.channels
            )));
            return false;
        }

        let output = self.core.gate(Arc::clone(&self.on_data));
        let decoder = match self.service.create_audio_decoder(output, self.core.error_callback()) {
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
                sample_rate = config.sample_rate,
                channels = config.channels,
                "audio decoder configured"
            );
        }
        configured
    }

    pub fn decode(&mut self, sample: &Sample) {
        self.core.decode(EncodedChunk::from(sample));
    }

    pub async fn flush(&mut self) {
        self.core.flush().await;
    }

    pub fn close(&mut self) {
        self.core.close();
    }

    pub fn state(&self) -> CodecState {
        self.core.state()
    }

    pub fn is_configured(&self) -> bool {
        self.core.state() == CodecState::Configured
    }

    pub fn submitted(&self) -> u64 {
        self.core.submitted()
    }
}
