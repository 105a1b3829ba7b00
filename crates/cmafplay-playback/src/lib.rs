//! cmafplay-playback: fetching, decoding, rendering and A/V sync
//!
//! This crate drives the I/O-free parsers in `cmafplay-media` against a
//! network and a platform media stack. Codecs and output devices sit behind
//! traits ([`DecodeService`], [`FrameSink`], [`AudioOutput`]); the
//! [`headless`] module implements them without real hardware.
//!
//! # Modules
//!
//! - `fetch` - HTTP GET with cancellation
//! - `manifest` - HLS/DASH loading and master playlist resolution
//! - `video_decoder`, `audio_decoder` - Decoder lifecycle wrappers
//! - `video_renderer`, `audio_renderer` - Timed presentation
//! - `sync` - Shared A/V queues with a lateness threshold
//! - `session` - One stream from manifest to renderer

pub mod audio_decoder;
pub mod audio_renderer;
pub mod clock;
pub mod decoder;
pub mod error;
pub mod fetch;
pub mod headless;
pub mod manifest;
pub mod media;
pub mod session;
pub mod sync;
pub mod video_decoder;
pub mod video_renderer;

pub use audio_decoder::AudioDecoder;
pub use audio_renderer::{AudioOutput, AudioRenderer};
pub use clock::{ManualTimeSource, PlaybackClock, SystemTimeSource, TimeSource};
pub use decoder::{CodecState, DecodeService, PlatformDecoder};
pub use error::{Error, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use headless::{CountingFrameSink, PassthroughDecodeService, SystemAudioOutput};
pub use manifest::{load_manifest, Manifest, ManifestKind};
pub use media::{AudioData, ResourceTracker, VideoFrame};
pub use session::{PlaybackSession, SessionConfig, SessionReport};
pub use sync::SyncController;
pub use video_decoder::VideoDecoder;
pub use video_renderer::{FrameSink, VideoRenderer};
