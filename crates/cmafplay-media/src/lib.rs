//! cmafplay-media: fMP4 box parsing, HLS/DASH manifests, and demuxing
//!
//! This crate is the synchronous, I/O-free half of cmafplay. Everything here
//! works on caller-owned buffers and returns plain values; fetching, decoding
//! and scheduling live in `cmafplay-playback`.
//!
//! # Modules
//!
//! - `mp4` - ISO-BMFF box walking, init segment and media segment parsing
//! - `demux` - Per-stream track state over successive media segments
//! - `hls` - M3U8 parsing and rendering
//! - `dash` - MPD parsing (SegmentList/SegmentTemplate) and rendering
//! - `fmp4` - fMP4 writing, used for fixtures and generated streams
//! - `defaults` - Values used when a parsed field is absent
//!
//! # Resilience
//!
//! Real-world encoders produce non-conformant files. Parsers return partial
//! results instead of failing, and report every recovery path they take as a
//! [`mp4::Fallback`] so that malformed input stays diagnosable.

pub mod dash;
pub mod defaults;
pub mod demux;
pub mod error;
pub mod fmp4;
pub mod hls;
pub mod mp4;
pub mod resolve;

pub use demux::{DemuxedSegment, Demuxer};
pub use error::{Error, Result};
pub use mp4::{AudioConfig, Fallback, Sample, SampleKind, TrackKind, VideoConfig};

use url::Url;

/// A media segment reference from a manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    pub url: Url,
    /// Duration in seconds, when the manifest states one.
    pub duration: Option<f64>,
}
