//! Fragmented MP4 (ISO-BMFF) reading.
//!
//! Boxes are located by offset into a caller-owned buffer; nothing is copied
//! until a sample payload or decoder config is handed out.

pub mod boxes;
pub mod codec;
mod fragment;
mod init;
mod read;

pub use boxes::{boxes, find_all_boxes, find_box, find_boxes_linear, BoxType, Mp4Box};
pub use fragment::{parse_media_segment, FragmentRequest, MediaSegment};
pub use init::{parse_init_segment, AudioConfig, InitSegment, InitStrategy, VideoConfig};

use bytes::Bytes;

/// Kind of media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Whether a sample can start decoding on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Key,
    Delta,
}

/// One decodable unit with its timing on the track timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub kind: SampleKind,
    /// Decode timestamp in microseconds.
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub payload: Bytes,
}

impl Sample {
    pub fn is_key(&self) -> bool {
        self.kind == SampleKind::Key
    }
}

/// A recovery path taken while parsing non-conformant input.
///
/// These are not errors; they are reported so malformed streams can be
/// diagnosed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// No `traf` matched the requested track id; the first one was used.
    TrackIdMismatch { requested: u32, used: u32 },
    /// The `tfhd` default sample duration was implausible and replaced.
    DefaultDurationCorrected { declared: u32, corrected: u32 },
    /// An init-segment strategy other than the structured walk supplied a track.
    InitStrategy {
        strategy: InitStrategy,
        kind: TrackKind,
    },
}
