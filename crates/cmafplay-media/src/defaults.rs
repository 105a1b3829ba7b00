//! Last-resort values used when a parsed field is absent or zero.
//!
//! Every numeric fallback in the crate reads from this table; a successfully
//! parsed value always wins.

/// Timescale assumed for a video track whose `mdhd` is missing.
pub const VIDEO_TIMESCALE: u32 = 90_000;

/// Timescale assumed for an audio track whose `mdhd` is missing.
pub const AUDIO_TIMESCALE: u32 = 48_000;

/// Sample rate assumed when the `mp4a` entry carries none.
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;

/// Channel count assumed when the `mp4a` entry carries none.
pub const AUDIO_CHANNELS: u16 = 2;

/// Coded width assumed when the `avc1` entry carries none.
pub const CODED_WIDTH: u16 = 1920;

/// Coded height assumed when the `avc1` entry carries none.
pub const CODED_HEIGHT: u16 = 1080;

/// Track id used for a video config recovered without a `tkhd`.
pub const VIDEO_TRACK_ID: u32 = 1;

/// Track id used for an audio config recovered without a `tkhd`.
pub const AUDIO_TRACK_ID: u32 = 2;

/// Codec string used when an `avcC` is too short to read profile/level.
pub const AVC_CODEC: &str = "avc1.42E01E";

/// AAC audio object type used when the AudioSpecificConfig is unreadable (AAC-LC).
pub const AAC_OBJECT_TYPE: u8 = 2;

/// Nominal frame rate used to rebuild an implausible default sample duration.
pub const NOMINAL_FRAME_RATE: u32 = 30;

/// Samples per AAC frame, used to rebuild an implausible audio default duration.
pub const AAC_FRAME_SAMPLES: u32 = 1024;

/// Timescales above this are treated as video-like when rebuilding durations.
pub const VIDEO_TIMESCALE_THRESHOLD: u32 = 10_000;

/// DASH segment count used when no presentation duration can be derived.
pub const DASH_SEGMENT_COUNT: u32 = 10;

/// MIME hint reported for a DASH representation that declares none.
pub const DASH_MIME_TYPE: &str = "video/mp4; codecs=\"avc1.42E01E\"";
