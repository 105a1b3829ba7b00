//! Init segment parsing: per-track decoder configuration.

use bytes::Bytes;

use super::boxes::{find_box, find_boxes_linear, BoxType, Mp4Box};
use super::codec::{aac_codec_string, audio_specific_config, avc_codec_string};
use super::read::{read_u16, read_u32, read_u8};
use super::{Fallback, TrackKind};
use crate::{defaults, Error, Result};

/// VisualSampleEntry fields preceding the child boxes of `avc1`/`avc3`.
const VISUAL_SAMPLE_ENTRY_SIZE: usize = 78;

/// AudioSampleEntry fields preceding the child boxes of `mp4a`.
const AUDIO_SAMPLE_ENTRY_SIZE: usize = 28;

/// Decoder configuration for an H.264 video track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    /// Track id from `tkhd`.
    pub track_id: u32,
    /// Ticks per second from `mdhd`.
    pub timescale: u32,
    /// RFC 6381 codec string, e.g. `avc1.64001F`.
    pub codec: String,
    /// Raw `avcC` payload.
    pub description: Bytes,
    pub coded_width: u16,
    pub coded_height: u16,
}

/// Decoder configuration for an AAC audio track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// Track id from `tkhd`.
    pub track_id: u32,
    /// Ticks per second from `mdhd`.
    pub timescale: u32,
    /// RFC 6381 codec string, e.g. `mp4a.40.2`.
    pub codec: String,
    /// AudioSpecificConfig bytes, when the `esds` carried one.
    pub description: Option<Bytes>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Ordered init-segment parsing strategies, most structured first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStrategy {
    /// `moov/trak/mdia/minf/stbl/stsd`.
    TrackWalk,
    /// `stsd` boxes placed directly under `moov`.
    MoovStsd,
    /// Byte scan for `stsd` anywhere in the buffer.
    LinearStsd,
    /// Byte scan for a bare `avcC`, with a synthesized video config.
    LinearAvcC,
}

/// Track configurations recovered from an init segment.
#[derive(Debug, Clone, Default)]
pub struct InitSegment {
    pub video: Option<VideoConfig>,
    pub audio: Option<AudioConfig>,
    /// Strategies other than the structured walk that supplied a track.
    pub fallbacks: Vec<Fallback>,
}

impl InitSegment {
    fn is_complete(&self) -> bool {
        self.video.is_some() && self.audio.is_some()
    }
}

type StrategyFn = fn(&[u8], &Mp4Box, &mut InitSegment);

const STRATEGIES: [(InitStrategy, StrategyFn); 4] = [
    (InitStrategy::TrackWalk, walk_tracks),
    (InitStrategy::MoovStsd, scan_moov_stsd),
    (InitStrategy::LinearStsd, scan_linear_stsd),
    (InitStrategy::LinearAvcC, scan_linear_avcc),
];

/// Parse an init segment into video/audio decoder configurations.
///
/// Strategies run in order; each later one only runs while a track kind is
/// still missing and only fills kinds that are still missing. Fails only
/// when there is no `moov` at all.
pub fn parse_init_segment(data: &[u8]) -> Result<InitSegment> {
    let moov = find_box(data, BoxType::MOOV, 0, data.len()).ok_or(Error::MissingBox("moov"))?;
    let mut result = InitSegment::default();

    for (strategy, apply) in STRATEGIES {
        if result.is_complete() {
            break;
        }
        let had_video = result.video.is_some();
        let had_audio = result.audio.is_some();

        apply(data, &moov, &mut result);

        if strategy == InitStrategy::TrackWalk {
            continue;
        }
        if !had_video && result.video.is_some() {
            record_strategy(&mut result, strategy, TrackKind::Video);
        }
        if !had_audio && result.audio.is_some() {
            record_strategy(&mut result, strategy, TrackKind::Audio);
        }
    }

    Ok(result)
}

fn record_strategy(result: &mut InitSegment, strategy: InitStrategy, kind: TrackKind) {
    tracing::warn!(?strategy, ?kind, "track config recovered by fallback strategy");
    result
        .fallbacks
        .push(Fallback::InitStrategy { strategy, kind });
}

fn walk_tracks(data: &[u8], moov: &Mp4Box, result: &mut InitSegment) {
    for trak in moov.children(data, BoxType::TRAK) {
        let track_id = trak
            .child(data, BoxType::TKHD)
            .and_then(|tkhd| track_id(data, &tkhd));
        let Some(mdia) = trak.child(data, BoxType::MDIA) else {
            continue;
        };
        let timescale = mdia
            .child(data, BoxType::MDHD)
            .and_then(|mdhd| timescale(data, &mdhd));
        let Some(stsd) = mdia.descend(data, &[BoxType::MINF, BoxType::STBL, BoxType::STSD]) else {
            continue;
        };
        extract_from_stsd(data, &stsd, result, track_id, timescale);
    }
}

fn scan_moov_stsd(data: &[u8], moov: &Mp4Box, result: &mut InitSegment) {
    for stsd in moov.children(data, BoxType::STSD) {
        extract_from_stsd(data, &stsd, result, None, None);
    }
}

fn scan_linear_stsd(data: &[u8], _moov: &Mp4Box, result: &mut InitSegment) {
    for stsd in find_boxes_linear(data, BoxType::STSD, 0, data.len()) {
        extract_from_stsd(data, &stsd, result, None, None);
    }
}

fn scan_linear_avcc(data: &[u8], _moov: &Mp4Box, result: &mut InitSegment) {
    if result.video.is_some() {
        return;
    }
    if let Some(avcc) = find_boxes_linear(data, BoxType::AVCC, 0, data.len()).first() {
        let description = avcc.payload(data);
        result.video = Some(VideoConfig {
            track_id: defaults::VIDEO_TRACK_ID,
            timescale: defaults::VIDEO_TIMESCALE,
            codec: avc_codec_string(description),
            description: Bytes::copy_from_slice(description),
            coded_width: defaults::CODED_WIDTH,
            coded_height: defaults::CODED_HEIGHT,
        });
    }
}

/// `tkhd` track_id sits after creation/modification times (32 or 64 bit).
fn track_id(data: &[u8], tkhd: &Mp4Box) -> Option<u32> {
    let version = read_u8(data, tkhd.payload_offset)?;
    let pos = if version == 1 { 20 } else { 12 };
    read_u32(tkhd.payload(data), pos).filter(|id| *id != 0)
}

/// `mdhd` timescale sits at the same offsets as the `tkhd` track_id.
fn timescale(data: &[u8], mdhd: &Mp4Box) -> Option<u32> {
    let version = read_u8(data, mdhd.payload_offset)?;
    let pos = if version == 1 { 20 } else { 12 };
    read_u32(mdhd.payload(data), pos).filter(|ts| *ts != 0)
}

fn extract_from_stsd(
    data: &[u8],
    stsd: &Mp4Box,
    result: &mut InitSegment,
    track_id: Option<u32>,
    timescale: Option<u32>,
) {
    if result.video.is_none() {
        if let Some(video) = video_config(data, stsd, track_id, timescale) {
            result.video = Some(video);
        }
    }
    if result.audio.is_none() {
        if let Some(audio) = audio_config(data, stsd, track_id, timescale) {
            result.audio = Some(audio);
        }
    }
}

/// Find a sample entry, first after the stsd entry count, then from the
/// start of the payload for writers that omit it.
fn sample_entry(data: &[u8], stsd: &Mp4Box, types: &[BoxType]) -> Option<Mp4Box> {
    let end = stsd.payload_end();
    [stsd.payload_offset + 8, stsd.payload_offset]
        .into_iter()
        .filter(|start| *start <= end)
        .find_map(|start| {
            types
                .iter()
                .find_map(|box_type| find_box(data, *box_type, start, end))
        })
}

/// Find a child box of a sample entry, falling back to a byte scan of its
/// payload when the fixed-size fields are not the expected length.
fn sample_entry_child(data: &[u8], entry: &Mp4Box, fixed: usize, box_type: BoxType) -> Option<Mp4Box> {
    let children_start = entry.payload_offset + fixed;
    let end = entry.payload_end();
    if children_start <= end {
        if let Some(found) = find_box(data, box_type, children_start, end) {
            return Some(found);
        }
    }
    find_boxes_linear(data, box_type, entry.payload_offset, end)
        .into_iter()
        .next()
}

fn video_config(
    data: &[u8],
    stsd: &Mp4Box,
    track_id: Option<u32>,
    timescale: Option<u32>,
) -> Option<VideoConfig> {
    let entry = sample_entry(data, stsd, &[BoxType::AVC1, BoxType::AVC3])?;
    let avcc = sample_entry_child(data, &entry, VISUAL_SAMPLE_ENTRY_SIZE, BoxType::AVCC)?;
    let description = avcc.payload(data);
    let fields = entry.payload(data);

    Some(VideoConfig {
        track_id: track_id.unwrap_or(defaults::VIDEO_TRACK_ID),
        timescale: timescale.unwrap_or(defaults::VIDEO_TIMESCALE),
        codec: avc_codec_string(description),
        description: Bytes::copy_from_slice(description),
        coded_width: read_u16(fields, 24)
            .filter(|w| *w != 0)
            .unwrap_or(defaults::CODED_WIDTH),
        coded_height: read_u16(fields, 26)
            .filter(|h| *h != 0)
            .unwrap_or(defaults::CODED_HEIGHT),
    })
}

fn audio_config(
    data: &[u8],
    stsd: &Mp4Box,
    track_id: Option<u32>,
    timescale: Option<u32>,
) -> Option<AudioConfig> {
    let entry = sample_entry(data, stsd, &[BoxType::MP4A])?;
    let fields = entry.payload(data);
    let description = sample_entry_child(data, &entry, AUDIO_SAMPLE_ENTRY_SIZE, BoxType::ESDS)
        .and_then(|esds| audio_specific_config(esds.payload(data)));

    Some(AudioConfig {
        track_id: track_id.unwrap_or(defaults::AUDIO_TRACK_ID),
        timescale: timescale.unwrap_or(defaults::AUDIO_TIMESCALE),
        codec: aac_codec_string(description),
        description: description.map(Bytes::copy_from_slice),
        // 16.16 fixed point
        sample_rate: read_u32(fields, 24)
            .map(|rate| rate >> 16)
            .filter(|rate| *rate != 0)
            .unwrap_or(defaults::AUDIO_SAMPLE_RATE),
        channels: read_u16(fields, 16)
            .filter(|c| *c != 0)
            .unwrap_or(defaults::AUDIO_CHANNELS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmp4::InitSegmentBuilder;
    use assert_matches::assert_matches;

    const AVCC: [u8; 11] = [1, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x02, 0x67, 0x64, 0x01];

    fn make_box(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(tag);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_structured_walk_recovers_exact_config() {
        let init = InitSegmentBuilder::new()
            .video(1, 90_000, 1280, 720, AVCC.to_vec())
            .audio(2, 44_100, 2, vec![0x12, 0x10])
            .build();

        let parsed = parse_init_segment(&init).unwrap();
        let video = parsed.video.unwrap();
        assert_eq!(video.track_id, 1);
        assert_eq!(video.timescale, 90_000);
        assert_eq!(video.codec, "avc1.64001F");
        assert_eq!(&video.description[..], &AVCC[..]);
        assert_eq!((video.coded_width, video.coded_height), (1280, 720));

        let audio = parsed.audio.unwrap();
        assert_eq!(audio.track_id, 2);
        assert_eq!(audio.timescale, 44_100);
        assert_eq!(audio.codec, "mp4a.40.2");
        assert_eq!(audio.sample_rate, 44_100);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.description.as_deref(), Some(&[0x12, 0x10][..]));

        assert!(parsed.fallbacks.is_empty());
    }

    #[test]
    fn test_missing_moov_is_an_error() {
        let data = make_box(b"ftyp", b"isom");
        assert_matches!(parse_init_segment(&data), Err(Error::MissingBox("moov")));
    }

    #[test]
    fn test_empty_moov_yields_no_tracks() {
        let data = make_box(b"moov", &[]);
        let parsed = parse_init_segment(&data).unwrap();
        assert!(parsed.video.is_none());
        assert!(parsed.audio.is_none());
    }

    #[test]
    fn test_stsd_directly_under_moov() {
        let mut entry = vec![0u8; VISUAL_SAMPLE_ENTRY_SIZE];
        entry[24..26].copy_from_slice(&640u16.to_be_bytes());
        entry[26..28].copy_from_slice(&360u16.to_be_bytes());
        entry.extend(make_box(b"avcC", &AVCC));
        let mut stsd_payload = vec![0, 0, 0, 0, 0, 0, 0, 1];
        stsd_payload.extend(make_box(b"avc1", &entry));
        let data = make_box(b"moov", &make_box(b"stsd", &stsd_payload));

        let parsed = parse_init_segment(&data).unwrap();
        let video = parsed.video.unwrap();
        assert_eq!(video.track_id, defaults::VIDEO_TRACK_ID);
        assert_eq!(video.timescale, defaults::VIDEO_TIMESCALE);
        assert_eq!((video.coded_width, video.coded_height), (640, 360));
        assert_eq!(
            parsed.fallbacks,
            vec![Fallback::InitStrategy {
                strategy: InitStrategy::MoovStsd,
                kind: TrackKind::Video
            }]
        );
    }

    #[test]
    fn test_bare_avcc_synthesizes_default_config() {
        let mut payload = vec![0xEE; 5];
        payload.extend(make_box(b"avcC", &AVCC));
        let data = make_box(b"moov", &payload);

        let parsed = parse_init_segment(&data).unwrap();
        let video = parsed.video.unwrap();
        assert_eq!(video.track_id, 1);
        assert_eq!(video.codec, "avc1.64001F");
        assert_eq!((video.coded_width, video.coded_height), (1920, 1080));
        assert_eq!(&video.description[..], &AVCC[..]);
        assert_matches!(
            parsed.fallbacks.as_slice(),
            [Fallback::InitStrategy {
                strategy: InitStrategy::LinearAvcC,
                kind: TrackKind::Video
            }]
        );
    }

    #[test]
    fn test_audio_defaults_when_fields_zero() {
        let mut entry = vec![0u8; AUDIO_SAMPLE_ENTRY_SIZE];
        entry.extend(make_box(b"esds", &[0, 0, 0, 0]));
        let mut stsd_payload = vec![0, 0, 0, 0, 0, 0, 0, 1];
        stsd_payload.extend(make_box(b"mp4a", &entry));
        let data = make_box(b"moov", &make_box(b"stsd", &stsd_payload));

        let audio = parse_init_segment(&data).unwrap().audio.unwrap();
        assert_eq!(audio.sample_rate, defaults::AUDIO_SAMPLE_RATE);
        assert_eq!(audio.channels, defaults::AUDIO_CHANNELS);
        assert_eq!(audio.timescale, defaults::AUDIO_TIMESCALE);
        assert_eq!(audio.codec, "mp4a.40.2");
        assert!(audio.description.is_none());
    }
}
