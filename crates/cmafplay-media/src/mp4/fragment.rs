//! Media segment (`moof` + `mdat`) parsing into timed samples.

use bytes::Bytes;

use super::boxes::{find_box, BoxType, Mp4Box};
use super::read::{read_u32, read_u64, read_version_flags, ticks_to_us};
use super::{Fallback, Sample, SampleKind, TrackKind};
use crate::{defaults, Error, Result};

// tfhd flags
const TFHD_BASE_DATA_OFFSET: u32 = 0x00_0001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
const TFHD_DEFAULT_DURATION: u32 = 0x00_0008;
const TFHD_DEFAULT_SIZE: u32 = 0x00_0010;
const TFHD_DEFAULT_FLAGS: u32 = 0x00_0020;

// trun flags
const TRUN_DATA_OFFSET: u32 = 0x00_0001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
const TRUN_SAMPLE_DURATION: u32 = 0x00_0100;
const TRUN_SAMPLE_SIZE: u32 = 0x00_0200;
const TRUN_SAMPLE_FLAGS: u32 = 0x00_0400;
const TRUN_COMPOSITION_OFFSET: u32 = 0x00_0800;

/// `sample_is_non_sync_sample` within the sample flags word.
const SAMPLE_IS_NON_SYNC: u32 = 0x0001_0000;

/// Which track to extract from a fragment and how to time it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentRequest {
    pub track_id: u32,
    pub timescale: u32,
    /// Track kind, when known from the init segment. Without it the nominal
    /// duration is guessed from the timescale.
    pub kind: Option<TrackKind>,
    /// Known segment duration, used to synthesize per-sample durations.
    pub segment_duration: Option<f64>,
    /// Replaces the `tfdt` base media decode time.
    pub base_decode_time: Option<u64>,
}

impl FragmentRequest {
    pub fn new(track_id: u32, timescale: u32) -> Self {
        Self {
            track_id,
            timescale,
            kind: None,
            segment_duration: None,
            base_decode_time: None,
        }
    }

    pub fn with_kind(mut self, kind: TrackKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_segment_duration(mut self, seconds: f64) -> Self {
        self.segment_duration = Some(seconds);
        self
    }

    pub fn with_base_decode_time(mut self, ticks: u64) -> Self {
        self.base_decode_time = Some(ticks);
        self
    }
}

/// Samples extracted from one media segment for one track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaSegment {
    /// Samples in decode order.
    pub samples: Vec<Sample>,
    /// Recovery paths taken while parsing.
    pub fallbacks: Vec<Fallback>,
    /// Samples skipped because their byte range fell outside the buffer.
    pub dropped: usize,
}

/// Fields of a `tfhd` that affect sample extraction.
#[derive(Debug, Default)]
struct TrackFragmentHeader {
    track_id: u32,
    default_duration: Option<u32>,
    default_size: Option<u32>,
    default_flags: Option<u32>,
}

impl TrackFragmentHeader {
    fn parse(payload: &[u8]) -> Option<Self> {
        let (_, flags) = read_version_flags(payload, 0)?;
        let track_id = read_u32(payload, 4)?;
        let mut pos = 8;
        if flags & TFHD_BASE_DATA_OFFSET != 0 {
            pos += 8;
        }
        if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            pos += 4;
        }
        let mut optional = |flag: u32| {
            if flags & flag == 0 {
                return None;
            }
            let value = read_u32(payload, pos);
            pos += 4;
            value
        };
        let default_duration = optional(TFHD_DEFAULT_DURATION);
        let default_size = optional(TFHD_DEFAULT_SIZE);
        let default_flags = optional(TFHD_DEFAULT_FLAGS);

        Some(Self {
            track_id,
            default_duration,
            default_size,
            default_flags,
        })
    }
}

/// Parse the samples of one track out of a `moof` + `mdat` media segment.
///
/// Fails only when the buffer has no `moof` or no `mdat`. Everything else
/// (missing `traf`/`trun`, short tables, out-of-range sample data) yields a
/// partial result.
pub fn parse_media_segment(data: &Bytes, request: &FragmentRequest) -> Result<MediaSegment> {
    let moof = find_box(data, BoxType::MOOF, 0, data.len()).ok_or(Error::MissingBox("moof"))?;
    let mdat = find_box(data, BoxType::MDAT, 0, data.len()).ok_or(Error::MissingBox("mdat"))?;

    let timescale = match (request.timescale, request.kind) {
        (0, Some(TrackKind::Audio)) => defaults::AUDIO_TIMESCALE,
        (0, _) => defaults::VIDEO_TIMESCALE,
        (ts, _) => ts,
    };
    let mut segment = MediaSegment::default();

    let Some((traf, tfhd)) = select_traf(data, &moof, request.track_id, &mut segment) else {
        tracing::debug!(track_id = request.track_id, "fragment has no traf");
        return Ok(segment);
    };

    let mut decode_time = request
        .base_decode_time
        .unwrap_or_else(|| base_media_decode_time(data, &traf).unwrap_or(0));

    let nominal = nominal_duration(request.kind, timescale);
    let default_duration = match tfhd.default_duration {
        Some(declared) if declared == 0 || declared > timescale / 10 => {
            if declared != 0 {
                tracing::warn!(
                    declared,
                    corrected = nominal,
                    timescale,
                    "implausible default sample duration"
                );
                segment.fallbacks.push(Fallback::DefaultDurationCorrected {
                    declared,
                    corrected: nominal,
                });
            }
            nominal
        }
        Some(declared) => declared,
        None => nominal,
    };

    // Absent a data offset, the first run starts at the mdat payload and each
    // later run continues where the previous one ended.
    let mut next_offset = Some(mdat.payload_offset as i64);

    for trun in traf.children(data, BoxType::TRUN) {
        let run = TrackRun {
            payload: trun.payload(data),
            moof_start: moof.start,
            default_duration,
            default_size: tfhd.default_size.unwrap_or(0),
            default_flags: tfhd.default_flags.unwrap_or(0),
            segment_duration: request.segment_duration,
            timescale,
        };
        next_offset = run.read_samples(data, next_offset, &mut decode_time, &mut segment);
    }

    if let (Some(first), Some(last)) = (segment.samples.first(), segment.samples.last()) {
        tracing::debug!(
            track_id = request.track_id,
            timescale,
            default_duration,
            samples = segment.samples.len(),
            dropped = segment.dropped,
            first_ms = first.timestamp_us / 1000,
            last_ms = last.timestamp_us / 1000,
            "parsed media segment"
        );
    }

    Ok(segment)
}

/// Pick the `traf` whose `tfhd` matches `track_id`, else the first one.
fn select_traf(
    data: &[u8],
    moof: &Mp4Box,
    track_id: u32,
    segment: &mut MediaSegment,
) -> Option<(Mp4Box, TrackFragmentHeader)> {
    let trafs: Vec<(Mp4Box, TrackFragmentHeader)> = moof
        .children(data, BoxType::TRAF)
        .into_iter()
        .map(|traf| {
            let tfhd = traf
                .child(data, BoxType::TFHD)
                .and_then(|tfhd| TrackFragmentHeader::parse(tfhd.payload(data)))
                .unwrap_or_default();
            (traf, tfhd)
        })
        .collect();

    if let Some(pos) = trafs.iter().position(|(_, tfhd)| tfhd.track_id == track_id) {
        return trafs.into_iter().nth(pos);
    }

    let first = trafs.into_iter().next()?;
    tracing::warn!(
        requested = track_id,
        used = first.1.track_id,
        "no traf for track id, using first traf"
    );
    segment.fallbacks.push(Fallback::TrackIdMismatch {
        requested: track_id,
        used: first.1.track_id,
    });
    Some(first)
}

fn base_media_decode_time(data: &[u8], traf: &Mp4Box) -> Option<u64> {
    let tfdt = traf.child(data, BoxType::TFDT)?;
    let payload = tfdt.payload(data);
    match read_version_flags(payload, 0)? {
        (1, _) => read_u64(payload, 4),
        _ => read_u32(payload, 4).map(u64::from),
    }
}

/// Nominal per-sample duration: one frame at 30 fps for video, one AAC frame
/// for audio. An unknown kind is treated as video above the timescale
/// threshold.
fn nominal_duration(kind: Option<TrackKind>, timescale: u32) -> u32 {
    let kind = kind.unwrap_or(if timescale > defaults::VIDEO_TIMESCALE_THRESHOLD {
        TrackKind::Video
    } else {
        TrackKind::Audio
    });
    match kind {
        TrackKind::Video => {
            ((timescale as f64 / defaults::NOMINAL_FRAME_RATE as f64).round() as u32).max(1)
        }
        TrackKind::Audio => defaults::AAC_FRAME_SAMPLES,
    }
}

struct TrackRun<'a> {
    payload: &'a [u8],
    moof_start: usize,
    default_duration: u32,
    default_size: u32,
    default_flags: u32,
    segment_duration: Option<f64>,
    timescale: u32,
}

impl TrackRun<'_> {
    /// Append this run's samples to `segment`, returning the byte offset
    /// following the run's last sample.
    fn read_samples(
        &self,
        data: &Bytes,
        inherited_offset: Option<i64>,
        decode_time: &mut u64,
        segment: &mut MediaSegment,
    ) -> Option<i64> {
        let (_, flags) = read_version_flags(self.payload, 0)?;
        let declared_count = read_u32(self.payload, 4)?;
        let mut pos = 8;

        let mut offset = inherited_offset;
        if flags & TRUN_DATA_OFFSET != 0 {
            let relative = read_u32(self.payload, pos)? as i32;
            offset = Some(self.moof_start as i64 + relative as i64);
            pos += 4;
        }
        let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            let value = read_u32(self.payload, pos)?;
            pos += 4;
            Some(value)
        } else {
            None
        };

        let has_duration = flags & TRUN_SAMPLE_DURATION != 0;
        let has_size = flags & TRUN_SAMPLE_SIZE != 0;
        let has_flags = flags & TRUN_SAMPLE_FLAGS != 0;
        let has_composition_offset = flags & TRUN_COMPOSITION_OFFSET != 0;

        // The sample table cannot describe more samples than it has bytes for.
        let entry_size = 4 * [has_duration, has_size, has_flags, has_composition_offset]
            .iter()
            .filter(|present| **present)
            .count();
        let sample_count = if entry_size > 0 {
            let entries = self.payload.len().saturating_sub(pos) / entry_size;
            declared_count.min(u32::try_from(entries).unwrap_or(u32::MAX))
        } else {
            declared_count
        };

        let Some(mut offset) = offset.filter(|o| *o >= 0) else {
            tracing::warn!(sample_count, "trun data offset out of range, dropping run");
            segment.dropped += sample_count as usize;
            return None;
        };

        if !has_size && self.default_size == 0 {
            tracing::debug!(sample_count, "trun has no sample sizes, skipping run");
            return Some(offset);
        }

        let synthesized_duration = match self.segment_duration {
            Some(seconds) if !has_duration && sample_count > 0 && seconds > 0.0 => {
                let ticks = (seconds * self.timescale as f64 / sample_count as f64).round();
                Some((ticks as u32).max(1))
            }
            _ => None,
        };

        for index in 0..sample_count {
            let mut field = |present: bool| -> Option<Option<u32>> {
                if !present {
                    return Some(None);
                }
                let value = read_u32(self.payload, pos)?;
                pos += 4;
                Some(Some(value))
            };
            // A short table ends the run.
            let Some(duration) = field(has_duration) else { break };
            let Some(size) = field(has_size) else { break };
            let Some(sample_flags) = field(has_flags) else { break };
            if field(has_composition_offset).is_none() {
                break;
            }

            let duration = duration
                .or(synthesized_duration)
                .unwrap_or(self.default_duration);
            let size = size.unwrap_or(self.default_size);
            let sample_flags = sample_flags.unwrap_or(match (index, first_sample_flags) {
                (0, Some(first)) => first,
                _ => self.default_flags,
            });

            let start = offset;
            let end = start + size as i64;
            if size > 0 {
                if end as u64 <= data.len() as u64 {
                    let kind = if index == 0 || sample_flags & SAMPLE_IS_NON_SYNC == 0 {
                        SampleKind::Key
                    } else {
                        SampleKind::Delta
                    };
                    segment.samples.push(Sample {
                        kind,
                        timestamp_us: ticks_to_us(*decode_time, self.timescale),
                        duration_us: ticks_to_us(duration as u64, self.timescale),
                        payload: data.slice(start as usize..end as usize),
                    });
                } else {
                    // Offsets only grow, so every later sample is outside too.
                    let remaining = (sample_count - index) as usize;
                    tracing::warn!(
                        index,
                        start,
                        end,
                        len = data.len(),
                        remaining,
                        "samples outside buffer, dropping rest of run"
                    );
                    segment.dropped += remaining;
                    return Some(end);
                }
            }

            *decode_time = decode_time.saturating_add(duration as u64);
            offset = end;
        }

        Some(offset)
    }
}
