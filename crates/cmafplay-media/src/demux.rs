//! Per-stream demultiplexing of fMP4 segments into timed samples.

use bytes::Bytes;

use crate::mp4::{
    parse_init_segment, parse_media_segment, AudioConfig, Fallback, FragmentRequest, InitSegment,
    MediaSegment, Sample, TrackKind, VideoConfig,
};
use crate::Result;

/// Samples of both tracks from one media segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemuxedSegment {
    pub video: Vec<Sample>,
    pub audio: Vec<Sample>,
    pub fallbacks: Vec<Fallback>,
    /// Out-of-range samples skipped across both tracks.
    pub dropped: usize,
}

impl DemuxedSegment {
    fn absorb(&mut self, segment: MediaSegment, video: bool) {
        if video {
            self.video = segment.samples;
        } else {
            self.audio = segment.samples;
        }
        self.fallbacks.extend(segment.fallbacks);
        self.dropped += segment.dropped;
    }
}

/// Timing state for one track across segments.
#[derive(Debug, Clone, Copy)]
struct TrackState {
    kind: TrackKind,
    track_id: u32,
    timescale: u32,
    segment_index: u64,
}

impl TrackState {
    fn new(kind: TrackKind, track_id: u32, timescale: u32) -> Self {
        Self {
            kind,
            track_id,
            timescale,
            segment_index: 0,
        }
    }

    fn request(&self, segment_duration: Option<f64>) -> FragmentRequest {
        let mut request = FragmentRequest::new(self.track_id, self.timescale).with_kind(self.kind);
        if let Some(seconds) = segment_duration.filter(|s| s.is_finite() && *s > 0.0) {
            let base = (self.timescale as f64 * seconds * self.segment_index as f64).round();
            request = request
                .with_segment_duration(seconds)
                .with_base_decode_time(base as u64);
        }
        request
    }

    fn advance(&mut self, segment_duration: Option<f64>, produced: bool) {
        if produced && segment_duration.is_some_and(|s| s > 0.0) {
            self.segment_index += 1;
        }
    }
}

/// Holds the track configs of one stream and parses its media segments.
///
/// Configs are first-write-wins: a later init segment cannot replace a track
/// that is already known. Call [`Demuxer::reset`] before reuse on a new stream.
#[derive(Debug, Default)]
pub struct Demuxer {
    video: Option<(VideoConfig, TrackState)>,
    audio: Option<(AudioConfig, TrackState)>,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an init segment and record any track not already known.
    pub fn parse_init(&mut self, data: &[u8]) -> Result<InitSegment> {
        let init = parse_init_segment(data)?;

        if let Some(video) = &init.video {
            if self.video.is_none() {
                tracing::info!(
                    track_id = video.track_id,
                    timescale = video.timescale,
                    codec = %video.codec,
                    width = video.coded_width,
                    height = video.coded_height,
                    "video track"
                );
                let state = TrackState::new(TrackKind::Video, video.track_id, video.timescale);
                self.video = Some((video.clone(), state));
            } else if self.video_config() != Some(video) {
                tracing::warn!(codec = %video.codec, "ignoring second video config");
            }
        }

        if let Some(audio) = &init.audio {
            if self.audio.is_none() {
                tracing::info!(
                    track_id = audio.track_id,
                    timescale = audio.timescale,
                    codec = %audio.codec,
                    sample_rate = audio.sample_rate,
                    channels = audio.channels,
                    "audio track"
                );
                let state = TrackState::new(TrackKind::Audio, audio.track_id, audio.timescale);
                self.audio = Some((audio.clone(), state));
            } else if self.audio_config() != Some(audio) {
                tracing::warn!(codec = %audio.codec, "ignoring second audio config");
            }
        }

        Ok(init)
    }

    /// Parse a media segment for every known track.
    ///
    /// With a segment duration hint, each track's base decode time is
    /// rebuilt as `timescale * duration * index`, where the index counts the
    /// earlier segments that produced samples for that track.
    pub fn parse_media(&mut self, data: &Bytes, segment_duration: Option<f64>) -> Result<DemuxedSegment> {
        let mut out = DemuxedSegment::default();

        if let Some((_, state)) = &mut self.video {
            let segment = parse_media_segment(data, &state.request(segment_duration))?;
            state.advance(segment_duration, !segment.samples.is_empty());
            out.absorb(segment, true);
        }
        if let Some((_, state)) = &mut self.audio {
            let segment = parse_media_segment(data, &state.request(segment_duration))?;
            state.advance(segment_duration, !segment.samples.is_empty());
            out.absorb(segment, false);
        }

        Ok(out)
    }

    pub fn video_config(&self) -> Option<&VideoConfig> {
        self.video.as_ref().map(|(config, _)| config)
    }

    pub fn audio_config(&self) -> Option<&AudioConfig> {
        self.audio.as_ref().map(|(config, _)| config)
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Forget all track configs and timing state.
    pub fn reset(&mut self) {
        self.video = None;
        self.audio = None;
    }
}
