//! Synthetic CMAF stream generation.
//!
//! Writes an init segment, numbered media segments, HLS playlists and a DASH
//! MPD into one directory. Payloads are placeholder bytes shaped like
//! length-prefixed H.264 NAL units and raw AAC frames; the result exercises
//! parsing, serving and headless playback but will not decode on real
//! hardware.

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::path::{Path, PathBuf};

use cmafplay_media::dash::{render_template_mpd, TemplateMpd};
use cmafplay_media::defaults;
use cmafplay_media::fmp4::{FragmentBuilder, InitSegmentBuilder, TrackFragment};
use cmafplay_media::hls::{MasterPlaylist, MediaPlaylist, StreamInfo};
use cmafplay_media::mp4::codec;

pub const INIT_SEGMENT: &str = "init.mp4";
pub const MASTER_PLAYLIST: &str = "master.m3u8";
pub const MEDIA_PLAYLIST: &str = "media.m3u8";
pub const DASH_MANIFEST: &str = "manifest.mpd";

/// Constrained Baseline 3.0, no parameter sets
const AVCC: [u8; 7] = [1, 0x42, 0xE0, 0x1E, 0xFF, 0xE0, 0x00];
/// AAC-LC, 44.1kHz, stereo
const AUDIO_SPECIFIC_CONFIG: [u8; 2] = [0x12, 0x10];

const VIDEO_PAYLOAD_SIZE: usize = 512;
const AUDIO_PAYLOAD_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub segments: u32,
    /// Segment duration in seconds
    pub segment_duration: f64,
    pub width: u16,
    pub height: u16,
    pub audio: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            segments: 5,
            segment_duration: 2.0,
            width: 1280,
            height: 720,
            audio: true,
        }
    }
}

/// What was written.
#[derive(Debug, Clone)]
pub struct GeneratedStream {
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
    pub video_samples: usize,
    pub audio_samples: usize,
    pub duration_secs: f64,
}

/// Write a complete synthetic stream into `directory`, creating it if needed.
pub fn generate_stream(directory: &Path, options: &GenerateOptions) -> Result<GeneratedStream> {
    if options.segments == 0 {
        anyhow::bail!("Segment count must be at least 1");
    }
    if !(options.segment_duration.is_finite() && options.segment_duration > 0.0) {
        anyhow::bail!("Segment duration must be positive");
    }

    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create output directory: {:?}", directory))?;

    let mut stream = GeneratedStream {
        directory: directory.to_path_buf(),
        files: Vec::new(),
        video_samples: 0,
        audio_samples: 0,
        duration_secs: options.segments as f64 * options.segment_duration,
    };

    let mut init = InitSegmentBuilder::new().video(
        defaults::VIDEO_TRACK_ID,
        defaults::VIDEO_TIMESCALE,
        options.width,
        options.height,
        AVCC.to_vec(),
    );
    if options.audio {
        init = init.audio(
            defaults::AUDIO_TRACK_ID,
            defaults::AUDIO_SAMPLE_RATE,
            defaults::AUDIO_CHANNELS,
            AUDIO_SPECIFIC_CONFIG.to_vec(),
        );
    }
    write_file(&mut stream, INIT_SEGMENT, &init.build())?;

    let frame_ticks = defaults::VIDEO_TIMESCALE / defaults::NOMINAL_FRAME_RATE;
    let frames_per_segment =
        ((options.segment_duration * defaults::NOMINAL_FRAME_RATE as f64).round() as u32).max(1);
    let segment_ticks = (options.segment_duration * defaults::VIDEO_TIMESCALE as f64).round() as u64;

    let mut media = MediaPlaylist::vod();
    media.init_uri = Some(INIT_SEGMENT.to_string());

    let mut audio_base = 0u64;
    for index in 0..options.segments {
        let number = index + 1;
        let mut video = TrackFragment::new(defaults::VIDEO_TRACK_ID, index as u64 * segment_ticks);
        for frame in 0..frames_per_segment {
            video = video.sample(video_payload(frame == 0), frame_ticks, frame == 0);
        }
        stream.video_samples += frames_per_segment as usize;

        let mut fragment = FragmentBuilder::new(number).track(video);

        if options.audio {
            // Audio timescale is the sample rate; whole AAC frames only.
            let segment_end = (number as f64
                * options.segment_duration
                * defaults::AUDIO_SAMPLE_RATE as f64)
                .round() as u64;
            let frames = segment_end.saturating_sub(audio_base) / defaults::AAC_FRAME_SAMPLES as u64;
            let mut audio = TrackFragment::new(defaults::AUDIO_TRACK_ID, audio_base);
            for _ in 0..frames {
                audio = audio.sample(audio_payload(), defaults::AAC_FRAME_SAMPLES, true);
            }
            audio_base += frames * defaults::AAC_FRAME_SAMPLES as u64;
            stream.audio_samples += frames as usize;
            fragment = fragment.track(audio);
        }

        let name = segment_name(number);
        write_file(&mut stream, &name, &fragment.build())?;
        media.push_segment(name, options.segment_duration);
    }

    write_file(&mut stream, MEDIA_PLAYLIST, media.render().as_bytes())?;

    let codecs = codec_list(options.audio);
    let bandwidth = estimated_bandwidth(frames_per_segment, options);

    let master = MasterPlaylist::new().add_stream(StreamInfo {
        uri: MEDIA_PLAYLIST.to_string(),
        bandwidth,
        width: options.width,
        height: options.height,
        codecs: codecs.clone(),
    });
    write_file(&mut stream, MASTER_PLAYLIST, master.render().as_bytes())?;

    let mpd = TemplateMpd {
        representation_id: "video".to_string(),
        bandwidth,
        width: options.width,
        height: options.height,
        codecs,
        timescale: defaults::VIDEO_TIMESCALE,
        segment_duration: segment_ticks,
        start_number: 1,
        initialization: INIT_SEGMENT.to_string(),
        media: "seg$Number$.m4s".to_string(),
        duration_secs: stream.duration_secs,
    };
    write_file(&mut stream, DASH_MANIFEST, render_template_mpd(&mpd).as_bytes())?;

    tracing::info!(
        "Generated {} segments ({:.1}s) in {:?}",
        options.segments,
        stream.duration_secs,
        directory
    );

    Ok(stream)
}

pub fn segment_name(number: u32) -> String {
    format!("seg{}.m4s", number)
}

fn codec_list(audio: bool) -> String {
    let video = codec::avc_codec_string(&AVCC);
    if audio {
        format!("{},{}", video, codec::aac_codec_string(Some(&AUDIO_SPECIFIC_CONFIG)))
    } else {
        video
    }
}

fn estimated_bandwidth(frames_per_segment: u32, options: &GenerateOptions) -> u64 {
    let mut bytes_per_second = (frames_per_segment as f64 * VIDEO_PAYLOAD_SIZE as f64)
        / options.segment_duration;
    if options.audio {
        bytes_per_second += defaults::AUDIO_SAMPLE_RATE as f64 / defaults::AAC_FRAME_SAMPLES as f64
            * AUDIO_PAYLOAD_SIZE as f64;
    }
    (bytes_per_second * 8.0).ceil() as u64
}

/// One 4-byte length-prefixed NAL unit: IDR for key frames, non-IDR slice otherwise.
fn video_payload(is_key: bool) -> Bytes {
    let nal_len = VIDEO_PAYLOAD_SIZE - 4;
    let mut buf = BytesMut::with_capacity(VIDEO_PAYLOAD_SIZE);
    buf.put_u32(nal_len as u32);
    buf.put_u8(if is_key { 0x65 } else { 0x41 });
    buf.put_bytes(0xAB, nal_len - 1);
    buf.freeze()
}

fn audio_payload() -> Bytes {
    let mut buf = BytesMut::with_capacity(AUDIO_PAYLOAD_SIZE);
    buf.put_u8(0x21);
    buf.put_bytes(0x5A, AUDIO_PAYLOAD_SIZE - 1);
    buf.freeze()
}

fn write_file(stream: &mut GeneratedStream, name: &str, contents: &[u8]) -> Result<()> {
    let path = stream.directory.join(name);
    std::fs::write(&path, contents).with_context(|| format!("Failed to write {:?}", path))?;
    tracing::debug!("Wrote {:?} ({} bytes)", path, contents.len());
    stream.files.push(path);
    Ok(())
}
