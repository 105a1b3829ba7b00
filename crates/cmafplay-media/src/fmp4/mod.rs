//! Fragmented MP4 (fMP4) serialization.
//!
//! This module writes the two halves of a CMAF stream:
//! - Init segment (ftyp + moov with one video and an optional audio track)
//! - Media segments (moof + mdat), see [`FragmentBuilder`]

mod fragment;

pub use fragment::{FragmentBuilder, TrackFragment};

use bytes::{BufMut, Bytes, BytesMut};

use crate::defaults;

/// Start a box with a placeholder size; returns the offset to patch.
pub(crate) fn begin_box(buf: &mut BytesMut, tag: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(tag);
    start
}

/// Patch the size of a box opened with [`begin_box`].
pub(crate) fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

struct VideoTrack {
    track_id: u32,
    timescale: u32,
    width: u16,
    height: u16,
    avcc: Vec<u8>,
}

struct AudioTrack {
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    audio_specific_config: Vec<u8>,
}

/// Builder for `ftyp` + `moov` init segments.
pub struct InitSegmentBuilder {
    video: VideoTrack,
    audio: Option<AudioTrack>,
}

impl InitSegmentBuilder {
    /// Create a builder with a default 1080p H.264 track and no audio.
    pub fn new() -> Self {
        Self {
            video: VideoTrack {
                track_id: defaults::VIDEO_TRACK_ID,
                timescale: defaults::VIDEO_TIMESCALE,
                width: defaults::CODED_WIDTH,
                height: defaults::CODED_HEIGHT,
                // Constrained Baseline 3.0, no parameter sets
                avcc: vec![1, 0x42, 0xE0, 0x1E, 0xFF, 0xE0, 0x00],
            },
            audio: None,
        }
    }

    /// Set the video track.
    pub fn video(mut self, track_id: u32, timescale: u32, width: u16, height: u16, avcc: Vec<u8>) -> Self {
        self.video = VideoTrack {
            track_id,
            timescale,
            width,
            height,
            avcc,
        };
        self
    }

    /// Add an AAC audio track; its timescale equals the sample rate.
    pub fn audio(mut self, track_id: u32, sample_rate: u32, channels: u16, audio_specific_config: Vec<u8>) -> Self {
        self.audio = Some(AudioTrack {
            track_id,
            sample_rate,
            channels,
            audio_specific_config,
        });
        self
    }

    /// Build the init segment.
    pub fn build(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1024);
        write_ftyp(&mut buf);

        let moov = begin_box(&mut buf, b"moov");
        self.write_mvhd(&mut buf);
        self.write_video_trak(&mut buf);
        if let Some(audio) = &self.audio {
            write_audio_trak(&mut buf, audio);
        }

        let mvex = begin_box(&mut buf, b"mvex");
        write_trex(&mut buf, self.video.track_id);
        if let Some(audio) = &self.audio {
            write_trex(&mut buf, audio.track_id);
        }
        end_box(&mut buf, mvex);
        end_box(&mut buf, moov);

        buf.freeze()
    }

    fn write_mvhd(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, b"mvhd");
        buf.put_u32(0); // version 0, flags
        buf.put_u32(0); // creation time
        buf.put_u32(0); // modification time
        buf.put_u32(self.video.timescale);
        buf.put_u32(0); // duration: fragmented
        buf.put_u32(0x0001_0000); // rate = 1.0
        buf.put_u16(0x0100); // volume = 1.0
        buf.put_slice(&[0; 10]); // reserved
        write_matrix(buf);
        buf.put_slice(&[0; 24]); // pre_defined
        let next = self.audio.as_ref().map_or(0, |a| a.track_id).max(self.video.track_id) + 1;
        buf.put_u32(next);
        end_box(buf, start);
    }

    fn write_video_trak(&self, buf: &mut BytesMut) {
        let video = &self.video;
        let trak = begin_box(buf, b"trak");
        write_tkhd(buf, video.track_id, Some((video.width, video.height)));

        let mdia = begin_box(buf, b"mdia");
        write_mdhd(buf, video.timescale);
        write_hdlr(buf, b"vide", b"VideoHandler");

        let minf = begin_box(buf, b"minf");
        let vmhd = begin_box(buf, b"vmhd");
        buf.put_u32(1); // version 0, flags 1
        buf.put_slice(&[0; 8]); // graphics mode, opcolor
        end_box(buf, vmhd);
        write_dinf(buf);

        let stbl = begin_box(buf, b"stbl");
        let stsd = begin_box(buf, b"stsd");
        buf.put_u32(0); // version/flags
        buf.put_u32(1); // entry count

        let avc1 = begin_box(buf, b"avc1");
        buf.put_slice(&[0; 6]); // reserved
        buf.put_u16(1); // data reference index
        buf.put_slice(&[0; 16]); // pre_defined, reserved
        buf.put_u16(video.width);
        buf.put_u16(video.height);
        buf.put_u32(0x0048_0000); // 72 dpi
        buf.put_u32(0x0048_0000);
        buf.put_u32(0); // reserved
        buf.put_u16(1); // frame count
        buf.put_slice(&[0; 32]); // compressor name
        buf.put_u16(0x0018); // depth
        buf.put_i16(-1); // pre_defined
        let avcc = begin_box(buf, b"avcC");
        buf.put_slice(&video.avcc);
        end_box(buf, avcc);
        end_box(buf, avc1);

        end_box(buf, stsd);
        write_empty_tables(buf);
        end_box(buf, stbl);
        end_box(buf, minf);
        end_box(buf, mdia);
        end_box(buf, trak);
    }
}

impl Default for InitSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_ftyp(buf: &mut BytesMut) {
    let start = begin_box(buf, b"ftyp");
    buf.put_slice(b"iso6"); // major brand
    buf.put_u32(0); // minor version
    for brand in [b"iso6", b"cmfc", b"dash", b"mp41"] {
        buf.put_slice(brand);
    }
    end_box(buf, start);
}

fn write_matrix(buf: &mut BytesMut) {
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        buf.put_u32(value);
    }
}

fn write_tkhd(buf: &mut BytesMut, track_id: u32, dimensions: Option<(u16, u16)>) {
    let start = begin_box(buf, b"tkhd");
    buf.put_u32(0x0000_0007); // version 0; enabled, in_movie, in_preview
    buf.put_u32(0); // creation time
    buf.put_u32(0); // modification time
    buf.put_u32(track_id);
    buf.put_u32(0); // reserved
    buf.put_u32(0); // duration
    buf.put_slice(&[0; 8]); // reserved
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate group
    buf.put_u16(if dimensions.is_some() { 0 } else { 0x0100 }); // volume
    buf.put_u16(0); // reserved
    write_matrix(buf);
    let (width, height) = dimensions.unwrap_or((0, 0));
    buf.put_u32((width as u32) << 16);
    buf.put_u32((height as u32) << 16);
    end_box(buf, start);
}

fn write_mdhd(buf: &mut BytesMut, timescale: u32) {
    let start = begin_box(buf, b"mdhd");
    buf.put_u32(0); // version 0, flags
    buf.put_u32(0); // creation time
    buf.put_u32(0); // modification time
    buf.put_u32(timescale);
    buf.put_u32(0); // duration
    buf.put_u16(0x55C4); // language: und
    buf.put_u16(0); // pre_defined
    end_box(buf, start);
}

fn write_hdlr(buf: &mut BytesMut, handler: &[u8; 4], name: &[u8]) {
    let start = begin_box(buf, b"hdlr");
    buf.put_u32(0); // version/flags
    buf.put_u32(0); // pre_defined
    buf.put_slice(handler);
    buf.put_slice(&[0; 12]); // reserved
    buf.put_slice(name);
    buf.put_u8(0);
    end_box(buf, start);
}

fn write_dinf(buf: &mut BytesMut) {
    let dinf = begin_box(buf, b"dinf");
    let dref = begin_box(buf, b"dref");
    buf.put_u32(0); // version/flags
    buf.put_u32(1); // entry count
    let url = begin_box(buf, b"url ");
    buf.put_u32(1); // self-contained
    end_box(buf, url);
    end_box(buf, dref);
    end_box(buf, dinf);
}

/// Fragmented tracks carry no samples in the moov.
fn write_empty_tables(buf: &mut BytesMut) {
    for tag in [b"stts", b"stsc", b"stco"] {
        let start = begin_box(buf, tag);
        buf.put_u32(0); // version/flags
        buf.put_u32(0); // entry count
        end_box(buf, start);
    }
    let stsz = begin_box(buf, b"stsz");
    buf.put_u32(0); // version/flags
    buf.put_u32(0); // sample size
    buf.put_u32(0); // sample count
    end_box(buf, stsz);
}

fn write_audio_trak(buf: &mut BytesMut, audio: &AudioTrack) {
    let trak = begin_box(buf, b"trak");
    write_tkhd(buf, audio.track_id, None);

    let mdia = begin_box(buf, b"mdia");
    write_mdhd(buf, audio.sample_rate);
    write_hdlr(buf, b"soun", b"SoundHandler");

    let minf = begin_box(buf, b"minf");
    let smhd = begin_box(buf, b"smhd");
    buf.put_u32(0); // version/flags
    buf.put_u32(0); // balance, reserved
    end_box(buf, smhd);
    write_dinf(buf);

    let stbl = begin_box(buf, b"stbl");
    let stsd = begin_box(buf, b"stsd");
    buf.put_u32(0); // version/flags
    buf.put_u32(1); // entry count

    let mp4a = begin_box(buf, b"mp4a");
    buf.put_slice(&[0; 6]); // reserved
    buf.put_u16(1); // data reference index
    buf.put_slice(&[0; 8]); // reserved
    buf.put_u16(audio.channels);
    buf.put_u16(16); // sample size
    buf.put_u16(0); // pre_defined
    buf.put_u16(0); // reserved
    buf.put_u32(audio.sample_rate << 16);
    write_esds(buf, &audio.audio_specific_config);
    end_box(buf, mp4a);

    end_box(buf, stsd);
    write_empty_tables(buf);
    end_box(buf, stbl);
    end_box(buf, minf);
    end_box(buf, mdia);
    end_box(buf, trak);
}

/// ES_Descriptor > DecoderConfigDescriptor > DecoderSpecificInfo, plus SLConfig.
fn write_esds(buf: &mut BytesMut, audio_specific_config: &[u8]) {
    let asc_len = audio_specific_config.len() as u8;
    let decoder_config_len = 13 + 2 + asc_len;
    let es_len = 3 + 2 + decoder_config_len + 3;

    let start = begin_box(buf, b"esds");
    buf.put_u32(0); // version/flags
    buf.put_u8(0x03);
    buf.put_u8(es_len);
    buf.put_u16(0); // ES_ID
    buf.put_u8(0); // flags
    buf.put_u8(0x04);
    buf.put_u8(decoder_config_len);
    buf.put_u8(0x40); // objectTypeIndication: MPEG-4 audio
    buf.put_u8(0x15); // streamType: audio
    buf.put_slice(&[0; 3]); // bufferSizeDB
    buf.put_u32(0); // maxBitrate
    buf.put_u32(0); // avgBitrate
    buf.put_u8(0x05);
    buf.put_u8(asc_len);
    buf.put_slice(audio_specific_config);
    buf.put_u8(0x06);
    buf.put_u8(1);
    buf.put_u8(0x02); // predefined: MP4
    end_box(buf, start);
}

fn write_trex(buf: &mut BytesMut, track_id: u32) {
    let start = begin_box(buf, b"trex");
    buf.put_u32(0); // version/flags
    buf.put_u32(track_id);
    buf.put_u32(1); // default sample description index
    buf.put_u32(0); // default sample duration
    buf.put_u32(0); // default sample size
    buf.put_u32(0); // default sample flags
    end_box(buf, start);
}
