//! Movie fragment (moof + mdat) builder.

use bytes::{BufMut, Bytes, BytesMut};

use super::{begin_box, end_box};

// trun: data-offset, sample-duration, sample-size, sample-flags
const TRUN_FLAGS: u32 = 0x00_0001 | 0x00_0100 | 0x00_0200 | 0x00_0400;
// tfhd: default-base-is-moof
const TFHD_FLAGS: u32 = 0x02_0000;

const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;
const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

struct FragmentSample {
    payload: Bytes,
    duration: u32,
    is_key: bool,
}

/// Samples of one track inside a fragment.
pub struct TrackFragment {
    track_id: u32,
    base_media_decode_time: u64,
    samples: Vec<FragmentSample>,
}

impl TrackFragment {
    pub fn new(track_id: u32, base_media_decode_time: u64) -> Self {
        Self {
            track_id,
            base_media_decode_time,
            samples: Vec::new(),
        }
    }

    /// Append a sample with its duration in track timescale ticks.
    pub fn sample(mut self, payload: impl Into<Bytes>, duration: u32, is_key: bool) -> Self {
        self.samples.push(FragmentSample {
            payload: payload.into(),
            duration,
            is_key,
        });
        self
    }

    fn payload_len(&self) -> usize {
        self.samples.iter().map(|s| s.payload.len()).sum()
    }
}

/// Builder for a complete media segment: one `traf` per track, then an
/// `mdat` holding every track's payloads in the same order.
pub struct FragmentBuilder {
    sequence_number: u32,
    tracks: Vec<TrackFragment>,
}

impl FragmentBuilder {
    pub fn new(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            tracks: Vec::new(),
        }
    }

    pub fn track(mut self, track: TrackFragment) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn build(&self) -> Bytes {
        let payload_len: usize = self.tracks.iter().map(TrackFragment::payload_len).sum();
        let mut buf = BytesMut::with_capacity(256 + payload_len);

        let moof = begin_box(&mut buf, b"moof");
        let mfhd = begin_box(&mut buf, b"mfhd");
        buf.put_u32(0); // version/flags
        buf.put_u32(self.sequence_number);
        end_box(&mut buf, mfhd);

        let mut data_offset_positions = Vec::with_capacity(self.tracks.len());
        for track in &self.tracks {
            data_offset_positions.push(write_traf(&mut buf, track));
        }
        end_box(&mut buf, moof);

        // Data offsets are relative to the moof start (offset 0).
        let mut data_offset = buf.len() + 8;
        for (track, pos) in self.tracks.iter().zip(data_offset_positions) {
            buf[pos..pos + 4].copy_from_slice(&(data_offset as u32).to_be_bytes());
            data_offset += track.payload_len();
        }

        let mdat = begin_box(&mut buf, b"mdat");
        for track in &self.tracks {
            for sample in &track.samples {
                buf.put_slice(&sample.payload);
            }
        }
        end_box(&mut buf, mdat);

        buf.freeze()
    }
}

/// Write a `traf`, returning the position of the trun data offset to patch.
fn write_traf(buf: &mut BytesMut, track: &TrackFragment) -> usize {
    let traf = begin_box(buf, b"traf");

    let tfhd = begin_box(buf, b"tfhd");
    buf.put_u32(TFHD_FLAGS);
    buf.put_u32(track.track_id);
    end_box(buf, tfhd);

    let tfdt = begin_box(buf, b"tfdt");
    buf.put_u32(0x0100_0000); // version 1
    buf.put_u64(track.base_media_decode_time);
    end_box(buf, tfdt);

    let trun = begin_box(buf, b"trun");
    buf.put_u32(TRUN_FLAGS);
    buf.put_u32(track.samples.len() as u32);
    let data_offset_pos = buf.len();
    buf.put_u32(0); // patched once the moof size is known
    for sample in &track.samples {
        buf.put_u32(sample.duration);
        buf.put_u32(sample.payload.len() as u32);
        buf.put_u32(if sample.is_key {
            SYNC_SAMPLE_FLAGS
        } else {
            NON_SYNC_SAMPLE_FLAGS
        });
    }
    end_box(buf, trun);

    end_box(buf, traf);
    data_offset_pos
}
