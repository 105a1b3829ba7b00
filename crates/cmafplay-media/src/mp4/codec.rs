//! Codec string derivation and decoder-config extraction.

use crate::defaults;

/// Build an RFC 6381 `avc1.PPCCLL` codec string from avcC bytes.
pub fn avc_codec_string(avcc: &[u8]) -> String {
    if avcc.len() < 4 {
        return defaults::AVC_CODEC.to_string();
    }
    format!("avc1.{:02X}{:02X}{:02X}", avcc[1], avcc[2], avcc[3])
}

/// Build an `mp4a.40.<aot>` codec string from an AudioSpecificConfig.
pub fn aac_codec_string(audio_specific_config: Option<&[u8]>) -> String {
    let object_type = audio_specific_config
        .and_then(aac_object_type)
        .unwrap_or(defaults::AAC_OBJECT_TYPE);
    format!("mp4a.40.{}", object_type)
}

/// Decode the audio object type from the leading bits of an AudioSpecificConfig.
///
/// Handles the escape value 31 (ISO 14496-3: `32 + next 6 bits`). Returns
/// `None` for truncated input or the reserved value 0.
pub fn aac_object_type(config: &[u8]) -> Option<u8> {
    let mut bits = BitReader::new(config);
    let mut object_type = bits.read(5)?;
    if object_type == 31 {
        object_type = 32 + bits.read(6)?;
    }
    match object_type {
        0 => None,
        n => u8::try_from(n).ok(),
    }
}

/// Extract the AudioSpecificConfig (DecoderSpecificInfo, tag 0x05) from an
/// `esds` payload, which starts with version and flags.
pub fn audio_specific_config(esds_payload: &[u8]) -> Option<&[u8]> {
    find_descriptor(esds_payload.get(4..)?, 0)
}

const ES_DESCRIPTOR: u8 = 0x03;
const DECODER_CONFIG_DESCRIPTOR: u8 = 0x04;
const DECODER_SPECIFIC_INFO: u8 = 0x05;

/// Walk a descriptor list, descending into ES and DecoderConfig descriptors.
fn find_descriptor(mut data: &[u8], depth: u8) -> Option<&[u8]> {
    if depth > 4 {
        return None;
    }

    while data.len() >= 2 {
        let tag = data[0];
        let (size, header) = descriptor_size(&data[1..])?;
        let body_start = 1 + header;
        let body_end = body_start.saturating_add(size).min(data.len());
        let body = &data[body_start.min(body_end)..body_end];

        match tag {
            DECODER_SPECIFIC_INFO => return Some(body),
            ES_DESCRIPTOR => {
                if let Some(found) = es_descriptor_children(body)
                    .and_then(|children| find_descriptor(children, depth + 1))
                {
                    return Some(found);
                }
            }
            // objectTypeIndication, streamType, bufferSizeDB, maxBitrate, avgBitrate
            DECODER_CONFIG_DESCRIPTOR => {
                if let Some(found) = body
                    .get(13..)
                    .and_then(|children| find_descriptor(children, depth + 1))
                {
                    return Some(found);
                }
            }
            _ => {}
        }

        data = &data[body_end..];
    }

    None
}

/// Descriptor sizes use up to four 7-bit groups with a continuation bit.
fn descriptor_size(data: &[u8]) -> Option<(usize, usize)> {
    let mut size = 0usize;
    for (i, byte) in data.iter().take(4).enumerate() {
        size = (size << 7) | (byte & 0x7F) as usize;
        if byte & 0x80 == 0 {
            return Some((size, i + 1));
        }
    }
    None
}

/// Skip the fixed and flag-dependent fields of an ES_Descriptor body.
fn es_descriptor_children(body: &[u8]) -> Option<&[u8]> {
    let flags = *body.get(2)?;
    let mut pos = 3;
    if flags & 0x80 != 0 {
        pos += 2; // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        let url_len = *body.get(pos)? as usize;
        pos += 1 + url_len;
    }
    if flags & 0x20 != 0 {
        pos += 2; // OCR_ES_Id
    }
    body.get(pos..)
}

/// MSB-first bit reader over a byte slice.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn read(&mut self, count: usize) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = *self.data.get(self.bit / 8)?;
            let shift = 7 - (self.bit % 8);
            value = (value << 1) | ((byte >> shift) & 1) as u32;
            self.bit += 1;
        }
        Some(value)
    }
}
