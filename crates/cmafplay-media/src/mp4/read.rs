//! Bounds-checked big-endian reads.
//!
//! Every accessor returns `None` instead of panicking when the requested
//! bytes fall outside the buffer.

pub(crate) fn read_u8(data: &[u8], pos: usize) -> Option<u8> {
    data.get(pos).copied()
}

pub(crate) fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    let bytes = data.get(pos..pos.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn read_u64(data: &[u8], pos: usize) -> Option<u64> {
    let bytes = data.get(pos..pos.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_be_bytes(buf))
}

/// Read the version byte and 24-bit flags of a full box payload.
pub(crate) fn read_version_flags(data: &[u8], pos: usize) -> Option<(u8, u32)> {
    let word = read_u32(data, pos)?;
    Some(((word >> 24) as u8, word & 0x00FF_FFFF))
}

/// Convert media ticks to microseconds without intermediate overflow.
pub(crate) fn ticks_to_us(ticks: u64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    let us = ticks as u128 * 1_000_000 / timescale as u128;
    i64::try_from(us).unwrap_or(i64::MAX)
}
