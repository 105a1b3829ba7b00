//! ISO-BMFF box headers and range scanning.

use super::read::{read_u32, read_u64};

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const AVC1: Self = Self(*b"avc1");
    pub const AVC3: Self = Self(*b"avc3");
    pub const AVCC: Self = Self(*b"avcC");
    pub const MP4A: Self = Self(*b"mp4a");
    pub const ESDS: Self = Self(*b"esds");
    pub const MVEX: Self = Self(*b"mvex");
    pub const TREX: Self = Self(*b"trex");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const MDAT: Self = Self(*b"mdat");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A located box within a byte buffer.
///
/// Invariant: `payload_offset + payload_size == start + full_size`, and the
/// whole box lies inside the range it was found in. A box whose declared size
/// overran that range is clamped to the range end and marked `truncated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp4Box {
    /// Box type code.
    pub box_type: BoxType,
    /// Offset of the first header byte.
    pub start: usize,
    /// Offset of the first payload byte (after the 8 or 16 byte header).
    pub payload_offset: usize,
    /// Payload length in bytes.
    pub payload_size: usize,
    /// Header plus payload length in bytes.
    pub full_size: usize,
    /// Declared size exceeded the searched range.
    pub truncated: bool,
}

impl Mp4Box {
    /// Offset one past the last byte of the box.
    pub fn end(&self) -> usize {
        self.start + self.full_size
    }

    /// Offset one past the last payload byte.
    pub fn payload_end(&self) -> usize {
        self.payload_offset + self.payload_size
    }

    /// Borrow the payload bytes.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.payload_offset..self.payload_end()]
    }

    /// Find the first direct child of the given type.
    pub fn child(&self, data: &[u8], box_type: BoxType) -> Option<Mp4Box> {
        find_box(data, box_type, self.payload_offset, self.payload_end())
    }

    /// Find every direct child of the given type.
    pub fn children(&self, data: &[u8], box_type: BoxType) -> Vec<Mp4Box> {
        find_all_boxes(data, box_type, self.payload_offset, self.payload_end())
    }

    /// Follow a chain of first-child lookups, e.g. `mdia/minf/stbl`.
    pub fn descend(&self, data: &[u8], path: &[BoxType]) -> Option<Mp4Box> {
        path.iter()
            .try_fold(*self, |parent, box_type| parent.child(data, *box_type))
    }
}

/// Read the box header at `offset`, bounded by `end`.
///
/// Returns `None` when no complete header fits or the declared size is
/// smaller than the header itself.
fn read_header(data: &[u8], offset: usize, end: usize) -> Option<Mp4Box> {
    if offset.checked_add(8)? > end {
        return None;
    }

    let size = read_u32(data, offset)?;
    let box_type = BoxType(data[offset + 4..offset + 8].try_into().ok()?);

    let (declared, header_size) = match size {
        1 => {
            if offset + 16 > end {
                return None;
            }
            (read_u64(data, offset + 8)?, 16usize)
        }
        0 => ((end - offset) as u64, 8usize),
        n => (n as u64, 8usize),
    };

    if declared < header_size as u64 {
        return None;
    }

    let available = end - offset;
    let (full_size, truncated) = match usize::try_from(declared) {
        Ok(size) if size <= available => (size, false),
        _ => (available, true),
    };

    Some(Mp4Box {
        box_type,
        start: offset,
        payload_offset: offset + header_size,
        payload_size: full_size - header_size,
        full_size,
        truncated,
    })
}

/// Iterator over sibling boxes in a byte range.
pub struct BoxIter<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Mp4Box;

    fn next(&mut self) -> Option<Mp4Box> {
        let found = read_header(self.data, self.pos, self.end)?;
        if found.truncated {
            tracing::debug!(
                box_type = %found.box_type,
                start = found.start,
                "box overruns its range, clamping"
            );
        }
        self.pos = found.end();
        Some(found)
    }
}

/// Iterate the sibling boxes in `[start, end)`; `end` is clamped to the buffer.
pub fn boxes(data: &[u8], start: usize, end: usize) -> BoxIter<'_> {
    let end = end.min(data.len());
    BoxIter {
        data,
        pos: start.min(end),
        end,
    }
}

/// Find the first sibling box of `box_type` in `[start, end)`.
pub fn find_box(data: &[u8], box_type: BoxType, start: usize, end: usize) -> Option<Mp4Box> {
    boxes(data, start, end).find(|b| b.box_type == box_type)
}

/// Find every sibling box of `box_type` in `[start, end)`.
pub fn find_all_boxes(data: &[u8], box_type: BoxType, start: usize, end: usize) -> Vec<Mp4Box> {
    boxes(data, start, end)
        .filter(|b| b.box_type == box_type)
        .collect()
}

/// Byte-by-byte scan for boxes tagged `box_type`, ignoring nesting.
///
/// Used when offset chains are broken. A candidate is accepted only if its
/// declared size fits entirely inside `[start, end)`; otherwise the scan
/// moves on by one byte.
pub fn find_boxes_linear(data: &[u8], box_type: BoxType, start: usize, end: usize) -> Vec<Mp4Box> {
    let end = end.min(data.len());
    let mut found = Vec::new();
    let mut offset = start;

    while offset + 8 <= end {
        if data[offset + 4..offset + 8] != box_type.0 {
            offset += 1;
            continue;
        }

        match read_header(data, offset, end) {
            Some(candidate) if !candidate.truncated => {
                offset += candidate.full_size.max(8);
                found.push(candidate);
            }
            _ => offset += 1,
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(tag);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_find_nested_box() {
        let tkhd = make_box(b"tkhd", &[0u8; 4]);
        let trak = make_box(b"trak", &tkhd);
        let mut data = make_box(b"ftyp", b"isom");
        data.extend(make_box(b"moov", &trak));

        let moov = find_box(&data, BoxType::MOOV, 0, data.len()).unwrap();
        assert_eq!(moov.start, 12);
        assert_eq!(moov.payload_offset, 20);
        assert_eq!(moov.full_size, 8 + trak.len());

        let found = moov.descend(&data, &[BoxType::TRAK, BoxType::TKHD]).unwrap();
        assert_eq!(found.payload_size, 4);
        assert!(!found.truncated);
    }

    #[test]
    fn test_extended_size() {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[7u8; 4]);

        let mdat = find_box(&data, BoxType::MDAT, 0, data.len()).unwrap();
        assert_eq!(mdat.payload_offset, 16);
        assert_eq!(mdat.payload_size, 4);
        assert_eq!(mdat.payload(&data), &[7, 7, 7, 7]);
    }

    #[test]
    fn test_size_zero_extends_to_end() {
        let mut data = make_box(b"free", &[]);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[1, 2, 3]);

        let mdat = find_box(&data, BoxType::MDAT, 0, data.len()).unwrap();
        assert_eq!(mdat.end(), data.len());
        assert_eq!(mdat.payload_size, 3);
    }

    #[test]
    fn test_empty_box_at_range_end_is_found() {
        let mut data = make_box(b"ftyp", b"isom");
        data.extend(make_box(b"moof", &[]));
        assert!(find_box(&data, BoxType::MOOF, 0, data.len()).is_some());
    }

    #[test]
    fn test_overrunning_box_is_clamped() {
        let mut data = 100u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0u8; 12]);

        let mdat = find_box(&data, BoxType::MDAT, 0, data.len()).unwrap();
        assert!(mdat.truncated);
        assert_eq!(mdat.end(), data.len());
        assert_eq!(mdat.payload_offset + mdat.payload_size, mdat.start + mdat.full_size);
    }

    #[test]
    fn test_undersized_header_stops_scan() {
        let mut data = 4u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"junk");
        data.extend(make_box(b"moov", &[]));
        assert!(find_box(&data, BoxType::MOOV, 0, data.len()).is_none());
    }

    #[test]
    fn test_huge_extended_size_does_not_overflow() {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&u64::MAX.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);

        let mdat = find_box(&data, BoxType::MDAT, 0, data.len()).unwrap();
        assert!(mdat.truncated);
        assert_eq!(mdat.end(), data.len());
    }

    #[test]
    fn test_found_boxes_stay_in_range_and_do_not_overlap() {
        let mut data = Vec::new();
        for tag in [b"free", b"skip", b"free", b"moov"] {
            data.extend(make_box(tag, &[0xAA; 5]));
        }
        data.extend_from_slice(&200u32.to_be_bytes());
        data.extend_from_slice(b"free");

        let all: Vec<_> = boxes(&data, 0, data.len()).collect();
        assert_eq!(all.len(), 5);
        for pair in all.windows(2) {
            assert!(pair[0].end() <= pair[1].start);
        }
        for b in &all {
            assert!(b.payload_offset + b.payload_size <= data.len());
        }
    }

    #[test]
    fn test_linear_scan_ignores_nesting() {
        let avcc = make_box(b"avcC", &[1, 0x64, 0, 0x1F]);
        let mut garbage = vec![0xFFu8; 3];
        garbage.extend(&avcc);
        let data = make_box(b"moov", &garbage);

        assert!(find_box(&data, BoxType::AVCC, 0, data.len()).is_none());
        let found = find_boxes_linear(&data, BoxType::AVCC, 0, data.len());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start, 11);
        assert_eq!(found[0].payload(&data), &[1, 0x64, 0, 0x1F]);
    }

    #[test]
    fn test_linear_scan_rejects_overrunning_candidate() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&500u32.to_be_bytes());
        data.extend_from_slice(b"stsd");
        assert!(find_boxes_linear(&data, BoxType::STSD, 0, data.len()).is_empty());
    }
}
