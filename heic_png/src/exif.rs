//! EXIF payload helpers.
//!
//! PNG `eXIf` chunks hold a bare TIFF structure (`II*\0` or `MM\0*`). Sources
//! hand EXIF over in other wrappings:
//! - HEIF `Exif` items start with a 4-byte big-endian offset to the TIFF header
//! - JPEG APP1 payloads start with `Exif\0\0`

const TIFF_LE: &[u8; 4] = b"II*\0";
const TIFF_BE: &[u8; 4] = b"MM\0*";
const EXIF_PREAMBLE: &[u8; 6] = b"Exif\0\0";

const TAG_ORIENTATION: u16 = 0x0112;
const TYPE_SHORT: u16 = 3;
const IFD_ENTRY_LEN: usize = 12;

fn is_tiff_header(data: &[u8]) -> bool {
    data.len() >= 8 && (data[..4] == TIFF_LE[..] || data[..4] == TIFF_BE[..])
}

/// Extract the TIFF structure from an EXIF blob in any of the known wrappings.
///
/// Returns `None` when no TIFF header can be located.
pub fn to_tiff_payload(raw: &[u8]) -> Option<Vec<u8>> {
    if is_tiff_header(raw) {
        return Some(raw.to_vec());
    }
    if let Some(rest) = raw.strip_prefix(&EXIF_PREAMBLE[..]) {
        return is_tiff_header(rest).then(|| rest.to_vec());
    }

    let offset = u32::from_be_bytes(raw.get(..4)?.try_into().ok()?) as usize;
    let body = raw.get(4usize.checked_add(offset)?..)?;
    let body = body.strip_prefix(&EXIF_PREAMBLE[..]).unwrap_or(body);
    is_tiff_header(body).then(|| body.to_vec())
}

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> Option<u16> {
        let arr: [u8; 2] = b.get(..2)?.try_into().ok()?;
        Some(match self {
            ByteOrder::Little => u16::from_le_bytes(arr),
            ByteOrder::Big => u16::from_be_bytes(arr),
        })
    }

    fn u32(self, b: &[u8]) -> Option<u32> {
        let arr: [u8; 4] = b.get(..4)?.try_into().ok()?;
        Some(match self {
            ByteOrder::Little => u32::from_le_bytes(arr),
            ByteOrder::Big => u32::from_be_bytes(arr),
        })
    }

    fn put_u16(self, v: u16) -> [u8; 2] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }
}

/// Orientation value (1-8) stored in IFD0, if any.
#[cfg(test)]
pub(crate) fn orientation(tiff: &[u8]) -> Option<u16> {
    let (order, value_at) = find_orientation(tiff)?;
    order.u16(&tiff[value_at..])
}

/// Set the IFD0 orientation tag to 1 (top-left). Returns true if the tag was changed.
///
/// Used after a decoder has already applied the rotation, so viewers do not
/// rotate a second time.
pub fn reset_orientation(tiff: &mut [u8]) -> bool {
    let Some((order, value_at)) = find_orientation(tiff) else {
        return false;
    };
    if order.u16(&tiff[value_at..]) == Some(1) {
        return false;
    }
    tiff[value_at..value_at + 2].copy_from_slice(&order.put_u16(1));
    true
}

/// Byte order and offset of the orientation value within `tiff`.
fn find_orientation(tiff: &[u8]) -> Option<(ByteOrder, usize)> {
    let order = match tiff.get(..4)? {
        h if h == &TIFF_LE[..] => ByteOrder::Little,
        h if h == &TIFF_BE[..] => ByteOrder::Big,
        _ => return None,
    };

    let ifd0 = order.u32(tiff.get(4..)?)? as usize;
    let count = order.u16(tiff.get(ifd0..)?)? as usize;

    (0..count).find_map(|i| {
        let entry = ifd0 + 2 + i * IFD_ENTRY_LEN;
        let tag = order.u16(tiff.get(entry..)?)?;
        let typ = order.u16(tiff.get(entry + 2..)?)?;
        let value_at = entry + 8;
        (tag == TAG_ORIENTATION && typ == TYPE_SHORT && tiff.len() >= value_at + 2)
            .then_some((order, value_at))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal little-endian TIFF with one IFD0 entry: Orientation = `value`.
    pub(crate) fn tiff_with_orientation(value: u16) -> Vec<u8> {
        let mut t = Vec::new();
        t.extend_from_slice(TIFF_LE);
        t.extend_from_slice(&8u32.to_le_bytes());
        t.extend_from_slice(&1u16.to_le_bytes());
        t.extend_from_slice(&TAG_ORIENTATION.to_le_bytes());
        t.extend_from_slice(&TYPE_SHORT.to_le_bytes());
        t.extend_from_slice(&1u32.to_le_bytes());
        t.extend_from_slice(&value.to_le_bytes());
        t.extend_from_slice(&[0, 0]);
        t.extend_from_slice(&0u32.to_le_bytes());
        t
    }

    #[test]
    fn test_to_tiff_payload_variants() {
        let tiff = tiff_with_orientation(6);

        assert_eq!(to_tiff_payload(&tiff), Some(tiff.clone()));

        let mut jpeg_style = EXIF_PREAMBLE.to_vec();
        jpeg_style.extend_from_slice(&tiff);
        assert_eq!(to_tiff_payload(&jpeg_style), Some(tiff.clone()));

        let mut heif_style = 6u32.to_be_bytes().to_vec();
        heif_style.extend_from_slice(EXIF_PREAMBLE);
        heif_style.extend_from_slice(&tiff);
        assert_eq!(to_tiff_payload(&heif_style), Some(tiff.clone()));

        let mut heif_zero = 0u32.to_be_bytes().to_vec();
        heif_zero.extend_from_slice(&tiff);
        assert_eq!(to_tiff_payload(&heif_zero), Some(tiff));

        assert_eq!(to_tiff_payload(b"garbage"), None);
        assert_eq!(to_tiff_payload(&[0xff, 0xff, 0xff, 0xff, 1, 2]), None);
    }

    #[test]
    fn test_reset_orientation() {
        let mut tiff = tiff_with_orientation(6);
        assert_eq!(orientation(&tiff), Some(6));
        assert!(reset_orientation(&mut tiff));
        assert_eq!(orientation(&tiff), Some(1));
        assert!(!reset_orientation(&mut tiff));
    }

    #[test]
    fn test_reset_orientation_big_endian() {
        let mut t = Vec::new();
        t.extend_from_slice(TIFF_BE);
        t.extend_from_slice(&8u32.to_be_bytes());
        t.extend_from_slice(&1u16.to_be_bytes());
        t.extend_from_slice(&TAG_ORIENTATION.to_be_bytes());
        t.extend_from_slice(&TYPE_SHORT.to_be_bytes());
        t.extend_from_slice(&1u32.to_be_bytes());
        t.extend_from_slice(&8u16.to_be_bytes());
        t.extend_from_slice(&[0, 0, 0, 0, 0, 0]);

        assert_eq!(orientation(&t), Some(8));
        assert!(reset_orientation(&mut t));
        assert_eq!(orientation(&t), Some(1));
    }

    #[test]
    fn test_truncated_tiff_is_ignored() {
        let tiff = tiff_with_orientation(3);
        let mut cut = tiff[..14].to_vec();
        assert_eq!(orientation(&cut), None);
        assert!(!reset_orientation(&mut cut));
    }
}
