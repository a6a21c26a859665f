//! HEIC/HEIF decoding
//!
//! Uses libheif-rs to decode the primary image together with its ICC profile
//! and EXIF block. Rotation and mirroring stored in the container are applied
//! by libheif during decode.

use crate::errors::CodecError;
use crate::exif;
use image::{DynamicImage, ImageBuffer, Rgb, Rgba};
use libheif_rs::{ColorSpace, HeifContext, ImageHandle, LibHeif, RgbChroma};

/// `ftyp` brands that mark an ISO-BMFF file as a HEIF still image or sequence.
const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"heim", b"heis", b"hevc", b"hevx", b"mif1", b"msf1",
];

/// Decoded raster plus the metadata to carry into the PNG.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub icc_profile: Option<Vec<u8>>,
    /// Bare TIFF structure, ready for an `eXIf` chunk
    pub exif: Option<Vec<u8>>,
}

/// True when `bytes` start with an `ftyp` box naming a HEIF brand, either as
/// the major brand or among the compatible brands.
pub fn is_heif_container(bytes: &[u8]) -> bool {
    if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
        return false;
    }
    let box_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let box_end = box_len.clamp(12, bytes.len());

    let is_heif_brand = |brand: &[u8]| HEIF_BRANDS.iter().any(|b| &b[..] == brand);
    if is_heif_brand(&bytes[8..12]) {
        return true;
    }
    // major brand, minor version, then compatible brands
    bytes
        .get(16..box_end)
        .map(|compatible| compatible.chunks_exact(4).any(is_heif_brand))
        .unwrap_or(false)
}

pub fn decode_heif(bytes: &[u8]) -> Result<DecodedImage, CodecError> {
    let lib_heif = LibHeif::new();

    let ctx = HeifContext::read_from_bytes(bytes).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("SecurityLimitExceeded") || msg.contains("ipco") {
            CodecError::Heif(format!("security limit exceeded while parsing container: {}", msg))
        } else {
            CodecError::Heif(format!("cannot read container: {}", msg))
        }
    })?;

    let handle = ctx
        .primary_image_handle()
        .map_err(|e| CodecError::Heif(format!("no primary image: {}", e)))?;

    let has_alpha = handle.has_alpha_channel();
    let bit_depth = handle.luma_bits_per_pixel();
    let deep = bit_depth > 8;

    let chroma = match (deep, has_alpha) {
        (false, false) => RgbChroma::Rgb,
        (false, true) => RgbChroma::Rgba,
        (true, false) => RgbChroma::HdrRgbLe,
        (true, true) => RgbChroma::HdrRgbaLe,
    };

    let decoded = lib_heif
        .decode(&handle, ColorSpace::Rgb(chroma), None)
        .map_err(|e| CodecError::Heif(format!("decode failed: {}", e)))?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| CodecError::UnsupportedLayout("no interleaved RGB plane".to_string()))?;

    let width = plane.width;
    let height = plane.height;
    let channels: usize = if has_alpha { 4 } else { 3 };
    let bytes_per_sample: usize = if deep { 2 } else { 1 };
    let row_len = width as usize * channels * bytes_per_sample;
    let packed = pack_rows(plane.data, plane.stride, row_len, height as usize)?;

    let image = if deep {
        let samples = widen_to_16_bit(&packed, plane.bits_per_pixel);
        match has_alpha {
            true => ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, samples)
                .map(DynamicImage::ImageRgba16),
            false => ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, samples)
                .map(DynamicImage::ImageRgb16),
        }
    } else {
        match has_alpha {
            true => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, packed)
                .map(DynamicImage::ImageRgba8),
            false => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, packed)
                .map(DynamicImage::ImageRgb8),
        }
    }
    .ok_or_else(|| {
        CodecError::UnsupportedLayout(format!("buffer does not match {}x{}", width, height))
    })?;

    let icc_profile = handle
        .color_profile_raw()
        .map(|profile| profile.data)
        .filter(|data| !data.is_empty());

    let exif = read_exif(&handle).map(|mut tiff| {
        if exif::reset_orientation(&mut tiff) {
            tracing::debug!("Reset EXIF orientation after decoder applied it");
        }
        tiff
    });

    tracing::trace!(
        width,
        height,
        bit_depth,
        has_alpha,
        has_icc = icc_profile.is_some(),
        has_exif = exif.is_some(),
        "Decoded HEIF primary image"
    );

    Ok(DecodedImage {
        image,
        icc_profile,
        exif,
    })
}

/// First EXIF block of the image that holds a TIFF header.
fn read_exif(handle: &ImageHandle) -> Option<Vec<u8>> {
    let count = handle.number_of_metadata_blocks(b"Exif").max(0) as usize;
    let mut ids = vec![0; count];
    let filled = handle.metadata_block_ids(&mut ids, b"Exif");
    ids.truncate(filled);
    ids.into_iter()
        .filter_map(|id| handle.metadata(id).ok())
        .find_map(|raw| exif::to_tiff_payload(&raw))
}

/// Copy `height` rows of `row_len` bytes out of a plane with `stride` bytes per row.
fn pack_rows(
    data: &[u8],
    stride: usize,
    row_len: usize,
    height: usize,
) -> Result<Vec<u8>, CodecError> {
    if stride == row_len && data.len() >= row_len * height {
        return Ok(data[..row_len * height].to_vec());
    }

    let mut out = Vec::with_capacity(row_len * height);
    for y in 0..height {
        let start = y * stride;
        let row = data.get(start..start + row_len).ok_or_else(|| {
            CodecError::UnsupportedLayout(format!("plane ends before row {}", y))
        })?;
        out.extend_from_slice(row);
    }
    Ok(out)
}

/// Little-endian samples of `bits` significant bits, rescaled to the full 16-bit range.
fn widen_to_16_bit(packed: &[u8], bits: u8) -> Vec<u16> {
    let bits = u32::from(bits.clamp(9, 16));
    packed
        .chunks_exact(2)
        .map(|pair| {
            let v = u16::from_le_bytes([pair[0], pair[1]]);
            if bits == 16 {
                v
            } else {
                (v << (16 - bits)) | (v >> (2 * bits - 16))
            }
        })
        .collect()
}
