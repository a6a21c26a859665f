//! Lossless PNG output
//!
//! The image crate's PNG encoder cannot emit ancillary chunks, so encoding goes
//! through the `png` crate directly:
//! - `tEXt`/`iTXt` `Converted-From` with the source file name
//! - `iCCP` with the source color profile (zlib-compressed)
//! - `eXIf` with the source EXIF block

use crate::errors::CodecError;
use flate2::write::ZlibEncoder;
use image::DynamicImage;
use png::chunk::ChunkType;
use png::{BitDepth, ColorType, DeflateCompression, Encoder};
use std::io::Write;
use std::path::Path;

pub const PROVENANCE_KEYWORD: &str = "Converted-From";
const ICC_PROFILE_NAME: &[u8] = b"ICC Profile";

/// Metadata embedded next to the pixels.
#[derive(Debug, Clone, Default)]
pub struct PngMetadata<'a> {
    pub source_name: &'a str,
    pub icc_profile: Option<&'a [u8]>,
    pub exif: Option<&'a [u8]>,
}

/// Raster reduced to one of the PNG sample layouts.
struct Samples {
    color: ColorType,
    depth: BitDepth,
    bytes: Vec<u8>,
}

fn to_be_bytes(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

fn samples_of(img: &DynamicImage) -> Samples {
    let (color, depth, bytes) = match img {
        DynamicImage::ImageLuma8(b) => (ColorType::Grayscale, BitDepth::Eight, b.as_raw().clone()),
        DynamicImage::ImageLumaA8(b) => {
            (ColorType::GrayscaleAlpha, BitDepth::Eight, b.as_raw().clone())
        }
        DynamicImage::ImageRgb8(b) => (ColorType::Rgb, BitDepth::Eight, b.as_raw().clone()),
        DynamicImage::ImageRgba8(b) => (ColorType::Rgba, BitDepth::Eight, b.as_raw().clone()),
        DynamicImage::ImageLuma16(b) => {
            (ColorType::Grayscale, BitDepth::Sixteen, to_be_bytes(b.as_raw()))
        }
        DynamicImage::ImageLumaA16(b) => {
            (ColorType::GrayscaleAlpha, BitDepth::Sixteen, to_be_bytes(b.as_raw()))
        }
        DynamicImage::ImageRgb16(b) => (ColorType::Rgb, BitDepth::Sixteen, to_be_bytes(b.as_raw())),
        DynamicImage::ImageRgba16(b) => {
            (ColorType::Rgba, BitDepth::Sixteen, to_be_bytes(b.as_raw()))
        }
        // float rasters
        other if other.color().has_alpha() => (
            ColorType::Rgba,
            BitDepth::Sixteen,
            to_be_bytes(other.to_rgba16().as_raw()),
        ),
        other => (
            ColorType::Rgb,
            BitDepth::Sixteen,
            to_be_bytes(other.to_rgb16().as_raw()),
        ),
    };
    Samples {
        color,
        depth,
        bytes,
    }
}

fn deflate_for_level(level: u8) -> DeflateCompression {
    match level {
        0 => DeflateCompression::NoCompression,
        l => DeflateCompression::Level(l.min(9)),
    }
}

/// `iCCP` chunk body: profile name, NUL, compression method 0, zlib stream.
fn iccp_payload(profile: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::with_capacity(profile.len() / 2 + ICC_PROFILE_NAME.len() + 2);
    body.extend_from_slice(ICC_PROFILE_NAME);
    body.extend_from_slice(&[0, 0]);

    let mut zlib = ZlibEncoder::new(body, flate2::Compression::default());
    zlib.write_all(profile).map_err(CodecError::Write)?;
    zlib.finish().map_err(CodecError::Write)
}

/// Encode `img` as PNG at deflate `level` (0 stores, 9 smallest), with `meta`.
pub fn encode_png(img: &DynamicImage, level: u8, meta: &PngMetadata<'_>) -> Result<Vec<u8>, CodecError> {
    let samples = samples_of(img);
    let mut out = Vec::new();

    {
        let mut encoder = Encoder::new(&mut out, img.width(), img.height());
        encoder.set_color(samples.color);
        encoder.set_depth(samples.depth);
        encoder.set_deflate_compression(deflate_for_level(level));

        if !meta.source_name.is_empty() {
            let name = meta.source_name.to_string();
            if name.chars().all(|c| u32::from(c) <= 0xff) {
                encoder.add_text_chunk(PROVENANCE_KEYWORD.to_string(), name)?;
            } else {
                encoder.add_itxt_chunk(PROVENANCE_KEYWORD.to_string(), name)?;
            }
        }

        let mut writer = encoder.write_header()?;
        if let Some(profile) = meta.icc_profile.filter(|p| !p.is_empty()) {
            writer.write_chunk(ChunkType(*b"iCCP"), &iccp_payload(profile)?)?;
        }
        if let Some(exif) = meta.exif.filter(|e| !e.is_empty()) {
            writer.write_chunk(ChunkType(*b"eXIf"), exif)?;
        }
        writer.write_image_data(&samples.bytes)?;
        writer.finish()?;
    }

    Ok(out)
}

/// Write `bytes` to a temporary file beside `dest`, then rename it into place.
///
/// Readers see either no file or the complete file.
pub fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), CodecError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".heic-png-")
        .suffix(".png.part")
        .tempfile_in(dir)
        .map_err(CodecError::Write)?;

    tmp.write_all(bytes).map_err(CodecError::Write)?;
    tmp.as_file().sync_all().map_err(CodecError::Write)?;
    tmp.persist(dest).map_err(|e| CodecError::Write(e.error))?;
    Ok(())
}
