//! Single-file conversion: decode, transform, encode, write.

use crate::errors::{CodecError, ConversionError};
use crate::exif;
use crate::heif_decode::{self, DecodedImage};
use crate::png_writer::{self, PngMetadata};
use crate::request::ConvertSettings;
use crate::transform;
use image::{DynamicImage, ImageDecoder, ImageReader};
use shared_utils::{file_name_lossy, format_bytes};
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// One file to convert. The scheduler dispatches at most one item per `dest`
/// in a run; a second source mapping to the same name is reported as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Per-file conversion step run on pool threads.
pub trait Converter: Send + Sync {
    fn convert(&self, item: &WorkItem, settings: &ConvertSettings) -> Result<(), ConversionError>;
}

/// HEIC/HEIF (or anything the image crate reads) to lossless PNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngConverter;

impl Converter for PngConverter {
    fn convert(&self, item: &WorkItem, settings: &ConvertSettings) -> Result<(), ConversionError> {
        convert_one(&item.source, &item.dest, settings)
            .map_err(|e| ConversionError::from((item.source.as_path(), e)))
    }
}

/// Run `converter` on `item`, turning a panic into a [`ConversionError`].
pub fn convert_guarded(
    converter: &dyn Converter,
    item: &WorkItem,
    settings: &ConvertSettings,
) -> Result<(), ConversionError> {
    panic::catch_unwind(AssertUnwindSafe(|| converter.convert(item, settings))).unwrap_or_else(
        |payload| {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(path = %item.source.display(), panic = %msg, "Conversion panicked");
            Err(ConversionError::from((
                item.source.as_path(),
                CodecError::Panic(msg),
            )))
        },
    )
}

pub fn convert_one(source: &Path, dest: &Path, settings: &ConvertSettings) -> Result<(), CodecError> {
    let bytes = std::fs::read(source).map_err(CodecError::Read)?;
    let decoded = decode(&bytes)?;
    let (w, h) = (decoded.image.width(), decoded.image.height());

    let image = transform::apply(decoded.image, &settings.resize)?;

    let source_name = file_name_lossy(source);
    let meta = PngMetadata {
        source_name: &source_name,
        icc_profile: decoded.icc_profile.as_deref(),
        exif: decoded.exif.as_deref(),
    };
    let png = png_writer::encode_png(&image, settings.compress_level, &meta)?;
    png_writer::write_atomically(dest, &png)?;

    tracing::debug!(
        source = %source.display(),
        dest = %dest.display(),
        from = %format!("{}x{}", w, h),
        to = %format!("{}x{}", image.width(), image.height()),
        size = %format_bytes(png.len() as u64),
        "Converted"
    );
    Ok(())
}

/// Decode by content: HEIF containers through libheif, everything else
/// through the image crate's format detection.
fn decode(bytes: &[u8]) -> Result<DecodedImage, CodecError> {
    if heif_decode::is_heif_container(bytes) {
        return heif_decode::decode_heif(bytes);
    }
    tracing::debug!("Not a HEIF container, trying generic decoders");
    decode_generic(bytes)
}

fn decode_generic(bytes: &[u8]) -> Result<DecodedImage, CodecError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(CodecError::Read)?
        .into_decoder()?;

    let icc_profile = decoder.icc_profile()?.filter(|p| !p.is_empty());
    let exif = decoder
        .exif_metadata()?
        .and_then(|raw| exif::to_tiff_payload(&raw));
    let image = DynamicImage::from_decoder(decoder)?;

    Ok(DecodedImage {
        image,
        icc_profile,
        exif,
    })
}
