//! Resize policies applied between decode and encode.
//!
//! | mode    | result                                                   |
//! |---------|----------------------------------------------------------|
//! | Keep    | unchanged                                                |
//! | Fit     | uniform scale into the target box                        |
//! | Stretch | exactly the target size, aspect ratio ignored            |
//! | Pad     | Fit, then centered on a target-sized canvas of pad color |
//!
//! Resampling uses Lanczos3 and is skipped when the size does not change.

use crate::errors::TransformError;
use crate::request::{PadColor, ResizeMode, ResizeSpec};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma, LumaA, Pixel, Rgb, Rgba};

const FILTER: FilterType = FilterType::Lanczos3;

/// Contain-fit size of an `orig` raster for the given target box.
///
/// A missing axis is derived from the source aspect ratio. With
/// `avoid_upscale` the scale factor never exceeds 1. Each axis is at least 1.
/// Returns `None` when neither axis is given.
pub fn contain_size(
    orig: (u32, u32),
    target_w: Option<u32>,
    target_h: Option<u32>,
    avoid_upscale: bool,
) -> Option<(u32, u32)> {
    let ow = orig.0.max(1) as f64;
    let oh = orig.1.max(1) as f64;

    let (tw, th) = match (target_w, target_h) {
        (Some(w), Some(h)) => (w as f64, h as f64),
        (Some(w), None) => (w as f64, w as f64 * oh / ow),
        (None, Some(h)) => (h as f64 * ow / oh, h as f64),
        (None, None) => return None,
    };

    let mut scale = (tw / ow).min(th / oh);
    if avoid_upscale {
        scale = scale.min(1.0);
    }

    let w = ((ow * scale).round() as u32).max(1);
    let h = ((oh * scale).round() as u32).max(1);
    Some((w, h))
}

/// Apply `spec` to a decoded raster.
pub fn apply(img: DynamicImage, spec: &ResizeSpec) -> Result<DynamicImage, TransformError> {
    let orig = (img.width(), img.height());

    match spec.mode {
        ResizeMode::Keep => Ok(img),
        ResizeMode::Fit => {
            let size = contain_size(orig, spec.width, spec.height, spec.avoid_upscale)
                .ok_or(TransformError::MissingTarget { mode: spec.mode })?;
            Ok(resample(img, size))
        }
        ResizeMode::Stretch => {
            let target = exact_target(spec)?;
            Ok(resample(img, target))
        }
        ResizeMode::Pad => {
            let target = exact_target(spec)?;
            let size = contain_size(orig, Some(target.0), Some(target.1), spec.avoid_upscale)
                .ok_or(TransformError::MissingTarget { mode: spec.mode })?;
            let fitted = resample(img, size);
            Ok(pad_onto_canvas(&fitted, target, spec.pad_color))
        }
    }
}

fn exact_target(spec: &ResizeSpec) -> Result<(u32, u32), TransformError> {
    match (spec.width, spec.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
        (Some(w), Some(h)) => Err(TransformError::EmptyTarget { width: w, height: h }),
        _ => Err(TransformError::MissingTarget { mode: spec.mode }),
    }
}

fn resample(img: DynamicImage, (w, h): (u32, u32)) -> DynamicImage {
    if (img.width(), img.height()) == (w, h) {
        return img;
    }
    tracing::trace!(from_w = img.width(), from_h = img.height(), to_w = w, to_h = h, "Resampling");
    img.resize_exact(w, h, FILTER)
}

/// Whether the raster stores more than 8 bits per channel.
fn is_high_depth(img: &DynamicImage) -> bool {
    let color = img.color();
    color.bytes_per_pixel() > color.channel_count()
}

/// Center `img` on a `target` canvas filled with `color`.
///
/// The canvas follows the source layout: alpha sources get an alpha canvas
/// (pad area opaque) and deep rasters keep 16 bits per channel. Grayscale
/// sources stay grayscale when `color` is a gray; any other pad color needs an
/// RGB canvas. Pixels are copied, not blended.
fn pad_onto_canvas(img: &DynamicImage, (tw, th): (u32, u32), color: PadColor) -> DynamicImage {
    let x = (i64::from(tw) - i64::from(img.width())) / 2;
    let y = (i64::from(th) - i64::from(img.height())) / 2;
    let [r, g, b] = color.0;
    let wide = |c: u8| u16::from(c) * 257;
    let size = (tw, th);

    let gray = r == g && g == b && img.color().channel_count() <= 2;
    match (gray, img.color().has_alpha(), is_high_depth(img)) {
        (true, false, false) => {
            DynamicImage::ImageLuma8(composite(Luma([r]), size, &img.to_luma8(), x, y))
        }
        (true, true, false) => DynamicImage::ImageLumaA8(composite(
            LumaA([r, u8::MAX]),
            size,
            &img.to_luma_alpha8(),
            x,
            y,
        )),
        (true, false, true) => {
            DynamicImage::ImageLuma16(composite(Luma([wide(r)]), size, &img.to_luma16(), x, y))
        }
        (true, true, true) => DynamicImage::ImageLumaA16(composite(
            LumaA([wide(r), u16::MAX]),
            size,
            &img.to_luma_alpha16(),
            x,
            y,
        )),
        (false, true, false) => DynamicImage::ImageRgba8(composite(
            Rgba([r, g, b, u8::MAX]),
            size,
            &img.to_rgba8(),
            x,
            y,
        )),
        (false, false, false) => {
            DynamicImage::ImageRgb8(composite(Rgb([r, g, b]), size, &img.to_rgb8(), x, y))
        }
        (false, true, true) => DynamicImage::ImageRgba16(composite(
            Rgba([wide(r), wide(g), wide(b), u16::MAX]),
            size,
            &img.to_rgba16(),
            x,
            y,
        )),
        (false, false, true) => DynamicImage::ImageRgb16(composite(
            Rgb([wide(r), wide(g), wide(b)]),
            size,
            &img.to_rgb16(),
            x,
            y,
        )),
    }
}

/// `top` copied onto a `(w, h)` canvas of `fill` at offset `(x, y)`.
fn composite<P: Pixel>(
    fill: P,
    (w, h): (u32, u32),
    top: &ImageBuffer<P, Vec<P::Subpixel>>,
    x: i64,
    y: i64,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut canvas = ImageBuffer::from_pixel(w, h, fill);
    imageops::replace(&mut canvas, top, x, y);
    canvas
}
