//! Run parameters supplied by the caller.

use crate::errors::RequestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_OUTPUT_PREFIX: &str = "ConvertToPNGOutput";
pub const MAX_COMPRESS_LEVEL: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Keep the original size
    #[default]
    Keep,
    /// Scale uniformly to fit inside the target box
    Fit,
    /// Scale to exactly the target size, ignoring aspect ratio
    Stretch,
    /// Fit, then center on a canvas of exactly the target size
    Pad,
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResizeMode::Keep => "keep",
            ResizeMode::Fit => "fit",
            ResizeMode::Stretch => "stretch",
            ResizeMode::Pad => "pad",
        };
        f.write_str(name)
    }
}

/// Background color for [`ResizeMode::Pad`].
///
/// Parsed leniently from `#RRGGBB`, `RRGGBB`, `#RGB`, `r,g,b`, `white` or
/// `black`; anything else becomes opaque white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PadColor(pub [u8; 3]);

impl PadColor {
    pub const WHITE: PadColor = PadColor([255, 255, 255]);
    pub const BLACK: PadColor = PadColor([0, 0, 0]);

    pub fn parse(raw: &str) -> Option<PadColor> {
        let s = raw.trim().to_ascii_lowercase();
        match s.as_str() {
            "white" => return Some(Self::WHITE),
            "black" => return Some(Self::BLACK),
            _ => {}
        }

        if s.contains(',') {
            let parts: Vec<&str> = s.split(',').map(str::trim).collect();
            if parts.len() != 3 {
                return None;
            }
            let mut rgb = [0u8; 3];
            for (slot, part) in rgb.iter_mut().zip(parts) {
                *slot = part.parse().ok()?;
            }
            return Some(PadColor(rgb));
        }

        let hex = s.strip_prefix('#').unwrap_or(&s);
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        match hex.len() {
            6 => {
                let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
                Some(PadColor([channel(0)?, channel(2)?, channel(4)?]))
            }
            3 => {
                let channel = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
                Some(PadColor([channel(0)?, channel(1)?, channel(2)?]))
            }
            _ => None,
        }
    }

    pub fn parse_or_white(raw: &str) -> PadColor {
        Self::parse(raw).unwrap_or_else(|| {
            tracing::warn!(value = raw, "Unrecognised pad color, using white");
            Self::WHITE
        })
    }

    pub fn to_hex(self) -> String {
        let [r, g, b] = self.0;
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }
}

impl Default for PadColor {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<String> for PadColor {
    fn from(raw: String) -> Self {
        PadColor::parse_or_white(&raw)
    }
}

impl From<PadColor> for String {
    fn from(color: PadColor) -> Self {
        color.to_hex()
    }
}

/// Geometry for the image transform step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResizeSpec {
    pub mode: ResizeMode,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub avoid_upscale: bool,
    pub pad_color: PadColor,
}

/// Everything a worker needs besides the paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvertSettings {
    pub compress_level: u8,
    pub resize: ResizeSpec,
}

/// Parameters for one batch run. Read-only once the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionRequest {
    pub input_root: PathBuf,
    pub output_base: PathBuf,
    pub output_prefix: String,
    pub recursive: bool,
    pub compress_level: u8,
    pub resize_mode: ResizeMode,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    pub avoid_upscale: bool,
    pub pad_color: PadColor,
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            input_root: PathBuf::new(),
            output_base: PathBuf::new(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            recursive: true,
            compress_level: 0,
            resize_mode: ResizeMode::Keep,
            target_width: None,
            target_height: None,
            avoid_upscale: true,
            pad_color: PadColor::WHITE,
        }
    }
}

impl ConversionRequest {
    pub fn new(input_root: impl Into<PathBuf>, output_base: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_base: output_base.into(),
            ..Self::default()
        }
    }

    /// Check the per-mode geometry rules and the compression range.
    ///
    /// Targets are ignored entirely in [`ResizeMode::Keep`].
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.compress_level > MAX_COMPRESS_LEVEL {
            return Err(RequestError::CompressLevel(self.compress_level));
        }

        if self.resize_mode == ResizeMode::Keep {
            return Ok(());
        }

        if self.target_width == Some(0) {
            return Err(RequestError::ZeroDimension { axis: "width" });
        }
        if self.target_height == Some(0) {
            return Err(RequestError::ZeroDimension { axis: "height" });
        }

        match self.resize_mode {
            ResizeMode::Fit if self.target_width.is_none() && self.target_height.is_none() => {
                Err(RequestError::MissingTarget {
                    mode: self.resize_mode,
                })
            }
            ResizeMode::Stretch | ResizeMode::Pad
                if self.target_width.is_none() || self.target_height.is_none() =>
            {
                Err(RequestError::MissingDimensions {
                    mode: self.resize_mode,
                })
            }
            _ => Ok(()),
        }
    }

    /// Prefix used for the indexed output directory; blank falls back to the default.
    pub fn effective_prefix(&self) -> &str {
        let trimmed = self.output_prefix.trim();
        if trimmed.is_empty() {
            DEFAULT_OUTPUT_PREFIX
        } else {
            trimmed
        }
    }

    pub fn resize_spec(&self) -> ResizeSpec {
        ResizeSpec {
            mode: self.resize_mode,
            width: self.target_width,
            height: self.target_height,
            avoid_upscale: self.avoid_upscale,
            pad_color: self.pad_color,
        }
    }

    pub fn convert_settings(&self) -> ConvertSettings {
        ConvertSettings {
            compress_level: self.compress_level.min(MAX_COMPRESS_LEVEL),
            resize: self.resize_spec(),
        }
    }
}
