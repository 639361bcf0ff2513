use clap::ValueEnum;
use image::RgbaImage;

use crate::error::{PipelineError, Result};

/// Quality tier. Every tuning knob of the pipeline is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

/// Parameters fixed by a [`Quality`] tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityParams {
    /// Longest side of the working buffer
    pub max_dimension: u32,
    /// Number of oracle runs averaged by the ensemble
    pub ensemble_size: usize,
    /// Score threshold handed to the first oracle run
    pub base_score_threshold: f32,
    /// Confidence byte below which a pixel is background
    pub threshold: u8,
    /// Width of the linear alpha ramp above `threshold`
    pub feather: u8,
    /// Decorative shapes stamped by the overlay
    pub overlay_shapes: usize,
}

/// Each ensemble iteration lowers the score threshold by this much
pub const SCORE_THRESHOLD_STEP: f32 = 0.02;

/// Averaged confidence above which a pixel is foreground outright
pub const FOREGROUND_CUTOFF: f32 = 0.65;

impl Quality {
    pub const ALL: [Quality; 3] = [Quality::Low, Quality::Medium, Quality::High];

    pub const fn params(self) -> QualityParams {
        match self {
            Quality::Low => QualityParams {
                max_dimension: 1024,
                ensemble_size: 2,
                base_score_threshold: 0.85,
                threshold: 60,
                feather: 12,
                overlay_shapes: 15,
            },
            Quality::Medium => QualityParams {
                max_dimension: 2048,
                ensemble_size: 3,
                base_score_threshold: 0.92,
                threshold: 40,
                feather: 12,
                overlay_shapes: 30,
            },
            Quality::High => QualityParams {
                max_dimension: 4096,
                ensemble_size: 4,
                base_score_threshold: 0.98,
                threshold: 20,
                feather: 8,
                overlay_shapes: 50,
            },
        }
    }

    /// Score threshold for ensemble iteration `iteration` (zero based)
    pub fn score_threshold(self, iteration: usize) -> f32 {
        self.params().base_score_threshold - SCORE_THRESHOLD_STEP * iteration as f32
    }
}

/// What gets painted behind the extracted subject
#[derive(Debug, Clone, Default)]
pub enum Background {
    #[default]
    Transparent,
    Solid([u8; 3]),
    /// Decoded custom background, scaled to the working size at composite time
    Custom(RgbaImage),
}

impl Background {
    /// Decode a user-supplied background image.
    ///
    /// Failure is a [`PipelineError::Compositing`] and leaves any pipeline
    /// state alone, so the caller can simply pick another background.
    pub fn custom_from_bytes(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).map_err(PipelineError::Compositing)?;
        Ok(Background::Custom(decoded.to_rgba8()))
    }

    /// Parse `#rrggbb` (leading `#` optional)
    pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
        let hex = value.strip_prefix('#').unwrap_or(value);
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some([channel(0)?, channel(2)?, channel(4)?])
    }
}

/// Decorative shapes stamped over the composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overlay {
    #[default]
    None,
    /// Stars, hearts and scribbles. A fixed seed makes placement reproducible.
    Doodles { seed: Option<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputKind {
    #[default]
    Png,
    Jpeg,
    Webp,
}

/// Encoded output format of a composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Png,
    /// JPEG has no alpha; transparent regions are flattened onto white
    Jpeg { quality: u8 },
    WebP,
}

impl OutputFormat {
    pub fn from_kind(kind: OutputKind, jpeg_quality: u8) -> Self {
        match kind {
            OutputKind::Png => OutputFormat::Png,
            OutputKind::Jpeg => OutputFormat::Jpeg {
                quality: jpeg_quality.clamp(1, 100),
            },
            OutputKind::Webp => OutputFormat::WebP,
        }
    }

    pub fn kind(self) -> OutputKind {
        match self {
            OutputFormat::Png => OutputKind::Png,
            OutputFormat::Jpeg { .. } => OutputKind::Jpeg,
            OutputFormat::WebP => OutputKind::Webp,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg { .. } => "jpg",
            OutputFormat::WebP => "webp",
        }
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, OutputFormat::Jpeg { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub quality: Quality,
    pub background: Background,
    pub overlay: Overlay,
    pub output_format: OutputFormat,
}
