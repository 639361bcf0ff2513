use anyhow::{ensure, Result};
use image::{imageops, GrayImage, Luma};
use ndarray::Array2;

use crate::config::{Quality, FOREGROUND_CUTOFF};

/// Per-pixel foreground confidence in [0, 1], shape (height, width)
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceMap {
    values: Array2<f32>,
}

impl ConfidenceMap {
    /// Wrap row-major values. Out of range values are clamped to [0, 1].
    pub fn from_vec(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        ensure!(
            values.len() == width as usize * height as usize,
            "confidence map has {} values, expected {}x{}",
            values.len(),
            width,
            height
        );
        let mut values = Array2::from_shape_vec((height as usize, width as usize), values)?;
        values.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) });
        Ok(Self { values })
    }

    pub fn from_array(values: Array2<f32>) -> Self {
        Self { values }
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            values: Array2::from_elem((height as usize, width as usize), value.clamp(0.0, 1.0)),
        }
    }

    pub fn width(&self) -> u32 {
        self.values.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.values.nrows() as u32
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[[y as usize, x as usize]]
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub(crate) fn into_values(self) -> Array2<f32> {
        self.values
    }

    /// Combined-confidence byte written into the working buffer's alpha
    /// channel for `quality`.
    ///
    /// Averages above the foreground cutoff snap to 255. Everything else is
    /// scaled into `[0, threshold + feather)` so it lands in the transparent
    /// or feathered band of refinement and never becomes fully opaque.
    pub fn alpha_byte(confidence: f32, quality: Quality) -> u8 {
        if confidence > FOREGROUND_CUTOFF {
            return 255;
        }
        let params = quality.params();
        let top = (params.threshold as u16 + params.feather as u16 - 1) as f32;
        (confidence.max(0.0) / FOREGROUND_CUTOFF * top)
            .round()
            .clamp(0.0, top) as u8
    }

    /// Row-major alpha bytes, see [`ConfidenceMap::alpha_byte`]
    pub fn to_alpha_bytes(&self, quality: Quality) -> Vec<u8> {
        self.values
            .iter()
            .map(|&v| Self::alpha_byte(v, quality))
            .collect()
    }

    /// Resize to other dimensions (bilinear on an 8-bit intermediate)
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        let gray = GrayImage::from_fn(self.width(), self.height(), |x, y| {
            Luma([(self.get(x, y) * 255.0).round().clamp(0.0, 255.0) as u8])
        });
        let resized = imageops::resize(&gray, width, height, imageops::FilterType::Triangle);
        Self {
            values: Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                resized.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
            }),
        }
    }
}

/// Everything an oracle needs for one inference call
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    /// Row-major RGBA bytes of the working buffer
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
    /// Score threshold for this call; the ensemble varies it per iteration
    pub score_threshold: f32,
}

/// Trait for segmentation oracles
/// Allows swapping between classifiers (ONNX models, colour keys, test stubs)
pub trait SegmentationOracle: Send {
    /// Produce a confidence map with exactly `request.width` x `request.height` values
    fn infer(&mut self, request: &OracleRequest<'_>) -> Result<ConfidenceMap>;

    /// Short name for logs
    fn name(&self) -> &str {
        "oracle"
    }
}

impl<F> SegmentationOracle for F
where
    F: FnMut(&OracleRequest<'_>) -> Result<ConfidenceMap> + Send,
{
    fn infer(&mut self, request: &OracleRequest<'_>) -> Result<ConfidenceMap> {
        self(request)
    }

    fn name(&self) -> &str {
        "closure"
    }
}
