use anyhow::{Context, Result};
use image::{imageops, RgbaImage};
use ndarray::Array4;

/// Converts working-buffer pixels to model input tensors and model output
/// back to probabilities
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess RGBA bytes into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, pixels: &[u8], width: u32, height: u32) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let image = RgbaImage::from_raw(width, height, pixels.to_vec()).with_context(|| {
            format!(
                "{} bytes do not form a {}x{} RGBA image",
                pixels.len(),
                width,
                height
            )
        })?;

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                &image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }

    /// Detect whether model output is already in probability space or raw
    /// logits that need a sigmoid
    pub fn is_probability_space(data: &[f32]) -> bool {
        if data.is_empty() {
            return false;
        }
        let step = (data.len() / 10_000).max(1);
        let (min, max) = data
            .iter()
            .step_by(step)
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        min >= -0.05 && max <= 1.05
    }

    pub fn to_probability(value: f32, already_probability: bool) -> f32 {
        if already_probability {
            value.clamp(0.0, 1.0)
        } else {
            1.0 / (1.0 + (-value).exp())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn produces_nchw_tensor_at_target_size() {
        let pixels = [255u8, 0, 0, 255].repeat(4 * 2);
        let tensor = Preprocessor::new(8, 6).preprocess(&pixels, 4, 2).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 6, 8]);
        assert_relative_eq!(tensor[[0, 0, 3, 3]], 1.0);
        assert_relative_eq!(tensor[[0, 1, 3, 3]], 0.0);
    }

    #[test]
    fn detects_logits() {
        assert!(Preprocessor::is_probability_space(&[0.0, 0.5, 1.0]));
        assert!(!Preprocessor::is_probability_space(&[-4.0, 3.0]));
        assert_relative_eq!(Preprocessor::to_probability(0.0, false), 0.5);
    }
}
