use std::fmt;

use image::{imageops, RgbaImage};
use uuid::Uuid;

use crate::config::Quality;
use crate::error::{PipelineError, Result};

/// Stable handle correlating asynchronous results with the image they belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded upload. Created once per load and never modified.
#[derive(Debug, Clone)]
pub struct SourceImage {
    id: ImageId,
    pixels: RgbaImage,
}

impl SourceImage {
    /// Decode an encoded image (any format the `image` crate recognises)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let _span = tracing::debug_span!("decode_source").entered();
        let decoded = image::load_from_memory(bytes).map_err(PipelineError::Input)?;
        Self::from_rgba(decoded.to_rgba8())
    }

    pub fn from_rgba(pixels: RgbaImage) -> Result<Self> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::EmptyImage { width, height });
        }
        Ok(Self {
            id: ImageId::new(),
            pixels,
        })
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Build the working buffer for `quality`: the longest side is capped at
    /// the tier's maximum, aspect ratio kept, never upscaled.
    pub fn working_buffer(&self, quality: Quality) -> RgbaImage {
        let (width, height) = self.dimensions();
        let (target_width, target_height) =
            working_dimensions(width, height, quality.params().max_dimension);

        if (target_width, target_height) == (width, height) {
            return self.pixels.clone();
        }

        tracing::debug!(
            "Downscaling {}x{} to working size {}x{}",
            width,
            height,
            target_width,
            target_height
        );
        imageops::resize(
            &self.pixels,
            target_width,
            target_height,
            imageops::FilterType::Lanczos3,
        )
    }
}

/// Dimensions of the working buffer for a `width` x `height` source
pub fn working_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height);
    }
    let scale = max_dimension as f64 / longest as f64;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, max_dimension);
    (scaled(width), scaled(height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn small_images_are_not_rescaled() {
        assert_eq!(working_dimensions(640, 480, 1024), (640, 480));
        assert_eq!(working_dimensions(1024, 1024, 1024), (1024, 1024));
    }

    #[test]
    fn longest_side_is_capped() {
        assert_eq!(working_dimensions(4000, 2000, 1024), (1024, 512));
        assert_eq!(working_dimensions(1000, 3000, 2048), (683, 2048));
        assert_eq!(working_dimensions(5000, 1, 1024), (1024, 1));
    }

    #[test]
    fn decodes_png_bytes() {
        let image = RgbaImage::from_pixel(8, 4, image::Rgba([1, 2, 3, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let source = SourceImage::decode(&bytes).unwrap();
        assert_eq!(source.dimensions(), (8, 4));
        assert_eq!(source.working_buffer(Quality::Low).dimensions(), (8, 4));
    }

    #[test]
    fn garbage_is_an_input_error() {
        let err = SourceImage::decode(&[0, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[test]
    fn empty_image_is_rejected() {
        let err = SourceImage::from_rgba(RgbaImage::new(0, 5)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyImage { width: 0, height: 5 }));
    }

    #[test]
    fn every_source_gets_a_fresh_id() {
        let a = SourceImage::from_rgba(RgbaImage::new(1, 1)).unwrap();
        let b = SourceImage::from_rgba(RgbaImage::new(1, 1)).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
