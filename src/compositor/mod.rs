//! Background and overlay compositing on top of the cached matte.

mod overlay;

pub use overlay::{stamp_doodles, ShapeKind};

use image::{imageops, Rgba, RgbaImage};

use crate::config::{Background, OutputFormat, PipelineConfig};
use crate::error::Result;
use crate::output;

/// Final composited buffer plus its encoded bytes
#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub image: RgbaImage,
    pub format: OutputFormat,
    pub encoded: Vec<u8>,
}

impl CompositeResult {
    /// Encode `image` in `format`
    pub fn encode(image: RgbaImage, format: OutputFormat) -> Result<Self> {
        let encoded = output::encode(&image, format)?;
        Ok(Self {
            image,
            format,
            encoded,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Paint the configured background behind `matte` and stamp the overlay on
/// top. `matte` is the post-refinement cache and is never modified.
pub fn composite(matte: &RgbaImage, config: &PipelineConfig) -> RgbaImage {
    let _span = tracing::debug_span!("composite").entered();

    let mut canvas = matte.clone();
    match &config.background {
        Background::Transparent => {}
        Background::Solid(color) => {
            tracing::debug!("Painting solid background {:?}", color);
            for pixel in canvas.pixels_mut() {
                *pixel = destination_over(*pixel, Rgba([color[0], color[1], color[2], 255]));
            }
        }
        Background::Custom(background) => {
            let (width, height) = canvas.dimensions();
            let scaled;
            let background = if background.dimensions() == (width, height) {
                background
            } else {
                tracing::debug!(
                    "Scaling custom background {}x{} to {}x{}",
                    background.width(),
                    background.height(),
                    width,
                    height
                );
                scaled = imageops::resize(
                    background,
                    width,
                    height,
                    imageops::FilterType::Lanczos3,
                );
                &scaled
            };
            for (pixel, under) in canvas.pixels_mut().zip(background.pixels()) {
                *pixel = destination_over(*pixel, *under);
            }
        }
    }

    if let crate::config::Overlay::Doodles { seed } = config.overlay {
        let count = config.quality.params().overlay_shapes;
        stamp_doodles(&mut canvas, count, seed);
    }

    canvas
}

/// Composite `under` beneath `over` (non-premultiplied RGBA)
pub fn destination_over(over: Rgba<u8>, under: Rgba<u8>) -> Rgba<u8> {
    let over_alpha = over[3];
    if over_alpha == 255 || under[3] == 0 {
        return over;
    }
    if over_alpha == 0 {
        return under;
    }

    let ao = over_alpha as f32 / 255.0;
    let au = under[3] as f32 / 255.0 * (1.0 - ao);
    let out_alpha = ao + au;
    let channel = |c: usize| {
        ((over[c] as f32 * ao + under[c] as f32 * au) / out_alpha)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

/// Composite `over` on top of `under` (non-premultiplied RGBA)
pub fn source_over(under: Rgba<u8>, over: Rgba<u8>) -> Rgba<u8> {
    destination_over(over, under)
}
