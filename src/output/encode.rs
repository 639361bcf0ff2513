use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::compositor::destination_over;
use crate::config::OutputFormat;
use crate::error::{PipelineError, Result};

/// Encode a composite. JPEG output is flattened onto white first.
pub fn encode(image: &RgbaImage, format: OutputFormat) -> Result<Vec<u8>> {
    let _span = tracing::debug_span!("encode", ?format).entered();

    let mut bytes = Vec::new();
    let result = match format {
        OutputFormat::Png => image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png),
        OutputFormat::WebP => image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::WebP),
        OutputFormat::Jpeg { quality } => {
            let mut flattened = image.clone();
            for pixel in flattened.pixels_mut() {
                *pixel = destination_over(*pixel, Rgba([255, 255, 255, 255]));
            }
            let rgb = DynamicImage::ImageRgba8(flattened).to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&rgb)
        }
    };

    result.map_err(|source| PipelineError::Encode {
        format: format.kind(),
        source,
    })?;

    tracing::debug!("Encoded {} bytes as {:?}", bytes.len(), format);
    Ok(bytes)
}
