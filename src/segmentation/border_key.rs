use anyhow::{ensure, Result};

use super::types::{ConfidenceMap, OracleRequest, SegmentationOracle};

/// Colour-key oracle for backdrops that touch the image border.
///
/// The key colour is the per-channel median of the outermost pixel ring.
/// Confidence grows linearly with RGB distance from the key and saturates at
/// `tolerance * score_threshold`, so a higher score threshold is stricter.
/// Source pixels that are already transparent are reported as background.
#[derive(Debug, Clone)]
pub struct BorderKeyOracle {
    tolerance: f32,
}

impl BorderKeyOracle {
    pub const DEFAULT_TOLERANCE: f32 = 96.0;

    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance: tolerance.max(1.0),
        }
    }

    /// Median colour of the border ring
    pub fn key_color(pixels: &[u8], width: u32, height: u32) -> [u8; 3] {
        let (w, h) = (width as usize, height as usize);
        let mut channels: [Vec<u8>; 3] = Default::default();

        let mut sample = |x: usize, y: usize| {
            let i = (y * w + x) * 4;
            for (c, channel) in channels.iter_mut().enumerate() {
                channel.push(pixels[i + c]);
            }
        };

        for x in 0..w {
            sample(x, 0);
            if h > 1 {
                sample(x, h - 1);
            }
        }
        for y in 1..h.saturating_sub(1) {
            sample(0, y);
            if w > 1 {
                sample(w - 1, y);
            }
        }

        channels.map(|mut values| {
            values.sort_unstable();
            values.get(values.len() / 2).copied().unwrap_or(0)
        })
    }
}

impl Default for BorderKeyOracle {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TOLERANCE)
    }
}

impl SegmentationOracle for BorderKeyOracle {
    fn infer(&mut self, request: &OracleRequest<'_>) -> Result<ConfidenceMap> {
        let _span = tracing::debug_span!("border_key_infer").entered();

        let pixel_count = request.width as usize * request.height as usize;
        ensure!(
            request.pixels.len() == pixel_count * 4,
            "expected {} RGBA bytes, got {}",
            pixel_count * 4,
            request.pixels.len()
        );
        ensure!(pixel_count > 0, "cannot segment an empty image");

        let key = Self::key_color(request.pixels, request.width, request.height);
        let saturation = self.tolerance * request.score_threshold.max(0.01);
        tracing::debug!("Border key colour {:?}, saturation {:.1}", key, saturation);

        let values = request
            .pixels
            .chunks_exact(4)
            .map(|px| {
                if px[3] == 0 {
                    return 0.0;
                }
                let dr = px[0] as f32 - key[0] as f32;
                let dg = px[1] as f32 - key[1] as f32;
                let db = px[2] as f32 - key[2] as f32;
                ((dr * dr + dg * dg + db * db).sqrt() / saturation).min(1.0)
            })
            .collect();

        ConfidenceMap::from_vec(request.width, request.height, values)
    }

    fn name(&self) -> &str {
        "border-key"
    }
}
