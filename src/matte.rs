//! Matte refinement: turns the combined confidence held in a working
//! buffer's alpha channel into the final alpha matte and cleans colour
//! fringing along the matte boundary.

use std::collections::HashSet;

use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::config::Quality;
use crate::error::{PipelineError, Result};
use crate::pipeline::CancelToken;
use crate::segmentation::ConfidenceMap;
use crate::selection::SelectionPolygon;

/// Sparse sampling stride of the background fingerprint scan
const FINGERPRINT_STRIDE: usize = 10;

/// Half width of the edge smoothing window (5x5)
const SMOOTHING_RADIUS: i64 = 2;

/// Counters reported by [`refine`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefineStats {
    pub fingerprint_colors: usize,
    pub excluded: usize,
    pub transparent: usize,
    pub feathered: usize,
    pub opaque: usize,
}

/// Write the combined confidence into the alpha channel of `buffer`
pub fn apply_confidence(
    buffer: &mut RgbaImage,
    map: &ConfidenceMap,
    quality: Quality,
) -> Result<()> {
    if buffer.dimensions() != map.dimensions() {
        return Err(PipelineError::Oracle(format!(
            "confidence map is {}x{} but the working buffer is {}x{}",
            map.width(),
            map.height(),
            buffer.width(),
            buffer.height()
        )));
    }
    for (pixel, &confidence) in buffer.pixels_mut().zip(map.values().iter()) {
        pixel[3] = ConfidenceMap::alpha_byte(confidence, quality);
    }
    Ok(())
}

/// Refine the matte in place.
///
/// `selection` must already be in working-buffer coordinates. The buffer is
/// left partially processed if `cancel` fires; callers refine a copy.
pub fn refine(
    buffer: &mut RgbaImage,
    quality: Quality,
    selection: Option<&SelectionPolygon>,
    cancel: &CancelToken,
) -> Result<RefineStats> {
    let _span = tracing::debug_span!("refine_matte", ?quality).entered();

    let params = quality.params();
    let threshold = params.threshold;
    let feather = params.feather;
    let (width, height) = buffer.dimensions();
    let (w, h) = (width as usize, height as usize);

    let mut stats = RefineStats::default();

    // 1. Selection masking
    let mut excluded = vec![false; w * h];
    if let Some(mask) = selection.and_then(|polygon| polygon.rasterize(width, height)) {
        for (i, pixel) in buffer.pixels_mut().enumerate() {
            if !mask.contains_index(i) {
                *pixel = Rgba([0, 0, 0, 0]);
                excluded[i] = true;
            }
        }
        stats.excluded = excluded.iter().filter(|&&e| e).count();
        if stats.excluded == w * h {
            tracing::debug!("Selection excludes every pixel");
            return Ok(stats);
        }
    }

    // 2. Background fingerprint
    let mut fingerprint: HashSet<[u8; 3]> = HashSet::new();
    for y in (0..h).step_by(FINGERPRINT_STRIDE) {
        for x in (0..w).step_by(FINGERPRINT_STRIDE) {
            let i = y * w + x;
            if excluded[i] {
                continue;
            }
            let pixel = buffer.get_pixel(x as u32, y as u32);
            if pixel[3] < threshold {
                fingerprint.insert([pixel[0], pixel[1], pixel[2]]);
            }
        }
    }
    stats.fingerprint_colors = fingerprint.len();
    tracing::debug!("Background fingerprint holds {} colours", fingerprint.len());

    // 3. Classification
    for y in 0..h {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        for x in 0..w {
            if excluded[y * w + x] {
                continue;
            }
            let pixel = buffer.get_pixel_mut(x as u32, y as u32);
            pixel[3] = classify(pixel, threshold, feather, &fingerprint);
        }
    }

    // 4. Edge-fringe smoothing against the post-classification snapshot
    let snapshot = buffer.clone();
    for y in 0..h {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        for x in 0..w {
            let alpha = snapshot.get_pixel(x as u32, y as u32)[3];
            if alpha == 0 || alpha == 255 {
                continue;
            }
            if let Some(rgb) = neighborhood_mean(&snapshot, x as i64, y as i64) {
                let pixel = buffer.get_pixel_mut(x as u32, y as u32);
                pixel[0] = rgb[0];
                pixel[1] = rgb[1];
                pixel[2] = rgb[2];
            }
        }
    }

    for (i, pixel) in buffer.pixels().enumerate() {
        if excluded[i] {
            continue;
        }
        match pixel[3] {
            0 => stats.transparent += 1,
            255 => stats.opaque += 1,
            _ => stats.feathered += 1,
        }
    }

    tracing::debug!(
        "Matte refined: {} opaque, {} feathered, {} transparent, {} outside selection",
        stats.opaque,
        stats.feathered,
        stats.transparent,
        stats.excluded
    );
    Ok(stats)
}

fn classify(pixel: &Rgba<u8>, threshold: u8, feather: u8, fingerprint: &HashSet<[u8; 3]>) -> u8 {
    let alpha = pixel[3];
    if alpha < threshold || fingerprint.contains(&[pixel[0], pixel[1], pixel[2]]) {
        0
    } else if (alpha as u16) < threshold as u16 + feather as u16 {
        let ramp = 255.0 * (alpha - threshold) as f32 / feather as f32;
        ramp.round().clamp(0.0, 255.0) as u8
    } else {
        255
    }
}

/// Mean RGB over the 5x5 window around (x, y), counting only pixels with
/// alpha > 0. `None` when no pixel qualifies.
fn neighborhood_mean(image: &RgbaImage, x: i64, y: i64) -> Option<[u8; 3]> {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let mut sum = [0u32; 3];
    let mut count = 0u32;

    for ny in (y - SMOOTHING_RADIUS).max(0)..=(y + SMOOTHING_RADIUS).min(height - 1) {
        for nx in (x - SMOOTHING_RADIUS).max(0)..=(x + SMOOTHING_RADIUS).min(width - 1) {
            let neighbor = image.get_pixel(nx as u32, ny as u32);
            if neighbor[3] == 0 {
                continue;
            }
            sum[0] += neighbor[0] as u32;
            sum[1] += neighbor[1] as u32;
            sum[2] += neighbor[2] as u32;
            count += 1;
        }
    }

    (count > 0).then(|| sum.map(|channel| ((channel + count / 2) / count) as u8))
}

/// Alpha channel as a grayscale image
pub fn matte_to_gray(buffer: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(buffer.width(), buffer.height(), |x, y| {
        Luma([buffer.get_pixel(x, y)[3]])
    })
}
