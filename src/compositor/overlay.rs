//! Decorative doodles stamped over a finished composite.

use image::{Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::source_over;
use crate::selection::{Point, SelectionPolygon};

/// Opacity of every doodle
const FILL_ALPHA: u8 = 150;

const PALETTE: [[u8; 3]; 6] = [
    [255, 105, 180],
    [255, 215, 0],
    [0, 206, 209],
    [147, 112, 219],
    [255, 127, 80],
    [124, 252, 0],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Star,
    Heart,
    Scribble,
}

impl ShapeKind {
    const ALL: [ShapeKind; 3] = [ShapeKind::Star, ShapeKind::Heart, ShapeKind::Scribble];
}

/// Stamp `count` randomly placed doodles onto `canvas`
pub fn stamp_doodles(canvas: &mut RgbaImage, count: usize, seed: Option<u64>) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let seed = seed.unwrap_or_else(|| rand::rng().random());
    let mut rng = StdRng::seed_from_u64(seed);
    tracing::debug!("Stamping {} doodles (seed {})", count, seed);

    let short_side = width.min(height) as f32;
    for _ in 0..count {
        let kind = ShapeKind::ALL[rng.random_range(0..ShapeKind::ALL.len())];
        let [r, g, b] = PALETTE[rng.random_range(0..PALETTE.len())];
        let color = Rgba([r, g, b, FILL_ALPHA]);
        let center = Point::new(
            rng.random_range(0.0..width as f32),
            rng.random_range(0.0..height as f32),
        );
        let radius = (short_side * rng.random_range(0.02..0.06)).max(3.0);

        match kind {
            ShapeKind::Star => {
                let rotation = rng.random_range(0.0..std::f32::consts::TAU);
                fill_polygon(canvas, &star(center, radius, rotation), color);
            }
            ShapeKind::Heart => fill_polygon(canvas, &heart(center, radius), color),
            ShapeKind::Scribble => {
                let mut points = vec![center];
                for _ in 0..rng.random_range(3..7) {
                    let last = points[points.len() - 1];
                    points.push(Point::new(
                        last.x + rng.random_range(-radius..radius),
                        last.y + rng.random_range(-radius..radius),
                    ));
                }
                stroke_polyline(canvas, &points, (radius / 6.0).max(1.0), color);
            }
        }
    }
}

/// Five-pointed star, inner radius 0.45 of the outer
fn star(center: Point, radius: f32, rotation: f32) -> Vec<Point> {
    (0..10)
        .map(|i| {
            let r = if i % 2 == 0 { radius } else { radius * 0.45 };
            let angle = rotation + i as f32 * std::f32::consts::PI / 5.0;
            Point::new(center.x + r * angle.sin(), center.y - r * angle.cos())
        })
        .collect()
}

/// Classic parametric heart, point down
fn heart(center: Point, radius: f32) -> Vec<Point> {
    let scale = radius / 17.0;
    (0..48)
        .map(|i| {
            let t = i as f32 * std::f32::consts::TAU / 48.0;
            let x = 16.0 * t.sin().powi(3);
            let y = 13.0 * t.cos() - 5.0 * (2.0 * t).cos() - 2.0 * (3.0 * t).cos() - (4.0 * t).cos();
            Point::new(center.x + x * scale, center.y - y * scale)
        })
        .collect()
}

/// Fill a polygon by rasterizing it inside its clipped bounding box
fn fill_polygon(canvas: &mut RgbaImage, vertices: &[Point], color: Rgba<u8>) {
    let Some((x0, y0, x1, y1)) = bounds(canvas, vertices, 0.0) else {
        return;
    };
    let local = SelectionPolygon::closed_from(
        vertices
            .iter()
            .map(|p| Point::new(p.x - x0 as f32, p.y - y0 as f32)),
    );
    let Some(mask) = local.rasterize(x1 - x0, y1 - y0) else {
        return;
    };
    for y in y0..y1 {
        for x in x0..x1 {
            if mask.contains(x - x0, y - y0) {
                let pixel = canvas.get_pixel_mut(x, y);
                *pixel = source_over(*pixel, color);
            }
        }
    }
}

fn stroke_polyline(canvas: &mut RgbaImage, points: &[Point], half_width: f32, color: Rgba<u8>) {
    let Some((x0, y0, x1, y1)) = bounds(canvas, points, half_width + 1.0) else {
        return;
    };
    for y in y0..y1 {
        for x in x0..x1 {
            let p = Point::new(x as f32 + 0.5, y as f32 + 0.5);
            let hit = points
                .windows(2)
                .any(|segment| distance_to_segment(p, segment[0], segment[1]) <= half_width);
            if hit {
                let pixel = canvas.get_pixel_mut(x, y);
                *pixel = source_over(*pixel, color);
            }
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq > 0.0 {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / length_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.x + t * dx - p.x, a.y + t * dy - p.y);
    (cx * cx + cy * cy).sqrt()
}

/// Pixel bounds `[x0, x1) x [y0, y1)` of `points` grown by `pad`, clipped to
/// the canvas. `None` when nothing is visible.
fn bounds(canvas: &RgbaImage, points: &[Point], pad: f32) -> Option<(u32, u32, u32, u32)> {
    let (min_x, min_y, max_x, max_y) = points.iter().fold(
        (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
        |(a, b, c, d), p| (a.min(p.x), b.min(p.y), c.max(p.x), d.max(p.y)),
    );
    let clip = |v: f32, limit: u32| v.max(0.0).min(limit as f32) as u32;
    let x0 = clip((min_x - pad).floor(), canvas.width());
    let y0 = clip((min_y - pad).floor(), canvas.height());
    let x1 = clip((max_x + pad).ceil() + 1.0, canvas.width());
    let y1 = clip((max_y + pad).ceil() + 1.0, canvas.height());
    (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
}
