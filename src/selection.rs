//! User-drawn selection polygons and their rasterization into inclusion masks.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Ordered polygon in source-image pixel coordinates.
///
/// Open while being drawn, closed once applied. An empty polygon means
/// "no restriction".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionPolygon {
    points: Vec<Point>,
    closed: bool,
}

impl SelectionPolygon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closed polygon from a finished point list
    pub fn closed_from<I: IntoIterator<Item = Point>>(points: I) -> Self {
        Self {
            points: points.into_iter().collect(),
            closed: true,
        }
    }

    /// Append a vertex. Drawing on a closed polygon starts a new one.
    pub fn push(&mut self, point: Point) {
        if self.closed {
            self.points.clear();
            self.closed = false;
        }
        self.points.push(point);
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Same polygon with coordinates multiplied by (`sx`, `sy`)
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| Point::new(p.x * sx, p.y * sy))
                .collect(),
            closed: self.closed,
        }
    }

    /// Rasterize into a `width` x `height` inclusion mask.
    ///
    /// Returns `None` for an empty polygon. Uses an even-odd scanline fill
    /// sampled at pixel centres; fewer than three vertices enclose nothing.
    pub fn rasterize(&self, width: u32, height: u32) -> Option<SelectionMask> {
        if self.points.is_empty() {
            return None;
        }

        let mut mask = SelectionMask::empty(width, height);
        let n = self.points.len();
        if n < 3 {
            return Some(mask);
        }

        let mut nodes: Vec<f32> = Vec::with_capacity(n);
        for y in 0..height {
            let yf = y as f32 + 0.5;
            nodes.clear();
            // Walk edges including the closing edge n-1 -> 0
            for i in 0..n {
                let a = self.points[i];
                let b = self.points[(i + 1) % n];
                if (a.y < yf && b.y >= yf) || (b.y < yf && a.y >= yf) {
                    let t = (yf - a.y) / (b.y - a.y);
                    nodes.push(a.x + t * (b.x - a.x));
                }
            }
            nodes.sort_by(|a, b| a.total_cmp(b));

            for span in nodes.chunks_exact(2) {
                // Pixel x is inside when its centre x + 0.5 lies in [start, end)
                let start = ((span[0] - 0.5).ceil().max(0.0) as u32).min(width);
                let end = ((span[1] - 0.5).ceil().max(0.0) as u32).min(width);
                let row = (y * width) as usize;
                mask.inside[row + start as usize..row + end.max(start) as usize].fill(true);
            }
        }

        Some(mask)
    }
}

impl FromStr for SelectionPolygon {
    type Err = String;

    /// Parse `x,y;x,y;...` into a closed polygon
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let points = s
            .split(';')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| -> Result<Point, String> {
                let (x, y) = pair
                    .split_once(',')
                    .ok_or_else(|| format!("expected x,y but got '{pair}'"))?;
                let parse = |v: &str| {
                    v.trim()
                        .parse::<f32>()
                        .map_err(|e| format!("bad coordinate '{v}': {e}"))
                };
                Ok(Point::new(parse(x)?, parse(y)?))
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self::closed_from(points))
    }
}

/// Binary inclusion mask, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionMask {
    width: u32,
    height: u32,
    inside: Vec<bool>,
}

impl SelectionMask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            inside: vec![false; width as usize * height as usize],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.inside[(y * self.width + x) as usize]
    }

    pub(crate) fn contains_index(&self, index: usize) -> bool {
        self.inside.get(index).copied().unwrap_or(false)
    }

    pub fn count_inside(&self) -> usize {
        self.inside.iter().filter(|&&v| v).count()
    }
}
