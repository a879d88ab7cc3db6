// geometry.rs — Points, boundary quads, Hough lines and raster drawing.
//
// Two coordinate spaces appear in this crate:
//
//   normalized   [0, 1] × [0, 1], origin top-left, x = px / (w − 1).
//                Boundary quads and line endpoints live here.
//   line space   [-1, 1] × [-1, 1], origin at the image centre, y down.
//                Hough lines are `x·cosθ + y·sinθ = ρ` in this space.

use serde::{Deserialize, Serialize};

use crate::image::{ChannelLayout, ImageBuffer};

/// A 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }

    #[inline]
    pub fn distance(&self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    #[inline]
    pub fn clamp_unit(self) -> Self {
        Point::new(self.x.clamp(0.0, 1.0), self.y.clamp(0.0, 1.0))
    }
}

/// Four boundary corners in normalized image space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [Point; 4],
}

impl Quad {
    pub const fn new(corners: [Point; 4]) -> Self {
        Quad { corners }
    }

    /// Axis-aligned square centred on (cx, cy).
    pub fn centered_square(cx: f32, cy: f32, half: f32) -> Self {
        Quad::new([
            Point::new(cx - half, cy - half),
            Point::new(cx + half, cy - half),
            Point::new(cx + half, cy + half),
            Point::new(cx - half, cy + half),
        ])
    }

    pub fn centroid(&self) -> Point {
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / 4.0, sy / 4.0)
    }

    /// Corners reordered clockwise (on screen, y down) starting with the
    /// corner closest to the top-left of the image.
    pub fn ordered(&self) -> Self {
        let c = self.centroid();
        let mut pts = self.corners;
        pts.sort_by(|a, b| {
            let ta = (a.y - c.y).atan2(a.x - c.x);
            let tb = (b.y - c.y).atan2(b.x - c.x);
            ta.total_cmp(&tb)
        });
        let start = (0..4)
            .min_by(|&i, &j| (pts[i].x + pts[i].y).total_cmp(&(pts[j].x + pts[j].y)))
            .unwrap_or(0);
        pts.rotate_left(start);
        Quad::new(pts)
    }

    /// The four edges as (start, end) pairs.
    pub fn edges(&self) -> [(Point, Point); 4] {
        let c = &self.corners;
        [(c[0], c[1]), (c[1], c[2]), (c[2], c[3]), (c[3], c[0])]
    }
}

// ---------------------------------------------------------------------------
// Lines
// ---------------------------------------------------------------------------

/// A line `x·cosθ + y·sinθ = ρ` in line space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub theta: f32,
    pub rho: f32,
}

impl Line {
    /// Intersect with the line-space square and return the two endpoints in
    /// normalized image space, or `None` if the line misses the square.
    pub fn endpoints(&self) -> Option<(Point, Point)> {
        const EPS: f32 = 1e-6;
        let (s, c) = self.theta.sin_cos();
        let mut hits: Vec<Point> = Vec::with_capacity(4);
        let mut push = |p: Point| {
            let inside = p.x.abs() <= 1.0 + EPS && p.y.abs() <= 1.0 + EPS;
            if inside && hits.iter().all(|q| q.distance(p) > EPS) {
                hits.push(p);
            }
        };
        if s.abs() > EPS {
            for x in [-1.0f32, 1.0] {
                push(Point::new(x, (self.rho - c * x) / s));
            }
        }
        if c.abs() > EPS {
            for y in [-1.0f32, 1.0] {
                push(Point::new((self.rho - s * y) / c, y));
            }
        }
        if hits.len() < 2 {
            return None;
        }
        Some((to_normalized(hits[0]), to_normalized(hits[1])))
    }

    /// Intersection point in normalized image space, `None` for (near-)
    /// parallel lines.
    pub fn intersect(&self, other: &Line) -> Option<Point> {
        let (s1, c1) = self.theta.sin_cos();
        let (s2, c2) = other.theta.sin_cos();
        let det = c1 * s2 - s1 * c2;
        if det.abs() < 1e-4 {
            return None;
        }
        let x = (self.rho * s2 - other.rho * s1) / det;
        let y = (c1 * other.rho - c2 * self.rho) / det;
        Some(to_normalized(Point::new(x, y)))
    }

    /// x where the line crosses y = 0 (vertical-ish lines).
    pub fn x_intercept(&self) -> f32 {
        let c = self.theta.cos();
        if c.abs() < 1e-6 {
            f32::INFINITY
        } else {
            self.rho / c
        }
    }

    /// y where the line crosses x = 0 (horizontal-ish lines).
    pub fn y_intercept(&self) -> f32 {
        let s = self.theta.sin();
        if s.abs() < 1e-6 {
            f32::INFINITY
        } else {
            self.rho / s
        }
    }
}

#[inline]
fn to_normalized(p: Point) -> Point {
    Point::new((p.x + 1.0) * 0.5, (p.y + 1.0) * 0.5)
}

// ---------------------------------------------------------------------------
// Drawing
// ---------------------------------------------------------------------------

/// Rasterize a segment into a quad-channel buffer with Bresenham's
/// algorithm. Pixels outside the buffer are skipped.
pub fn draw_line(buf: &mut ImageBuffer, from: (i32, i32), to: (i32, i32), color: [u8; 4]) {
    debug_assert_eq!(buf.layout(), ChannelLayout::Quad);
    let (w, h) = (buf.width() as i32, buf.height() as i32);
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x >= 0 && y >= 0 && x < w && y < h {
            buf.set_pixel(x as u32, y as u32, &color);
        }
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Normalized point → pixel coordinates of a `width × height` buffer.
#[inline]
pub fn to_pixel(p: Point, width: u32, height: u32) -> (i32, i32) {
    let fx = p.x * (width.max(1) - 1) as f32;
    let fy = p.y * (height.max(1) - 1) as f32;
    (fx.round() as i32, fy.round() as i32)
}

/// HSV (all in [0, 1]) to opaque RGBA.
pub fn hsv_to_rgba(h: f32, s: f32, v: f32) -> [u8; 4] {
    let h6 = (h.rem_euclid(1.0)) * 6.0;
    let i = h6.floor() as i32;
    let f = h6 - i as f32;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match i.rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    [byte(r), byte(g), byte(b), 255]
}
