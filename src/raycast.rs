// raycast.rs — Radial edge sampling and PCA oriented-box fitting.
//
// RAY CASTING
// ───────────
// From the image centre, `ray_count` rays are spread evenly over 2π. Each
// ray starts at the farthest in-bounds point and marches INWARD in fixed
// steps; the first sample whose 3×3 neighbourhood maximum reaches the
// threshold is the ray's hit. Marching inward means the hit is the
// outermost edge along the ray, which is the object boundary when the
// object is roughly centred.
//
//        border ●──────●─────●────▶ centre
//               t_max   ...   hit?
//
// Samples use nearest-pixel lookup. The readback is bottom-up, so the
// sampler flips y (`row = h − 1 − y`) and hits come back in top-down
// normalized coordinates (x / (w − 1), y / (h − 1)).
//
// BOX FIT
// ───────
// Given the hits:
//   1. centroid and 2×2 covariance [Sxx Sxy; Sxy Syy]
//   2. dominant eigenvalue λ = (tr + sqrt(tr² − 4·det)) / 2 and its
//      eigenvector u; v = u rotated by 90°
//   3. project every hit onto u and v, sort each projection list
//   4. drop ⌊n · trim⌋ values from both ends of each list
//   5. the remaining extremes span the box; corners clamped to [0, 1]²
//
// Fewer than 4 hits cannot define a box; the fit then returns a centred
// square of half-size 0.25.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Quad};
use crate::image::ReadbackView;

/// Minimum number of rays cast regardless of settings.
pub const MIN_RAYS: usize = 32;
/// Half-size of the fallback box.
pub const DEFAULT_HALF_SIZE: f32 = 0.25;
/// Largest fraction trimmed from each end of a projection list.
pub const MAX_TRIM: f32 = 0.45;

/// Ray-cast fitter settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RayBoxSettings {
    /// Sample value in [0, 1] that counts as a hit.
    pub threshold: f32,
    /// Rays per frame; values below 32 are raised to 32.
    pub ray_count: usize,
    /// March step in pixels.
    pub step: f32,
    /// Fraction of projections dropped from each end, capped at 0.45.
    pub trim_fraction: f32,
}

impl Default for RayBoxSettings {
    fn default() -> Self {
        RayBoxSettings { threshold: 0.2, ray_count: 64, step: 0.5, trim_fraction: 0.12 }
    }
}

/// Maximum of channel 0 over the 3×3 neighbourhood of the pixel nearest to
/// (x, y), with y in top-down pixel coordinates.
pub fn sample_max_3x3(view: &ReadbackView<'_>, x: f32, y: f32) -> f32 {
    let (w, h) = (view.width as i64, view.height as i64);
    let cx = (x.round() as i64).clamp(0, w - 1);
    let cy = (y.round() as i64).clamp(0, h - 1);
    let mut best = 0.0f32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let sx = (cx + dx).clamp(0, w - 1) as usize;
            let sy = (cy + dy).clamp(0, h - 1);
            let row = (h - 1 - sy) as usize;
            best = best.max(view.value(sx, row));
        }
    }
    best
}

/// Cast rays from the centre and collect one hit per ray that finds an edge.
pub fn cast_rays(view: &ReadbackView<'_>, settings: &RayBoxSettings) -> Vec<Point> {
    if view.width < 2 || view.height < 2 {
        return Vec::new();
    }
    let (w, h) = (view.width as f32, view.height as f32);
    let (cx, cy) = ((w - 1.0) * 0.5, (h - 1.0) * 0.5);
    let rays = settings.ray_count.max(MIN_RAYS);
    let step = settings.step.max(0.05);
    let mut hits = Vec::with_capacity(rays);
    for i in 0..rays {
        let a = i as f32 / rays as f32 * std::f32::consts::TAU;
        let (dy, dx) = a.sin_cos();
        let tx = if dx.abs() > 1e-6 { cx / dx.abs() } else { f32::INFINITY };
        let ty = if dy.abs() > 1e-6 { cy / dy.abs() } else { f32::INFINITY };
        let mut t = tx.min(ty);
        while t >= 0.0 {
            let (x, y) = (cx + dx * t, cy + dy * t);
            if sample_max_3x3(view, x, y) >= settings.threshold {
                hits.push(Point::new(x / (w - 1.0), y / (h - 1.0)));
                break;
            }
            t -= step;
        }
    }
    debug!("ray cast: {} of {} rays hit", hits.len(), rays);
    hits
}

/// Fit an oriented box to `points` (normalized coordinates).
pub fn fit_box(points: &[Point], trim_fraction: f32) -> Quad {
    if points.len() < 4 {
        return Quad::centered_square(0.5, 0.5, DEFAULT_HALF_SIZE);
    }
    let n = points.len() as f64;
    let (mx, my) = points
        .iter()
        .fold((0.0f64, 0.0f64), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
    let (mx, my) = (mx / n, my / n);
    let (mut sxx, mut sxy, mut syy) = (0.0f64, 0.0f64, 0.0f64);
    for p in points {
        let (dx, dy) = (p.x as f64 - mx, p.y as f64 - my);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let (sxx, sxy, syy) = (sxx / n, sxy / n, syy / n);
    let (ux, uy) = dominant_axis(sxx, sxy, syy);
    let (vx, vy) = (-uy, ux);

    let mut pu: Vec<f64> = Vec::with_capacity(points.len());
    let mut pv: Vec<f64> = Vec::with_capacity(points.len());
    for p in points {
        let (dx, dy) = (p.x as f64 - mx, p.y as f64 - my);
        pu.push(dx * ux + dy * uy);
        pv.push(dx * vx + dy * vy);
    }
    pu.sort_by(f64::total_cmp);
    pv.sort_by(f64::total_cmp);
    let trim = (points.len() as f32 * trim_fraction.clamp(0.0, MAX_TRIM)).floor() as usize;
    let last = points.len() - 1 - trim;
    let (u0, u1) = (pu[trim], pu[last]);
    let (v0, v1) = (pv[trim], pv[last]);

    let corner = |a: f64, b: f64| {
        Point::new((mx + ux * a + vx * b) as f32, (my + uy * a + vy * b) as f32).clamp_unit()
    };
    Quad::new([corner(u0, v0), corner(u1, v0), corner(u1, v1), corner(u0, v1)])
}

/// Unit eigenvector of the larger eigenvalue of [[sxx, sxy], [sxy, syy]].
///
/// Both closed-form candidates `(sxy, λ − sxx)` and `(λ − syy, sxy)` are
/// eigenvectors; the longer one is numerically safer. An isotropic matrix
/// has no dominant direction and gets the x axis.
fn dominant_axis(sxx: f64, sxy: f64, syy: f64) -> (f64, f64) {
    let tr = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    let disc = (tr * tr - 4.0 * det).max(0.0).sqrt();
    if disc <= 1e-9 * tr.abs().max(f64::MIN_POSITIVE) {
        return (1.0, 0.0);
    }
    let lambda = (tr + disc) * 0.5;
    let a = (sxy, lambda - sxx);
    let b = (lambda - syy, sxy);
    let (la, lb) = (a.0.hypot(a.1), b.0.hypot(b.1));
    let (v, len) = if la >= lb { (a, la) } else { (b, lb) };
    if len <= f64::EPSILON {
        return (1.0, 0.0);
    }
    (v.0 / len, v.1 / len)
}
