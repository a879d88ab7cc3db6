// hough.rs — (θ, ρ) line voting, peak extraction and box selection.
//
// ACCUMULATOR
// ───────────
// A fixed 64 × 128 grid. θ ∈ [0, π) along one axis, ρ ∈ [-√2, √2] along
// the other, both fed as [0, 1] fractions by the hough-sample kernel:
//
//   θ bin = min(⌊θn · 64⌋, 63)      ρ bin = min(⌊ρn · 128⌋, 127)
//
// Every accepted sample adds its magnitude to the cell's sum and 1 to its
// count. After a frame, both fields are normalized by their own maxima and
// combined into a strength:
//
//   strength = sqrt(magNorm^magnitude_scale · countNorm^length_scale)
//
// so `magnitude_scale` favours high-contrast lines and `length_scale`
// favours long ones.
//
// PEAKS
// ─────
// Cells are claimed strongest first. A claimed cell absorbs every still
// unclaimed neighbour within ±theta_radius (wrapping, since θ = 0 and θ = π
// are the same orientation) and ±rho_radius (clamped). Absorbed cells add
// their strength to the peak and can never become peaks themselves.
//
// BOX SELECTION
// ─────────────
// Two heuristics pick the box sides out of the peak list; callers choose
// one through `BoxStrategy`.

use std::f32::consts::{PI, SQRT_2};

use serde::{Deserialize, Serialize};

use crate::geometry::{Line, Point, Quad};

pub const THETA_BINS: usize = 64;
pub const RHO_BINS: usize = 128;

/// One decoded hough-sample pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughSample {
    /// θ / π in [0, 1].
    pub theta: f32,
    /// (ρ + √2) / (2√2) in [0, 1].
    pub rho: f32,
    pub magnitude: f32,
    /// Flag bit 0: not near-diagonal and above the magnitude floor.
    pub accepted: bool,
}

impl HoughSample {
    #[inline]
    pub fn from_bytes(b: &[u8]) -> Self {
        HoughSample {
            theta: b[0] as f32 / 255.0,
            rho: b[1] as f32 / 255.0,
            magnitude: b[2] as f32 / 255.0,
            accepted: b[3] & 1 == 1,
        }
    }
}

/// The voting grid.
#[derive(Debug, Clone)]
pub struct HoughAccumulator {
    magnitude_sum: Vec<f32>,
    count: Vec<u32>,
    strength: Vec<f32>,
}

impl Default for HoughAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl HoughAccumulator {
    pub fn new() -> Self {
        let n = THETA_BINS * RHO_BINS;
        HoughAccumulator {
            magnitude_sum: vec![0.0; n],
            count: vec![0; n],
            strength: vec![0.0; n],
        }
    }

    #[inline]
    pub fn cell(theta_index: usize, rho_index: usize) -> usize {
        theta_index * RHO_BINS + rho_index
    }

    pub fn clear(&mut self) {
        self.magnitude_sum.fill(0.0);
        self.count.fill(0);
        self.strength.fill(0.0);
    }

    /// Vote for one sample (θ and ρ as [0, 1] fractions).
    pub fn add(&mut self, theta: f32, rho: f32, magnitude: f32) {
        let t = ((theta.max(0.0) * THETA_BINS as f32) as usize).min(THETA_BINS - 1);
        let r = ((rho.max(0.0) * RHO_BINS as f32) as usize).min(RHO_BINS - 1);
        let c = Self::cell(t, r);
        self.magnitude_sum[c] += magnitude;
        self.count[c] += 1;
    }

    /// Clear, then vote for every accepted pixel of a quad-channel sample
    /// readback. Returns the number of accepted samples.
    pub fn accumulate(&mut self, samples: &[u8]) -> usize {
        self.clear();
        let mut accepted = 0;
        for px in samples.chunks_exact(4) {
            let s = HoughSample::from_bytes(px);
            if s.accepted {
                self.add(s.theta, s.rho, s.magnitude);
                accepted += 1;
            }
        }
        accepted
    }

    /// Normalize sums and counts by their maxima and combine them into
    /// per-cell strengths. All-zero grids yield all-zero strengths.
    pub fn compute_strength(&mut self, magnitude_scale: f32, length_scale: f32) -> &[f32] {
        let max_mag = self.magnitude_sum.iter().copied().fold(0.0f32, f32::max);
        let max_count = self.count.iter().copied().max().unwrap_or(0);
        for ((s, &m), &c) in self.strength.iter_mut().zip(&self.magnitude_sum).zip(&self.count) {
            let mag_n = if max_mag > 0.0 { m / max_mag } else { 0.0 };
            let count_n = if max_count > 0 { c as f32 / max_count as f32 } else { 0.0 };
            *s = (mag_n.powf(magnitude_scale) * count_n.powf(length_scale)).sqrt();
        }
        &self.strength
    }

    pub fn strength(&self) -> &[f32] {
        &self.strength
    }

    pub fn count(&self, theta_index: usize, rho_index: usize) -> u32 {
        self.count[Self::cell(theta_index, rho_index)]
    }
}

// ---------------------------------------------------------------------------
// Peaks
// ---------------------------------------------------------------------------

/// A suppressed accumulator maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub theta_index: usize,
    pub rho_index: usize,
    /// Own strength plus every neighbour it absorbed.
    pub strength: f32,
}

impl Peak {
    /// Line through the centre of the peak's cell.
    pub fn line(&self) -> Line {
        Line {
            theta: (self.theta_index as f32 + 0.5) / THETA_BINS as f32 * PI,
            rho: (self.rho_index as f32 + 0.5) / RHO_BINS as f32 * (2.0 * SQRT_2) - SQRT_2,
        }
    }

    /// Normal closer to the x axis (θ near 0 or π) than to the y axis.
    pub fn is_vertical(&self) -> bool {
        let t = self.theta_index as i32;
        let mid = THETA_BINS as i32 / 2;
        t.min(THETA_BINS as i32 - 1 - t) <= (t - mid).abs()
    }
}

/// Non-maximum suppression over a strength grid of `THETA_BINS × RHO_BINS`.
/// Peaks come back strongest first; zero-strength cells never form peaks.
///
/// # Panics
/// Panics if `strength` is not a full grid.
pub fn find_peaks(strength: &[f32], theta_radius: usize, rho_radius: usize) -> Vec<Peak> {
    assert_eq!(strength.len(), THETA_BINS * RHO_BINS, "strength grid size");
    let mut order: Vec<usize> = (0..strength.len()).collect();
    order.sort_by(|&a, &b| strength[b].total_cmp(&strength[a]));

    let mut suppressed = vec![false; strength.len()];
    let mut peaks = Vec::new();
    let tr = theta_radius as isize;
    let rr = rho_radius as isize;
    for idx in order {
        if strength[idx] <= 0.0 {
            break;
        }
        if suppressed[idx] {
            continue;
        }
        suppressed[idx] = true;
        let (ti, ri) = (idx / RHO_BINS, idx % RHO_BINS);
        let mut merged = strength[idx];
        for dt in -tr..=tr {
            let t = (ti as isize + dt).rem_euclid(THETA_BINS as isize) as usize;
            for dr in -rr..=rr {
                let r = ri as isize + dr;
                if r < 0 || r >= RHO_BINS as isize {
                    continue;
                }
                let n = HoughAccumulator::cell(t, r as usize);
                if !suppressed[n] {
                    suppressed[n] = true;
                    merged += strength[n];
                }
            }
        }
        peaks.push(Peak { theta_index: ti, rho_index: ri, strength: merged });
    }
    peaks.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    peaks
}

// ---------------------------------------------------------------------------
// Box selection
// ---------------------------------------------------------------------------

/// How to pick box sides from the peak list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxStrategy {
    /// Strongest peak plus the peak nearest its point reflection.
    MirrorMatch,
    /// Strongest peak in each of left / right / above / below.
    #[default]
    QuadrantMatch,
}

impl BoxStrategy {
    pub fn select(self, peaks: &[Peak]) -> Vec<Peak> {
        match self {
            BoxStrategy::MirrorMatch => mirror_match(peaks),
            BoxStrategy::QuadrantMatch => quadrant_match(peaks),
        }
    }
}

/// Pair the strongest peak with the remaining peak closest (L1, in bins) to
/// its reflection `((RHO − ρ) mod RHO, (THETA − θ) mod THETA)`.
pub fn mirror_match(peaks: &[Peak]) -> Vec<Peak> {
    let Some((first, rest)) = peaks.split_first() else {
        return Vec::new();
    };
    let mirror_rho = (RHO_BINS - first.rho_index) % RHO_BINS;
    let mirror_theta = (THETA_BINS - first.theta_index) % THETA_BINS;
    let best = rest.iter().min_by_key(|p| {
        p.rho_index.abs_diff(mirror_rho) + p.theta_index.abs_diff(mirror_theta)
    });
    match best {
        Some(b) => vec![*first, *b],
        None => vec![*first],
    }
}

/// Quadrant slots, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Above,
    Below,
}

impl Side {
    pub fn of(peak: &Peak) -> Side {
        let low = peak.rho_index < RHO_BINS / 2;
        match (peak.is_vertical(), low) {
            (true, true) => Side::Left,
            (true, false) => Side::Right,
            (false, true) => Side::Above,
            (false, false) => Side::Below,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Strongest peak per quadrant slot (left, right, above, below); empty
/// slots are skipped. Expects `peaks` sorted strongest first.
pub fn quadrant_match(peaks: &[Peak]) -> Vec<Peak> {
    let mut slots: [Option<Peak>; 4] = [None; 4];
    for p in peaks {
        let slot = &mut slots[Side::of(p).slot()];
        if slot.map_or(true, |s| p.strength > s.strength) {
            *slot = Some(*p);
        }
    }
    slots.into_iter().flatten().collect()
}

/// Intersect two vertical and two horizontal lines into a box, ordered
/// clockwise from the top-left corner. `None` unless the selection holds
/// exactly two of each and all four corners exist.
pub fn quad_from_lines(selection: &[Peak]) -> Option<Quad> {
    let (mut vertical, mut horizontal): (Vec<Line>, Vec<Line>) = (Vec::new(), Vec::new());
    for p in selection {
        if p.is_vertical() {
            vertical.push(p.line());
        } else {
            horizontal.push(p.line());
        }
    }
    if vertical.len() != 2 || horizontal.len() != 2 {
        return None;
    }
    vertical.sort_by(|a, b| a.x_intercept().total_cmp(&b.x_intercept()));
    horizontal.sort_by(|a, b| a.y_intercept().total_cmp(&b.y_intercept()));
    let corner = |v: &Line, h: &Line| -> Option<Point> { v.intersect(h) };
    Some(Quad::new([
        corner(&vertical[0], &horizontal[0])?,
        corner(&vertical[1], &horizontal[0])?,
        corner(&vertical[1], &horizontal[1])?,
        corner(&vertical[0], &horizontal[1])?,
    ]))
}
