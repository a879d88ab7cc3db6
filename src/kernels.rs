// kernels.rs — CPU reference implementations of every `Kernel`.
//
// Each function assumes `backend::prepare` has already validated the inputs
// and shaped the output; they only compute. The WGSL shaders under
// src/shaders/ implement the same arithmetic and the same byte packing, so
// these functions double as the reference the GPU results are checked
// against.
//
// Coordinates inside a kernel are storage coordinates: x right, y DOWN.
// The only place the bottom-up readback convention leaks in is the
// continuity direction byte, which is written for readback space so the
// host-side tracer can follow it directly (see `continuity`).

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI, SQRT_2};

use crate::backend::DogEncoding;
use crate::codec::{
    self, decode_gradient, direction_index, encode_direction, encode_gradient, Gradient,
    OFFSETS,
};
use crate::convolution::{gaussian_blur, sobel_normalized};
use crate::geometry::Point;
use crate::image::{ImageBuffer, Plane};

/// Gradients shorter than this carry no direction.
pub const MIN_GRADIENT: f32 = 1e-3;

const LUMA_R: f32 = 0.2126;
const LUMA_G: f32 = 0.7152;
const LUMA_B: f32 = 0.0722;

#[inline]
fn unit_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn write_plane(plane: &Plane, output: &mut ImageBuffer) {
    for (dst, &v) in output.as_mut_slice().iter_mut().zip(plane.as_slice()) {
        *dst = unit_byte(v);
    }
}

// ---------------------------------------------------------------------------
// Colour / geometry
// ---------------------------------------------------------------------------

/// Rec.709 luma of an RGBA frame.
pub fn luma(input: &ImageBuffer, output: &mut ImageBuffer) {
    for (dst, px) in output.as_mut_slice().iter_mut().zip(input.as_slice().chunks_exact(4)) {
        let y = LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32;
        *dst = y.round().clamp(0.0, 255.0) as u8;
    }
}

pub fn orientation(input: &ImageBuffer, output: &mut ImageBuffer, flip_x: bool, flip_y: bool) {
    let (w, h) = input.dimensions();
    let src = input.as_slice();
    let dst = output.as_mut_slice();
    for y in 0..h {
        let sy = if flip_y { h - 1 - y } else { y };
        for x in 0..w {
            let sx = if flip_x { w - 1 - x } else { x };
            dst[(y * w + x) as usize] = src[(sy * w + sx) as usize];
        }
    }
}

/// Per-byte median of five equally shaped buffers.
pub fn temporal_median(inputs: &[&ImageBuffer], output: &mut ImageBuffer) {
    let dst = output.as_mut_slice();
    for (i, out) in dst.iter_mut().enumerate() {
        let mut v = [0u8; 5];
        for (slot, input) in v.iter_mut().zip(inputs) {
            *slot = input.as_slice()[i];
        }
        v.sort_unstable();
        *out = v[2];
    }
}

/// Edge-preserving smoothing: spatial Gaussian × range Gaussian weights on
/// [0, 1] intensities, clamp-to-edge borders.
pub fn bilateral(
    input: &ImageBuffer,
    output: &mut ImageBuffer,
    radius: u32,
    sigma_spatial: f32,
    sigma_range: f32,
) {
    let src = Plane::from_channel(input, 0);
    let r = radius as isize;
    let two_ss = 2.0 * sigma_spatial.max(1e-3).powi(2);
    let two_sr = 2.0 * sigma_range.max(1e-3).powi(2);
    let (w, h) = (src.width(), src.height());
    let mut out = Plane::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let centre = src.get(x, y);
            let (mut sum, mut wsum) = (0.0f32, 0.0f32);
            for dy in -r..=r {
                for dx in -r..=r {
                    let q = src.get_clamped(x as isize + dx, y as isize + dy);
                    let d2 = (dx * dx + dy * dy) as f32;
                    let wgt = (-d2 / two_ss).exp() * (-(q - centre).powi(2) / two_sr).exp();
                    sum += wgt * q;
                    wsum += wgt;
                }
            }
            out.set(x, y, sum / wsum);
        }
    }
    write_plane(&out, output);
}

/// Box-average resample to the output size.
pub fn downscale(input: &ImageBuffer, output: &mut ImageBuffer) {
    let (iw, ih) = (input.width() as usize, input.height() as usize);
    let (ow, oh) = (output.width() as usize, output.height() as usize);
    let n = input.channels();
    let src = input.as_slice();
    let dst = output.as_mut_slice();
    for y in 0..oh {
        let y0 = y * ih / oh;
        let y1 = ((y + 1) * ih).div_ceil(oh).clamp(y0 + 1, ih);
        for x in 0..ow {
            let x0 = x * iw / ow;
            let x1 = ((x + 1) * iw).div_ceil(ow).clamp(x0 + 1, iw);
            let count = ((y1 - y0) * (x1 - x0)) as u32;
            for c in 0..n {
                let mut acc = 0u32;
                for sy in y0..y1 {
                    for sx in x0..x1 {
                        acc += src[(sy * iw + sx) * n + c] as u32;
                    }
                }
                dst[(y * ow + x) * n + c] = ((acc + count / 2) / count) as u8;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// RGBA texel of pixel `i`: single-channel values are spread to grey.
#[inline]
fn rgba_at(input: &ImageBuffer, i: usize) -> [u8; 4] {
    let src = input.as_slice();
    if input.channels() == 1 {
        let v = src[i];
        [v, v, v, 255]
    } else {
        [src[4 * i], src[4 * i + 1], src[4 * i + 2], src[4 * i + 3]]
    }
}

#[inline]
fn below(v: u8, level: f32) -> bool {
    (v as f32 / 255.0) < level
}

/// Zero every colour channel whose [0, 1] value is below `cutoff`. Alpha is
/// kept; the output is always RGBA.
pub fn low_cutoff(input: &ImageBuffer, output: &mut ImageBuffer, cutoff: f32) {
    let n = (input.width() * input.height()) as usize;
    for i in 0..n {
        let mut px = rgba_at(input, i);
        for c in &mut px[..3] {
            if below(*c, cutoff) {
                *c = 0;
            }
        }
        output.as_mut_slice()[4 * i..4 * i + 4].copy_from_slice(&px);
    }
}

/// Pass pixels whose magnitude (the value, or the brightest colour channel
/// of an RGBA pixel) reaches `threshold`; blank the colour of the rest.
pub fn magnitude_gate(input: &ImageBuffer, output: &mut ImageBuffer, threshold: f32) {
    let n = (input.width() * input.height()) as usize;
    for i in 0..n {
        let mut px = rgba_at(input, i);
        let magnitude = px[0].max(px[1]).max(px[2]);
        if below(magnitude, threshold) {
            px[..3].fill(0);
        }
        output.as_mut_slice()[4 * i..4 * i + 4].copy_from_slice(&px);
    }
}

// ---------------------------------------------------------------------------
// Gradient family
// ---------------------------------------------------------------------------

/// Sobel gradients of a luma buffer, packed as gradient pairs.
pub fn sobel_gradients(input: &ImageBuffer, output: &mut ImageBuffer) {
    let (gx, gy) = sobel_normalized(&Plane::from_channel(input, 0));
    let dst = output.as_mut_slice();
    for (i, (&x, &y)) in gx.as_slice().iter().zip(gy.as_slice()).enumerate() {
        dst[4 * i..4 * i + 4].copy_from_slice(&encode_gradient(Gradient { gx: x, gy: y }));
    }
}

fn decode_gradients(input: &ImageBuffer) -> Vec<Gradient> {
    input
        .as_slice()
        .chunks_exact(4)
        .map(|b| decode_gradient([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Edge continuation links.
///
/// For every pixel the edge tangent is the gradient rotated by +90°,
/// `t = (−gy, gx) / |g|`. The neighbour whose unit offset best aligns with
/// `t` is the continuation; confidence is the cosine between the two
/// pixels' gradients, floored at zero. Pixels with no usable gradient, or
/// whose continuation would leave the image, get no direction.
///
/// The direction byte indexes `OFFSETS` in READBACK space (y up), so the
/// storage offset (dx, dy) is written as (dx, −dy).
pub fn continuity(input: &ImageBuffer, output: &mut ImageBuffer) {
    let (w, h) = (input.width() as i32, input.height() as i32);
    let grads = decode_gradients(input);
    let dst = output.as_mut_slice();
    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) as usize;
            let g = grads[i];
            let m = g.gx.hypot(g.gy);
            let mut bytes = encode_direction(None, 0.0);
            if m >= MIN_GRADIENT {
                let (tx, ty) = (-g.gy / m, g.gx / m);
                let (mut best, mut best_dot) = ((0, 0), f32::NEG_INFINITY);
                for &(dx, dy) in OFFSETS.iter() {
                    let len = ((dx * dx + dy * dy) as f32).sqrt();
                    let dot = (dx as f32 * tx + dy as f32 * ty) / len;
                    if dot > best_dot {
                        best_dot = dot;
                        best = (dx, dy);
                    }
                }
                let (nx, ny) = (x + best.0, y + best.1);
                if nx >= 0 && ny >= 0 && nx < w && ny < h {
                    let n = grads[(ny * w + nx) as usize];
                    let mn = n.gx.hypot(n.gy);
                    let confidence = if mn >= MIN_GRADIENT {
                        ((g.gx * n.gx + g.gy * n.gy) / (m * mn)).max(0.0)
                    } else {
                        0.0
                    };
                    bytes = encode_direction(direction_index(best.0, -best.1), confidence);
                }
            }
            dst[4 * i..4 * i + 4].copy_from_slice(&bytes);
        }
    }
}

/// True when `theta` (folded into [0, π)) lies within `band` of a diagonal.
#[inline]
pub fn is_diagonal(theta: f32, band: f32) -> bool {
    (theta.rem_euclid(FRAC_PI_2) - FRAC_PI_4).abs() < band
}

/// Components within one UNORM16 step of zero become exactly zero, so an
/// axis-aligned gradient folds to θ = 0 instead of θ ≈ π.
#[inline]
fn snap_quantized(g: Gradient) -> Gradient {
    let step = 2.0 / codec::UNORM16_MAX;
    let snap = |v: f32| if v.abs() <= step { 0.0 } else { v };
    Gradient { gx: snap(g.gx), gy: snap(g.gy) }
}

/// Per-pixel Hough votes: byte 0 = θ/π, byte 1 = (ρ + √2)/(2√2),
/// byte 2 = magnitude, byte 3 = flags (bit 0 = accepted).
///
/// θ is the gradient angle folded into [0, π); ρ is the signed distance of
/// the line through the pixel centre, in line space ([-1, 1]², y down).
pub fn hough_samples(input: &ImageBuffer, output: &mut ImageBuffer, diagonal_band: f32, min_magnitude: f32) {
    let (w, h) = (input.width() as usize, input.height() as usize);
    let grads = decode_gradients(input);
    let dst = output.as_mut_slice();
    for y in 0..h {
        let yn = (y as f32 + 0.5) / h as f32 * 2.0 - 1.0;
        for x in 0..w {
            let xn = (x as f32 + 0.5) / w as f32 * 2.0 - 1.0;
            let i = y * w + x;
            let g = snap_quantized(grads[i]);
            let m = g.magnitude();
            let mut theta = if m >= MIN_GRADIENT { g.gy.atan2(g.gx) } else { 0.0 };
            if theta < 0.0 {
                theta += PI;
            }
            if theta >= PI {
                theta -= PI;
            }
            let rho = xn * theta.cos() + yn * theta.sin();
            let rho_n = (rho + SQRT_2) / (2.0 * SQRT_2);
            let accepted = m >= min_magnitude && !is_diagonal(theta, diagonal_band);
            dst[4 * i] = unit_byte(theta / PI);
            dst[4 * i + 1] = unit_byte(rho_n);
            dst[4 * i + 2] = unit_byte(m);
            dst[4 * i + 3] = accepted as u8;
        }
    }
}

/// Band-pass response `blur(σ_small) − blur(σ_large)` of a luma buffer.
pub fn difference_of_gaussians(
    input: &ImageBuffer,
    output: &mut ImageBuffer,
    sigma_small: f32,
    sigma_large: f32,
    encoding: DogEncoding,
) {
    let src = Plane::from_channel(input, 0);
    let a = gaussian_blur(&src, sigma_small.max(1e-3));
    let b = gaussian_blur(&src, sigma_large.max(1e-3));
    let dst = output.as_mut_slice();
    for (i, (&s, &l)) in a.as_slice().iter().zip(b.as_slice()).enumerate() {
        let d = (s - l).clamp(-1.0, 1.0);
        let bytes = match encoding {
            DogEncoding::Float32 => codec::encode_f32(d),
            DogEncoding::Signed32 => codec::encode_signed32(d),
        };
        dst[4 * i..4 * i + 4].copy_from_slice(&bytes);
    }
}

// ---------------------------------------------------------------------------
// Visualisation
// ---------------------------------------------------------------------------

#[inline]
fn segment_distance(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let (abx, aby) = (b.0 - a.0, b.1 - a.1);
    let len2 = abx * abx + aby * aby;
    let t = if len2 > 0.0 {
        (((p.0 - a.0) * abx + (p.1 - a.1) * aby) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (p.0 - a.0 - t * abx).hypot(p.1 - a.1 - t * aby)
}

/// Nearest-neighbour resample of the input to RGBA with the quad's edges
/// drawn on top.
pub fn quad_overlay(
    input: &ImageBuffer,
    output: &mut ImageBuffer,
    corners: Option<&[Point; 4]>,
    thickness: f32,
    color: [u8; 4],
) {
    let (iw, ih) = (input.width() as usize, input.height() as usize);
    let (ow, oh) = (output.width() as usize, output.height() as usize);
    let single = input.channels() == 1;
    let segments: Vec<((f32, f32), (f32, f32))> = corners
        .map(|c| {
            let px = |p: &Point| (p.x * (ow - 1) as f32, p.y * (oh - 1) as f32);
            (0..4).map(|i| (px(&c[i]), px(&c[(i + 1) % 4]))).collect()
        })
        .unwrap_or_default();
    let src = input.as_slice();
    let dst = output.as_mut_slice();
    for y in 0..oh {
        let sy = (y * ih / oh).min(ih - 1);
        for x in 0..ow {
            let sx = (x * iw / ow).min(iw - 1);
            let o = 4 * (y * ow + x);
            let on_edge = segments
                .iter()
                .any(|&(a, b)| segment_distance((x as f32, y as f32), a, b) <= thickness);
            if on_edge {
                dst[o..o + 4].copy_from_slice(&color);
            } else if single {
                let v = src[sy * iw + sx];
                dst[o..o + 4].copy_from_slice(&[v, v, v, 255]);
            } else {
                let s = 4 * (sy * iw + sx);
                dst[o..o + 4].copy_from_slice(&src[s..s + 4]);
            }
        }
    }
}
