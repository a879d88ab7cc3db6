// convolution.rs — Separable convolution over `Plane`, plus the Gaussian and
// Sobel kernels built on it.
//
// A 2D convolution with a separable kernel K = k_col * k_row^T decomposes
// into two 1D passes, reducing cost from O(k²) to O(2k) per pixel:
//
//   convolve_rows()      horizontal pass
//   convolve_cols()      vertical pass
//   convolve_separable() both
//
// BORDER HANDLING: clamp (replicate edge pixels), matching clamp-to-edge
// texture addressing in the WGSL kernels.
//
// Sobel kernels are separable too:
//   Sobel_x: row [-1, 0, 1], col [1, 2, 1]
//   Sobel_y: row [ 1, 2, 1], col [-1, 0, 1]
// On a [0, 1] input each response lies in [-4, 4]; `sobel_normalized`
// divides by 4 so the components fit the gradient-pair codec's [-1, 1].

use crate::image::Plane;

const SOBEL_DERIV: [f32; 3] = [-1.0, 0.0, 1.0];
const SOBEL_SMOOTH: [f32; 3] = [1.0, 2.0, 1.0];

/// Convolve each row of `src` with a centred odd-length kernel.
///
/// # Panics
/// Panics if the kernel is empty or has even length.
pub fn convolve_rows(src: &Plane, kernel: &[f32]) -> Plane {
    assert!(kernel.len() % 2 == 1, "kernel length must be odd");
    let r = (kernel.len() / 2) as isize;
    let (w, h) = (src.width(), src.height());
    let mut dst = Plane::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &coeff) in kernel.iter().enumerate() {
                acc += coeff * src.get_clamped(x as isize + k as isize - r, y as isize);
            }
            dst.set(x, y, acc);
        }
    }
    dst
}

/// Convolve each column of `src` with a centred odd-length kernel.
pub fn convolve_cols(src: &Plane, kernel: &[f32]) -> Plane {
    assert!(kernel.len() % 2 == 1, "kernel length must be odd");
    let r = (kernel.len() / 2) as isize;
    let (w, h) = (src.width(), src.height());
    let mut dst = Plane::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &coeff) in kernel.iter().enumerate() {
                acc += coeff * src.get_clamped(x as isize, y as isize + k as isize - r);
            }
            dst.set(x, y, acc);
        }
    }
    dst
}

/// Full separable 2D convolution: horizontal pass then vertical pass.
pub fn convolve_separable(src: &Plane, kernel_row: &[f32], kernel_col: &[f32]) -> Plane {
    convolve_cols(&convolve_rows(src, kernel_row), kernel_col)
}

/// 1D Gaussian of length `2 * half_size + 1`, normalized to sum to 1.
pub fn gaussian_kernel_1d(half_size: usize, sigma: f32) -> Vec<f32> {
    assert!(sigma > 0.0, "sigma must be positive");
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..2 * half_size + 1)
        .map(|i| {
            let x = i as f32 - half_size as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Gaussian blur with a ±3σ support.
pub fn gaussian_blur(src: &Plane, sigma: f32) -> Plane {
    let k = gaussian_kernel_1d((3.0 * sigma).ceil().max(1.0) as usize, sigma);
    convolve_separable(src, &k, &k)
}

/// Sobel gradients scaled to [-1, 1] for a [0, 1] input.
/// Positive gx: brighter to the right. Positive gy: brighter downward.
pub fn sobel_normalized(src: &Plane) -> (Plane, Plane) {
    let gx = convolve_separable(src, &SOBEL_DERIV, &SOBEL_SMOOTH);
    let gy = convolve_separable(src, &SOBEL_SMOOTH, &SOBEL_DERIV);
    let scale = |p: Plane| {
        let data = p.as_slice().iter().map(|v| v * 0.25).collect();
        Plane::from_vec(p.width(), p.height(), data)
    };
    (scale(gx), scale(gy))
}
