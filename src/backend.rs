// backend.rs — The closed set of numeric kernels and the trait that runs them.
//
// Passes never touch pixels directly. They describe the work as a `Kernel`
// value and hand it to a `KernelBackend` together with the input buffers
// they borrow and the output buffer they own:
//
//   pass ──Kernel + &[&ImageBuffer] + &mut ImageBuffer──▶ backend
//
// Two backends implement the trait:
//   CpuBackend        — authoritative reference, calls `kernels::*`.
//   gpu::GpuBackend   — wgpu compute shaders, validated against the CPU
//                       backend pixel-for-pixel in the GPU tests.
//
// Both share `prepare`, which checks input layouts and shapes the output,
// so a misconfigured chain fails the same way on either backend.
//
// Outputs may stay on the device between passes. Only the stages that
// consume pixels on the host (structure tracing, Hough voting, ray casting,
// the final surface) pull them back, through `sync` or `read_back`.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::geometry::Point;
use crate::image::{ChannelLayout, ImageBuffer};
use crate::kernels;

/// How a Difference-of-Gaussians value is packed into its output pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DogEncoding {
    /// IEEE-754 float32 bit pattern (`codec::decode_f32`).
    #[default]
    Float32,
    /// Offset signed 32-bit integer (`codec::decode_signed32`).
    Signed32,
}

/// A numeric kernel with its parameters.
///
/// Input and output contracts:
///
/// | kernel                | inputs                        | output                |
/// |-----------------------|-------------------------------|-----------------------|
/// | Luma                  | quad RGBA                     | single, Rec.709 luma  |
/// | Orientation           | single                        | single, flipped       |
/// | TemporalMedian        | current + 4 history, any      | same layout, median   |
/// | Bilateral             | single                        | single                |
/// | Downscale             | any                           | same layout, averaged |
/// | SobelGradients        | single                        | quad, gradient pair   |
/// | Continuity            | quad gradient pair            | quad, dir+confidence  |
/// | HoughSamples          | quad gradient pair            | quad, θ/ρ/mag/flags   |
/// | DifferenceOfGaussians | single                        | quad, encoded DoG     |
/// | LowCutoff             | any                           | quad RGBA, dim zeroed |
/// | MagnitudeGate         | any                           | quad RGBA, gated      |
/// | QuadOverlay           | any                           | quad RGBA             |
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    Luma,
    Orientation { flip_x: bool, flip_y: bool },
    TemporalMedian,
    Bilateral { radius: u32, sigma_spatial: f32, sigma_range: f32 },
    Downscale,
    SobelGradients,
    Continuity,
    /// Gradients whose angle lies within `diagonal_band` radians of 45° to
    /// an axis, or whose magnitude is below `min_magnitude`, get flag bit 0
    /// cleared.
    HoughSamples { diagonal_band: f32, min_magnitude: f32 },
    DifferenceOfGaussians { sigma_small: f32, sigma_large: f32, encoding: DogEncoding },
    /// Colour channels below `cutoff` (on [0, 1]) become 0.
    LowCutoff { cutoff: f32 },
    /// Pixels whose brightest colour channel is below `threshold` lose
    /// their colour.
    MagnitudeGate { threshold: f32 },
    /// Grayscale/RGBA copy of the input resampled to the output size, with
    /// the quad's edges drawn `thickness` pixels wide in `color`.
    QuadOverlay { corners: Option<[Point; 4]>, thickness: f32, color: [u8; 4] },
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Luma => "luma",
            Kernel::Orientation { .. } => "orientation",
            Kernel::TemporalMedian => "temporal_median",
            Kernel::Bilateral { .. } => "bilateral",
            Kernel::Downscale => "downscale",
            Kernel::SobelGradients => "sobel_gradients",
            Kernel::Continuity => "continuity",
            Kernel::HoughSamples { .. } => "hough_samples",
            Kernel::DifferenceOfGaussians { .. } => "difference_of_gaussians",
            Kernel::LowCutoff { .. } => "low_cutoff",
            Kernel::MagnitudeGate { .. } => "magnitude_gate",
            Kernel::QuadOverlay { .. } => "quad_overlay",
        }
    }

    /// Number of input buffers the kernel binds.
    pub fn input_count(&self) -> usize {
        match self {
            Kernel::TemporalMedian => 5,
            _ => 1,
        }
    }

    /// Required layout of every input, `None` if any layout works.
    pub fn input_layout(&self) -> Option<ChannelLayout> {
        match self {
            Kernel::Luma | Kernel::Continuity | Kernel::HoughSamples { .. } => {
                Some(ChannelLayout::Quad)
            }
            Kernel::Orientation { .. }
            | Kernel::Bilateral { .. }
            | Kernel::SobelGradients
            | Kernel::DifferenceOfGaussians { .. } => Some(ChannelLayout::Single),
            Kernel::TemporalMedian
            | Kernel::Downscale
            | Kernel::QuadOverlay { .. }
            | Kernel::LowCutoff { .. }
            | Kernel::MagnitudeGate { .. } => None,
        }
    }

    /// Output layout for an input of layout `input`.
    pub fn output_layout(&self, input: ChannelLayout) -> ChannelLayout {
        match self {
            Kernel::Luma | Kernel::Orientation { .. } | Kernel::Bilateral { .. } => {
                ChannelLayout::Single
            }
            Kernel::TemporalMedian | Kernel::Downscale => input,
            Kernel::SobelGradients
            | Kernel::Continuity
            | Kernel::HoughSamples { .. }
            | Kernel::DifferenceOfGaussians { .. }
            | Kernel::QuadOverlay { .. }
            | Kernel::LowCutoff { .. }
            | Kernel::MagnitudeGate { .. } => ChannelLayout::Quad,
        }
    }

    /// Whether the output size is chosen by the caller rather than copied
    /// from the input.
    pub fn resamples(&self) -> bool {
        matches!(self, Kernel::Downscale | Kernel::QuadOverlay { .. })
    }
}

/// Check `inputs` against the kernel's contract and shape `output`.
///
/// Same-size kernels get an output matching the first input. Resampling
/// kernels keep the caller's output size (falling back to the input size
/// for an empty output) and only have their layout set.
///
/// # Panics
/// Panics if the number of inputs differs from `kernel.input_count()`.
pub fn prepare(
    kernel: &Kernel,
    inputs: &[&ImageBuffer],
    output: &mut ImageBuffer,
) -> Result<(), PipelineError> {
    assert_eq!(
        inputs.len(),
        kernel.input_count(),
        "{} binds {} inputs",
        kernel.name(),
        kernel.input_count()
    );
    let first = inputs[0];
    let expected = kernel.input_layout().unwrap_or(first.layout());
    for input in inputs {
        if input.layout() != expected {
            return Err(PipelineError::UnsupportedBufferFormat {
                stage: kernel.name(),
                expected,
                found: input.layout(),
            });
        }
        assert_eq!(
            input.dimensions(),
            first.dimensions(),
            "{} inputs must share dimensions",
            kernel.name()
        );
    }
    let layout = kernel.output_layout(first.layout());
    let (w, h) = if kernel.resamples() && !output.is_empty() {
        output.dimensions()
    } else {
        first.dimensions()
    };
    output.reshape(w, h, layout);
    Ok(())
}

/// Executes kernels. Implementations must leave every input untouched and
/// fully overwrite the output.
///
/// A backend may leave `run`'s output only in device memory (see
/// `ImageBuffer::host_is_stale`). Host code that reads pixels calls `sync`
/// or `read_back` first; the defaults suit backends that compute on the
/// host and never leave a buffer stale.
pub trait KernelBackend {
    fn name(&self) -> &'static str;

    fn run(
        &mut self,
        kernel: &Kernel,
        inputs: &[&ImageBuffer],
        output: &mut ImageBuffer,
    ) -> Result<(), PipelineError>;

    /// Make `dst` a copy of `src` without a host round trip.
    fn copy(&mut self, src: &ImageBuffer, dst: &mut ImageBuffer) -> Result<(), PipelineError> {
        dst.copy_from(src);
        Ok(())
    }

    /// Bring the host bytes of every buffer in `bufs` up to date in place,
    /// waiting on the device at most once.
    fn sync(&mut self, _bufs: &mut [&mut ImageBuffer]) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Copy each `sources[i]` into the host bytes of `targets[i]`, waiting
    /// on the device at most once for the whole batch.
    ///
    /// # Panics
    /// Panics if the slices differ in length.
    fn read_back(
        &mut self,
        sources: &[&ImageBuffer],
        targets: &mut [&mut ImageBuffer],
    ) -> Result<(), PipelineError> {
        assert_eq!(sources.len(), targets.len(), "read_back needs one target per source");
        for (src, dst) in sources.iter().zip(targets.iter_mut()) {
            dst.copy_from(src);
        }
        Ok(())
    }
}

/// Reference implementation on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl KernelBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn run(
        &mut self,
        kernel: &Kernel,
        inputs: &[&ImageBuffer],
        output: &mut ImageBuffer,
    ) -> Result<(), PipelineError> {
        prepare(kernel, inputs, output)?;
        let input = inputs[0];
        if output.is_empty() || input.is_empty() {
            return Ok(());
        }
        match kernel {
            Kernel::Luma => kernels::luma(input, output),
            Kernel::Orientation { flip_x, flip_y } => {
                kernels::orientation(input, output, *flip_x, *flip_y)
            }
            Kernel::TemporalMedian => kernels::temporal_median(inputs, output),
            Kernel::Bilateral { radius, sigma_spatial, sigma_range } => {
                kernels::bilateral(input, output, *radius, *sigma_spatial, *sigma_range)
            }
            Kernel::Downscale => kernels::downscale(input, output),
            Kernel::SobelGradients => kernels::sobel_gradients(input, output),
            Kernel::Continuity => kernels::continuity(input, output),
            Kernel::HoughSamples { diagonal_band, min_magnitude } => {
                kernels::hough_samples(input, output, *diagonal_band, *min_magnitude)
            }
            Kernel::DifferenceOfGaussians { sigma_small, sigma_large, encoding } => {
                kernels::difference_of_gaussians(input, output, *sigma_small, *sigma_large, *encoding)
            }
            Kernel::QuadOverlay { corners, thickness, color } => {
                kernels::quad_overlay(input, output, corners.as_ref(), *thickness, *color)
            }
            Kernel::LowCutoff { cutoff } => kernels::low_cutoff(input, output, *cutoff),
            Kernel::MagnitudeGate { threshold } => {
                kernels::magnitude_gate(input, output, *threshold)
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_rejects_single_input() {
        let input = ImageBuffer::new(4, 4, ChannelLayout::Single);
        let mut out = ImageBuffer::new(0, 0, ChannelLayout::Single);
        let err = CpuBackend.run(&Kernel::Luma, &[&input], &mut out).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnsupportedBufferFormat {
                stage: "luma",
                expected: ChannelLayout::Quad,
                found: ChannelLayout::Single,
            }
        ));
    }

    #[test]
    fn test_prepare_shapes_output() {
        let input = ImageBuffer::new(6, 3, ChannelLayout::Single);
        let mut out = ImageBuffer::new(1, 1, ChannelLayout::Single);
        prepare(&Kernel::SobelGradients, &[&input], &mut out).unwrap();
        assert_eq!(out.dimensions(), (6, 3));
        assert_eq!(out.layout(), ChannelLayout::Quad);
    }

    #[test]
    fn test_prepare_keeps_resampled_size() {
        let input = ImageBuffer::new(8, 8, ChannelLayout::Quad);
        let mut out = ImageBuffer::new(4, 4, ChannelLayout::Quad);
        prepare(&Kernel::Downscale, &[&input], &mut out).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
    }

    #[test]
    fn test_temporal_median_needs_matching_layouts() {
        let quad = ImageBuffer::new(2, 2, ChannelLayout::Quad);
        let single = ImageBuffer::new(2, 2, ChannelLayout::Single);
        let mut out = ImageBuffer::new(0, 0, ChannelLayout::Quad);
        let res = CpuBackend.run(
            &Kernel::TemporalMedian,
            &[&quad, &quad, &single, &quad, &quad],
            &mut out,
        );
        assert!(matches!(res, Err(PipelineError::UnsupportedBufferFormat { .. })));
    }

    #[test]
    fn test_cpu_read_back_copies_every_pair() {
        let a = ImageBuffer::from_bytes(2, 1, ChannelLayout::Single, vec![1, 2]);
        let b = ImageBuffer::from_bytes(1, 1, ChannelLayout::Quad, vec![3, 4, 5, 6]);
        let mut ta = ImageBuffer::new(0, 0, ChannelLayout::Quad);
        let mut tb = ImageBuffer::new(0, 0, ChannelLayout::Single);
        CpuBackend.read_back(&[&a, &b], &mut [&mut ta, &mut tb]).unwrap();
        assert_eq!((ta.layout(), ta.as_slice()), (ChannelLayout::Single, &[1u8, 2][..]));
        assert_eq!((tb.layout(), tb.as_slice()), (ChannelLayout::Quad, &[3u8, 4, 5, 6][..]));
    }

    #[test]
    fn test_cpu_run_never_leaves_output_stale() {
        let input = ImageBuffer::new(3, 3, ChannelLayout::Single);
        let mut out = ImageBuffer::new(0, 0, ChannelLayout::Quad);
        CpuBackend.run(&Kernel::SobelGradients, &[&input], &mut out).unwrap();
        assert!(!out.host_is_stale());
        CpuBackend.sync(&mut [&mut out]).unwrap();
        assert!(!out.host_is_stale());
    }

    #[test]
    fn test_input_is_not_mutated() {
        let data: Vec<u8> = (0..64).map(|v| (v * 3) as u8).collect();
        let input = ImageBuffer::from_bytes(4, 4, ChannelLayout::Quad, data.clone());
        let mut out = ImageBuffer::new(0, 0, ChannelLayout::Single);
        CpuBackend.run(&Kernel::Luma, &[&input], &mut out).unwrap();
        assert_eq!(input.as_slice(), &data[..]);
    }
}
