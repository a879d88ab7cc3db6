// passes/filters.rs — Single-kernel image filters.
//
// Each of these passes maps its settings onto one `Kernel` and runs it into
// the output buffer it owns. None of them keep state between frames.

use serde::{Deserialize, Serialize};

use crate::backend::{DogEncoding, Kernel, KernelBackend};
use crate::error::PipelineError;
use crate::image::{ChannelLayout, ImageBuffer};
use crate::pass::{pass_common, Pass};

// ---------------------------------------------------------------------------
// Luma
// ---------------------------------------------------------------------------

/// RGBA → Rec.709 luma.
#[derive(Debug)]
pub struct LumaPass {
    enabled: bool,
    output: ImageBuffer,
}

impl LumaPass {
    pub fn new() -> Self {
        LumaPass { enabled: true, output: ImageBuffer::new(0, 0, ChannelLayout::Single) }
    }
}

impl Default for LumaPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for LumaPass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        backend.run(&Kernel::Luma, &[input], &mut self.output)?;
        Ok(&self.output)
    }
}

// ---------------------------------------------------------------------------
// Orientation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationSettings {
    pub flip_x: bool,
    pub flip_y: bool,
}

/// Mirror a luma buffer horizontally and/or vertically.
#[derive(Debug)]
pub struct OrientationPass {
    enabled: bool,
    pub settings: OrientationSettings,
    output: ImageBuffer,
}

impl OrientationPass {
    pub fn new(settings: OrientationSettings) -> Self {
        OrientationPass {
            enabled: true,
            settings,
            output: ImageBuffer::new(0, 0, ChannelLayout::Single),
        }
    }
}

impl Pass for OrientationPass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        let kernel = Kernel::Orientation {
            flip_x: self.settings.flip_x,
            flip_y: self.settings.flip_y,
        };
        backend.run(&kernel, &[input], &mut self.output)?;
        Ok(&self.output)
    }
}

// ---------------------------------------------------------------------------
// Bilateral
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BilateralSettings {
    /// Half-width of the square window.
    pub kernel_radius: u32,
    /// Spatial Gaussian σ in pixels.
    pub sigma_spatial: f32,
    /// Range Gaussian σ on [0, 1] intensities.
    pub sigma_range: f32,
}

impl Default for BilateralSettings {
    fn default() -> Self {
        BilateralSettings { kernel_radius: 2, sigma_spatial: 2.0, sigma_range: 0.1 }
    }
}

/// Edge-preserving smoothing of a luma buffer.
#[derive(Debug)]
pub struct BilateralPass {
    enabled: bool,
    pub settings: BilateralSettings,
    output: ImageBuffer,
}

impl BilateralPass {
    pub fn new(settings: BilateralSettings) -> Self {
        BilateralPass {
            enabled: true,
            settings,
            output: ImageBuffer::new(0, 0, ChannelLayout::Single),
        }
    }
}

impl Pass for BilateralPass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        let s = self.settings;
        let kernel = Kernel::Bilateral {
            radius: s.kernel_radius,
            sigma_spatial: s.sigma_spatial,
            sigma_range: s.sigma_range,
        };
        backend.run(&kernel, &[input], &mut self.output)?;
        Ok(&self.output)
    }
}

// ---------------------------------------------------------------------------
// Downscale
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownscaleSettings {
    /// Integer reduction factor; 0 and 1 both leave the size unchanged.
    pub factor: u32,
}

impl Default for DownscaleSettings {
    fn default() -> Self {
        DownscaleSettings { factor: 2 }
    }
}

impl DownscaleSettings {
    /// Output size for an input of `width × height`.
    pub fn target(&self, width: u32, height: u32) -> (u32, u32) {
        let f = self.factor.max(1);
        (width.div_ceil(f), height.div_ceil(f))
    }
}

/// Box-average reduction. Keeps the input's channel layout.
#[derive(Debug)]
pub struct DownscalePass {
    enabled: bool,
    pub settings: DownscaleSettings,
    output: ImageBuffer,
}

impl DownscalePass {
    pub fn new(settings: DownscaleSettings) -> Self {
        DownscalePass {
            enabled: true,
            settings,
            output: ImageBuffer::new(0, 0, ChannelLayout::Single),
        }
    }
}

impl Pass for DownscalePass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        let (w, h) = self.settings.target(width, height);
        self.output.resize(w, h);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        // The output size follows the input actually received, which may
        // already be reduced by an earlier stage.
        let (w, h) = self.settings.target(input.width(), input.height());
        self.output.reshape(w, h, input.layout());
        backend.run(&Kernel::Downscale, &[input], &mut self.output)?;
        Ok(&self.output)
    }
}

// ---------------------------------------------------------------------------
// Difference of Gaussians
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DogSettings {
    pub sigma_small: f32,
    pub sigma_large: f32,
    pub encoding: DogEncoding,
}

impl Default for DogSettings {
    fn default() -> Self {
        DogSettings { sigma_small: 1.0, sigma_large: 2.0, encoding: DogEncoding::Float32 }
    }
}

/// Band-pass response packed per pixel for host-side decoding.
#[derive(Debug)]
pub struct DogPass {
    enabled: bool,
    pub settings: DogSettings,
    output: ImageBuffer,
}

impl DogPass {
    pub fn new(settings: DogSettings) -> Self {
        DogPass { enabled: true, settings, output: ImageBuffer::new(0, 0, ChannelLayout::Quad) }
    }

    /// Decode the last output into signed values, rows top-down.
    pub fn values(&mut self, backend: &mut dyn KernelBackend) -> Result<Vec<f32>, PipelineError> {
        backend.sync(&mut [&mut self.output])?;
        let decode = match self.settings.encoding {
            DogEncoding::Float32 => crate::codec::decode_f32,
            DogEncoding::Signed32 => crate::codec::decode_signed32,
        };
        Ok(self
            .output
            .as_slice()
            .chunks_exact(4)
            .map(|b| decode([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

impl Pass for DogPass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        let s = self.settings;
        let kernel = Kernel::DifferenceOfGaussians {
            sigma_small: s.sigma_small,
            sigma_large: s.sigma_large,
            encoding: s.encoding,
        };
        backend.run(&kernel, &[input], &mut self.output)?;
        Ok(&self.output)
    }
}

// ---------------------------------------------------------------------------
// Low cutoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowCutoffSettings {
    /// Channels below this [0, 1] level are zeroed.
    pub cutoff: f32,
}

impl Default for LowCutoffSettings {
    fn default() -> Self {
        LowCutoffSettings { cutoff: 0.1 }
    }
}

/// Suppress dim values. Accepts either layout, always outputs RGBA.
#[derive(Debug)]
pub struct LowCutoffPass {
    enabled: bool,
    pub settings: LowCutoffSettings,
    output: ImageBuffer,
}

impl LowCutoffPass {
    pub fn new(settings: LowCutoffSettings) -> Self {
        LowCutoffPass { enabled: true, settings, output: ImageBuffer::new(0, 0, ChannelLayout::Quad) }
    }
}

impl Default for LowCutoffPass {
    fn default() -> Self {
        Self::new(LowCutoffSettings::default())
    }
}

impl Pass for LowCutoffPass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        let kernel = Kernel::LowCutoff { cutoff: self.settings.cutoff };
        backend.run(&kernel, &[input], &mut self.output)?;
        Ok(&self.output)
    }
}

// ---------------------------------------------------------------------------
// Magnitude gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagnitudeGateSettings {
    /// Minimum [0, 1] magnitude a pixel needs to keep its colour.
    pub threshold: f32,
}

impl Default for MagnitudeGateSettings {
    fn default() -> Self {
        MagnitudeGateSettings { threshold: 0.1 }
    }
}

/// All-or-nothing per-pixel gate on magnitude. Accepts either layout,
/// always outputs RGBA.
#[derive(Debug)]
pub struct MagnitudeGatePass {
    enabled: bool,
    pub settings: MagnitudeGateSettings,
    output: ImageBuffer,
}

impl MagnitudeGatePass {
    pub fn new(settings: MagnitudeGateSettings) -> Self {
        MagnitudeGatePass { enabled: true, settings, output: ImageBuffer::new(0, 0, ChannelLayout::Quad) }
    }
}

impl Default for MagnitudeGatePass {
    fn default() -> Self {
        Self::new(MagnitudeGateSettings::default())
    }
}

impl Pass for MagnitudeGatePass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        let kernel = Kernel::MagnitudeGate { threshold: self.settings.threshold };
        backend.run(&kernel, &[input], &mut self.output)?;
        Ok(&self.output)
    }
}
