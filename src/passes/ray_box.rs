// passes/ray_box.rs — Ray-cast box fit over an edge-confidence map, with an
// overlay of the fitted box.
//
// The pass reads its input back into a host copy (bottom-up), casts rays,
// fits the oriented box and remembers it. Drawing goes through the `QuadOverlay` kernel so
// the visual stays on the same backend as the rest of the chain:
//
//   last pass   → draws into the pipeline surface at surface resolution
//   middle pass → draws into its own output at input resolution
//
// Either way `last_box` is the product callers care about.

use log::debug;

use crate::backend::{Kernel, KernelBackend};
use crate::error::PipelineError;
use crate::geometry::Quad;
use crate::image::{ChannelLayout, ImageBuffer};
use crate::pass::{pass_common, Pass};
use crate::raycast::{cast_rays, fit_box, RayBoxSettings};

/// Overlay colour of the fitted box.
pub const BOX_COLOR: [u8; 4] = [0, 255, 0, 255];
/// Overlay line half-width in pixels.
pub const BOX_THICKNESS: f32 = 1.0;

#[derive(Debug)]
pub struct RayBoxPass {
    enabled: bool,
    pub settings: RayBoxSettings,
    host: ImageBuffer,
    output: ImageBuffer,
    last_box: Option<Quad>,
    last_hit_count: usize,
}

impl RayBoxPass {
    pub fn new(settings: RayBoxSettings) -> Self {
        RayBoxPass {
            enabled: true,
            settings,
            host: ImageBuffer::new(0, 0, ChannelLayout::Single),
            output: ImageBuffer::new(0, 0, ChannelLayout::Quad),
            last_box: None,
            last_hit_count: 0,
        }
    }

    /// Box fitted on the last frame; `None` before the first frame.
    pub fn last_box(&self) -> Option<Quad> {
        self.last_box
    }

    /// Rays that found an edge on the last frame.
    pub fn last_hit_count(&self) -> usize {
        self.last_hit_count
    }

    fn detect(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<Quad, PipelineError> {
        backend.read_back(&[input], &mut [&mut self.host])?;
        let hits = cast_rays(&self.host.readback(), &self.settings);
        let quad = fit_box(&hits, self.settings.trim_fraction);
        self.last_hit_count = hits.len();
        self.last_box = Some(quad);
        debug!("ray-box: {} hits, box {:?}", hits.len(), quad.corners);
        Ok(quad)
    }

    fn overlay(&self, quad: Quad) -> Kernel {
        Kernel::QuadOverlay {
            corners: Some(quad.corners),
            thickness: BOX_THICKNESS,
            color: BOX_COLOR,
        }
    }
}

impl Default for RayBoxPass {
    fn default() -> Self {
        Self::new(RayBoxSettings::default())
    }
}

impl Pass for RayBoxPass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        let quad = self.detect(backend, input)?;
        let kernel = self.overlay(quad);
        self.output.reshape(input.width(), input.height(), ChannelLayout::Quad);
        backend.run(&kernel, &[input], &mut self.output)?;
        Ok(&self.output)
    }

    fn apply_to_surface(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
        surface: &mut ImageBuffer,
    ) -> Result<bool, PipelineError> {
        let quad = self.detect(backend, input)?;
        let kernel = self.overlay(quad);
        backend.run(&kernel, &[input], surface)?;
        Ok(true)
    }
}
