// pipelines.rs — The two assembled pass chains and their typed results.
//
//   BoundaryPipeline
//     rec709-luma → orientation → temporal → bilateral → downscale
//       → sobel (Structure) → ray-box                 ⇒ BoundaryResult
//
//   LinePipeline
//     rec709-luma → temporal → bilateral → hough       ⇒ LineResult
//
// Every stage can be toggled through the registry; `rec709-luma` is marked
// required because every later stage expects single-channel input, but the
// pipeline does not enforce it.

use log::info;

use crate::backend::KernelBackend;
use crate::continuity::TraceParams;
use crate::error::PipelineError;
use crate::geometry::Quad;
use crate::gpu::{DeviceProfile, GpuBackend};
use crate::hough::Peak;
use crate::image::ImageBuffer;
use crate::pass::{find_pass, Pass, PassEntry};
use crate::passes::{
    BilateralPass, BilateralSettings, DownscalePass, DownscaleSettings, HoughPass, HoughSettings,
    LumaPass, OrientationPass, OrientationSettings, RayBoxPass, StructurePass, TemporalPass,
};
use crate::pipeline::{Pipeline, PipelineHook};
use crate::raycast::RayBoxSettings;

// Registry ids.
pub const LUMA: &str = "rec709-luma";
pub const ORIENTATION: &str = "orientation";
pub const TEMPORAL: &str = "temporal";
pub const BILATERAL: &str = "bilateral";
pub const DOWNSCALE: &str = "downscale";
pub const STRUCTURE: &str = "sobel";
pub const RAY_BOX: &str = "ray-box";
pub const HOUGH: &str = "hough";

/// Ray-box settings used by the boundary pipeline. The traced luma map is
/// sparse, so the hit threshold sits below the fitter's own default.
pub fn boundary_ray_box_settings() -> RayBoxSettings {
    RayBoxSettings { threshold: 0.12, ray_count: 64, step: 0.5, trim_fraction: 0.12 }
}

// ---------------------------------------------------------------------------
// Boundary pipeline
// ---------------------------------------------------------------------------

/// Per-frame result of the boundary pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryResult {
    /// Fitted box, `None` when the ray-box stage is disabled.
    pub quad: Option<Quad>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BoundaryHook;

impl PipelineHook for BoundaryHook {
    type Output = BoundaryResult;

    fn postprocess(&mut self, _surface: &ImageBuffer, passes: &[PassEntry]) -> BoundaryResult {
        let quad = find_pass::<RayBoxPass>(passes, RAY_BOX)
            .filter(|p| p.enabled())
            .and_then(RayBoxPass::last_box);
        BoundaryResult { quad }
    }
}

pub type BoundaryPipeline = Pipeline<BoundaryHook>;

impl Pipeline<BoundaryHook> {
    /// Boundary pipeline on the CPU backend.
    pub fn new() -> Self {
        Self::with_boundary_backend(Box::new(crate::backend::CpuBackend::new()))
    }

    /// Boundary pipeline on the first usable Vulkan adapter.
    pub fn gpu(profile: DeviceProfile) -> Result<Self, PipelineError> {
        let backend = GpuBackend::new(profile).map_err(PipelineError::Initialization)?;
        Ok(Self::with_boundary_backend(Box::new(backend)))
    }

    pub fn with_boundary_backend(backend: Box<dyn KernelBackend>) -> Self {
        let mut p = Pipeline::with_backend(backend, BoundaryHook);
        p.add_pass(PassEntry::new(LUMA, "Rec.709 Luma", true, Box::new(LumaPass::new())));
        p.add_pass(PassEntry::new(
            ORIENTATION,
            "Orientation",
            false,
            Box::new(OrientationPass::new(OrientationSettings::default())),
        ));
        p.add_pass(PassEntry::new(TEMPORAL, "Temporal", false, Box::new(TemporalPass::new())));
        p.add_pass(PassEntry::new(
            BILATERAL,
            "Bilateral",
            false,
            Box::new(BilateralPass::new(BilateralSettings::default())),
        ));
        p.add_pass(PassEntry::new(
            DOWNSCALE,
            "Downscale",
            false,
            Box::new(DownscalePass::new(DownscaleSettings::default())),
        ));
        p.add_pass(PassEntry::new(
            STRUCTURE,
            "Structure",
            false,
            Box::new(StructurePass::new(TraceParams::default())),
        ));
        p.add_pass(PassEntry::new(
            RAY_BOX,
            "Ray Box",
            false,
            Box::new(RayBoxPass::new(boundary_ray_box_settings())),
        ));
        info!("boundary pipeline ready on {} backend", p.backend_name());
        p
    }
}

impl Default for Pipeline<BoundaryHook> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Line pipeline
// ---------------------------------------------------------------------------

/// Per-frame result of the line pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineResult {
    /// All peaks, strongest first.
    pub peaks: Vec<Peak>,
    /// Peaks chosen by the configured box strategy.
    pub selection: Vec<Peak>,
    /// Box from the selection, when it has two vertical and two horizontal
    /// lines.
    pub quad: Option<Quad>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LineHook;

impl PipelineHook for LineHook {
    type Output = LineResult;

    fn postprocess(&mut self, _surface: &ImageBuffer, passes: &[PassEntry]) -> LineResult {
        match find_pass::<HoughPass>(passes, HOUGH).filter(|p| p.enabled()) {
            Some(h) => LineResult {
                peaks: h.last_peaks().to_vec(),
                selection: h.last_selection().to_vec(),
                quad: h.last_quad(),
            },
            None => LineResult::default(),
        }
    }
}

pub type LinePipeline = Pipeline<LineHook>;

impl Pipeline<LineHook> {
    /// Line pipeline on the CPU backend.
    pub fn new() -> Self {
        Self::with_line_backend(Box::new(crate::backend::CpuBackend::new()))
    }

    /// Line pipeline on the first usable Vulkan adapter.
    pub fn gpu(profile: DeviceProfile) -> Result<Self, PipelineError> {
        let backend = GpuBackend::new(profile).map_err(PipelineError::Initialization)?;
        Ok(Self::with_line_backend(Box::new(backend)))
    }

    pub fn with_line_backend(backend: Box<dyn KernelBackend>) -> Self {
        let mut p = Pipeline::with_backend(backend, LineHook);
        p.add_pass(PassEntry::new(LUMA, "Rec.709 Luma", true, Box::new(LumaPass::new())));
        p.add_pass(PassEntry::new(TEMPORAL, "Temporal", false, Box::new(TemporalPass::new())));
        p.add_pass(PassEntry::new(
            BILATERAL,
            "Bilateral",
            false,
            Box::new(BilateralPass::new(BilateralSettings::default())),
        ));
        p.add_pass(PassEntry::new(
            HOUGH,
            "Hough",
            false,
            Box::new(HoughPass::new(HoughSettings::default())),
        ));
        info!("line pipeline ready on {} backend", p.backend_name());
        p
    }
}

impl Default for Pipeline<LineHook> {
    fn default() -> Self {
        Self::new()
    }
}
