// passes/hough.rs — Line detection by (θ, ρ) voting, with a line overlay.
//
//   luma ──▶ SobelGradients ──▶ HoughSamples ──▶ readback
//                                                   │
//                      accumulate ◀─────────────────┘
//                          ▼
//                   strength → find_peaks → BoxStrategy → quad_from_lines
//
// The overlay is the input (as RGBA) with the selected box drawn by the
// `QuadOverlay` kernel and the strongest peaks rasterized as full-width
// lines on top, each in its own hue.

use std::f32::consts::PI;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::backend::{Kernel, KernelBackend};
use crate::error::PipelineError;
use crate::geometry::{draw_line, hsv_to_rgba, to_pixel, Quad};
use crate::hough::{find_peaks, quad_from_lines, BoxStrategy, HoughAccumulator, Peak};
use crate::image::{ChannelLayout, ImageBuffer};
use crate::pass::{pass_common, Pass};

const BOX_COLOR: [u8; 4] = [255, 255, 0, 255];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughSettings {
    /// Suppression radius along θ, in bins (wraps).
    pub theta_radius: usize,
    /// Suppression radius along ρ, in bins (clamped).
    pub rho_radius: usize,
    /// Exponent on the normalized magnitude sum.
    pub magnitude_scale: f32,
    /// Exponent on the normalized vote count.
    pub length_scale: f32,
    /// Gradients within this many radians of a diagonal are not voted.
    pub diagonal_band: f32,
    /// Gradients weaker than this are not voted.
    pub min_magnitude: f32,
    pub strategy: BoxStrategy,
    /// Peaks drawn in the overlay.
    pub max_drawn_lines: usize,
}

impl Default for HoughSettings {
    fn default() -> Self {
        HoughSettings {
            theta_radius: 1,
            rho_radius: 1,
            magnitude_scale: 1.0,
            length_scale: 1.0,
            diagonal_band: PI / 16.0,
            min_magnitude: 0.1,
            strategy: BoxStrategy::QuadrantMatch,
            max_drawn_lines: 8,
        }
    }
}

#[derive(Debug)]
pub struct HoughPass {
    enabled: bool,
    pub settings: HoughSettings,
    gradients: ImageBuffer,
    samples: ImageBuffer,
    accumulator: HoughAccumulator,
    output: ImageBuffer,
    last_peaks: Vec<Peak>,
    last_selection: Vec<Peak>,
    last_quad: Option<Quad>,
}

impl HoughPass {
    pub fn new(settings: HoughSettings) -> Self {
        HoughPass {
            enabled: true,
            settings,
            gradients: ImageBuffer::new(0, 0, ChannelLayout::Quad),
            samples: ImageBuffer::new(0, 0, ChannelLayout::Quad),
            accumulator: HoughAccumulator::new(),
            output: ImageBuffer::new(0, 0, ChannelLayout::Quad),
            last_peaks: Vec::new(),
            last_selection: Vec::new(),
            last_quad: None,
        }
    }

    /// Peaks of the last frame, strongest first.
    pub fn last_peaks(&self) -> &[Peak] {
        &self.last_peaks
    }

    /// Peaks chosen by the box strategy on the last frame.
    pub fn last_selection(&self) -> &[Peak] {
        &self.last_selection
    }

    /// Box formed by the selection, when it holds two vertical and two
    /// horizontal lines.
    pub fn last_quad(&self) -> Option<Quad> {
        self.last_quad
    }

    pub fn accumulator(&self) -> &HoughAccumulator {
        &self.accumulator
    }

    fn detect(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<(), PipelineError> {
        let s = self.settings;
        backend.run(&Kernel::SobelGradients, &[input], &mut self.gradients)?;
        let kernel = Kernel::HoughSamples {
            diagonal_band: s.diagonal_band,
            min_magnitude: s.min_magnitude,
        };
        backend.run(&kernel, &[&self.gradients], &mut self.samples)?;
        backend.sync(&mut [&mut self.samples])?;

        let voted = self.accumulator.accumulate(self.samples.read_pixels());
        let strength = self.accumulator.compute_strength(s.magnitude_scale, s.length_scale);
        self.last_peaks = find_peaks(strength, s.theta_radius, s.rho_radius);
        self.last_selection = s.strategy.select(&self.last_peaks);
        self.last_quad = quad_from_lines(&self.last_selection);
        debug!(
            "hough: {} votes, {} peaks, {} selected, box {}",
            voted,
            self.last_peaks.len(),
            self.last_selection.len(),
            if self.last_quad.is_some() { "found" } else { "none" }
        );
        Ok(())
    }

    fn draw(&self, backend: &mut dyn KernelBackend, input: &ImageBuffer, target: &mut ImageBuffer) -> Result<(), PipelineError> {
        let kernel = Kernel::QuadOverlay {
            corners: self.last_quad.map(|q| q.corners),
            thickness: 1.0,
            color: BOX_COLOR,
        };
        backend.run(&kernel, &[input], target)?;
        let drawn = self.last_peaks.len().min(self.settings.max_drawn_lines);
        if drawn > 0 {
            // Lines are drawn on the host, over the overlay.
            backend.sync(&mut [&mut *target])?;
        }
        let (w, h) = target.dimensions();
        for (i, peak) in self.last_peaks.iter().take(drawn).enumerate() {
            if let Some((a, b)) = peak.line().endpoints() {
                let color = hsv_to_rgba(i as f32 / drawn as f32, 1.0, 1.0);
                draw_line(target, to_pixel(a, w, h), to_pixel(b, w, h), color);
            }
        }
        Ok(())
    }
}

impl Default for HoughPass {
    fn default() -> Self {
        Self::new(HoughSettings::default())
    }
}

impl Pass for HoughPass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.gradients.resize(width, height);
        self.samples.resize(width, height);
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        self.detect(backend, input)?;
        let mut output = std::mem::replace(&mut self.output, ImageBuffer::new(0, 0, ChannelLayout::Quad));
        output.reshape(input.width(), input.height(), ChannelLayout::Quad);
        let drawn = self.draw(backend, input, &mut output);
        self.output = output;
        drawn?;
        Ok(&self.output)
    }

    fn apply_to_surface(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
        surface: &mut ImageBuffer,
    ) -> Result<bool, PipelineError> {
        self.detect(backend, input)?;
        self.draw(backend, input, surface)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::hough::Side;

    /// Bright axis-aligned rectangle on a dark field.
    fn rectangle(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> ImageBuffer {
        let mut data = vec![0u8; (w * h) as usize];
        for y in y0..y1 {
            for x in x0..x1 {
                data[(y * w + x) as usize] = 255;
            }
        }
        ImageBuffer::from_bytes(w, h, ChannelLayout::Single, data)
    }

    #[test]
    fn test_blank_frame_has_no_peaks() {
        let mut pass = HoughPass::default();
        let input = ImageBuffer::new(16, 16, ChannelLayout::Single);
        let out = pass.apply(&mut CpuBackend, &input).unwrap();
        assert_eq!(out.layout(), ChannelLayout::Quad);
        assert!(pass.last_peaks().is_empty());
        assert_eq!(pass.last_quad(), None);
    }

    #[test]
    fn test_rectangle_yields_four_sides() {
        let mut pass = HoughPass::default();
        let input = rectangle(64, 64, 16, 16, 48, 48);
        pass.apply(&mut CpuBackend, &input).unwrap();
        let sides: Vec<Side> = pass.last_selection().iter().map(Side::of).collect();
        assert_eq!(sides, vec![Side::Left, Side::Right, Side::Above, Side::Below]);
        let quad = pass.last_quad().expect("four sides form a box").ordered();
        let tl = quad.corners[0];
        let br = quad.corners[2];
        assert!((tl.x - 0.25).abs() < 0.06 && (tl.y - 0.25).abs() < 0.06, "{tl:?}");
        assert!((br.x - 0.75).abs() < 0.06 && (br.y - 0.75).abs() < 0.06, "{br:?}");
    }

    #[test]
    fn test_mirror_strategy_selects_pair() {
        let settings = HoughSettings { strategy: BoxStrategy::MirrorMatch, ..HoughSettings::default() };
        let mut pass = HoughPass::new(settings);
        pass.apply(&mut CpuBackend, &rectangle(64, 64, 16, 16, 48, 48)).unwrap();
        assert_eq!(pass.last_selection().len(), 2);
        assert_eq!(pass.last_quad(), None);
    }
}
