// passes/structure.rs — Gradient + continuity kernels followed by host-side
// stroke tracing.
//
//   luma ──▶ SobelGradients ──▶ gradients ──▶ Continuity ──▶ links
//                                   │                          │
//                                   └────── sync (batched) ────┘
//                                                 ▼
//                                    ContinuityGraph::rebuild + trace
//                                                 ▼
//                                     traced luma map (output)
//
// Both kernels run before either buffer is read back, so the frame pays
// for one synchronisation point rather than two.

use log::debug;

use crate::backend::{Kernel, KernelBackend};
use crate::continuity::{ContinuityGraph, TraceParams, TraceStats};
use crate::error::PipelineError;
use crate::image::{ChannelLayout, ImageBuffer};
use crate::pass::{pass_common, Pass};

/// Structural edge extraction. Registered as `sobel`.
#[derive(Debug)]
pub struct StructurePass {
    enabled: bool,
    pub settings: TraceParams,
    gradients: ImageBuffer,
    links: ImageBuffer,
    graph: ContinuityGraph,
    traced: Vec<u8>,
    output: ImageBuffer,
    last_stats: TraceStats,
}

impl StructurePass {
    pub fn new(settings: TraceParams) -> Self {
        StructurePass {
            enabled: true,
            settings,
            gradients: ImageBuffer::new(0, 0, ChannelLayout::Quad),
            links: ImageBuffer::new(0, 0, ChannelLayout::Quad),
            graph: ContinuityGraph::new(),
            traced: Vec::new(),
            output: ImageBuffer::new(0, 0, ChannelLayout::Single),
            last_stats: TraceStats::default(),
        }
    }

    /// Stroke and pixel counts of the last frame.
    pub fn last_stats(&self) -> TraceStats {
        self.last_stats
    }

    pub fn graph(&self) -> &ContinuityGraph {
        &self.graph
    }

    /// Encoded gradient pairs of the last frame.
    pub fn gradients(&self) -> &ImageBuffer {
        &self.gradients
    }
}

impl Default for StructurePass {
    fn default() -> Self {
        Self::new(TraceParams::default())
    }
}

impl Pass for StructurePass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.gradients.resize(width, height);
        self.links.resize(width, height);
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        backend.run(&Kernel::SobelGradients, &[input], &mut self.gradients)?;
        backend.run(&Kernel::Continuity, &[&self.gradients], &mut self.links)?;
        backend.sync(&mut [&mut self.gradients, &mut self.links])?;

        let (w, h) = (input.width() as usize, input.height() as usize);
        let links = self.links.read_pixels();
        let gradients = self.gradients.read_pixels();
        self.graph.rebuild(w, h, links, gradients);
        self.last_stats = self.graph.trace(&self.settings, &mut self.traced);

        self.output.reshape(input.width(), input.height(), ChannelLayout::Single);
        self.output.write_pixels(&self.traced);
        debug!(
            "structure: {} strokes, {} traced pixels",
            self.last_stats.strokes, self.last_stats.traced
        );
        Ok(&self.output)
    }
}
