// boundary-cv: frame-synchronous boundary extraction
//
// Each video frame runs through an ordered chain of image passes on a CPU
// or wgpu backend. Host-side analysis stages read the intermediate buffers
// back and turn them into a boundary quadrilateral: a continuity-graph
// tracer feeding a ray-cast/PCA box fit, or a Hough accumulator feeding a
// peak-based box selector.

pub mod error;
pub mod image;
pub mod codec;
pub mod convolution;
pub mod geometry;

// Kernels and the pass chain
pub mod backend;
pub mod kernels;
pub mod pass;
pub mod pipeline;
pub mod passes;
pub mod pipelines;
pub mod config;

// Host-side analysis
pub mod continuity;
pub mod hough;
pub mod raycast;
pub mod histogram;

pub mod gpu;

pub use backend::{CpuBackend, Kernel, KernelBackend};
pub use error::{ConfigError, PipelineError};
pub use geometry::{Point, Quad};
pub use image::{ChannelLayout, ImageBuffer};
pub use pipeline::{Frame, Pipeline};
pub use pipelines::{BoundaryPipeline, BoundaryResult, LinePipeline, LineResult};
