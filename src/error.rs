// error.rs — Error taxonomy for the pass pipeline.
//
// Every variant here is a programmer or configuration error. Nothing is
// retried internally: a failed `render` leaves the pipeline usable and the
// caller decides whether to fix the chain and try the next frame.
//
// Degenerate numeric input (empty point sets, empty histograms, all-zero
// accumulators) is NOT an error. Those paths return documented fallback
// values instead; see `raycast::fit_box` and `histogram::Histogram`.

use thiserror::Error;

use crate::gpu::device::GpuError;
use crate::image::ChannelLayout;

/// Errors surfaced by pipeline construction and per-frame processing.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The GPU context required by a backend could not be created.
    #[error("pipeline initialization failed: {0}")]
    Initialization(#[source] GpuError),

    /// Every pass in the chain is disabled.
    #[error("no active passes: enable at least one pass before calling render")]
    NoActivePasses,

    /// A kernel received a buffer whose channel layout it cannot process.
    #[error("{stage} expects a {expected} buffer but received {found}")]
    UnsupportedBufferFormat {
        stage: &'static str,
        expected: ChannelLayout,
        found: ChannelLayout,
    },

    /// More samples were pushed into a fixed-capacity histogram than it holds.
    #[error("histogram capacity of {capacity} samples exceeded")]
    BufferOverflow { capacity: usize },

    /// The frame handed to `render` does not describe a valid RGBA image.
    #[error("frame {width}x{height} needs {expected} RGBA bytes, got {actual}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// A GPU operation failed after initialization (e.g. a readback map).
    #[error("gpu error: {0}")]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from loading a JSON pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
