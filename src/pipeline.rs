// pipeline.rs — Ordered pass chain, frame upload and result hook.
//
// Per-frame flow:
//
//   Frame (host RGBA)
//     │ resize everything if the frame size changed
//     ▼
//   input buffer ──▶ pass 1 ──▶ pass 2 ──▶ … ──▶ last pass
//                                                  │
//                        apply_to_surface ─────────┤ (draws into surface)
//                        or apply + present ───────┘ (copied into surface)
//                                                  ▼
//                                     hook.postprocess(surface, passes)
//                                                  ▼
//                                            H::Output
//
// Disabled passes are skipped. The display surface is always a copy of
// what the last active pass produced, so `surface()` is a valid debug view
// after every successful render.
//
// Processing is single-threaded and frame-synchronous: `render` returns
// only after every kernel, readback and host-side algorithm for the frame
// has finished. Intermediate buffers stay on the backend; the surface is
// the one buffer the pipeline itself brings back to the host. Buffers are reused across frames and only reallocated when
// the frame size changes.

use std::time::Instant;

use log::{debug, trace};

use crate::backend::{CpuBackend, KernelBackend};
use crate::error::PipelineError;
use crate::image::{ChannelLayout, ImageBuffer};
use crate::pass::{Pass, PassEntry};

/// One decoded RGBA frame in host memory, rows top-down.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(width: u32, height: u32, rgba: &'a [u8]) -> Self {
        Frame { width, height, rgba }
    }

    /// Reject empty frames and byte counts that do not match the size.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let expected = self.width as usize * self.height as usize * 4;
        if expected == 0 || self.rgba.len() != expected {
            return Err(PipelineError::InvalidFrame {
                width: self.width,
                height: self.height,
                expected,
                actual: self.rgba.len(),
            });
        }
        Ok(())
    }
}

/// Turns the final buffer and the pass registry into a typed result.
pub trait PipelineHook {
    type Output;

    fn postprocess(&mut self, surface: &ImageBuffer, passes: &[PassEntry]) -> Self::Output;
}

/// Hook for pipelines whose only product is the surface itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHook;

impl PipelineHook for NoHook {
    type Output = ();

    fn postprocess(&mut self, _surface: &ImageBuffer, _passes: &[PassEntry]) {}
}

/// An ordered chain of passes over one backend.
pub struct Pipeline<H: PipelineHook> {
    entries: Vec<PassEntry>,
    input: ImageBuffer,
    surface: ImageBuffer,
    backend: Box<dyn KernelBackend>,
    hook: H,
    frames: u64,
}

impl<H: PipelineHook> Pipeline<H> {
    /// Empty pipeline running on the CPU backend.
    pub fn with_hook(hook: H) -> Self {
        Self::with_backend(Box::new(CpuBackend::new()), hook)
    }

    /// Empty pipeline running on `backend`.
    pub fn with_backend(backend: Box<dyn KernelBackend>, hook: H) -> Self {
        Pipeline {
            entries: Vec::new(),
            input: ImageBuffer::new(0, 0, ChannelLayout::Quad),
            surface: ImageBuffer::new(0, 0, ChannelLayout::Quad),
            backend,
            hook,
            frames: 0,
        }
    }

    /// Append a pass to the end of the chain.
    pub fn add_pass(&mut self, mut entry: PassEntry) {
        let (w, h) = self.input.dimensions();
        if w > 0 && h > 0 {
            entry.pass.resize(w, h);
        }
        self.entries.push(entry);
    }

    // --- Registry ---

    pub fn passes(&self) -> &[PassEntry] {
        &self.entries
    }

    pub fn pass(&self, id: &str) -> Option<&PassEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn pass_mut(&mut self, id: &str) -> Option<&mut PassEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Look up a pass by id and downcast it to its concrete type.
    pub fn pass_as<T: Pass>(&self, id: &str) -> Option<&T> {
        self.pass(id).and_then(|e| e.downcast_ref::<T>())
    }

    pub fn pass_as_mut<T: Pass>(&mut self, id: &str) -> Option<&mut T> {
        self.pass_mut(id).and_then(|e| e.downcast_mut::<T>())
    }

    /// Toggle a pass. Returns `false` if no pass has that id.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.pass_mut(id) {
            Some(entry) => {
                entry.pass.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    // --- State ---

    /// Current surface size; (0, 0) before the first frame.
    pub fn size(&self) -> (u32, u32) {
        self.input.dimensions()
    }

    /// The last rendered frame as RGBA or single-channel, depending on the
    /// last active pass.
    pub fn surface(&self) -> &ImageBuffer {
        &self.surface
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    /// Resize the input, the surface and every pass's owned buffers.
    pub fn resize(&mut self, width: u32, height: u32) {
        debug!("pipeline resize to {width}x{height}");
        self.input.resize(width, height);
        self.surface.resize(width, height);
        for entry in &mut self.entries {
            entry.pass.resize(width, height);
        }
    }

    // --- Rendering ---

    /// Run one frame through every enabled pass and return the hook's result.
    pub fn render(&mut self, frame: &Frame<'_>) -> Result<H::Output, PipelineError> {
        frame.validate()?;
        if (frame.width, frame.height) != self.input.dimensions() {
            self.resize(frame.width, frame.height);
        }
        self.input.upload(frame.rgba);

        let Pipeline { entries, input, surface, backend, hook, frames } = self;
        let backend: &mut dyn KernelBackend = &mut **backend;

        let mut active: Vec<&mut PassEntry> =
            entries.iter_mut().filter(|e| e.pass.enabled()).collect();
        let active_count = active.len();
        let (last, middle) = active
            .split_last_mut()
            .ok_or(PipelineError::NoActivePasses)?;

        let mut current: &ImageBuffer = input;
        for entry in middle.iter_mut() {
            let started = Instant::now();
            current = entry.pass.apply(backend, current)?;
            trace!("pass {} took {:?}", entry.id, started.elapsed());
        }

        let started = Instant::now();
        if last.pass.apply_to_surface(backend, current, surface)? {
            backend.sync(&mut [&mut *surface])?;
        } else {
            let out = last.pass.apply(backend, current)?;
            backend.read_back(&[out], &mut [&mut *surface])?;
        }
        trace!("pass {} took {:?}", last.id, started.elapsed());

        *frames += 1;
        debug!(
            "frame {} rendered through {} active passes on {}",
            frames,
            active_count,
            backend.name()
        );
        Ok(hook.postprocess(surface, entries))
    }
}
