// pass.rs — The stage interface every pipeline element implements.
//
// A pass borrows its input and owns its output:
//
//   input: &ImageBuffer ──▶ [ pass ] ──▶ &ImageBuffer (owned by the pass)
//
// Returning a borrow of the pass's own buffer lets the pipeline thread one
// frame through the chain without copying between stages.
//
// The last active pass may instead render straight into the pipeline's
// display surface (`apply_to_surface`). Passes that have nothing to draw
// keep the default, which declines, and the pipeline presents their
// buffer instead.
//
// NEW RUST CONCEPTS
// ──────────────────
// - `Any` as a supertrait: `Box<dyn Pass>` can be downcast back to the
//   concrete pass to read its settings and last results.
// - Lifetime elision on `apply`: the returned `&ImageBuffer` borrows from
//   `&mut self`, so the caller cannot call the pass again while it still
//   holds the previous output.

use std::any::Any;

use crate::backend::KernelBackend;
use crate::error::PipelineError;
use crate::image::ImageBuffer;

/// One stage of a pipeline.
pub trait Pass: Any {
    fn enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Resize owned buffers to the new frame size. Contents become undefined.
    fn resize(&mut self, width: u32, height: u32);

    /// Process `input` into the pass's own output buffer and return it.
    /// Must not mutate `input`.
    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError>;

    /// Render `input` into the display surface. Returns `Ok(false)` when the
    /// pass does not draw to surfaces; the pipeline then calls `apply`.
    fn apply_to_surface(
        &mut self,
        _backend: &mut dyn KernelBackend,
        _input: &ImageBuffer,
        _surface: &mut ImageBuffer,
    ) -> Result<bool, PipelineError> {
        Ok(false)
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A registered pass with its stable id, display label and advisory
/// `required` flag. The pipeline never enforces `required`.
pub struct PassEntry {
    pub id: &'static str,
    pub label: &'static str,
    pub required: bool,
    pub pass: Box<dyn Pass>,
}

impl PassEntry {
    pub fn new(id: &'static str, label: &'static str, required: bool, pass: Box<dyn Pass>) -> Self {
        PassEntry { id, label, required, pass }
    }

    /// Downcast to a concrete pass type.
    pub fn downcast_ref<T: Pass>(&self) -> Option<&T> {
        self.pass.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Pass>(&mut self) -> Option<&mut T> {
        self.pass.as_any_mut().downcast_mut::<T>()
    }
}

impl std::fmt::Debug for PassEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassEntry")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("required", &self.required)
            .field("enabled", &self.pass.enabled())
            .finish()
    }
}

/// Find a pass by id in a registry slice and downcast it.
pub fn find_pass<'a, T: Pass>(entries: &'a [PassEntry], id: &str) -> Option<&'a T> {
    entries.iter().find(|e| e.id == id).and_then(|e| e.downcast_ref::<T>())
}

/// Boilerplate shared by every concrete pass: `enabled` bookkeeping and the
/// `Any` accessors. Expects an `enabled: bool` field.
macro_rules! pass_common {
    () => {
        fn enabled(&self) -> bool {
            self.enabled
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }

        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }
    };
}
pub(crate) use pass_common;
