// passes/temporal.rs — Multi-frame stabilisation over a ring of past frames.
//
//   frame N ──┐
//   slot 0 ───┤
//   slot 1 ───┼──▶ TemporalMedian ──▶ output
//   slot 2 ───┤
//   slot 3 ───┘
//   then: slot[cursor] ← frame N (pre-blend), cursor = (cursor + 1) % 4
//
// The ring is seeded lazily: the first frame after construction or after a
// size change is copied into every slot, so the blend never mixes frames of
// different sizes or uninitialised memory. Slot copies go through the
// backend, so on the GPU the history never leaves device memory.

use log::debug;

use crate::backend::{Kernel, KernelBackend};
use crate::error::PipelineError;
use crate::image::{ChannelLayout, ImageBuffer};
use crate::pass::{pass_common, Pass};

/// Number of past frames kept.
pub const HISTORY_DEPTH: usize = 4;

/// Fixed ring of past frames plus a write cursor.
#[derive(Debug)]
pub struct HistoryRing {
    slots: [ImageBuffer; HISTORY_DEPTH],
    cursor: usize,
    seeded: bool,
}

impl HistoryRing {
    pub fn new() -> Self {
        HistoryRing {
            slots: std::array::from_fn(|_| ImageBuffer::new(0, 0, ChannelLayout::Single)),
            cursor: 0,
            seeded: false,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn slots(&self) -> &[ImageBuffer; HISTORY_DEPTH] {
        &self.slots
    }

    /// Resize every slot. A size change drops the history.
    pub fn resize(&mut self, width: u32, height: u32) {
        for slot in &mut self.slots {
            if slot.dimensions() != (width, height) {
                self.seeded = false;
            }
            slot.resize(width, height);
        }
    }

    /// Copy `frame` into every slot and restart the cursor.
    pub fn seed(
        &mut self,
        backend: &mut dyn KernelBackend,
        frame: &ImageBuffer,
    ) -> Result<(), PipelineError> {
        for slot in &mut self.slots {
            backend.copy(frame, slot)?;
        }
        self.cursor = 0;
        self.seeded = true;
        Ok(())
    }

    /// Overwrite the slot under the cursor and advance it.
    pub fn push(
        &mut self,
        backend: &mut dyn KernelBackend,
        frame: &ImageBuffer,
    ) -> Result<(), PipelineError> {
        backend.copy(frame, &mut self.slots[self.cursor])?;
        self.cursor = (self.cursor + 1) % HISTORY_DEPTH;
        Ok(())
    }

    /// Whether the ring can be blended with `frame` as it stands.
    fn matches(&self, frame: &ImageBuffer) -> bool {
        self.seeded
            && self.slots.iter().all(|s| {
                s.dimensions() == frame.dimensions() && s.layout() == frame.layout()
            })
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Median of the current frame and the four previous ones.
#[derive(Debug)]
pub struct TemporalPass {
    enabled: bool,
    history: HistoryRing,
    output: ImageBuffer,
}

impl TemporalPass {
    pub fn new() -> Self {
        TemporalPass {
            enabled: true,
            history: HistoryRing::new(),
            output: ImageBuffer::new(0, 0, ChannelLayout::Single),
        }
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }
}

impl Default for TemporalPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for TemporalPass {
    pass_common!();

    fn resize(&mut self, width: u32, height: u32) {
        self.history.resize(width, height);
        self.output.resize(width, height);
    }

    fn apply(
        &mut self,
        backend: &mut dyn KernelBackend,
        input: &ImageBuffer,
    ) -> Result<&ImageBuffer, PipelineError> {
        if !self.history.matches(input) {
            debug!("temporal ring seeded at {}x{}", input.width(), input.height());
            self.history.seed(backend, input)?;
        }
        let [s0, s1, s2, s3] = &self.history.slots;
        backend.run(&Kernel::TemporalMedian, &[input, s0, s1, s2, s3], &mut self.output)?;
        self.history.push(backend, input)?;
        Ok(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;

    fn frame(v: u8) -> ImageBuffer {
        ImageBuffer::from_bytes(2, 2, ChannelLayout::Single, vec![v; 4])
    }

    #[test]
    fn test_seed_fills_all_slots() {
        let mut pass = TemporalPass::new();
        let out = pass.apply(&mut CpuBackend, &frame(10)).unwrap();
        assert_eq!(out.as_slice(), &[10; 4]);
        assert!(pass.history().is_seeded());
        assert!(pass.history().slots().iter().all(|s| s.as_slice() == [10; 4]));
    }

    #[test]
    fn test_second_frame_overwrites_one_slot() {
        let mut pass = TemporalPass::new();
        pass.apply(&mut CpuBackend, &frame(10)).unwrap();
        pass.apply(&mut CpuBackend, &frame(200)).unwrap();
        let fresh = pass.history().slots().iter().filter(|s| s.as_slice() == [200; 4]).count();
        let old = pass.history().slots().iter().filter(|s| s.as_slice() == [10; 4]).count();
        assert_eq!((fresh, old), (1, 3));
    }

    #[test]
    fn test_median_rejects_single_outlier() {
        let mut pass = TemporalPass::new();
        pass.apply(&mut CpuBackend, &frame(10)).unwrap();
        let out = pass.apply(&mut CpuBackend, &frame(250)).unwrap();
        assert_eq!(out.as_slice(), &[10; 4]);
    }

    #[test]
    fn test_slot_copies_go_through_backend() {
        struct Counting {
            copies: usize,
        }
        impl KernelBackend for Counting {
            fn name(&self) -> &'static str {
                "counting"
            }
            fn run(
                &mut self,
                kernel: &Kernel,
                inputs: &[&ImageBuffer],
                output: &mut ImageBuffer,
            ) -> Result<(), PipelineError> {
                CpuBackend.run(kernel, inputs, output)
            }
            fn copy(&mut self, src: &ImageBuffer, dst: &mut ImageBuffer) -> Result<(), PipelineError> {
                self.copies += 1;
                dst.copy_from(src);
                Ok(())
            }
        }

        let mut backend = Counting { copies: 0 };
        let mut pass = TemporalPass::new();
        pass.apply(&mut backend, &frame(10)).unwrap();
        assert_eq!(backend.copies, HISTORY_DEPTH + 1, "seed every slot, then push");
        pass.apply(&mut backend, &frame(20)).unwrap();
        assert_eq!(backend.copies, HISTORY_DEPTH + 2);
        assert_eq!(pass.history().cursor(), 2);
    }

    #[test]
    fn test_resize_reseeds() {
        let mut pass = TemporalPass::new();
        pass.apply(&mut CpuBackend, &frame(10)).unwrap();
        pass.resize(3, 3);
        assert!(!pass.history().is_seeded());
        let big = ImageBuffer::from_bytes(3, 3, ChannelLayout::Single, vec![77; 9]);
        let out = pass.apply(&mut CpuBackend, &big).unwrap();
        assert_eq!(out.as_slice(), &[77; 9]);
    }
}
