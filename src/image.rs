// image.rs — 8-bit image buffers shared between passes, plus an f32 plane
// used inside the CPU kernels.
//
// STORAGE VS READBACK ORDER
// ─────────────────────────
// `ImageBuffer` stores rows top-down (row 0 = top of the frame), the same
// order frames arrive in and the order kernels index them.
//
// Readback is bottom-up. Framebuffer reads return row 0 = bottom of the
// image, and every host-side algorithm that consumes a readback (continuity
// tracing, ray casting) is written against that convention:
//
//   storage (top-down)        readback (bottom-up)
//     row 0: a a a a            row 0: c c c c
//     row 1: b b b b            row 1: b b b b
//     row 2: c c c c            row 2: a a a a
//
// `read_pixels` produces the bottom-up copy and caches it as the buffer's
// CPU mirror. Any write through `as_mut_slice`, `upload`, `write_pixels`,
// `copy_from` or a resize invalidates the mirror, so a read always reflects
// the last write.
//
// DEVICE COPIES
// ─────────────
// A GPU backend keeps its own copy of each buffer, keyed by the buffer's
// `DeviceHandle`. Two counters keep the copies apart:
//
//   host write  ──▶ generation += 1      (device copy is out of date)
//   kernel run  ──▶ host_stale = true    (host bytes are out of date)
//
// The backend re-uploads only when the generation it last saw differs, and
// the host bytes are only refreshed by `KernelBackend::sync`/`read_back`.
// A buffer that only ever sees the CPU backend is never stale.
//
// NEW RUST CONCEPTS
// ──────────────────
// - A `bool` dirty flag next to a cached `Vec<u8>` instead of
//   `Option<Vec<u8>>`: keeping the allocation alive avoids a per-frame
//   allocation when the same buffer is read back every frame.
// - Returning `&[u8]` from a `&mut self` method: the borrow checker ties the
//   slice to the buffer, so the mirror cannot be invalidated while a caller
//   still holds it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Channel layout
// ---------------------------------------------------------------------------

/// Number of 8-bit channels stored per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    /// One channel (luma, masks, traced maps).
    Single,
    /// Four channels (RGBA frames, codec-packed values).
    Quad,
}

impl ChannelLayout {
    #[inline]
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Single => 1,
            ChannelLayout::Quad => 4,
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelLayout::Single => write!(f, "single-channel"),
            ChannelLayout::Quad => write!(f, "quad-channel"),
        }
    }
}

// ---------------------------------------------------------------------------
// Device handle
// ---------------------------------------------------------------------------

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identity of one `ImageBuffer`. Backends key their device copies by `id`
/// and hold only a `Weak` to the handle, so a dropped buffer's copy can be
/// released.
#[derive(Debug)]
pub struct DeviceHandle {
    id: u64,
}

impl DeviceHandle {
    fn fresh() -> Arc<Self> {
        Arc::new(DeviceHandle { id: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed) })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

// ---------------------------------------------------------------------------
// ImageBuffer
// ---------------------------------------------------------------------------

/// A 2D grid of 8-bit pixels with a fixed channel layout and a cached
/// bottom-up readback mirror.
///
/// A zero-sized buffer is valid: pipelines create their buffers empty and
/// size them when the first frame arrives.
pub struct ImageBuffer {
    width: u32,
    height: u32,
    layout: ChannelLayout,
    /// Top-down pixel data, `channels` bytes per pixel, no row padding.
    data: Vec<u8>,
    /// Bottom-up copy of `data`, valid only when `mirror_valid` is set.
    mirror: Vec<u8>,
    mirror_valid: bool,
    handle: Arc<DeviceHandle>,
    /// Bumped by every host write.
    generation: u64,
    /// Set when a backend wrote the device copy and `data` lags behind it.
    host_stale: bool,
}

impl ImageBuffer {
    // --- Constructors ---

    /// Create a zero-filled buffer.
    pub fn new(width: u32, height: u32, layout: ChannelLayout) -> Self {
        ImageBuffer {
            width,
            height,
            layout,
            data: vec![0; byte_len(width, height, layout)],
            mirror: Vec::new(),
            mirror_valid: false,
            handle: DeviceHandle::fresh(),
            generation: 0,
            host_stale: false,
        }
    }

    /// Wrap existing top-down pixel data.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height * channels`.
    pub fn from_bytes(width: u32, height: u32, layout: ChannelLayout, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            byte_len(width, height, layout),
            "data length must be width * height * channels"
        );
        ImageBuffer {
            width,
            height,
            layout,
            data,
            mirror: Vec::new(),
            mirror_valid: false,
            handle: DeviceHandle::fresh(),
            generation: 0,
            host_stale: false,
        }
    }

    // --- Accessors ---

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Top-down pixel data. Out of date while `host_is_stale()`.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable top-down pixel data. Counts as a host write.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.touch();
        &mut self.data
    }

    // --- Device copies ---

    pub fn device_handle(&self) -> &Arc<DeviceHandle> {
        &self.handle
    }

    /// Host write counter.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True after a backend wrote the device copy and before the host bytes
    /// were synced.
    #[inline]
    pub fn host_is_stale(&self) -> bool {
        self.host_stale
    }

    /// Record a device-side write. The generation is left alone so the
    /// backend's copy stays current.
    pub fn mark_device_written(&mut self) {
        self.host_stale = true;
        self.mirror_valid = false;
    }

    #[inline]
    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.host_stale = false;
        self.mirror_valid = false;
    }

    /// Byte offset of pixel (x, y) in top-down storage.
    #[inline]
    pub fn offset(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.width && y < self.height, "({x},{y}) out of bounds");
        (y as usize * self.width as usize + x as usize) * self.channels()
    }

    /// All channels of pixel (x, y).
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let o = self.offset(x, y);
        &self.data[o..o + self.channels()]
    }

    /// Channel `c` of pixel (x, y).
    #[inline]
    pub fn get(&self, x: u32, y: u32, c: usize) -> u8 {
        self.data[self.offset(x, y) + c]
    }

    /// Overwrite pixel (x, y). `value` must hold exactly `channels` bytes.
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, value: &[u8]) {
        let o = self.offset(x, y);
        let n = self.channels();
        self.data[o..o + n].copy_from_slice(value);
        self.touch();
    }

    // --- Sizing ---

    /// Resize in place, keeping the layout. Contents are undefined (zeroed)
    /// after a size change; a same-size call is a no-op.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.reshape(width, height, self.layout);
    }

    /// Resize and/or change the channel layout. No-op when nothing changes.
    pub fn reshape(&mut self, width: u32, height: u32, layout: ChannelLayout) {
        if self.width == width && self.height == height && self.layout == layout {
            return;
        }
        self.width = width;
        self.height = height;
        self.layout = layout;
        self.data.clear();
        self.data.resize(byte_len(width, height, layout), 0);
        self.touch();
    }

    // --- Transfers ---

    /// Replace the contents with top-down bytes of the current size.
    ///
    /// # Panics
    /// Panics if `bytes` does not match the buffer's byte length.
    pub fn upload(&mut self, bytes: &[u8]) {
        assert_eq!(bytes.len(), self.data.len(), "upload size mismatch");
        self.data.copy_from_slice(bytes);
        self.touch();
    }

    /// Become a copy of `other`'s host bytes (dimensions, layout and
    /// contents). The copy gets its own handle; use `KernelBackend::copy`
    /// when `other` may be stale.
    pub fn copy_from(&mut self, other: &ImageBuffer) {
        self.reshape(other.width, other.height, other.layout);
        self.data.copy_from_slice(&other.data);
        self.touch();
    }

    /// Bottom-up readback of the current contents, cached until the next write.
    pub fn read_pixels(&mut self) -> &[u8] {
        if !self.mirror_valid {
            let mut mirror = std::mem::take(&mut self.mirror);
            self.read_pixels_into(&mut mirror);
            self.mirror = mirror;
            self.mirror_valid = true;
        }
        &self.mirror
    }

    /// Uncached bottom-up readback into a caller-owned vector. Used for
    /// buffers the caller only borrows immutably.
    pub fn read_pixels_into(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.data.len());
        let row = self.width as usize * self.channels();
        if row == 0 {
            return;
        }
        for chunk in self.data.chunks_exact(row).rev() {
            out.extend_from_slice(chunk);
        }
    }

    /// Inverse of `read_pixels`: store bottom-up rows into top-down storage.
    ///
    /// # Panics
    /// Panics if `bottom_up` does not match the buffer's byte length.
    pub fn write_pixels(&mut self, bottom_up: &[u8]) {
        assert_eq!(bottom_up.len(), self.data.len(), "write_pixels size mismatch");
        let row = self.width as usize * self.channels();
        if row > 0 {
            for (dst, src) in self
                .data
                .chunks_exact_mut(row)
                .zip(bottom_up.chunks_exact(row).rev())
            {
                dst.copy_from_slice(src);
            }
        }
        self.touch();
    }

    /// Readback wrapped with its geometry.
    pub fn readback(&mut self) -> ReadbackView<'_> {
        let (width, height, channels) = (self.width as usize, self.height as usize, self.channels());
        ReadbackView {
            width,
            height,
            channels,
            data: self.read_pixels(),
        }
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("mirror_valid", &self.mirror_valid)
            .field("handle", &self.handle.id)
            .field("generation", &self.generation)
            .field("host_stale", &self.host_stale)
            .finish()
    }
}

#[inline]
fn byte_len(width: u32, height: u32, layout: ChannelLayout) -> usize {
    width as usize * height as usize * layout.channels()
}

// ---------------------------------------------------------------------------
// ReadbackView
// ---------------------------------------------------------------------------

/// Borrowed bottom-up readback with its geometry.
#[derive(Debug, Clone, Copy)]
pub struct ReadbackView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8],
}

impl<'a> ReadbackView<'a> {
    /// Channel 0 of readback pixel (x, row) as a value in [0, 1].
    /// `row` counts from the bottom.
    #[inline]
    pub fn value(&self, x: usize, row: usize) -> f32 {
        self.data[(row * self.width + x) * self.channels] as f32 / 255.0
    }
}

// ---------------------------------------------------------------------------
// Plane
// ---------------------------------------------------------------------------

/// A dense f32 grid used as scratch space by the CPU kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    /// Zero-filled plane.
    ///
    /// # Panics
    /// Panics if either dimension is zero.
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "plane dimensions must be positive");
        Plane { width, height, data: vec![0.0; width * height] }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert!(width > 0 && height > 0, "plane dimensions must be positive");
        assert_eq!(data.len(), width * height, "data length must be width * height");
        Plane { width, height, data }
    }

    /// Channel `c` of `buf`, scaled to [0, 1].
    pub fn from_channel(buf: &ImageBuffer, c: usize) -> Self {
        let n = buf.channels();
        let data = buf.as_slice().iter().skip(c).step_by(n).map(|&v| v as f32 / 255.0).collect();
        Plane::from_vec(buf.width() as usize, buf.height() as usize, data)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    /// Clamp-to-edge access for signed coordinates.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[cy * self.width + cx]
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> ImageBuffer {
        let data = (0..width * height).map(|i| i as u8).collect();
        ImageBuffer::from_bytes(width, height, ChannelLayout::Single, data)
    }

    #[test]
    fn test_new_is_zeroed() {
        let buf = ImageBuffer::new(4, 3, ChannelLayout::Quad);
        assert_eq!(buf.as_slice().len(), 4 * 3 * 4);
        assert!(buf.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    #[should_panic(expected = "data length")]
    fn test_from_bytes_length_mismatch() {
        ImageBuffer::from_bytes(2, 2, ChannelLayout::Quad, vec![0; 4]);
    }

    #[test]
    fn test_readback_is_bottom_up() {
        let mut buf = ramp(3, 2);
        // storage: [0 1 2][3 4 5] → readback: [3 4 5][0 1 2]
        assert_eq!(buf.read_pixels(), &[3, 4, 5, 0, 1, 2]);
    }

    #[test]
    fn test_write_pixels_inverts_readback() {
        let mut buf = ramp(4, 3);
        let original = buf.as_slice().to_vec();
        let rb = buf.read_pixels().to_vec();
        let mut other = ImageBuffer::new(4, 3, ChannelLayout::Single);
        other.write_pixels(&rb);
        assert_eq!(other.as_slice(), &original[..]);
    }

    #[test]
    fn test_mirror_invalidated_by_write() {
        let mut buf = ramp(2, 2);
        assert_eq!(buf.read_pixels(), &[2, 3, 0, 1]);
        buf.set_pixel(0, 0, &[9]);
        assert_eq!(buf.read_pixels(), &[2, 3, 9, 1]);
        buf.as_mut_slice()[3] = 7;
        assert_eq!(buf.read_pixels(), &[2, 7, 9, 1]);
    }

    #[test]
    fn test_resize_same_size_keeps_contents() {
        let mut buf = ramp(3, 3);
        buf.resize(3, 3);
        assert_eq!(buf.get(2, 2, 0), 8);
    }

    #[test]
    fn test_reshape_changes_layout() {
        let mut buf = ramp(3, 3);
        buf.reshape(5, 2, ChannelLayout::Quad);
        assert_eq!(buf.dimensions(), (5, 2));
        assert_eq!(buf.channels(), 4);
        assert_eq!(buf.as_slice().len(), 40);
    }

    #[test]
    fn test_copy_from_matches_source() {
        let src = ramp(3, 2);
        let mut dst = ImageBuffer::new(0, 0, ChannelLayout::Quad);
        dst.copy_from(&src);
        assert_eq!(dst.layout(), ChannelLayout::Single);
        assert_eq!(dst.as_slice(), src.as_slice());
    }

    #[test]
    fn test_host_writes_bump_generation() {
        let mut buf = ramp(2, 2);
        let g0 = buf.generation();
        buf.set_pixel(1, 1, &[5]);
        assert!(buf.generation() > g0);
        let g1 = buf.generation();
        buf.resize(2, 2);
        assert_eq!(buf.generation(), g1, "same-size resize is not a write");
        let _ = buf.as_slice();
        let _ = buf.read_pixels();
        assert_eq!(buf.generation(), g1, "reads are not writes");
        buf.upload(&[1, 2, 3, 4]);
        assert!(buf.generation() > g1);
    }

    #[test]
    fn test_device_write_marks_host_stale_until_next_host_write() {
        let mut buf = ramp(2, 2);
        assert!(!buf.host_is_stale());
        let g = buf.generation();
        buf.mark_device_written();
        assert!(buf.host_is_stale());
        assert_eq!(buf.generation(), g);
        buf.write_pixels(&[0, 0, 0, 0]);
        assert!(!buf.host_is_stale());
        assert!(buf.generation() > g);
    }

    #[test]
    fn test_device_write_drops_cached_mirror() {
        let mut buf = ramp(2, 2);
        let _ = buf.read_pixels();
        buf.mark_device_written();
        assert!(format!("{buf:?}").contains("mirror_valid: false"));
    }

    #[test]
    fn test_handles_are_unique() {
        let a = ImageBuffer::new(1, 1, ChannelLayout::Single);
        let mut b = ImageBuffer::new(1, 1, ChannelLayout::Single);
        assert_ne!(a.device_handle().id(), b.device_handle().id());
        let id = b.device_handle().id();
        b.copy_from(&a);
        assert_eq!(b.device_handle().id(), id, "copying contents keeps identity");
    }

    #[test]
    fn test_empty_buffer_readback() {
        let mut buf = ImageBuffer::new(0, 0, ChannelLayout::Single);
        assert!(buf.is_empty());
        assert!(buf.read_pixels().is_empty());
    }

    #[test]
    fn test_plane_from_channel() {
        let buf = ImageBuffer::from_bytes(1, 2, ChannelLayout::Quad, vec![255, 0, 0, 0, 51, 0, 0, 0]);
        let p = Plane::from_channel(&buf, 0);
        assert_eq!(p.get(0, 0), 1.0);
        assert!((p.get(0, 1) - 0.2).abs() < 1e-6);
        assert_eq!(p.get_clamped(-3, 9), p.get(0, 1));
    }
}
