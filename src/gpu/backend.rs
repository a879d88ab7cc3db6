// gpu/backend.rs — `KernelBackend` on wgpu compute shaders.
//
// One compute pipeline per kernel kind, compiled on first use and cached:
//
//   common.wgsl ++ <kernel>.wgsl ──{{WG_X}}/{{WG_Y}}──▶ ShaderModule
//                                                      ▼
//                                    (ComputePipeline, BindGroupLayout)
//
// Bind group layout, for a kernel with n inputs:
//
//   binding 0..n   texture_2d<f32>                      inputs
//   binding n      texture_storage_2d<rgba8unorm,write> output
//   binding n+1    uniform Params                       sizes + parameters
//
// Each `ImageBuffer` gets one long-lived texture, keyed by its
// `DeviceHandle` and dropped once the buffer is gone:
//
//   input   host generation changed? ──yes──▶ write_texture into it
//   output  same size? ──no──▶ new texture; dispatch; mark host stale
//
// `run` only submits. Nothing waits on the device until a host consumer
// calls `sync` or `read_back`, which map every requested texture from the
// staging pool in a single submit and a single poll. Temporal history is
// copied texture to texture.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytemuck::{Pod, Zeroable};
use log::{debug, trace};

use crate::backend::{prepare, DogEncoding, Kernel, KernelBackend};
use crate::error::PipelineError;
use crate::gpu::device::{DeviceProfile, GpuDevice, GpuError};
use crate::gpu::image::{download, GpuImage, StagingPool, TEXTURE_FORMAT};
use crate::image::{ChannelLayout, DeviceHandle, ImageBuffer};

const COMMON: &str = include_str!("../shaders/common.wgsl");

fn kernel_source(kernel: &Kernel) -> &'static str {
    match kernel {
        Kernel::Luma => include_str!("../shaders/luma.wgsl"),
        Kernel::Orientation { .. } => include_str!("../shaders/orientation.wgsl"),
        Kernel::TemporalMedian => include_str!("../shaders/temporal_median.wgsl"),
        Kernel::Bilateral { .. } => include_str!("../shaders/bilateral.wgsl"),
        Kernel::Downscale => include_str!("../shaders/downscale.wgsl"),
        Kernel::SobelGradients => include_str!("../shaders/sobel_gradients.wgsl"),
        Kernel::Continuity => include_str!("../shaders/continuity.wgsl"),
        Kernel::HoughSamples { .. } => include_str!("../shaders/hough_samples.wgsl"),
        Kernel::DifferenceOfGaussians { .. } => {
            include_str!("../shaders/difference_of_gaussians.wgsl")
        }
        Kernel::QuadOverlay { .. } => include_str!("../shaders/quad_overlay.wgsl"),
        Kernel::LowCutoff { .. } => include_str!("../shaders/low_cutoff.wgsl"),
        Kernel::MagnitudeGate { .. } => include_str!("../shaders/magnitude_gate.wgsl"),
    }
}

// ---------------------------------------------------------------------------
// Uniforms
// ---------------------------------------------------------------------------

/// Mirrors `Params` in common.wgsl (80 bytes, vec4-aligned).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct KernelParams {
    in_size: [u32; 2],
    out_size: [u32; 2],
    p0: [f32; 4],
    p1: [f32; 4],
    p2: [f32; 4],
    p3: [f32; 4],
}

#[inline]
fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl KernelParams {
    pub(crate) fn new(kernel: &Kernel, input: &ImageBuffer, out_size: (u32, u32)) -> Self {
        let mut p = KernelParams {
            in_size: [input.width(), input.height()],
            out_size: [out_size.0, out_size.1],
            ..KernelParams::zeroed()
        };
        match kernel {
            Kernel::Orientation { flip_x, flip_y } => {
                p.p0 = [flag(*flip_x), flag(*flip_y), 0.0, 0.0];
            }
            Kernel::Bilateral { radius, sigma_spatial, sigma_range } => {
                p.p0 = [*radius as f32, *sigma_spatial, *sigma_range, 0.0];
            }
            Kernel::HoughSamples { diagonal_band, min_magnitude } => {
                p.p0 = [*diagonal_band, *min_magnitude, 0.0, 0.0];
            }
            Kernel::DifferenceOfGaussians { sigma_small, sigma_large, encoding } => {
                let e = flag(*encoding == DogEncoding::Signed32);
                p.p0 = [*sigma_small, *sigma_large, e, 0.0];
            }
            Kernel::QuadOverlay { corners, thickness, color } => {
                if let Some(c) = corners {
                    p.p0 = [c[0].x, c[0].y, c[1].x, c[1].y];
                    p.p1 = [c[2].x, c[2].y, c[3].x, c[3].y];
                }
                let single = input.layout() == ChannelLayout::Single;
                p.p2 = [*thickness, flag(corners.is_some()), flag(single), 0.0];
                p.p3 = color.map(|v| v as f32 / 255.0);
            }
            Kernel::LowCutoff { cutoff: level } | Kernel::MagnitudeGate { threshold: level } => {
                let single = input.layout() == ChannelLayout::Single;
                p.p0 = [*level, flag(single), 0.0, 0.0];
            }
            Kernel::Luma
            | Kernel::TemporalMedian
            | Kernel::Downscale
            | Kernel::SobelGradients
            | Kernel::Continuity => {}
        }
        p
    }
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    /// Rewritten before every dispatch; each run is its own submit.
    params: wgpu::Buffer,
}

impl KernelPipeline {
    fn new(gpu: &GpuDevice, kernel: &Kernel) -> Self {
        let name = kernel.name();
        let source = format!("{COMMON}\n{}", kernel_source(kernel))
            .replace("{{WG_X}}", &gpu.workgroup_size.x.to_string())
            .replace("{{WG_Y}}", &gpu.workgroup_size.y.to_string());
        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let n = kernel.input_count() as u32;
        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..n)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                },
                count: None,
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: n,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: TEXTURE_FORMAT,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: n + 1,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(name),
            entries: &entries,
        });
        let layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(name),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(name),
            layout: Some(&layout),
            module: &shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        let params = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(name),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        debug!("compiled {name} kernel");
        KernelPipeline { pipeline, bgl, params }
    }
}

// ---------------------------------------------------------------------------
// Residency
// ---------------------------------------------------------------------------

/// The texture standing in for one `ImageBuffer`, and the host generation
/// it was last brought in line with.
struct Resident {
    owner: Weak<DeviceHandle>,
    image: GpuImage,
    generation: u64,
}

fn resident_image(resident: &HashMap<u64, Resident>, id: u64) -> Result<&GpuImage, GpuError> {
    resident.get(&id).map(|r| &r.image).ok_or(GpuError::NotResident(id))
}

/// Host⇄device traffic since the backend was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Texture writes from host bytes.
    pub uploads: u64,
    /// Blocking waits for readbacks (one per `sync`/`read_back` batch).
    pub waits: u64,
    /// Textures currently held for live buffers.
    pub resident: usize,
    /// Staging buffers allocated so far.
    pub staging_buffers: usize,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct GpuBackend {
    gpu: GpuDevice,
    pipelines: HashMap<&'static str, KernelPipeline>,
    resident: HashMap<u64, Resident>,
    staging: StagingPool,
    uploads: u64,
    waits: u64,
}

impl GpuBackend {
    pub fn new(profile: DeviceProfile) -> Result<Self, GpuError> {
        Ok(Self::with_device(GpuDevice::with_profile(profile)?))
    }

    pub fn with_device(gpu: GpuDevice) -> Self {
        GpuBackend {
            gpu,
            pipelines: HashMap::new(),
            resident: HashMap::new(),
            staging: StagingPool::new(),
            uploads: 0,
            waits: 0,
        }
    }

    pub fn device(&self) -> &GpuDevice {
        &self.gpu
    }

    pub fn transfer_stats(&self) -> TransferStats {
        TransferStats {
            uploads: self.uploads,
            waits: self.waits,
            resident: self.resident.len(),
            staging_buffers: self.staging.allocated(),
        }
    }

    /// Release textures whose buffers have been dropped.
    fn evict_dropped(&mut self) {
        let before = self.resident.len();
        self.resident.retain(|_, r| r.owner.strong_count() > 0);
        if self.resident.len() != before {
            trace!("released {} textures", before - self.resident.len());
        }
    }

    /// Bring `buf`'s texture in line with its host bytes, writing only when
    /// the host changed them since the last sync.
    fn stage_input(&mut self, buf: &ImageBuffer) -> Result<u64, GpuError> {
        let id = buf.device_handle().id();
        if let Some(r) = self.resident.get_mut(&id) {
            if r.image.size() == buf.dimensions() {
                if r.generation != buf.generation() {
                    if buf.host_is_stale() {
                        return Err(GpuError::NotResident(id));
                    }
                    r.image.write(&self.gpu, buf);
                    r.generation = buf.generation();
                    self.uploads += 1;
                }
                return Ok(id);
            }
        }
        if buf.host_is_stale() {
            return Err(GpuError::NotResident(id));
        }
        let (w, h) = buf.dimensions();
        let image = GpuImage::create(&self.gpu, w, h, "resident");
        image.write(&self.gpu, buf);
        self.uploads += 1;
        self.resident.insert(
            id,
            Resident { owner: Arc::downgrade(buf.device_handle()), image, generation: buf.generation() },
        );
        Ok(id)
    }

    /// A texture of `buf`'s size that the caller will fully overwrite.
    fn stage_output(&mut self, buf: &ImageBuffer) -> u64 {
        let id = buf.device_handle().id();
        let reusable = self.resident.get(&id).is_some_and(|r| r.image.size() == buf.dimensions());
        if !reusable {
            let (w, h) = buf.dimensions();
            let image = GpuImage::create(&self.gpu, w, h, "resident");
            self.resident.insert(
                id,
                Resident { owner: Arc::downgrade(buf.device_handle()), image, generation: buf.generation() },
            );
        }
        id
    }

    /// Record that the device now holds `buf`'s latest contents.
    fn device_wrote(&mut self, id: u64, buf: &mut ImageBuffer) {
        buf.mark_device_written();
        if let Some(r) = self.resident.get_mut(&id) {
            r.generation = buf.generation();
        }
    }

    /// After `download` refreshed host bytes, the textures are current again.
    fn host_caught_up(&mut self, bufs: &[&mut ImageBuffer]) {
        for buf in bufs {
            if let Some(r) = self.resident.get_mut(&buf.device_handle().id()) {
                r.generation = buf.generation();
            }
        }
    }
}

impl KernelBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn run(
        &mut self,
        kernel: &Kernel,
        inputs: &[&ImageBuffer],
        output: &mut ImageBuffer,
    ) -> Result<(), PipelineError> {
        prepare(kernel, inputs, output)?;
        if output.is_empty() || inputs[0].is_empty() {
            return Ok(());
        }
        self.evict_dropped();
        let input_ids = inputs.iter().map(|b| self.stage_input(b)).collect::<Result<Vec<_>, _>>()?;
        let out_id = self.stage_output(output);

        let (ow, oh) = output.dimensions();
        let params = KernelParams::new(kernel, inputs[0], (ow, oh));
        let gpu = &self.gpu;
        let kp = self
            .pipelines
            .entry(kernel.name())
            .or_insert_with(|| KernelPipeline::new(gpu, kernel));
        gpu.queue.write_buffer(&kp.params, 0, bytemuck::bytes_of(&params));

        let sources = input_ids
            .iter()
            .map(|&id| resident_image(&self.resident, id))
            .collect::<Result<Vec<_>, _>>()?;
        let target = resident_image(&self.resident, out_id)?;

        let n = sources.len() as u32;
        let mut entries: Vec<wgpu::BindGroupEntry> = sources
            .iter()
            .zip(0..)
            .map(|(img, binding)| wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(&img.view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: n,
            resource: wgpu::BindingResource::TextureView(&target.view),
        });
        entries.push(wgpu::BindGroupEntry { binding: n + 1, resource: kp.params.as_entire_binding() });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name()),
            layout: &kp.bgl,
            entries: &entries,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(kernel.name()) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kp.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (dx, dy) = gpu.dispatch_size(ow, oh);
            pass.dispatch_workgroups(dx, dy, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        self.device_wrote(out_id, output);
        Ok(())
    }

    fn copy(&mut self, src: &ImageBuffer, dst: &mut ImageBuffer) -> Result<(), PipelineError> {
        dst.reshape(src.width(), src.height(), src.layout());
        if src.is_empty() {
            return Ok(());
        }
        self.evict_dropped();
        let src_id = self.stage_input(src)?;
        let dst_id = self.stage_output(dst);
        let from = resident_image(&self.resident, src_id)?;
        let to = resident_image(&self.resident, dst_id)?;
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("copy") });
        from.encode_copy(&mut encoder, to);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        self.device_wrote(dst_id, dst);
        Ok(())
    }

    fn sync(&mut self, bufs: &mut [&mut ImageBuffer]) -> Result<(), PipelineError> {
        let mut stale: Vec<&mut ImageBuffer> =
            bufs.iter_mut().filter(|b| b.host_is_stale()).map(|b| &mut **b).collect();
        if stale.is_empty() {
            return Ok(());
        }
        let images = stale
            .iter()
            .map(|b| resident_image(&self.resident, b.device_handle().id()))
            .collect::<Result<Vec<_>, _>>()?;
        download(&self.gpu, &mut self.staging, &images, &mut stale)?;
        self.waits += 1;
        self.host_caught_up(&stale);
        Ok(())
    }

    fn read_back(
        &mut self,
        sources: &[&ImageBuffer],
        targets: &mut [&mut ImageBuffer],
    ) -> Result<(), PipelineError> {
        assert_eq!(sources.len(), targets.len(), "read_back needs one target per source");
        let mut images = Vec::new();
        let mut pending: Vec<&mut ImageBuffer> = Vec::new();
        for (src, dst) in sources.iter().zip(targets.iter_mut()) {
            if src.host_is_stale() {
                images.push(resident_image(&self.resident, src.device_handle().id())?);
                dst.reshape(src.width(), src.height(), src.layout());
                pending.push(&mut **dst);
            } else {
                dst.copy_from(src);
            }
        }
        if !images.is_empty() {
            download(&self.gpu, &mut self.staging, &images, &mut pending)?;
            self.waits += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::assert_gpu_subprocess_ok;
    use crate::backend::CpuBackend;
    use crate::codec::{decode_direction, decode_f32, decode_gradient, quad_at};
    use crate::geometry::Point;

    #[test]
    fn test_params_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<KernelParams>(), 80);
    }

    #[test]
    fn test_params_overlay_packing() {
        let input = ImageBuffer::new(8, 6, ChannelLayout::Single);
        let corners = [
            Point::new(0.1, 0.2),
            Point::new(0.9, 0.2),
            Point::new(0.9, 0.8),
            Point::new(0.1, 0.8),
        ];
        let kernel = Kernel::QuadOverlay { corners: Some(corners), thickness: 1.5, color: [255, 0, 0, 255] };
        let p = KernelParams::new(&kernel, &input, (16, 12));
        assert_eq!(p.in_size, [8, 6]);
        assert_eq!(p.out_size, [16, 12]);
        assert_eq!(p.p0, [0.1, 0.2, 0.9, 0.2]);
        assert_eq!(p.p1, [0.9, 0.8, 0.1, 0.8]);
        assert_eq!(p.p2, [1.5, 1.0, 1.0, 0.0]);
        assert_eq!(p.p3, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_params_orientation_flags() {
        let input = ImageBuffer::new(4, 4, ChannelLayout::Single);
        let p = KernelParams::new(&Kernel::Orientation { flip_x: false, flip_y: true }, &input, (4, 4));
        assert_eq!(p.p0, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_params_threshold_packing() {
        let single = ImageBuffer::new(4, 4, ChannelLayout::Single);
        let quad = ImageBuffer::new(4, 4, ChannelLayout::Quad);
        let p = KernelParams::new(&Kernel::LowCutoff { cutoff: 0.25 }, &single, (4, 4));
        assert_eq!(p.p0, [0.25, 1.0, 0.0, 0.0]);
        let p = KernelParams::new(&Kernel::MagnitudeGate { threshold: 0.5 }, &quad, (4, 4));
        assert_eq!(p.p0, [0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_every_kernel_has_source() {
        let kernels = [
            Kernel::Luma,
            Kernel::Orientation { flip_x: false, flip_y: false },
            Kernel::TemporalMedian,
            Kernel::Bilateral { radius: 1, sigma_spatial: 1.0, sigma_range: 0.1 },
            Kernel::Downscale,
            Kernel::SobelGradients,
            Kernel::Continuity,
            Kernel::HoughSamples { diagonal_band: 0.1, min_magnitude: 0.1 },
            Kernel::DifferenceOfGaussians { sigma_small: 1.0, sigma_large: 2.0, encoding: DogEncoding::Float32 },
            Kernel::QuadOverlay { corners: None, thickness: 1.0, color: [0; 4] },
            Kernel::LowCutoff { cutoff: 0.1 },
            Kernel::MagnitudeGate { threshold: 0.2 },
        ];
        for k in &kernels {
            let src = kernel_source(k);
            assert!(src.contains("{{WG_X}}"), "{} lacks a workgroup placeholder", k.name());
            assert!(src.contains(&format!("@binding({})", k.input_count() + 1)), "{}", k.name());
        }
    }

    // ---- GPU vs CPU parity (subprocess, see gpu::assert_gpu_subprocess_ok) ----

    /// A bright tilted square with some texture, as RGBA.
    fn test_frame(w: u32, h: u32) -> ImageBuffer {
        let mut data = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let (u, v) = (x as f32 - w as f32 / 2.0, y as f32 - h as f32 / 2.0);
                let inside = (u * 0.9 + v * 0.3).abs() < 20.0 && (v * 0.9 - u * 0.3).abs() < 20.0;
                let base = if inside { 220 } else { 30 };
                let noise = ((x * 31 + y * 17) % 7) as u8;
                data.extend_from_slice(&[base + noise, base, base - noise, 255]);
            }
        }
        ImageBuffer::from_bytes(w, h, ChannelLayout::Quad, data)
    }

    fn run_both(gpu: &mut GpuBackend, kernel: &Kernel, inputs: &[&ImageBuffer]) -> (ImageBuffer, ImageBuffer) {
        let mut a = ImageBuffer::new(0, 0, ChannelLayout::Single);
        let mut b = ImageBuffer::new(0, 0, ChannelLayout::Single);
        CpuBackend.run(kernel, inputs, &mut a).unwrap();
        gpu.run(kernel, inputs, &mut b).unwrap();
        gpu.sync(&mut [&mut b]).unwrap();
        assert_eq!(a.dimensions(), b.dimensions());
        assert_eq!(a.layout(), b.layout());
        (a, b)
    }

    fn max_byte_diff(a: &ImageBuffer, b: &ImageBuffer) -> u8 {
        a.as_slice().iter().zip(b.as_slice()).map(|(x, y)| x.abs_diff(*y)).max().unwrap_or(0)
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_filters_match_cpu() {
        let mut gpu = GpuBackend::new(DeviceProfile::Native).expect("need Vulkan GPU");
        let frame = test_frame(67, 45);

        let (cpu_luma, gpu_luma) = run_both(&mut gpu, &Kernel::Luma, &[&frame]);
        assert!(max_byte_diff(&cpu_luma, &gpu_luma) <= 1, "luma");

        let flip = Kernel::Orientation { flip_x: true, flip_y: true };
        let (a, b) = run_both(&mut gpu, &flip, &[&cpu_luma]);
        assert_eq!(a.as_slice(), b.as_slice(), "orientation");

        let (a, b) = run_both(&mut gpu, &Kernel::TemporalMedian, &[&cpu_luma, &a, &b, &cpu_luma, &a]);
        assert_eq!(a.as_slice(), b.as_slice(), "temporal median");

        let bilateral = Kernel::Bilateral { radius: 2, sigma_spatial: 2.0, sigma_range: 0.1 };
        let (a, b) = run_both(&mut gpu, &bilateral, &[&cpu_luma]);
        assert!(max_byte_diff(&a, &b) <= 1, "bilateral");

        let mut small_cpu = ImageBuffer::new(34, 23, ChannelLayout::Single);
        let mut small_gpu = ImageBuffer::new(34, 23, ChannelLayout::Single);
        CpuBackend.run(&Kernel::Downscale, &[&cpu_luma], &mut small_cpu).unwrap();
        gpu.run(&Kernel::Downscale, &[&cpu_luma], &mut small_gpu).unwrap();
        gpu.sync(&mut [&mut small_gpu]).unwrap();
        assert_eq!(small_cpu.as_slice(), small_gpu.as_slice(), "downscale");

        for kernel in [Kernel::LowCutoff { cutoff: 0.3 }, Kernel::MagnitudeGate { threshold: 0.5 }] {
            let (a, b) = run_both(&mut gpu, &kernel, &[&frame]);
            assert_eq!(a.as_slice(), b.as_slice(), "{} on rgba", kernel.name());
            let (a, b) = run_both(&mut gpu, &kernel, &[&cpu_luma]);
            assert_eq!(a.as_slice(), b.as_slice(), "{} on luma", kernel.name());
        }
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gradient_family_matches_cpu() {
        let mut gpu = GpuBackend::new(DeviceProfile::Native).expect("need Vulkan GPU");
        let mut luma = ImageBuffer::new(0, 0, ChannelLayout::Single);
        CpuBackend.run(&Kernel::Luma, &[&test_frame(64, 48)], &mut luma).unwrap();

        let (cpu_grad, gpu_grad) = run_both(&mut gpu, &Kernel::SobelGradients, &[&luma]);
        let n = (64 * 48) as usize;
        for i in 0..n {
            let a = decode_gradient(quad_at(cpu_grad.as_slice(), i));
            let b = decode_gradient(quad_at(gpu_grad.as_slice(), i));
            assert!((a.gx - b.gx).abs() < 1e-4 && (a.gy - b.gy).abs() < 1e-4, "sobel at {i}");
        }

        let (a, b) = run_both(&mut gpu, &Kernel::Continuity, &[&cpu_grad]);
        let same_dir = (0..n)
            .filter(|&i| {
                decode_direction(quad_at(a.as_slice(), i)).direction
                    == decode_direction(quad_at(b.as_slice(), i)).direction
            })
            .count();
        assert!(same_dir * 100 >= n * 99, "continuity directions: {same_dir}/{n}");

        let hough = Kernel::HoughSamples { diagonal_band: std::f32::consts::PI / 16.0, min_magnitude: 0.1 };
        let (a, b) = run_both(&mut gpu, &hough, &[&cpu_grad]);
        assert!(max_byte_diff(&a, &b) <= 1, "hough samples");

        let dog = Kernel::DifferenceOfGaussians { sigma_small: 1.0, sigma_large: 2.0, encoding: DogEncoding::Float32 };
        let (a, b) = run_both(&mut gpu, &dog, &[&luma]);
        for i in 0..n {
            let (x, y) = (decode_f32(quad_at(a.as_slice(), i)), decode_f32(quad_at(b.as_slice(), i)));
            assert!((x - y).abs() < 1e-4, "dog at {i}: {x} vs {y}");
        }
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_overlay_matches_cpu() {
        let mut gpu = GpuBackend::new(DeviceProfile::Native).expect("need Vulkan GPU");
        let input = ImageBuffer::from_bytes(4, 3, ChannelLayout::Single, (0..12).map(|v| v * 20).collect());
        let corners = [
            Point::new(0.25, 0.25),
            Point::new(0.75, 0.25),
            Point::new(0.75, 0.75),
            Point::new(0.25, 0.75),
        ];
        let kernel = Kernel::QuadOverlay { corners: Some(corners), thickness: 1.0, color: [0, 255, 0, 255] };
        let mut a = ImageBuffer::new(40, 30, ChannelLayout::Quad);
        let mut b = ImageBuffer::new(40, 30, ChannelLayout::Quad);
        CpuBackend.run(&kernel, &[&input], &mut a).unwrap();
        gpu.run(&kernel, &[&input], &mut b).unwrap();
        gpu.sync(&mut [&mut b]).unwrap();
        let differing = a.as_slice().chunks_exact(4).zip(b.as_slice().chunks_exact(4)).filter(|(x, y)| x != y).count();
        assert!(differing <= 4, "{differing} overlay pixels differ");
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_chain_stays_on_device() {
        let mut gpu = GpuBackend::new(DeviceProfile::Native).expect("need Vulkan GPU");
        let frame = test_frame(64, 48);
        let mut luma = ImageBuffer::new(0, 0, ChannelLayout::Single);
        let mut grads = ImageBuffer::new(0, 0, ChannelLayout::Quad);
        let mut links = ImageBuffer::new(0, 0, ChannelLayout::Quad);
        let mut slot = ImageBuffer::new(0, 0, ChannelLayout::Single);

        for round in 0..3 {
            gpu.run(&Kernel::Luma, &[&frame], &mut luma).unwrap();
            gpu.copy(&luma, &mut slot).unwrap();
            gpu.run(&Kernel::SobelGradients, &[&luma], &mut grads).unwrap();
            gpu.run(&Kernel::Continuity, &[&grads], &mut links).unwrap();
            assert!(luma.host_is_stale() && grads.host_is_stale() && links.host_is_stale());
            assert!(slot.host_is_stale());
            gpu.sync(&mut [&mut grads, &mut links]).unwrap();
            let stats = gpu.transfer_stats();
            assert_eq!(stats.uploads, 1, "round {round}: only the frame was ever written");
            assert_eq!(stats.waits, round + 1, "one wait per sync batch");
            assert_eq!(stats.staging_buffers, 2, "staging reused across rounds");
        }

        let mut cpu_grads = ImageBuffer::new(0, 0, ChannelLayout::Quad);
        let mut cpu_luma = ImageBuffer::new(0, 0, ChannelLayout::Single);
        CpuBackend.run(&Kernel::Luma, &[&frame], &mut cpu_luma).unwrap();
        CpuBackend.run(&Kernel::SobelGradients, &[&cpu_luma], &mut cpu_grads).unwrap();
        for i in 0..64 * 48 {
            let a = decode_gradient(quad_at(cpu_grads.as_slice(), i));
            let b = decode_gradient(quad_at(grads.as_slice(), i));
            assert!((a.gx - b.gx).abs() < 1e-2 && (a.gy - b.gy).abs() < 1e-2, "chained sobel at {i}");
        }

        let mut host = ImageBuffer::new(0, 0, ChannelLayout::Single);
        gpu.read_back(&[&slot], &mut [&mut host]).unwrap();
        assert!(slot.host_is_stale(), "read_back leaves the source alone");
        gpu.sync(&mut [&mut luma]).unwrap();
        assert_eq!(host.as_slice(), luma.as_slice(), "texture copy matches its source");

        // A host-side write is picked up by the next run.
        let before = gpu.transfer_stats().uploads;
        luma.as_mut_slice().fill(0);
        gpu.run(&Kernel::SobelGradients, &[&luma], &mut grads).unwrap();
        assert_eq!(gpu.transfer_stats().uploads, before + 1);

        let resident = gpu.transfer_stats().resident;
        drop(slot);
        gpu.run(&Kernel::Continuity, &[&grads], &mut links).unwrap();
        assert_eq!(gpu.transfer_stats().resident, resident - 1, "dropped buffer released");
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_chain_stays_on_device() {
        assert_gpu_subprocess_ok("gpu::backend::tests::inner_chain_stays_on_device");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_filters_match_cpu() {
        assert_gpu_subprocess_ok("gpu::backend::tests::inner_filters_match_cpu");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gradient_family_matches_cpu() {
        assert_gpu_subprocess_ok("gpu::backend::tests::inner_gradient_family_matches_cpu");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_overlay_matches_cpu() {
        assert_gpu_subprocess_ok("gpu::backend::tests::inner_overlay_matches_cpu");
    }
}
