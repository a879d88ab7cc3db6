// benches/benchmarks.rs -- Per-stage and full-pipeline benchmarks.
//
// Synthetic benchmarks on the CPU backend:
//   cargo bench
//
// Frames are 640x480 RGBA with a bright square on a dark background, the
// same scene the integration tests use.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use boundary_cv::backend::{CpuBackend, Kernel, KernelBackend};
use boundary_cv::continuity::TraceParams;
use boundary_cv::geometry::Point;
use boundary_cv::histogram::Histogram;
use boundary_cv::image::{ChannelLayout, ImageBuffer};
use boundary_cv::pass::Pass;
use boundary_cv::passes::StructurePass;
use boundary_cv::pipeline::Frame;
use boundary_cv::pipelines::{BoundaryPipeline, LinePipeline};
use boundary_cv::raycast::fit_box;

// ============================================================
// Helpers
// ============================================================

const W: u32 = 640;
const H: u32 = 480;

/// RGBA frame with a bright square offset by (dx, dy).
fn make_scene(dx: u32, dy: u32) -> Vec<u8> {
    let mut rgba = vec![0u8; (W * H * 4) as usize];
    for (i, px) in rgba.chunks_exact_mut(4).enumerate() {
        let (x, y) = (i as u32 % W, i as u32 / W);
        let inside = (220 + dx..420 + dx).contains(&x) && (140 + dy..340 + dy).contains(&y);
        let v = if inside { 230 } else { 25 + ((x + y) % 16) as u8 };
        px.copy_from_slice(&[v, v, v, 255]);
    }
    rgba
}

fn scene_luma() -> ImageBuffer {
    let input = ImageBuffer::from_bytes(W, H, ChannelLayout::Quad, make_scene(0, 0));
    let mut luma = ImageBuffer::new(W, H, ChannelLayout::Single);
    CpuBackend.run(&Kernel::Luma, &[&input], &mut luma).unwrap();
    luma
}

// ============================================================
// Per-stage benchmarks
// ============================================================

fn bench_kernels(c: &mut Criterion) {
    let luma = scene_luma();
    let mut out = ImageBuffer::new(W, H, ChannelLayout::Single);

    let mut group = c.benchmark_group("kernels");
    group.bench_function("bilateral_640x480", |b| {
        let k = Kernel::Bilateral { radius: 2, sigma_spatial: 2.0, sigma_range: 0.1 };
        b.iter(|| CpuBackend.run(&k, &[&luma], &mut out).unwrap())
    });
    group.bench_function("sobel_640x480", |b| {
        let mut grad = ImageBuffer::new(W, H, ChannelLayout::Quad);
        b.iter(|| CpuBackend.run(&Kernel::SobelGradients, &[&luma], &mut grad).unwrap())
    });
    group.finish();
}

fn bench_trace(c: &mut Criterion) {
    let luma = scene_luma();
    let mut pass = StructurePass::new(TraceParams::default());
    pass.resize(W, H);

    let mut group = c.benchmark_group("continuity");
    group.bench_function("structure_640x480", |b| {
        b.iter(|| {
            pass.apply(&mut CpuBackend, &luma).unwrap();
        })
    });
    group.finish();
}

fn bench_fit_box(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit_box");
    for n in [64usize, 256, 1024] {
        // Points walked around the perimeter of a square.
        let points: Vec<Point> = (0..n)
            .map(|i| {
                let t = i as f32 / n as f32 * 4.0;
                let f = t.fract() * 0.6;
                match t as usize {
                    0 => Point::new(0.2 + f, 0.2),
                    1 => Point::new(0.8, 0.2 + f),
                    2 => Point::new(0.8 - f, 0.8),
                    _ => Point::new(0.2, 0.8 - f),
                }
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("points", n), &points, |b, pts| {
            b.iter(|| fit_box(pts, 0.12))
        });
    }
    group.finish();
}

fn bench_histogram(c: &mut Criterion) {
    let values: Vec<f32> = (0..4096).map(|i| ((i * 37) % 1000) as f32 / 1000.0).collect();

    let mut group = c.benchmark_group("histogram");
    group.bench_function("calculate_4096x64", |b| {
        let mut h = Histogram::new(64, values.len());
        b.iter(|| {
            h.reset();
            for &v in &values {
                h.add_value(v).unwrap();
            }
            h.calculate();
            h.percentile(0.9)
        })
    });
    group.finish();
}

// ============================================================
// Full pipelines
// ============================================================

fn bench_pipelines(c: &mut Criterion) {
    let frames: Vec<Vec<u8>> = (0..10).map(|i| make_scene(i * 3, i * 2)).collect();

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    group.bench_function("boundary_640x480_10frames", |b| {
        let mut p = BoundaryPipeline::new();
        b.iter(|| {
            for rgba in &frames {
                p.render(&Frame::new(W, H, rgba)).unwrap();
            }
        })
    });
    group.bench_function("lines_640x480_10frames", |b| {
        let mut p = LinePipeline::new();
        b.iter(|| {
            for rgba in &frames {
                p.render(&Frame::new(W, H, rgba)).unwrap();
            }
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_kernels,
    bench_trace,
    bench_fit_box,
    bench_histogram,
    bench_pipelines
);
criterion_main!(benches);
