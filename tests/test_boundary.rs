// tests/test_boundary.rs — Integration tests for ray casting, box fitting
// and the full boundary pipeline.

use boundary_cv::geometry::{Point, Quad};
use boundary_cv::image::{ChannelLayout, ImageBuffer};
use boundary_cv::pipeline::Frame;
use boundary_cv::pipelines::{BoundaryPipeline, RAY_BOX, STRUCTURE};
use boundary_cv::raycast::{cast_rays, fit_box, RayBoxSettings};

const W: u32 = 640;
const H: u32 = 480;
// Square occupying x ∈ [220, 420), y ∈ [140, 340).
const X0: u32 = 220;
const X1: u32 = 420;
const Y0: u32 = 140;
const Y1: u32 = 340;

fn expected_corners() -> (Point, Point) {
    let tl = Point::new(X0 as f32 / (W - 1) as f32, Y0 as f32 / (H - 1) as f32);
    let br = Point::new((X1 - 1) as f32 / (W - 1) as f32, (Y1 - 1) as f32 / (H - 1) as f32);
    (tl, br)
}

fn assert_near(p: Point, q: Point, tol: f32) {
    assert!(
        (p.x - q.x).abs() <= tol && (p.y - q.y).abs() <= tol,
        "{p:?} is not within {tol} of {q:?}"
    );
}

/// Single-channel edge map with a one-pixel square outline.
fn outline() -> ImageBuffer {
    let mut buf = ImageBuffer::new(W, H, ChannelLayout::Single);
    for y in Y0..Y1 {
        for x in X0..X1 {
            if x == X0 || x == X1 - 1 || y == Y0 || y == Y1 - 1 {
                buf.set_pixel(x, y, &[255]);
            }
        }
    }
    buf
}

/// RGBA frame: white square on black.
fn square_frame() -> Vec<u8> {
    let mut rgba = vec![0u8; (W * H * 4) as usize];
    for y in Y0..Y1 {
        for x in X0..X1 {
            let o = ((y * W + x) * 4) as usize;
            rgba[o..o + 4].copy_from_slice(&[255, 255, 255, 255]);
        }
    }
    for px in rgba.chunks_exact_mut(4) {
        px[3] = 255;
    }
    rgba
}

// ===== Ray casting + fit =====

#[test]
fn outline_is_recovered_by_fitter() {
    let mut edges = outline();
    let view = edges.readback();
    let settings = RayBoxSettings::default();
    let hits = cast_rays(&view, &settings);
    assert_eq!(hits.len(), settings.ray_count, "every ray crosses the outline");

    let quad = fit_box(&hits, settings.trim_fraction).ordered();
    let (tl, br) = expected_corners();
    assert_near(quad.corners[0], tl, 0.02);
    assert_near(quad.corners[2], br, 0.02);
}

#[test]
fn hits_lie_on_the_outline() {
    let mut edges = outline();
    let view = edges.readback();
    let (tl, br) = expected_corners();
    for hit in cast_rays(&view, &RayBoxSettings::default()) {
        let on_vertical = (hit.x - tl.x).abs() < 0.01 || (hit.x - br.x).abs() < 0.01;
        let on_horizontal = (hit.y - tl.y).abs() < 0.01 || (hit.y - br.y).abs() < 0.01;
        assert!(on_vertical || on_horizontal, "stray hit {hit:?}");
    }
}

#[test]
fn blank_map_gives_default_square() {
    let mut edges = ImageBuffer::new(W, H, ChannelLayout::Single);
    let view = edges.readback();
    let hits = cast_rays(&view, &RayBoxSettings::default());
    assert!(hits.is_empty());
    assert_eq!(fit_box(&hits, 0.12), Quad::centered_square(0.5, 0.5, 0.25));
}

// ===== Full pipeline =====

#[test]
fn boundary_pipeline_finds_square() {
    let rgba = square_frame();
    let mut pipeline = BoundaryPipeline::new();
    let result = pipeline.render(&Frame::new(W, H, &rgba)).unwrap();
    let quad = result.quad.expect("ray-box is enabled").ordered();
    let (tl, br) = expected_corners();
    assert_near(quad.corners[0], tl, 0.02);
    assert_near(quad.corners[2], br, 0.02);
    assert_eq!(pipeline.surface().dimensions(), (W, H));
    assert_eq!(pipeline.frames_rendered(), 1);
}

#[test]
fn boundary_is_stable_across_frames() {
    let rgba = square_frame();
    let mut pipeline = BoundaryPipeline::new();
    let first = pipeline.render(&Frame::new(W, H, &rgba)).unwrap().quad;
    let second = pipeline.render(&Frame::new(W, H, &rgba)).unwrap().quad;
    assert_eq!(first, second);
}

#[test]
fn disabling_structure_still_fits_on_luma() {
    // Without tracing the fitter samples the downscaled luma directly and
    // hits the filled square's border.
    let rgba = square_frame();
    let mut pipeline = BoundaryPipeline::new();
    assert!(pipeline.set_enabled(STRUCTURE, false));
    let quad = pipeline.render(&Frame::new(W, H, &rgba)).unwrap().quad.unwrap().ordered();
    let (tl, br) = expected_corners();
    assert_near(quad.corners[0], tl, 0.02);
    assert_near(quad.corners[2], br, 0.02);
    assert!(pipeline.pass(RAY_BOX).unwrap().pass.enabled());
}
