// continuity.rs — Greedy edge tracing over per-pixel continuation links.
//
// Input is two readbacks of the same frame (bottom-up rows):
//   continuity  direction+confidence pairs from the continuity kernel
//   gradients   gradient pairs from the Sobel kernel
//
// Each pixel becomes a `ContinuityRecord`: where its edge continues, how
// confident that link is, how strong the edge is. Tracing then walks the
// strongest records first:
//
//   1. sort by score (bucketed by `score_epsilon`), ties by magnitude
//   2. seed from every unvisited record whose score ≥ seed_threshold
//   3. follow `next` while the record is unvisited, confident and strong,
//      stamping its magnitude into the output luma map
//
// The luma map is a confidence-weighted skeleton of the dominant edges. It
// is NOT a polygon; the ray-cast fitter samples it afterwards.
//
// TERMINATION
// ───────────
// Every step marks a record visited before moving on, and a visited record
// ends the walk. A walk therefore touches each record at most once per
// frame, whatever the link structure (self-loops and cycles included).
// `max_trace_length` additionally caps a single stroke.

use std::cmp::Ordering;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::codec::{decode_direction, decode_gradient, quad_at};

/// One pixel's link in the continuity graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuityRecord {
    /// Offset (dx, dy) to the continuation in readback space, `None` if the
    /// pixel has no continuation.
    pub offset: Option<(i32, i32)>,
    pub confidence: f32,
    pub magnitude: f32,
    /// Linear index of the continuation, `None` when the offset is absent or
    /// leaves the image.
    pub next: Option<usize>,
    /// `confidence × magnitude`.
    pub score: f32,
    pub visited: bool,
}

impl ContinuityRecord {
    pub fn new(offset: Option<(i32, i32)>, confidence: f32, magnitude: f32, next: Option<usize>) -> Self {
        ContinuityRecord {
            offset,
            confidence,
            magnitude,
            next,
            score: confidence * magnitude,
            visited: false,
        }
    }
}

/// Tracing thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceParams {
    pub seed_threshold: f32,
    pub continuity_threshold: f32,
    pub min_magnitude: f32,
    pub score_epsilon: f32,
    pub max_trace_length: usize,
}

impl Default for TraceParams {
    fn default() -> Self {
        TraceParams {
            seed_threshold: 0.96,
            continuity_threshold: 0.8,
            min_magnitude: 0.04,
            score_epsilon: 0.01,
            max_trace_length: 4096,
        }
    }
}

/// Per-frame tracing summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    /// Seeds that started a stroke.
    pub strokes: usize,
    /// Pixels stamped into the luma map.
    pub traced: usize,
}

/// The per-frame graph. Rebuilt from scratch every frame; the record and
/// order vectors keep their allocations between frames.
#[derive(Debug, Default, Clone)]
pub struct ContinuityGraph {
    width: usize,
    height: usize,
    records: Vec<ContinuityRecord>,
    order: Vec<usize>,
}

impl ContinuityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit records (row-major, readback order).
    ///
    /// # Panics
    /// Panics if `records.len() != width * height`.
    pub fn from_records(width: usize, height: usize, records: Vec<ContinuityRecord>) -> Self {
        assert_eq!(records.len(), width * height, "one record per pixel");
        ContinuityGraph { width, height, records, order: Vec::new() }
    }

    /// Decode both readbacks into records.
    ///
    /// # Panics
    /// Panics if either slice is not `width * height * 4` bytes.
    pub fn rebuild(&mut self, width: usize, height: usize, continuity: &[u8], gradients: &[u8]) {
        let n = width * height;
        assert_eq!(continuity.len(), n * 4, "continuity readback size");
        assert_eq!(gradients.len(), n * 4, "gradient readback size");
        self.width = width;
        self.height = height;
        self.records.clear();
        self.records.reserve(n);
        for i in 0..n {
            let sample = decode_direction(quad_at(continuity, i));
            let magnitude = decode_gradient(quad_at(gradients, i)).magnitude();
            let offset = sample.offset();
            let next = offset.and_then(|(dx, dy)| {
                let x = (i % width) as i64 + dx as i64;
                let y = (i / width) as i64 + dy as i64;
                (x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height)
                    .then(|| y as usize * width + x as usize)
            });
            self.records.push(ContinuityRecord::new(offset, sample.confidence, magnitude, next));
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn records(&self) -> &[ContinuityRecord] {
        &self.records
    }

    /// Trace strokes and stamp visited magnitudes into `luma` (one byte per
    /// pixel, readback order). `luma` is resized and cleared first.
    pub fn trace(&mut self, params: &TraceParams, luma: &mut Vec<u8>) -> TraceStats {
        luma.clear();
        luma.resize(self.records.len(), 0);
        for r in &mut self.records {
            r.visited = false;
        }

        // Scores are floored into fixed-width buckets of `eps`; two scores
        // tie only when they share a bucket, not whenever |a - b| < eps.
        let eps = params.score_epsilon.max(f32::EPSILON);
        let bucket = |score: f32| (score / eps).floor() as i64;
        let records = &self.records;
        self.order.clear();
        self.order.extend(0..records.len());
        self.order.sort_unstable_by(|&a, &b| {
            let (ra, rb) = (&records[a], &records[b]);
            bucket(rb.score)
                .cmp(&bucket(ra.score))
                .then_with(|| rb.magnitude.total_cmp(&ra.magnitude))
                .then(a.cmp(&b))
        });

        let seed_bucket = bucket(params.seed_threshold);
        let mut stats = TraceStats::default();
        for k in 0..self.order.len() {
            let seed = self.order[k];
            let record = self.records[seed];
            if bucket(record.score) < seed_bucket {
                break;
            }
            if record.visited || record.score < params.seed_threshold {
                continue;
            }
            stats.strokes += 1;
            stats.traced += self.walk(seed, params, luma);
        }
        debug!(
            "continuity trace: {} strokes, {} pixels over {}x{}",
            stats.strokes, stats.traced, self.width, self.height
        );
        stats
    }

    /// Follow links from `seed`. The seed itself is always stamped; every
    /// later hop must pass the continuation tests.
    fn walk(&mut self, seed: usize, params: &TraceParams, luma: &mut [u8]) -> usize {
        let mut current = Some(seed);
        let mut length = 0;
        while let Some(i) = current {
            if length >= params.max_trace_length {
                break;
            }
            let r = &mut self.records[i];
            if r.visited {
                break;
            }
            if length > 0
                && (r.confidence.partial_cmp(&params.continuity_threshold) != Some(Ordering::Greater)
                    || r.magnitude.partial_cmp(&params.min_magnitude) != Some(Ordering::Greater))
            {
                break;
            }
            r.visited = true;
            luma[i] = (r.magnitude.clamp(0.0, 1.0) * 255.0).round() as u8;
            length += 1;
            current = r.next;
        }
        length
    }
}
