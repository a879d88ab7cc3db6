// histogram.rs — Streaming percentile estimation over a scalar field.
//
// Samples are pushed into a fixed-capacity buffer during a reporting
// cycle. `calculate` bins them between the observed min and max and builds
// a cumulative-fraction curve; `percentile(p)` then maps the first bucket
// whose cumulative fraction reaches p back into [min, max].
//
//   samples ──▶ buckets ──▶ cumulative scale ──▶ percentile(p)
//               floor((v − min) / (max − min) · (B − 1))
//
// Recomputing every frame is wasteful for a slowly varying threshold, so
// `AdaptivePercentile` pairs the histogram with a `Countdown` and only
// recalculates once every K frames. Between recalculations consumers see
// the last computed value.
//
// The capacity is fixed at construction. Pushing past it is a sizing bug
// and reports `BufferOverflow` instead of growing.

use log::trace;

use crate::error::PipelineError;

/// Fixed-capacity histogram with cumulative percentile lookup.
#[derive(Debug, Clone)]
pub struct Histogram {
    samples: Vec<f32>,
    capacity: usize,
    counts: Vec<u32>,
    scales: Vec<f32>,
    min: f32,
    max: f32,
}

impl Histogram {
    /// # Panics
    /// Panics if `bucket_count < 2` or `capacity == 0`.
    pub fn new(bucket_count: usize, capacity: usize) -> Self {
        assert!(bucket_count >= 2, "histogram needs at least two buckets");
        assert!(capacity > 0, "histogram capacity must be positive");
        Histogram {
            samples: Vec::with_capacity(capacity),
            capacity,
            counts: vec![0; bucket_count],
            scales: vec![0.0; bucket_count],
            min: 0.0,
            max: 0.0,
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.counts.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Push one sample. Fails once `capacity` samples are held.
    pub fn add_value(&mut self, value: f32) -> Result<(), PipelineError> {
        if self.samples.len() >= self.capacity {
            return Err(PipelineError::BufferOverflow { capacity: self.capacity });
        }
        self.samples.push(value);
        Ok(())
    }

    /// Drop all samples and results for the next reporting cycle.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.counts.fill(0);
        self.scales.fill(0.0);
        self.min = 0.0;
        self.max = 0.0;
    }

    /// Rebuild bucket counts and the cumulative curve from the held samples.
    pub fn calculate(&mut self) {
        self.counts.fill(0);
        self.scales.fill(0.0);
        if self.samples.is_empty() {
            self.min = 0.0;
            self.max = 0.0;
            return;
        }
        let (min, max) = self
            .samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        self.min = min;
        self.max = max;

        let buckets = self.counts.len();
        if max <= min {
            self.counts[0] = self.samples.len() as u32;
            self.scales.fill(1.0);
            return;
        }
        // f32::MAX - f32::MIN overflows to infinity, so bin in f64.
        let (lo, span) = (min as f64, max as f64 - min as f64);
        let last = buckets - 1;
        for &v in &self.samples {
            let b = (((v as f64 - lo) / span) * last as f64).floor();
            let b = (b.max(0.0) as usize).min(last);
            self.counts[b] += 1;
        }
        let total = self.samples.len() as f32;
        let mut running = 0u32;
        for (scale, &count) in self.scales.iter_mut().zip(&self.counts) {
            running += count;
            *scale = running as f32 / total;
        }
        trace!("histogram over {} samples in [{min}, {max}]", self.samples.len());
    }

    /// Value below which roughly a fraction `p` of the samples fall.
    /// Returns 0 when nothing has been calculated.
    pub fn percentile(&self, p: f32) -> f32 {
        if self.counts.iter().all(|&c| c == 0) {
            return 0.0;
        }
        let p = p.clamp(0.0, 1.0);
        let last = (self.counts.len() - 1) as f64;
        let (lo, hi) = (self.min as f64, self.max as f64);
        self.scales
            .iter()
            .position(|&s| s >= p)
            .map(|i| (lo + i as f64 / last * (hi - lo)).clamp(lo, hi) as f32)
            .unwrap_or(self.max)
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Cumulative fraction per bucket.
    pub fn scales(&self) -> &[f32] {
        &self.scales
    }
}

/// Fires once every `period` ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    period: u32,
    remaining: u32,
}

impl Countdown {
    /// A period of 0 is treated as 1 (fire every tick).
    pub fn new(period: u32) -> Self {
        let period = period.max(1);
        Countdown { period, remaining: period }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    /// Advance one tick. Returns `true` when the countdown expires, which
    /// also rearms it.
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.remaining = self.period;
            true
        } else {
            false
        }
    }
}

/// Default recalculation period in frames.
pub const DEFAULT_PERIOD: u32 = 30;

/// A percentile threshold recomputed on a frame countdown.
///
/// ```
/// use boundary_cv::histogram::AdaptivePercentile;
///
/// let mut t = AdaptivePercentile::new(16, 1024, 0.9, 30);
/// for v in 0..100 {
///     t.histogram_mut().add_value(v as f32).unwrap();
/// }
/// let threshold = t.update();
/// assert!(threshold >= 80.0);
/// ```
#[derive(Debug, Clone)]
pub struct AdaptivePercentile {
    histogram: Histogram,
    countdown: Countdown,
    percentile: f32,
    last: Option<f32>,
}

impl AdaptivePercentile {
    pub fn new(bucket_count: usize, capacity: usize, percentile: f32, period: u32) -> Self {
        AdaptivePercentile {
            histogram: Histogram::new(bucket_count, capacity),
            countdown: Countdown::new(period),
            percentile: percentile.clamp(0.0, 1.0),
            last: None,
        }
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Samples for the current cycle go here.
    pub fn histogram_mut(&mut self) -> &mut Histogram {
        &mut self.histogram
    }

    /// Call once per frame. Recalculates on the first call and whenever the
    /// countdown fires (then starts a new cycle); otherwise returns the last
    /// computed value.
    pub fn update(&mut self) -> f32 {
        let fired = self.countdown.tick();
        match self.last {
            Some(value) if !fired => value,
            _ => {
                self.histogram.calculate();
                let value = self.histogram.percentile(self.percentile);
                self.histogram.reset();
                self.last = Some(value);
                value
            }
        }
    }

    /// The last computed threshold, if any.
    pub fn value(&self) -> Option<f32> {
        self.last
    }
}
