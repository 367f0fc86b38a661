//! Loudness estimation and the level-to-frame mapper
//!
//! The whole signal path is: RMS over the sample window, an adaptive
//! floor/ceiling normalization, exponential smoothing, and quantization to
//! a 1-based mouth-frame index. Calibration observes a short stretch of
//! ambient silence to seed the floor and ceiling.

use std::time::Duration;

/// How long calibration observes ambient silence before listening starts.
pub const CALIBRATION_WINDOW: Duration = Duration::from_millis(1500);

/// Per-tick decay applied to the adaptive ceiling. Lets the ceiling relax
/// when the speaker gets quieter while still snapping up instantly on a
/// louder peak.
pub const CEILING_DECAY: f32 = 0.995;

/// Exponential smoothing factor (0..1, higher is slower). Roughly a
/// ten-tick time constant, enough to damp frame chatter on noisy input.
pub const SMOOTHING: f32 = 0.9;

/// Margin applied to the quietest calibration reading so quiet-room jitter
/// does not register as voice.
const NOISE_FLOOR_MARGIN: f32 = 1.2;

/// Margin applied to the loudest calibration reading so the initial range
/// is not clipped before the adaptive ceiling catches up.
const CEILING_MARGIN: f32 = 1.5;

/// Lower bounds on the calibrated range for near-silent rooms.
const NOISE_FLOOR_MIN: f32 = 1e-5;
const CEILING_MIN: f32 = 1e-4;

/// Range used when calibration never saw a sample.
const FALLBACK_NOISE_FLOOR: f32 = 0.001;
const FALLBACK_CEILING: f32 = 0.02;

/// Keeps the floor-to-ceiling span away from zero.
const MIN_SPAN: f32 = 1e-6;

/// Keeps normalization away from a zero denominator.
const NORM_EPSILON: f32 = 1e-9;

/// Root-mean-square loudness of a sample window. Empty input reads as
/// silence.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Running minimum and maximum RMS observed during expected silence.
///
/// Created when calibration starts, fed once per tick, and consumed by
/// [`Calibration::finish`] when the window expires.
#[derive(Debug)]
pub struct Calibration {
    min_rms: f32,
    max_rms: f32,
}

impl Calibration {
    pub fn new() -> Self {
        Self {
            min_rms: f32::INFINITY,
            max_rms: 0.0,
        }
    }

    /// Fold one loudness reading into the running extremes.
    pub fn observe(&mut self, rms: f32) {
        self.min_rms = self.min_rms.min(rms);
        self.max_rms = self.max_rms.max(rms);
    }

    /// Consume the calibration window into a usable dynamic range.
    ///
    /// If no reading was ever observed, fall back to conservative guesses
    /// rather than producing a degenerate range.
    pub fn finish(self) -> AdaptiveRange {
        if !self.min_rms.is_finite() {
            return AdaptiveRange::new(FALLBACK_NOISE_FLOOR, FALLBACK_CEILING);
        }
        AdaptiveRange::new(
            (self.min_rms * NOISE_FLOOR_MARGIN).max(NOISE_FLOOR_MIN),
            (self.max_rms * CEILING_MARGIN).max(CEILING_MIN),
        )
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new()
    }
}

/// Calibrated noise floor plus an adaptively tracked ceiling.
///
/// The floor is fixed after calibration; the ceiling decays slowly toward
/// quieter input and snaps up on loud events. The ceiling always stays
/// above the floor so normalization never degenerates.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveRange {
    noise_floor: f32,
    ceiling: f32,
}

impl AdaptiveRange {
    pub fn new(noise_floor: f32, ceiling: f32) -> Self {
        Self {
            noise_floor,
            ceiling: ceiling.max(noise_floor + MIN_SPAN),
        }
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    /// Decay the ceiling one tick, snapping up if the reading exceeds it.
    pub fn adapt(&mut self, rms: f32) {
        self.ceiling = (self.ceiling * CEILING_DECAY)
            .max(rms)
            .max(self.noise_floor + MIN_SPAN);
    }

    /// Rescale a loudness reading into [0, 1] over the floor..ceiling span.
    pub fn normalize(&self, rms: f32) -> f32 {
        ((rms - self.noise_floor) / (self.ceiling - self.noise_floor + NORM_EPSILON))
            .clamp(0.0, 1.0)
    }
}

/// Steady-state loudness pipeline: adapt ceiling, normalize, smooth.
#[derive(Debug)]
pub struct LevelMapper {
    range: AdaptiveRange,
    smoothed: f32,
}

impl LevelMapper {
    pub fn new(range: AdaptiveRange) -> Self {
        Self {
            range,
            smoothed: 0.0,
        }
    }

    /// Fold one RMS reading into the smoothed level and return it.
    ///
    /// The smoothed level stays in [0, 1] because both blend operands do.
    pub fn update(&mut self, rms: f32) -> f32 {
        self.range.adapt(rms);
        let norm = self.range.normalize(rms);
        self.smoothed = self.smoothed * SMOOTHING + norm * (1.0 - SMOOTHING);
        self.smoothed
    }

    pub fn smoothed(&self) -> f32 {
        self.smoothed
    }

    pub fn range(&self) -> &AdaptiveRange {
        &self.range
    }

    /// Quantize the smoothed level to a 1-based frame index.
    pub fn frame_index(&self, frame_count: usize) -> usize {
        frame_index(self.smoothed, frame_count)
    }
}

/// Linear mapping from a normalized level to a 1-based frame index.
///
/// Frame 1 is the rest (closed-mouth) pose at level 0; level 1 selects the
/// last frame. A count of one always yields frame 1.
pub fn frame_index(level: f32, frame_count: usize) -> usize {
    let count = frame_count.max(1);
    let idx = (level * (count - 1) as f32).round() as usize + 1;
    idx.clamp(1, count)
}
