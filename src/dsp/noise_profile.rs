//! Noise Profile Estimation
//!
//! Produces the per-bin noise power the gain rule divides by.
//!
//! # Entry Points
//! - **Sample**: average the magnitude spectra of the first `noise_frames` analysis frames of
//!   a stretch assumed to be noise only, then square. Wideband spectra are smoothed across
//!   adjacent bins first.
//! - **Update**: once per processed frame. Appends the frame's magnitudes to a capped
//!   history and, once enough history exists, recomputes the profile:
//!   - Audio rate: a short-term floor from the newest frames, adopted only when its
//!     `[min, max]` spread is tighter than the one currently tracked. A strong wanted signal
//!     widens the spread, so it never gets absorbed into the floor.
//!   - Wideband: per-bin mean and stdev over the whole history; only the most temporally
//!     stable bins are trusted, everything else is interpolated from them.
//!
//! # Invariants
//! - Every noise power entry is finite and `>= NOISE_POWER_FLOOR`.
//! - A degenerate recompute (no trusted bins) leaves the profile untouched.

use crate::dsp::config::{EngineConfig, NoiseReductionSettings};
use crate::dsp::utils::{fill_untrusted, moving_average, percentile_sorted, NOISE_POWER_FLOOR};
use crate::dsp::windower::FrameWindower;
use crate::nr_log;
use log::warn;
use rustfft::num_complex::Complex;
use std::collections::VecDeque;

// =============================================================================
// Constants
// =============================================================================

/// Moving-average width applied to a freshly sampled wideband profile (bins).
const WIDEBAND_SAMPLE_SMOOTH_BINS: usize = 120;

/// Moving-average width applied to the audio-rate refinement estimate (bins).
const AUDIO_REFINE_SMOOTH_BINS: usize = 6;

/// Half-width of the excluded centre region, as a fraction of the transform size.
const WIDEBAND_CENTER_EXCLUDE_FRAC: f32 = 0.15;

/// Percentile of per-bin stdev that anchors the trust threshold.
const TRUSTED_STDEV_PERCENTILE: f32 = 0.10;

/// Margin over the anchor percentile.
const TRUSTED_STDEV_MARGIN: f32 = 1.2;

// =============================================================================
// Profile
// =============================================================================

/// Per-bin noise power plus the statistics continuous refinement needs.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseProfile {
    noise_power: Vec<f32>,
    history: VecDeque<Vec<f32>>,
    history_capacity: usize,
    generation: u64,
    stable: bool,
    floor_min: f32,
    floor_max: f32,
    degenerate: bool,
}

impl NoiseProfile {
    pub fn new(fft_size: usize, history_capacity: usize) -> Self {
        Self {
            noise_power: vec![NOISE_POWER_FLOOR; fft_size],
            history: VecDeque::with_capacity(history_capacity.min(64)),
            history_capacity: history_capacity.max(1),
            generation: 0,
            stable: false,
            floor_min: NOISE_POWER_FLOOR,
            floor_max: NOISE_POWER_FLOOR,
            degenerate: false,
        }
    }

    pub fn noise_power(&self) -> &[f32] {
        &self.noise_power
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Bumped every time a new estimate is adopted.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// Tracked `(min, max)` of the adopted noise power.
    pub fn floor_bounds(&self) -> (f32, f32) {
        (self.floor_min, self.floor_max)
    }

    fn adopt(&mut self, power: &[f32]) {
        let mut lo = f32::MAX;
        let mut hi = 0.0f32;
        for (dst, &p) in self.noise_power.iter_mut().zip(power) {
            let p = if p.is_finite() {
                p.max(NOISE_POWER_FLOOR)
            } else {
                NOISE_POWER_FLOOR
            };
            *dst = p;
            lo = lo.min(p);
            hi = hi.max(p);
        }
        self.floor_min = lo;
        self.floor_max = hi;
        self.generation += 1;
        self.stable = true;
        self.degenerate = false;
    }

    fn push_history(&mut self, mags: &[f32]) {
        let mut slot = if self.history.len() >= self.history_capacity {
            self.history.pop_front().unwrap_or_default()
        } else {
            Vec::with_capacity(mags.len())
        };
        slot.clear();
        slot.extend_from_slice(mags);
        self.history.push_back(slot);
    }
}

/// What a call to [`NoiseProfileEstimator::update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileUpdate {
    /// History recorded; not enough of it yet to recompute.
    Accumulating,
    /// History recorded; recompute skipped because the engine is held.
    Held,
    /// A new estimate replaced the profile.
    Adopted,
    /// A new estimate was computed but rejected in favour of the last stable one.
    Kept,
    /// No bin qualified as trusted; the previous profile was kept.
    Degenerate,
}

// =============================================================================
// Estimator
// =============================================================================

pub struct NoiseProfileEstimator {
    is_wideband: bool,
    frame_len: usize,
    fft_size: usize,
    noise_frames: usize,
    history_capacity: usize,
    refine_threshold: usize,

    vad_enabled: bool,
    vad_threshold: f32,
    vad_smoothing: f32,

    // Scratch
    spectrum: Vec<Complex<f32>>,
    mags: Vec<f32>,
    accum: Vec<f32>,
    smoothed: Vec<f32>,
    mean: Vec<f32>,
    stdev: Vec<f32>,
    sorted: Vec<f32>,
    trusted: Vec<bool>,
}

impl NoiseProfileEstimator {
    pub fn new(cfg: &EngineConfig, settings: &NoiseReductionSettings) -> Self {
        let n = cfg.fft_size;
        Self {
            is_wideband: cfg.is_wideband,
            frame_len: cfg.frame_len,
            fft_size: n,
            noise_frames: cfg.noise_frames,
            history_capacity: cfg.history_capacity(settings),
            refine_threshold: cfg.refine_threshold(settings),
            vad_enabled: settings.vad_noise_tracking,
            vad_threshold: settings.vad_threshold,
            vad_smoothing: settings.vad_smoothing,
            spectrum: vec![Complex::default(); n],
            mags: vec![0.0; n],
            accum: vec![0.0; n],
            smoothed: vec![0.0; n],
            mean: vec![0.0; n],
            stdev: vec![0.0; n],
            sorted: Vec::with_capacity(n),
            trusted: vec![false; n],
        }
    }

    /// An empty profile sized for this configuration.
    pub fn empty_profile(&self) -> NoiseProfile {
        NoiseProfile::new(self.fft_size, self.history_capacity)
    }

    /// Initial sampling from a noise-only stretch.
    ///
    /// Uses non-overlapping frames at stride `Slen`; `samples` should hold at least
    /// `noise_frames * Slen` samples. Fewer frames are averaged if it does not.
    pub fn sample(
        &mut self,
        windower: &mut FrameWindower,
        samples: &[Complex<f32>],
        profile: &mut NoiseProfile,
    ) {
        let frames = (samples.len() / self.frame_len).min(self.noise_frames).max(1);
        self.accum.fill(0.0);

        for j in 0..frames {
            let start = j * self.frame_len;
            let end = (start + self.frame_len).min(samples.len());
            if end - start < self.frame_len {
                break;
            }
            windower.analyze(&samples[start..end], &mut self.spectrum, &mut self.mags);
            for (a, &m) in self.accum.iter_mut().zip(&self.mags) {
                *a += m;
            }
        }

        let inv = 1.0 / frames as f32;
        for a in &mut self.accum {
            *a *= inv;
        }

        if self.is_wideband {
            moving_average(&self.accum, WIDEBAND_SAMPLE_SMOOTH_BINS, &mut self.smoothed);
        } else {
            self.smoothed.copy_from_slice(&self.accum);
        }
        for m in &mut self.smoothed {
            *m = *m * *m;
        }

        profile.history.clear();
        profile.adopt(&self.smoothed);
    }

    /// Continuous refinement, called once per processed frame with its raw magnitudes.
    pub fn update(&mut self, profile: &mut NoiseProfile, mags: &[f32], held: bool) -> ProfileUpdate {
        profile.push_history(mags);

        if profile.history.len() < self.refine_threshold {
            return ProfileUpdate::Accumulating;
        }
        if held {
            return ProfileUpdate::Held;
        }

        if self.is_wideband {
            self.refine_wideband(profile)
        } else {
            self.refine_audio(profile)
        }
    }

    fn refine_audio(&mut self, profile: &mut NoiseProfile) -> ProfileUpdate {
        let recent = self.noise_frames.min(profile.history.len()).max(1);
        self.accum.fill(0.0);
        for frame in profile.history.iter().rev().take(recent) {
            for (a, &m) in self.accum.iter_mut().zip(frame) {
                *a += m;
            }
        }
        let inv = 1.0 / recent as f32;
        for a in &mut self.accum {
            let m = *a * inv;
            *a = m * m;
        }

        moving_average(&self.accum, AUDIO_REFINE_SMOOTH_BINS, &mut self.smoothed);
        let (lo, hi) = self
            .smoothed
            .iter()
            .fold((f32::MAX, 0.0f32), |(lo, hi), &p| (lo.min(p), hi.max(p)));

        let (cur_lo, cur_hi) = profile.floor_bounds();
        if hi - lo < cur_hi - cur_lo {
            profile.adopt(&self.smoothed);
            nr_log!("noise profile: tighter floor adopted ({:.3e}..{:.3e})", lo, hi);
            ProfileUpdate::Adopted
        } else {
            ProfileUpdate::Kept
        }
    }

    fn refine_wideband(&mut self, profile: &mut NoiseProfile) -> ProfileUpdate {
        let n = self.fft_size;
        let count = profile.history.len() as f64;

        for i in 0..n {
            let mut sum = 0.0f64;
            let mut sum_sq = 0.0f64;
            for frame in &profile.history {
                let v = frame[i] as f64;
                sum += v;
                sum_sq += v * v;
            }
            let mean = sum / count;
            let var = (sum_sq / count - mean * mean).max(0.0);
            self.mean[i] = mean as f32;
            self.stdev[i] = var.sqrt() as f32;
        }

        let center = n as f32 / 2.0;
        let exclude = WIDEBAND_CENTER_EXCLUDE_FRAC * n as f32;
        self.sorted.clear();
        for i in 0..n {
            if (i as f32 - center).abs() >= exclude {
                self.sorted.push(self.stdev[i]);
            }
        }
        self.sorted.sort_by(|a, b| a.total_cmp(b));
        let threshold = TRUSTED_STDEV_MARGIN * percentile_sorted(&self.sorted, TRUSTED_STDEV_PERCENTILE);

        for i in 0..n {
            let excluded = (i as f32 - center).abs() < exclude;
            // A perfectly stationary floor has a zero threshold; its zero-stdev bins still count.
            let stable = self.stdev[i] < threshold || (threshold == 0.0 && self.stdev[i] == 0.0);
            self.trusted[i] = !excluded && stable && self.mean[i].is_finite();
            self.accum[i] = self.mean[i] * self.mean[i];
        }

        if !fill_untrusted(&mut self.accum, &self.trusted) {
            if !profile.degenerate {
                warn!("noise profile: no trusted bins, holding previous estimate");
            }
            profile.degenerate = true;
            return ProfileUpdate::Degenerate;
        }

        profile.adopt(&self.accum);
        ProfileUpdate::Adopted
    }

    /// Blends a frame into the noise power when the log-likelihood VAD calls it noise.
    ///
    /// `llr_mean` is `Σ(γξ/(1+ξ) − ln(1+ξ)) / Slen` for the frame, `sig2` its power spectrum.
    /// Returns whether the frame was absorbed.
    pub fn track_vad(&self, profile: &mut NoiseProfile, llr_mean: f32, sig2: &[f32]) -> bool {
        if !self.vad_enabled || llr_mean.is_nan() || llr_mean >= self.vad_threshold {
            return false;
        }
        let mu = self.vad_smoothing;
        for (p, &s) in profile.noise_power.iter_mut().zip(sig2) {
            let blended = mu * *p + (1.0 - mu) * s;
            *p = if blended.is_finite() {
                blended.max(NOISE_POWER_FLOOR)
            } else {
                *p
            };
        }
        true
    }
}
