//! Decision-Directed Log-MMSE Gain
//!
//! Ephraim–Malah log-spectral-amplitude estimator with a decision-directed a-priori SNR.
//!
//! # Per frame
//! ```text
//! γ  = min(sig² / noise, 40)                       a-posteriori SNR
//! ξ  = aa·Xk_prev/noise + (1−aa)·max(γ−1, 0)       a-priori SNR (aa + ... on the first frame)
//! A  = ξ / (1+ξ)
//! vk = A·γ
//! hw = A·exp(0.5·E1(vk))
//! ```
//! `Xk_prev` becomes `(sig·hw)²` for the next frame.
//!
//! # Numerical guards
//! Noise power is floored before division, `vk` is floored before `E1`, `ξ` is clamped to
//! `[ksi_min, KSI_MAX]`. A frame of digital silence therefore yields finite gains and a zero
//! `Xk_prev`.

use crate::dsp::config::EngineConfig;
use crate::dsp::utils::{db_to_power, expint_e1, NOISE_POWER_FLOOR};
use rustfft::num_complex::Complex;

// =============================================================================
// Constants
// =============================================================================

/// Decision-directed smoothing factor.
const AA: f32 = 0.98;

/// Lower bound for the a-priori SNR (dB).
const KSI_MIN_DB: f32 = -25.0;

/// Upper bound for the a-priori SNR.
const KSI_MAX: f32 = 1e8;

/// A-posteriori SNR cap.
const GAMMA_MAX: f32 = 40.0;

/// Smallest argument passed to E1.
const VK_MIN: f32 = 1e-8;

// =============================================================================
// State
// =============================================================================

/// Per-chain memory of the estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionDirectedState {
    xk_prev: Option<Vec<f32>>,
    x_old: Vec<Complex<f32>>,
    ksi_min: f32,
}

impl DecisionDirectedState {
    pub fn new(len1: usize) -> Self {
        Self {
            xk_prev: None,
            x_old: vec![Complex::default(); len1],
            ksi_min: db_to_power(KSI_MIN_DB),
        }
    }

    /// Forget the previous frame and the overlap tail.
    pub fn reset(&mut self) {
        self.xk_prev = None;
        self.x_old.fill(Complex::default());
    }

    /// Estimated clean power of the previous frame, absent before the first frame.
    pub fn xk_prev(&self) -> Option<&[f32]> {
        self.xk_prev.as_deref()
    }

    pub fn x_old(&self) -> &[Complex<f32>] {
        &self.x_old
    }

    pub(crate) fn x_old_mut(&mut self) -> &mut [Complex<f32>] {
        &mut self.x_old
    }

    pub fn ksi_min(&self) -> f32 {
        self.ksi_min
    }
}

// =============================================================================
// Estimator
// =============================================================================

pub struct DecisionDirectedGainEstimator {
    frame_len: usize,
    sig: Vec<f32>,
    sig2: Vec<f32>,
}

impl DecisionDirectedGainEstimator {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            frame_len: cfg.frame_len,
            sig: vec![0.0; cfg.fft_size],
            sig2: vec![0.0; cfg.fft_size],
        }
    }

    /// Computes per-bin gains for one frame into `gains` and advances `state`.
    ///
    /// Returns the frame's mean log-likelihood ratio, the statistic the VAD thresholds.
    pub fn estimate(
        &mut self,
        state: &mut DecisionDirectedState,
        noise_power: &[f32],
        mags: &[f32],
        gains: &mut [f32],
    ) -> f32 {
        let n = self.sig.len();
        debug_assert_eq!(mags.len(), n);
        debug_assert_eq!(noise_power.len(), n);
        debug_assert_eq!(gains.len(), n);

        for i in 0..n {
            let m = mags[i];
            self.sig[i] = if m == 0.0 && i > 0 { self.sig[i - 1] } else { m };
            self.sig2[i] = self.sig[i] * self.sig[i];
        }

        let ksi_min = state.ksi_min;
        let mut llr_sum = 0.0f64;
        let xk_prev = state.xk_prev.get_or_insert_with(Vec::new);
        let first = xk_prev.is_empty();
        if first {
            xk_prev.resize(n, 0.0);
        }

        for i in 0..n {
            let noise = noise_power[i].max(NOISE_POWER_FLOOR);
            let gammak = (self.sig2[i] / noise).min(GAMMA_MAX);
            let excess = (1.0 - AA) * (gammak - 1.0).max(0.0);
            let prior = if first { AA } else { AA * xk_prev[i] / noise };
            let mut ksi = prior + excess;
            if !ksi.is_finite() {
                ksi = KSI_MAX;
            }
            let ksi = ksi.clamp(ksi_min, KSI_MAX);

            llr_sum += (gammak * ksi / (1.0 + ksi) - (1.0 + ksi).ln()) as f64;

            let a = ksi / (1.0 + ksi);
            let vk = (a * gammak).max(VK_MIN);
            let hw = a * (0.5 * expint_e1(vk)).exp();
            let hw = if hw.is_finite() { hw } else { 0.0 };

            gains[i] = hw;
            let clean = self.sig[i] * hw;
            xk_prev[i] = clean * clean;
        }

        (llr_sum / self.frame_len as f64) as f32
    }

    /// Power spectrum of the last frame passed to [`estimate`](Self::estimate).
    pub fn signal_power(&self) -> &[f32] {
        &self.sig2
    }
}

/// `out = spectrum · gains`, bin by bin.
pub fn apply_gains(spectrum: &[Complex<f32>], gains: &[f32], out: &mut [Complex<f32>]) {
    for ((dst, &s), &g) in out.iter_mut().zip(spectrum).zip(gains) {
        *dst = s * g;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::config::NoiseReductionSettings;

    fn setup() -> (EngineConfig, DecisionDirectedGainEstimator, DecisionDirectedState) {
        let cfg = EngineConfig::new(8_000.0, &NoiseReductionSettings::default()).unwrap();
        let est = DecisionDirectedGainEstimator::new(&cfg);
        let state = DecisionDirectedState::new(cfg.len1);
        (cfg, est, state)
    }

    #[test]
    fn test_ksi_min_is_minus_25_db() {
        let state = DecisionDirectedState::new(4);
        assert!((state.ksi_min() - 0.003_162_278).abs() < 1e-7);
        assert!(state.xk_prev().is_none());
    }

    #[test]
    fn test_silent_frame_is_finite() {
        let (cfg, mut est, mut state) = setup();
        let noise = vec![0.0; cfg.fft_size];
        let mags = vec![0.0; cfg.fft_size];
        let mut gains = vec![0.0; cfg.fft_size];
        for _ in 0..3 {
            let llr = est.estimate(&mut state, &noise, &mags, &mut gains);
            assert!(llr.is_finite());
            assert!(gains.iter().all(|g| g.is_finite() && *g >= 0.0));
            let xk = state.xk_prev().unwrap();
            assert!(xk.iter().all(|&x| x == 0.0));
        }
    }

    #[test]
    fn test_strong_bin_passes_weak_bin_suppressed() {
        let (cfg, mut est, mut state) = setup();
        let noise = vec![1.0; cfg.fft_size];
        let mut mags = vec![1.0; cfg.fft_size];
        mags[40] = 100.0;
        let mut gains = vec![0.0; cfg.fft_size];
        for _ in 0..20 {
            est.estimate(&mut state, &noise, &mags, &mut gains);
        }
        assert!(gains[40] > 0.9, "tone gain {}", gains[40]);
        assert!(gains[100] < 0.3, "noise gain {}", gains[100]);
    }

    #[test]
    fn test_zero_bin_inherits_left_neighbour() {
        let (cfg, mut est, mut state) = setup();
        let noise = vec![1.0; cfg.fft_size];
        let mut mags = vec![1.0; cfg.fft_size];
        mags[10] = 50.0;
        mags[11] = 0.0;
        let mut gains = vec![0.0; cfg.fft_size];
        est.estimate(&mut state, &noise, &mags, &mut gains);
        assert_eq!(gains[10], gains[11]);
        assert_eq!(est.signal_power()[11], 2500.0);
    }

    #[test]
    fn test_reset_forgets_previous_frame() {
        let (cfg, mut est, mut state) = setup();
        let noise = vec![1.0; cfg.fft_size];
        let mags = vec![3.0; cfg.fft_size];
        let mut gains = vec![0.0; cfg.fft_size];
        est.estimate(&mut state, &noise, &mags, &mut gains);
        state.x_old_mut()[0] = Complex::new(1.0, 0.0);
        state.reset();
        assert_eq!(state, DecisionDirectedState::new(cfg.len1));
    }

    #[test]
    fn test_apply_gains() {
        let spectrum = [Complex::new(1.0, 2.0), Complex::new(-4.0, 0.5)];
        let mut out = [Complex::default(); 2];
        apply_gains(&spectrum, &[0.5, 2.0], &mut out);
        assert_eq!(out[0], Complex::new(0.5, 1.0));
        assert_eq!(out[1], Complex::new(-8.0, 1.0));
    }
}
