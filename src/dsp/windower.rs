//! Frame Windower (STFT analysis)
//!
//! Turns `Slen` time-domain samples into one `2·Slen` point spectrum.
//!
//! # Design Notes
//! - Audio-rate input uses a Hann window normalised so that `sum(window) == len2`, which
//!   gives unity gain when 50%-overlapped frames are summed.
//! - Wideband input uses a rectangular window.
//! - Frames are zero-padded to the transform size before the forward FFT.
//! - Window and both FFT plans live here; they are rebuilt only with a new [`EngineConfig`].

use crate::dsp::config::EngineConfig;
use crate::dsp::utils::make_hann_window;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

pub struct FrameWindower {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    window: Vec<f32>,
    frame_len: usize,
    fft_size: usize,
    ola_scale: f32,
}

impl FrameWindower {
    pub fn new(cfg: &EngineConfig) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(cfg.fft_size);
        let ifft = planner.plan_fft_inverse(cfg.fft_size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());

        let window = if cfg.is_wideband {
            vec![1.0; cfg.frame_len]
        } else {
            let hann = make_hann_window(cfg.frame_len);
            let sum: f32 = hann.iter().sum();
            let scale = cfg.len2 as f32 / sum.max(f32::EPSILON);
            hann.into_iter().map(|w| w * scale).collect()
        };
        let window_sum: f32 = window.iter().sum();
        let ola_scale = cfg.len2 as f32 / window_sum.max(f32::EPSILON);

        Self {
            fft,
            ifft,
            fft_scratch: vec![Complex::default(); scratch_len],
            window,
            frame_len: cfg.frame_len,
            fft_size: cfg.fft_size,
            ola_scale,
        }
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Overlap-add compensation: `len2 / sum(window)`. 1.0 for the normalised Hann window.
    pub fn ola_scale(&self) -> f32 {
        self.ola_scale
    }

    /// Windows `frame[..Slen]`, zero-pads and forward transforms into `spectrum`, then writes
    /// per-bin magnitudes into `mags`.
    pub fn analyze(
        &mut self,
        frame: &[Complex<f32>],
        spectrum: &mut [Complex<f32>],
        mags: &mut [f32],
    ) {
        debug_assert!(frame.len() >= self.frame_len);
        debug_assert_eq!(spectrum.len(), self.fft_size);
        debug_assert_eq!(mags.len(), self.fft_size);

        for (i, (dst, &w)) in spectrum.iter_mut().zip(&self.window).enumerate() {
            *dst = frame[i] * w;
        }
        for dst in &mut spectrum[self.frame_len..] {
            *dst = Complex::default();
        }

        self.fft.process_with_scratch(spectrum, &mut self.fft_scratch);

        for (m, s) in mags.iter_mut().zip(spectrum.iter()) {
            *m = s.norm();
        }
    }

    /// Inverse transform in place, normalised by `1 / fft_size`.
    pub fn inverse(&mut self, spectrum: &mut [Complex<f32>]) {
        debug_assert_eq!(spectrum.len(), self.fft_size);
        self.ifft.process_with_scratch(spectrum, &mut self.fft_scratch);
        let norm = 1.0 / self.fft_size as f32;
        for s in spectrum.iter_mut() {
            *s *= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::config::NoiseReductionSettings;

    fn config(sr: f32) -> EngineConfig {
        EngineConfig::new(sr, &NoiseReductionSettings::default()).unwrap()
    }

    #[test]
    fn test_audio_window_sums_to_hop() {
        let cfg = config(16_000.0);
        let w = FrameWindower::new(&cfg);
        let sum: f32 = w.window().iter().sum();
        assert!((sum - cfg.len2 as f32).abs() < 1e-2);
        assert!((w.ola_scale() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_wideband_window_is_rectangular() {
        let cfg = config(96_000.0);
        let w = FrameWindower::new(&cfg);
        assert!(w.window().iter().all(|&v| v == 1.0));
        assert!((w.ola_scale() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_forward_inverse_recovers_windowed_frame() {
        let cfg = config(8_000.0);
        let mut w = FrameWindower::new(&cfg);
        let frame: Vec<Complex<f32>> = (0..cfg.frame_len)
            .map(|i| Complex::new((i as f32 * 0.3).sin(), (i as f32 * 0.1).cos()))
            .collect();
        let mut spec = vec![Complex::default(); cfg.fft_size];
        let mut mags = vec![0.0; cfg.fft_size];
        w.analyze(&frame, &mut spec, &mut mags);
        assert!(mags.iter().zip(&spec).all(|(m, s)| (m - s.norm()).abs() < 1e-6));

        w.inverse(&mut spec);
        for i in 0..cfg.frame_len {
            let want = frame[i] * w.window()[i];
            assert!((spec[i] - want).norm() < 1e-4);
        }
        for s in &spec[cfg.frame_len..] {
            assert!(s.norm() < 1e-4);
        }
    }
}
