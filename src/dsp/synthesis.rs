//! Overlap-add synthesis.
//!
//! Takes one inverse-transformed frame and emits exactly `len2` output samples:
//! `out = (x_old + ifft[..len1]) · scale`, then keeps `ifft[len1..Slen]` as the next `x_old`.

use crate::dsp::config::EngineConfig;
use rustfft::num_complex::Complex;

pub struct OverlapAddSynthesizer {
    len1: usize,
    len2: usize,
    frame_len: usize,
    scale: f32,
}

impl OverlapAddSynthesizer {
    /// `ola_scale` compensates the analysis window's overlap gain; `output_gain` is applied on top.
    pub fn new(cfg: &EngineConfig, ola_scale: f32, output_gain: f32) -> Self {
        Self {
            len1: cfg.len1,
            len2: cfg.len2,
            frame_len: cfg.frame_len,
            scale: ola_scale * output_gain,
        }
    }

    pub fn hop(&self) -> usize {
        self.len2
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Writes `len2` samples into `out` and rotates the overlap tail in `x_old`.
    pub fn overlap_add(&self, frame: &[Complex<f32>], x_old: &mut [Complex<f32>], out: &mut [Complex<f32>]) {
        debug_assert!(frame.len() >= self.frame_len);
        debug_assert_eq!(x_old.len(), self.len1);
        debug_assert!(out.len() >= self.len2);

        // Slen is even, so len1 == len2 and the tail covers the whole hop.
        for i in 0..self.len2 {
            let tail = x_old.get(i).copied().unwrap_or_default();
            out[i] = (tail + frame[i]) * self.scale;
        }
        x_old.copy_from_slice(&frame[self.len1..self.frame_len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::config::NoiseReductionSettings;
    use crate::dsp::windower::FrameWindower;

    #[test]
    fn test_unity_gain_reconstruction() {
        // Analysis + overlap-add without any spectral gain reproduces the input once the
        // overlap tail is primed.
        let cfg = EngineConfig::new(8_000.0, &NoiseReductionSettings::default()).unwrap();
        let mut win = FrameWindower::new(&cfg);
        let synth = OverlapAddSynthesizer::new(&cfg, win.ola_scale(), 1.0);

        let input: Vec<Complex<f32>> = (0..cfg.len2 * 20)
            .map(|i| Complex::new((i as f32 * 0.05).sin(), 0.0))
            .collect();

        let mut spectrum = vec![Complex::default(); cfg.fft_size];
        let mut mags = vec![0.0; cfg.fft_size];
        let mut x_old = vec![Complex::default(); cfg.len1];
        let mut out = Vec::new();
        let mut hop = vec![Complex::default(); cfg.len2];

        let mut pos = 0;
        while pos + cfg.frame_len <= input.len() {
            win.analyze(&input[pos..pos + cfg.frame_len], &mut spectrum, &mut mags);
            win.inverse(&mut spectrum);
            synth.overlap_add(&spectrum, &mut x_old, &mut hop);
            out.extend_from_slice(&hop);
            pos += cfg.len2;
        }

        // The Hann window sums to ~1 across overlapping hops away from the edges.
        for i in cfg.len2 * 2..out.len() {
            assert!(
                (out[i].re - input[i].re).abs() < 0.05,
                "sample {i}: {} vs {}",
                out[i].re,
                input[i].re
            );
        }
    }

    #[test]
    fn test_output_gain_scales() {
        let cfg = EngineConfig::new(8_000.0, &NoiseReductionSettings::default()).unwrap();
        let synth = OverlapAddSynthesizer::new(&cfg, 0.5, 4.0);
        assert_eq!(synth.scale(), 2.0);
        assert_eq!(synth.hop(), cfg.len2);

        let frame = vec![Complex::new(1.0, 0.0); cfg.fft_size];
        let mut x_old = vec![Complex::new(1.0, 0.0); cfg.len1];
        let mut out = vec![Complex::default(); cfg.len2];
        synth.overlap_add(&frame, &mut x_old, &mut out);
        assert!(out.iter().all(|s| *s == Complex::new(4.0, 0.0)));
    }
}
