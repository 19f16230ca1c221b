//! Engine configuration
//!
//! Two layers:
//! - [`NoiseReductionSettings`]: user tunables, serialisable, survive sample-rate changes.
//! - [`EngineConfig`]: frame geometry derived from the sample rate. Rebuilt (and all engine
//!   state discarded) whenever the rate changes.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Constants
// =============================================================================

/// Analysis frame duration (seconds).
const FRAME_SECONDS: f64 = 0.02;

/// Smallest usable frame length (samples).
const FRAME_LEN_MIN: usize = 4;

/// Default sample rate above which the wideband behaviour is selected (Hz).
pub const WIDEBAND_THRESHOLD_HZ: f32 = 24_000.0;

// =============================================================================
// Settings
// =============================================================================

/// Tunables for the engine and its retrain/swap protocol.
///
/// Every field has a default, so a JSON document only needs the fields it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseReductionSettings {
    /// Analysis frames consumed when sampling a noise profile.
    pub noise_frames: usize,
    /// Samples between candidate retrain attempts.
    pub switch_interval: usize,
    /// Samples between a candidate retrain and its promotion.
    pub overlap_interval: usize,
    /// Retraining only starts while the recent dynamic range is below this (dB).
    pub silence_threshold_db: f32,
    /// Number of activity readings inspected per retrain attempt.
    pub activity_window: usize,
    /// Enables the periodic candidate retrain and swap.
    pub auto_retrain: bool,
    /// Sample rates above this use the wideband behaviour (Hz).
    pub wideband_threshold_hz: f32,
    /// Noise history length for audio-rate input (frames).
    pub audio_history_frames: usize,
    /// Noise history length for wideband input (frames).
    pub wideband_history_frames: usize,
    /// Audio-rate refinement waits for more than this many history frames.
    pub history_min_frames: usize,
    /// Linear gain applied to the synthesised output.
    pub output_gain: f32,
    /// Blend frames judged noise-only by the log-likelihood VAD into the noise power.
    pub vad_noise_tracking: bool,
    /// VAD decision threshold (mean log-likelihood ratio per sample).
    pub vad_threshold: f32,
    /// Noise power smoothing factor used by VAD tracking.
    pub vad_smoothing: f32,
}

impl Default for NoiseReductionSettings {
    fn default() -> Self {
        Self {
            noise_frames: 12,
            switch_interval: 1_000_000,
            overlap_interval: 40_000,
            silence_threshold_db: 18.0,
            activity_window: 50,
            auto_retrain: true,
            wideband_threshold_hz: WIDEBAND_THRESHOLD_HZ,
            audio_history_frames: 2000,
            wideband_history_frames: 50,
            history_min_frames: 100,
            output_gain: 1.0,
            vad_noise_tracking: false,
            vad_threshold: 0.15,
            vad_smoothing: 0.98,
        }
    }
}

impl NoiseReductionSettings {
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(name: &'static str, reason: &str) -> EngineError {
            EngineError::InvalidSetting {
                name,
                reason: reason.to_string(),
            }
        }

        if self.noise_frames == 0 {
            return Err(invalid("noise_frames", "must be at least 1"));
        }
        if self.activity_window == 0 {
            return Err(invalid("activity_window", "must be at least 1"));
        }
        if self.audio_history_frames == 0 || self.wideband_history_frames == 0 {
            return Err(invalid("history_frames", "history must hold at least one frame"));
        }
        if !self.wideband_threshold_hz.is_finite() || self.wideband_threshold_hz <= 0.0 {
            return Err(invalid("wideband_threshold_hz", "must be positive"));
        }
        if !self.output_gain.is_finite() || self.output_gain < 0.0 {
            return Err(invalid("output_gain", "must be finite and non-negative"));
        }
        if !self.silence_threshold_db.is_finite() {
            return Err(invalid("silence_threshold_db", "must be finite"));
        }
        if !(0.0..1.0).contains(&self.vad_smoothing) {
            return Err(invalid("vad_smoothing", "must be in [0, 1)"));
        }
        Ok(())
    }
}

// =============================================================================
// Derived frame geometry
// =============================================================================

/// Frame geometry for one sample rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub is_wideband: bool,
    /// Analysis frame length (`Slen`).
    pub frame_len: usize,
    /// Overlap tail length (`len1`).
    pub len1: usize,
    /// Hop length (`len2`).
    pub len2: usize,
    /// Transform size, twice the frame length.
    pub fft_size: usize,
    /// Samples needed before the first noise profile can be sampled.
    pub training_demand: usize,
    /// Frames averaged by a noise profile sample.
    pub noise_frames: usize,
}

impl EngineConfig {
    pub fn new(sample_rate: f32, settings: &NoiseReductionSettings) -> Result<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(EngineError::InvalidSampleRate(sample_rate));
        }
        let mut frame_len = (FRAME_SECONDS * sample_rate as f64).floor() as usize;
        if frame_len % 2 == 1 {
            frame_len += 1;
        }
        if frame_len < FRAME_LEN_MIN {
            return Err(EngineError::InvalidSampleRate(sample_rate));
        }

        let len1 = frame_len / 2;
        let len2 = frame_len - len1;
        let noise_frames = settings.noise_frames.max(1);

        Ok(Self {
            sample_rate,
            is_wideband: sample_rate > settings.wideband_threshold_hz,
            frame_len,
            len1,
            len2,
            fft_size: 2 * frame_len,
            training_demand: noise_frames * frame_len * 2,
            noise_frames,
        })
    }

    /// Noise history capacity for this mode.
    pub fn history_capacity(&self, settings: &NoiseReductionSettings) -> usize {
        if self.is_wideband {
            settings.wideband_history_frames
        } else {
            settings.audio_history_frames
        }
    }

    /// History length required before continuous refinement recomputes the profile.
    ///
    /// The wideband history is shorter than the audio-rate threshold, so wideband refines
    /// once its window is full.
    pub fn refine_threshold(&self, settings: &NoiseReductionSettings) -> usize {
        if self.is_wideband {
            settings.wideband_history_frames
        } else {
            settings.history_min_frames + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_rate_geometry() {
        let cfg = EngineConfig::new(16_000.0, &NoiseReductionSettings::default()).unwrap();
        assert!(!cfg.is_wideband);
        assert_eq!(cfg.frame_len, 320);
        assert_eq!(cfg.len1, 160);
        assert_eq!(cfg.len2, 160);
        assert_eq!(cfg.fft_size, 640);
        assert_eq!(cfg.training_demand, 7_680);
    }

    #[test]
    fn test_48k_geometry_is_wideband() {
        let cfg = EngineConfig::new(48_000.0, &NoiseReductionSettings::default()).unwrap();
        assert!(cfg.is_wideband);
        assert_eq!(cfg.frame_len, 960);
        assert_eq!(cfg.len1, 480);
        assert_eq!(cfg.len2, 480);
        assert_eq!(cfg.fft_size, 1920);
        assert_eq!(cfg.training_demand, 23_040);
    }

    #[test]
    fn test_odd_frame_forced_even() {
        // 0.02 * 22050 = 441
        let cfg = EngineConfig::new(22_050.0, &NoiseReductionSettings::default()).unwrap();
        assert_eq!(cfg.frame_len, 442);
        assert_eq!(cfg.len1 + cfg.len2, cfg.frame_len);
    }

    #[test]
    fn test_wideband_selected_above_threshold() {
        let s = NoiseReductionSettings::default();
        assert!(EngineConfig::new(192_000.0, &s).unwrap().is_wideband);
        assert!(!EngineConfig::new(24_000.0, &s).unwrap().is_wideband);
    }

    #[test]
    fn test_rejects_tiny_sample_rate() {
        let s = NoiseReductionSettings::default();
        assert!(matches!(
            EngineConfig::new(100.0, &s),
            Err(EngineError::InvalidSampleRate(_))
        ));
        assert!(EngineConfig::new(f32::NAN, &s).is_err());
    }

    #[test]
    fn test_settings_json_partial_override() {
        let s = NoiseReductionSettings::from_json(r#"{ "noise_frames": 6, "auto_retrain": false }"#)
            .unwrap();
        assert_eq!(s.noise_frames, 6);
        assert!(!s.auto_retrain);
        assert_eq!(s.overlap_interval, 40_000);
    }

    #[test]
    fn test_settings_validation() {
        assert!(NoiseReductionSettings::from_json(r#"{ "noise_frames": 0 }"#).is_err());
        assert!(NoiseReductionSettings::from_json(r#"{ "vad_smoothing": 1.5 }"#).is_err());
        assert!(matches!(
            NoiseReductionSettings::from_json("not json"),
            Err(EngineError::Settings(_))
        ));
    }

    #[test]
    fn test_settings_json_roundtrip_defaults() {
        let s = NoiseReductionSettings::default();
        let text = s.to_json().unwrap();
        assert_eq!(NoiseReductionSettings::from_json(&text).unwrap(), s);
    }
}
