//! Dual Profile Controller
//!
//! Runs two noise-reduction chains over the same frames and swaps them without a gap.
//!
//! # Purpose
//! A noise floor estimated once drifts away from reality over a long session. Re-sampling it in
//! place would reset the decision-directed memory and cause an audible step. Instead a
//! *candidate* chain is re-trained on recent quiet input, left to converge in the background
//! for `overlap_interval` samples, then promoted to *active*.
//!
//! # Phases
//! ```text
//! Uninitialized -> TrainingActive -> Steady -> RetrainingCandidate -> SwapPending -> Steady
//! ```
//! `RetrainingCandidate` only lasts for the duration of the candidate's `sample` call.
//!
//! # Design Notes
//! - Both chains see every frame; only the active chain's hop is published.
//! - Phase checks run once per engine call, before that call's frames are processed.
//! - The swap is `std::mem::swap`, so nothing is copied and the outgoing active chain simply
//!   becomes the next candidate.

use crate::activity::SignalActivityEstimator;
use crate::dsp::config::{EngineConfig, NoiseReductionSettings};
use crate::dsp::gain::{apply_gains, DecisionDirectedGainEstimator, DecisionDirectedState};
use crate::dsp::noise_profile::{NoiseProfile, NoiseProfileEstimator};
use crate::dsp::synthesis::OverlapAddSynthesizer;
use crate::dsp::windower::FrameWindower;
use crate::nr_log;
use log::info;
use ringbuf::{Consumer, Producer, RingBuffer};
use rustfft::num_complex::Complex;
use serde::Serialize;

// =============================================================================
// Phase
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerPhase {
    /// No input since the last reset.
    Uninitialized,
    /// Accumulating the initial noise-only stretch.
    TrainingActive,
    /// Active chain trained; waiting for the next retrain opportunity.
    Steady,
    /// Candidate chain being re-sampled.
    RetrainingCandidate,
    /// Candidate converging in the background until the swap.
    SwapPending,
}

impl ControllerPhase {
    pub fn is_trained(self) -> bool {
        !matches!(self, Self::Uninitialized | Self::TrainingActive)
    }
}

// =============================================================================
// Chain
// =============================================================================

/// One complete set of adaptive state: noise profile, decision-directed memory, last gains.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileChain {
    profile: NoiseProfile,
    dd: DecisionDirectedState,
    gains: Vec<f32>,
}

impl ProfileChain {
    fn new(estimator: &NoiseProfileEstimator, cfg: &EngineConfig) -> Self {
        Self {
            profile: estimator.empty_profile(),
            dd: DecisionDirectedState::new(cfg.len1),
            gains: vec![1.0; cfg.fft_size],
        }
    }

    pub fn profile(&self) -> &NoiseProfile {
        &self.profile
    }

    pub fn dd_state(&self) -> &DecisionDirectedState {
        &self.dd
    }

    /// Per-bin gains applied to the most recent frame.
    pub fn gains(&self) -> &[f32] {
        &self.gains
    }
}

// =============================================================================
// Trailing buffer
// =============================================================================

/// The most recent `capacity` input samples, oldest dropped first.
pub struct TrailingBuffer {
    producer: Producer<Complex<f32>>,
    consumer: Consumer<Complex<f32>>,
}

impl TrailingBuffer {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::<Complex<f32>>::new(capacity.max(1)).split();
        Self { producer, consumer }
    }

    pub fn push(&mut self, samples: &[Complex<f32>]) {
        let cap = self.producer.capacity();
        let samples = if samples.len() > cap {
            &samples[samples.len() - cap..]
        } else {
            samples
        };
        let free = self.producer.remaining();
        if samples.len() > free {
            self.consumer.discard(samples.len() - free);
        }
        self.producer.push_slice(samples);
    }

    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn clear(&mut self) {
        let n = self.consumer.len();
        self.consumer.discard(n);
    }

    /// Copies the newest `count` samples, oldest first, into `dst`.
    pub fn copy_recent(&self, count: usize, dst: &mut Vec<Complex<f32>>) {
        let skip = self.consumer.len().saturating_sub(count);
        dst.clear();
        dst.extend(self.consumer.iter().skip(skip).copied());
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Per-frame stages shared by both chains.
struct FrameStages {
    windower: FrameWindower,
    estimator: NoiseProfileEstimator,
    gain: DecisionDirectedGainEstimator,
    synth: OverlapAddSynthesizer,
    spectrum: Vec<Complex<f32>>,
    mags: Vec<f32>,
    work: Vec<Complex<f32>>,
}

impl FrameStages {
    fn run_chain(&mut self, chain: &mut ProfileChain, held: bool, out: &mut [Complex<f32>]) {
        self.estimator.update(&mut chain.profile, &self.mags, held);
        let llr = self.gain.estimate(
            &mut chain.dd,
            chain.profile.noise_power(),
            &self.mags,
            &mut chain.gains,
        );
        if !held {
            self.estimator
                .track_vad(&mut chain.profile, llr, self.gain.signal_power());
        }
        apply_gains(&self.spectrum, &chain.gains, &mut self.work);
        self.windower.inverse(&mut self.work);
        self.synth.overlap_add(&self.work, chain.dd.x_old_mut(), out);
    }
}

pub struct DualProfileController {
    cfg: EngineConfig,
    phase: ControllerPhase,
    active: ProfileChain,
    candidate: ProfileChain,
    stages: FrameStages,
    held: bool,

    samples_since_retrain_trigger: usize,
    samples_since_retrain_completed: usize,
    retrain_count: u64,
    swap_count: u64,
    last_busy_range_db: Option<i32>,

    scratch: Vec<Complex<f32>>,
    discard_hop: Vec<Complex<f32>>,
}

impl DualProfileController {
    pub fn new(cfg: EngineConfig, settings: &NoiseReductionSettings) -> Self {
        let windower = FrameWindower::new(&cfg);
        let synth = OverlapAddSynthesizer::new(&cfg, windower.ola_scale(), settings.output_gain);
        let estimator = NoiseProfileEstimator::new(&cfg, settings);
        let active = ProfileChain::new(&estimator, &cfg);
        let candidate = active.clone();

        Self {
            phase: ControllerPhase::Uninitialized,
            active,
            candidate,
            stages: FrameStages {
                windower,
                estimator,
                gain: DecisionDirectedGainEstimator::new(&cfg),
                synth,
                spectrum: vec![Complex::default(); cfg.fft_size],
                mags: vec![0.0; cfg.fft_size],
                work: vec![Complex::default(); cfg.fft_size],
            },
            held: false,
            samples_since_retrain_trigger: 0,
            samples_since_retrain_completed: 0,
            retrain_count: 0,
            swap_count: 0,
            last_busy_range_db: None,
            scratch: Vec::with_capacity(cfg.training_demand),
            discard_hop: vec![Complex::default(); cfg.len2],
            cfg,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn active(&self) -> &ProfileChain {
        &self.active
    }

    pub fn candidate(&self) -> &ProfileChain {
        &self.candidate
    }

    pub fn samples_since_retrain_trigger(&self) -> usize {
        self.samples_since_retrain_trigger
    }

    pub fn samples_since_retrain_completed(&self) -> usize {
        self.samples_since_retrain_completed
    }

    pub fn retrain_count(&self) -> u64 {
        self.retrain_count
    }

    pub fn swap_count(&self) -> u64 {
        self.swap_count
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Freezes continuous refinement on both chains. Gains keep being applied.
    pub fn set_hold(&mut self, held: bool) {
        self.held = held;
    }

    /// Back to `Uninitialized` with fresh chains. Hold is a user setting and survives.
    pub fn reset(&mut self) {
        self.phase = ControllerPhase::Uninitialized;
        self.active = ProfileChain::new(&self.stages.estimator, &self.cfg);
        self.candidate = self.active.clone();
        self.samples_since_retrain_trigger = 0;
        self.samples_since_retrain_completed = 0;
        self.last_busy_range_db = None;
    }

    /// Marks the start of training once input arrives.
    pub fn begin_training(&mut self) {
        if self.phase == ControllerPhase::Uninitialized {
            self.phase = ControllerPhase::TrainingActive;
        }
    }

    /// Samples the active chain from the head of a noise-only stretch and seeds the candidate
    /// as a copy of it.
    pub fn train(&mut self, samples: &[Complex<f32>]) {
        let stages = &mut self.stages;
        stages
            .estimator
            .sample(&mut stages.windower, samples, &mut self.active.profile);
        self.active.dd.reset();
        self.active.gains.fill(1.0);
        self.candidate = self.active.clone();

        self.phase = ControllerPhase::Steady;
        self.samples_since_retrain_trigger = 0;
        self.samples_since_retrain_completed = 0;
        info!(
            "noise reduction trained: {} Hz, frame {} samples, {}",
            self.cfg.sample_rate,
            self.cfg.frame_len,
            if self.cfg.is_wideband { "wideband" } else { "audio rate" }
        );
    }

    /// Advances the retrain/swap protocol by `new_samples` input samples.
    pub fn advance(
        &mut self,
        new_samples: usize,
        trailing: &TrailingBuffer,
        activity: &dyn SignalActivityEstimator,
        settings: &NoiseReductionSettings,
    ) {
        if !self.phase.is_trained() {
            return;
        }
        self.samples_since_retrain_trigger =
            self.samples_since_retrain_trigger.saturating_add(new_samples);

        match self.phase {
            ControllerPhase::Steady => {
                if settings.auto_retrain
                    && self.samples_since_retrain_trigger >= settings.switch_interval
                    && trailing.len() >= self.cfg.training_demand
                {
                    self.try_retrain(trailing, activity, settings);
                }
            }
            ControllerPhase::SwapPending => {
                self.samples_since_retrain_completed =
                    self.samples_since_retrain_completed.saturating_add(new_samples);
                if self.samples_since_retrain_completed >= settings.overlap_interval {
                    self.swap();
                }
            }
            _ => {}
        }
    }

    fn try_retrain(
        &mut self,
        trailing: &TrailingBuffer,
        activity: &dyn SignalActivityEstimator,
        settings: &NoiseReductionSettings,
    ) {
        let range_db = activity.recent_dynamic_range_db(settings.activity_window);
        if range_db.is_nan() || range_db >= settings.silence_threshold_db {
            let rounded = if range_db.is_finite() { range_db as i32 } else { i32::MAX };
            if self.last_busy_range_db != Some(rounded) {
                self.last_busy_range_db = Some(rounded);
                nr_log!(
                    "noise reduction: channel busy ({:.1} dB range), retrain deferred",
                    range_db
                );
            }
            return;
        }
        self.last_busy_range_db = None;

        self.phase = ControllerPhase::RetrainingCandidate;
        trailing.copy_recent(self.cfg.training_demand, &mut self.scratch);
        let stages = &mut self.stages;
        stages
            .estimator
            .sample(&mut stages.windower, &self.scratch, &mut self.candidate.profile);
        self.candidate.dd.reset();

        self.phase = ControllerPhase::SwapPending;
        self.samples_since_retrain_trigger = 0;
        self.samples_since_retrain_completed = 0;
        self.retrain_count += 1;
        info!(
            "noise reduction: candidate profile retrained ({:.1} dB range)",
            range_db
        );
    }

    fn swap(&mut self) {
        std::mem::swap(&mut self.active, &mut self.candidate);
        self.phase = ControllerPhase::Steady;
        self.samples_since_retrain_trigger = 0;
        self.samples_since_retrain_completed = 0;
        self.swap_count += 1;
        info!(
            "noise reduction: swapped to retrained profile (generation {})",
            self.active.profile.generation()
        );
    }

    /// Processes one `Slen` frame through both chains and writes the active chain's hop.
    pub fn process_frame(&mut self, frame: &[Complex<f32>], out: &mut [Complex<f32>]) {
        let stages = &mut self.stages;
        stages
            .windower
            .analyze(frame, &mut stages.spectrum, &mut stages.mags);
        stages.run_chain(&mut self.active, self.held, out);
        stages.run_chain(&mut self.candidate, self.held, &mut self.discard_hop);
    }
}
