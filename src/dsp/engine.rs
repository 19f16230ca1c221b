//! Noise Reduction Engine
//!
//! Streaming front end of the log-MMSE noise reducer. Accepts arbitrarily sized sample blocks,
//! buffers them into overlapped frames, and emits denoised samples in whole hops.
//!
//! # Sample accounting
//! A frame is processed whenever `Slen` samples are buffered; it emits `len2` samples and
//! consumes `len2`. After `N` input samples (once trained) the engine has therefore produced
//! `(floor(N / len2) - 1) · len2` samples. Nothing is duplicated or dropped.
//!
//! # Training
//! Until `training_demand` samples have arrived nothing is produced. The first
//! `training_demand` samples are assumed to be noise only and seed the active profile. They
//! are still processed and published afterwards.
//!
//! # Reset semantics
//! `set_if` and `set_effective_sample_rate` discard all adaptive state and buffered input.

use crate::activity::SignalActivityEstimator;
use crate::dsp::config::{EngineConfig, NoiseReductionSettings};
use crate::dsp::controller::{ControllerPhase, DualProfileController, TrailingBuffer};
use crate::error::Result;
use log::info;
use ringbuf::{Consumer, Producer, RingBuffer};
use rustfft::num_complex::Complex;
use serde::Serialize;

// Input ring headroom beyond the training demand, in frames.
const INPUT_HEADROOM_FRAMES: usize = 4;

// =============================================================================
// Sample types
// =============================================================================

/// Sample types the engine accepts. The core always runs on complex samples.
pub trait EngineSample: Copy + Send + 'static {
    fn to_complex(self) -> Complex<f32>;
    fn from_complex(c: Complex<f32>) -> Self;
}

impl EngineSample for f32 {
    #[inline]
    fn to_complex(self) -> Complex<f32> {
        Complex::new(self, 0.0)
    }

    #[inline]
    fn from_complex(c: Complex<f32>) -> Self {
        c.re
    }
}

impl EngineSample for Complex<f32> {
    #[inline]
    fn to_complex(self) -> Complex<f32> {
        self
    }

    #[inline]
    fn from_complex(c: Complex<f32>) -> Self {
        c
    }
}

// =============================================================================
// Results and diagnostics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Not enough input buffered to produce anything yet.
    Starved { buffered: usize, demand: usize },
    /// This many samples were appended to the output.
    Produced(usize),
}

impl ProcessOutcome {
    pub fn produced(self) -> usize {
        match self {
            Self::Produced(n) => n,
            Self::Starved { .. } => 0,
        }
    }
}

/// Point-in-time view of the engine for logging and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub sample_rate: f32,
    pub is_wideband: bool,
    pub if_hz: f64,
    pub phase: ControllerPhase,
    pub held: bool,
    pub buffered: usize,
    pub trailing: usize,
    pub samples_since_retrain_trigger: usize,
    pub samples_since_retrain_completed: usize,
    pub retrain_count: u64,
    pub swap_count: u64,
    pub active_generation: u64,
    pub candidate_generation: u64,
}

// =============================================================================
// Engine
// =============================================================================

pub struct NoiseReductionEngine {
    settings: NoiseReductionSettings,
    controller: DualProfileController,
    activity: Box<dyn SignalActivityEstimator>,
    if_hz: f64,

    input_producer: Producer<Complex<f32>>,
    input_consumer: Consumer<Complex<f32>>,
    trailing: TrailingBuffer,

    staged: Vec<Complex<f32>>,
    training: Vec<Complex<f32>>,
    frame: Vec<Complex<f32>>,
    hop: Vec<Complex<f32>>,
}

impl NoiseReductionEngine {
    pub fn new(
        sample_rate: f32,
        settings: NoiseReductionSettings,
        activity: Box<dyn SignalActivityEstimator>,
    ) -> Result<Self> {
        settings.validate()?;
        let cfg = EngineConfig::new(sample_rate, &settings)?;
        let buf_cap = cfg.training_demand + cfg.frame_len * INPUT_HEADROOM_FRAMES;
        let (input_producer, input_consumer) = RingBuffer::<Complex<f32>>::new(buf_cap).split();

        info!(
            "noise reduction engine: {} Hz, Slen {}, hop {}, training demand {}",
            sample_rate, cfg.frame_len, cfg.len2, cfg.training_demand
        );

        Ok(Self {
            controller: DualProfileController::new(cfg, &settings),
            settings,
            activity,
            if_hz: 0.0,
            input_producer,
            input_consumer,
            trailing: TrailingBuffer::new(cfg.training_demand),
            staged: Vec::new(),
            training: Vec::with_capacity(cfg.training_demand),
            frame: vec![Complex::default(); cfg.frame_len],
            hop: vec![Complex::default(); cfg.len2],
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.controller.config()
    }

    pub fn settings(&self) -> &NoiseReductionSettings {
        &self.settings
    }

    pub fn phase(&self) -> ControllerPhase {
        self.controller.phase()
    }

    /// Samples waiting in the input buffer.
    pub fn buffered(&self) -> usize {
        self.input_consumer.len()
    }

    /// Per-bin gains the active chain applied to the last frame.
    pub fn last_gains(&self) -> &[f32] {
        self.controller.active().gains()
    }

    pub fn controller(&self) -> &DualProfileController {
        &self.controller
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let cfg = self.controller.config();
        EngineSnapshot {
            sample_rate: cfg.sample_rate,
            is_wideband: cfg.is_wideband,
            if_hz: self.if_hz,
            phase: self.controller.phase(),
            held: self.controller.is_held(),
            buffered: self.input_consumer.len(),
            trailing: self.trailing.len(),
            samples_since_retrain_trigger: self.controller.samples_since_retrain_trigger(),
            samples_since_retrain_completed: self.controller.samples_since_retrain_completed(),
            retrain_count: self.controller.retrain_count(),
            swap_count: self.controller.swap_count(),
            active_generation: self.controller.active().profile().generation(),
            candidate_generation: self.controller.candidate().profile().generation(),
        }
    }

    /// Feeds `input` and appends every completed hop to `out`.
    pub fn process<S: EngineSample>(&mut self, input: &[S], out: &mut Vec<S>) -> ProcessOutcome {
        let frame_len = self.controller.config().frame_len;
        let demand = self.controller.config().training_demand;

        if !input.is_empty() {
            self.controller.begin_training();

            self.staged.clear();
            self.staged.extend(input.iter().map(|s| s.to_complex()));
            self.trailing.push(&self.staged);
            self.controller.advance(
                input.len(),
                &self.trailing,
                self.activity.as_ref(),
                &self.settings,
            );
        }

        let mut produced = 0;
        let mut offset = 0;
        loop {
            let pushed = self.input_producer.push_slice(&self.staged[offset..]);
            offset += pushed;

            if !self.controller.phase().is_trained() && self.input_consumer.len() >= demand {
                self.train_from_buffer(demand);
            }
            if self.controller.phase().is_trained() {
                produced += self.drain_frames(out);
            }

            if offset >= self.staged.len() || (pushed == 0 && !self.controller.phase().is_trained())
            {
                break;
            }
        }
        self.staged.clear();

        let buffered = self.input_consumer.len();
        if !self.controller.phase().is_trained() {
            ProcessOutcome::Starved { buffered, demand }
        } else if produced == 0 {
            ProcessOutcome::Starved {
                buffered,
                demand: frame_len,
            }
        } else {
            ProcessOutcome::Produced(produced)
        }
    }

    fn train_from_buffer(&mut self, demand: usize) {
        self.training.clear();
        self.training
            .extend(self.input_consumer.iter().take(demand).copied());
        self.controller.train(&self.training);
    }

    fn drain_frames<S: EngineSample>(&mut self, out: &mut Vec<S>) -> usize {
        let frame_len = self.frame.len();
        let hop = self.hop.len();
        let mut produced = 0;

        while self.input_consumer.len() >= frame_len {
            for (dst, src) in self.frame.iter_mut().zip(self.input_consumer.iter()) {
                *dst = *src;
            }
            self.controller.process_frame(&self.frame, &mut self.hop);
            out.extend(self.hop.iter().map(|&c| S::from_complex(c)));
            self.input_consumer.discard(hop);
            produced += hop;
        }
        produced
    }

    /// Retunes the carrier. Any change of IF invalidates the noise estimate.
    pub fn set_if(&mut self, if_hz: f64) {
        self.if_hz = if_hz;
        self.reset();
    }

    /// Rebuilds the frame geometry for a new rate. On error the engine is left as it was.
    pub fn set_effective_sample_rate(&mut self, sample_rate: f32) -> Result<()> {
        let cfg = EngineConfig::new(sample_rate, &self.settings)?;
        let held = self.controller.is_held();
        let buf_cap = cfg.training_demand + cfg.frame_len * INPUT_HEADROOM_FRAMES;
        let (input_producer, input_consumer) = RingBuffer::<Complex<f32>>::new(buf_cap).split();

        self.controller = DualProfileController::new(cfg, &self.settings);
        self.controller.set_hold(held);
        self.input_producer = input_producer;
        self.input_consumer = input_consumer;
        self.trailing = TrailingBuffer::new(cfg.training_demand);
        self.frame = vec![Complex::default(); cfg.frame_len];
        self.hop = vec![Complex::default(); cfg.len2];

        info!(
            "noise reduction engine: sample rate now {} Hz ({})",
            sample_rate,
            if cfg.is_wideband { "wideband" } else { "audio rate" }
        );
        Ok(())
    }

    pub fn set_hold(&mut self, held: bool) {
        if held != self.controller.is_held() {
            info!("noise reduction: profile hold {}", if held { "on" } else { "off" });
        }
        self.controller.set_hold(held);
    }

    pub fn is_held(&self) -> bool {
        self.controller.is_held()
    }

    /// Discards buffered input and all adaptive state. The next call starts training again.
    pub fn reset(&mut self) {
        let n = self.input_consumer.len();
        self.input_consumer.discard(n);
        self.trailing.clear();
        self.controller.reset();
    }
}
