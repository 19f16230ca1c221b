//! Adaptive log-MMSE spectral noise reduction for live sample streams.
//!
//! The engine denoises complex baseband or real audio with an Ephraim–Malah log-spectral
//! amplitude estimator while re-estimating the background noise spectrum as it runs. A second
//! profile chain is periodically re-trained on quiet input and swapped in without a gap.
//!
//! # Layout
//! - [`dsp`]: the engine and its stages (windower, noise profile, gain, synthesis, controller).
//! - [`activity`]: channel activity readings that gate re-training.
//! - [`stream`] and [`block`]: threaded block plumbing around the engine.
//! - [`debug`]: processing-thread logging (`nr_log!`).

pub mod activity;
pub mod block;
pub mod debug;
pub mod dsp;
pub mod error;
pub mod stream;

pub use activity::{ConstantActivity, SignalActivityEstimator, SnrActivityMeter};
pub use block::{CycleResult, NoiseReductionBlock};
pub use dsp::{
    ControllerPhase, EngineSample, EngineSnapshot, NoiseReductionEngine, NoiseReductionSettings,
    ProcessOutcome,
};
pub use error::{EngineError, Result};
pub use stream::{stream_pair, InputStream, OutputStream, StreamReader, StreamWriter};
