//! Noise Reduction Block
//!
//! Wraps a [`NoiseReductionEngine`] for use inside a threaded DSP graph.
//!
//! # Design Notes
//! - One mutex guards the engine. Configuration calls (`set_if`, `set_effective_sample_rate`,
//!   `set_hold`, `reset`) and the processing cycle are therefore serialised and a retune never
//!   lands half way through a block.
//! - Bypass is an atomic flag so toggling it never waits on a processing cycle.
//! - A poisoned mutex is recovered with `into_inner`.

use crate::activity::SignalActivityEstimator;
use crate::dsp::{EngineSample, EngineSnapshot, NoiseReductionEngine, NoiseReductionSettings};
use crate::error::Result;
use crate::stream::{InputStream, OutputStream};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// What one processing cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    /// This many samples were published downstream.
    Published(usize),
    /// Input consumed, nothing to publish yet.
    Starved,
    /// The upstream stream closed.
    InputClosed,
    /// The downstream consumer is gone.
    OutputClosed,
}

struct BlockState<T> {
    engine: NoiseReductionEngine,
    staged: Vec<T>,
}

pub struct NoiseReductionBlock<T: EngineSample> {
    state: Mutex<BlockState<T>>,
    bypass: AtomicBool,
}

impl<T: EngineSample> NoiseReductionBlock<T> {
    pub fn new(
        sample_rate: f32,
        settings: NoiseReductionSettings,
        activity: Box<dyn SignalActivityEstimator>,
    ) -> Result<Self> {
        let engine = NoiseReductionEngine::new(sample_rate, settings, activity)?;
        Ok(Self {
            state: Mutex::new(BlockState {
                engine,
                staged: Vec::new(),
            }),
            bypass: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BlockState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_if(&self, if_hz: f64) {
        self.lock().engine.set_if(if_hz);
    }

    pub fn set_effective_sample_rate(&self, sample_rate: f32) -> Result<()> {
        self.lock().engine.set_effective_sample_rate(sample_rate)
    }

    pub fn set_hold(&self, held: bool) {
        self.lock().engine.set_hold(held);
    }

    pub fn set_bypass(&self, bypass: bool) {
        if self.bypass.swap(bypass, Ordering::Relaxed) != bypass {
            info!("noise reduction: bypass {}", if bypass { "on" } else { "off" });
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.lock().engine.reset();
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.lock().engine.snapshot()
    }

    /// Runs one cycle: read a block, denoise it, publish whatever is ready.
    pub fn run(&self, input: &mut dyn InputStream<T>, output: &mut dyn OutputStream<T>) -> CycleResult {
        let n = match input.read() {
            Some(n) => n,
            None => return CycleResult::InputClosed,
        };

        let mut guard = self.lock();
        let state = &mut *guard;
        state.staged.clear();
        state.staged.extend_from_slice(&input.read_buf()[..n]);
        input.flush();

        let out = output.write_buf();
        out.clear();
        let count = if self.is_bypassed() {
            out.extend_from_slice(&state.staged);
            state.staged.len()
        } else {
            state.engine.process(&state.staged, out).produced()
        };
        drop(guard);

        if count == 0 {
            return CycleResult::Starved;
        }
        if !output.swap(count) {
            return CycleResult::OutputClosed;
        }
        CycleResult::Published(count)
    }
}

impl<T: EngineSample> NoiseReductionBlock<T> {
    /// Runs cycles on a dedicated thread until either stream closes.
    ///
    /// When the input closes the engine state is discarded, so a re-attached input trains
    /// afresh. Returns the number of samples published.
    pub fn spawn_worker<I, O>(self: Arc<Self>, mut input: I, mut output: O) -> JoinHandle<usize>
    where
        I: InputStream<T> + 'static,
        O: OutputStream<T> + 'static,
    {
        std::thread::spawn(move || {
            let mut published = 0;
            loop {
                match self.run(&mut input, &mut output) {
                    CycleResult::Published(n) => published += n,
                    CycleResult::Starved => {}
                    CycleResult::InputClosed => {
                        self.reset();
                        info!("noise reduction: input detached after {published} samples");
                        break;
                    }
                    CycleResult::OutputClosed => {
                        info!("noise reduction: output closed after {published} samples");
                        break;
                    }
                }
            }
            published
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ConstantActivity;
    use crate::dsp::ControllerPhase;
    use crate::stream::stream_pair;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rustfft::num_complex::Complex;

    fn block<T: EngineSample>() -> Arc<NoiseReductionBlock<T>> {
        Arc::new(
            NoiseReductionBlock::new(
                8_000.0,
                NoiseReductionSettings::default(),
                Box::new(ConstantActivity::new(0.0)),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_worker_publishes_whole_hops() {
        let blk = block::<Complex<f32>>();
        let (mut src, src_rx) = stream_pair::<Complex<f32>>();
        let (sink_tx, mut sink) = stream_pair::<Complex<f32>>();
        let worker = blk.clone().spawn_worker(src_rx, sink_tx);

        let feeder = std::thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(1);
            for _ in 0..40 {
                let block: Vec<Complex<f32>> = (0..256)
                    .map(|_| Complex::new(rng.random_range(-0.1..0.1), rng.random_range(-0.1..0.1)))
                    .collect();
                assert!(src.write(&block));
            }
        });

        let mut received = 0;
        while let Some(n) = sink.read() {
            assert_eq!(n % 80, 0);
            assert!(sink.read_buf().iter().all(|c| c.re.is_finite()));
            received += n;
            sink.flush();
        }
        feeder.join().unwrap();
        let published = worker.join().unwrap();

        assert_eq!(published, received);
        assert_eq!(received, (40 * 256 / 80 - 1) * 80);
        // The input closing detaches the engine.
        assert_eq!(blk.snapshot().phase, ControllerPhase::Uninitialized);
    }

    #[test]
    fn test_bypass_copies_input() {
        let blk = block::<f32>();
        let (mut src, mut src_rx) = stream_pair::<f32>();
        let (mut sink_tx, mut sink) = stream_pair::<f32>();
        blk.set_bypass(true);

        assert!(src.write(&[0.5, -0.25, 1.0]));
        assert_eq!(blk.run(&mut src_rx, &mut sink_tx), CycleResult::Published(3));
        assert_eq!(sink.read(), Some(3));
        assert_eq!(sink.read_buf(), &[0.5, -0.25, 1.0]);
    }

    #[test]
    fn test_starved_cycle_publishes_nothing() {
        let blk = block::<f32>();
        let (mut src, mut src_rx) = stream_pair::<f32>();
        let (mut sink_tx, _sink) = stream_pair::<f32>();
        assert!(src.write(&[0.1; 100]));
        assert_eq!(blk.run(&mut src_rx, &mut sink_tx), CycleResult::Starved);
        assert_eq!(blk.snapshot().buffered, 100);
    }

    #[test]
    fn test_closed_streams_reported() {
        let blk = block::<f32>();
        let (src, mut src_rx) = stream_pair::<f32>();
        let (mut sink_tx, sink) = stream_pair::<f32>();
        drop(src);
        assert_eq!(blk.run(&mut src_rx, &mut sink_tx), CycleResult::InputClosed);

        let (mut src, mut src_rx) = stream_pair::<f32>();
        blk.set_bypass(true);
        drop(sink);
        assert!(src.write(&[1.0]));
        assert_eq!(blk.run(&mut src_rx, &mut sink_tx), CycleResult::OutputClosed);
    }

    #[test]
    fn test_configuration_is_serialised_with_processing() {
        let blk = block::<f32>();
        blk.set_hold(true);
        blk.set_if(10_700_000.0);
        let snap = blk.snapshot();
        assert!(snap.held);
        assert_eq!(snap.if_hz, 10_700_000.0);
        blk.set_effective_sample_rate(48_000.0).unwrap();
        assert_eq!(blk.snapshot().sample_rate, 48_000.0);
        assert!(blk.set_effective_sample_rate(0.0).is_err());
    }
}
