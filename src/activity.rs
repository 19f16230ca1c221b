//! Signal activity estimation.
//!
//! The retrain protocol only re-samples the noise floor while the channel looks quiet. "Quiet"
//! is judged by the spread (max − min, dB) of recent signal-strength readings, supplied by
//! whatever component meters the channel.
//!
//! [`SnrActivityMeter`] stores readings as `f32` bits in atomics, so a metering thread can
//! record while the processing thread queries without locks.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Readings kept by [`SnrActivityMeter`].
pub const SNR_HISTORY_LEN: usize = 1500;

/// Source of the channel dynamic-range reading consulted before a retrain.
pub trait SignalActivityEstimator: Send + Sync {
    /// Spread in dB of the last `window` readings. Large values mean the channel is busy.
    fn recent_dynamic_range_db(&self, window: usize) -> f32;
}

impl<T: SignalActivityEstimator + ?Sized> SignalActivityEstimator for Arc<T> {
    fn recent_dynamic_range_db(&self, window: usize) -> f32 {
        (**self).recent_dynamic_range_db(window)
    }
}

/// Reports a fixed dynamic range. `0.0` always permits retraining.
#[derive(Debug, Default)]
pub struct ConstantActivity {
    range_db: AtomicU32,
}

impl ConstantActivity {
    pub fn new(range_db: f32) -> Self {
        Self {
            range_db: AtomicU32::new(range_db.to_bits()),
        }
    }

    pub fn set(&self, range_db: f32) {
        self.range_db.store(range_db.to_bits(), Ordering::Relaxed);
    }
}

impl SignalActivityEstimator for ConstantActivity {
    fn recent_dynamic_range_db(&self, _window: usize) -> f32 {
        f32::from_bits(self.range_db.load(Ordering::Relaxed))
    }
}

/// Fixed-size history of SNR readings (dB).
pub struct SnrActivityMeter {
    readings: Box<[AtomicU32]>,
    head: AtomicUsize,
    count: AtomicUsize,
}

impl Default for SnrActivityMeter {
    fn default() -> Self {
        Self::with_capacity(SNR_HISTORY_LEN)
    }
}

impl SnrActivityMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let readings = (0..capacity.max(1)).map(|_| AtomicU32::new(0)).collect();
        Self {
            readings,
            head: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.readings.len()
    }

    /// Number of readings held, at most [`capacity`](Self::capacity).
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records one reading. Single writer.
    pub fn push(&self, snr_db: f32) {
        if !snr_db.is_finite() {
            return;
        }
        let cap = self.readings.len();
        let head = self.head.load(Ordering::Relaxed);
        self.readings[head].store(snr_db.to_bits(), Ordering::Relaxed);
        self.head.store((head + 1) % cap, Ordering::Release);
        let count = self.count.load(Ordering::Relaxed);
        if count < cap {
            self.count.store(count + 1, Ordering::Release);
        }
    }

    pub fn clear(&self) {
        self.count.store(0, Ordering::Release);
        self.head.store(0, Ordering::Release);
    }
}

impl SignalActivityEstimator for SnrActivityMeter {
    fn recent_dynamic_range_db(&self, window: usize) -> f32 {
        let cap = self.readings.len();
        let head = self.head.load(Ordering::Acquire);
        let n = window.min(self.len());
        if n == 0 {
            return 0.0;
        }

        let mut lo = f32::MAX;
        let mut hi = f32::MIN;
        for k in 1..=n {
            let idx = (head + cap - k) % cap;
            let v = f32::from_bits(self.readings[idx].load(Ordering::Relaxed));
            lo = lo.min(v);
            hi = hi.max(v);
        }
        hi - lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_meter_reads_quiet() {
        let m = SnrActivityMeter::new();
        assert_eq!(m.capacity(), SNR_HISTORY_LEN);
        assert!(m.is_empty());
        assert_eq!(m.recent_dynamic_range_db(50), 0.0);
    }

    #[test]
    fn test_range_over_trailing_window() {
        let m = SnrActivityMeter::with_capacity(8);
        for v in [40.0, 1.0, 2.0, 5.0] {
            m.push(v);
        }
        assert_eq!(m.recent_dynamic_range_db(3), 4.0);
        assert_eq!(m.recent_dynamic_range_db(100), 39.0);
    }

    #[test]
    fn test_wraps_and_drops_oldest() {
        let m = SnrActivityMeter::with_capacity(4);
        m.push(100.0);
        for v in [10.0, 11.0, 12.0, 13.0] {
            m.push(v);
        }
        assert_eq!(m.len(), 4);
        assert_eq!(m.recent_dynamic_range_db(10), 3.0);
    }

    #[test]
    fn test_non_finite_readings_ignored() {
        let m = SnrActivityMeter::with_capacity(4);
        m.push(f32::NAN);
        m.push(f32::INFINITY);
        assert!(m.is_empty());
    }

    #[test]
    fn test_constant_activity_and_arc() {
        let c = Arc::new(ConstantActivity::new(25.0));
        assert_eq!(c.recent_dynamic_range_db(10), 25.0);
        c.set(2.0);
        let shared: Box<dyn SignalActivityEstimator> = Box::new(c.clone());
        assert_eq!(shared.recent_dynamic_range_db(1), 2.0);
    }
}
