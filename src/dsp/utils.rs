//! Shared numeric helpers for the noise-reduction chain.

use std::f64::consts::PI;

/// Smallest noise power a bin may hold. Keeps `sig² / noise` finite on silent input.
pub const NOISE_POWER_FLOOR: f32 = 1e-20;

/// Euler–Mascheroni constant.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

// Series / continued-fraction switch point for E1.
const E1_SERIES_MAX_X: f64 = 1.0;
const E1_MAX_ITER: usize = 100;
const E1_EPS: f64 = 1e-12;
// Smallest argument accepted by E1; below this the integral diverges.
const E1_MIN_X: f64 = 1e-30;
// E1 underflows to zero well before this.
const E1_MAX_X: f64 = 700.0;

pub fn db_to_power(db: f32) -> f32 {
    10.0f32.powf(db / 10.0)
}

/// Symmetric Hann window, `0.5 - 0.5 cos(2πi / (len - 1))`.
pub fn make_hann_window(len: usize) -> Vec<f32> {
    if len < 2 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos()) as f32)
        .collect()
}

/// Exponential integral `E1(x) = ∫_x^∞ e^-t / t dt` for `x > 0`.
///
/// Power series below 1, modified Lentz continued fraction above. The argument is clamped
/// to a tiny positive value so the result is always finite.
pub fn expint_e1(x: f32) -> f32 {
    let x = (x as f64).max(E1_MIN_X);
    if x >= E1_MAX_X {
        return 0.0;
    }

    if x <= E1_SERIES_MAX_X {
        // E1(x) = -γ - ln x - Σ (-x)^k / (k · k!)
        let mut sum = 0.0f64;
        let mut term = 1.0f64;
        for k in 1..=E1_MAX_ITER {
            term *= -x / k as f64;
            let contrib = term / k as f64;
            sum += contrib;
            if contrib.abs() < sum.abs() * E1_EPS {
                break;
            }
        }
        return (-EULER_GAMMA - x.ln() - sum) as f32;
    }

    let tiny = 1e-300f64;
    let mut b = x + 1.0;
    let mut c = 1.0 / tiny;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=E1_MAX_ITER {
        let an = -((i * i) as f64);
        b += 2.0;
        d = 1.0 / (an * d + b);
        c = b + an / c;
        let del = c * d;
        h *= del;
        if (del - 1.0).abs() < E1_EPS {
            break;
        }
    }
    (h * (-x).exp()) as f32
}

/// Centred moving average of `src` over `width` bins, written into `dst`. Edges average over
/// the neighbours that exist.
pub fn moving_average(src: &[f32], width: usize, dst: &mut [f32]) {
    debug_assert_eq!(src.len(), dst.len());
    let n = src.len();
    if n == 0 || width <= 1 {
        dst.copy_from_slice(src);
        return;
    }

    let left = width / 2;
    let right = width - left - 1;
    // Running sum over src[lo..hi].
    let mut acc = 0.0f64;
    let mut lo = 0;
    let mut hi = 0;
    for (i, out) in dst.iter_mut().enumerate() {
        let want_hi = (i + right + 1).min(n);
        while hi < want_hi {
            acc += src[hi] as f64;
            hi += 1;
        }
        let want_lo = i.saturating_sub(left);
        while lo < want_lo {
            acc -= src[lo] as f64;
            lo += 1;
        }
        *out = (acc / (hi - lo) as f64) as f32;
    }
}

/// Fills every bin not marked trusted by linear interpolation between the nearest trusted
/// neighbours, or with the nearest trusted value past the first/last trusted bin.
///
/// Returns `false` and leaves `values` untouched when nothing is trusted.
pub fn fill_untrusted(values: &mut [f32], trusted: &[bool]) -> bool {
    debug_assert_eq!(values.len(), trusted.len());
    let first = match trusted.iter().position(|&t| t) {
        Some(i) => i,
        None => return false,
    };
    let last = trusted.iter().rposition(|&t| t).unwrap_or(first);

    let edge = values[first];
    values[..first].fill(edge);
    let edge = values[last];
    values[last + 1..].fill(edge);

    let mut prev = first;
    for i in (first + 1)..=last {
        if !trusted[i] {
            continue;
        }
        if i > prev + 1 {
            let a = values[prev];
            let b = values[i];
            let span = (i - prev) as f32;
            for j in (prev + 1)..i {
                let t = (j - prev) as f32 / span;
                values[j] = a + (b - a) * t;
            }
        }
        prev = i;
    }
    true
}

/// Value at the given fraction of an ascending-sorted slice (nearest rank).
pub fn percentile_sorted(sorted: &[f32], fraction: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f32 * fraction.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e1_reference_values() {
        // scipy.special.exp1
        let cases = [
            (0.01f32, 4.037_929_6f32),
            (0.5, 0.559_773_6),
            (1.0, 0.219_383_9),
            (2.0, 0.048_900_5),
            (10.0, 4.156_969e-6),
        ];
        for (x, want) in cases {
            let got = expint_e1(x);
            assert!(
                ((got - want) / want).abs() < 1e-4,
                "E1({x}) = {got}, expected {want}"
            );
        }
    }

    #[test]
    fn test_e1_is_finite_at_zero() {
        let v = expint_e1(0.0);
        assert!(v.is_finite());
        assert!(v > 60.0);
        assert_eq!(expint_e1(1000.0), 0.0);
    }

    #[test]
    fn test_hann_window_shape() {
        let w = make_hann_window(9);
        assert!(w[0].abs() < 1e-7);
        assert!(w[8].abs() < 1e-7);
        assert!((w[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_moving_average_flat_and_edges() {
        let flat = vec![2.0; 16];
        let mut sm = vec![0.0; 16];
        moving_average(&flat, 6, &mut sm);
        assert!(sm.iter().all(|v| (v - 2.0).abs() < 1e-6));

        let ramp = [0.0, 1.0, 2.0, 3.0];
        let mut sm = [0.0; 4];
        moving_average(&ramp, 3, &mut sm);
        assert!((sm[0] - 0.5).abs() < 1e-6);
        assert!((sm[1] - 1.0).abs() < 1e-6);
        assert!((sm[3] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_fill_untrusted_interpolates_and_clamps() {
        let mut v = [9.0, 9.0, 1.0, 9.0, 9.0, 4.0, 9.0];
        let t = [false, false, true, false, false, true, false];
        assert!(fill_untrusted(&mut v, &t));
        let want = [1.0, 1.0, 1.0, 2.0, 3.0, 4.0, 4.0];
        for (got, want) in v.iter().zip(want) {
            assert!((got - want).abs() < 1e-5, "{v:?}");
        }
    }

    #[test]
    fn test_fill_untrusted_none_trusted() {
        let mut v = [3.0, 5.0];
        assert!(!fill_untrusted(&mut v, &[false, false]));
        assert_eq!(v, [3.0, 5.0]);
    }

    #[test]
    fn test_percentile() {
        let s = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0];
        assert_eq!(percentile_sorted(&s, 0.1), 2.0);
        assert_eq!(percentile_sorted(&s, 0.0), 1.0);
        assert_eq!(percentile_sorted(&[], 0.5), 0.0);
    }
}
