//! Potential-to-rate transfer function.
//!
//! `S(v) = 2 e0 / (1 + exp(r (v0 - v)))`, saturating at `0` and `2 e0`.

use nmm_core::{Rate, Voltage};
use serde::{Deserialize, Serialize};

/// Sigmoid parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sigmoid {
    /// Half of the maximum firing rate (Hz)
    pub e0: Rate,
    /// Potential at half-maximum (mV)
    pub v0: Voltage,
    /// Slope (1/mV)
    pub r: f64,
}

impl Default for Sigmoid {
    fn default() -> Self {
        Self {
            e0: 2.5,
            v0: 6.0,
            r: 0.56,
        }
    }
}

impl Sigmoid {
    pub fn new(e0: Rate, v0: Voltage, r: f64) -> Self {
        Self { e0, v0, r }
    }

    /// Firing rate for potential `v`
    #[inline]
    pub fn rate(&self, v: Voltage) -> Rate {
        sigmoid(v, self.e0, self.v0, self.r)
    }

    /// Upper saturation level `2 e0`
    pub fn max_rate(&self) -> Rate {
        2.0 * self.e0
    }
}

/// Wendling sigmoid, evaluated so that `exp` never overflows.
#[inline]
pub fn sigmoid(v: Voltage, e0: Rate, v0: Voltage, r: f64) -> Rate {
    let x = r * (v0 - v);
    if x > 0.0 {
        // 1 / (1 + e^x) == e^-x / (1 + e^-x)
        let z = (-x).exp();
        2.0 * e0 * z / (1.0 + z)
    } else {
        2.0 * e0 / (1.0 + x.exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_midpoint() {
        let s = Sigmoid::default();
        assert!((s.rate(s.v0) - s.e0).abs() < 1e-12);
    }

    #[test]
    fn test_sigmoid_resting_rate() {
        // S(0) = 5 / (1 + e^3.36)
        let expected = 5.0 / (1.0 + (0.56f64 * 6.0).exp());
        assert!((Sigmoid::default().rate(0.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_sigmoid_bounded_and_monotonic() {
        let s = Sigmoid::default();
        let mut previous = s.rate(-1e308);
        assert!(previous >= 0.0);
        let mut v = -1e6;
        while v <= 1e6 {
            let rate = s.rate(v);
            assert!(rate.is_finite());
            assert!(rate >= previous, "not monotonic at v = {}", v);
            assert!((0.0..=s.max_rate()).contains(&rate));
            previous = rate;
            v += 997.3;
        }
        for &v in &[-1e308, -1e4, -50.0, 0.0, 50.0, 1e4, 1e308] {
            let rate = s.rate(v);
            assert!(rate.is_finite());
            assert!((0.0..=s.max_rate()).contains(&rate));
        }
    }

    #[test]
    fn test_sigmoid_saturation() {
        let s = Sigmoid::default();
        assert!(s.rate(-1e4) < 1e-300);
        assert_eq!(s.rate(1e4), s.max_rate());
        assert_eq!(s.rate(f64::INFINITY), s.max_rate());
        assert_eq!(s.rate(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_sigmoid_fine_grid_monotonic() {
        let s = Sigmoid::default();
        let rates: Vec<f64> = (-400..=400).map(|i| s.rate(i as f64 * 0.05)).collect();
        assert!(rates.windows(2).all(|w| w[1] >= w[0]));
    }
}
