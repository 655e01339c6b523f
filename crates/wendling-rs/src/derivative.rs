//! Right-hand side of the ten Wendling equations for one node.
//!
//! Each population is a second-order linear synapse driven through the
//! sigmoid, written as a pair of first-order equations:
//!
//! ```text
//! dy0 = y5   dy5 = A a (S(y1 - y2 - y3) + u)     - 2a y5 - a^2 y0
//! dy1 = y6   dy6 = A a (C2 S(C1 y0) + p(t))      - 2a y6 - a^2 y1
//! dy2 = y7   dy7 = B b (C4 S(C3 y0))             - 2b y7 - b^2 y2
//! dy3 = y8   dy8 = G g (C7 S(C5 y0 - C6 y4))     - 2g y8 - g^2 y3
//! dy4 = y9   dy9 = B b (S(C3 y0))                - 2b y9 - b^2 y4
//! ```
//!
//! with `p(t) = p_mean + p_sigma * xi * sqrt(dt)` and `u` the network input.
//! Rates and `dt` are in seconds here.

use crate::params::WendlingParams;
use crate::sigmoid::Sigmoid;
use crate::NodeState;
use nmm_core::{Rate, Result};

/// Gains and drive that may differ between nodes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeGains {
    pub a: f64,
    pub b: f64,
    pub g: f64,
    pub p_mean: Rate,
}

/// Parameters shared by every node, rates in 1/s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalConstants {
    pub a: f64,
    pub b: f64,
    pub g: f64,
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
    pub c4: f64,
    pub c5: f64,
    pub c6: f64,
    pub c7: f64,
    pub p_sigma: Rate,
    pub sigmoid: Sigmoid,
}

impl LocalConstants {
    /// Shared constants of a bundle, rate constants converted from 1/ms to 1/s
    pub fn from_params(params: &WendlingParams) -> Self {
        Self {
            a: params.rate_a * 1000.0,
            b: params.rate_b * 1000.0,
            g: params.rate_g * 1000.0,
            c1: params.c1,
            c2: params.c2,
            c3: params.c3,
            c4: params.c4,
            c5: params.c5,
            c6: params.c6,
            c7: params.c7,
            p_sigma: params.p_sigma,
            sigmoid: params.sigmoid(),
        }
    }
}

/// Broadcast `A, B, G, p_mean` to one entry per node
pub fn node_gains(params: &WendlingParams, n: usize) -> Result<Vec<NodeGains>> {
    let a = params.gain_a.broadcast("A", n)?;
    let b = params.gain_b.broadcast("B", n)?;
    let g = params.gain_g.broadcast("G", n)?;
    let p_mean = params.p_mean.broadcast("p_mean", n)?;
    Ok((0..n)
        .map(|i| NodeGains {
            a: a[i],
            b: b[i],
            g: g[i],
            p_mean: p_mean[i],
        })
        .collect())
}

/// Time derivatives of one node's state.
///
/// `noise` is a standard-normal sample, `coupling` the network input and
/// `dt` the step in seconds.
#[inline]
pub fn derivatives(
    y: &NodeState,
    gains: &NodeGains,
    k: &LocalConstants,
    coupling: f64,
    noise: f64,
    dt: f64,
) -> NodeState {
    let s = &k.sigmoid;
    let (a, b, g) = (k.a, k.b, k.g);
    let p = gains.p_mean + k.p_sigma * noise * dt.sqrt();
    let s_c3 = s.rate(k.c3 * y[0]);

    [
        y[5],
        y[6],
        y[7],
        y[8],
        y[9],
        gains.a * a * (s.rate(y[1] - y[2] - y[3]) + coupling) - 2.0 * a * y[5] - a * a * y[0],
        gains.a * a * (k.c2 * s.rate(k.c1 * y[0]) + p) - 2.0 * a * y[6] - a * a * y[1],
        gains.b * b * (k.c4 * s_c3) - 2.0 * b * y[7] - b * b * y[2],
        gains.g * g * (k.c7 * s.rate(k.c5 * y[0] - k.c6 * y[4])) - 2.0 * g * y[8] - g * g * y[3],
        gains.b * b * s_c3 - 2.0 * b * y[9] - b * b * y[4],
    ]
}

/// Explicit update `y + dt * dy`
#[inline]
pub fn euler_update(y: &NodeState, dy: &NodeState, dt: f64) -> NodeState {
    std::array::from_fn(|i| y[i] + dt * dy[i])
}

/// True when every component is finite
#[inline]
pub fn is_finite(y: &NodeState) -> bool {
    y.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::NodeParam;
    use crate::STATE_DIM;

    fn defaults() -> (NodeGains, LocalConstants) {
        let params = WendlingParams::default();
        (node_gains(&params, 1).unwrap()[0], LocalConstants::from_params(&params))
    }

    #[test]
    fn test_unit_conversion() {
        let (_, k) = defaults();
        assert_eq!((k.a, k.b, k.g), (100.0, 50.0, 500.0));
    }

    #[test]
    fn test_derivative_rows_are_velocities() {
        let (gains, k) = defaults();
        let y: NodeState = std::array::from_fn(|i| i as f64 * 0.1);
        let dy = derivatives(&y, &gains, &k, 0.0, 0.0, 1e-4);
        assert_eq!(&dy[..5], &y[5..]);
    }

    #[test]
    fn test_derivative_at_rest() {
        let (gains, k) = defaults();
        let rest = [0.0; STATE_DIM];
        let s0 = k.sigmoid.rate(0.0);
        let dy = derivatives(&rest, &gains, &k, 0.0, 0.0, 1e-4);

        assert!((dy[5] - 5.0 * 100.0 * s0).abs() < 1e-9);
        assert!((dy[6] - 5.0 * 100.0 * (108.0 * s0 + 90.0)).abs() < 1e-9);
        assert!((dy[7] - 22.0 * 50.0 * 33.75 * s0).abs() < 1e-9);
        assert!((dy[8] - 18.0 * 500.0 * 108.0 * s0).abs() < 1e-9);
        assert!((dy[9] - 22.0 * 50.0 * s0).abs() < 1e-9);
    }

    #[test]
    fn test_noise_scaled_by_sqrt_dt() {
        let (gains, k) = defaults();
        let rest = [0.0; STATE_DIM];
        let dt = 1e-4;
        let quiet = derivatives(&rest, &gains, &k, 0.0, 0.0, dt);
        let noisy = derivatives(&rest, &gains, &k, 0.0, 1.0, dt);
        let expected = 5.0 * 100.0 * 30.0 * dt.sqrt();
        assert!((noisy[6] - quiet[6] - expected).abs() < 1e-9);
        for i in (0..STATE_DIM).filter(|&i| i != 6) {
            assert_eq!(noisy[i], quiet[i]);
        }
    }

    #[test]
    fn test_coupling_enters_pyramidal_branch_only() {
        let (gains, k) = defaults();
        let rest = [0.0; STATE_DIM];
        let base = derivatives(&rest, &gains, &k, 0.0, 0.0, 1e-4);
        let driven = derivatives(&rest, &gains, &k, 2.0, 0.0, 1e-4);
        assert!((driven[5] - base[5] - 5.0 * 100.0 * 2.0).abs() < 1e-9);
        assert_eq!(&driven[6..], &base[6..]);
    }

    #[test]
    fn test_finite_for_extreme_states() {
        let (gains, k) = defaults();
        let y = [1e6, -1e6, 1e6, -1e6, 1e6, 0.0, 0.0, 0.0, 0.0, 0.0];
        let dy = derivatives(&y, &gains, &k, 10.0, 3.0, 1e-4);
        assert!(is_finite(&dy));
        assert!(is_finite(&euler_update(&y, &dy, 1e-4)));
        assert!(!is_finite(&[f64::NAN; STATE_DIM]));
    }

    #[test]
    fn test_node_gains_broadcast() {
        let mut params = WendlingParams::default();
        params.gain_b = NodeParam::PerNode(vec![20.0, 30.0]);
        let gains = node_gains(&params, 2).unwrap();
        assert_eq!(gains[0].a, gains[1].a);
        assert_eq!((gains[0].b, gains[1].b), (20.0, 30.0));
        assert!(node_gains(&params, 3).is_err());
    }

    #[test]
    fn test_euler_update() {
        let y = [1.0; STATE_DIM];
        let dy: NodeState = std::array::from_fn(|i| i as f64);
        let next = euler_update(&y, &dy, 0.5);
        assert_eq!(next[0], 1.0);
        assert_eq!(next[4], 3.0);
    }
}
