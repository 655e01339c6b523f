//! Delayed network input.
//!
//! For target node `i` computing column `col`:
//!
//! ```text
//! u_i = sum_j K_gl * Cmat[i, j] * S(v_j(col - 1 - delay[i, j]))
//! ```
//!
//! where `v_j = y1 - y2 - y3` and only edges with `Cmat[i, j] > 0` count.
//! Every read is at a column strictly before `col`, so all nodes of one step
//! can be evaluated in any order, or in parallel.

use crate::buffer::HistoryBuffer;
use crate::sigmoid::Sigmoid;
use ndarray::Array2;
use nmm_core::{NmmError, Result};

/// Incoming edge of a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    /// Source node
    pub source: usize,
    /// `K_gl * Cmat[target, source]`
    pub weight: f64,
    /// Delay in steps
    pub delay: usize,
}

/// Incoming edges of every node, stored row by row (CSR layout).
#[derive(Debug, Clone, Default)]
pub struct CouplingTable {
    offsets: Vec<usize>,
    edges: Vec<Edge>,
}

impl CouplingTable {
    /// Build from a normalized connectivity matrix and a delay matrix in steps.
    ///
    /// Zero weights are dropped; so is everything when `k_gl == 0`.
    pub fn new(cmat: &Array2<f64>, delays: &Array2<usize>, k_gl: f64) -> Result<Self> {
        let n = cmat.nrows();
        if cmat.dim() != (n, n) || delays.dim() != (n, n) {
            return Err(NmmError::config(format!(
                "Cmat {:?} and delay matrix {:?} must both be {} x {}",
                cmat.dim(),
                delays.dim(),
                n,
                n
            )));
        }
        if !k_gl.is_finite() {
            return Err(NmmError::config(format!("K_gl must be finite, got {}", k_gl)));
        }

        let mut offsets = Vec::with_capacity(n + 1);
        let mut edges = Vec::new();
        offsets.push(0);
        for (row, delay_row) in cmat.outer_iter().zip(delays.outer_iter()) {
            for (source, (&w, &delay)) in row.iter().zip(delay_row.iter()).enumerate() {
                if w > 0.0 && k_gl != 0.0 {
                    edges.push(Edge {
                        source,
                        weight: k_gl * w,
                        delay,
                    });
                }
            }
            offsets.push(edges.len());
        }
        Ok(Self { offsets, edges })
    }

    pub fn n_nodes(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total number of active edges
    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    /// Incoming edges of `node`
    pub fn incoming(&self, node: usize) -> &[Edge] {
        &self.edges[self.offsets[node]..self.offsets[node + 1]]
    }

    /// Network input to `node` for the column `col` being computed.
    ///
    /// A delayed column before the start of the history contributes nothing.
    #[inline]
    pub fn input(&self, node: usize, col: usize, history: &HistoryBuffer, sigmoid: &Sigmoid) -> f64 {
        self.incoming(node)
            .iter()
            .filter_map(|edge| {
                let past = col.checked_sub(1 + edge.delay)?;
                Some(edge.weight * sigmoid.rate(history.pyramidal(edge.source, past)))
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::InitialConditions;
    use crate::{NodeState, STATE_DIM, Y1};
    use ndarray::array;

    fn history_with_y1(values: &[f64], lookback: usize) -> HistoryBuffer {
        let states: Vec<NodeState> = values
            .iter()
            .map(|&v| {
                let mut s = [0.0; STATE_DIM];
                s[Y1] = v;
                s
            })
            .collect();
        let mut buffer = HistoryBuffer::new(values.len(), lookback, 4).unwrap();
        buffer.prime(&InitialConditions::from_states(&states)).unwrap();
        buffer
    }

    #[test]
    fn test_table_skips_zero_weights() {
        let cmat = array![[0.0, 1.0, 0.0], [0.5, 0.0, 0.25], [0.0, 0.0, 0.0]];
        let delays = array![[0, 3, 0], [1, 0, 2], [0, 0, 0]];
        let table = CouplingTable::new(&cmat, &delays, 2.0).unwrap();

        assert_eq!(table.n_nodes(), 3);
        assert_eq!(table.n_edges(), 3);
        assert_eq!(
            table.incoming(0),
            &[Edge {
                source: 1,
                weight: 2.0,
                delay: 3
            }]
        );
        assert_eq!(table.incoming(1).len(), 2);
        assert!(table.incoming(2).is_empty());
    }

    #[test]
    fn test_zero_gain_disconnects() {
        let table = CouplingTable::new(&Array2::ones((2, 2)), &Array2::zeros((2, 2)), 0.0).unwrap();
        assert_eq!(table.n_edges(), 0);
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(CouplingTable::new(&Array2::ones((2, 2)), &Array2::zeros((3, 3)), 1.0).is_err());
    }

    #[test]
    fn test_input_sums_delayed_sources() {
        let sigmoid = Sigmoid::default();
        let history = history_with_y1(&[0.0, 6.0, 10.0], 3);
        let cmat = array![[0.0, 1.0, 0.5], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        let delays = array![[0, 1, 2], [0, 0, 0], [0, 0, 0]];
        let table = CouplingTable::new(&cmat, &delays, 0.5).unwrap();

        let expected = 0.5 * sigmoid.rate(6.0) + 0.25 * sigmoid.rate(10.0);
        assert!((table.input(0, 3, &history, &sigmoid) - expected).abs() < 1e-12);
        assert_eq!(table.input(1, 3, &history, &sigmoid), 0.0);
    }

    #[test]
    fn test_input_before_history_is_zero() {
        let sigmoid = Sigmoid::default();
        let history = history_with_y1(&[0.0, 6.0], 1);
        let cmat = array![[0.0, 1.0], [0.0, 0.0]];
        let delays = array![[0, 5], [0, 0]];
        let table = CouplingTable::new(&cmat, &delays, 1.0).unwrap();
        assert_eq!(table.input(0, 1, &history, &sigmoid), 0.0);
    }
}
