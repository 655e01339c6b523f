//! Delay-indexed state history.
//!
//! One dense `nodes x 10 x (lookback + steps)` array, filled left to right.
//! Columns `0..lookback` hold the initial history; column `lookback + k` holds
//! the state after step `k`.

use crate::params::InitialConditions;
use crate::{NodeState, STATE_DIM, Y1, Y2, Y3};
use ndarray::{s, Array3, ArrayView2, Axis};
use nmm_core::{NmmError, Result, Voltage};

/// Largest history allocated for one run, in `f64` cells (16 GiB)
pub const MAX_HISTORY_CELLS: usize = 1 << 31;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    data: Array3<f64>,
    lookback: usize,
}

impl HistoryBuffer {
    /// Zeroed buffer for `n_nodes` with room for `lookback + n_steps` columns.
    ///
    /// The size is checked before anything is allocated.
    pub fn new(n_nodes: usize, lookback: usize, n_steps: usize) -> Result<Self> {
        let width = lookback
            .checked_add(n_steps)
            .filter(|&width| {
                width
                    .checked_mul(STATE_DIM)
                    .and_then(|cells| cells.checked_mul(n_nodes))
                    .is_some_and(|cells| cells <= MAX_HISTORY_CELLS)
            })
            .ok_or_else(|| {
                NmmError::config(format!(
                    "history of {} nodes x ({} lookback + {} steps) exceeds {} cells",
                    n_nodes, lookback, n_steps, MAX_HISTORY_CELLS
                ))
            })?;
        Ok(Self {
            data: Array3::zeros((n_nodes, STATE_DIM, width)),
            lookback,
        })
    }

    /// Fill the lookback columns.
    ///
    /// A width-1 initial state is repeated across the window; a saved history
    /// contributes its trailing `lookback` columns.
    pub fn prime(&mut self, init: &InitialConditions) -> Result<()> {
        init.validate(self.n_nodes(), self.lookback)?;
        let width = init.width();
        let first = width.saturating_sub(self.lookback);
        for (var, values) in init.vars.iter().enumerate() {
            let mut prefix = self.data.slice_mut(s![.., var, ..self.lookback]);
            if width == 1 {
                for (node, mut row) in prefix.outer_iter_mut().enumerate() {
                    row.fill(values[[node, 0]]);
                }
            } else {
                prefix.assign(&values.slice(s![.., first..]));
            }
        }
        Ok(())
    }

    pub fn n_nodes(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Total number of columns
    pub fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Full state of one node at one column
    #[inline]
    pub fn state(&self, node: usize, col: usize) -> NodeState {
        std::array::from_fn(|var| self.data[[node, var, col]])
    }

    /// Pyramidal output `y1 - y2 - y3` of one node at one column
    #[inline]
    pub fn pyramidal(&self, node: usize, col: usize) -> Voltage {
        self.data[[node, Y1, col]] - self.data[[node, Y2, col]] - self.data[[node, Y3, col]]
    }

    /// Write one column for every node.
    ///
    /// Only columns past the lookback window may be written, and `states`
    /// must hold one entry per node.
    pub fn write_column(&mut self, col: usize, states: &[NodeState]) -> Result<()> {
        if col < self.lookback || col >= self.width() {
            return Err(NmmError::usage(format!(
                "column {} is outside the writable range {}..{}",
                col,
                self.lookback,
                self.width()
            )));
        }
        if states.len() != self.n_nodes() {
            return Err(NmmError::usage(format!(
                "{} states for {} nodes",
                states.len(),
                self.n_nodes()
            )));
        }
        for (node, state) in states.iter().enumerate() {
            for (var, &value) in state.iter().enumerate() {
                self.data[[node, var, col]] = value;
            }
        }
        Ok(())
    }

    /// One variable for all nodes, `nodes x width`
    pub fn variable(&self, var: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(1), var)
    }

    pub fn into_inner(self) -> Array3<f64> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_prime_broadcasts_initial_state() {
        let mut states = [[0.0; STATE_DIM]; 2];
        states[0][Y1] = 1.5;
        states[1][Y2] = -2.0;
        let mut buffer = HistoryBuffer::new(2, 3, 4).unwrap();
        buffer.prime(&InitialConditions::from_states(&states)).unwrap();

        assert_eq!(buffer.width(), 7);
        for col in 0..3 {
            assert_eq!(buffer.state(0, col), states[0]);
            assert_eq!(buffer.state(1, col), states[1]);
        }
        assert_eq!(buffer.state(0, 3), [0.0; STATE_DIM]);
        assert_eq!(buffer.pyramidal(1, 0), 2.0);
    }

    #[test]
    fn test_prime_copies_history_tail() {
        let history: [Array2<f64>; STATE_DIM] = std::array::from_fn(|var| {
            Array2::from_shape_fn((1, 5), |(_, t)| (var * 10 + t) as f64)
        });
        let mut buffer = HistoryBuffer::new(1, 2, 3).unwrap();
        buffer
            .prime(&InitialConditions::from_history(history).unwrap())
            .unwrap();

        let y0: Vec<f64> = buffer.variable(0).iter().copied().collect();
        assert_eq!(y0, vec![3.0, 4.0, 0.0, 0.0, 0.0]);
        assert_eq!(buffer.variable(9).row(0)[1], 94.0);
    }

    #[test]
    fn test_prime_rejects_short_history() {
        let history: [Array2<f64>; STATE_DIM] = std::array::from_fn(|_| Array2::zeros((1, 2)));
        let mut buffer = HistoryBuffer::new(1, 4, 3).unwrap();
        let err = buffer
            .prime(&InitialConditions::from_history(history).unwrap())
            .unwrap_err();
        assert!(matches!(err, NmmError::Configuration(_)));
    }

    #[test]
    fn test_oversized_history_rejected() {
        let err = HistoryBuffer::new(1, 1, usize::MAX).unwrap_err();
        assert!(matches!(err, NmmError::Configuration(_)));
        assert!(HistoryBuffer::new(usize::MAX / 2, 1, 1).is_err());
        assert!(HistoryBuffer::new(1000, 1, MAX_HISTORY_CELLS / 10_000).is_err());
        assert!(HistoryBuffer::new(4, 1, 1000).is_ok());
    }

    #[test]
    fn test_write_column_bounds() {
        let mut buffer = HistoryBuffer::new(1, 2, 2).unwrap();
        let state = [[1.0; STATE_DIM]];
        assert!(buffer.write_column(1, &state).is_err());
        assert!(buffer.write_column(4, &state).is_err());
        assert!(buffer.write_column(2, &[]).is_err());
        buffer.write_column(3, &state).unwrap();
        assert_eq!(buffer.state(0, 3), [1.0; STATE_DIM]);
        assert_eq!(buffer.pyramidal(0, 3), -1.0);
    }
}
