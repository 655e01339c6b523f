//! Trajectories as seen by callers: lookback dropped, time aligned.

use crate::params::InitialConditions;
use crate::stepper::{NumericalWarning, Trajectories};
use crate::{STATE_DIM, STATE_VARS, Y1, Y2, Y3};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use nmm_core::{NmmError, Result, Time, TimeSeries};

/// Result of a completed run.
///
/// Every variable is `nodes x steps`, column `k` being the state at `time[k]`.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    time: Vec<Time>,
    seed: u64,
    warnings: Vec<NumericalWarning>,
    states: Array3<f64>,
}

impl SimulationOutput {
    pub fn new(trajectories: Trajectories) -> Self {
        let states = trajectories
            .states()
            .slice(s![.., .., trajectories.lookback..])
            .to_owned();
        Self {
            time: trajectories.time,
            seed: trajectories.seed,
            warnings: trajectories.warnings,
            states,
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.states.len_of(Axis(0))
    }

    pub fn n_steps(&self) -> usize {
        self.time.len()
    }

    /// Time vector (ms), `t[k] = (k + 1) * dt`
    pub fn time(&self) -> &[Time] {
        &self.time
    }

    /// Seed the run actually used
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn warnings(&self) -> &[NumericalWarning] {
        &self.warnings
    }

    /// State variable by index, `nodes x steps`
    pub fn y(&self, var: usize) -> Result<ArrayView2<'_, f64>> {
        if var >= STATE_DIM {
            return Err(NmmError::config(format!(
                "state variable y{} does not exist (y0..y{})",
                var,
                STATE_DIM - 1
            )));
        }
        Ok(self.states.index_axis(Axis(1), var))
    }

    /// State variable by name (`"y0"` .. `"y9"`)
    pub fn variable(&self, name: &str) -> Result<ArrayView2<'_, f64>> {
        let var = STATE_VARS
            .iter()
            .position(|&v| v == name)
            .ok_or_else(|| NmmError::config(format!("unknown state variable '{}'", name)))?;
        self.y(var)
    }

    /// Pyramidal membrane potential `y1 - y2 - y3`, the EEG-like signal
    pub fn pyramidal(&self) -> Array2<f64> {
        let y1 = self.states.index_axis(Axis(1), Y1);
        let y2 = self.states.index_axis(Axis(1), Y2);
        let y3 = self.states.index_axis(Axis(1), Y3);
        &y1 - &y2 - &y3
    }

    /// Pyramidal potential of one node as a time series
    pub fn pyramidal_series(&self, node: usize) -> Result<TimeSeries> {
        if node >= self.n_nodes() {
            return Err(NmmError::config(format!(
                "node {} out of range ({} nodes)",
                node,
                self.n_nodes()
            )));
        }
        let v: Vec<f64> = self.pyramidal().row(node).iter().copied().collect();
        TimeSeries::from_parts(&format!("v_pyr[{}]", node), "mV", &self.time, &v)
    }

    /// Trailing `width` columns, usable as the initial history of a follow-up run
    pub fn history(&self, width: usize) -> Result<InitialConditions> {
        if width == 0 || width > self.n_steps() {
            return Err(NmmError::config(format!(
                "history width must lie in 1..={}, got {}",
                self.n_steps(),
                width
            )));
        }
        let first = self.n_steps() - width;
        InitialConditions::from_history(std::array::from_fn(|var| {
            self.states.slice(s![.., var, first..]).to_owned()
        }))
    }

    /// Last state of every node, width 1
    pub fn final_state(&self) -> Result<InitialConditions> {
        self.history(1)
    }

    /// False when any node produced a non-finite state
    pub fn is_stable(&self) -> bool {
        self.warnings.is_empty()
    }
}
