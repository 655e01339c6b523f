//! Euler-Maruyama time loop.
//!
//! ```text
//! Uninitialized --prime--> Primed --step--> Running --last step--> Completed
//! ```
//!
//! At step `k` every node reads columns `< lookback + k` only and the new
//! states are collected in a scratch row before column `lookback + k` is
//! written. Node updates inside a step are therefore independent and may run
//! on the rayon pool; steps themselves are strictly sequential.

use crate::buffer::HistoryBuffer;
use crate::connectivity::{max_delay, normalize_connectivity};
use crate::coupling::CouplingTable;
use crate::derivative::{derivatives, euler_update, is_finite, node_gains, LocalConstants, NodeGains};
use crate::noise::{node_streams, NoiseStream};
use crate::params::{InitialConditions, WendlingParams};
use crate::{NodeState, STATE_DIM};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use nmm_core::{NmmError, Result, Time};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Node count from which `Execution::auto` picks the thread pool
pub const PARALLEL_THRESHOLD: usize = 64;

/// Lifecycle of a [`Stepper`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepperPhase {
    Uninitialized,
    Primed,
    Running,
    Completed,
}

/// How node updates inside one step are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Execution {
    Sequential,
    Parallel,
}

impl Execution {
    pub fn auto(n_nodes: usize) -> Self {
        if n_nodes >= PARALLEL_THRESHOLD {
            Self::Parallel
        } else {
            Self::Sequential
        }
    }
}

/// First non-finite state seen on a node. The run carries on regardless.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericalWarning {
    pub node: usize,
    /// Step index, 0-based
    pub step: usize,
    /// Simulation time of that step (ms)
    pub time: Time,
}

/// Raw result of a run, lookback prefix included.
#[derive(Debug, Clone)]
pub struct Trajectories {
    /// `t[k] = (k + 1) * dt` (ms)
    pub time: Vec<Time>,
    /// Number of history columns before the first step
    pub lookback: usize,
    /// Seed the noise streams were derived from
    pub seed: u64,
    pub warnings: Vec<NumericalWarning>,
    states: Array3<f64>,
}

impl Trajectories {
    pub fn n_nodes(&self) -> usize {
        self.states.len_of(Axis(0))
    }

    pub fn n_steps(&self) -> usize {
        self.time.len()
    }

    /// One variable, `nodes x (lookback + steps)`
    pub fn variable(&self, var: usize) -> ArrayView2<'_, f64> {
        self.states.index_axis(Axis(1), var)
    }

    /// Dense `nodes x 10 x (lookback + steps)` array
    pub fn states(&self) -> &Array3<f64> {
        &self.states
    }

    pub fn is_stable(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Fixed-step stochastic integrator for one run.
#[derive(Debug)]
pub struct Stepper {
    gains: Vec<NodeGains>,
    constants: LocalConstants,
    coupling: CouplingTable,
    init: InitialConditions,
    buffer: HistoryBuffer,
    noise: Vec<NoiseStream>,
    scratch: Vec<NodeState>,
    unstable: Vec<bool>,
    warnings: Vec<NumericalWarning>,
    dt_ms: Time,
    dt_s: f64,
    n_steps: usize,
    step: usize,
    seed: u64,
    stream_offset: u64,
    execution: Execution,
    phase: StepperPhase,
}

impl Stepper {
    /// Validate a run and allocate its history.
    ///
    /// `cmat` is the raw connectivity (normalized here) and `delay_steps` the
    /// precomputed delays in steps; both must be `N x N`. Every check happens
    /// before the buffer is allocated.
    pub fn new(
        params: &WendlingParams,
        cmat: &Array2<f64>,
        delay_steps: &Array2<usize>,
    ) -> Result<Self> {
        params.integration_method.ensure_supported()?;
        let n_steps = params.n_steps()?;

        let cmat = normalize_connectivity(cmat)?;
        let n = cmat.nrows();
        if delay_steps.dim() != (n, n) {
            return Err(NmmError::config(format!(
                "delay matrix has shape {:?}, Cmat has shape {:?}",
                delay_steps.dim(),
                cmat.dim()
            )));
        }
        let mut delays = delay_steps.clone();
        delays.diag_mut().fill(0);
        let lookback = max_delay(&delays).checked_add(1).ok_or_else(|| {
            NmmError::config("delay matrix holds a delay too long to buffer")
        })?;

        params.init.validate(n, lookback)?;
        let gains = node_gains(params, n)?;
        let constants = LocalConstants::from_params(params);
        let shared = [
            constants.a,
            constants.b,
            constants.g,
            constants.c1,
            constants.c2,
            constants.c3,
            constants.c4,
            constants.c5,
            constants.c6,
            constants.c7,
            constants.p_sigma,
            constants.sigmoid.e0,
            constants.sigmoid.v0,
            constants.sigmoid.r,
        ];
        if shared.iter().any(|v| !v.is_finite()) {
            return Err(NmmError::config("local parameters must be finite"));
        }
        let coupling = CouplingTable::new(&cmat, &delays, params.k_gl)?;
        let buffer = HistoryBuffer::new(n, lookback, n_steps)?;

        Ok(Self {
            gains,
            constants,
            coupling,
            init: params.init.clone(),
            buffer,
            noise: Vec::new(),
            scratch: vec![[0.0; STATE_DIM]; n],
            unstable: vec![false; n],
            warnings: Vec::new(),
            dt_ms: params.dt,
            dt_s: params.dt / 1000.0,
            n_steps,
            step: 0,
            seed: params.seed.unwrap_or_else(rand::random),
            stream_offset: 0,
            execution: Execution::auto(n),
            phase: StepperPhase::Uninitialized,
        })
    }

    /// Shift the noise stream ids, so node 0 here replays node `offset` of a
    /// larger network run with the same seed
    pub fn with_stream_offset(mut self, offset: u64) -> Self {
        self.stream_offset = offset;
        self
    }

    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    pub fn phase(&self) -> StepperPhase {
        self.phase
    }

    pub fn n_nodes(&self) -> usize {
        self.gains.len()
    }

    pub fn lookback(&self) -> usize {
        self.buffer.lookback()
    }

    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Steps completed so far
    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Fill the lookback window and create the noise streams
    pub fn prime(&mut self) -> Result<()> {
        if self.phase != StepperPhase::Uninitialized {
            return Err(NmmError::usage(format!(
                "cannot prime a stepper in phase {:?}",
                self.phase
            )));
        }
        self.buffer.prime(&self.init)?;
        self.noise = node_streams(self.seed, self.n_nodes(), self.stream_offset);
        self.phase = StepperPhase::Primed;
        debug!(
            nodes = self.n_nodes(),
            edges = self.coupling.n_edges(),
            lookback = self.lookback(),
            steps = self.n_steps,
            seed = self.seed,
            execution = ?self.execution,
            "wendling stepper primed"
        );
        Ok(())
    }

    /// Advance every node by one step
    pub fn step(&mut self) -> Result<()> {
        match self.phase {
            StepperPhase::Primed | StepperPhase::Running => {}
            phase => {
                return Err(NmmError::usage(format!("cannot step in phase {:?}", phase)));
            }
        }
        self.phase = StepperPhase::Running;
        self.advance()?;
        if self.step == self.n_steps {
            self.phase = StepperPhase::Completed;
            debug!(steps = self.n_steps, warnings = self.warnings.len(), "wendling run completed");
        }
        Ok(())
    }

    /// Prime if needed and step until completed
    pub fn run(&mut self) -> Result<()> {
        if self.phase == StepperPhase::Uninitialized {
            self.prime()?;
        }
        while self.phase != StepperPhase::Completed {
            self.step()?;
        }
        Ok(())
    }

    /// Hand over the history of a completed run
    pub fn finish(self) -> Result<Trajectories> {
        if self.phase != StepperPhase::Completed {
            return Err(NmmError::usage(format!(
                "run not completed ({} of {} steps, phase {:?})",
                self.step, self.n_steps, self.phase
            )));
        }
        let time = (1..=self.n_steps).map(|k| k as f64 * self.dt_ms).collect();
        Ok(Trajectories {
            time,
            lookback: self.buffer.lookback(),
            seed: self.seed,
            warnings: self.warnings,
            states: self.buffer.into_inner(),
        })
    }

    fn advance(&mut self) -> Result<()> {
        let col = self.buffer.lookback() + self.step;
        let dt = self.dt_s;
        let history = &self.buffer;
        let coupling = &self.coupling;
        let gains = &self.gains;
        let constants = &self.constants;

        let update = |node: usize, noise: &mut NoiseStream, out: &mut NodeState| {
            let y = history.state(node, col - 1);
            let input = coupling.input(node, col, history, &constants.sigmoid);
            let dy = derivatives(&y, &gains[node], constants, input, noise.next_normal(), dt);
            *out = euler_update(&y, &dy, dt);
        };

        match self.execution {
            Execution::Sequential => {
                for (node, (out, noise)) in self
                    .scratch
                    .iter_mut()
                    .zip(self.noise.iter_mut())
                    .enumerate()
                {
                    update(node, noise, out);
                }
            }
            Execution::Parallel => {
                self.scratch
                    .par_iter_mut()
                    .zip(self.noise.par_iter_mut())
                    .enumerate()
                    .for_each(|(node, (out, noise))| update(node, noise, out));
            }
        }

        self.record_instability();
        self.buffer.write_column(col, &self.scratch)?;
        self.step += 1;
        Ok(())
    }

    fn record_instability(&mut self) {
        for (node, state) in self.scratch.iter().enumerate() {
            if self.unstable[node] || is_finite(state) {
                continue;
            }
            self.unstable[node] = true;
            let time = (self.step + 1) as f64 * self.dt_ms;
            warn!(node, step = self.step, time, "non-finite state in wendling node");
            self.warnings.push(NumericalWarning {
                node,
                step: self.step,
                time,
            });
        }
    }
}

/// Run a complete simulation: validate, prime, step to the horizon.
///
/// Returns the time vector and every variable with its lookback prefix.
pub fn integrate(
    params: &WendlingParams,
    cmat: &Array2<f64>,
    delay_steps: &Array2<usize>,
) -> Result<Trajectories> {
    let mut stepper = Stepper::new(params, cmat, delay_steps)?;
    stepper.run()?;
    stepper.finish()
}
