//! Parameter bundle for the Wendling model.
//!
//! Serialized field names follow the conventional notation of the model
//! (`A`, `B`, `G`, `Cmat`, `K_gl`, ...). Rate constants `a`, `b`, `g` are given
//! in 1/ms and `dt`, `duration` in ms; conversion to seconds happens once when
//! a run is set up.

use crate::sigmoid::Sigmoid;
use crate::{NodeState, STATE_DIM};
use ndarray::Array2;
use nmm_core::{NmmError, Rate, Result, Time};
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base connectivity constant
pub const DEFAULT_C: f64 = 135.0;

/// `C1..C7` as fractions of `C`
pub const CONNECTIVITY_RATIOS: [f64; 7] = [1.0, 0.8, 0.25, 0.25, 0.3, 0.1, 0.8];

// ============================================================================
// MATRICES
// ============================================================================

/// Matrices are read either as nested rows or in ndarray's own layout.
#[derive(Deserialize)]
#[serde(untagged)]
enum MatrixRepr {
    Rows(Vec<Vec<f64>>),
    Array(Array2<f64>),
}

impl MatrixRepr {
    fn into_array(self) -> std::result::Result<Array2<f64>, String> {
        let rows = match self {
            Self::Array(array) => return Ok(array),
            Self::Rows(rows) => rows,
        };
        let width = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().position(|r| r.len() != width) {
            return Err(format!(
                "row {} has {} columns, expected {}",
                row,
                rows[row].len(),
                width
            ));
        }
        let height = rows.len();
        Array2::from_shape_vec((height, width), rows.into_iter().flatten().collect())
            .map_err(|e| e.to_string())
    }
}

fn matrix<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Array2<f64>, D::Error> {
    MatrixRepr::deserialize(d)?
        .into_array()
        .map_err(de::Error::custom)
}

fn optional_matrix<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Array2<f64>>, D::Error> {
    Option::<MatrixRepr>::deserialize(d)?
        .map(MatrixRepr::into_array)
        .transpose()
        .map_err(de::Error::custom)
}

// ============================================================================
// NODE PARAMETERS
// ============================================================================

/// A parameter that is either shared by all nodes or given per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeParam {
    Scalar(f64),
    PerNode(Vec<f64>),
}

impl NodeParam {
    /// Expand to exactly `n` values.
    ///
    /// A scalar, or a one-element array, is repeated; any other length must
    /// equal `n`.
    pub fn broadcast(&self, name: &str, n: usize) -> Result<Vec<f64>> {
        let values = match self {
            Self::Scalar(v) => vec![*v; n],
            Self::PerNode(values) if values.len() == 1 => vec![values[0]; n],
            Self::PerNode(values) if values.len() == n => values.clone(),
            Self::PerNode(values) => {
                return Err(NmmError::config(format!(
                    "parameter {} has {} values for {} nodes",
                    name,
                    values.len(),
                    n
                )))
            }
        };
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(NmmError::config(format!(
                "parameter {} contains non-finite value {}",
                name, bad
            )));
        }
        Ok(values)
    }

    /// Mean over nodes
    pub fn mean(&self) -> f64 {
        match self {
            Self::Scalar(v) => *v,
            Self::PerNode(values) if values.is_empty() => f64::NAN,
            Self::PerNode(values) => values.iter().sum::<f64>() / values.len() as f64,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }
}

impl From<f64> for NodeParam {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<Vec<f64>> for NodeParam {
    fn from(values: Vec<f64>) -> Self {
        Self::PerNode(values)
    }
}

// ============================================================================
// INTEGRATION METHOD
// ============================================================================

/// Integration scheme.
///
/// Only `Euler` (Euler-Maruyama) runs. `RungeKutta4` is still recognised so a
/// request for it fails loudly instead of being parsed as something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IntegrationMethod {
    #[default]
    Euler,
    RungeKutta4,
}

impl IntegrationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Euler => "euler",
            Self::RungeKutta4 => "rk4",
        }
    }

    /// Fail unless the method can actually be run
    pub fn ensure_supported(self) -> Result<()> {
        match self {
            Self::Euler => Ok(()),
            Self::RungeKutta4 => Err(NmmError::config(
                "RK4 integration has been removed; use integration_method = \"euler\"",
            )),
        }
    }
}

impl FromStr for IntegrationMethod {
    type Err = NmmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euler" => Ok(Self::Euler),
            "rk4" => Ok(Self::RungeKutta4),
            other => Err(NmmError::config(format!(
                "unknown integration method '{}', only \"euler\" is supported",
                other
            ))),
        }
    }
}

impl TryFrom<String> for IntegrationMethod {
    type Error = NmmError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<IntegrationMethod> for String {
    fn from(method: IntegrationMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// INITIAL CONDITIONS
// ============================================================================

/// Initial state for each of the ten variables.
///
/// Every array is `nodes x width`. Width 1 is broadcast over the lookback
/// window; a wider array is a saved history whose trailing columns are copied.
/// Serialized as ten keys `y0_init` .. `y9_init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "InitialConditionFields", into = "InitialConditionFields")]
pub struct InitialConditions {
    pub vars: [Array2<f64>; STATE_DIM],
}

/// Keyed form of [`InitialConditions`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialConditionFields {
    #[serde(deserialize_with = "optional_matrix")]
    y0_init: Option<Array2<f64>>,
    #[serde(deserialize_with = "optional_matrix")]
    y1_init: Option<Array2<f64>>,
    #[serde(deserialize_with = "optional_matrix")]
    y2_init: Option<Array2<f64>>,
    #[serde(deserialize_with = "optional_matrix")]
    y3_init: Option<Array2<f64>>,
    #[serde(deserialize_with = "optional_matrix")]
    y4_init: Option<Array2<f64>>,
    #[serde(deserialize_with = "optional_matrix")]
    y5_init: Option<Array2<f64>>,
    #[serde(deserialize_with = "optional_matrix")]
    y6_init: Option<Array2<f64>>,
    #[serde(deserialize_with = "optional_matrix")]
    y7_init: Option<Array2<f64>>,
    #[serde(deserialize_with = "optional_matrix")]
    y8_init: Option<Array2<f64>>,
    #[serde(deserialize_with = "optional_matrix")]
    y9_init: Option<Array2<f64>>,
}

/// Serialized keys of the initial conditions
pub const INIT_KEYS: [&str; STATE_DIM] = [
    "y0_init", "y1_init", "y2_init", "y3_init", "y4_init", "y5_init", "y6_init", "y7_init",
    "y8_init", "y9_init",
];

impl TryFrom<InitialConditionFields> for InitialConditions {
    type Error = NmmError;

    /// No key at all means a single resting node; a partial set is an error.
    fn try_from(f: InitialConditionFields) -> Result<Self> {
        let fields = [
            f.y0_init, f.y1_init, f.y2_init, f.y3_init, f.y4_init, f.y5_init, f.y6_init,
            f.y7_init, f.y8_init, f.y9_init,
        ];
        if fields.iter().all(Option::is_none) {
            return Ok(Self::zeros(1));
        }
        if let Some(var) = fields.iter().position(Option::is_none) {
            return Err(NmmError::config(format!(
                "{} is missing while other initial conditions are given",
                INIT_KEYS[var]
            )));
        }
        Self::from_history(fields.map(Option::unwrap_or_default))
    }
}

impl From<InitialConditions> for InitialConditionFields {
    fn from(init: InitialConditions) -> Self {
        let [y0, y1, y2, y3, y4, y5, y6, y7, y8, y9] = init.vars.map(Some);
        Self {
            y0_init: y0,
            y1_init: y1,
            y2_init: y2,
            y3_init: y3,
            y4_init: y4,
            y5_init: y5,
            y6_init: y6,
            y7_init: y7,
            y8_init: y8,
            y9_init: y9,
        }
    }
}

impl InitialConditions {
    /// All-zero state for `n` nodes
    pub fn zeros(n: usize) -> Self {
        Self {
            vars: std::array::from_fn(|_| Array2::zeros((n, 1))),
        }
    }

    /// One explicit state per node
    pub fn from_states(states: &[NodeState]) -> Self {
        let n = states.len();
        Self {
            vars: std::array::from_fn(|var| {
                Array2::from_shape_fn((n, 1), |(node, _)| states[node][var])
            }),
        }
    }

    /// Saved trajectories, e.g. the tail of a previous run
    pub fn from_history(vars: [Array2<f64>; STATE_DIM]) -> Result<Self> {
        let shape = vars[0].dim();
        if let Some(var) = vars.iter().position(|arr| arr.dim() != shape) {
            return Err(NmmError::config(format!(
                "initial history y{} has shape {:?}, expected {:?}",
                var,
                vars[var].dim(),
                shape
            )));
        }
        Ok(Self { vars })
    }

    /// Small random perturbations around rest.
    ///
    /// Potentials are drawn from U(-0.5, 0.5) mV and their derivatives from
    /// U(-0.1, 0.1), variable by variable.
    pub fn uniform_random(n: usize, seed: Option<u64>) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.unwrap_or_else(rand::random));
        let potential = Uniform::new_inclusive(-0.5, 0.5);
        let derivative = Uniform::new_inclusive(-0.1, 0.1);
        Self {
            vars: std::array::from_fn(|var| {
                let dist = if var < STATE_DIM / 2 { &potential } else { &derivative };
                Array2::from_shape_simple_fn((n, 1), || dist.sample(&mut rng))
            }),
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.vars[0].nrows()
    }

    /// History width (1 for a plain initial state)
    pub fn width(&self) -> usize {
        self.vars[0].ncols()
    }

    /// Check shape against the node count and the lookback window
    pub fn validate(&self, n: usize, lookback: usize) -> Result<()> {
        let width = self.width();
        for (var, arr) in self.vars.iter().enumerate() {
            if arr.nrows() != n {
                return Err(NmmError::config(format!(
                    "y{}_init has {} rows for {} nodes",
                    var,
                    arr.nrows(),
                    n
                )));
            }
            if arr.ncols() != width {
                return Err(NmmError::config(format!(
                    "y{}_init has width {}, y0_init has width {}",
                    var,
                    arr.ncols(),
                    width
                )));
            }
            if arr.iter().any(|v| !v.is_finite()) {
                return Err(NmmError::config(format!("y{}_init is not finite", var)));
            }
        }
        if width == 0 || (width > 1 && width < lookback) {
            return Err(NmmError::config(format!(
                "initial history width {} is neither 1 nor at least the lookback of {} steps",
                width, lookback
            )));
        }
        Ok(())
    }
}

// ============================================================================
// ACTIVITY TYPES
// ============================================================================

/// The six activity regimes of Wendling et al. (2002), set through `A, B, G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    /// Normal background activity
    Type1,
    /// Sporadic spikes
    Type2,
    /// Sustained spike-wave discharges
    Type3,
    /// Slow rhythmic activity
    Type4,
    /// Low-voltage rapid activity
    Type5,
    /// Slow quasi-sinusoidal activity
    Type6,
}

impl ActivityType {
    pub const ALL: [ActivityType; 6] = [
        Self::Type1,
        Self::Type2,
        Self::Type3,
        Self::Type4,
        Self::Type5,
        Self::Type6,
    ];

    /// (A, B, G) gains in mV
    pub fn gains(self) -> (f64, f64, f64) {
        match self {
            Self::Type1 => (5.0, 50.0, 15.0),
            Self::Type2 => (5.0, 40.0, 15.0),
            Self::Type3 => (5.0, 25.0, 15.0),
            Self::Type4 => (5.0, 10.0, 15.0),
            Self::Type5 => (5.0, 5.0, 25.0),
            Self::Type6 => (5.0, 15.0, 0.0),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Type1 => "normal background activity",
            Self::Type2 => "sporadic spikes",
            Self::Type3 => "sustained spike-wave discharges",
            Self::Type4 => "slow rhythmic activity",
            Self::Type5 => "low-voltage rapid activity",
            Self::Type6 => "slow quasi-sinusoidal activity",
        }
    }
}

impl FromStr for ActivityType {
    type Err = NmmError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase();
        let digit = key.strip_prefix("type").unwrap_or(&key);
        match digit {
            "1" => Ok(Self::Type1),
            "2" => Ok(Self::Type2),
            "3" => Ok(Self::Type3),
            "4" => Ok(Self::Type4),
            "5" => Ok(Self::Type5),
            "6" => Ok(Self::Type6),
            _ => Err(NmmError::config(format!("unknown activity type '{}'", s))),
        }
    }
}

// ============================================================================
// PARAMETER BUNDLE
// ============================================================================

/// Keys accepted in a serialized bundle, besides [`INIT_KEYS`]
pub const BUNDLE_KEYS: [&str; 27] = [
    "dt",
    "duration",
    "seed",
    "Cmat",
    "lengthMat",
    "signalV",
    "K_gl",
    "A",
    "B",
    "G",
    "p_mean",
    "a",
    "b",
    "g",
    "C",
    "C1",
    "C2",
    "C3",
    "C4",
    "C5",
    "C6",
    "C7",
    "p_sigma",
    "e0",
    "v0",
    "r",
    "integration_method",
];

/// Complete, typed input of one Wendling run.
///
/// Fields missing from a serialized bundle take their [`Default`] values;
/// unknown keys are rejected by [`WendlingParams::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WendlingParams {
    /// Integration step (ms)
    pub dt: Time,
    /// Simulated horizon (ms)
    pub duration: Time,
    /// Noise seed; `None` draws a fresh one per run
    pub seed: Option<u64>,

    /// Structural connectivity, N x N
    #[serde(rename = "Cmat", deserialize_with = "matrix")]
    pub cmat: Array2<f64>,
    /// Fiber lengths (mm), N x N
    #[serde(rename = "lengthMat", deserialize_with = "matrix")]
    pub length_mat: Array2<f64>,
    /// Conduction velocity (m/s)
    #[serde(rename = "signalV")]
    pub signal_v: f64,
    /// Global coupling gain
    #[serde(rename = "K_gl")]
    pub k_gl: f64,

    /// Excitatory gain (mV)
    #[serde(rename = "A")]
    pub gain_a: NodeParam,
    /// Slow inhibitory gain (mV)
    #[serde(rename = "B")]
    pub gain_b: NodeParam,
    /// Fast inhibitory gain (mV)
    #[serde(rename = "G")]
    pub gain_g: NodeParam,
    /// Mean external drive (Hz)
    pub p_mean: NodeParam,

    /// Excitatory rate constant (1/ms)
    #[serde(rename = "a")]
    pub rate_a: f64,
    /// Slow inhibitory rate constant (1/ms)
    #[serde(rename = "b")]
    pub rate_b: f64,
    /// Fast inhibitory rate constant (1/ms)
    #[serde(rename = "g")]
    pub rate_g: f64,

    #[serde(rename = "C")]
    pub c: f64,
    #[serde(rename = "C1")]
    pub c1: f64,
    #[serde(rename = "C2")]
    pub c2: f64,
    #[serde(rename = "C3")]
    pub c3: f64,
    #[serde(rename = "C4")]
    pub c4: f64,
    #[serde(rename = "C5")]
    pub c5: f64,
    #[serde(rename = "C6")]
    pub c6: f64,
    #[serde(rename = "C7")]
    pub c7: f64,

    /// Standard deviation of the external drive (Hz)
    pub p_sigma: Rate,

    pub e0: Rate,
    pub v0: f64,
    pub r: f64,

    pub integration_method: IntegrationMethod,

    /// y0_init .. y9_init
    #[serde(flatten)]
    pub init: InitialConditions,
}

impl Default for WendlingParams {
    /// Single isolated node with the Wendling 2002 gains.
    ///
    /// `B` and `G` sit at 22 and 18, inside the background regime and away
    /// from spike-wave discharges.
    fn default() -> Self {
        let sigmoid = Sigmoid::default();
        let mut params = Self {
            dt: 0.1,
            duration: 10_000.0,
            seed: None,
            cmat: Array2::zeros((1, 1)),
            length_mat: Array2::zeros((1, 1)),
            signal_v: 20.0,
            k_gl: 0.5,
            gain_a: NodeParam::Scalar(5.0),
            gain_b: NodeParam::Scalar(22.0),
            gain_g: NodeParam::Scalar(18.0),
            p_mean: NodeParam::Scalar(90.0),
            rate_a: 0.1,
            rate_b: 0.05,
            rate_g: 0.5,
            c: DEFAULT_C,
            c1: 0.0,
            c2: 0.0,
            c3: 0.0,
            c4: 0.0,
            c5: 0.0,
            c6: 0.0,
            c7: 0.0,
            p_sigma: 30.0,
            e0: sigmoid.e0,
            v0: sigmoid.v0,
            r: sigmoid.r,
            integration_method: IntegrationMethod::Euler,
            init: InitialConditions::zeros(1),
        };
        params.set_connectivity_constant(DEFAULT_C);
        params
    }
}

impl WendlingParams {
    /// Network of `Cmat.nrows()` nodes.
    ///
    /// Self-coupling is removed, missing fiber lengths mean zero delay and
    /// multi-node networks start from random initial conditions so nodes do
    /// not begin synchronised.
    pub fn network(
        cmat: Array2<f64>,
        length_mat: Option<Array2<f64>>,
        seed: Option<u64>,
    ) -> Result<Self> {
        let n = cmat.nrows();
        if n == 0 || cmat.ncols() != n {
            return Err(NmmError::config(format!(
                "Cmat must be square and non-empty, got {:?}",
                cmat.dim()
            )));
        }
        let length_mat = length_mat.unwrap_or_else(|| Array2::zeros((n, n)));
        if length_mat.dim() != (n, n) {
            return Err(NmmError::config(format!(
                "lengthMat has shape {:?}, Cmat has shape {:?}",
                length_mat.dim(),
                cmat.dim()
            )));
        }

        let mut cmat = cmat;
        cmat.diag_mut().fill(0.0);

        let init = if n > 1 {
            InitialConditions::uniform_random(n, seed)
        } else {
            InitialConditions::zeros(n)
        };

        Ok(Self {
            seed,
            cmat,
            length_mat,
            init,
            ..Self::default()
        })
    }

    /// Parse a bundle from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| NmmError::config(format!("invalid parameter bundle: {}", e)))?;
        Self::from_value(value)
    }

    /// Parse a bundle from a JSON object, rejecting keys it does not know
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| NmmError::config("parameter bundle must be a JSON object"))?;
        if let Some(key) = object
            .keys()
            .find(|key| !BUNDLE_KEYS.contains(&key.as_str()) && !INIT_KEYS.contains(&key.as_str()))
        {
            return Err(NmmError::config(format!("unknown parameter '{}'", key)));
        }
        serde_json::from_value(value)
            .map_err(|e| NmmError::config(format!("invalid parameter bundle: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn n_nodes(&self) -> usize {
        self.cmat.nrows()
    }

    pub fn sigmoid(&self) -> Sigmoid {
        Sigmoid::new(self.e0, self.v0, self.r)
    }

    /// Set `C` and derive `C1..C7` with the standard ratios
    pub fn set_connectivity_constant(&mut self, c: f64) {
        self.c = c;
        let [c1, c2, c3, c4, c5, c6, c7] = CONNECTIVITY_RATIOS.map(|ratio| ratio * c);
        self.c1 = c1;
        self.c2 = c2;
        self.c3 = c3;
        self.c4 = c4;
        self.c5 = c5;
        self.c6 = c6;
        self.c7 = c7;
    }

    /// Switch every node to one of the published activity regimes
    pub fn apply_activity(&mut self, activity: ActivityType) {
        let (a, b, g) = activity.gains();
        self.gain_a = NodeParam::Scalar(a);
        self.gain_b = NodeParam::Scalar(b);
        self.gain_g = NodeParam::Scalar(g);
    }

    /// Per-node variation of `A, B, G, p_mean`.
    ///
    /// Each becomes `mean * (1 + U(-level, level))` per node. Single-node
    /// bundles and `level == 0` are left unchanged.
    pub fn with_heterogeneity(mut self, level: f64, seed: Option<u64>) -> Result<Self> {
        if !level.is_finite() || !(0.0..1.0).contains(&level) {
            return Err(NmmError::config(format!(
                "heterogeneity must lie in [0, 1), got {}",
                level
            )));
        }
        let n = self.n_nodes();
        if level == 0.0 || n < 2 {
            return Ok(self);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed.unwrap_or_else(rand::random));
        let spread = Uniform::new_inclusive(-level, level);
        let mut vary = |param: &NodeParam| {
            let base = param.mean();
            NodeParam::PerNode(
                (0..n)
                    .map(|_| base * (1.0 + spread.sample(&mut rng)))
                    .collect(),
            )
        };
        self.gain_a = vary(&self.gain_a);
        self.gain_b = vary(&self.gain_b);
        self.gain_g = vary(&self.gain_g);
        self.p_mean = vary(&self.p_mean);
        Ok(self)
    }

    /// Number of integration steps, `ceil(duration / dt)` up to rounding noise
    pub fn n_steps(&self) -> Result<usize> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(NmmError::config(format!("dt must be positive, got {}", self.dt)));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(NmmError::config(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        let ratio = self.duration / self.dt;
        let steps = if (ratio - ratio.round()).abs() < 1e-9 {
            ratio.round()
        } else {
            ratio.ceil()
        };
        if !steps.is_finite() || steps >= usize::MAX as f64 {
            return Err(NmmError::config(format!(
                "duration {} ms with dt {} ms gives more steps than can be represented",
                self.duration, self.dt
            )));
        }
        Ok((steps as usize).max(1))
    }
}
