//! # NMM Core
//!
//! Types shared by the neural mass crates and their hosts: the [`NmmError`]
//! taxonomy, unit aliases, the per-node [`TimeSeries`] export format and the
//! [`MassModel`] seam through which a host drives any registered model.
//!
//! Models are not discovered. A host builds a [`ModelRegistry`] and hands it
//! to each model crate's `register` function:
//!
//! ```
//! use nmm_core::{ModelConfig, ModelRegistry};
//!
//! let registry = ModelRegistry::new();
//! assert!(registry.create("wendling", &ModelConfig::new(1)).is_err());
//! ```

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Common errors
#[derive(Debug, Error)]
pub enum NmmError {
    /// Invalid parameter bundle, detected before any stepping
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// API called in the wrong order (e.g. output before run)
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Model not found: {0}")]
    UnknownModel(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl NmmError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, NmmError>;

/// Time point (ms)
pub type Time = f64;

/// Membrane potential (mV)
pub type Voltage = f64;

/// Firing rate (Hz)
pub type Rate = f64;

/// One node's observable over time, as written by hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub units: String,
    /// Sample times (ms)
    pub time: Vec<Time>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    /// Copy parallel time/value slices; their lengths must agree
    pub fn from_parts(name: &str, units: &str, time: &[Time], values: &[f64]) -> Result<Self> {
        if time.len() != values.len() {
            return Err(NmmError::config(format!(
                "time series '{}' has {} time points but {} values",
                name,
                time.len(),
                values.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            units: units.to_string(),
            time: time.to_vec(),
            values: values.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Minimum and maximum value, `None` when empty
    pub fn range(&self) -> Option<(f64, f64)> {
        self.values.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

// ============================================================================
// MODEL INTERFACE
// ============================================================================

/// A runnable neural mass model as seen by a host.
pub trait MassModel: Send {
    /// Registry name
    fn name(&self) -> &str;

    /// Human readable description
    fn description(&self) -> &str;

    /// Names of the integrated state variables
    fn state_vars(&self) -> &[&'static str];

    /// Name of the variable reported by default
    fn default_output(&self) -> &str;

    /// Number of nodes in the network
    fn n_nodes(&self) -> usize;

    /// Run the full simulation
    fn run(&mut self) -> Result<()>;

    /// Time vector (ms) of the last completed run
    fn time(&self) -> Result<&[Time]>;

    /// Trajectory of one state variable, nodes x time, lookback removed
    fn state(&self, var: &str) -> Result<Array2<f64>>;

    /// Model-specific observable, nodes x time
    fn output_signal(&self) -> Result<Array2<f64>>;
}

/// Host-side settings handed to a model factory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of nodes (ignored when `params` carries its own connectivity)
    pub nodes: usize,
    /// Integration step override (ms)
    pub dt: Option<Time>,
    /// Duration override (ms)
    pub duration: Option<Time>,
    /// RNG seed override
    pub seed: Option<u64>,
    /// Full model-specific parameter bundle
    pub params: Option<serde_json::Value>,
}

impl ModelConfig {
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }
}

/// Factory building a model from host settings
pub type ModelFactory = Box<dyn Fn(&ModelConfig) -> Result<Box<dyn MassModel>> + Send + Sync>;

struct RegistryEntry {
    description: String,
    factory: ModelFactory,
}

/// Name -> factory table owned by the host.
///
/// Model crates expose a `register(&mut ModelRegistry)` function; nothing is
/// registered implicitly.
#[derive(Default)]
pub struct ModelRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous entry with the same name
    pub fn register<F>(&mut self, name: &str, description: &str, factory: F)
    where
        F: Fn(&ModelConfig) -> Result<Box<dyn MassModel>> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            RegistryEntry {
                description: description.to_string(),
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered (name, description) pairs, sorted by name
    pub fn models(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.description.as_str()))
    }

    /// Build a model by name
    pub fn create(&self, name: &str, config: &ModelConfig) -> Result<Box<dyn MassModel>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| NmmError::UnknownModel(name.to_string()))?;
        (entry.factory)(config)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
