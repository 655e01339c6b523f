//! Host-facing Wendling model.

use crate::connectivity::{max_delay, network_delay_steps};
use crate::output::SimulationOutput;
use crate::params::WendlingParams;
use crate::stepper::{Execution, Stepper};
use crate::STATE_VARS;
use ndarray::Array2;
use nmm_core::{MassModel, ModelConfig, ModelRegistry, NmmError, Result, Time};
use tracing::debug;

/// Registry name
pub const MODEL_NAME: &str = "wendling";

pub const MODEL_DESCRIPTION: &str =
    "Wendling-Chauvel neural mass model: 10 state variables, delayed network, Euler-Maruyama";

/// A parameter bundle plus the output of its last run.
#[derive(Debug, Clone)]
pub struct WendlingModel {
    params: WendlingParams,
    execution: Option<Execution>,
    output: Option<SimulationOutput>,
}

impl WendlingModel {
    pub fn new(params: WendlingParams) -> Self {
        Self {
            params,
            execution: None,
            output: None,
        }
    }

    /// Build from host settings.
    ///
    /// `config.params` is a (possibly partial) JSON bundle. Without one,
    /// `config.nodes > 1` gives an all-to-all network. `dt`, `duration` and
    /// `seed` override whatever the bundle says.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let mut params = match &config.params {
            Some(value) => WendlingParams::from_value(value.clone())?,
            None if config.nodes > 1 => {
                let n = config.nodes;
                WendlingParams::network(Array2::ones((n, n)), None, config.seed)?
            }
            None => WendlingParams::default(),
        };
        if let Some(dt) = config.dt {
            params.dt = dt;
        }
        if let Some(duration) = config.duration {
            params.duration = duration;
        }
        if config.seed.is_some() {
            params.seed = config.seed;
        }
        Ok(Self::new(params))
    }

    /// Force sequential or parallel node updates instead of choosing by size
    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = Some(execution);
        self
    }

    pub fn params(&self) -> &WendlingParams {
        &self.params
    }

    /// Mutable parameters; discards the output of the previous run
    pub fn params_mut(&mut self) -> &mut WendlingParams {
        self.output = None;
        &mut self.params
    }

    /// Delay matrix in steps derived from `lengthMat`, `signalV` and `dt`
    pub fn delay_steps(&self) -> Result<Array2<usize>> {
        network_delay_steps(&self.params.length_mat, self.params.signal_v, self.params.dt)
    }

    /// Largest inter-node delay in steps
    pub fn max_delay(&self) -> Result<usize> {
        Ok(max_delay(&self.delay_steps()?))
    }

    /// Integrate the current bundle, replacing any previous output
    pub fn run(&mut self) -> Result<&SimulationOutput> {
        let delays = self.delay_steps()?;
        let mut stepper = Stepper::new(&self.params, &self.params.cmat, &delays)?;
        if let Some(execution) = self.execution {
            stepper = stepper.with_execution(execution);
        }
        stepper.run()?;
        let output = SimulationOutput::new(stepper.finish()?);
        debug!(
            nodes = output.n_nodes(),
            steps = output.n_steps(),
            seed = output.seed(),
            stable = output.is_stable(),
            "wendling model run finished"
        );
        Ok(&*self.output.insert(output))
    }

    /// Output of the last run
    pub fn output(&self) -> Result<&SimulationOutput> {
        self.output
            .as_ref()
            .ok_or_else(|| NmmError::usage("model has not been run yet"))
    }

    /// Pyramidal potential `y1 - y2 - y3`, nodes x time
    pub fn output_signal(&self) -> Result<Array2<f64>> {
        Ok(self.output()?.pyramidal())
    }
}

impl MassModel for WendlingModel {
    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn description(&self) -> &str {
        MODEL_DESCRIPTION
    }

    fn state_vars(&self) -> &[&'static str] {
        &STATE_VARS
    }

    fn default_output(&self) -> &str {
        "y1"
    }

    fn n_nodes(&self) -> usize {
        self.params.n_nodes()
    }

    fn run(&mut self) -> Result<()> {
        WendlingModel::run(self)?;
        Ok(())
    }

    fn time(&self) -> Result<&[Time]> {
        Ok(self.output()?.time())
    }

    fn state(&self, var: &str) -> Result<Array2<f64>> {
        Ok(self.output()?.variable(var)?.to_owned())
    }

    fn output_signal(&self) -> Result<Array2<f64>> {
        WendlingModel::output_signal(self)
    }
}

/// Add the Wendling factory to a host registry
pub fn register(registry: &mut ModelRegistry) {
    registry.register(MODEL_NAME, MODEL_DESCRIPTION, |config| {
        Ok(Box::new(WendlingModel::from_config(config)?) as Box<dyn MassModel>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn quick(duration: Time) -> WendlingModel {
        WendlingModel::new(WendlingParams {
            duration,
            seed: Some(21),
            ..WendlingParams::default()
        })
    }

    #[test]
    fn test_output_before_run() {
        let model = quick(1.0);
        assert!(matches!(model.output(), Err(NmmError::Usage(_))));
        assert!(matches!(model.output_signal(), Err(NmmError::Usage(_))));
        assert!(MassModel::time(&model).is_err());
    }

    #[test]
    fn test_run_and_output_signal() {
        let mut model = quick(5.0);
        assert_eq!(model.run().unwrap().n_steps(), 50);
        let signal = model.output_signal().unwrap();
        assert_eq!(signal.dim(), (1, 50));
        assert_eq!(MassModel::state(&model, "y1").unwrap().dim(), (1, 50));

        model.params_mut().duration = 2.0;
        assert!(model.output().is_err());
    }

    #[test]
    fn test_max_delay() {
        let mut params = WendlingParams::network(
            array![[0.0, 1.0], [1.0, 0.0]],
            Some(array![[0.0, 30.0], [10.0, 0.0]]),
            Some(2),
        )
        .unwrap();
        params.signal_v = 10.0;
        let model = WendlingModel::new(params);
        // 30 mm at 10 m/s = 3 ms = 30 steps
        assert_eq!(model.max_delay().unwrap(), 30);
        assert_eq!(quick(1.0).max_delay().unwrap(), 0);
    }

    #[test]
    fn test_run_rejects_unbufferable_delay() {
        let params = WendlingParams::network(
            array![[0.0, 1.0], [1.0, 0.0]],
            Some(array![[0.0, 1e300], [1.0, 0.0]]),
            Some(2),
        )
        .unwrap();
        let mut model = WendlingModel::new(params);
        assert!(matches!(model.run(), Err(NmmError::Configuration(_))));
        assert!(model.output().is_err());
    }

    #[test]
    fn test_registry_factory() {
        let mut registry = ModelRegistry::new();
        register(&mut registry);
        assert!(registry.contains(MODEL_NAME));

        let config = ModelConfig {
            nodes: 3,
            duration: Some(2.0),
            seed: Some(8),
            ..ModelConfig::default()
        };
        let mut model = registry.create(MODEL_NAME, &config).unwrap();
        assert_eq!(model.name(), "wendling");
        assert_eq!(model.n_nodes(), 3);
        assert_eq!(model.default_output(), "y1");
        assert_eq!(model.state_vars().len(), 10);
        model.run().unwrap();
        assert_eq!(model.output_signal().unwrap().dim(), (3, 20));
        assert_eq!(model.time().unwrap().len(), 20);
    }

    #[test]
    fn test_factory_rejects_bad_bundle() {
        let config = ModelConfig {
            params: Some(serde_json::json!({ "integration_method": "heun" })),
            ..ModelConfig::new(1)
        };
        let err = WendlingModel::from_config(&config).unwrap_err();
        assert!(matches!(err, NmmError::Configuration(_)));

        let misspelled = ModelConfig {
            params: Some(serde_json::json!({ "y0_int": [[2.0]] })),
            ..ModelConfig::new(1)
        };
        let err = WendlingModel::from_config(&misspelled).unwrap_err();
        assert!(matches!(err, NmmError::Configuration(msg) if msg.contains("y0_int")));
    }

    #[test]
    fn test_factory_reads_initial_conditions() {
        let mut bundle = serde_json::json!({ "duration": 1.0, "p_sigma": 0.0 });
        for key in crate::params::INIT_KEYS {
            bundle[key] = serde_json::json!([[0.0]]);
        }
        bundle["y1_init"] = serde_json::json!([[2.0]]);
        let config = ModelConfig {
            params: Some(bundle),
            ..ModelConfig::new(1)
        };
        let mut model = WendlingModel::from_config(&config).unwrap();
        assert_eq!(model.params().init.vars[1][[0, 0]], 2.0);
        model.run().unwrap();
        assert_eq!(model.output_signal().unwrap()[[0, 0]], 2.0);
    }

    #[test]
    fn test_factory_overrides_bundle() {
        let config = ModelConfig {
            dt: Some(0.05),
            params: Some(serde_json::json!({ "duration": 1.0, "dt": 0.2 })),
            ..ModelConfig::new(1)
        };
        let model = WendlingModel::from_config(&config).unwrap();
        assert_eq!(model.params().dt, 0.05);
        assert_eq!(model.params().duration, 1.0);
    }
}
