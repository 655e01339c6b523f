//! # NMM-Wendling: Wendling-Chauvel Neural Mass Model
//!
//! Stochastic simulation of networks of Wendling cortical columns
//! (Wendling et al., 2002). Each node is a 10-variable neural mass with
//! pyramidal cells, excitatory interneurons and slow dendritic and fast
//! somatic inhibitory interneurons. Nodes are coupled through the sigmoid of
//! their delayed pyramidal potential.
//!
//! ## State variables
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `y0` / `y5` | pyramidal PSP and its derivative |
//! | `y1` / `y6` | excitatory feedback PSP |
//! | `y2` / `y7` | slow dendritic inhibition |
//! | `y3` / `y8` | fast somatic inhibition |
//! | `y4` / `y9` | slow input onto fast interneurons |
//!
//! The observable is the pyramidal membrane potential `y1 - y2 - y3`.
//!
//! ## Example
//!
//! ```no_run
//! use nmm_wendling::{WendlingModel, WendlingParams};
//!
//! let params = WendlingParams {
//!     duration: 1000.0,
//!     seed: Some(42),
//!     ..WendlingParams::default()
//! };
//! let mut model = WendlingModel::new(params);
//! let eeg = model.run()?.pyramidal();
//! # Ok::<(), nmm_core::NmmError>(())
//! ```

pub mod buffer;
pub mod connectivity;
pub mod coupling;
pub mod derivative;
pub mod model;
pub mod noise;
pub mod output;
pub mod params;
pub mod sigmoid;
pub mod stepper;

pub use model::{register, WendlingModel, MODEL_NAME};
pub use output::SimulationOutput;
pub use params::{ActivityType, InitialConditions, IntegrationMethod, NodeParam, WendlingParams};
pub use sigmoid::Sigmoid;
pub use stepper::{integrate, Execution, NumericalWarning, Stepper, StepperPhase, Trajectories};

/// Number of state variables per node
pub const STATE_DIM: usize = 10;

/// Full state of one node, `y0..y9`
pub type NodeState = [f64; STATE_DIM];

pub const Y0: usize = 0;
pub const Y1: usize = 1;
pub const Y2: usize = 2;
pub const Y3: usize = 3;
pub const Y4: usize = 4;
pub const Y5: usize = 5;
pub const Y6: usize = 6;
pub const Y7: usize = 7;
pub const Y8: usize = 8;
pub const Y9: usize = 9;

/// Variable names in state order
pub const STATE_VARS: [&str; STATE_DIM] = ["y0", "y1", "y2", "y3", "y4", "y5", "y6", "y7", "y8", "y9"];
