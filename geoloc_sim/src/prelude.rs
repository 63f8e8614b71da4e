// geoloc_sim/src/prelude.rs

// Re-export the entire geoloc_core prelude so scenario code can reach the
// estimators and frames directly.
pub use geoloc_core::prelude::*;

// Re-export common simulation-specific types.
pub use crate::error::SimError;
pub use crate::simulation::core::config::*;
pub use crate::simulation::core::prng::SimulationRng;
pub use crate::simulation::runner::{run_scenario, EllipseSummary, ScenarioReport};
pub use crate::simulation::sensors::{ScenarioSetup, StateFrame};
