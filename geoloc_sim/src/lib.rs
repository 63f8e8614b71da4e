// geoloc_sim/src/lib.rs

// Scenario runner for the geolocation estimators: reads a TOML scenario,
// simulates noisy sensor measurements and reports how the estimate did.

// This prelude is for convenience for users of the simulation crate.
pub mod prelude;

pub mod error;
pub mod simulation;

pub use error::SimError;
pub use simulation::core::config::ScenarioConfig;
pub use simulation::runner::{run_scenario, ScenarioReport};
