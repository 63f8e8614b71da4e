// geoloc_sim/examples/01_range_rate_fix.rs

//! Runs the bundled range-rate scenario and prints the report.
//!
//! To run this example from the workspace root:
//! `cargo run --example 01_range_rate_fix`
//!
//! An alternative scenario file can be passed as the first argument.

use geoloc_sim::{run_scenario, ScenarioConfig};

fn main() {
    let scenario_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "assets/scenarios/range_rate_fix.toml".to_string());
    println!("Loading scenario from: {}", scenario_path);

    let config = match ScenarioConfig::load(&scenario_path) {
        Ok(config) => config,
        Err(e) => panic!("Failed to load scenario '{}': {}", scenario_path, e),
    };

    match run_scenario(&config).and_then(|report| report.to_toml_string()) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Scenario failed: {e}"),
    }
}
