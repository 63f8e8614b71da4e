// geoloc_sim/src/simulation/mod.rs

//! Scenario loading, sensor placement and estimator runs.

pub mod core;
pub mod runner;
pub mod sensors;
