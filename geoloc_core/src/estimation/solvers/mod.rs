// geoloc_core/src/estimation/solvers/mod.rs

pub mod ils;
