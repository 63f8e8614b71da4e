// geoloc_core/src/lib.rs

// Emitter geolocation: coordinate frames, measurement models, estimators and
// the confidence regions reported around their estimates.
pub mod confidence;
pub mod error;
pub mod estimation;
pub mod frames;
pub mod models;
pub mod prelude;
pub mod types;
pub mod units;
