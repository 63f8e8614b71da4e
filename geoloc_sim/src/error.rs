// geoloc_sim/src/error.rs

use geoloc_core::error::GeolocError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// The scenario file could not be read or does not match the schema.
    #[error("failed to load scenario: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The scenario parsed but describes something that cannot be simulated.
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error(transparent)]
    Estimation(#[from] GeolocError),

    #[error("failed to serialize report: {0}")]
    Report(#[from] toml::ser::Error),
}
