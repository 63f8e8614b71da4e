// geoloc_sim/src/simulation/core/config.rs

use std::path::Path;

use figment::{
    providers::{Format, Toml},
    Figment,
};
use geoloc_core::estimation::InversionMode;
use geoloc_core::frames::Geodetic;
use geoloc_core::models::ModelKind;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SimError;

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

/// # ScenarioConfig
/// Everything needed for one geolocation run: where the emitter and sensors
/// are, what the sensors measure, and which estimator processes it.
/// This struct is the root of the data parsed from a `scenario.toml` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)] // Fail if the TOML has fields not in our struct
pub struct ScenarioConfig {
    #[serde(default)] // Use default if the [simulation] section is missing
    pub simulation: Simulation,

    pub emitter: EmitterConfig,

    // The TOML has `[[sensors]]`, which becomes a Vec of SensorConfig structs.
    pub sensors: Vec<SensorConfig>,

    pub measurement: MeasurementConfig,

    #[serde(default)]
    pub initial_guess: InitialGuess,

    pub estimator: EstimatorConfig,
}

// =========================================================================
// == Configuration Sub-Structs ==
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Simulation {
    /// Optional seed for the pseudo-random number generator for determinism.
    pub seed: Option<u64>,
    /// Confidence level of the reported regions.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.95
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            seed: None,
            confidence: default_confidence(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmitterConfig {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    #[serde(default)]
    pub altitude_m: f64,
    /// Transmitted carrier frequency, required by frequency-of-arrival runs.
    pub frequency_hz: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    pub name: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Altitude above the ellipsoid in feet, as aircraft report it.
    #[serde(default)]
    pub altitude_ft: f64,
    /// Velocity in the sensor's own East-North-Up frame, m/s.
    #[serde(default)]
    pub velocity_enu: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeasurementConfig {
    pub kind: ModelKind,
    /// One-sigma measurement noise in the model's units (m/s, Hz, rad or m).
    pub noise_stddev: f64,
    /// Constant angle bias added to direction-of-arrival measurements, radians.
    #[serde(default)]
    pub bias_rad: f64,
}

/// How far the estimator's starting point is from the truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitialGuess {
    /// Position offset in the emitter's East-North-Up frame, meters.
    #[serde(default)]
    pub offset_enu_m: [f64; 3],
    #[serde(default)]
    pub frequency_offset_hz: f64,
    #[serde(default)]
    pub bias_offset_rad: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")] // This tells serde to use the "type" field to decide which enum variant to parse
#[serde(rename_all = "PascalCase")] // e.g., "Ils" in TOML maps to `Ils` variant
pub enum EstimatorConfig {
    Ils {
        tolerance: f64,
        max_iterations: usize,
        #[serde(default)]
        inversion: InversionMode,
    },
    Ekf {
        /// Number of independent measurement batches fused in sequence.
        #[serde(default = "default_updates")]
        updates: usize,
        /// Prior one-sigma uncertainty on each position component, meters.
        initial_position_sigma_m: f64,
        /// Prior one-sigma on the extra state component (Hz or rad), if any.
        #[serde(default = "default_auxiliary_sigma")]
        initial_auxiliary_sigma: f64,
        #[serde(default)]
        inversion: InversionMode,
    },
}

impl EmitterConfig {
    pub fn position(&self) -> Geodetic {
        Geodetic::new(self.latitude_deg, self.longitude_deg, self.altitude_m)
    }
}

fn default_updates() -> usize {
    10
}

fn default_auxiliary_sigma() -> f64 {
    1.0
}

impl EstimatorConfig {
    pub fn get_type_str(&self) -> &str {
        match self {
            EstimatorConfig::Ils { .. } => "Ils",
            EstimatorConfig::Ekf { .. } => "Ekf",
        }
    }
}

impl ScenarioConfig {
    /// Loads and validates a scenario from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        info!("Loading scenario from: {}", path.display());
        let config: ScenarioConfig = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a scenario from TOML text.
    pub fn from_toml_str(source: &str) -> Result<Self, SimError> {
        let config: ScenarioConfig = Figment::new()
            .merge(Toml::string(source))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Catches scenarios that parse but cannot produce a solvable problem.
    pub fn validate(&self) -> Result<(), SimError> {
        let kind = self.measurement.kind;
        let available = kind.measurement_dim(self.sensors.len());
        if available < kind.state_dim() {
            return Err(SimError::InvalidScenario(format!(
                "{kind:?} with {} sensors yields {available} measurements for {} unknowns",
                self.sensors.len(),
                kind.state_dim()
            )));
        }
        if kind == ModelKind::FrequencyOfArrival && self.emitter.frequency_hz.is_none() {
            return Err(SimError::InvalidScenario(
                "frequency_of_arrival needs emitter.frequency_hz".into(),
            ));
        }
        if !self.measurement.noise_stddev.is_finite() || self.measurement.noise_stddev < 0.0 {
            return Err(SimError::InvalidScenario(format!(
                "noise_stddev must be finite and non-negative, got {}",
                self.measurement.noise_stddev
            )));
        }
        if let EstimatorConfig::Ekf { updates: 0, .. } = self.estimator {
            return Err(SimError::InvalidScenario(
                "an Ekf run needs at least one update".into(),
            ));
        }
        Ok(())
    }
}
