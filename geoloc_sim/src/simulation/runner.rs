// geoloc_sim/src/simulation/runner.rs

use geoloc_core::confidence::{error_ellipse, ConfidenceInterval, ErrorEllipse};
use geoloc_core::estimation::filters::ekf::{EkfSettings, ExtendedKalmanFilter};
use geoloc_core::estimation::solvers::ils::{IlsSettings, IteratedLeastSquares};
use geoloc_core::estimation::MeasurementNoise;
use geoloc_core::frames::Geodetic;
use geoloc_core::models::ModelKind;
use geoloc_core::types::{Covariance, State};
use nalgebra::{DMatrix, DVector, Point2};
use serde::Serialize;
use tracing::info;

use crate::error::SimError;
use crate::simulation::core::config::{EstimatorConfig, ScenarioConfig};
use crate::simulation::core::prng::SimulationRng;
use crate::simulation::sensors::ScenarioSetup;

/// Horizontal error ellipse in the emitter's East-North plane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EllipseSummary {
    pub confidence: f64,
    pub semi_major_m: f64,
    pub semi_minor_m: f64,
    /// Angle of the major axis from East, counter-clockwise, degrees.
    pub orientation_deg: f64,
    pub area_m2: f64,
}

impl From<&ErrorEllipse> for EllipseSummary {
    fn from(ellipse: &ErrorEllipse) -> Self {
        Self {
            confidence: ellipse.confidence,
            semi_major_m: ellipse.semi_major_length(),
            semi_minor_m: ellipse.semi_minor_length(),
            orientation_deg: ellipse.orientation().to_degrees(),
            area_m2: ellipse.area(),
        }
    }
}

/// The outcome of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub kind: ModelKind,
    pub estimator: String,
    pub sensors: usize,
    /// Gauss-Newton iterations for `Ils`, committed updates for `Ekf`.
    pub iterations: usize,
    /// Distance from the truth, meters (horizontal for bearing-only runs).
    pub position_error_m: f64,
    /// Whether every true state component lies inside the confidence interval.
    pub truth_in_interval: bool,
    pub truth: Vec<f64>,
    pub estimate: Vec<f64>,
    pub interval_lower: Vec<f64>,
    pub interval_upper: Vec<f64>,
    pub estimated_position: Geodetic,
    pub horizontal_ellipse: EllipseSummary,
}

impl ScenarioReport {
    pub fn to_toml_string(&self) -> Result<String, SimError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Simulates the configured measurements and runs the configured estimator on them.
pub fn run_scenario(config: &ScenarioConfig) -> Result<ScenarioReport, SimError> {
    config.validate()?;
    let setup = ScenarioSetup::build(config)?;
    let mut rng = SimulationRng::new(config.simulation.seed);
    let confidence = config.simulation.confidence;
    let stddev = config.measurement.noise_stddev;
    let noise = MeasurementNoise::Iid(stddev);
    let truth_model = setup.kind.build();

    let (estimate, covariance, iterations) = match &config.estimator {
        EstimatorConfig::Ils {
            tolerance,
            max_iterations,
            inversion,
        } => {
            let z = setup.simulate(truth_model.as_ref(), stddev, &mut rng)?;
            let solver = IteratedLeastSquares::new(
                setup.initial_state.clone(),
                IlsSettings {
                    noise,
                    tolerance: *tolerance,
                    max_iterations: *max_iterations,
                    inversion: *inversion,
                },
                setup.kind.build(),
            )?;
            let solution = solver.solve(&z, &setup.geometry)?;
            (solution.estimate, solution.covariance, solution.iterations)
        }
        EstimatorConfig::Ekf {
            updates,
            initial_position_sigma_m,
            initial_auxiliary_sigma,
            inversion,
        } => {
            let prior = prior_covariance(
                &setup,
                *initial_position_sigma_m,
                *initial_auxiliary_sigma,
            );
            let mut ekf = ExtendedKalmanFilter::new(
                setup.initial_state.clone(),
                prior,
                EkfSettings {
                    confidence,
                    noise,
                    inversion: *inversion,
                },
                setup.kind.build(),
            )?;
            for _ in 0..*updates {
                let z = setup.simulate(truth_model.as_ref(), stddev, &mut rng)?;
                ekf.update(&z, &setup.geometry)?;
            }
            (
                ekf.estimate().clone(),
                ekf.covariance().clone(),
                ekf.update_count(),
            )
        }
    };

    let interval = ConfidenceInterval::around(&estimate, &covariance, confidence)?;
    let ellipse = error_ellipse(
        &setup.horizontal_covariance(&covariance),
        Point2::origin(),
        confidence,
    )?;

    let report = ScenarioReport {
        kind: setup.kind,
        estimator: config.estimator.get_type_str().to_string(),
        sensors: setup.geometry.len(),
        iterations,
        position_error_m: setup.position_error(&estimate),
        truth_in_interval: interval.contains(&setup.truth),
        truth: setup.truth.as_slice().to_vec(),
        estimated_position: setup.estimated_position(&estimate)?,
        estimate: estimate.as_slice().to_vec(),
        interval_lower: interval.lower.as_slice().to_vec(),
        interval_upper: interval.upper.as_slice().to_vec(),
        horizontal_ellipse: EllipseSummary::from(&ellipse),
    };

    info!(
        kind = ?report.kind,
        estimator = %report.estimator,
        iterations = report.iterations,
        position_error_m = report.position_error_m,
        "scenario finished"
    );
    Ok(report)
}

/// Diagonal prior: position sigma on the position block, auxiliary sigma on
/// any remaining component (carrier frequency or bearing bias).
fn prior_covariance(setup: &ScenarioSetup, position_sigma: f64, auxiliary_sigma: f64) -> Covariance {
    let n = setup.initial_state.len();
    let position_dims = match setup.kind {
        ModelKind::DirectionOfArrival => 2,
        _ => 3,
    };
    let variances: State = DVector::from_iterator(
        n,
        (0..n).map(|i| {
            if i < position_dims {
                position_sigma.powi(2)
            } else {
                auxiliary_sigma.powi(2)
            }
        }),
    );
    DMatrix::from_diagonal(&variances)
}
