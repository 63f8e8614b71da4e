// geoloc_core/src/estimation/solvers/ils.rs

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{GeolocError, Result};
use crate::estimation::{check_jacobian, check_len, invert, InversionMode, MeasurementNoise};
use crate::models::Measurement;
use crate::types::{all_finite, Covariance, MeasurementVector, State};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IlsSettings {
    /// Standard deviation(s) of the measurement noise.
    pub noise: MeasurementNoise,
    /// Convergence threshold on the Euclidean norm of a single step.
    pub tolerance: f64,
    pub max_iterations: usize,
    #[serde(default)]
    pub inversion: InversionMode,
}

impl IlsSettings {
    pub fn validate(&self) -> Result<()> {
        self.noise.validate()?;
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(GeolocError::Configuration(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(GeolocError::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A converged least-squares fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IlsSolution {
    pub estimate: State,
    /// `(H^T R^-1 H)^-1` linearized where the final step was taken from.
    pub covariance: Covariance,
    /// Number of Gauss-Newton steps applied, the converging one included.
    pub iterations: usize,
    /// Norm of the final, converging step.
    pub step_norm: f64,
    /// `z - h(estimate)`.
    pub residuals: MeasurementVector,
}

/// Weighted nonlinear least squares by Gauss-Newton iteration.
///
/// Each step relinearizes the model at the current estimate and moves by
/// `K (z - h(x))` with `K = (H^T R^-1 H)^-1 H^T R^-1`. Iteration stops once an
/// applied step is shorter than the configured tolerance. Running out of iterations is reported as [`GeolocError::NonConvergence`], never as a silent result.
pub struct IteratedLeastSquares<G> {
    initial_parameters: State,
    settings: IlsSettings,
    model: Box<dyn Measurement<G>>,
}

impl<G> Clone for IteratedLeastSquares<G> {
    fn clone(&self) -> Self {
        Self {
            initial_parameters: self.initial_parameters.clone(),
            settings: self.settings.clone(),
            model: self.model.clone(),
        }
    }
}

impl<G> std::fmt::Debug for IteratedLeastSquares<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IteratedLeastSquares")
            .field("initial_parameters", &self.initial_parameters)
            .field("settings", &self.settings)
            .field("model", &self.model)
            .finish()
    }
}

impl<G> IteratedLeastSquares<G> {
    pub fn new(
        initial_parameters: State,
        settings: IlsSettings,
        model: Box<dyn Measurement<G>>,
    ) -> Result<Self> {
        if initial_parameters.is_empty() {
            return Err(GeolocError::Configuration(
                "initial parameter vector is empty".into(),
            ));
        }
        if !all_finite(initial_parameters.as_slice()) {
            return Err(GeolocError::Configuration(
                "initial parameters must be finite".into(),
            ));
        }
        settings.validate()?;

        Ok(Self {
            initial_parameters,
            settings,
            model,
        })
    }

    pub fn initial_parameters(&self) -> &State {
        &self.initial_parameters
    }

    pub fn settings(&self) -> &IlsSettings {
        &self.settings
    }

    /// Fits the model to `measurements` taken with the given sensor `geometry`.
    ///
    /// Each call starts again from the initial parameters, so one solver can be
    /// reused across independent measurement sets. Iteration `k` linearizes at
    /// the current estimate and applies one step; it has converged once that
    /// applied step is shorter than the tolerance, and the solution reports
    /// `k` iterations. A linear model reaches its closed form with the first
    /// step and confirms it with the second.
    pub fn solve(&self, measurements: &MeasurementVector, geometry: &G) -> Result<IlsSolution> {
        let m = measurements.len();
        if m == 0 {
            return Err(GeolocError::dimension("measurements", "at least 1", 0));
        }
        if !all_finite(measurements.as_slice()) {
            return Err(GeolocError::NonFinite("measurements"));
        }

        let r_inv = self.settings.noise.information(m)?;

        let mut x = self.initial_parameters.clone();
        let mut step_norm = f64::INFINITY;

        for iteration in 1..=self.settings.max_iterations {
            let linearization = self.linearize(&x, measurements, geometry, &r_inv)?;
            let x_next = &x + &linearization.step;
            if !all_finite(x_next.as_slice()) {
                return Err(GeolocError::NonFinite("least-squares step"));
            }
            step_norm = linearization.step.norm();
            trace!(iteration, step_norm, "gauss-newton step");

            if step_norm < self.settings.tolerance {
                debug!(iterations = iteration, step_norm, "least squares converged");
                let z_final = self.model.predict_measurement(&x_next, geometry);
                check_len("predicted measurement", m, z_final.len())?;
                return Ok(IlsSolution {
                    residuals: measurements - z_final,
                    estimate: x_next,
                    covariance: linearization.covariance,
                    iterations: iteration,
                    step_norm,
                });
            }
            x = x_next;
        }

        warn!(
            max_iterations = self.settings.max_iterations,
            step_norm, "least squares did not converge"
        );
        Err(GeolocError::NonConvergence {
            iterations: self.settings.max_iterations,
            step_norm,
            last_estimate: x,
        })
    }

    /// Linearizes at `x` and computes the weighted Gauss-Newton step from there.
    fn linearize(
        &self,
        x: &State,
        measurements: &MeasurementVector,
        geometry: &G,
        r_inv: &DMatrix<f64>,
    ) -> Result<Linearization> {
        let (m, n) = (measurements.len(), x.len());

        let h_jac = self.model.calculate_jacobian(x, geometry);
        check_jacobian(&h_jac, m, n)?;
        if !all_finite(h_jac.as_slice()) {
            return Err(GeolocError::NonFinite("measurement jacobian"));
        }

        let z_pred = self.model.predict_measurement(x, geometry);
        check_len("predicted measurement", m, z_pred.len())?;
        if !all_finite(z_pred.as_slice()) {
            return Err(GeolocError::NonFinite("measurement model"));
        }

        let residuals = measurements - z_pred;
        let ht_r_inv = h_jac.transpose() * r_inv;
        let covariance = invert(&(&ht_r_inv * &h_jac), "normal matrix", self.settings.inversion)?;
        let step = &covariance * &ht_r_inv * &residuals;

        Ok(Linearization { step, covariance })
    }
}

struct Linearization {
    step: State,
    covariance: Covariance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::doa::DirectionOfArrivalModel;
    use crate::models::{FnMeasurement, SensorGeometry};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use nalgebra::{DVector, Vector3};

    fn settings(sigma: f64, max_iterations: usize, inversion: InversionMode) -> IlsSettings {
        IlsSettings {
            noise: MeasurementNoise::Iid(sigma),
            tolerance: 1e-9,
            max_iterations,
            inversion,
        }
    }

    fn linear_model(a: DMatrix<f64>) -> Box<dyn Measurement<()>> {
        let a_jac = a.clone();
        Box::new(FnMeasurement::new(
            move |x: &State, _: &()| &a * x,
            move |_: &State, _: &()| a_jac.clone(),
        ))
    }

    fn line_fit() -> (DMatrix<f64>, DVector<f64>) {
        // y = c0 + c1 * t at t = 0..4, slightly off a straight line.
        let a = DMatrix::from_row_slice(
            5,
            2,
            &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0, 1.0, 4.0],
        );
        let z = DVector::from_vec(vec![1.1, 2.9, 5.2, 6.8, 9.1]);
        (a, z)
    }

    #[test]
    fn test_linear_model_matches_closed_form() {
        let (a, z) = line_fit();
        let closed_form = (a.transpose() * &a).try_inverse().unwrap() * a.transpose() * &z;

        let solver = IteratedLeastSquares::new(
            DVector::from_vec(vec![100.0, -50.0]),
            settings(0.5, 10, InversionMode::Exact),
            linear_model(a.clone()),
        )
        .unwrap();
        let solution = solver.solve(&z, &()).unwrap();

        assert_abs_diff_eq!(solution.estimate, closed_form, epsilon = 1e-9);
        // The first step lands on the answer, the second one is null.
        assert_eq!(solution.iterations, 2);
        assert!(solution.step_norm < 1e-9);

        let expected_cov = (a.transpose() * &a).try_inverse().unwrap() * 0.25;
        assert_abs_diff_eq!(solution.covariance, expected_cov, epsilon = 1e-12);
        assert_abs_diff_eq!(solution.residuals, &z - &a * &closed_form, epsilon = 1e-9);
    }

    #[test]
    fn test_starting_at_solution_converges_immediately() {
        let (a, z) = line_fit();
        let closed_form = (a.transpose() * &a).try_inverse().unwrap() * a.transpose() * &z;

        let solver = IteratedLeastSquares::new(
            closed_form.clone(),
            settings(0.5, 10, InversionMode::Exact),
            linear_model(a),
        )
        .unwrap();
        let solution = solver.solve(&z, &()).unwrap();

        assert_eq!(solution.iterations, 1);
        assert_abs_diff_eq!(solution.estimate, closed_form, epsilon = 1e-9);
    }

    #[test]
    fn test_single_iteration_budget_counts_the_applied_step() {
        let z = DVector::from_vec(vec![1_000.0, -1_000.0]);
        let solver = IteratedLeastSquares::new(
            DVector::zeros(2),
            IlsSettings {
                tolerance: 1e-6,
                ..settings(1.0, 1, InversionMode::Exact)
            },
            linear_model(DMatrix::identity(2, 2)),
        )
        .unwrap();

        // The one allowed step is 1414 m long, so it cannot count as converged
        // even though it lands on the closed form.
        match solver.solve(&z, &()) {
            Err(GeolocError::NonConvergence {
                iterations,
                step_norm,
                last_estimate,
            }) => {
                assert_eq!(iterations, 1);
                assert_abs_diff_eq!(step_norm, 2_000_000.0f64.sqrt(), epsilon = 1e-6);
                assert_abs_diff_eq!(last_estimate, z, epsilon = 1e-9);
            }
            other => panic!("expected NonConvergence, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_noise_is_rejected_in_both_modes() {
        let z = DVector::from_vec(vec![5.0, 7.0]);
        for mode in [InversionMode::Exact, InversionMode::PseudoInverse] {
            let solver = IteratedLeastSquares::new(
                DVector::zeros(2),
                settings(0.0, 10, mode),
                linear_model(DMatrix::identity(2, 2)),
            )
            .unwrap();
            assert!(matches!(
                solver.solve(&z, &()),
                Err(GeolocError::SingularMatrix {
                    context: "measurement noise covariance",
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_widely_spread_sigmas_are_accepted() {
        // Two precise direct readings and one very loose reading of their sum.
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let z = DVector::from_vec(vec![1.0, 2.0, 10.0]);
        let solver = IteratedLeastSquares::new(
            DVector::zeros(2),
            IlsSettings {
                noise: MeasurementNoise::PerComponent(vec![1e-4, 1e-4, 1e4]),
                ..settings(1.0, 10, InversionMode::Exact)
            },
            linear_model(a),
        )
        .unwrap();
        let solution = solver.solve(&z, &()).unwrap();

        assert_abs_diff_eq!(solution.estimate, DVector::from_vec(vec![1.0, 2.0]), epsilon = 1e-9);
        assert_relative_eq!(solution.covariance[(0, 0)], 1e-8, max_relative = 1e-6);
        assert_abs_diff_eq!(solution.residuals[2], 7.0, epsilon = 1e-6);
    }

    #[test]
    fn test_nonlinear_bearing_fix() {
        let geometry = SensorGeometry::stationary(vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(10_000.0, 0.0, 0.0),
            Vector3::new(0.0, 10_000.0, 0.0),
            Vector3::new(10_000.0, 10_000.0, 0.0),
        ]);
        let truth = DVector::from_vec(vec![4_500.0, 5_200.0, 0.01]);
        let z = DirectionOfArrivalModel.predict_measurement(&truth, &geometry);

        let solver = IteratedLeastSquares::new(
            DVector::from_vec(vec![4_000.0, 6_000.0, 0.0]),
            IlsSettings {
                tolerance: 1e-6,
                ..settings(1e-3, 20, InversionMode::Exact)
            },
            Box::new(DirectionOfArrivalModel),
        )
        .unwrap();
        let solution = solver.solve(&z, &geometry).unwrap();

        assert_abs_diff_eq!(solution.estimate, truth, epsilon = 1e-4);
        assert!(solution.iterations > 1);
    }

    #[test]
    fn test_iteration_budget_exhaustion_is_an_error() {
        let geometry = SensorGeometry::stationary(vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(10_000.0, 0.0, 0.0),
            Vector3::new(0.0, 10_000.0, 0.0),
        ]);
        let truth = DVector::from_vec(vec![4_500.0, 5_200.0, 0.0]);
        let z = DirectionOfArrivalModel.predict_measurement(&truth, &geometry);

        let solver = IteratedLeastSquares::new(
            DVector::from_vec(vec![2_000.0, 8_000.0, 0.0]),
            settings(1e-3, 1, InversionMode::Exact),
            Box::new(DirectionOfArrivalModel),
        )
        .unwrap();

        match solver.solve(&z, &geometry) {
            Err(GeolocError::NonConvergence {
                iterations,
                step_norm,
                last_estimate,
            }) => {
                assert_eq!(iterations, 1);
                assert!(step_norm > 1e-9);
                assert_eq!(last_estimate.len(), 3);
            }
            other => panic!("expected NonConvergence, got {:?}", other),
        }
    }

    #[test]
    fn test_rank_deficient_problem_needs_pseudo_inverse() {
        // Only the sum x0 + x1 is observable.
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let z = DVector::from_vec(vec![2.0, 2.0]);
        let x0 = DVector::from_vec(vec![0.0, 0.0]);

        let exact = IteratedLeastSquares::new(
            x0.clone(),
            settings(1.0, 10, InversionMode::Exact),
            linear_model(a.clone()),
        )
        .unwrap();
        assert!(matches!(
            exact.solve(&z, &()),
            Err(GeolocError::SingularMatrix {
                context: "normal matrix",
                ..
            })
        ));

        let pseudo = IteratedLeastSquares::new(
            x0,
            settings(1.0, 10, InversionMode::PseudoInverse),
            linear_model(a),
        )
        .unwrap();
        let solution = pseudo.solve(&z, &()).unwrap();
        // Minimum-norm solution.
        assert_abs_diff_eq!(solution.estimate, DVector::from_vec(vec![1.0, 1.0]), epsilon = 1e-9);
    }

    #[test]
    fn test_measurement_length_mismatch() {
        let (a, _) = line_fit();
        let solver = IteratedLeastSquares::new(
            DVector::zeros(2),
            settings(0.5, 10, InversionMode::Exact),
            linear_model(a),
        )
        .unwrap();

        let result = solver.solve(&DVector::from_vec(vec![1.0, 2.0, 3.0]), &());
        assert!(matches!(result, Err(GeolocError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_construction_validates_settings() {
        let (a, _) = line_fit();
        let zero_tolerance = IlsSettings {
            tolerance: 0.0,
            ..settings(0.5, 10, InversionMode::Exact)
        };
        assert!(matches!(
            IteratedLeastSquares::new(DVector::zeros(2), zero_tolerance, linear_model(a.clone())),
            Err(GeolocError::Configuration(_))
        ));
        assert!(matches!(
            IteratedLeastSquares::new(
                DVector::zeros(2),
                settings(0.5, 0, InversionMode::Exact),
                linear_model(a.clone())
            ),
            Err(GeolocError::Configuration(_))
        ));
        assert!(matches!(
            IteratedLeastSquares::new(
                DVector::zeros(0),
                settings(0.5, 10, InversionMode::Exact),
                linear_model(a)
            ),
            Err(GeolocError::Configuration(_))
        ));
    }
}
