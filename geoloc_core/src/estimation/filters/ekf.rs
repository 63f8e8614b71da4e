// geoloc_core/src/estimation/filters/ekf.rs

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::confidence::{validate_confidence, ConfidenceInterval};
use crate::error::{GeolocError, Result};
use crate::estimation::{
    check_jacobian, check_len, invert, is_positive_semidefinite, InversionMode, MeasurementNoise,
};
use crate::models::Measurement;
use crate::types::{all_finite, Covariance, MeasurementVector, State};

/// Tolerance used when checking the covariance stays positive semi-definite.
const PSD_TOLERANCE: f64 = 1e-9;

/// Fixed configuration of an [`ExtendedKalmanFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EkfSettings {
    /// Confidence level in (0, 1) used for the reported interval.
    pub confidence: f64,
    /// Standard deviation(s) of the measurement noise.
    pub noise: MeasurementNoise,
    #[serde(default)]
    pub inversion: InversionMode,
}

/// A read-only snapshot of the filter's current estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EkfState {
    /// The numerical state vector `x`.
    pub vector: State,
    /// The covariance matrix `P`.
    pub covariance: Covariance,
}

impl EkfState {
    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// What a single measurement update produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EkfUpdate {
    pub estimate: State,
    pub covariance: Covariance,
    /// `estimate +- sqrt(k * diag(P))` with `k` the chi-square quantile for `n` dof.
    pub interval: ConfidenceInterval,
    /// Measurement minus prediction at the prior estimate.
    pub innovation: DVector<f64>,
}

/// A recursive Extended Kalman Filter performing one measurement update per call.
///
/// There is no time propagation: every call to [`update`](Self::update) linearizes
/// the model at the current estimate, fuses one measurement vector and commits
/// the posterior as the prior of the next call. Concurrent tracks should use
/// independent instances (`clone()` forks one).
pub struct ExtendedKalmanFilter<G> {
    /// The current estimate (x, P).
    state: EkfState,
    settings: EkfSettings,
    model: Box<dyn Measurement<G>>,
    update_count: usize,
}

impl<G> Clone for ExtendedKalmanFilter<G> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            settings: self.settings.clone(),
            model: self.model.clone(),
            update_count: self.update_count,
        }
    }
}

impl<G> std::fmt::Debug for ExtendedKalmanFilter<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedKalmanFilter")
            .field("state", &self.state)
            .field("settings", &self.settings)
            .field("model", &self.model)
            .field("update_count", &self.update_count)
            .finish()
    }
}

/// Validates an (x, P) pair before it becomes the filter state.
fn validate_prior(x: &State, p: &Covariance) -> Result<()> {
    let n = x.len();
    if n == 0 {
        return Err(GeolocError::Configuration("state vector is empty".into()));
    }
    if p.shape() != (n, n) {
        return Err(GeolocError::Configuration(format!(
            "covariance must be {n}x{n} to match the state, got {}x{}",
            p.nrows(),
            p.ncols()
        )));
    }
    if !all_finite(x.as_slice()) || !all_finite(p.as_slice()) {
        return Err(GeolocError::Configuration(
            "initial state and covariance must be finite".into(),
        ));
    }
    if !is_positive_semidefinite(p, PSD_TOLERANCE) {
        return Err(GeolocError::Configuration(
            "initial covariance is not positive semi-definite".into(),
        ));
    }
    Ok(())
}

impl<G> ExtendedKalmanFilter<G> {
    /// Creates a new EKF instance.
    pub fn new(
        initial_state: State,
        initial_covariance: Covariance,
        settings: EkfSettings,
        model: Box<dyn Measurement<G>>,
    ) -> Result<Self> {
        validate_prior(&initial_state, &initial_covariance)?;
        validate_confidence(settings.confidence)?;
        settings.noise.validate()?;

        Ok(Self {
            state: EkfState {
                vector: initial_state,
                covariance: initial_covariance,
            },
            settings,
            model,
            update_count: 0,
        })
    }

    /// Fuses one measurement vector, linearizing the model at the current estimate.
    ///
    /// On error the filter state is left untouched.
    pub fn update(&mut self, measurement: &MeasurementVector, geometry: &G) -> Result<EkfUpdate> {
        let n = self.state.dim();
        let m = measurement.len();
        if m == 0 {
            return Err(GeolocError::dimension("measurement", "at least 1", 0));
        }
        if !all_finite(measurement.as_slice()) {
            return Err(GeolocError::NonFinite("measurement"));
        }

        let x = &self.state.vector;
        let p = &self.state.covariance;

        // --- Standard EKF Update Equations ---

        // 1. Measurement noise covariance R (IID, uncorrelated components).
        let r_mat = self.settings.noise.covariance(m)?;

        // 2. Linearize: H = dh/dx at the current estimate.
        let h_jac = self.model.calculate_jacobian(x, geometry);
        check_jacobian(&h_jac, m, n)?;
        if !all_finite(h_jac.as_slice()) {
            return Err(GeolocError::NonFinite("measurement jacobian"));
        }

        // 3. Predict the measurement from the current estimate: z_hat = h(x).
        let z_pred = self.model.predict_measurement(x, geometry);
        check_len("predicted measurement", m, z_pred.len())?;
        if !all_finite(z_pred.as_slice()) {
            return Err(GeolocError::NonFinite("measurement model"));
        }

        // 4. Innovation covariance (S) and Kalman gain (K).
        let s = &h_jac * p * h_jac.transpose() + r_mat;
        let s_inv = invert(&s, "innovation covariance", self.settings.inversion)?;
        let k_gain = p * h_jac.transpose() * s_inv;

        // 5. Innovation and posterior.
        let innovation = measurement - z_pred;
        let new_x = x + &k_gain * &innovation;
        let i_kh = DMatrix::<f64>::identity(n, n) - &k_gain * &h_jac;
        let new_p = i_kh * p;
        // Tiny numerical errors can make P slightly non-symmetric. This forces it.
        let new_p = (&new_p + new_p.transpose()) * 0.5;

        if !all_finite(new_x.as_slice()) || !all_finite(new_p.as_slice()) {
            return Err(GeolocError::NonFinite("kalman update"));
        }
        if !is_positive_semidefinite(&new_p, PSD_TOLERANCE) {
            warn!(
                update = self.update_count + 1,
                "posterior covariance lost positive semi-definiteness"
            );
        }

        // 6. Confidence interval on the posterior.
        let interval = ConfidenceInterval::around(&new_x, &new_p, self.settings.confidence)?;

        // 7. Commit.
        self.state.vector = new_x.clone();
        self.state.covariance = new_p.clone();
        self.update_count += 1;
        trace!(
            update = self.update_count,
            innovation_norm = innovation.norm(),
            "ekf update committed"
        );

        Ok(EkfUpdate {
            estimate: new_x,
            covariance: new_p,
            interval,
            innovation,
        })
    }

    /// Replaces the current estimate, e.g. to re-initialize a track.
    pub fn reset(&mut self, state: State, covariance: Covariance) -> Result<()> {
        validate_prior(&state, &covariance)?;
        if state.len() != self.state.dim() {
            return Err(GeolocError::dimension(
                "reset state",
                self.state.dim(),
                state.len(),
            ));
        }
        self.state = EkfState {
            vector: state,
            covariance,
        };
        self.update_count = 0;
        Ok(())
    }

    /// Returns a reference to the current best estimate of the state.
    pub fn state(&self) -> &EkfState {
        &self.state
    }

    pub fn estimate(&self) -> &State {
        &self.state.vector
    }

    pub fn covariance(&self) -> &Covariance {
        &self.state.covariance
    }

    pub fn settings(&self) -> &EkfSettings {
        &self.settings
    }

    /// Number of updates committed since construction or the last reset.
    pub fn update_count(&self) -> usize {
        self.update_count
    }
}
