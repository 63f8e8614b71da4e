// geoloc_core/src/error.rs

use nalgebra::{DVector, Vector3};
use thiserror::Error;

/// Every failure the estimation core can surface to a caller.
///
/// None of these are used for ordinary control flow, and nothing is retried
/// internally. Deciding whether to re-run a solver with relaxed settings is up
/// to the caller.
#[derive(Debug, Clone, Error)]
pub enum GeolocError {
    /// The estimator was constructed with settings that can never work
    /// (mismatched initial dimensions, out-of-range confidence, zero budget...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Shapes of the state, measurement, prediction or Jacobian disagree at call time.
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },

    /// A required inversion was singular or too badly conditioned to trust.
    #[error("cannot invert {context}: matrix is singular (reciprocal condition {rcond:e})")]
    SingularMatrix { context: &'static str, rcond: f64 },

    /// The iterated least squares solver ran out of iterations.
    #[error("no convergence after {iterations} iterations (last step norm {step_norm:e})")]
    NonConvergence {
        iterations: usize,
        step_norm: f64,
        last_estimate: DVector<f64>,
    },

    /// The ECEF to geodetic fixed-point iteration exceeded its cap.
    #[error("geodetic conversion of {point:?} did not converge within {iterations} iterations")]
    TransformConvergence {
        iterations: usize,
        point: Vector3<f64>,
    },

    /// Geodetic latitude is undefined at the centre of the ellipsoid.
    #[error("point {0:?} has no defined geodetic latitude")]
    DegeneratePoint(Vector3<f64>),

    /// A model, Jacobian or update produced NaN or infinite values.
    #[error("non-finite values produced by {0}")]
    NonFinite(&'static str),
}

impl GeolocError {
    /// Shorthand for a `DimensionMismatch` built from anything printable.
    pub fn dimension(
        context: &'static str,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        Self::DimensionMismatch {
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GeolocError>;
