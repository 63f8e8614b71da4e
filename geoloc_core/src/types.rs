// geoloc_core/src/types.rs

use nalgebra::{DMatrix, DVector};

// --- Core Type Aliases ---
/// The unknown parameters being estimated (position, bias, frequency...).
pub type State = DVector<f64>;
/// An `n x n` covariance matrix describing the uncertainty of a `State`.
pub type Covariance = DMatrix<f64>;
/// One vector of observed sensor outputs.
pub type MeasurementVector = DVector<f64>;
/// An `m x n` matrix of partial derivatives of a measurement model.
pub type Jacobian = DMatrix<f64>;

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Returns true if every element of the slice is finite.
pub(crate) fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}
