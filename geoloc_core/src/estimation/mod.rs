// geoloc_core/src/estimation/mod.rs

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GeolocError, Result};
use crate::types::all_finite;

/// Reciprocal condition number at or below which a matrix is treated as singular.
pub const SINGULAR_RCOND: f64 = 1e-14;

/// Relative cutoff for singular values dropped by the pseudo-inverse.
pub const PSEUDO_INVERSE_RCOND: f64 = 1e-15;

/// How the estimators invert the matrices they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InversionMode {
    /// Plain inverse; singular or badly conditioned matrices are an error.
    #[default]
    Exact,
    /// Moore-Penrose pseudo-inverse, tolerating rank deficiency.
    PseudoInverse,
}

/// Per-component measurement standard deviations.
///
/// Deserializes from either a single number (IID noise on every component) or
/// a list with one sigma per measurement component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementNoise {
    Iid(f64),
    PerComponent(Vec<f64>),
}

impl MeasurementNoise {
    fn sigmas(&self) -> &[f64] {
        match self {
            MeasurementNoise::Iid(sigma) => std::slice::from_ref(sigma),
            MeasurementNoise::PerComponent(sigmas) => sigmas,
        }
    }

    /// Rejects empty, negative or non-finite sigmas.
    pub fn validate(&self) -> Result<()> {
        let sigmas = self.sigmas();
        if sigmas.is_empty() {
            return Err(GeolocError::Configuration(
                "measurement noise needs at least one sigma".into(),
            ));
        }
        if sigmas.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(GeolocError::Configuration(format!(
                "measurement sigmas must be finite and non-negative, got {sigmas:?}"
            )));
        }
        Ok(())
    }

    /// Materializes `R = diag(sigma^2)` for a measurement of length `m`.
    pub fn covariance(&self, m: usize) -> Result<DMatrix<f64>> {
        match self {
            MeasurementNoise::Iid(sigma) => Ok(DMatrix::identity(m, m) * sigma.powi(2)),
            MeasurementNoise::PerComponent(sigmas) => {
                if sigmas.len() != m {
                    return Err(GeolocError::dimension(
                        "measurement noise",
                        m,
                        sigmas.len(),
                    ));
                }
                Ok(DMatrix::from_diagonal(&DVector::from_iterator(
                    m,
                    sigmas.iter().map(|s| s * s),
                )))
            }
        }
    }

    /// Builds `R^-1 = diag(1 / sigma^2)` directly from the sigmas.
    ///
    /// A zero sigma has no finite weight and is reported as `SingularMatrix`.
    pub fn information(&self, m: usize) -> Result<DMatrix<f64>> {
        let sigmas = match self {
            MeasurementNoise::Iid(sigma) => vec![*sigma; m],
            MeasurementNoise::PerComponent(sigmas) => {
                check_len("measurement noise", m, sigmas.len())?;
                sigmas.clone()
            }
        };
        if sigmas.iter().any(|s| *s == 0.0) {
            return Err(GeolocError::SingularMatrix {
                context: "measurement noise covariance",
                rcond: 0.0,
            });
        }
        Ok(DMatrix::from_diagonal(&DVector::from_iterator(
            m,
            sigmas.iter().map(|s| 1.0 / (s * s)),
        )))
    }
}

impl From<f64> for MeasurementNoise {
    fn from(sigma: f64) -> Self {
        MeasurementNoise::Iid(sigma)
    }
}

/// Inverts a square matrix according to `mode`.
///
/// In `Exact` mode a reciprocal condition number at or below
/// [`SINGULAR_RCOND`] is reported as `SingularMatrix` rather than letting
/// Inf/NaN leak into the estimate. `PseudoInverse` mode still rejects a
/// matrix with no singular value left above the cutoff, whose pseudo-inverse
/// would be all zeros.
pub(crate) fn invert(
    matrix: &DMatrix<f64>,
    context: &'static str,
    mode: InversionMode,
) -> Result<DMatrix<f64>> {
    let n = matrix.nrows();
    if n == 0 || !matrix.is_square() {
        return Err(GeolocError::dimension(
            context,
            "non-empty square matrix",
            format!("{}x{}", matrix.nrows(), matrix.ncols()),
        ));
    }
    if !all_finite(matrix.as_slice()) {
        return Err(GeolocError::NonFinite(context));
    }

    let svd = matrix.clone().svd(true, true);
    let largest = svd.singular_values.max();
    if largest <= 0.0 {
        return Err(GeolocError::SingularMatrix { context, rcond: 0.0 });
    }
    let rcond = svd.singular_values.min() / largest;

    match mode {
        InversionMode::Exact => {
            if rcond <= SINGULAR_RCOND {
                return Err(GeolocError::SingularMatrix { context, rcond });
            }
            matrix
                .clone()
                .try_inverse()
                .ok_or(GeolocError::SingularMatrix { context, rcond })
        }
        InversionMode::PseudoInverse => {
            if rcond <= SINGULAR_RCOND {
                debug!(context, rcond, "rank-deficient matrix, using pseudo-inverse");
            }
            svd.pseudo_inverse(PSEUDO_INVERSE_RCOND * largest)
                .map_err(|_| GeolocError::SingularMatrix { context, rcond })
        }
    }
}

/// True if the symmetric part of `matrix` has no eigenvalue below `-tolerance`
/// (scaled by the largest eigenvalue magnitude).
pub fn is_positive_semidefinite(matrix: &DMatrix<f64>, tolerance: f64) -> bool {
    if !matrix.is_square() || !all_finite(matrix.as_slice()) {
        return false;
    }
    if matrix.nrows() == 0 {
        return true;
    }
    let symmetric = (matrix + matrix.transpose()) * 0.5;
    let eigenvalues = SymmetricEigen::new(symmetric).eigenvalues;
    let scale = eigenvalues.amax().max(1.0);
    eigenvalues.min() >= -tolerance * scale
}

/// Checks a vector produced at call time has the expected length.
pub(crate) fn check_len(context: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(GeolocError::dimension(context, expected, found))
    }
}

/// Checks a Jacobian is `m x n`.
pub(crate) fn check_jacobian(h: &DMatrix<f64>, m: usize, n: usize) -> Result<()> {
    if h.shape() == (m, n) {
        Ok(())
    } else {
        Err(GeolocError::dimension(
            "measurement jacobian",
            format!("{m}x{n}"),
            format!("{}x{}", h.nrows(), h.ncols()),
        ))
    }
}

pub mod filters;
pub mod solvers;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_noise_covariance_iid_and_per_component() {
        let iid = MeasurementNoise::Iid(2.0).covariance(3).unwrap();
        assert_eq!(iid, DMatrix::identity(3, 3) * 4.0);

        let per = MeasurementNoise::PerComponent(vec![1.0, 3.0])
            .covariance(2)
            .unwrap();
        assert_eq!(per, DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 9.0])));

        assert!(MeasurementNoise::PerComponent(vec![1.0, 3.0])
            .covariance(3)
            .is_err());
    }

    #[test]
    fn test_noise_information_is_exact_for_widely_spread_sigmas() {
        let info = MeasurementNoise::PerComponent(vec![1e-4, 1e4])
            .information(2)
            .unwrap();
        assert_relative_eq!(info[(0, 0)], 1e8, max_relative = 1e-12);
        assert_relative_eq!(info[(1, 1)], 1e-8, max_relative = 1e-12);
        assert_eq!(info[(0, 1)], 0.0);

        let iid = MeasurementNoise::Iid(0.5).information(3).unwrap();
        assert_abs_diff_eq!(iid, DMatrix::identity(3, 3) * 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_noise_information_rejects_zero_sigma() {
        for noise in [
            MeasurementNoise::Iid(0.0),
            MeasurementNoise::PerComponent(vec![1.0, 0.0]),
        ] {
            assert!(matches!(
                noise.information(2),
                Err(GeolocError::SingularMatrix {
                    context: "measurement noise covariance",
                    ..
                })
            ));
        }
        assert!(matches!(
            MeasurementNoise::PerComponent(vec![1.0]).information(2),
            Err(GeolocError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_noise_validation() {
        assert!(MeasurementNoise::Iid(0.1).validate().is_ok());
        assert!(MeasurementNoise::Iid(-0.1).validate().is_err());
        assert!(MeasurementNoise::Iid(f64::NAN).validate().is_err());
        assert!(MeasurementNoise::PerComponent(vec![]).validate().is_err());
    }

    #[test]
    fn test_exact_inverse_rejects_singular_matrix() {
        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let result = invert(&singular, "test matrix", InversionMode::Exact);
        assert!(matches!(
            result,
            Err(GeolocError::SingularMatrix {
                context: "test matrix",
                ..
            })
        ));
    }

    #[test]
    fn test_pseudo_inverse_handles_singular_matrix() {
        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let pinv = invert(&singular, "test matrix", InversionMode::PseudoInverse).unwrap();
        // Moore-Penrose property: A A+ A = A.
        assert_abs_diff_eq!(&singular * &pinv * &singular, singular, epsilon = 1e-12);
    }

    #[test]
    fn test_pseudo_inverse_rejects_zero_matrix() {
        for mode in [InversionMode::Exact, InversionMode::PseudoInverse] {
            assert!(matches!(
                invert(&DMatrix::zeros(2, 2), "test matrix", mode),
                Err(GeolocError::SingularMatrix {
                    context: "test matrix",
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_exact_inverse_of_regular_matrix() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 2.0, 3.0]);
        let inv = invert(&a, "test matrix", InversionMode::Exact).unwrap();
        assert_abs_diff_eq!(&a * inv, DMatrix::identity(2, 2), epsilon = 1e-12);
    }

    #[test]
    fn test_positive_semidefinite_check() {
        assert!(is_positive_semidefinite(&DMatrix::identity(3, 3), 1e-12));
        let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        assert!(!is_positive_semidefinite(&indefinite, 1e-12));
    }
}
