// geoloc_core/src/confidence.rs

//! Turns covariance matrices into human-interpretable confidence bounds:
//! per-parameter intervals for an n-dimensional estimate and error ellipses
//! for 2-D position estimates. Everything here is a pure function; plotting
//! the returned points is left to the caller.

use nalgebra::{DMatrix, DVector, Matrix2, Point2, SymmetricEigen, Vector2};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, Continuous, ContinuousCDF};

use crate::error::{GeolocError, Result};
use crate::types::{Covariance, State};

/// Number of boundary points produced for an error ellipse.
pub const ELLIPSE_POINTS: usize = 100;

/// Newton polishing steps applied on top of the library's bracketing inverse.
const QUANTILE_NEWTON_STEPS: usize = 8;

/// Chi-square quantile for `confidence` in (0, 1) and the given degrees of freedom.
pub fn chi_square_quantile(confidence: f64, degrees_of_freedom: usize) -> Result<f64> {
    validate_confidence(confidence)?;
    if degrees_of_freedom == 0 {
        return Err(GeolocError::Configuration(
            "chi-square quantile needs at least one degree of freedom".into(),
        ));
    }
    let distribution = ChiSquared::new(degrees_of_freedom as f64)
        .map_err(|e| GeolocError::Configuration(format!("chi-square distribution: {e}")))?;

    // The generic inverse CDF is a short bisection; polish it against the exact CDF.
    let mut x = distribution.inverse_cdf(confidence);
    for _ in 0..QUANTILE_NEWTON_STEPS {
        let density = distribution.pdf(x);
        if !(density.is_finite() && density > 0.0) {
            break;
        }
        let step = (distribution.cdf(x) - confidence) / density;
        x = (x - step).max(f64::MIN_POSITIVE);
        if step.abs() < 1e-12 * x.max(1.0) {
            break;
        }
    }
    Ok(x)
}

/// Rejects confidence levels outside the open interval (0, 1).
pub fn validate_confidence(confidence: f64) -> Result<()> {
    if confidence > 0.0 && confidence < 1.0 {
        Ok(())
    } else {
        Err(GeolocError::Configuration(format!(
            "confidence level must lie in (0, 1), got {confidence}"
        )))
    }
}

/// Half-widths `sqrt(k * P_ii)` with `k` the chi-square quantile for `n` degrees of freedom.
pub fn confidence_bounds(covariance: &Covariance, confidence: f64) -> Result<DVector<f64>> {
    let n = covariance.nrows();
    if n == 0 || covariance.ncols() != n {
        return Err(GeolocError::dimension(
            "confidence bounds covariance",
            "non-empty square matrix",
            format!("{}x{}", covariance.nrows(), covariance.ncols()),
        ));
    }
    let k = chi_square_quantile(confidence, n)?;
    // Round-off can leave tiny negative variances; treat them as zero.
    Ok(covariance.diagonal().map(|variance| (k * variance.max(0.0)).sqrt()))
}

/// Lower and upper bounds around an estimate at a stated confidence level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    pub confidence: f64,
}

impl ConfidenceInterval {
    /// Builds the interval `estimate +- sqrt(k * diag(P))`.
    pub fn around(estimate: &State, covariance: &Covariance, confidence: f64) -> Result<Self> {
        if estimate.len() != covariance.nrows() {
            return Err(GeolocError::dimension(
                "confidence interval",
                covariance.nrows(),
                estimate.len(),
            ));
        }
        let bounds = confidence_bounds(covariance, confidence)?;
        Ok(Self {
            lower: estimate - &bounds,
            upper: estimate + &bounds,
            confidence,
        })
    }

    /// Full width of the interval per parameter.
    pub fn widths(&self) -> DVector<f64> {
        &self.upper - &self.lower
    }

    pub fn contains(&self, x: &State) -> bool {
        x.len() == self.lower.len()
            && x.iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(v, (lo, hi))| *lo <= *v && *v <= *hi)
    }
}

/// A 2-D confidence ellipse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEllipse {
    pub center: Point2<f64>,
    /// Major-axis direction scaled to the semi-major length.
    pub semi_major: Vector2<f64>,
    /// Minor-axis direction scaled to the semi-minor length.
    pub semi_minor: Vector2<f64>,
    /// `ELLIPSE_POINTS` points evenly spaced in angle, first and last coincide.
    pub boundary: Vec<Point2<f64>>,
    pub confidence: f64,
}

impl ErrorEllipse {
    pub fn semi_major_length(&self) -> f64 {
        self.semi_major.norm()
    }

    pub fn semi_minor_length(&self) -> f64 {
        self.semi_minor.norm()
    }

    /// Angle of the major axis from the first coordinate axis, radians in (-pi/2, pi/2].
    pub fn orientation(&self) -> f64 {
        let angle = self.semi_major.y.atan2(self.semi_major.x);
        if angle <= -std::f64::consts::FRAC_PI_2 {
            angle + std::f64::consts::PI
        } else if angle > std::f64::consts::FRAC_PI_2 {
            angle - std::f64::consts::PI
        } else {
            angle
        }
    }

    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.semi_major_length() * self.semi_minor_length()
    }
}

/// Computes the confidence ellipse of a 2x2 covariance centred on `center`.
///
/// The axes come from the eigen-decomposition of `P` scaled by
/// `sqrt(lambda * chi2)`, with `chi2` the quantile for two degrees of freedom.
/// The ratio of the axis lengths is therefore `sqrt(lambda_max / lambda_min)`
/// whatever the confidence level.
pub fn error_ellipse(
    covariance: &DMatrix<f64>,
    center: Point2<f64>,
    confidence: f64,
) -> Result<ErrorEllipse> {
    if covariance.shape() != (2, 2) {
        return Err(GeolocError::dimension(
            "error ellipse covariance",
            "2x2",
            format!("{}x{}", covariance.nrows(), covariance.ncols()),
        ));
    }
    if !crate::types::all_finite(covariance.as_slice()) {
        return Err(GeolocError::NonFinite("error ellipse covariance"));
    }

    let p = Matrix2::new(
        covariance[(0, 0)],
        covariance[(0, 1)],
        covariance[(1, 0)],
        covariance[(1, 1)],
    );
    // Average the off-diagonal so round-off asymmetry can't skew the eigenbasis.
    let symmetric = (p + p.transpose()) * 0.5;
    let eigen = SymmetricEigen::new(symmetric);

    let (major, minor) = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] {
        (0, 1)
    } else {
        (1, 0)
    };
    let chi2 = chi_square_quantile(confidence, 2)?;

    let major_scale = (eigen.eigenvalues[major].max(0.0) * chi2).sqrt();
    let minor_scale = (eigen.eigenvalues[minor].max(0.0) * chi2).sqrt();
    let major_axis: Vector2<f64> = eigen.eigenvectors.column(major).into_owned();
    let minor_axis: Vector2<f64> = eigen.eigenvectors.column(minor).into_owned();

    let semi_major = major_axis * major_scale;
    let semi_minor = minor_axis * minor_scale;

    let step = 2.0 * std::f64::consts::PI / (ELLIPSE_POINTS - 1) as f64;
    let boundary = (0..ELLIPSE_POINTS)
        .map(|i| {
            let (s, c) = (i as f64 * step).sin_cos();
            center + semi_major * c + semi_minor * s
        })
        .collect();

    Ok(ErrorEllipse {
        center,
        semi_major,
        semi_minor,
        boundary,
        confidence,
    })
}
