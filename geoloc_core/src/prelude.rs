// geoloc_core/src/prelude.rs

// --- Core Abstractions ---
pub use crate::error::{GeolocError, Result};
pub use crate::models::{FnMeasurement, Measurement, ModelKind, SensorGeometry};
pub use crate::types::{Covariance, Jacobian, MeasurementVector, State, SPEED_OF_LIGHT};

// --- Coordinate Frames ---
pub use crate::frames::{
    ecef_to_geodetic, ecef_to_topocentric, geodetic_to_ecef, topocentric_rotation,
    topocentric_to_ecef, Geodetic,
};

// --- Estimation Algorithms ---
pub use crate::estimation::filters::ekf::{EkfSettings, EkfState, EkfUpdate, ExtendedKalmanFilter};
pub use crate::estimation::solvers::ils::{IlsSettings, IlsSolution, IteratedLeastSquares};
pub use crate::estimation::{InversionMode, MeasurementNoise};

// --- Confidence Regions ---
pub use crate::confidence::{
    chi_square_quantile, confidence_bounds, error_ellipse, ConfidenceInterval, ErrorEllipse,
};

// --- Concrete Model Implementations ---
pub use crate::models::doa::DirectionOfArrivalModel;
pub use crate::models::foa::FrequencyOfArrivalModel;
pub use crate::models::range_rate::RangeRateModel;
pub use crate::models::tdoa::TimeDifferenceModel;
