// geoloc_core/src/models/doa.rs

use nalgebra::{DMatrix, DVector};

use crate::models::{Measurement, SensorGeometry};
use crate::types::{Jacobian, MeasurementVector, State};

/// Planar direction-of-arrival with a common angle bias.
///
/// State: `[x, y, b]`, emitter position in a local plane (m) and a bias (rad)
/// shared by all sensors. Only the first two components of each sensor
/// position are used. Predictions are not wrapped, so measurements near the
/// +-pi seam should be unwrapped by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectionOfArrivalModel;

fn planar_state(x: &State) -> (f64, f64, f64) {
    let at = |i: usize| x.get(i).copied().unwrap_or(f64::NAN);
    (at(0), at(1), at(2))
}

impl Measurement<SensorGeometry> for DirectionOfArrivalModel {
    fn predict_measurement(&self, x: &State, geometry: &SensorGeometry) -> MeasurementVector {
        let (ex, ey, bias) = planar_state(x);
        DVector::from_iterator(
            geometry.len(),
            geometry
                .positions
                .iter()
                .map(|s| (ey - s.y).atan2(ex - s.x) + bias),
        )
    }

    fn calculate_jacobian(&self, x: &State, geometry: &SensorGeometry) -> Jacobian {
        let (ex, ey, _) = planar_state(x);
        let mut h = DMatrix::zeros(geometry.len(), 3);
        for (i, s) in geometry.positions.iter().enumerate() {
            let (dx, dy) = (ex - s.x, ey - s.y);
            let range_sq = dx * dx + dy * dy;
            h[(i, 0)] = -dy / range_sq;
            h[(i, 1)] = dx / range_sq;
            h[(i, 2)] = 1.0;
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::numerical_jacobian;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;
    use std::f64::consts::FRAC_PI_4;

    fn geometry() -> SensorGeometry {
        SensorGeometry::stationary(vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1_000.0, 0.0, 0.0),
            Vector3::new(0.0, 1_000.0, 0.0),
        ])
    }

    #[test]
    fn test_bearing_includes_bias() {
        let x = DVector::from_vec(vec![500.0, 500.0, 0.01]);
        let theta = DirectionOfArrivalModel.predict_measurement(&x, &geometry());
        assert_abs_diff_eq!(theta[0], FRAC_PI_4 + 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(theta[1], 3.0 * FRAC_PI_4 + 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let x = DVector::from_vec(vec![420.0, 730.0, -0.02]);
        let analytic = DirectionOfArrivalModel.calculate_jacobian(&x, &geometry());
        let numeric = numerical_jacobian(&DirectionOfArrivalModel, &x, &geometry(), 1e-3);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-9);
    }
}
