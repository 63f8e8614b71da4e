// geoloc_core/src/models/range_rate.rs

use nalgebra::{DMatrix, DVector, Vector3};

use crate::models::{position_of, set_row3, Measurement, SensorGeometry};
use crate::types::{Jacobian, MeasurementVector, State};

/// Range-rate of a stationary emitter seen from moving sensors.
///
/// State: `[x, y, z]` emitter position (ECEF, m). One measurement per sensor:
/// `rr_i = v_i . (s_i - e) / |s_i - e|`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeRateModel;

/// Range-rate of one sensor with respect to an emitter position.
pub fn range_rate(emitter: &Vector3<f64>, position: &Vector3<f64>, velocity: &Vector3<f64>) -> f64 {
    let line_of_sight = position - emitter;
    velocity.dot(&line_of_sight) / line_of_sight.norm()
}

/// Gradient of [`range_rate`] with respect to the emitter position.
///
/// `d rr / d e = -v / rho + (s - e) (v . (s - e)) / rho^3`
pub fn range_rate_gradient(
    emitter: &Vector3<f64>,
    position: &Vector3<f64>,
    velocity: &Vector3<f64>,
) -> Vector3<f64> {
    let line_of_sight = position - emitter;
    let rho = line_of_sight.norm();
    -velocity / rho + line_of_sight * (velocity.dot(&line_of_sight) / rho.powi(3))
}

impl Measurement<SensorGeometry> for RangeRateModel {
    fn predict_measurement(&self, x: &State, geometry: &SensorGeometry) -> MeasurementVector {
        let emitter = position_of(x);
        DVector::from_iterator(
            geometry.len(),
            geometry.positions.iter().enumerate().map(|(i, s)| {
                let v = geometry.velocities.get(i).copied().unwrap_or_else(Vector3::zeros);
                range_rate(&emitter, s, &v)
            }),
        )
    }

    fn calculate_jacobian(&self, x: &State, geometry: &SensorGeometry) -> Jacobian {
        let emitter = position_of(x);
        let mut h = DMatrix::zeros(geometry.len(), 3);
        for (i, s) in geometry.positions.iter().enumerate() {
            let v = geometry.velocities.get(i).copied().unwrap_or_else(Vector3::zeros);
            set_row3(&mut h, i, &range_rate_gradient(&emitter, s, &v));
        }
        h
    }
}
