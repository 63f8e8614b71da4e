// geoloc_core/src/models/tdoa.rs

use nalgebra::{DMatrix, DVector, Vector3};

use crate::models::{position_of, set_row3, Measurement, SensorGeometry};
use crate::types::{Jacobian, MeasurementVector, State};

/// Time-difference of arrival expressed as range differences (m).
///
/// State: `[x, y, z]` emitter position. The first sensor is the reference;
/// sensor `i >= 1` contributes `|e - s_i| - |e - s_0|`, so `N` sensors give
/// `N - 1` measurements. Divide by the speed of light for seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeDifferenceModel;

fn unit_from(sensor: &Vector3<f64>, emitter: &Vector3<f64>) -> Vector3<f64> {
    let d = emitter - sensor;
    d / d.norm()
}

impl Measurement<SensorGeometry> for TimeDifferenceModel {
    fn predict_measurement(&self, x: &State, geometry: &SensorGeometry) -> MeasurementVector {
        let emitter = position_of(x);
        let Some((reference, others)) = geometry.positions.split_first() else {
            return DVector::zeros(0);
        };
        let reference_range = (emitter - reference).norm();
        DVector::from_iterator(
            others.len(),
            others
                .iter()
                .map(|s| (emitter - s).norm() - reference_range),
        )
    }

    fn calculate_jacobian(&self, x: &State, geometry: &SensorGeometry) -> Jacobian {
        let emitter = position_of(x);
        let Some((reference, others)) = geometry.positions.split_first() else {
            return DMatrix::zeros(0, 3);
        };
        let reference_unit = unit_from(reference, &emitter);
        let mut h = DMatrix::zeros(others.len(), 3);
        for (i, s) in others.iter().enumerate() {
            set_row3(&mut h, i, &(unit_from(s, &emitter) - reference_unit));
        }
        h
    }
}
