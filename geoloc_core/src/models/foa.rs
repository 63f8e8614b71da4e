// geoloc_core/src/models/foa.rs

use nalgebra::{DMatrix, DVector, Vector3};

use crate::models::range_rate::{range_rate, range_rate_gradient};
use crate::models::{position_of, set_row3, Measurement, SensorGeometry};
use crate::types::{Jacobian, MeasurementVector, State, SPEED_OF_LIGHT};

/// Doppler-shifted frequency of a stationary emitter.
///
/// State: `[x, y, z, f0]`, emitter position (ECEF, m) and its transmitted
/// frequency (Hz). Each sensor observes `f_i = f0 (1 - rr_i / c)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyOfArrivalModel;

fn carrier_of(x: &State) -> f64 {
    x.get(3).copied().unwrap_or(f64::NAN)
}

impl Measurement<SensorGeometry> for FrequencyOfArrivalModel {
    fn predict_measurement(&self, x: &State, geometry: &SensorGeometry) -> MeasurementVector {
        let emitter = position_of(x);
        let f0 = carrier_of(x);
        DVector::from_iterator(
            geometry.len(),
            geometry
                .positions
                .iter()
                .zip(geometry.velocities.iter().chain(std::iter::repeat(&Vector3::zeros())))
                .map(|(s, v)| f0 * (1.0 - range_rate(&emitter, s, v) / SPEED_OF_LIGHT)),
        )
    }

    fn calculate_jacobian(&self, x: &State, geometry: &SensorGeometry) -> Jacobian {
        let emitter = position_of(x);
        let f0 = carrier_of(x);
        let mut h = DMatrix::zeros(geometry.len(), 4);
        for (i, s) in geometry.positions.iter().enumerate() {
            let v = geometry.velocities.get(i).copied().unwrap_or_else(Vector3::zeros);
            let gradient = range_rate_gradient(&emitter, s, &v) * (-f0 / SPEED_OF_LIGHT);
            set_row3(&mut h, i, &gradient);
            h[(i, 3)] = 1.0 - range_rate(&emitter, s, &v) / SPEED_OF_LIGHT;
        }
        h
    }
}
