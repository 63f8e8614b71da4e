// geoloc_core/src/models/mod.rs

use dyn_clone::DynClone;
use nalgebra::{DMatrix, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::error::{GeolocError, Result};
use crate::types::{Jacobian, MeasurementVector, State};

// --- MEASUREMENT MODEL TRAIT ---
// Represents the mathematical model of a sensor. `z = h(x, g) + v`, where `g` is
// exogenous geometry (sensor positions, velocities...) supplied on every call.
pub trait Measurement<G>: DynClone + Debug + Send + Sync {
    /// Predicts the ideal measurement `z_pred = h(x, g)`.
    fn predict_measurement(&self, x: &State, geometry: &G) -> MeasurementVector;

    /// Calculates the measurement Jacobian `H = dh/dx`, shaped `m x n`.
    fn calculate_jacobian(&self, x: &State, geometry: &G) -> Jacobian;
}

// This macro automatically generates the implementation of `Clone` for `Box<dyn Measurement<G>>`.
dyn_clone::clone_trait_object!(<G> Measurement<G>);

/// Wraps a pair of caller-supplied functions as a [`Measurement`].
///
/// Consistency between the two closures is the caller's responsibility; the
/// estimators only check the shapes they return.
#[derive(Clone)]
pub struct FnMeasurement<F, J> {
    model: F,
    jacobian: J,
}

impl<F, J> FnMeasurement<F, J> {
    pub fn new(model: F, jacobian: J) -> Self {
        Self { model, jacobian }
    }
}

impl<F, J> Debug for FnMeasurement<F, J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMeasurement").finish_non_exhaustive()
    }
}

impl<G, F, J> Measurement<G> for FnMeasurement<F, J>
where
    F: Fn(&State, &G) -> MeasurementVector + Clone + Send + Sync,
    J: Fn(&State, &G) -> Jacobian + Clone + Send + Sync,
{
    fn predict_measurement(&self, x: &State, geometry: &G) -> MeasurementVector {
        (self.model)(x, geometry)
    }

    fn calculate_jacobian(&self, x: &State, geometry: &G) -> Jacobian {
        (self.jacobian)(x, geometry)
    }
}

/// Positions and velocities of the observing sensors, ECEF meters and m/s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorGeometry {
    pub positions: Vec<Vector3<f64>>,
    /// May be empty for models that do not depend on sensor motion.
    #[serde(default)]
    pub velocities: Vec<Vector3<f64>>,
}

impl SensorGeometry {
    pub fn new(positions: Vec<Vector3<f64>>, velocities: Vec<Vector3<f64>>) -> Self {
        Self {
            positions,
            velocities,
        }
    }

    pub fn stationary(positions: Vec<Vector3<f64>>) -> Self {
        Self {
            positions,
            velocities: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Checks the geometry carries what a model needs before it is used.
    pub fn validate(&self, needs_velocities: bool, min_sensors: usize) -> Result<()> {
        if self.positions.len() < min_sensors {
            return Err(GeolocError::dimension(
                "sensor geometry",
                format!("at least {min_sensors} sensors"),
                self.positions.len(),
            ));
        }
        if needs_velocities && self.velocities.len() != self.positions.len() {
            return Err(GeolocError::dimension(
                "sensor velocities",
                self.positions.len(),
                self.velocities.len(),
            ));
        }
        Ok(())
    }
}

/// The named measurement models available over a [`SensorGeometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    RangeRate,
    FrequencyOfArrival,
    DirectionOfArrival,
    TimeDifference,
}

impl ModelKind {
    /// Boxes the concrete model for this kind.
    pub fn build(self) -> Box<dyn Measurement<SensorGeometry>> {
        match self {
            ModelKind::RangeRate => Box::new(range_rate::RangeRateModel),
            ModelKind::FrequencyOfArrival => Box::new(foa::FrequencyOfArrivalModel),
            ModelKind::DirectionOfArrival => Box::new(doa::DirectionOfArrivalModel),
            ModelKind::TimeDifference => Box::new(tdoa::TimeDifferenceModel),
        }
    }

    /// Dimension of the state vector this model estimates.
    pub fn state_dim(self) -> usize {
        match self {
            ModelKind::RangeRate | ModelKind::TimeDifference => 3,
            ModelKind::FrequencyOfArrival => 4,
            // Planar position plus an angle bias.
            ModelKind::DirectionOfArrival => 3,
        }
    }

    /// Number of measurements produced by `sensors` sensors.
    pub fn measurement_dim(self, sensors: usize) -> usize {
        match self {
            ModelKind::TimeDifference => sensors.saturating_sub(1),
            _ => sensors,
        }
    }

    pub fn needs_velocities(self) -> bool {
        matches!(self, ModelKind::RangeRate | ModelKind::FrequencyOfArrival)
    }
}

/// Emitter position from the first three state entries. Missing entries read
/// as NaN so a too-short state surfaces as a non-finite prediction.
pub(crate) fn position_of(x: &State) -> Vector3<f64> {
    let at = |i: usize| x.get(i).copied().unwrap_or(f64::NAN);
    Vector3::new(at(0), at(1), at(2))
}

/// Writes a 3-vector into columns `0..3` of Jacobian row `row`.
pub(crate) fn set_row3(h: &mut DMatrix<f64>, row: usize, value: &Vector3<f64>) {
    h[(row, 0)] = value.x;
    h[(row, 1)] = value.y;
    h[(row, 2)] = value.z;
}

/// Finite-difference Jacobian, used to cross-check analytic derivatives in tests.
#[cfg(test)]
pub(crate) fn numerical_jacobian<G>(
    model: &dyn Measurement<G>,
    x: &State,
    geometry: &G,
    delta: f64,
) -> DMatrix<f64> {
    let base = model.predict_measurement(x, geometry);
    let mut h = DMatrix::zeros(base.len(), x.len());
    for j in 0..x.len() {
        let mut plus = x.clone();
        let mut minus = x.clone();
        plus[j] += delta;
        minus[j] -= delta;
        let diff: nalgebra::DVector<f64> = (model.predict_measurement(&plus, geometry)
            - model.predict_measurement(&minus, geometry))
            / (2.0 * delta);
        h.set_column(j, &diff);
    }
    h
}

pub mod doa;
pub mod foa;
pub mod range_rate;
pub mod tdoa;

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn test_fn_measurement_forwards_to_closures() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let a_model = a.clone();
        let a_jac = a.clone();
        let model = FnMeasurement::new(
            move |x: &State, offset: &f64| &a_model * x + DVector::from_element(2, *offset),
            move |_x: &State, _offset: &f64| a_jac.clone(),
        );
        let boxed: Box<dyn Measurement<f64>> = Box::new(model);
        let copy = boxed.clone();

        let x = DVector::from_vec(vec![1.0, 1.0]);
        assert_eq!(copy.predict_measurement(&x, &0.5), DVector::from_vec(vec![3.5, 7.5]));
        assert_eq!(copy.calculate_jacobian(&x, &0.5), a);
    }

    #[test]
    fn test_geometry_validation() {
        let geometry = SensorGeometry::stationary(vec![Vector3::zeros(); 3]);
        assert!(geometry.validate(false, 3).is_ok());
        assert!(geometry.validate(false, 4).is_err());
        assert!(geometry.validate(true, 1).is_err());
    }

    #[test]
    fn test_model_kind_dimensions() {
        assert_eq!(ModelKind::FrequencyOfArrival.state_dim(), 4);
        assert_eq!(ModelKind::TimeDifference.measurement_dim(4), 3);
        assert_eq!(ModelKind::RangeRate.measurement_dim(4), 4);
        assert!(ModelKind::RangeRate.needs_velocities());
        assert!(!ModelKind::DirectionOfArrival.needs_velocities());
    }
}
