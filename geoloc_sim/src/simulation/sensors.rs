// geoloc_sim/src/simulation/sensors.rs

use geoloc_core::frames::{
    ecef_to_geodetic, ecef_to_topocentric, geodetic_to_ecef, topocentric_rotation,
    topocentric_to_ecef, Geodetic,
};
use geoloc_core::models::{Measurement, ModelKind, SensorGeometry};
use geoloc_core::types::{Covariance, MeasurementVector, State};
use geoloc_core::units::feet_to_meters;
use nalgebra::{DMatrix, DVector, Vector3};
use tracing::debug;

use crate::error::SimError;
use crate::simulation::core::config::ScenarioConfig;
use crate::simulation::core::prng::SimulationRng;

/// Which frame the position part of the state vector is expressed in.
#[derive(Debug, Clone, PartialEq)]
pub enum StateFrame {
    /// Earth-centred Earth-fixed meters.
    Ecef,
    /// Planar East/North of a reference sensor, for bearing-only runs.
    Local {
        origin_ecef: Vector3<f64>,
        origin: Geodetic,
        /// Emitter height in the local frame, not part of the estimated state.
        up_m: f64,
    },
}

/// The ground truth and sensor layout of a scenario, in the frame the model works in.
#[derive(Debug, Clone)]
pub struct ScenarioSetup {
    pub kind: ModelKind,
    pub geometry: SensorGeometry,
    pub frame: StateFrame,
    pub emitter: Geodetic,
    pub truth: State,
    pub initial_state: State,
}

impl ScenarioSetup {
    /// Places the emitter and sensors and derives the true and initial states.
    pub fn build(config: &ScenarioConfig) -> Result<Self, SimError> {
        let kind = config.measurement.kind;
        let emitter = config.emitter.position();
        let emitter_ecef = emitter.to_ecef();
        let offset = Vector3::from(config.initial_guess.offset_enu_m);

        let sensors_ecef: Vec<(Vector3<f64>, Vector3<f64>)> = config
            .sensors
            .iter()
            .map(|sensor| {
                let position = geodetic_to_ecef(
                    sensor.latitude_deg,
                    sensor.longitude_deg,
                    feet_to_meters(sensor.altitude_ft),
                );
                // Velocity only needs rotating; there is no translation for a direction.
                let velocity = topocentric_rotation(sensor.latitude_deg, sensor.longitude_deg)
                    .inverse()
                    * Vector3::from(sensor.velocity_enu);
                (position, velocity)
            })
            .collect();

        let setup = if kind == ModelKind::DirectionOfArrival {
            let Some(reference) = config.sensors.first() else {
                return Err(SimError::InvalidScenario("scenario has no sensors".into()));
            };
            let origin = Geodetic::new(
                reference.latitude_deg,
                reference.longitude_deg,
                feet_to_meters(reference.altitude_ft),
            );
            let origin_ecef = origin.to_ecef();
            let to_local = |p: &Vector3<f64>| {
                ecef_to_topocentric(p, &origin_ecef, origin.latitude_deg, origin.longitude_deg)
            };
            let rotation = topocentric_rotation(origin.latitude_deg, origin.longitude_deg);

            let emitter_local = to_local(&emitter_ecef);
            let offset_local = rotation
                * topocentric_rotation(emitter.latitude_deg, emitter.longitude_deg).inverse()
                * offset;
            let bias = config.measurement.bias_rad;

            Self {
                kind,
                geometry: SensorGeometry::new(
                    sensors_ecef.iter().map(|(p, _)| to_local(p)).collect(),
                    sensors_ecef.iter().map(|(_, v)| rotation * v).collect(),
                ),
                frame: StateFrame::Local {
                    origin_ecef,
                    origin,
                    up_m: emitter_local.z,
                },
                emitter,
                truth: DVector::from_vec(vec![emitter_local.x, emitter_local.y, bias]),
                initial_state: DVector::from_vec(vec![
                    emitter_local.x + offset_local.x,
                    emitter_local.y + offset_local.y,
                    bias + config.initial_guess.bias_offset_rad,
                ]),
            }
        } else {
            let start = emitter_ecef
                + topocentric_rotation(emitter.latitude_deg, emitter.longitude_deg).inverse()
                    * offset;
            let mut truth = emitter_ecef.as_slice().to_vec();
            let mut initial_state = start.as_slice().to_vec();
            if kind == ModelKind::FrequencyOfArrival {
                let Some(frequency) = config.emitter.frequency_hz else {
                    return Err(SimError::InvalidScenario(
                        "frequency_of_arrival needs emitter.frequency_hz".into(),
                    ));
                };
                truth.push(frequency);
                initial_state.push(frequency + config.initial_guess.frequency_offset_hz);
            }

            Self {
                kind,
                geometry: SensorGeometry::new(
                    sensors_ecef.iter().map(|(p, _)| *p).collect(),
                    sensors_ecef.iter().map(|(_, v)| *v).collect(),
                ),
                frame: StateFrame::Ecef,
                emitter,
                truth: DVector::from_vec(truth),
                initial_state: DVector::from_vec(initial_state),
            }
        };

        setup.geometry.validate(kind.needs_velocities(), 1)?;
        debug!(
            sensors = setup.geometry.len(),
            kind = ?kind,
            "scenario geometry placed"
        );
        Ok(setup)
    }

    /// One noisy measurement vector of the true emitter.
    pub fn simulate(
        &self,
        model: &dyn Measurement<SensorGeometry>,
        stddev: f64,
        rng: &mut SimulationRng,
    ) -> Result<MeasurementVector, SimError> {
        let ideal = model.predict_measurement(&self.truth, &self.geometry);
        let noise = rng.gaussian(stddev, ideal.len())?;
        Ok(ideal + noise)
    }

    /// Distance between an estimate and the truth, meters. Horizontal only
    /// for planar states.
    pub fn position_error(&self, estimate: &State) -> f64 {
        let dims = self.position_dims();
        (estimate.rows(0, dims) - self.truth.rows(0, dims)).norm()
    }

    /// Geodetic position of an estimate.
    pub fn estimated_position(&self, estimate: &State) -> Result<Geodetic, SimError> {
        let ecef = match &self.frame {
            StateFrame::Ecef => Vector3::new(estimate[0], estimate[1], estimate[2]),
            StateFrame::Local {
                origin_ecef,
                origin,
                up_m,
            } => topocentric_to_ecef(
                &Vector3::new(estimate[0], estimate[1], *up_m),
                origin_ecef,
                origin.latitude_deg,
                origin.longitude_deg,
            ),
        };
        Ok(ecef_to_geodetic(&ecef)?)
    }

    /// East/North block of a state covariance.
    ///
    /// ECEF covariances are rotated into the emitter's topocentric frame first;
    /// planar states already live in a local East/North plane.
    pub fn horizontal_covariance(&self, covariance: &Covariance) -> DMatrix<f64> {
        match self.frame {
            StateFrame::Ecef => {
                let rotation =
                    topocentric_rotation(self.emitter.latitude_deg, self.emitter.longitude_deg);
                let r = DMatrix::from_column_slice(3, 3, rotation.matrix().as_slice());
                let position = covariance.view((0, 0), (3, 3));
                let enu = &r * position * r.transpose();
                enu.view((0, 0), (2, 2)).into_owned()
            }
            StateFrame::Local { .. } => covariance.view((0, 0), (2, 2)).into_owned(),
        }
    }

    fn position_dims(&self) -> usize {
        match self.frame {
            StateFrame::Ecef => 3,
            StateFrame::Local { .. } => 2,
        }
    }
}
