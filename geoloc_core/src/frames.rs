// geoloc_core/src/frames.rs

//! Conversions between geodetic (WGS84), Earth-centred Earth-fixed (ECEF) and
//! observer-centred topocentric (East-North-Up) coordinates.
//!
//! Measurement models express sensor and emitter geometry in ECEF; these
//! helpers are how callers get there from latitude/longitude/altitude and how
//! results are expressed back in an observer's local frame.

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{GeolocError, Result};

/// WGS84 semi-major axis (equatorial radius), meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 first eccentricity squared.
pub const WGS84_E2: f64 = 0.006_694_379_990_13;
/// WGS84 semi-minor axis (polar radius), meters.
pub const WGS84_B: f64 = 6_356_752.314_245;

/// Height change (meters) below which the geodetic iteration is considered settled.
pub const GEODETIC_HEIGHT_TOLERANCE: f64 = 1e-6;
/// Latitude change (radians) below which the geodetic iteration is considered settled.
pub const GEODETIC_LATITUDE_TOLERANCE: f64 = 1e-6;
/// Hard cap on the fixed-point iteration in `ecef_to_geodetic`.
pub const GEODETIC_MAX_ITERATIONS: usize = 50;

/// A position on the WGS84 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geodetic {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Height above the ellipsoid (HAE), meters.
    #[serde(default)]
    pub altitude_m: f64,
}

impl Geodetic {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        }
    }

    pub fn to_ecef(&self) -> Vector3<f64> {
        geodetic_to_ecef(self.latitude_deg, self.longitude_deg, self.altitude_m)
    }

    pub fn from_ecef(point: &Vector3<f64>) -> Result<Self> {
        ecef_to_geodetic(point)
    }
}

/// Prime-vertical radius of curvature at a geodetic latitude (radians).
fn prime_vertical_radius(latitude_rad: f64) -> f64 {
    let s = latitude_rad.sin();
    WGS84_A / (1.0 - WGS84_E2 * s * s).sqrt()
}

/// Converts WGS84 latitude/longitude (degrees) and altitude (meters, HAE)
/// into an ECEF position in meters.
pub fn geodetic_to_ecef(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Vector3<f64> {
    let lat = latitude_deg.to_radians();
    let lon = longitude_deg.to_radians();
    let n = prime_vertical_radius(lat);

    Vector3::new(
        (n + altitude_m) * lat.cos() * lon.cos(),
        (n + altitude_m) * lat.cos() * lon.sin(),
        (n * (1.0 - WGS84_E2) + altitude_m) * lat.sin(),
    )
}

/// Converts an ECEF position into WGS84 geodetic coordinates.
///
/// There is no closed form, so latitude and height are refined by fixed-point
/// iteration from a spherical seed until both stop moving. Height is taken
/// from whichever of the horizontal or polar projections is better
/// conditioned, which keeps points on or near the polar axis accurate.
///
/// # Errors
/// * `DegeneratePoint` for the Earth's centre.
/// * `TransformConvergence` if the iteration does not settle within
///   [`GEODETIC_MAX_ITERATIONS`] steps (pathological points deep inside the Earth).
pub fn ecef_to_geodetic(point: &Vector3<f64>) -> Result<Geodetic> {
    let (x, y, z) = (point.x, point.y, point.z);
    let p = x.hypot(y);

    if p == 0.0 && z == 0.0 {
        return Err(GeolocError::DegeneratePoint(*point));
    }

    let latitude_from = |n: f64, h: f64| z.atan2(p * (1.0 - WGS84_E2 * n / (n + h)));

    // Spherical seed.
    let mut height = point.norm() - (WGS84_A * WGS84_B).sqrt();
    let mut latitude = latitude_from(WGS84_A, height);

    for iteration in 0..GEODETIC_MAX_ITERATIONS {
        let n = prime_vertical_radius(latitude);
        let (sin_lat, cos_lat) = latitude.sin_cos();
        let next_height = if cos_lat.abs() >= sin_lat.abs() {
            p / cos_lat - n
        } else {
            z / sin_lat - n * (1.0 - WGS84_E2)
        };
        let next_latitude = latitude_from(n, next_height);

        let settled = (next_height - height).abs() < GEODETIC_HEIGHT_TOLERANCE
            && (next_latitude - latitude).abs() < GEODETIC_LATITUDE_TOLERANCE;

        height = next_height;
        latitude = next_latitude;

        if settled {
            trace!(iterations = iteration + 1, "geodetic conversion settled");
            return Ok(Geodetic {
                latitude_deg: latitude.to_degrees(),
                longitude_deg: y.atan2(x).to_degrees(),
                altitude_m: height,
            });
        }
    }

    Err(GeolocError::TransformConvergence {
        iterations: GEODETIC_MAX_ITERATIONS,
        point: *point,
    })
}

/// The rotation taking ECEF-aligned vectors into the East-North-Up frame of an
/// observer at the given geodetic latitude/longitude (degrees).
///
/// The matrix is orthonormal, so its transpose is the ENU to ECEF rotation.
pub fn topocentric_rotation(latitude_deg: f64, longitude_deg: f64) -> Rotation3<f64> {
    let (slat, clat) = latitude_deg.to_radians().sin_cos();
    let (slon, clon) = longitude_deg.to_radians().sin_cos();

    #[rustfmt::skip]
    let m = Matrix3::new(
        -slon,         clon,         0.0,
        -slat * clon, -slat * slon,  clat,
         clat * clon,  clat * slon,  slat,
    );
    Rotation3::from_matrix_unchecked(m)
}

/// Expresses an ECEF target as seen from an observer, in the observer's ENU frame.
pub fn ecef_to_topocentric(
    target_ecef: &Vector3<f64>,
    observer_ecef: &Vector3<f64>,
    observer_latitude_deg: f64,
    observer_longitude_deg: f64,
) -> Vector3<f64> {
    topocentric_rotation(observer_latitude_deg, observer_longitude_deg)
        * (target_ecef - observer_ecef)
}

/// Inverse of [`ecef_to_topocentric`]: rotates back with the transpose and
/// translates by the observer's ECEF position.
pub fn topocentric_to_ecef(
    target_topocentric: &Vector3<f64>,
    observer_ecef: &Vector3<f64>,
    observer_latitude_deg: f64,
    observer_longitude_deg: f64,
) -> Vector3<f64> {
    topocentric_rotation(observer_latitude_deg, observer_longitude_deg).inverse()
        * target_topocentric
        + observer_ecef
}
