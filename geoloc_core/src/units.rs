// geoloc_core/src/units.rs

//! Unit conversions for the quantities sensor reports commonly arrive in.
//! Everything inside the estimators is SI (meters, radians, m/s, Hz); angles
//! use `f64::to_radians`/`to_degrees` directly.

/// International foot, meters.
pub const FEET_TO_METERS: f64 = 0.3048;
pub const METERS_TO_FEET: f64 = 1.0 / FEET_TO_METERS;

/// International nautical mile, meters.
pub const NAUTICAL_MILES_TO_METERS: f64 = 1852.0;
pub const METERS_TO_NAUTICAL_MILES: f64 = 1.0 / NAUTICAL_MILES_TO_METERS;

/// Knots to meters per second.
pub const KNOTS_TO_METERS_PER_SECOND: f64 = NAUTICAL_MILES_TO_METERS / 3600.0;

pub fn feet_to_meters(feet: f64) -> f64 {
    feet * FEET_TO_METERS
}

pub fn meters_to_feet(meters: f64) -> f64 {
    meters * METERS_TO_FEET
}

pub fn nautical_miles_to_meters(nautical_miles: f64) -> f64 {
    nautical_miles * NAUTICAL_MILES_TO_METERS
}

pub fn meters_to_nautical_miles(meters: f64) -> f64 {
    meters * METERS_TO_NAUTICAL_MILES
}

pub fn knots_to_meters_per_second(knots: f64) -> f64 {
    knots * KNOTS_TO_METERS_PER_SECOND
}
