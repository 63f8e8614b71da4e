// geoloc_sim/src/simulation/core/prng.rs

use nalgebra::DVector;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::SimError;

/// A newtype wrapper around `ChaCha8Rng`.
/// This is the central, deterministic pseudo-random number generator for a scenario run.
pub struct SimulationRng(pub ChaCha8Rng);

impl SimulationRng {
    /// Seeds deterministically when a seed is given, from OS entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self(rng)
    }

    /// Draws `len` independent zero-mean Gaussian samples with standard deviation `stddev`.
    pub fn gaussian(&mut self, stddev: f64, len: usize) -> Result<DVector<f64>, SimError> {
        let noise_dist = Normal::new(0.0, stddev)
            .map_err(|e| SimError::InvalidScenario(format!("noise stddev {stddev}: {e}")))?;
        Ok(DVector::from_iterator(
            len,
            (0..len).map(|_| noise_dist.sample(&mut self.0)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_noise() {
        let a = SimulationRng::new(Some(42)).gaussian(1.0, 8).unwrap();
        let b = SimulationRng::new(Some(42)).gaussian(1.0, 8).unwrap();
        let c = SimulationRng::new(Some(43)).gaussian(1.0, 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_zero_stddev_is_noise_free() {
        let noise = SimulationRng::new(Some(1)).gaussian(0.0, 4).unwrap();
        assert_eq!(noise, DVector::zeros(4));
    }
}
