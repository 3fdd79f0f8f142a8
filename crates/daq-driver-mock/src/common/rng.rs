//! Seeded randomness for the mock board.
//!
//! Shared by the fault injector and the front-end simulator so one seed
//! reproduces both the hit pattern and the injected failures of a run.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// ChaCha8 generator behind a lock, usable from both cores.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Seeded generator, or one seeded from the OS when `seed` is `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `p`. Values outside [0, 1] saturate and do not
    /// consume randomness.
    pub fn chance(&self, p: f64) -> bool {
        if p <= 0.0 {
            false
        } else if p >= 1.0 {
            true
        } else {
            self.inner.lock().gen_bool(p)
        }
    }

    /// Normally distributed sample (Box-Muller).
    pub fn gaussian(&self, mean: f64, sigma: f64) -> f64 {
        if sigma <= 0.0 {
            return mean;
        }
        let (u1, u2): (f64, f64) = {
            let mut rng = self.inner.lock();
            // (0, 1] keeps ln() finite
            (1.0 - rng.gen::<f64>(), rng.gen())
        };
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        mean + sigma * z
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MockRng")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let a = MockRng::new(Some(42));
        let b = MockRng::new(Some(42));
        for _ in 0..10 {
            assert_eq!(a.gaussian(0.0, 1.0), b.gaussian(0.0, 1.0));
        }
    }

    #[test]
    fn test_chance_saturates() {
        let rng = MockRng::new(Some(7));
        assert!((0..100).all(|_| !rng.chance(0.0)));
        assert!((0..100).all(|_| rng.chance(1.0)));
        assert!(rng.chance(1.5));
    }

    #[test]
    fn test_gaussian_moments() {
        let rng = MockRng::new(Some(1234));
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.gaussian(8.0, 1.5)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 8.0).abs() < 0.05, "mean {mean}");
        assert!((var.sqrt() - 1.5).abs() < 0.05, "sigma {}", var.sqrt());
    }

    #[test]
    fn test_gaussian_zero_sigma() {
        let rng = MockRng::new(Some(1));
        assert_eq!(rng.gaussian(5.0, 0.0), 5.0);
    }
}
