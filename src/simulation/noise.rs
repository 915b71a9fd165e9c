use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{DigitizerError, Result};

use super::signal::CODE_MID_SCALE;

/// Additive white Gaussian noise on raw sample codes
pub struct GaussianNoise {
    rng: ChaCha8Rng,
    normal: Normal<f64>,
}

impl GaussianNoise {
    /// `rms` is the noise standard deviation as a fraction of full scale.
    pub fn new(rms: f64, seed: Option<u64>) -> Result<Self> {
        let normal = Normal::new(0.0, rms * CODE_MID_SCALE)
            .map_err(|e| DigitizerError::InvalidParameter(format!("noise rms {}: {}", rms, e)))?;
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => rand::make_rng(),
        };
        Ok(Self { rng, normal })
    }

    pub fn apply(&mut self, samples: &mut [u16]) {
        for sample in samples.iter_mut() {
            let noisy = *sample as f64 + self.normal.sample(&mut self.rng);
            *sample = noisy.round().clamp(0.0, u16::MAX as f64) as u16;
        }
    }
}
