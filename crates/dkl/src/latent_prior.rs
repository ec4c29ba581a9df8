//! Stochastic transformations of the embedding applied by the generative model.

use crate::errors::{DklError, Result};
use crate::rng::RngKey;
use candle_core::Tensor;
use ndarray::Array2;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use std::fmt;

/// A prior over the latent space: given the deterministic embedding `z`
/// it returns a random embedding of the same shape.
///
/// It is only applied while building the training likelihood, predictions
/// use the deterministic embedding.
pub trait LatentPrior: fmt::Debug + Send + Sync {
    /// Draw a latent embedding given the network output `z` (n, nz).
    /// The result has to stay differentiable with respect to `z`.
    fn sample(&self, z: &Tensor, key: RngKey) -> candle_core::Result<Tensor>;
}

/// Isotropic gaussian perturbation `z + scale * eps`, `eps ~ N(0, I)`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaussianLatentPrior {
    scale: f64,
}

impl GaussianLatentPrior {
    /// Constructor, `scale` has to be a positive finite value
    pub fn new(scale: f64) -> Result<Self> {
        if !(scale.is_finite() && scale > 0.) {
            return Err(DklError::InvalidValueError(format!(
                "Latent prior scale should be positive, got {scale}"
            )));
        }
        Ok(GaussianLatentPrior { scale })
    }

    /// Standard deviation of the perturbation
    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl LatentPrior for GaussianLatentPrior {
    fn sample(&self, z: &Tensor, key: RngKey) -> candle_core::Result<Tensor> {
        let (n, nz) = z.dims2()?;
        let eps = Array2::<f64>::random_using((n, nz), StandardNormal, &mut key.rng());
        let eps = Tensor::from_iter(eps.iter().copied(), z.device())?.reshape((n, nz))?;
        z + eps.affine(self.scale, 0.)?
    }
}
