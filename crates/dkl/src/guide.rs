//! Point mass variational family over the latent sites of the model.
//!
//! Each latent site is represented by an unconstrained optimization
//! variable mapped onto the support of its prior. The guide density is
//! a Dirac at that location, the ELBO then reduces to the joint log density
//! of the model evaluated at the point estimate.

use crate::errors::Result;
use crate::hyperparameters::{KernelParams, TensorParams};
use crate::priors::{KernelPriors, Support};
use candle_core::{Device, Tensor, Var};
use std::collections::BTreeMap;

/// Delta guide holding one location per latent site
#[derive(Debug)]
pub struct DeltaGuide {
    locations: BTreeMap<String, (Var, Support)>,
}

impl DeltaGuide {
    /// Guide for the given site priors, each location starting at its prior median
    pub fn new(priors: &KernelPriors, device: &Device) -> Result<Self> {
        let locations = priors
            .iter()
            .map(|(name, hp)| {
                let support = hp.prior.support();
                let init = support.unconstrain(hp.prior.median());
                let var = Var::from_tensor(&Tensor::full(init, hp.dim, device)?)?;
                Ok((name.clone(), (var, support)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(DeltaGuide { locations })
    }

    /// Optimization variables
    pub fn vars(&self) -> Vec<Var> {
        self.locations.values().map(|(v, _)| v.clone()).collect()
    }

    /// Site values at the point mass, differentiable with respect to [`DeltaGuide::vars`]
    pub fn sample(&self) -> candle_core::Result<TensorParams> {
        self.locations
            .iter()
            .map(|(name, (var, support))| Ok((name.clone(), support.constrain(var.as_tensor())?)))
            .collect()
    }

    /// Point estimate of every site
    pub fn median(&self) -> Result<KernelParams> {
        let values = self
            .sample()?
            .into_iter()
            .map(|(name, t)| Ok((name, t.detach())))
            .collect::<candle_core::Result<TensorParams>>()?;
        Ok(KernelParams::from_tensors(&values)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::{K_LENGTH, NOISE, PERIOD};
    use crate::priors::Prior;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_delta_guide_init_at_median() {
        let priors = KernelPriors::log_normal(&[(K_LENGTH, 2)])
            .with(NOISE, Prior::HalfNormal { scale: 2. }, 1)
            .with(PERIOD, Prior::Uniform { low: 1., high: 3. }, 1);
        let guide = DeltaGuide::new(&priors, &Device::Cpu).unwrap();
        assert_eq!(guide.vars().len(), 3);

        let median = guide.median().unwrap();
        assert_abs_diff_eq!(median.get(K_LENGTH).unwrap(), &array![1., 1.], epsilon = 1e-12);
        assert_abs_diff_eq!(median.noise().unwrap(), 2. * 0.674_489_750_196_081_7, epsilon = 1e-12);
        assert_abs_diff_eq!(median.get(PERIOD).unwrap()[0], 2., epsilon = 1e-12);
    }

    #[test]
    fn test_delta_guide_gradient() {
        let priors = KernelPriors::log_normal(&[(NOISE, 1)]);
        let guide = DeltaGuide::new(&priors, &Device::Cpu).unwrap();
        let values = guide.sample().unwrap();
        let grads = values[NOISE].sum_all().unwrap().backward().unwrap();
        // d exp(u) / du at u = 0
        let g = grads.get(&guide.vars()[0]).unwrap().to_vec1::<f64>().unwrap();
        assert_abs_diff_eq!(g[0], 1., epsilon = 1e-12);
    }
}
