//! Stochastic variational inference of the model latent sites and network weights.

use crate::errors::{DklError, Result};
use crate::feature_extractor::FeatureExtractor;
use crate::guide::DeltaGuide;
use crate::kernels::KernelEvaluator;
use crate::model::{self, SiteValues};
use crate::parameters::DklValidParams;
use crate::rng::RngKey;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::{debug, info};
use ndarray::Array1;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Adam optimizer settings
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SviParams {
    /// Step size
    pub learning_rate: f64,
    /// Exponential decay rate of first moment estimates
    pub beta1: f64,
    /// Exponential decay rate of second moment estimates
    pub beta2: f64,
    /// Term added to the denominator of the update
    pub eps: f64,
}

impl Default for SviParams {
    fn default() -> Self {
        SviParams {
            learning_rate: 0.005,
            beta1: 0.5,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl SviParams {
    /// Check optimizer settings
    pub fn check(&self) -> Result<()> {
        let in_unit = |b: f64| (0. ..1.).contains(&b);
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.)
            || !in_unit(self.beta1)
            || !in_unit(self.beta2)
            || !(self.eps.is_finite() && self.eps > 0.)
        {
            return Err(DklError::InvalidValueError(format!(
                "Bad optimizer settings: {self:?}"
            )));
        }
        Ok(())
    }

    fn adamw(&self) -> ParamsAdamW {
        ParamsAdamW {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            weight_decay: 0.,
        }
    }
}

/// Maximize the ELBO of the delta `guide` for `num_steps` Adam steps,
/// jointly updating `weights` of the `network`.
/// Returns the loss (negative ELBO) at each step.
#[allow(clippy::too_many_arguments)]
pub fn run<K: KernelEvaluator, E: FeatureExtractor>(
    config: &DklValidParams<K, E>,
    network: &E::Module,
    weights: Vec<Var>,
    guide: &DeltaGuide,
    x: &Tensor,
    y: &Array1<f64>,
    num_steps: usize,
    key: RngKey,
) -> Result<Vec<f64>> {
    let mut vars = weights;
    vars.extend(guide.vars());
    let mut adam = AdamW::new(vars, config.svi().adamw())?;

    let now = Instant::now();
    let mut losses = Vec::with_capacity(num_steps);
    for step in 0..num_steps {
        let step_key = key.fold_in(step as u64);
        let values = guide.sample()?;
        let trace = model::trace(
            config,
            network,
            x,
            Some(y),
            SiteValues::Substitute(&values),
            step_key,
        )?;
        let loss = trace.log_joint()?.neg()?;
        let value = loss.to_scalar::<f64>()?;
        if !value.is_finite() {
            return Err(DklError::NonFiniteLoss { step, value });
        }
        adam.backward_step(&loss)?;
        losses.push(value);
        if step % 100 == 0 {
            debug!("SVI step {step}: loss = {value}");
        }
    }
    info!(
        "SVI elapsed time for {num_steps} steps: {:?}",
        now.elapsed()
    );
    Ok(losses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::MlpExtractor;
    use crate::hyperparameters::NOISE;
    use crate::kernels::RbfKernel;
    use crate::parameters::DklParams;
    use crate::utils::matrix_to_tensor;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use linfa::ParamGuard;
    use ndarray::{array, Array};

    #[test]
    fn test_svi_params_check() {
        assert!(SviParams::default().check().is_ok());
        let bad = SviParams {
            beta2: 1.,
            ..SviParams::default()
        };
        assert!(bad.check().is_err());
    }

    fn setup(
        params: DklParams<RbfKernel, MlpExtractor>,
    ) -> (DklValidParams<RbfKernel, MlpExtractor>, VarMap, crate::feature_extractor::Mlp) {
        let config = params.check().unwrap();
        let mut varmap = VarMap::new();
        config
            .extractor()
            .init_weights(&mut varmap, RngKey::new(0))
            .unwrap();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let network = config.extractor().build(vb).unwrap();
        (config, varmap, network)
    }

    #[test]
    fn test_svi_decreases_loss() {
        let (config, varmap, network) = setup(
            DklParams::new(RbfKernel::default(), MlpExtractor::new(1, 1).with_hidden_layers(&[16]))
                .learning_rate(0.01),
        );
        let xt = Array::linspace(0., 3., 12).insert_axis(ndarray::Axis(1));
        let y = xt.column(0).mapv(f64::sin);
        let x = matrix_to_tensor(&xt, &Device::Cpu).unwrap();
        let guide = DeltaGuide::new(&config.site_priors(), &Device::Cpu).unwrap();

        let losses = run(
            &config,
            &network,
            varmap.all_vars(),
            &guide,
            &x,
            &y,
            200,
            RngKey::new(3),
        )
        .unwrap();
        assert_eq!(losses.len(), 200);
        assert!(losses[199] < losses[0]);
        // noise is pushed below its prior median by nearly noiseless data
        assert!(guide.median().unwrap().noise().unwrap() < 1.);
    }

    #[test]
    fn test_svi_non_finite_loss() {
        let (config, varmap, network) = setup(DklParams::new(
            RbfKernel::default(),
            MlpExtractor::new(1, 1).with_hidden_layers(&[4]),
        ));
        let x = matrix_to_tensor(&array![[1.], [2.]], &Device::Cpu).unwrap();
        let guide = DeltaGuide::new(&config.site_priors(), &Device::Cpu).unwrap();
        let before = guide.median().unwrap();
        // likelihood is undefined for a NaN observation
        let res = run(
            &config,
            &network,
            varmap.all_vars(),
            &guide,
            &x,
            &array![0., f64::NAN],
            10,
            RngKey::new(3),
        );
        assert!(matches!(
            res,
            Err(DklError::NonFiniteLoss { step: 0, value }) if value.is_nan()
        ));
        // no update was applied
        assert_eq!(guide.median().unwrap(), before);
        assert!(before.get(NOISE).is_some());
    }
}
