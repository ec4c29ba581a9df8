use crate::errors::{DklError, Result};
use crate::feature_extractor::FeatureExtractor;
use crate::hyperparameters::NOISE;
use crate::kernels::KernelEvaluator;
use crate::latent_prior::LatentPrior;
use crate::mvn::SamplingMethod;
use crate::priors::{KernelPriors, Prior};
use crate::svi::SviParams;
use crate::{DKL_DEFAULT_JITTER, DKL_MIN_JITTER};
use linfa::ParamGuard;

use std::sync::Arc;

/// A set of validated DKL parameters.
#[derive(Clone, Debug)]
pub struct DklValidParams<K: KernelEvaluator, E: FeatureExtractor> {
    /// Kernel evaluated on embedded points
    pub(crate) kernel: K,
    /// Network computing the embedding
    pub(crate) extractor: E,
    /// Custom priors over kernel hyperparameters, `LogNormal(0, 1)` priors are used otherwise
    pub(crate) kernel_priors: Option<KernelPriors>,
    /// Prior over the observation noise
    pub(crate) noise_prior: Prior,
    /// Optional stochastic transformation of the embedding
    pub(crate) latent_prior: Option<Arc<dyn LatentPrior>>,
    /// Constant added to the diagonal of the kernel matrix on top of the noise
    pub(crate) jitter: f64,
    /// Optimizer settings
    pub(crate) svi: SviParams,
    /// Decomposition used to sample the predictive posterior
    pub(crate) sampling_method: SamplingMethod,
}

impl<K: KernelEvaluator, E: FeatureExtractor> DklValidParams<K, E> {
    /// Get kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get feature extractor
    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Get priors over kernel hyperparameters: custom priors when given,
    /// otherwise `LogNormal(0, 1)` for each kernel hyperparameter
    /// (with one component per latent dimension for the lengthscale)
    pub fn kernel_priors(&self) -> KernelPriors {
        self.kernel_priors.clone().unwrap_or_else(|| {
            KernelPriors::log_normal(&self.kernel.hyperparameters(self.extractor.latent_dim()))
        })
    }

    /// Get noise prior
    pub fn noise_prior(&self) -> &Prior {
        &self.noise_prior
    }

    /// Get latent prior if any
    pub fn latent_prior(&self) -> Option<&dyn LatentPrior> {
        self.latent_prior.as_deref()
    }

    /// Get jitter
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Get optimizer settings
    pub fn svi(&self) -> &SviParams {
        &self.svi
    }

    /// Get sampling method
    pub fn sampling_method(&self) -> SamplingMethod {
        self.sampling_method
    }

    /// Priors of every latent site of the model: kernel hyperparameters and noise
    pub(crate) fn site_priors(&self) -> KernelPriors {
        self.kernel_priors().with(NOISE, self.noise_prior, 1)
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [DKL algorithm](crate::DeepKernelLearning).
pub struct DklParams<K: KernelEvaluator, E: FeatureExtractor>(DklValidParams<K, E>);

impl<K: KernelEvaluator, E: FeatureExtractor> DklParams<K, E> {
    /// A constructor for DKL parameters given kernel and feature extractor
    pub fn new(kernel: K, extractor: E) -> DklParams<K, E> {
        Self(DklValidParams {
            kernel,
            extractor,
            kernel_priors: None,
            noise_prior: Prior::default(),
            latent_prior: None,
            jitter: DKL_DEFAULT_JITTER,
            svi: SviParams::default(),
            sampling_method: SamplingMethod::default(),
        })
    }

    /// A constructor for DKL parameters from validated parameters
    pub fn new_from_valid(params: &DklValidParams<K, E>) -> Self {
        Self(params.clone())
    }

    /// Set kernel.
    pub fn kernel(mut self, kernel: K) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set feature extractor.
    pub fn extractor(mut self, extractor: E) -> Self {
        self.0.extractor = extractor;
        self
    }

    /// Set custom priors over kernel hyperparameters.
    ///
    /// Every hyperparameter of the kernel has to be given, the number of
    /// components being either 1 (shared value) or the one expected by the kernel.
    pub fn kernel_priors(mut self, kernel_priors: KernelPriors) -> Self {
        self.0.kernel_priors = Some(kernel_priors);
        self
    }

    /// Set the prior over observation noise
    pub fn noise_prior(mut self, noise_prior: Prior) -> Self {
        self.0.noise_prior = noise_prior;
        self
    }

    /// Set a prior over the latent space
    pub fn latent_prior(mut self, latent_prior: Arc<dyn LatentPrior>) -> Self {
        self.0.latent_prior = Some(latent_prior);
        self
    }

    /// Set jitter.
    ///
    /// Jitter is added to the kernel matrix diagonal to improve numerical stability,
    /// it should be at least [`DKL_MIN_JITTER`](crate::DKL_MIN_JITTER)
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.0.jitter = jitter;
        self
    }

    /// Set optimizer step size
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.0.svi.learning_rate = learning_rate;
        self
    }

    /// Set exponential decay rate of the first moment estimates
    pub fn beta1(mut self, beta1: f64) -> Self {
        self.0.svi.beta1 = beta1;
        self
    }

    /// Set exponential decay rate of the second moment estimates
    pub fn beta2(mut self, beta2: f64) -> Self {
        self.0.svi.beta2 = beta2;
        self
    }

    /// Set the decomposition used to sample the predictive posterior
    pub fn sampling_method(mut self, sampling_method: SamplingMethod) -> Self {
        self.0.sampling_method = sampling_method;
        self
    }
}

impl<K: KernelEvaluator, E: FeatureExtractor> From<DklValidParams<K, E>> for DklParams<K, E> {
    fn from(valid: DklValidParams<K, E>) -> Self {
        DklParams(valid)
    }
}

impl<K: KernelEvaluator, E: FeatureExtractor> ParamGuard for DklParams<K, E> {
    type Checked = DklValidParams<K, E>;
    type Error = DklError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let params = &self.0;
        if params.extractor.input_dim() == 0 || params.extractor.latent_dim() == 0 {
            return Err(DklError::InvalidValueError(format!(
                "Input and latent dimensions should be positive, got {} and {}",
                params.extractor.input_dim(),
                params.extractor.latent_dim()
            )));
        }
        if let Some(priors) = &params.kernel_priors {
            let expected = params
                .kernel
                .hyperparameters(params.extractor.latent_dim());
            for (name, dim) in expected.iter() {
                match priors.get(name) {
                    None => {
                        return Err(DklError::InvalidValueError(format!(
                            "Missing prior for `{name}` required by {} kernel",
                            params.kernel
                        )))
                    }
                    Some(hp) if hp.dim != 1 && hp.dim != *dim => {
                        return Err(DklError::InvalidValueError(format!(
                            "Prior for `{name}` should have 1 or {dim} components, got {}",
                            hp.dim
                        )))
                    }
                    _ => (),
                }
            }
            if let Some((name, _)) = priors
                .iter()
                .find(|(name, _)| !expected.iter().any(|(n, _)| *n == name.as_str()))
            {
                return Err(DklError::InvalidValueError(format!(
                    "Unknown hyperparameter `{name}` for {} kernel",
                    params.kernel
                )));
            }
            for (_, hp) in priors.iter() {
                hp.prior.check()?;
            }
        }
        params.noise_prior.check()?;
        if !(params.jitter.is_finite() && params.jitter >= DKL_MIN_JITTER) {
            return Err(DklError::InvalidValueError(format!(
                "`jitter` should be at least {DKL_MIN_JITTER:e}, got {}",
                params.jitter
            )));
        }
        params.svi.check()?;
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
