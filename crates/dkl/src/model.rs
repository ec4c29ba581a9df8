//! The generative model of deep kernel learning.
//!
//! ```text
//! z      = network(x)                 (optionally perturbed by a latent prior)
//! theta ~ kernel hyperparameter priors
//! noise ~ noise prior
//! y     ~ MVN(0, kernel(z, z; theta) + (noise + jitter) I)
//! ```
//!
//! Running the model produces a [`ModelTrace`] recording, for each random
//! site, its value and its log density. Latent site values are either
//! substituted (fitting) or drawn from their priors (simulation).

use crate::errors::{DklError, Result};
use crate::feature_extractor::FeatureExtractor;
use crate::hyperparameters::{TensorParams, NOISE};
use crate::kernels::KernelEvaluator;
use crate::mvn::{self, MvnLogDensity};
use crate::parameters::DklValidParams;
use crate::rng::RngKey;
use crate::utils::{tensor_to_matrix, vector_to_tensor};
use candle_core::{Module, Tensor};
use ndarray::{Array1, Axis};

/// Name of the observed site
pub const OBS: &str = "y";

/// Where latent site values come from
#[derive(Clone, Copy, Debug)]
pub enum SiteValues<'a> {
    /// Use the given values (ex: point estimates of a guide)
    Substitute(&'a TensorParams),
    /// Draw values from the priors
    Prior,
}

/// A random site recorded while running the model
#[derive(Clone, Debug)]
pub struct Site {
    /// Site name
    pub name: String,
    /// Site value
    pub value: Tensor,
    /// Log density of the value under the site distribution (scalar tensor)
    pub log_prob: Tensor,
    /// Whether the value was observed
    pub observed: bool,
}

/// Record of one execution of the model
#[derive(Clone, Debug, Default)]
pub struct ModelTrace {
    sites: Vec<Site>,
}

impl ModelTrace {
    /// Recorded sites in execution order
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Site `name` if any
    pub fn site(&self, name: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.name == name)
    }

    /// Values of the latent (not observed) sites
    pub fn latent_values(&self) -> TensorParams {
        self.sites
            .iter()
            .filter(|s| !s.observed)
            .map(|s| (s.name.clone(), s.value.clone()))
            .collect()
    }

    /// Joint log density: sum of every site log density
    pub fn log_joint(&self) -> candle_core::Result<Tensor> {
        let log_probs: Vec<&Tensor> = self.sites.iter().map(|s| &s.log_prob).collect();
        Tensor::stack(&log_probs, 0)?.sum_all()
    }

    fn push(&mut self, site: Site) {
        self.sites.push(site);
    }
}

/// Run the model on inputs `x` (n, nx) given as a tensor.
///
/// When `y` is given the last site is observed, otherwise its value is
/// drawn from the likelihood.
pub fn trace<K: KernelEvaluator, E: FeatureExtractor>(
    config: &DklValidParams<K, E>,
    network: &E::Module,
    x: &Tensor,
    y: Option<&Array1<f64>>,
    sites: SiteValues,
    key: RngKey,
) -> Result<ModelTrace> {
    let keys = key.split_n(3);
    let mut z = network.forward(x)?;
    if let Some(latent_prior) = config.latent_prior() {
        z = latent_prior.sample(&z, keys[0])?;
    }

    let mut trace = ModelTrace::default();
    let priors = config.site_priors();
    for ((name, hp), site_key) in priors.iter().zip(keys[1].split_n(priors.len())) {
        let value = match sites {
            SiteValues::Substitute(values) => {
                let value = values.get(name).ok_or_else(|| {
                    DklError::InvalidValueError(format!("Missing value for `{name}` site"))
                })?;
                if value.elem_count() != hp.dim {
                    return Err(DklError::DimensionMismatch {
                        what: name.clone(),
                        expected: hp.dim,
                        actual: value.elem_count(),
                    });
                }
                value.clone()
            }
            SiteValues::Prior => {
                let value = hp.prior.sample(hp.dim, &mut site_key.rng())?;
                vector_to_tensor(&value, x.device())?
            }
        };
        let log_prob = hp.prior.log_prob(&value)?;
        trace.push(Site {
            name: name.clone(),
            value,
            log_prob,
            observed: false,
        });
    }

    let params = trace.latent_values();
    let noise = params
        .get(NOISE)
        .ok_or_else(|| DklError::InvalidValueError("Missing `noise` site".to_string()))?;
    let k = config
        .kernel()
        .evaluate(&z, &z, &params, noise, config.jitter())?;

    let (y, observed) = match y {
        Some(y) => (y.to_owned(), true),
        None => {
            let k = tensor_to_matrix(&k)?;
            let draw = mvn::sample(
                &Array1::zeros(k.nrows()),
                &k,
                1,
                config.sampling_method(),
                &mut keys[2].rng(),
            )?;
            (draw.index_axis_move(Axis(0), 0), false)
        }
    };
    let log_prob = k.apply_op1(MvnLogDensity::new(&y))?;
    trace.push(Site {
        name: OBS.to_string(),
        value: vector_to_tensor(&y, x.device())?,
        log_prob,
        observed,
    });
    Ok(trace)
}
