//! A module for prior distributions over GP hyperparameters.
//!
//! Priors are used in two ways: their log density enters the objective
//! optimized by the variational fitter, and they can be sampled to simulate
//! from the generative model. Each prior has a [`Support`] which tells how
//! an unconstrained optimization variable is mapped onto valid values.

use crate::errors::{DklError, Result};
use candle_core::Tensor;
use ndarray::Array1;
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::{Gamma, LogNormal, Normal, Uniform};
use ndarray_rand::RandomExt;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;
/// Median of the standard half normal distribution
const HALF_NORMAL_MEDIAN: f64 = 0.674_489_750_196_081_7;

/// Set of values a prior puts mass on
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Support {
    /// The real line
    Real,
    /// Strictly positive reals
    Positive,
    /// Open interval (low, high)
    Interval(f64, f64),
}

impl Support {
    /// Map unconstrained values `u` onto the support
    pub fn constrain(&self, u: &Tensor) -> candle_core::Result<Tensor> {
        match *self {
            Support::Real => Ok(u.clone()),
            Support::Positive => u.exp(),
            Support::Interval(low, high) => {
                let sigmoid = u.neg()?.exp()?.affine(1., 1.)?.recip()?;
                sigmoid.affine(high - low, low)
            }
        }
    }

    /// Map a value of the support to the unconstrained space
    pub fn unconstrain(&self, v: f64) -> f64 {
        match *self {
            Support::Real => v,
            Support::Positive => v.ln(),
            Support::Interval(low, high) => {
                let p = (v - low) / (high - low);
                (p / (1. - p)).ln()
            }
        }
    }
}

/// Prior distribution of a hyperparameter
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Prior {
    /// `exp(Normal(loc, scale))`
    LogNormal {
        /// location of the underlying normal
        loc: f64,
        /// scale of the underlying normal
        scale: f64,
    },
    /// `|Normal(0, scale)|`
    HalfNormal {
        /// scale
        scale: f64,
    },
    /// Gamma with shape `concentration` and inverse scale `rate`
    Gamma {
        /// shape
        concentration: f64,
        /// inverse scale
        rate: f64,
    },
    /// `Normal(loc, scale)`
    Normal {
        /// mean
        loc: f64,
        /// standard deviation
        scale: f64,
    },
    /// Uniform over (low, high)
    Uniform {
        /// lower bound
        low: f64,
        /// upper bound
        high: f64,
    },
}

impl Default for Prior {
    /// Weakly informative `LogNormal(0, 1)`
    fn default() -> Self {
        Prior::LogNormal {
            loc: 0.,
            scale: 1.,
        }
    }
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Prior::LogNormal { loc, scale } => write!(f, "LogNormal({loc}, {scale})"),
            Prior::HalfNormal { scale } => write!(f, "HalfNormal({scale})"),
            Prior::Gamma {
                concentration,
                rate,
            } => write!(f, "Gamma({concentration}, {rate})"),
            Prior::Normal { loc, scale } => write!(f, "Normal({loc}, {scale})"),
            Prior::Uniform { low, high } => write!(f, "Uniform({low}, {high})"),
        }
    }
}

impl Prior {
    /// Support of the distribution
    pub fn support(&self) -> Support {
        match *self {
            Prior::LogNormal { .. } | Prior::HalfNormal { .. } | Prior::Gamma { .. } => {
                Support::Positive
            }
            Prior::Normal { .. } => Support::Real,
            Prior::Uniform { low, high } => Support::Interval(low, high),
        }
    }

    /// Central value used to initialize point estimates: the median,
    /// except for Gamma which has no closed form median and uses its mean.
    pub fn median(&self) -> f64 {
        match *self {
            Prior::LogNormal { loc, .. } => loc.exp(),
            Prior::HalfNormal { scale } => scale * HALF_NORMAL_MEDIAN,
            Prior::Gamma {
                concentration,
                rate,
            } => concentration / rate,
            Prior::Normal { loc, .. } => loc,
            Prior::Uniform { low, high } => 0.5 * (low + high),
        }
    }

    /// Check distribution parameters
    pub fn check(&self) -> Result<()> {
        let valid = match *self {
            Prior::LogNormal { loc, scale } | Prior::Normal { loc, scale } => {
                loc.is_finite() && scale.is_finite() && scale > 0.
            }
            Prior::HalfNormal { scale } => scale.is_finite() && scale > 0.,
            Prior::Gamma {
                concentration,
                rate,
            } => concentration.is_finite() && rate.is_finite() && concentration > 0. && rate > 0.,
            Prior::Uniform { low, high } => low.is_finite() && high.is_finite() && low < high,
        };
        if valid {
            Ok(())
        } else {
            Err(DklError::InvalidValueError(format!(
                "Bad prior parameters: {self}"
            )))
        }
    }

    /// Log density at `v`
    pub fn ln_pdf(&self, v: f64) -> f64 {
        match *self {
            Prior::LogNormal { loc, scale } => {
                let z = (v.ln() - loc) / scale;
                -0.5 * z * z - v.ln() - scale.ln() - LN_SQRT_2PI
            }
            Prior::HalfNormal { scale } => {
                let z = v / scale;
                -0.5 * z * z - scale.ln() - LN_SQRT_2PI + std::f64::consts::LN_2
            }
            Prior::Gamma {
                concentration,
                rate,
            } => {
                concentration * rate.ln() - libm::lgamma(concentration)
                    + (concentration - 1.) * v.ln()
                    - rate * v
            }
            Prior::Normal { loc, scale } => {
                let z = (v - loc) / scale;
                -0.5 * z * z - scale.ln() - LN_SQRT_2PI
            }
            Prior::Uniform { low, high } => {
                if v > low && v < high {
                    -(high - low).ln()
                } else {
                    f64::NEG_INFINITY
                }
            }
        }
    }

    /// Log density summed over all the elements of `v`, as a scalar tensor
    pub fn log_prob(&self, v: &Tensor) -> candle_core::Result<Tensor> {
        let elementwise = match *self {
            Prior::LogNormal { loc, scale } => {
                let lv = v.log()?;
                let z = lv.affine(1. / scale, -loc / scale)?;
                (z.sqr()?.affine(-0.5, -scale.ln() - LN_SQRT_2PI)? - lv)?
            }
            Prior::HalfNormal { scale } => v
                .affine(1. / scale, 0.)?
                .sqr()?
                .affine(-0.5, -scale.ln() - LN_SQRT_2PI + std::f64::consts::LN_2)?,
            Prior::Gamma {
                concentration,
                rate,
            } => {
                let c = concentration * rate.ln() - libm::lgamma(concentration);
                (v.log()?.affine(concentration - 1., c)? - v.affine(rate, 0.)?)?
            }
            Prior::Normal { loc, scale } => v
                .affine(1. / scale, -loc / scale)?
                .sqr()?
                .affine(-0.5, -scale.ln() - LN_SQRT_2PI)?,
            Prior::Uniform { low, high } => v.affine(0., -(high - low).ln())?,
        };
        elementwise.sum_all()
    }

    /// Draw `dim` independent values
    pub fn sample<R: Rng>(&self, dim: usize, rng: &mut R) -> Result<Array1<f64>> {
        let bad = |e: &dyn fmt::Display| DklError::InvalidValueError(format!("{self}: {e}"));
        let values = match *self {
            Prior::LogNormal { loc, scale } => {
                Array1::random_using(dim, LogNormal::new(loc, scale).map_err(|e| bad(&e))?, rng)
            }
            Prior::HalfNormal { scale } => {
                Array1::random_using(dim, Normal::new(0., scale).map_err(|e| bad(&e))?, rng)
                    .mapv(f64::abs)
            }
            Prior::Gamma {
                concentration,
                rate,
            } => Array1::random_using(
                dim,
                Gamma::new(concentration, 1. / rate).map_err(|e| bad(&e))?,
                rng,
            ),
            Prior::Normal { loc, scale } => {
                Array1::random_using(dim, Normal::new(loc, scale).map_err(|e| bad(&e))?, rng)
            }
            Prior::Uniform { low, high } => {
                self.check()?;
                Array1::random_using(dim, Uniform::new(low, high), rng)
            }
        };
        Ok(values)
    }
}

/// Prior of a hyperparameter site: its distribution and its number of components
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct HyperPrior {
    /// Distribution of each component
    pub prior: Prior,
    /// Number of i.i.d. components
    pub dim: usize,
}

/// Priors over kernel hyperparameters, by hyperparameter name.
///
/// Custom priors replace the default `LogNormal(0, 1)` priors and must
/// provide every hyperparameter required by the chosen kernel.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct KernelPriors(BTreeMap<String, HyperPrior>);

impl KernelPriors {
    /// Empty priors
    pub fn new() -> Self {
        Self::default()
    }

    /// `LogNormal(0, 1)` priors for the given (name, dim) hyperparameters
    pub fn log_normal(hyperparameters: &[(&str, usize)]) -> Self {
        hyperparameters
            .iter()
            .fold(Self::new(), |priors, (name, dim)| {
                priors.with(name, Prior::default(), *dim)
            })
    }

    /// Set `prior` for the `dim` components of `name` hyperparameter
    pub fn with(mut self, name: &str, prior: Prior, dim: usize) -> Self {
        self.0.insert(name.to_string(), HyperPrior { prior, dim });
        self
    }

    /// Prior of `name` hyperparameter if any
    pub fn get(&self, name: &str) -> Option<&HyperPrior> {
        self.0.get(name)
    }

    /// Iterate over (name, prior) in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HyperPrior)> {
        self.0.iter()
    }

    /// Number of hyperparameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no prior is defined
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
