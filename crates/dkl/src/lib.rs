//! This library implements [Deep Kernel Learning](https://arxiv.org/abs/1511.02222) (DKL):
//! a Gaussian Process regressor whose kernel is evaluated on a low dimensional
//! embedding of the inputs computed by a neural network.
//!
//! Network weights, kernel hyperparameters and observation noise are fitted
//! jointly by stochastic variational inference with a point mass guide
//! (a.k.a. viDKL): the GP marginal likelihood plus hyperparameter log priors
//! is maximized with Adam, gradients flowing through the kernel back to the
//! network weights.
//!
//! The model is implemented by [DeepKernelLearning] parameterized by [DklParams],
//! [ViDkl] gives the default configuration (MLP feature extractor, RBF kernel).
//!
//! Every stochastic operation takes an explicit [RngKey] so that fit and
//! predictions are reproducible.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod errors;
pub mod feature_extractor;
pub mod guide;
pub mod hyperparameters;
pub mod kernels;
pub mod latent_prior;
pub mod model;
pub mod mvn;
mod parameters;
mod predictor;
pub mod priors;
mod rng;
pub mod svi;
mod utils;

pub use algorithm::*;
pub use errors::*;
pub use parameters::*;
pub use rng::RngKey;
pub use utils::as_2d;
