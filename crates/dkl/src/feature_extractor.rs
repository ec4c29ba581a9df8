//! Neural feature extractors mapping raw inputs to a low dimensional latent space.
//!
//! The extractor weights are stored in a [`VarMap`] owned by the caller so
//! that they are optimized jointly with the GP hyperparameters.
//! Initialization is driven by an explicit [`RngKey`], which makes a fit
//! reproducible from its key alone.

use crate::rng::RngKey;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, Init, Linear, Module, VarBuilder, VarMap};
use ndarray::Array2;
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hidden layer sizes of the default extractor
pub const DEFAULT_HIDDEN_LAYERS: [usize; 2] = [1000, 500];

/// Number of standard deviations at which initial weights are truncated
const TRUNCATION: f64 = 2.;

/// A trait for networks producing the embedding on which the kernel is evaluated
pub trait FeatureExtractor: Clone + fmt::Debug + fmt::Display + Send + Sync {
    /// The network built from the weights
    type Module: Module + Send + Sync;

    /// Number of components of raw input points
    fn input_dim(&self) -> usize;

    /// Number of components of embedded points
    fn latent_dim(&self) -> usize;

    /// Create (or reset) every weight of the network in `varmap` from `key`
    fn init_weights(&self, varmap: &mut VarMap, key: RngKey) -> candle_core::Result<()>;

    /// Build the network from weights already present in `vb`
    fn build(&self, vb: VarBuilder) -> candle_core::Result<Self::Module>;
}

/// Multi layer perceptron, dense layers separated by an activation
#[derive(Clone, Debug)]
pub struct Mlp {
    layers: Vec<Linear>,
    activation: Activation,
}

impl Module for Mlp {
    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if i < last {
                x = self.activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

/// Default feature extractor: dense layers with ReLU activations
///
/// `input_dim -> 1000 -> relu -> 500 -> relu -> latent_dim` unless hidden
/// layers are given with [`MlpExtractor::with_hidden_layers`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct MlpExtractor {
    input_dim: usize,
    latent_dim: usize,
    hidden_layers: Vec<usize>,
}

impl MlpExtractor {
    /// Extractor for `input_dim` features embedded in `latent_dim` components
    pub fn new(input_dim: usize, latent_dim: usize) -> Self {
        MlpExtractor {
            input_dim,
            latent_dim,
            hidden_layers: DEFAULT_HIDDEN_LAYERS.to_vec(),
        }
    }

    /// Set hidden layer sizes
    pub fn with_hidden_layers(mut self, hidden_layers: &[usize]) -> Self {
        self.hidden_layers = hidden_layers.to_vec();
        self
    }

    /// Hidden layer sizes
    pub fn hidden_layers(&self) -> &[usize] {
        &self.hidden_layers
    }

    /// (fan_in, fan_out) of each dense layer
    fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut sizes = vec![self.input_dim];
        sizes.extend_from_slice(&self.hidden_layers);
        sizes.push(self.latent_dim);
        sizes.windows(2).map(|w| (w[0], w[1])).collect()
    }
}

impl fmt::Display for MlpExtractor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sizes: Vec<String> = self
            .layer_dims()
            .iter()
            .map(|(_, out)| out.to_string())
            .collect();
        write!(f, "Mlp({} -> {})", self.input_dim, sizes.join(" -> "))
    }
}

/// Normal(0, std) values truncated at [`TRUNCATION`] standard deviations
fn truncated_normal<R: Rng>(shape: (usize, usize), std: f64, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_simple_fn(shape, || loop {
        let v: f64 = rng.sample(StandardNormal);
        if v.abs() <= TRUNCATION {
            break std * v;
        }
    })
}

fn layer_name(i: usize) -> String {
    format!("layer{i}")
}

impl FeatureExtractor for MlpExtractor {
    type Module = Mlp;

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    fn init_weights(&self, varmap: &mut VarMap, key: RngKey) -> candle_core::Result<()> {
        let dims = self.layer_dims();
        for ((i, (fan_in, fan_out)), layer_key) in dims.iter().enumerate().zip(key.split_n(dims.len()))
        {
            let mut rng = layer_key.rng();
            let std = 1. / (*fan_in as f64).sqrt();
            let weight = truncated_normal((*fan_out, *fan_in), std, &mut rng);
            let weight_name = format!("{}.weight", layer_name(i));
            let bias_name = format!("{}.bias", layer_name(i));
            // Registers the variables when missing, values are set right after
            varmap.get(
                (*fan_out, *fan_in),
                &weight_name,
                Init::Const(0.),
                DType::F64,
                &Device::Cpu,
            )?;
            varmap.get(*fan_out, &bias_name, Init::Const(0.), DType::F64, &Device::Cpu)?;
            let weight = Tensor::from_iter(weight.iter().copied(), &Device::Cpu)?
                .reshape((*fan_out, *fan_in))?;
            varmap.set_one(&weight_name, weight)?;
            varmap.set_one(&bias_name, Tensor::zeros(*fan_out, DType::F64, &Device::Cpu)?)?;
        }
        Ok(())
    }

    fn build(&self, vb: VarBuilder) -> candle_core::Result<Mlp> {
        let layers = self
            .layer_dims()
            .iter()
            .enumerate()
            .map(|(i, (fan_in, fan_out))| candle_nn::linear(*fan_in, *fan_out, vb.pp(layer_name(i))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Mlp {
            layers,
            activation: Activation::Relu,
        })
    }
}
