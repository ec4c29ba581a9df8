//! Named values of GP hyperparameters (kernel parameters and noise).

use crate::utils::{tensor_to_vector, vector_to_tensor};
use candle_core::{Device, Tensor};
use ndarray::Array1;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the observation noise site
pub const NOISE: &str = "noise";
/// Name of the kernel lengthscale hyperparameter
pub const K_LENGTH: &str = "k_length";
/// Name of the kernel output scale hyperparameter
pub const K_SCALE: &str = "k_scale";
/// Name of the periodic kernel period hyperparameter
pub const PERIOD: &str = "period";

/// Hyperparameter values as tensors, by name
pub type TensorParams = BTreeMap<String, Tensor>;

/// Hyperparameter values, by name. Scalar hyperparameters are stored as
/// one element arrays.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct KernelParams(BTreeMap<String, Array1<f64>>);

impl KernelParams {
    /// Empty set of hyperparameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` hyperparameter value
    pub fn with(mut self, name: &str, value: Array1<f64>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set `name` hyperparameter value in place
    pub fn insert(&mut self, name: &str, value: Array1<f64>) {
        self.0.insert(name.to_string(), value);
    }

    /// Set the observation noise
    pub fn with_noise(self, noise: f64) -> Self {
        self.with(NOISE, Array1::from_elem(1, noise))
    }

    /// Value of `name` hyperparameter if any
    pub fn get(&self, name: &str) -> Option<&Array1<f64>> {
        self.0.get(name)
    }

    /// Observation noise if any
    pub fn noise(&self) -> Option<f64> {
        self.0.get(NOISE).and_then(|v| v.first().copied())
    }

    /// Iterate over (name, value) in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Array1<f64>)> {
        self.0.iter()
    }

    /// Number of hyperparameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no hyperparameter is defined
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every value is finite
    pub fn is_finite(&self) -> bool {
        self.0.values().all(|v| v.iter().all(|x| x.is_finite()))
    }

    pub(crate) fn to_tensors(&self, device: &Device) -> candle_core::Result<TensorParams> {
        self.0
            .iter()
            .map(|(name, v)| Ok((name.clone(), vector_to_tensor(v, device)?)))
            .collect()
    }

    pub(crate) fn from_tensors(params: &TensorParams) -> candle_core::Result<Self> {
        params
            .iter()
            .map(|(name, t)| Ok((name.clone(), tensor_to_vector(t)?)))
            .collect::<candle_core::Result<BTreeMap<_, _>>>()
            .map(KernelParams)
    }
}

impl fmt::Display for KernelParams {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Inferred parameters")?;
        for (name, value) in self.0.iter() {
            let spaces = " ".repeat(15usize.saturating_sub(name.len()));
            let value = if value.len() == 1 {
                format!("{:.4}", value[0])
            } else {
                let values: Vec<_> = value.iter().map(|v| format!("{v:.4}")).collect();
                format!("[{}]", values.join(", "))
            };
            writeln!(f, "{name} {spaces} {value}")?;
        }
        Ok(())
    }
}
