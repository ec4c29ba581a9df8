//! A module for kernel models evaluated on embedded points.
//!
//! Kernels are written with differentiable tensor operations so that the
//! same code is used to build the training likelihood (where gradients flow
//! back to hyperparameters and to the feature extractor) and to compute
//! predictions.
//!
//! The following kernels are implemented:
//! * radial basis function (squared exponential),
//! * matern 5/2,
//! * periodic.

use crate::hyperparameters::{TensorParams, K_LENGTH, K_SCALE, PERIOD};
use candle_core::Tensor;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Added to squared distances before taking the square root so that
/// gradients stay finite at zero distance
const SQRT_EPS: f64 = 1e-12;

/// A trait for kernels used as GP covariance function in latent space
pub trait KernelEvaluator:
    Clone + Copy + Default + fmt::Display + fmt::Debug + Send + Sync
{
    /// Hyperparameters required by the kernel as (name, number of components)
    /// for points of `latent_dim` components
    fn hyperparameters(&self, latent_dim: usize) -> Vec<(&'static str, usize)>;

    /// Compute covariance matrix k(za, zb) of shape (na, nb) given
    /// points `za` (na, nz), `zb` (nb, nz) and hyperparameters `params`.
    /// No diagonal term is added (zero jitter mode used for cross covariances).
    fn covariance(
        &self,
        za: &Tensor,
        zb: &Tensor,
        params: &TensorParams,
    ) -> candle_core::Result<Tensor>;

    /// Compute covariance matrix k(za, zb) and add `noise + jitter` on its
    /// diagonal when `za` and `zb` have the same number of points.
    fn evaluate(
        &self,
        za: &Tensor,
        zb: &Tensor,
        params: &TensorParams,
        noise: &Tensor,
        jitter: f64,
    ) -> candle_core::Result<Tensor> {
        let k = self.covariance(za, zb, params)?;
        let (na, nb) = k.dims2()?;
        if na != nb {
            return Ok(k);
        }
        let diag = Tensor::eye(na, k.dtype(), k.device())?.broadcast_mul(&noise.affine(1., jitter)?)?;
        k + diag
    }
}

fn param<'a>(params: &'a TensorParams, name: &str) -> candle_core::Result<&'a Tensor> {
    params
        .get(name)
        .ok_or_else(|| candle_core::Error::Msg(format!("Missing `{name}` kernel hyperparameter")))
}

/// Pairwise differences `za_i - zb_j` as a (na, nb, nz) tensor
fn differences(za: &Tensor, zb: &Tensor) -> candle_core::Result<Tensor> {
    za.unsqueeze(1)?.broadcast_sub(&zb.unsqueeze(0)?)
}

/// Pairwise squared distances scaled componentwise by `lengthscale`
///    nz
///   sum  ((za_il - zb_jl) / lengthscale_l)^2
///   l=1
fn scaled_sq_distances(
    za: &Tensor,
    zb: &Tensor,
    lengthscale: &Tensor,
) -> candle_core::Result<Tensor> {
    differences(za, zb)?
        .broadcast_div(lengthscale)?
        .sqr()?
        .sum(2)
}

/// Radial basis function kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct RbfKernel();

impl From<RbfKernel> for String {
    fn from(_item: RbfKernel) -> String {
        "RBF".to_string()
    }
}

impl TryFrom<String> for RbfKernel {
    type Error = &'static str;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "RBF" {
            Ok(Self::default())
        } else {
            Err("Bad string value for RbfKernel, should be \'RBF\'")
        }
    }
}

impl KernelEvaluator for RbfKernel {
    fn hyperparameters(&self, latent_dim: usize) -> Vec<(&'static str, usize)> {
        vec![(K_LENGTH, latent_dim), (K_SCALE, 1)]
    }

    /// k_scale * exp( -0.5 * |za - zb|^2 / k_length^2 )
    fn covariance(
        &self,
        za: &Tensor,
        zb: &Tensor,
        params: &TensorParams,
    ) -> candle_core::Result<Tensor> {
        let d2 = scaled_sq_distances(za, zb, param(params, K_LENGTH)?)?;
        param(params, K_SCALE)?.broadcast_mul(&d2.affine(-0.5, 0.)?.exp()?)
    }
}

impl fmt::Display for RbfKernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RBF")
    }
}

/// Matern 5/2 kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct Matern52Kernel();

impl From<Matern52Kernel> for String {
    fn from(_item: Matern52Kernel) -> String {
        "Matern52".to_string()
    }
}

impl TryFrom<String> for Matern52Kernel {
    type Error = &'static str;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "Matern52" {
            Ok(Self::default())
        } else {
            Err("Bad string value for Matern52Kernel, should be \'Matern52\'")
        }
    }
}

impl KernelEvaluator for Matern52Kernel {
    fn hyperparameters(&self, latent_dim: usize) -> Vec<(&'static str, usize)> {
        vec![(K_LENGTH, latent_dim), (K_SCALE, 1)]
    }

    /// k_scale * (1 + sqrt(5) * d + 5/3 * d^2) * exp( -sqrt(5) * d )
    /// where d = |za - zb| / k_length
    fn covariance(
        &self,
        za: &Tensor,
        zb: &Tensor,
        params: &TensorParams,
    ) -> candle_core::Result<Tensor> {
        let sqrt5 = 5f64.sqrt();
        let d2 = scaled_sq_distances(za, zb, param(params, K_LENGTH)?)?;
        let d = d2.affine(1., SQRT_EPS)?.sqrt()?;
        let poly = (d.affine(sqrt5, 1.)? + d2.affine(5. / 3., 0.)?)?;
        let k = (poly * d.affine(-sqrt5, 0.)?.exp()?)?;
        param(params, K_SCALE)?.broadcast_mul(&k)
    }
}

impl fmt::Display for Matern52Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern52")
    }
}

/// Periodic kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct PeriodicKernel();

impl From<PeriodicKernel> for String {
    fn from(_item: PeriodicKernel) -> String {
        "Periodic".to_string()
    }
}

impl TryFrom<String> for PeriodicKernel {
    type Error = &'static str;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "Periodic" {
            Ok(Self::default())
        } else {
            Err("Bad string value for PeriodicKernel, should be \'Periodic\'")
        }
    }
}

impl KernelEvaluator for PeriodicKernel {
    fn hyperparameters(&self, latent_dim: usize) -> Vec<(&'static str, usize)> {
        vec![(K_LENGTH, latent_dim), (K_SCALE, 1), (PERIOD, 1)]
    }

    /// ```text
    ///                    nz
    /// k_scale * exp( -2 sum sin^2(pi * (za_l - zb_l) / period) / k_length_l^2 )
    ///                   l=1
    /// ```
    fn covariance(
        &self,
        za: &Tensor,
        zb: &Tensor,
        params: &TensorParams,
    ) -> candle_core::Result<Tensor> {
        let scaled_sin = differences(za, zb)?
            .broadcast_div(param(params, PERIOD)?)?
            .affine(std::f64::consts::PI, 0.)?
            .sin()?
            .broadcast_div(param(params, K_LENGTH)?)?;
        let k = scaled_sin.sqr()?.sum(2)?.affine(-2., 0.)?.exp()?;
        param(params, K_SCALE)?.broadcast_mul(&k)
    }
}

impl fmt::Display for PeriodicKernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Periodic")
    }
}
