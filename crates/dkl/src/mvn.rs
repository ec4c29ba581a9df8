//! Multivariate normal density and sampling.
//!
//! The log density of the GP likelihood `y ~ MVN(0, K)` is computed with a
//! Cholesky factorization in `ndarray` and exposed to the autodiff graph as
//! a custom operation on the covariance tensor, with the analytic gradient
//!
//! ```text
//! d log N(y; 0, K) / dK = 0.5 * (a a^T - K^-1),  a = K^-1 y
//! ```

use crate::errors::{DklError, Result};
use crate::utils::{matrix_to_tensor, tensor_to_matrix};
use candle_core::{CpuStorage, CustomOp1, Layout, Shape, Tensor};
use linfa_linalg::{cholesky::*, eigh::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Eigenvalues below this bound are considered null when sampling
const EIGEN_FLOOR: f64 = 1e-9;

/// Decomposition used to draw samples from a multivariate normal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum SamplingMethod {
    /// Cholesky factor of the covariance, fails if not positive definite
    Cholesky,
    /// Eigen decomposition with round-off negative eigenvalues clamped to zero
    #[default]
    EigenValues,
}

/// Lower Cholesky factor of a covariance matrix
///
/// Squared pivots below `10 n eps max(diag K)` are round-off of a singular
/// matrix and rejected as well as non finite ones.
pub(crate) fn cholesky(k: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array2<f64>> {
    let (n, m) = k.dim();
    let singular = |reason: String| {
        DklError::NumericallySingular(format!(
            "Cholesky factorization of the ({n}, {m}) covariance failed: {reason}"
        ))
    };
    let l = k.cholesky().map_err(|e| singular(e.to_string()))?;
    let max_diag = k.diag().fold(0., |acc: f64, &d| acc.max(d.abs()));
    let tol = 10. * n as f64 * f64::EPSILON * max_diag;
    match l.diag().iter().position(|&p| !(p.is_finite() && p * p > tol)) {
        Some(i) => Err(singular(format!(
            "pivot {i} is {:e}, below tolerance {tol:e}",
            l[[i, i]]
        ))),
        None => Ok(l),
    }
}

/// Solve `L x = b` where `L` is lower triangular
pub(crate) fn solve_lower(
    l: &Array2<f64>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> Result<Array1<f64>> {
    let x = l.solve_triangular(&b.to_owned().insert_axis(Axis(1)), UPLO::Lower)?;
    Ok(x.remove_axis(Axis(1)))
}

/// Log density of `y` under `MVN(0, K)`
pub fn log_density(
    y: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    k: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Result<f64> {
    let l = cholesky(k)?;
    let alpha = solve_lower(&l, y)?;
    let log_det = 2. * l.diag().mapv(f64::ln).sum();
    Ok(-0.5 * (alpha.dot(&alpha) + log_det + y.len() as f64 * LN_2PI))
}

/// Gradient of [`log_density`] with respect to the entries of `K`
pub fn log_density_grad(
    y: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    k: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Result<Array2<f64>> {
    let l = cholesky(k)?;
    let l_inv = l.solve_triangular(&Array2::eye(l.nrows()), UPLO::Lower)?;
    let k_inv = l_inv.t().dot(&l_inv);
    let alpha = k_inv.dot(y).insert_axis(Axis(1));
    Ok((alpha.dot(&alpha.t()) - k_inv) * 0.5)
}

/// `log N(y; 0, K)` as a differentiable function of the covariance tensor `K`
///
/// The forward pass yields NaN when `K` is not positive definite so that
/// the caller can report a non finite loss.
pub(crate) struct MvnLogDensity {
    y: Array1<f64>,
}

impl MvnLogDensity {
    pub(crate) fn new(y: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Self {
        MvnLogDensity { y: y.to_owned() }
    }
}

impl CustomOp1 for MvnLogDensity {
    fn name(&self) -> &'static str {
        "mvn-log-density"
    }

    fn cpu_fwd(&self, storage: &CpuStorage, layout: &Layout) -> candle_core::Result<(CpuStorage, Shape)> {
        let (n, m) = layout.shape().dims2()?;
        let values = storage.as_slice::<f64>()?;
        let values = match layout.contiguous_offsets() {
            Some((start, end)) => &values[start..end],
            None => candle_core::bail!("mvn-log-density expects a contiguous covariance"),
        };
        let k = Array2::from_shape_vec((n, m), values.to_vec()).map_err(candle_core::Error::wrap)?;
        let value = log_density(&self.y, &k).unwrap_or(f64::NAN);
        Ok((CpuStorage::F64(vec![value]), Shape::from(())))
    }

    fn bwd(&self, arg: &Tensor, _res: &Tensor, grad_res: &Tensor) -> candle_core::Result<Option<Tensor>> {
        let k = tensor_to_matrix(arg)?;
        let grad = log_density_grad(&self.y, &k).map_err(candle_core::Error::wrap)?;
        let grad = matrix_to_tensor(&grad, arg.device())?;
        Ok(Some(grad.affine(grad_res.to_scalar::<f64>()?, 0.)?))
    }
}

/// Draw `n` samples from `MVN(mean, cov)` as a (n, mean.len()) matrix
pub fn sample<R: Rng>(
    mean: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    cov: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    n: usize,
    method: SamplingMethod,
    rng: &mut R,
) -> Result<Array2<f64>> {
    let c = match method {
        SamplingMethod::Cholesky => cholesky(cov)?,
        SamplingMethod::EigenValues => {
            let (v, w) = cov.to_owned().eigh_into()?;
            let v = v.mapv(|x| if x < EIGEN_FLOOR { 0. } else { x.sqrt() });
            w.dot(&Array2::from_diag(&v))
        }
    };
    let eps = Array2::<f64>::random_using((mean.len(), n), StandardNormal, rng);
    Ok((c.dot(&eps) + mean.view().insert_axis(Axis(1))).reversed_axes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::{KernelParams, TensorParams, K_LENGTH, K_SCALE};
    use crate::kernels::{KernelEvaluator, RbfKernel};
    use crate::rng::RngKey;
    use crate::utils::vector_to_tensor;
    use approx::assert_abs_diff_eq;
    use candle_core::{Device, Var};
    use finitediff::FiniteDiff;
    use ndarray::{array, Array};

    fn covariance() -> Array2<f64> {
        array![[2., 0.5, 0.1], [0.5, 1.5, -0.3], [0.1, -0.3, 1.]]
    }

    #[test]
    fn test_log_density_diagonal() {
        let y = array![1., -2.];
        let k = array![[4., 0.], [0., 1.]];
        let expected = -0.5 * (0.25 + 4. + 4f64.ln() + 2. * LN_2PI);
        assert_abs_diff_eq!(log_density(&y, &k).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_log_density_not_positive_definite() {
        let k = array![[1., 2.], [2., 1.]];
        match log_density(&array![0., 0.], &k) {
            Err(DklError::NumericallySingular(_)) => (),
            _ => panic!("numerically singular error expected"),
        }
    }

    #[test]
    fn test_cholesky_round_off_pivot() {
        // duplicated rows: exact arithmetic gives a null pivot
        let k = array![[2., 2., 0.1], [2., 2., 0.1], [0.1, 0.1, 2.]];
        assert!(matches!(cholesky(&k), Err(DklError::NumericallySingular(_))));
        let k = array![[1., f64::NAN], [f64::NAN, 1.]];
        assert!(matches!(cholesky(&k), Err(DklError::NumericallySingular(_))));
        assert!(cholesky(&covariance()).is_ok());
    }

    #[test]
    fn test_log_density_grad_vs_finite_differences() {
        let y = array![0.3, -1.2, 0.7];
        let k0 = covariance();
        // perturb lower triangle entries and their symmetric counterparts together
        let lower: Vec<(usize, usize)> = (0..3).flat_map(|i| (0..=i).map(move |j| (i, j))).collect();
        let build = |x: &Vec<f64>| {
            let mut k = k0.clone();
            for (v, (i, j)) in x.iter().zip(lower.iter()) {
                k[[*i, *j]] = *v;
                k[[*j, *i]] = *v;
            }
            k
        };
        let x: Vec<f64> = lower.iter().map(|(i, j)| k0[[*i, *j]]).collect();
        let f = |x: &Vec<f64>| -> f64 { log_density(&y, &build(x)).unwrap() };
        let grad_central = x.central_diff(&f);

        let grad = log_density_grad(&y, &k0).unwrap();
        for (g, (i, j)) in grad_central.iter().zip(lower.iter()) {
            let expected = if i == j {
                grad[[*i, *j]]
            } else {
                grad[[*i, *j]] + grad[[*j, *i]]
            };
            assert_abs_diff_eq!(*g, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_custom_op_through_kernel() {
        let z = array![[0.], [0.4], [1.1], [2.]];
        let y = array![0.1, 0.5, 0.2, -0.4];
        let zt = matrix_to_tensor(&z, &Device::Cpu).unwrap();
        let noise = vector_to_tensor(&array![0.05], &Device::Cpu).unwrap();

        let objective = |length: &Tensor| {
            let params: TensorParams = KernelParams::new()
                .with(K_SCALE, array![1.3])
                .to_tensors(&Device::Cpu)
                .unwrap()
                .into_iter()
                .chain([(K_LENGTH.to_string(), length.clone())])
                .collect();
            let k = RbfKernel::default()
                .evaluate(&zt, &zt, &params, &noise, 1e-6)
                .unwrap();
            k.apply_op1(MvnLogDensity::new(&y)).unwrap()
        };

        let length = Var::new(&[0.7], &Device::Cpu).unwrap();
        let value = objective(length.as_tensor());
        let grads = value.backward().unwrap();
        let grad = grads.get(&length).unwrap().to_vec1::<f64>().unwrap();

        let f = |x: &Vec<f64>| -> f64 {
            let length = Tensor::new(x.as_slice(), &Device::Cpu).unwrap();
            objective(&length).to_scalar::<f64>().unwrap()
        };
        let grad_central = vec![0.7].central_diff(&f);
        assert_abs_diff_eq!(grad[0], grad_central[0], epsilon = 1e-6);
    }

    #[test]
    fn test_custom_op_forward_nan() {
        let k = matrix_to_tensor(&array![[1., 2.], [2., 1.]], &Device::Cpu).unwrap();
        let v = k.apply_op1(MvnLogDensity::new(&array![0., 1.])).unwrap();
        assert!(v.to_scalar::<f64>().unwrap().is_nan());
    }

    #[test]
    fn test_sample_moments() {
        let mean = array![1., -1., 0.5];
        let cov = covariance();
        for method in [SamplingMethod::Cholesky, SamplingMethod::EigenValues] {
            let samples = sample(&mean, &cov, 20000, method, &mut RngKey::new(5).rng()).unwrap();
            assert_eq!(samples.dim(), (20000, 3));
            let m = samples.mean_axis(Axis(0)).unwrap();
            assert_abs_diff_eq!(m, mean, epsilon = 0.05);
            let centered = &samples - &m;
            let c = centered.t().dot(&centered) / 20000.;
            assert_abs_diff_eq!(c, cov, epsilon = 0.1);
        }
    }

    #[test]
    fn test_sample_singular_covariance() {
        let u = Array::linspace(1., 3., 3).insert_axis(Axis(1));
        let cov = u.dot(&u.t());
        let mean = Array1::zeros(3);
        assert!(sample(&mean, &cov, 10, SamplingMethod::Cholesky, &mut RngKey::new(0).rng()).is_err());
        let samples =
            sample(&mean, &cov, 10, SamplingMethod::EigenValues, &mut RngKey::new(0).rng()).unwrap();
        // draws lie on the span of u
        for s in samples.rows() {
            assert_abs_diff_eq!(s[1], 2. * s[0], epsilon = 1e-6);
            assert_abs_diff_eq!(s[2], 3. * s[0], epsilon = 1e-6);
        }
    }
}
