//! GP posterior predictive computations on embedded points.
//!
//! The training side of the posterior (Cholesky factor of the training
//! kernel matrix and whitened targets) only depends on the training data
//! and the hyperparameters, it is computed once by [`PosteriorFactor::new`]
//! and reused for any set of test points.

use crate::errors::{DklError, Result};
use crate::hyperparameters::{KernelParams, TensorParams};
use crate::kernels::KernelEvaluator;
use crate::mvn::{cholesky, solve_lower};
use crate::utils::{matrix_to_tensor, tensor_to_matrix, vector_to_tensor};
use candle_core::Device;
use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};

/// Kernel hyperparameters and noise as tensors, checked against `kernel` requirements
fn kernel_tensors<K: KernelEvaluator>(
    kernel: &K,
    latent_dim: usize,
    params: &KernelParams,
) -> Result<(TensorParams, f64)> {
    if !params.is_finite() {
        return Err(DklError::InvalidValueError(format!(
            "Kernel parameters should be finite, got\n{params}"
        )));
    }
    let noise = params.noise().ok_or_else(|| {
        DklError::InvalidValueError("Missing `noise` in kernel parameters".to_string())
    })?;
    if noise < 0. {
        return Err(DklError::InvalidValueError(format!(
            "`noise` should be non negative, got {noise}"
        )));
    }
    for (name, dim) in kernel.hyperparameters(latent_dim) {
        match params.get(name) {
            None => {
                return Err(DklError::InvalidValueError(format!(
                    "Missing `{name}` in kernel parameters for {kernel} kernel"
                )))
            }
            Some(v) if v.len() != 1 && v.len() != dim => {
                return Err(DklError::DimensionMismatch {
                    what: name.to_string(),
                    expected: dim,
                    actual: v.len(),
                })
            }
            Some(v) if v.iter().any(|x| *x <= 0.) => {
                return Err(DklError::InvalidValueError(format!(
                    "`{name}` should be positive, got {v}"
                )))
            }
            _ => (),
        }
    }
    Ok((params.to_tensors(&Device::Cpu)?, noise))
}

/// Kernel matrix k(za, zb), with `noise + jitter` on the diagonal when
/// `diag` is given and both sets have the same size
pub(crate) fn kernel_matrix<K: KernelEvaluator>(
    kernel: &K,
    za: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    zb: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    params: &TensorParams,
    diag: Option<(f64, f64)>,
) -> Result<Array2<f64>> {
    let za = matrix_to_tensor(za, &Device::Cpu)?;
    let zb = matrix_to_tensor(zb, &Device::Cpu)?;
    let k = match diag {
        Some((noise, jitter)) => {
            let noise = vector_to_tensor(&Array1::from_elem(1, noise), &Device::Cpu)?;
            kernel.evaluate(&za, &zb, params, &noise, jitter)?
        }
        None => kernel.covariance(&za, &zb, params)?,
    };
    Ok(tensor_to_matrix(&k)?)
}

/// Training side of the GP posterior for given hyperparameters
#[derive(Clone, Debug)]
pub(crate) struct PosteriorFactor {
    /// Hyperparameters the factorization was computed with
    params: KernelParams,
    /// Embedded training points (n, nz)
    z_train: Array2<f64>,
    /// Lower Cholesky factor L of the training kernel matrix
    chol: Array2<f64>,
    /// Whitened training targets L^-1 y
    y_white: Array1<f64>,
}

impl PosteriorFactor {
    pub fn new<K: KernelEvaluator>(
        kernel: &K,
        z_train: Array2<f64>,
        y_train: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        params: &KernelParams,
        jitter: f64,
    ) -> Result<Self> {
        let (tensors, noise) = kernel_tensors(kernel, z_train.ncols(), params)?;
        let k_xx = kernel_matrix(kernel, &z_train, &z_train, &tensors, Some((noise, jitter)))?;
        let chol = cholesky(&k_xx)?;
        let y_white = solve_lower(&chol, y_train)?;
        Ok(PosteriorFactor {
            params: params.clone(),
            z_train,
            chol,
            y_white,
        })
    }

    /// Hyperparameters of the factorization
    pub fn params(&self) -> &KernelParams {
        &self.params
    }

    /// Mean (n_test,) and covariance (n_test, n_test) of the posterior at `z_test` points
    ///
    /// ```text
    /// mean = k_pX k_XX^-1 y
    /// cov  = k_pp - k_pX k_XX^-1 k_Xp
    /// ```
    pub fn mvn_posterior<K: KernelEvaluator>(
        &self,
        kernel: &K,
        z_test: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        jitter: f64,
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        let (tensors, noise) = kernel_tensors(kernel, self.z_train.ncols(), &self.params)?;
        let k_pp = kernel_matrix(kernel, z_test, z_test, &tensors, Some((noise, jitter)))?;
        let k_px = kernel_matrix(kernel, z_test, &self.z_train, &tensors, None)?;

        // v = L^-1 k_Xp (n_train, n_test)
        let v = self.chol.solve_triangular(&k_px.t(), UPLO::Lower)?;
        let mean = v.t().dot(&self.y_white);
        let cov = k_pp - v.t().dot(&v);
        let cov = (&cov + &cov.t()) * 0.5;
        Ok((mean, cov))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::{K_LENGTH, K_SCALE};
    use crate::kernels::{Matern52Kernel, RbfKernel};
    use approx::assert_abs_diff_eq;
    use linfa_linalg::eigh::*;
    use ndarray::{array, Array};
    use ndarray_stats::QuantileExt;

    fn params(noise: f64) -> KernelParams {
        KernelParams::new()
            .with(K_LENGTH, array![0.5])
            .with(K_SCALE, array![2.])
            .with_noise(noise)
    }

    #[test]
    fn test_posterior_vs_direct_inverse() {
        let kernel = Matern52Kernel::default();
        let z = array![[0.], [0.3], [1.], [1.7]];
        let y = array![0.2, 0.5, -0.1, 0.3];
        let zt = array![[0.1], [0.9], [2.5]];
        let p = params(0.1);
        let factor = PosteriorFactor::new(&kernel, z.clone(), &y, &p, 1e-6).unwrap();
        let (mean, cov) = factor.mvn_posterior(&kernel, &zt, 1e-6).unwrap();

        let (tensors, _) = kernel_tensors(&kernel, 1, &p).unwrap();
        let k_xx = kernel_matrix(&kernel, &z, &z, &tensors, Some((0.1, 1e-6))).unwrap();
        let k_px = kernel_matrix(&kernel, &zt, &z, &tensors, None).unwrap();
        let k_pp = kernel_matrix(&kernel, &zt, &zt, &tensors, Some((0.1, 1e-6))).unwrap();
        let l = cholesky(&k_xx).unwrap();
        let l_inv = l.solve_triangular(&Array2::eye(4), UPLO::Lower).unwrap();
        let k_inv = l_inv.t().dot(&l_inv);

        assert_abs_diff_eq!(mean, k_px.dot(&k_inv).dot(&y), epsilon = 1e-10);
        assert_abs_diff_eq!(cov, k_pp - k_px.dot(&k_inv).dot(&k_px.t()), epsilon = 1e-10);
    }

    #[test]
    fn test_posterior_far_from_data() {
        let kernel = RbfKernel::default();
        let z = array![[0.], [0.5]];
        let factor = PosteriorFactor::new(&kernel, z, &array![1., -1.], &params(0.01), 1e-6).unwrap();
        let (mean, cov) = factor
            .mvn_posterior(&kernel, &array![[100.]], 1e-6)
            .unwrap();
        assert_abs_diff_eq!(mean[0], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 0]], 2. + 0.01 + 1e-6, epsilon = 1e-12);
    }

    #[test]
    fn test_posterior_covariance_psd() {
        let kernel = RbfKernel::default();
        let z = Array::linspace(0., 2., 10).insert_axis(ndarray::Axis(1));
        let y = z.column(0).mapv(f64::cos);
        let zt = Array::linspace(-0.5, 2.5, 15).insert_axis(ndarray::Axis(1));
        let factor = PosteriorFactor::new(&kernel, z, &y, &params(1e-3), 1e-6).unwrap();
        let (_, cov) = factor.mvn_posterior(&kernel, &zt, 1e-6).unwrap();
        assert_abs_diff_eq!(cov, cov.t(), epsilon = 0.);
        let (eigvals, _) = cov.eigh_into().unwrap();
        assert!(*eigvals.min().unwrap() > 0.);
    }

    #[test]
    fn test_missing_parameters() {
        let kernel = RbfKernel::default();
        let z = array![[0.], [0.5]];
        let y = array![1., -1.];
        let no_noise = KernelParams::new()
            .with(K_LENGTH, array![0.5])
            .with(K_SCALE, array![2.]);
        assert!(matches!(
            PosteriorFactor::new(&kernel, z.clone(), &y, &no_noise, 1e-6),
            Err(DklError::InvalidValueError(_))
        ));
        let no_scale = KernelParams::new()
            .with(K_LENGTH, array![0.5])
            .with_noise(0.1);
        assert!(matches!(
            PosteriorFactor::new(&kernel, z.clone(), &y, &no_scale, 1e-6),
            Err(DklError::InvalidValueError(_))
        ));
        let bad_length = params(0.1).with(K_LENGTH, array![0.5, 0.2, 0.1]);
        assert!(matches!(
            PosteriorFactor::new(&kernel, z, &y, &bad_length, 1e-6),
            Err(DklError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_parameter_values() {
        let kernel = RbfKernel::default();
        let z = array![[0.], [0.5]];
        let y = array![1., -1.];
        for p in [
            params(f64::NAN),
            params(-0.1),
            params(0.1).with(K_SCALE, array![-2.]),
            params(0.1).with(K_LENGTH, array![f64::INFINITY]),
            params(0.1).with(K_LENGTH, array![0.]),
        ] {
            assert!(matches!(
                PosteriorFactor::new(&kernel, z.clone(), &y, &p, 1e-6),
                Err(DklError::InvalidValueError(_))
            ));
        }
    }

    #[test]
    fn test_singular_training_kernel() {
        let kernel = RbfKernel::default();
        let z = array![[0.], [0.], [1.]];
        let res = PosteriorFactor::new(&kernel, z.clone(), &array![1., 1., 0.], &params(0.), 0.);
        assert!(matches!(res, Err(DklError::NumericallySingular(_))));
        // jitter restores a usable factor on duplicated points
        let factor = PosteriorFactor::new(&kernel, z, &array![1., 1., 0.], &params(0.), 1e-6).unwrap();
        let (mean, cov) = factor.mvn_posterior(&kernel, &array![[0.]], 1e-6).unwrap();
        assert_abs_diff_eq!(mean[0], 1., epsilon = 1e-3);
        assert!(cov[[0, 0]] > 0.);
    }
}
