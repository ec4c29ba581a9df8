use crate::errors::{DklError, Result};
use crate::feature_extractor::{FeatureExtractor, MlpExtractor};
use crate::guide::DeltaGuide;
use crate::hyperparameters::KernelParams;
use crate::kernels::{KernelEvaluator, RbfKernel};
use crate::mvn;
use crate::parameters::{DklParams, DklValidParams};
use crate::predictor::PosteriorFactor;
use crate::rng::RngKey;
use crate::svi;
use crate::utils::{as_2d, check_ncols, matrix_to_tensor, tensor_to_matrix};

use candle_core::{DType, Device};
use candle_nn::{Module, VarBuilder, VarMap};
use linfa::ParamGuard;
use ndarray::{stack, Array1, Array2, Array3, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Dimension, Ix1};

use log::{debug, info};
use rayon::prelude::*;
use std::fmt;

/// Default number of optimization steps
pub const DKL_DEFAULT_NUM_STEPS: usize = 1000;
/// Default number of samples drawn from the predictive posterior
pub const DKL_DEFAULT_N_SAMPLES: usize = 1000;
/// Default jitter added to the kernel matrix diagonal
pub const DKL_DEFAULT_JITTER: f64 = 1e-6;
/// Lowest jitter accepted by the parameter check
pub const DKL_MIN_JITTER: f64 = f64::EPSILON;

/// State computed at the end of a successful fit
#[derive(Debug)]
struct FittedState {
    /// Training inputs (n, nx)
    x_train: Array2<f64>,
    /// Training outputs (n,)
    y_train: Array1<f64>,
    /// Point estimates of kernel hyperparameters and noise
    kernel_params: KernelParams,
    /// Loss (negative ELBO) at each optimization step
    losses: Vec<f64>,
    /// Training side of the posterior for `kernel_params`
    factor: PosteriorFactor,
}

/// Deep kernel learning model: a GP regressor whose kernel is evaluated on
/// the embedding of the inputs computed by a neural feature extractor.
///
/// Network weights, kernel hyperparameters and noise are fitted jointly by
/// stochastic variational inference with a point mass guide.
///
/// # Example
///
/// ```no_run
/// use egobox_dkl::{RngKey, ViDkl, DeepKernelLearning};
/// use ndarray::Array;
///
/// let xt = Array::linspace(-3., 3., 30);
/// let yt = xt.mapv(f64::sin);
///
/// let mut dkl = DeepKernelLearning::new(ViDkl::params(1, 2)).expect("DKL model");
/// let (key, predict_key) = RngKey::new(0).split();
/// dkl.fit(key, &xt, &yt, 1000, true).expect("DKL fitted");
///
/// let xtest = Array::linspace(-3., 3., 10);
/// let (mean, samples) = dkl.predict(predict_key, &xtest, None, 500).expect("DKL prediction");
/// ```
pub struct DeepKernelLearning<K: KernelEvaluator, E: FeatureExtractor> {
    /// Parameters used to fit this model
    params: DklValidParams<K, E>,
    /// Feature extractor weights
    varmap: VarMap,
    /// Feature extractor built on `varmap` weights
    network: E::Module,
    /// Present after a successful fit
    fitted: Option<FittedState>,
}

/// viDKL: DKL with MLP feature extractor and RBF kernel by default
pub type ViDkl = DklParams<RbfKernel, MlpExtractor>;

impl ViDkl {
    /// DKL parameters for `input_dim` features embedded in `z_dim` latent components
    pub fn params(input_dim: usize, z_dim: usize) -> ViDkl {
        DklParams::new(RbfKernel::default(), MlpExtractor::new(input_dim, z_dim))
    }
}

impl<K: KernelEvaluator, E: FeatureExtractor> fmt::Display for DeepKernelLearning<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DKL(kernel={}, extractor={}, jitter={})",
            self.params.kernel(),
            self.params.extractor(),
            self.params.jitter()
        )?;
        if let Some(fitted) = &self.fitted {
            write!(f, "\n{}", fitted.kernel_params)?;
        }
        Ok(())
    }
}

impl<K: KernelEvaluator, E: FeatureExtractor> DeepKernelLearning<K, E> {
    /// DKL parameters constructor
    pub fn params(kernel: K, extractor: E) -> DklParams<K, E> {
        DklParams::new(kernel, extractor)
    }

    /// Create an unfitted model from `params`, network weights are
    /// initialized from the default key.
    pub fn new(params: DklParams<K, E>) -> Result<Self> {
        let params = params.check()?;
        let mut varmap = VarMap::new();
        params
            .extractor()
            .init_weights(&mut varmap, RngKey::default())?;
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let network = params.extractor().build(vb)?;
        Ok(DeepKernelLearning {
            params,
            varmap,
            network,
            fitted: None,
        })
    }

    /// Fit network weights, kernel hyperparameters and noise to training
    /// data `x` (n, nx) and `y` (n,) with `num_steps` optimization steps.
    /// One dimensional `x` is taken as n points of one component.
    ///
    /// Network weights are reinitialized from `key`, so fitting twice with
    /// the same key gives the same model.
    /// Returns the inferred hyperparameters, printed when `print_summary` is set.
    pub fn fit(
        &mut self,
        key: RngKey,
        x: &ArrayBase<impl Data<Elem = f64>, impl Dimension>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        num_steps: usize,
        print_summary: bool,
    ) -> Result<&KernelParams> {
        self.fitted = None;
        let x = as_2d(x)?;
        check_ncols("x", &x, self.params.extractor().input_dim())?;
        if y.len() != x.nrows() {
            return Err(DklError::DimensionMismatch {
                what: "y".to_string(),
                expected: x.nrows(),
                actual: y.len(),
            });
        }
        if x.nrows() == 0 {
            return Err(DklError::InvalidValueError(
                "Training data should not be empty".to_string(),
            ));
        }
        if !(x.iter().all(|v| v.is_finite()) && y.iter().all(|v| v.is_finite())) {
            return Err(DklError::InvalidValueError(
                "Training data should be finite".to_string(),
            ));
        }
        let y = y.to_owned();

        let (init_key, svi_key) = key.split();
        self.params
            .extractor()
            .init_weights(&mut self.varmap, init_key)?;
        let guide = DeltaGuide::new(&self.params.site_priors(), &Device::Cpu)?;
        debug!(
            "Fit {} on {} points with {num_steps} steps",
            self.params.extractor(),
            x.nrows()
        );
        let losses = svi::run(
            &self.params,
            &self.network,
            self.varmap.all_vars(),
            &guide,
            &matrix_to_tensor(&x, &Device::Cpu)?,
            &y,
            num_steps,
            svi_key,
        )?;

        let kernel_params = guide.median()?;
        let factor = PosteriorFactor::new(
            self.params.kernel(),
            self.embed_matrix(&x)?,
            &y,
            &kernel_params,
            self.params.jitter(),
        )?;
        if let Some(loss) = losses.last() {
            info!("DKL fitted with final loss {loss}");
        }
        if print_summary {
            println!("\n{kernel_params}");
        }
        let fitted = self.fitted.insert(FittedState {
            x_train: x,
            y_train: y,
            kernel_params,
            losses,
            factor,
        });
        Ok(&fitted.kernel_params)
    }

    /// Predict at `x_new` (n_test, nx) points: returns the posterior mean (n_test,)
    /// and `n` samples of the posterior as a (n, n_test) matrix.
    ///
    /// Fitted hyperparameters are used unless `kernel_params` is given.
    pub fn predict(
        &self,
        key: RngKey,
        x_new: &ArrayBase<impl Data<Elem = f64>, impl Dimension>,
        kernel_params: Option<&KernelParams>,
        n: usize,
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        let fitted = self.fitted()?;
        let params = kernel_params.unwrap_or(&fitted.kernel_params);
        let (mean, cov) = self.get_mvn_posterior(x_new, params)?;
        let samples = mvn::sample(
            &mean,
            &cov,
            n,
            self.params.sampling_method(),
            &mut key.rng(),
        )?;
        Ok((mean, samples))
    }

    /// Mean (n_test,) and covariance (n_test, n_test) of the posterior
    /// at `x_test` points for the given hyperparameters.
    pub fn get_mvn_posterior(
        &self,
        x_test: &ArrayBase<impl Data<Elem = f64>, impl Dimension>,
        params: &KernelParams,
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        let fitted = self.fitted()?;
        let z_test = self.embed(x_test)?;
        if fitted.factor.params() == params {
            fitted
                .factor
                .mvn_posterior(self.params.kernel(), &z_test, self.params.jitter())
        } else {
            PosteriorFactor::new(
                self.params.kernel(),
                self.embed_matrix(&fitted.x_train)?,
                &fitted.y_train,
                params,
                self.params.jitter(),
            )?
            .mvn_posterior(self.params.kernel(), &z_test, self.params.jitter())
        }
    }

    /// Predict at `x_new` points for each set of hyperparameters of `samples`.
    /// Returns posterior means (n_params, n_test) and posterior samples
    /// (n_params, n, n_test). Hyperparameter sets are processed in parallel.
    pub fn predict_with_samples(
        &self,
        key: RngKey,
        x_new: &ArrayBase<impl Data<Elem = f64>, impl Dimension>,
        samples: &[KernelParams],
        n: usize,
    ) -> Result<(Array2<f64>, Array3<f64>)> {
        self.fitted()?;
        let x_new = as_2d(x_new)?;
        if samples.is_empty() {
            check_ncols("x", &x_new, self.params.extractor().input_dim())?;
            let n_test = x_new.nrows();
            return Ok((Array2::zeros((0, n_test)), Array3::zeros((0, n, n_test))));
        }
        let keys = key.split_n(samples.len());
        let predictions = samples
            .par_iter()
            .zip(keys.into_par_iter())
            .map(|(params, key)| self.predict(key, &x_new, Some(params), n))
            .collect::<Result<Vec<_>>>()?;
        let means: Vec<ArrayView1<f64>> = predictions.iter().map(|(m, _)| m.view()).collect();
        let draws: Vec<ArrayView2<f64>> = predictions.iter().map(|(_, s)| s.view()).collect();
        let means = stack(Axis(0), &means).map_err(|e| DklError::InvalidValueError(e.to_string()))?;
        let draws = stack(Axis(0), &draws).map_err(|e| DklError::InvalidValueError(e.to_string()))?;
        Ok((means, draws))
    }

    /// Embed `x` (n, nx) points in the latent space with the current
    /// network weights. Returns a (n, latent_dim) matrix.
    pub fn embed(&self, x: &ArrayBase<impl Data<Elem = f64>, impl Dimension>) -> Result<Array2<f64>> {
        let x = as_2d(x)?;
        check_ncols("x", &x, self.params.extractor().input_dim())?;
        self.embed_matrix(&x)
    }

    /// Fitted hyperparameters if any
    pub fn kernel_params(&self) -> Option<&KernelParams> {
        self.fitted.as_ref().map(|f| &f.kernel_params)
    }

    /// Loss at each step of the last successful fit if any
    pub fn losses(&self) -> Option<&[f64]> {
        self.fitted.as_ref().map(|f| f.losses.as_slice())
    }

    /// Training data of the last successful fit if any
    pub fn training_data(&self) -> Option<(&Array2<f64>, &Array1<f64>)> {
        self.fitted.as_ref().map(|f| (&f.x_train, &f.y_train))
    }

    /// Parameters of the model
    pub fn params_ref(&self) -> &DklValidParams<K, E> {
        &self.params
    }

    /// Retrieve input and latent dimensions
    pub fn dims(&self) -> (usize, usize) {
        (
            self.params.extractor().input_dim(),
            self.params.extractor().latent_dim(),
        )
    }

    fn fitted(&self) -> Result<&FittedState> {
        self.fitted.as_ref().ok_or(DklError::NotFitted)
    }

    fn embed_matrix(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let z = self.network.forward(&matrix_to_tensor(x, &Device::Cpu)?)?;
        Ok(tensor_to_matrix(&z)?)
    }
}
