use thiserror::Error;

/// A result type for deep kernel learning algorithm
pub type Result<T> = std::result::Result<T, DklError>;

/// An error when using [`DeepKernelLearning`](crate::DeepKernelLearning) algorithm
#[derive(Error, Debug)]
pub enum DklError {
    /// When prediction or fitted state is requested before a successful fit
    #[error("Model not fitted: call `fit` successfully before predicting")]
    NotFitted,
    /// When array dimensions are not consistent
    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Which quantity is inconsistent
        what: String,
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },
    /// When the loss becomes NaN or infinite during optimization
    #[error("Non finite loss value {value} at optimization step {step}")]
    NonFiniteLoss {
        /// Optimization step index
        step: usize,
        /// Loss value
        value: f64,
    },
    /// When the training kernel matrix cannot be factorized
    #[error("Numerically singular kernel: {0}")]
    NumericallySingular(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When tensor computation fails
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
