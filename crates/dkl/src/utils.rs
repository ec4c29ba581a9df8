use crate::errors::{DklError, Result};
use candle_core::{Device, Tensor};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Dimension, Ix1, Ix2};

/// Coerce `x` as a (n, nx) matrix: a one dimensional array is taken as
/// n points of one component.
pub fn as_2d<S, D>(x: &ArrayBase<S, D>) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    match x.ndim() {
        1 => Ok(x.iter().copied().collect::<Array1<_>>().insert_axis(Axis(1))),
        2 => x
            .view()
            .into_dimensionality::<Ix2>()
            .map(|v| v.to_owned())
            .map_err(|e| DklError::InvalidValueError(e.to_string())),
        n => Err(DklError::InvalidValueError(format!(
            "Expected a 1D or 2D array of input points, got a {n}D array"
        ))),
    }
}

/// Check that `x` has the expected number of components
pub(crate) fn check_ncols(
    what: &str,
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    expected: usize,
) -> Result<()> {
    if x.ncols() != expected {
        return Err(DklError::DimensionMismatch {
            what: what.to_string(),
            expected,
            actual: x.ncols(),
        });
    }
    Ok(())
}

/// Copy a (n, m) array into a f64 tensor
pub(crate) fn matrix_to_tensor(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    device: &Device,
) -> candle_core::Result<Tensor> {
    Tensor::from_iter(x.iter().copied(), device)?.reshape(x.dim())
}

/// Copy a (n,) array into a f64 tensor
pub(crate) fn vector_to_tensor(
    x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    device: &Device,
) -> candle_core::Result<Tensor> {
    Tensor::from_iter(x.iter().copied(), device)
}

/// Copy a two dimensional tensor into a (n, m) array
pub(crate) fn tensor_to_matrix(t: &Tensor) -> candle_core::Result<Array2<f64>> {
    let (n, m) = t.dims2()?;
    let values = t.flatten_all()?.to_vec1::<f64>()?;
    Array2::from_shape_vec((n, m), values).map_err(candle_core::Error::wrap)
}

/// Copy a tensor of any shape into a flat (n,) array
pub(crate) fn tensor_to_vector(t: &Tensor) -> candle_core::Result<Array1<f64>> {
    Ok(Array1::from_vec(t.flatten_all()?.to_vec1::<f64>()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_as_2d() {
        let x = array![1., 2., 3.];
        assert_eq!(as_2d(&x).unwrap(), array![[1.], [2.], [3.]]);
        let x = array![[1., 2.], [3., 4.]];
        assert_eq!(as_2d(&x).unwrap(), x);
        assert_eq!(as_2d(&x.t()).unwrap(), array![[1., 3.], [2., 4.]]);
        assert!(as_2d(&Array3::<f64>::zeros((2, 2, 2))).is_err());
    }

    #[test]
    fn test_check_ncols() {
        let x = array![[1., 2.], [3., 4.]];
        assert!(check_ncols("x", &x, 2).is_ok());
        match check_ncols("x", &x, 5) {
            Err(DklError::DimensionMismatch {
                expected, actual, ..
            }) => assert_eq!((expected, actual), (5, 2)),
            _ => panic!("dimension mismatch expected"),
        }
    }

    #[test]
    fn test_tensor_conversions() {
        let x = array![[1., 2., 3.], [4., 5., 6.]];
        let t = matrix_to_tensor(&x.t(), &Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(tensor_to_matrix(&t).unwrap(), x.t());
        let v = array![1., -1.];
        let t = vector_to_tensor(&v, &Device::Cpu).unwrap();
        assert_eq!(tensor_to_vector(&t).unwrap(), v);
    }
}
