//! Shape checks for kernel, data and data errors.

use crate::covariance::DataErrors;
use ndarray::{ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DimensionError {
    #[error("The data vector is empty.")]
    EmptyData,

    #[error("The kernel has {found} columns, but the regularization matrices are {expected} x {expected}.")]
    KernelColumns { expected: usize, found: usize },

    #[error("The kernel has {kernel_rows} rows, but the data vector has {data_len} entries.")]
    KernelRows { kernel_rows: usize, data_len: usize },

    #[error("The data errors describe {found} observations, but the data vector has {expected}.")]
    ErrorLength { expected: usize, found: usize },

    #[error("The data covariance is not square ({rows} x {cols}).")]
    NonSquareCovariance { rows: usize, cols: usize },

    #[error("The {0} contains non-finite values.")]
    NonFinite(&'static str),

    #[error("Continuous inputs require at least one evaluation point.")]
    MissingEvaluationPoints,

    #[error("The basis projector produces {found} coefficients, but the regularization matrices are {expected} x {expected}.")]
    BasisSize { expected: usize, found: usize },
}

/// Validates that kernel, data and errors agree with each other and with `n`.
///
/// Returns the common observation count `m`.
pub fn common_dimension(
    kernel: ArrayView2<f64>,
    data: ArrayView1<f64>,
    errors: &DataErrors,
    n: usize,
) -> Result<usize, DimensionError> {
    let m = data.len();
    if m == 0 {
        return Err(DimensionError::EmptyData);
    }
    if kernel.ncols() != n {
        return Err(DimensionError::KernelColumns {
            expected: n,
            found: kernel.ncols(),
        });
    }
    if kernel.nrows() != m {
        return Err(DimensionError::KernelRows {
            kernel_rows: kernel.nrows(),
            data_len: m,
        });
    }
    if let DataErrors::Covariance(c) = errors
        && c.nrows() != c.ncols()
    {
        return Err(DimensionError::NonSquareCovariance {
            rows: c.nrows(),
            cols: c.ncols(),
        });
    }
    if errors.len() != m {
        return Err(DimensionError::ErrorLength {
            expected: m,
            found: errors.len(),
        });
    }
    if !kernel.iter().all(|v| v.is_finite()) {
        return Err(DimensionError::NonFinite("kernel"));
    }
    if !data.iter().all(|v| v.is_finite()) {
        return Err(DimensionError::NonFinite("data vector"));
    }
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn consistent_shapes_yield_observation_count() {
        let kernel = Array2::<f64>::eye(3);
        let data = array![1.0, 2.0, 3.0];
        let errors = DataErrors::from(array![1.0, 1.0, 1.0]);
        assert_eq!(common_dimension(kernel.view(), data.view(), &errors, 3), Ok(3));
    }

    #[test]
    fn each_mismatch_is_reported() {
        let kernel = Array2::<f64>::zeros((2, 3));
        let data = array![1.0, 2.0];
        let variances = DataErrors::from(array![1.0, 1.0]);

        assert_eq!(
            common_dimension(kernel.view(), data.view(), &variances, 4),
            Err(DimensionError::KernelColumns { expected: 4, found: 3 })
        );
        assert_eq!(
            common_dimension(kernel.view(), array![1.0].view(), &variances, 3),
            Err(DimensionError::KernelRows { kernel_rows: 2, data_len: 1 })
        );
        assert_eq!(
            common_dimension(kernel.view(), data.view(), &DataErrors::from(array![1.0]), 3),
            Err(DimensionError::ErrorLength { expected: 2, found: 1 })
        );
        assert_eq!(
            common_dimension(
                kernel.view(),
                data.view(),
                &DataErrors::from(Array2::<f64>::zeros((2, 3))),
                3
            ),
            Err(DimensionError::NonSquareCovariance { rows: 2, cols: 3 })
        );
        assert_eq!(
            common_dimension(kernel.view(), array![1.0, f64::NAN].view(), &variances, 3),
            Err(DimensionError::NonFinite("data vector"))
        );
    }
}
