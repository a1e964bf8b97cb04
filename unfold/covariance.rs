//! Normalization of observation uncertainties into a single covariance matrix.

use crate::linalg::symmetrize;
use ndarray::{Array1, Array2};
use ndarray_linalg::InverseC;
use ndarray_linalg::error::LinalgError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Uncertainty attached to the observed data vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataErrors {
    /// Per-point variances; the covariance is `diag(v)`.
    Variances(Array1<f64>),
    /// Full `m × m` covariance matrix.
    Covariance(Array2<f64>),
}

#[derive(Error, Debug)]
pub enum CovarianceError {
    #[error("Variance {index} is {value}; variances must be strictly positive and finite.")]
    InvalidVariance { index: usize, value: f64 },

    #[error("The data covariance contains non-finite entries.")]
    NonFiniteCovariance,

    #[error("The data covariance is not positive definite: {0}")]
    NotPositiveDefinite(LinalgError),
}

impl DataErrors {
    /// Number of observations this representation describes, if it is well formed.
    pub fn len(&self) -> usize {
        match self {
            Self::Variances(v) => v.len(),
            Self::Covariance(c) => c.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the symmetrized `m × m` covariance matrix.
    ///
    /// Shape compatibility with the data is checked by
    /// [`crate::validation::common_dimension`]; this only validates the values.
    pub fn to_covariance(&self) -> Result<Array2<f64>, CovarianceError> {
        match self {
            Self::Variances(v) => {
                check_variances(v)?;
                Ok(Array2::from_diag(v))
            }
            Self::Covariance(c) => {
                if !c.iter().all(|x| x.is_finite()) {
                    return Err(CovarianceError::NonFiniteCovariance);
                }
                Ok(symmetrize(c.view()))
            }
        }
    }

    /// Returns the symmetrized precision matrix `Σ⁻¹`.
    pub fn to_precision(&self) -> Result<Array2<f64>, CovarianceError> {
        match self {
            Self::Variances(v) => {
                check_variances(v)?;
                Ok(Array2::from_diag(&v.mapv(f64::recip)))
            }
            Self::Covariance(_) => {
                let sigma = self.to_covariance()?;
                // Cholesky-based inverse: an indefinite covariance fails here instead of inverting.
                let precision = sigma
                    .invc()
                    .map_err(CovarianceError::NotPositiveDefinite)?;
                Ok(symmetrize(precision.view()))
            }
        }
    }
}

fn check_variances(v: &Array1<f64>) -> Result<(), CovarianceError> {
    for (index, &value) in v.iter().enumerate() {
        if !(value.is_finite() && value > 0.0) {
            return Err(CovarianceError::InvalidVariance { index, value });
        }
    }
    Ok(())
}

impl From<Array1<f64>> for DataErrors {
    fn from(variances: Array1<f64>) -> Self {
        Self::Variances(variances)
    }
}

impl From<Array2<f64>> for DataErrors {
    fn from(covariance: Array2<f64>) -> Self {
        Self::Covariance(covariance)
    }
}
