//! TOML description of a discrete unfolding problem.
//!
//! ```toml
//! kernel = [[1.0, 0.0], [0.0, 1.0]]
//! data = [1.0, 2.0]
//!
//! [errors]
//! variances = [1.0, 1.0]
//!
//! [[regularization]]
//! kind = "difference"
//! order = 1
//!
//! [config]
//! method = "EmpiricalBayes"
//! ```

use crate::config::{ConfigError, ConfigSpec, UnfolderConfig};
use crate::covariance::DataErrors;
use crate::regularization::{RegularizationSet, difference_penalty, identity};
use crate::unfolder::DiscreteInputs;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProblemError {
    #[error("Failed to read problem file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse problem file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("The {field} matrix has ragged rows: row {row} has {found} entries, expected {expected}.")]
    RaggedMatrix {
        field: String,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Matrix shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("The problem file defines no regularization terms and the kernel has no columns to size a default.")]
    NoRegularization,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSpec {
    Variances(Vec<f64>),
    Covariance(Vec<Vec<f64>>),
}

/// One regularization matrix, either explicit or generated at the kernel's width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegularizationSpec {
    Identity,
    Difference { order: usize },
    Matrix { values: Vec<Vec<f64>> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProblemFile {
    pub kernel: Vec<Vec<f64>>,
    pub data: Vec<f64>,
    pub errors: ErrorSpec,
    /// Defaults to a single identity matrix when absent.
    #[serde(default)]
    pub regularization: Vec<RegularizationSpec>,
    #[serde(default)]
    pub config: ConfigSpec,
}

impl ProblemFile {
    pub fn load(path: &Path) -> Result<Self, ProblemError> {
        let text = std::fs::read_to_string(path).map_err(|source| ProblemError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ProblemError> {
        Ok(toml::from_str(text)?)
    }

    pub fn inputs(&self) -> Result<DiscreteInputs, ProblemError> {
        let kernel = to_matrix("kernel", &self.kernel)?;
        let errors = match &self.errors {
            ErrorSpec::Variances(v) => DataErrors::Variances(Array1::from_vec(v.clone())),
            ErrorSpec::Covariance(rows) => DataErrors::Covariance(to_matrix("covariance", rows)?),
        };
        Ok(DiscreteInputs {
            kernel,
            data: Array1::from_vec(self.data.clone()),
            errors,
        })
    }

    /// Builds the regularization set sized to the kernel's column count.
    pub fn regularization_set(&self) -> Result<RegularizationSet, ProblemError> {
        let n = self.kernel.first().map_or(0, Vec::len);
        if self.regularization.is_empty() {
            if n == 0 {
                return Err(ProblemError::NoRegularization);
            }
            return Ok(RegularizationSet::new(vec![identity(n)])?);
        }
        let omegas = self
            .regularization
            .iter()
            .enumerate()
            .map(|(i, spec)| match spec {
                RegularizationSpec::Identity => Ok(identity(n)),
                RegularizationSpec::Difference { order } => Ok(difference_penalty(n, *order)?),
                RegularizationSpec::Matrix { values } => {
                    to_matrix(&format!("regularization[{i}]"), values)
                }
            })
            .collect::<Result<Vec<_>, ProblemError>>()?;
        Ok(RegularizationSet::new(omegas)?)
    }

    pub fn unfolder_config(&self) -> Result<UnfolderConfig, ProblemError> {
        Ok(self.config.clone().build(self.regularization_set()?)?)
    }
}

fn to_matrix(field: &str, rows: &[Vec<f64>]) -> Result<Array2<f64>, ProblemError> {
    let ncols = rows.first().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(rows.len() * ncols);
    for (row, values) in rows.iter().enumerate() {
        if values.len() != ncols {
            return Err(ProblemError::RaggedMatrix {
                field: field.to_string(),
                row,
                expected: ncols,
                found: values.len(),
            });
        }
        flat.extend_from_slice(values);
    }
    Ok(Array2::from_shape_vec((rows.len(), ncols), flat)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Method;
    use ndarray::array;

    const PROBLEM: &str = r#"
kernel = [[1.0, 0.0, 0.0], [0.5, 1.0, 0.0], [0.0, 0.5, 1.0]]
data = [1.0, 2.0, 3.0]

[errors]
covariance = [[1.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]]

[[regularization]]
kind = "identity"

[[regularization]]
kind = "difference"
order = 2

[config]
method = "user"
alphas = [0.1, 1.0]
"#;

    #[test]
    fn parses_every_section() {
        let problem = ProblemFile::from_toml_str(PROBLEM).unwrap();
        let inputs = problem.inputs().unwrap();
        assert_eq!(inputs.kernel.dim(), (3, 3));
        assert_eq!(inputs.kernel[[1, 0]], 0.5);
        assert!(matches!(inputs.errors, DataErrors::Covariance(ref c) if c[[1, 1]] == 2.0));

        let set = problem.regularization_set().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.omegas()[1], array![[1.0, -2.0, 1.0], [-2.0, 4.0, -2.0], [1.0, -2.0, 1.0]]);

        let config = problem.unfolder_config().unwrap();
        assert_eq!(config.method(), Method::User);
    }

    #[test]
    fn missing_regularization_defaults_to_identity() {
        let problem = ProblemFile::from_toml_str(
            "kernel = [[1.0, 0.0], [0.0, 1.0]]\ndata = [1.0, 2.0]\nerrors = { variances = [1.0, 1.0] }\n",
        )
        .unwrap();
        let set = problem.regularization_set().unwrap();
        assert_eq!(set.omegas(), &[identity(2)]);
        assert_eq!(problem.unfolder_config().unwrap().method(), Method::EmpiricalBayes);
    }

    #[test]
    fn ragged_kernel_is_rejected() {
        let problem = ProblemFile::from_toml_str(
            "kernel = [[1.0, 0.0], [1.0]]\ndata = [1.0, 2.0]\nerrors = { variances = [1.0, 1.0] }\n",
        )
        .unwrap();
        assert!(matches!(
            problem.inputs(),
            Err(ProblemError::RaggedMatrix { row: 1, expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn unknown_method_is_a_config_error() {
        let text = PROBLEM.replace("method = \"user\"", "method = \"gcv\"");
        let problem = ProblemFile::from_toml_str(&text).unwrap();
        assert!(matches!(
            problem.unfolder_config(),
            Err(ProblemError::Config(ConfigError::UnknownMethod(ref m))) if m == "gcv"
        ));
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        let text = format!("{PROBLEM}\nextra = 1\n");
        // `extra` lands inside [config], which denies unknown fields.
        assert!(matches!(
            ProblemFile::from_toml_str(&text),
            Err(ProblemError::Parse(_))
        ));
    }
}
