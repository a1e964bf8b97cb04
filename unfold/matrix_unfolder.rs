//! # Discrete unfolding
//!
//! [`MatrixUnfolder`] runs the full pipeline for a kernel matrix, a data
//! vector and its errors:
//!
//! 1.  Validate shapes against the regularization set and normalize the data
//!     errors into a precision matrix `Σ⁻¹`.
//! 2.  Form the weighted normal equations `B = Kᵀ Σ⁻¹ K`, `b = Kᵀ Σ⁻¹ y`.
//! 3.  Resolve the alphas, either verbatim (`User`) or by maximizing the
//!     evidence (`EmpiricalBayes`).
//! 4.  Solve the regularized system and package the result.
//!
//! A solve never mutates its configuration; the chosen alphas are returned in
//! the [`SolveResult`].

use crate::config::{AlphaStrategy, ConfigError, UnfolderConfig};
use crate::covariance::{CovarianceError, DataErrors};
use crate::evidence::{EvidenceState, optimize_alphas};
use crate::linalg::{symmetrize_in_place, trace_product};
use crate::observer::{LogObserver, SolveObserver, SolveStart, SolveSummary, SolveWarning};
use crate::solver::PenalizedSystem;
use crate::unfolder::ProjectionError;
use crate::validation::{DimensionError, common_dimension};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::error::LinalgError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every failure an unfolding call can surface.
///
/// Singular regularized systems and optimizer non-convergence are not in
/// this list; they are absorbed into the result and reported as warnings.
#[derive(Error, Debug)]
pub enum UnfoldError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Incompatible dimensions: {0}")]
    Dimension(#[from] DimensionError),

    #[error("Invalid data errors: {0}")]
    Covariance(#[from] CovarianceError),

    #[error("Basis projection failed: {0}")]
    Projection(#[from] ProjectionError),

    #[error("A dense linear algebra routine failed: {0}")]
    Linalg(#[from] LinalgError),
}

/// Optimizer bookkeeping attached to Empirical Bayes results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerReport {
    pub converged: bool,
    pub iterations: Option<usize>,
    pub evaluations: usize,
}

/// Goodness-of-fit information for a solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveDiagnostics {
    /// `log p(y | α)` up to an alpha-independent constant.
    pub log_evidence: f64,
    /// `tr(Ba⁺ B)`: the number of coefficients the data actually determine.
    pub effective_dof: f64,
    /// `(y − Kx)ᵀ Σ⁻¹ (y − Kx)`.
    pub chi_squared: f64,
    /// Present for Empirical Bayes solves only.
    pub optimizer: Option<OptimizerReport>,
}

/// Output of a single solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub coefficients: Array1<f64>,
    pub covariance: Array2<f64>,
    pub alphas: Array1<f64>,
    pub diagnostics: SolveDiagnostics,
}

impl SolveResult {
    /// `√diag(C)`.
    pub fn standard_errors(&self) -> Array1<f64> {
        self.covariance.diag().mapv(|v| v.max(0.0).sqrt())
    }

    /// Correlation matrix `C_ij / (σ_i σ_j)`; entries with zero variance are zero.
    pub fn correlation(&self) -> Array2<f64> {
        let sigma = self.standard_errors();
        let n = sigma.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            let denom = sigma[i] * sigma[j];
            if denom > 0.0 {
                self.covariance[[i, j]] / denom
            } else {
                0.0
            }
        })
    }

    /// Predicted observations `K x` for a kernel with matching column count.
    pub fn refold(&self, kernel: ArrayView2<f64>) -> Result<Array1<f64>, DimensionError> {
        if kernel.ncols() != self.coefficients.len() {
            return Err(DimensionError::KernelColumns {
                expected: self.coefficients.len(),
                found: kernel.ncols(),
            });
        }
        Ok(kernel.dot(&self.coefficients))
    }
}

/// Returns `(B, b) = (Kᵀ W K, Kᵀ W y)` with `B` symmetrized.
pub fn normal_equations(
    kernel: ArrayView2<f64>,
    data: ArrayView1<f64>,
    precision: ArrayView2<f64>,
) -> (Array2<f64>, Array1<f64>) {
    let kt_w = kernel.t().dot(&precision);
    let mut b_matrix = kt_w.dot(&kernel);
    symmetrize_in_place(&mut b_matrix);
    let b_vector = kt_w.dot(&data);
    (b_matrix, b_vector)
}

/// Unfolds discrete kernel/data/error triples under a fixed configuration.
#[derive(Debug, Clone)]
pub struct MatrixUnfolder {
    config: UnfolderConfig,
}

impl MatrixUnfolder {
    pub fn new(config: UnfolderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UnfolderConfig {
        &self.config
    }

    /// Solves with diagnostics forwarded to the `log` facade.
    pub fn solve(
        &self,
        kernel: ArrayView2<f64>,
        data: ArrayView1<f64>,
        errors: &DataErrors,
    ) -> Result<SolveResult, UnfoldError> {
        self.solve_with_observer(kernel, data, errors, &mut LogObserver)
    }

    pub fn solve_with_observer(
        &self,
        kernel: ArrayView2<f64>,
        data: ArrayView1<f64>,
        errors: &DataErrors,
        observer: &mut dyn SolveObserver,
    ) -> Result<SolveResult, UnfoldError> {
        let n = self.config.dim();
        let m = common_dimension(kernel, data, errors, n)?;
        let precision = errors.to_precision()?;

        observer.on_start(&SolveStart {
            method: self.config.method(),
            num_observations: m,
            num_coefficients: n,
            num_alphas: self.config.num_alphas(),
        });

        let (b_matrix, b_vector) = normal_equations(kernel, data, precision.view());
        let system = PenalizedSystem::new(b_matrix, b_vector, self.config.regularization());

        let (alphas, optimizer) = match self.config.strategy() {
            AlphaStrategy::User { alphas } => (alphas.clone(), None),
            AlphaStrategy::EmpiricalBayes {
                bounds,
                alpha0,
                options,
            } => {
                let estimate = optimize_alphas(&system, bounds, alpha0.view(), options, observer);
                let report = OptimizerReport {
                    converged: estimate.converged,
                    iterations: estimate.iterations,
                    evaluations: estimate.evaluations,
                };
                (estimate.alphas, Some(report))
            }
        };

        let solution = system.solve(alphas.view())?;
        if solution.rank < n {
            observer.on_warn(&SolveWarning::SingularPosterior {
                rank: solution.rank,
                dim: n,
            });
        }

        let log_evidence = EvidenceState::new(&system).log_evidence(alphas.view())?;
        let effective_dof = trace_product(solution.covariance.view(), system.b_matrix());
        let residual = &data - &kernel.dot(&solution.coefficients);
        let chi_squared = residual.dot(&precision.dot(&residual));

        observer.on_complete(&SolveSummary {
            alphas: alphas.clone(),
            log_evidence,
            effective_dof,
        });

        Ok(SolveResult {
            coefficients: solution.coefficients,
            covariance: solution.covariance,
            alphas,
            diagnostics: SolveDiagnostics {
                log_evidence,
                effective_dof,
                chi_squared,
                optimizer,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Method;
    use crate::observer::RecordingObserver;
    use crate::regularization::{RegularizationSet, identity};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn ridge_config(alphas: Vec<f64>) -> UnfolderConfig {
        let set = RegularizationSet::new(vec![identity(2)]).unwrap();
        UnfolderConfig::user(set, alphas).unwrap()
    }

    #[test]
    fn normal_equations_weight_by_precision() {
        let kernel = array![[1.0, 0.0], [1.0, 1.0], [0.0, 2.0]];
        let data = array![1.0, 2.0, 3.0];
        let precision = Array2::from_diag(&array![1.0, 0.5, 2.0]);
        let (b_matrix, b_vector) = normal_equations(kernel.view(), data.view(), precision.view());
        assert_eq!(b_matrix, array![[1.5, 0.5], [0.5, 8.5]]);
        assert_eq!(b_vector, array![2.0, 13.0]);
    }

    #[test]
    fn user_method_skips_optimizer_and_reports_fit() {
        let unfolder = MatrixUnfolder::new(ridge_config(vec![1.0]));
        let mut observer = RecordingObserver::default();
        let result = unfolder
            .solve_with_observer(
                Array2::<f64>::eye(2).view(),
                array![1.0, 2.0].view(),
                &DataErrors::from(array![1.0, 1.0]),
                &mut observer,
            )
            .unwrap();

        assert_eq!(result.alphas, array![1.0]);
        assert!(result.diagnostics.optimizer.is_none());
        assert_abs_diff_eq!(result.diagnostics.effective_dof, 1.0, epsilon = 1e-12);
        // Residual is y/2 = [0.5, 1.0].
        assert_abs_diff_eq!(result.diagnostics.chi_squared, 1.25, epsilon = 1e-12);
        assert_eq!(observer.starts.len(), 1);
        assert_eq!(observer.starts[0].method, Method::User);
        assert_eq!(observer.summaries.len(), 1);
        assert!(observer.warnings.is_empty());
    }

    #[test]
    fn singular_system_is_reported_not_raised() {
        // Kernel sees only the sum of the two coefficients and alpha is zero.
        let unfolder = MatrixUnfolder::new(ridge_config(vec![0.0]));
        let mut observer = RecordingObserver::default();
        let result = unfolder
            .solve_with_observer(
                array![[1.0, 1.0]].view(),
                array![2.0].view(),
                &DataErrors::from(array![1.0]),
                &mut observer,
            )
            .unwrap();
        assert!(result.coefficients.abs_diff_eq(&array![1.0, 1.0], 1e-10));
        assert!(matches!(
            observer.warnings.as_slice(),
            [SolveWarning::SingularPosterior { rank: 1, dim: 2 }]
        ));
    }

    #[test]
    fn dimension_errors_abort_before_numerics() {
        let unfolder = MatrixUnfolder::new(ridge_config(vec![1.0]));
        let mut observer = RecordingObserver::default();
        let err = unfolder
            .solve_with_observer(
                Array2::<f64>::eye(3).view(),
                array![1.0, 2.0, 3.0].view(),
                &DataErrors::from(array![1.0, 1.0, 1.0]),
                &mut observer,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            UnfoldError::Dimension(DimensionError::KernelColumns { expected: 2, found: 3 })
        ));
        assert!(observer.starts.is_empty());
    }

    #[test]
    fn result_helpers_derive_from_covariance() {
        let result = SolveResult {
            coefficients: array![1.0, 2.0],
            covariance: array![[4.0, 1.0], [1.0, 1.0]],
            alphas: array![0.0],
            diagnostics: SolveDiagnostics {
                log_evidence: 0.0,
                effective_dof: 2.0,
                chi_squared: 0.0,
                optimizer: None,
            },
        };
        assert_eq!(result.standard_errors(), array![2.0, 1.0]);
        let corr = result.correlation();
        assert_abs_diff_eq!(corr[[0, 1]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(corr[[1, 1]], 1.0, epsilon = 1e-12);
        assert_eq!(
            result.refold(array![[1.0, 1.0]].view()).unwrap(),
            array![3.0]
        );
        assert!(result.refold(array![[1.0]].view()).is_err());
    }
}
