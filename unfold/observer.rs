use crate::config::Method;
use ndarray::Array1;
use std::fmt;

/// Problem shape reported when a solve begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SolveStart {
    pub method: Method,
    pub num_observations: usize,
    pub num_coefficients: usize,
    pub num_alphas: usize,
}

/// Non-fatal conditions absorbed into a best-effort result.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveWarning {
    /// The Empirical Bayes optimizer stopped before converging; the best
    /// evaluated alphas are used.
    OptimizerNotConverged { evaluations: usize, reason: String },
    /// The evidence could not be evaluated at a trial point.
    EvidenceUnavailable { alphas: Array1<f64>, reason: String },
    /// `B + Σ αᵢ Ωᵢ` is rank deficient; the covariance is a pseudo-inverse.
    SingularPosterior { rank: usize, dim: usize },
}

impl fmt::Display for SolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OptimizerNotConverged { evaluations, reason } => write!(
                f,
                "alpha optimization stopped after {evaluations} evidence evaluations without converging ({reason}); using best alphas found"
            ),
            Self::EvidenceUnavailable { alphas, reason } => {
                write!(f, "evidence could not be evaluated at alphas {alphas}: {reason}")
            }
            Self::SingularPosterior { rank, dim } => write!(
                f,
                "regularized system has rank {rank} < {dim}; covariance is a pseudo-inverse"
            ),
        }
    }
}

/// Outcome reported when a solve finishes.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveSummary {
    pub alphas: Array1<f64>,
    pub log_evidence: f64,
    pub effective_dof: f64,
}

/// Receives diagnostics from a solve. All methods default to no-ops.
pub trait SolveObserver {
    fn on_start(&mut self, start: &SolveStart) {
        let _ = start;
    }
    fn on_warn(&mut self, warning: &SolveWarning) {
        let _ = warning;
    }
    fn on_complete(&mut self, summary: &SolveSummary) {
        let _ = summary;
    }
}

#[derive(Default)]
pub struct NoopObserver;

impl SolveObserver for NoopObserver {}

/// Forwards diagnostics to the `log` facade.
#[derive(Default)]
pub struct LogObserver;

impl SolveObserver for LogObserver {
    fn on_start(&mut self, start: &SolveStart) {
        log::info!(
            "Unfolding {} observations into {} coefficients with {} regularization term(s), method {}.",
            start.num_observations,
            start.num_coefficients,
            start.num_alphas,
            start.method
        );
    }

    fn on_warn(&mut self, warning: &SolveWarning) {
        log::warn!("{warning}");
    }

    fn on_complete(&mut self, summary: &SolveSummary) {
        log::info!(
            "Unfolding complete: alphas = {:?}, log-evidence = {:.6}, effective dof = {:.3}",
            summary.alphas.to_vec(),
            summary.log_evidence,
            summary.effective_dof
        );
    }
}

/// Collects every event; useful for inspecting a solve after the fact.
#[derive(Default, Debug)]
pub struct RecordingObserver {
    pub starts: Vec<SolveStart>,
    pub warnings: Vec<SolveWarning>,
    pub summaries: Vec<SolveSummary>,
}

impl SolveObserver for RecordingObserver {
    fn on_start(&mut self, start: &SolveStart) {
        self.starts.push(*start);
    }
    fn on_warn(&mut self, warning: &SolveWarning) {
        self.warnings.push(warning.clone());
    }
    fn on_complete(&mut self, summary: &SolveSummary) {
        self.summaries.push(summary.clone());
    }
}
