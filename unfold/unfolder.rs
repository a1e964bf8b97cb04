//! # Continuous unfolding
//!
//! [`Unfolder`] accepts either discrete arrays or callables for the kernel,
//! data and data errors. Callables are discretized by a [`BasisProjector`]
//! at caller-supplied evaluation points; the resulting arrays, like discrete
//! inputs, go straight to [`MatrixUnfolder`]. Mixing callables and arrays is
//! not representable: [`UnfoldingInputs`] is either fully discrete or fully
//! continuous.

use crate::config::UnfolderConfig;
use crate::covariance::DataErrors;
use crate::matrix_unfolder::{MatrixUnfolder, SolveResult, UnfoldError};
use crate::observer::{LogObserver, SolveObserver};
use crate::validation::DimensionError;
use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("The {quantity} evaluated to a non-finite value at point {point}.")]
    NonFinite { quantity: &'static str, point: f64 },

    #[error("Evaluation point {index} ({value}) lies outside the basis support [{lower}, {upper}].")]
    PointOutOfSupport {
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("{0}")]
    Failed(String),
}

/// Kernel `k(y, x)`: response at observation coordinate `y` to unit truth at `x`.
pub type KernelFn<'a> = &'a dyn Fn(f64, f64) -> f64;
/// A scalar function of the observation coordinate (data or variance).
pub type ObservationFn<'a> = &'a dyn Fn(f64) -> f64;

/// Discrete kernel, data and errors, ready for [`MatrixUnfolder`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteInputs {
    pub kernel: Array2<f64>,
    pub data: Array1<f64>,
    pub errors: DataErrors,
}

/// Callable kernel, data and per-point variances.
#[derive(Clone, Copy)]
pub struct ContinuousInputs<'a> {
    pub kernel: KernelFn<'a>,
    pub data: ObservationFn<'a>,
    pub variances: ObservationFn<'a>,
    /// Observation coordinates at which to sample; required for a solve.
    pub evaluation_points: Option<ArrayView1<'a, f64>>,
}

pub enum UnfoldingInputs<'a> {
    Discrete(DiscreteInputs),
    Continuous(ContinuousInputs<'a>),
}

impl From<DiscreteInputs> for UnfoldingInputs<'_> {
    fn from(inputs: DiscreteInputs) -> Self {
        Self::Discrete(inputs)
    }
}

impl<'a> From<ContinuousInputs<'a>> for UnfoldingInputs<'a> {
    fn from(inputs: ContinuousInputs<'a>) -> Self {
        Self::Continuous(inputs)
    }
}

/// Discretizes continuous problems onto a fixed set of basis functions.
///
/// The basis itself (its functions, support and quadrature) is owned by the
/// implementor. The projected kernel must have one column per basis function.
pub trait BasisProjector {
    /// Number of basis functions, i.e. the coefficient dimension `n`.
    fn basis_len(&self) -> usize;

    fn project(
        &self,
        inputs: &ContinuousInputs<'_>,
        evaluation_points: ArrayView1<'_, f64>,
    ) -> Result<DiscreteInputs, ProjectionError>;
}

impl<P: BasisProjector + ?Sized> BasisProjector for &P {
    fn basis_len(&self) -> usize {
        (**self).basis_len()
    }

    fn project(
        &self,
        inputs: &ContinuousInputs<'_>,
        evaluation_points: ArrayView1<'_, f64>,
    ) -> Result<DiscreteInputs, ProjectionError> {
        (**self).project(inputs, evaluation_points)
    }
}

/// Unfolds continuous or discrete problems against one basis and configuration.
#[derive(Debug, Clone)]
pub struct Unfolder<P> {
    projector: P,
    matrix_unfolder: MatrixUnfolder,
}

impl<P: BasisProjector> Unfolder<P> {
    /// Fails when the basis size differs from the regularization dimension.
    pub fn new(projector: P, config: UnfolderConfig) -> Result<Self, DimensionError> {
        if projector.basis_len() != config.dim() {
            return Err(DimensionError::BasisSize {
                expected: config.dim(),
                found: projector.basis_len(),
            });
        }
        Ok(Self {
            projector,
            matrix_unfolder: MatrixUnfolder::new(config),
        })
    }

    pub fn projector(&self) -> &P {
        &self.projector
    }

    pub fn matrix_unfolder(&self) -> &MatrixUnfolder {
        &self.matrix_unfolder
    }

    pub fn config(&self) -> &UnfolderConfig {
        self.matrix_unfolder.config()
    }

    pub fn solve<'a>(
        &self,
        inputs: impl Into<UnfoldingInputs<'a>>,
    ) -> Result<SolveResult, UnfoldError> {
        self.solve_with_observer(inputs, &mut LogObserver)
    }

    pub fn solve_with_observer<'a>(
        &self,
        inputs: impl Into<UnfoldingInputs<'a>>,
        observer: &mut dyn SolveObserver,
    ) -> Result<SolveResult, UnfoldError> {
        match inputs.into() {
            UnfoldingInputs::Discrete(discrete) => self.solve_discrete(&discrete, observer),
            UnfoldingInputs::Continuous(continuous) => {
                self.solve_continuous(&continuous, observer)
            }
        }
    }

    pub fn solve_discrete(
        &self,
        inputs: &DiscreteInputs,
        observer: &mut dyn SolveObserver,
    ) -> Result<SolveResult, UnfoldError> {
        self.matrix_unfolder.solve_with_observer(
            inputs.kernel.view(),
            inputs.data.view(),
            &inputs.errors,
            observer,
        )
    }

    pub fn solve_continuous(
        &self,
        inputs: &ContinuousInputs<'_>,
        observer: &mut dyn SolveObserver,
    ) -> Result<SolveResult, UnfoldError> {
        let points = match inputs.evaluation_points {
            Some(points) if !points.is_empty() => points,
            _ => return Err(DimensionError::MissingEvaluationPoints.into()),
        };
        if !points.iter().all(|p| p.is_finite()) {
            return Err(DimensionError::NonFinite("evaluation points").into());
        }

        let discrete = self.projector.project(inputs, points)?;
        log::debug!(
            "Projected continuous inputs onto {} basis functions at {} evaluation points.",
            self.projector.basis_len(),
            points.len()
        );
        self.solve_discrete(&discrete, observer)
    }
}
