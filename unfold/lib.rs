#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod covariance;
pub mod evidence;
pub mod linalg;
pub mod matrix_unfolder;
pub mod observer;
pub mod problem;
pub mod regularization;
pub mod solver;
pub mod unfolder;
pub mod validation;

pub use config::{
    AlphaBounds, AlphaStrategy, ConfigError, ConfigSpec, Method, OptimizerOptions, Setting,
    UnfolderConfig, UnfolderConfigBuilder,
};
pub use covariance::{CovarianceError, DataErrors};
pub use matrix_unfolder::{
    MatrixUnfolder, OptimizerReport, SolveDiagnostics, SolveResult, UnfoldError,
};
pub use observer::{LogObserver, NoopObserver, SolveObserver, SolveWarning};
pub use regularization::RegularizationSet;
pub use unfolder::{
    BasisProjector, ContinuousInputs, DiscreteInputs, ProjectionError, Unfolder, UnfoldingInputs,
};
pub use validation::DimensionError;
