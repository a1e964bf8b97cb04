//! # Unfolder Configuration
//!
//! An [`UnfolderConfig`] couples a [`RegularizationSet`] with the rule for
//! choosing its hyperparameters. All defaulting and every consistency check
//! happens once, in [`UnfolderConfigBuilder::build`]; a built config is
//! immutable and is never written back to by a solve. Callers that want to
//! reuse alphas found by Empirical Bayes do so explicitly through
//! [`UnfolderConfig::memoized`].

use crate::regularization::RegularizationSet;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default lower bound for every alpha when none is supplied.
pub const DEFAULT_ALPHA_LOW: f64 = 1e-8;
/// Default upper bound for every alpha when none is supplied.
pub const DEFAULT_ALPHA_HIGH: f64 = 1e8;

/// Configuration failures. All of them are raised before any numerical work.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown unfolding method '{0}'. Expected 'EmpiricalBayes' or 'User'.")]
    UnknownMethod(String),

    #[error("The regularization set is empty; at least one omega matrix is required.")]
    EmptyRegularizationSet,

    #[error("Omega {index} has zero size.")]
    EmptyOmega { index: usize },

    #[error("Omega {index} is not square ({rows} x {cols}).")]
    NonSquareOmega {
        index: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Omega {index} has size {found}, but omega 0 has size {expected}.")]
    OmegaSizeMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Omega {index} contains non-finite entries.")]
    NonFiniteOmega { index: usize },

    #[error("Penalty order ({order}) must be positive and less than the number of coefficients ({n}).")]
    InvalidPenaltyOrder { order: usize, n: usize },

    #[error("The 'User' method requires explicit alphas, but none were provided.")]
    MissingUserAlphas,

    #[error("Alphas are determined by 'EmpiricalBayes' and must not be provided; use alpha0 for a starting point.")]
    AlphasWithEmpiricalBayes,

    #[error("'{field}' has {found} entries, but the regularization set has {expected} omegas.")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("'{field}[{index}]' = {value} is invalid: {reason}.")]
    InvalidValue {
        field: &'static str,
        index: usize,
        value: f64,
        reason: &'static str,
    },

    #[error("Bounds are inverted for alpha {index}: low = {low} > high = {high}.")]
    InvertedBounds { index: usize, low: f64, high: f64 },

    #[error("alpha0[{index}] = {value} lies outside its bounds [{low}, {high}].")]
    InitialAlphaOutOfBounds {
        index: usize,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("Optimizer option '{field}' is invalid: {reason}.")]
    InvalidOptimizerOption {
        field: &'static str,
        reason: &'static str,
    },
}

/// How the alpha vector is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Method {
    /// Maximize the marginal likelihood of the data over the alpha box.
    #[default]
    EmpiricalBayes,
    /// Use caller-supplied alphas unchanged.
    User,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmpiricalBayes => "EmpiricalBayes",
            Self::User => "User",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "empiricalbayes" | "empirical_bayes" | "empirical-bayes" => Ok(Self::EmpiricalBayes),
            "user" => Ok(Self::User),
            _ => Err(ConfigError::UnknownMethod(s.to_string())),
        }
    }
}

/// An optional configuration field with an explicit "use the default" state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Setting<T> {
    Provided(T),
    #[default]
    Default,
}

impl<T> Setting<T> {
    pub fn provided(&self) -> Option<&T> {
        match self {
            Self::Provided(value) => Some(value),
            Self::Default => None,
        }
    }
}

impl<T> From<Option<T>> for Setting<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Provided(v),
            None => Self::Default,
        }
    }
}

/// Stopping rules for the Empirical Bayes optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    /// Gradient-norm tolerance handed to BFGS.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 200,
        }
    }
}

impl OptimizerOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::InvalidOptimizerOption {
                field: "tolerance",
                reason: "must be positive and finite",
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidOptimizerOption {
                field: "max_iterations",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Box constraints on the alpha vector, resolved against the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaBounds {
    pub low: Array1<f64>,
    pub high: Array1<f64>,
}

impl AlphaBounds {
    pub fn contains(&self, alphas: &Array1<f64>) -> bool {
        alphas.len() == self.low.len()
            && alphas
                .iter()
                .zip(self.low.iter().zip(&self.high))
                .all(|(&a, (&lo, &hi))| lo <= a && a <= hi)
    }

    /// Geometric midpoint of each interval (arithmetic when the lower bound is zero).
    fn midpoint(&self) -> Array1<f64> {
        Array1::from_iter(self.low.iter().zip(&self.high).map(|(&lo, &hi)| {
            if lo > 0.0 {
                (lo * hi).sqrt().clamp(lo, hi)
            } else {
                0.5 * (lo + hi)
            }
        }))
    }
}

/// Resolved hyperparameter rule.
#[derive(Debug, Clone, PartialEq)]
pub enum AlphaStrategy {
    EmpiricalBayes {
        bounds: AlphaBounds,
        alpha0: Array1<f64>,
        options: OptimizerOptions,
    },
    User {
        alphas: Array1<f64>,
    },
}

/// Validated configuration for [`crate::matrix_unfolder::MatrixUnfolder`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnfolderConfig {
    regularization: RegularizationSet,
    strategy: AlphaStrategy,
}

impl UnfolderConfig {
    pub fn builder(regularization: RegularizationSet) -> UnfolderConfigBuilder {
        UnfolderConfigBuilder::new(regularization)
    }

    /// Shorthand for a `User` config with fixed alphas.
    pub fn user(regularization: RegularizationSet, alphas: Vec<f64>) -> Result<Self, ConfigError> {
        Self::builder(regularization)
            .method(Method::User)
            .alphas(alphas)
            .build()
    }

    /// Shorthand for an `EmpiricalBayes` config with default bounds and start.
    pub fn empirical_bayes(regularization: RegularizationSet) -> Result<Self, ConfigError> {
        Self::builder(regularization).build()
    }

    pub fn regularization(&self) -> &RegularizationSet {
        &self.regularization
    }

    /// Number of coefficients `n`.
    pub fn dim(&self) -> usize {
        self.regularization.dim()
    }

    /// Number of hyperparameters.
    pub fn num_alphas(&self) -> usize {
        self.regularization.len()
    }

    pub fn method(&self) -> Method {
        match self.strategy {
            AlphaStrategy::EmpiricalBayes { .. } => Method::EmpiricalBayes,
            AlphaStrategy::User { .. } => Method::User,
        }
    }

    pub fn strategy(&self) -> &AlphaStrategy {
        &self.strategy
    }

    /// A new `User` config over the same regularization set, fixing `alphas`
    /// (typically the alphas returned by an Empirical Bayes solve).
    pub fn memoized(&self, alphas: &Array1<f64>) -> Result<Self, ConfigError> {
        Self::user(self.regularization.clone(), alphas.to_vec())
    }
}

/// Collects optional settings and resolves them into an [`UnfolderConfig`].
#[derive(Debug, Clone)]
pub struct UnfolderConfigBuilder {
    regularization: RegularizationSet,
    method: Method,
    alphas: Setting<Vec<f64>>,
    low: Setting<Vec<f64>>,
    high: Setting<Vec<f64>>,
    alpha0: Setting<Vec<f64>>,
    options: OptimizerOptions,
}

impl UnfolderConfigBuilder {
    pub fn new(regularization: RegularizationSet) -> Self {
        Self {
            regularization,
            method: Method::default(),
            alphas: Setting::Default,
            low: Setting::Default,
            high: Setting::Default,
            alpha0: Setting::Default,
            options: OptimizerOptions::default(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn alphas(mut self, alphas: Vec<f64>) -> Self {
        self.alphas = Setting::Provided(alphas);
        self
    }

    pub fn low(mut self, low: Vec<f64>) -> Self {
        self.low = Setting::Provided(low);
        self
    }

    pub fn high(mut self, high: Vec<f64>) -> Self {
        self.high = Setting::Provided(high);
        self
    }

    pub fn alpha0(mut self, alpha0: Vec<f64>) -> Self {
        self.alpha0 = Setting::Provided(alpha0);
        self
    }

    pub fn optimizer_options(mut self, options: OptimizerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<UnfolderConfig, ConfigError> {
        let k = self.regularization.len();
        if k == 0 {
            return Err(ConfigError::EmptyRegularizationSet);
        }

        // Lengths are checked for every provided field regardless of method.
        for (field, setting) in [
            ("alphas", &self.alphas),
            ("low", &self.low),
            ("high", &self.high),
            ("alpha0", &self.alpha0),
        ] {
            if let Some(values) = setting.provided() {
                check_values(field, values, k)?;
            }
        }

        let strategy = match self.method {
            Method::User => {
                let Setting::Provided(alphas) = self.alphas else {
                    return Err(ConfigError::MissingUserAlphas);
                };
                AlphaStrategy::User {
                    alphas: Array1::from(alphas),
                }
            }
            Method::EmpiricalBayes => {
                if self.alphas.provided().is_some() {
                    return Err(ConfigError::AlphasWithEmpiricalBayes);
                }
                self.options.validate()?;
                let bounds = resolve_bounds(self.low, self.high, k)?;
                let alpha0 = match self.alpha0 {
                    Setting::Provided(values) => Array1::from(values),
                    Setting::Default => bounds.midpoint(),
                };
                for (index, ((&value, &low), &high)) in
                    alpha0.iter().zip(&bounds.low).zip(&bounds.high).enumerate()
                {
                    if value < low || value > high {
                        return Err(ConfigError::InitialAlphaOutOfBounds {
                            index,
                            value,
                            low,
                            high,
                        });
                    }
                }
                AlphaStrategy::EmpiricalBayes {
                    bounds,
                    alpha0,
                    options: self.options,
                }
            }
        };

        Ok(UnfolderConfig {
            regularization: self.regularization,
            strategy,
        })
    }
}

/// Alphas are precision weights: every supplied value must be finite and non-negative.
fn check_values(field: &'static str, values: &[f64], expected: usize) -> Result<(), ConfigError> {
    if values.len() != expected {
        return Err(ConfigError::LengthMismatch {
            field,
            expected,
            found: values.len(),
        });
    }
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(ConfigError::InvalidValue {
                field,
                index,
                value,
                reason: "must be finite",
            });
        }
        if value < 0.0 {
            return Err(ConfigError::InvalidValue {
                field,
                index,
                value,
                reason: "must be non-negative",
            });
        }
    }
    Ok(())
}

fn resolve_bounds(
    low: Setting<Vec<f64>>,
    high: Setting<Vec<f64>>,
    k: usize,
) -> Result<AlphaBounds, ConfigError> {
    let low = match low {
        Setting::Provided(values) => Array1::from(values),
        Setting::Default => Array1::from_elem(k, DEFAULT_ALPHA_LOW),
    };
    let high = match high {
        Setting::Provided(values) => Array1::from(values),
        Setting::Default => Array1::from_elem(k, DEFAULT_ALPHA_HIGH),
    };
    for (index, (&lo, &hi)) in low.iter().zip(&high).enumerate() {
        if lo > hi {
            return Err(ConfigError::InvertedBounds {
                index,
                low: lo,
                high: hi,
            });
        }
    }
    Ok(AlphaBounds { low, high })
}

/// Serializable mirror of the builder, as found in TOML problem files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigSpec {
    pub method: Option<String>,
    pub alphas: Option<Vec<f64>>,
    pub low: Option<Vec<f64>>,
    pub high: Option<Vec<f64>>,
    pub alpha0: Option<Vec<f64>>,
    pub optimizer: OptimizerOptions,
}

impl ConfigSpec {
    pub fn build(self, regularization: RegularizationSet) -> Result<UnfolderConfig, ConfigError> {
        let method = match self.method.as_deref() {
            Some(name) => name.parse()?,
            None => Method::default(),
        };
        UnfolderConfigBuilder {
            regularization,
            method,
            alphas: self.alphas.into(),
            low: self.low.into(),
            high: self.high.into(),
            alpha0: self.alpha0.into(),
            options: self.optimizer,
        }
        .build()
    }
}
