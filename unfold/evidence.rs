//! # Empirical Bayes selection of the regularization weights
//!
//! The coefficients carry a Gaussian prior with precision `P(α) = Σ αᵢ Ωᵢ`
//! and the data a Gaussian likelihood, so the coefficients integrate out in
//! closed form. Up to terms that do not depend on `α`, the negative
//! log-evidence is
//!
//! ```text
//! J(α) = -½ bᵀ Ba⁺ b − ½ log|P|₊ + ½ log|Ba|₊,     Ba = B + P
//! ```
//!
//! with gradient
//!
//! ```text
//! ∂J/∂αₖ = ½ [ xᵀ Ωₖ x − tr(P⁺ Ωₖ) + tr(Ba⁺ Ωₖ) ],   x = Ba⁺ b.
//! ```
//!
//! `J` is minimized with BFGS over unconstrained coordinates `z` that a
//! [`BoxTransform`] maps into `[low, high]`, so every trial alpha lies inside
//! the box. When BFGS fails (line search, iteration cap) the best alpha seen
//! so far is returned and flagged as not converged.

use crate::config::{AlphaBounds, OptimizerOptions};
use crate::linalg::{SymmetricEigen, trace_product};
use crate::observer::{SolveObserver, SolveWarning};
use crate::solver::PenalizedSystem;
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::error::LinalgError;
use std::cell::{Cell, RefCell};
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Cost returned to BFGS when the evidence cannot be evaluated.
const COST_BARRIER: f64 = 1e10;

/// Evaluates the negative log-evidence for a fixed `(B, b, Ω)` triple,
/// reusing the `n × n` assembly buffers between calls.
pub struct EvidenceState<'a> {
    system: &'a PenalizedSystem<'a>,
    workspace: RefCell<Workspace>,
}

struct Workspace {
    penalty: Array2<f64>,
    posterior: Array2<f64>,
}

/// Cost and gradient with respect to the alphas.
#[derive(Debug, Clone)]
pub struct EvidenceEvaluation {
    pub cost: f64,
    pub gradient: Array1<f64>,
}

impl<'a> EvidenceState<'a> {
    pub fn new(system: &'a PenalizedSystem<'a>) -> Self {
        let n = system.dim();
        Self {
            system,
            workspace: RefCell::new(Workspace {
                penalty: Array2::zeros((n, n)),
                posterior: Array2::zeros((n, n)),
            }),
        }
    }

    /// `log p(y | α)` up to an alpha-independent constant.
    pub fn log_evidence(&self, alphas: ArrayView1<f64>) -> Result<f64, LinalgError> {
        let mut ws = self.workspace.borrow_mut();
        let Workspace { penalty, posterior } = &mut *ws;
        self.system.assemble_into(alphas, penalty, posterior);

        let prior = SymmetricEigen::new(penalty.view())?;
        let post = SymmetricEigen::new(posterior.view())?;
        let x = post.pseudo_inverse().dot(&self.system.b_vector());
        let fit = self.system.b_vector().dot(&x);

        Ok(0.5 * fit + 0.5 * prior.log_det_pseudo() - 0.5 * post.log_det_pseudo())
    }

    /// Negative log-evidence `J(α)` and `∂J/∂α`.
    pub fn evaluate(&self, alphas: ArrayView1<f64>) -> Result<EvidenceEvaluation, LinalgError> {
        let mut ws = self.workspace.borrow_mut();
        let Workspace { penalty, posterior } = &mut *ws;
        self.system.assemble_into(alphas, penalty, posterior);

        let prior = SymmetricEigen::new(penalty.view())?;
        let post = SymmetricEigen::new(posterior.view())?;
        let prior_inv = prior.pseudo_inverse();
        let post_inv = post.pseudo_inverse();

        let b = self.system.b_vector();
        let x = post_inv.dot(&b);
        let fit = b.dot(&x);
        let cost = -0.5 * fit - 0.5 * prior.log_det_pseudo() + 0.5 * post.log_det_pseudo();

        let gradient = Array1::from_iter(self.system.regularization().iter().map(|omega| {
            let quad = x.dot(&omega.dot(&x));
            0.5 * (quad - trace_product(prior_inv.view(), omega.view())
                + trace_product(post_inv.view(), omega.view()))
        }));

        Ok(EvidenceEvaluation { cost, gradient })
    }
}

/// How one alpha coordinate is parameterized between its bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scale {
    /// `α = exp(u)`, used when the lower bound is strictly positive.
    Log,
    /// `α = u`, used when the lower bound is zero.
    Linear,
}

#[derive(Debug, Clone, Copy)]
struct Coordinate {
    scale: Scale,
    /// Interval in `u` space.
    lo: f64,
    hi: f64,
    /// Interval in alpha space; every mapped value is clamped into it.
    low: f64,
    high: f64,
}

/// Maps unconstrained BFGS coordinates onto the alpha box via
/// `u = lo + (hi − lo)·σ(z)`.
#[derive(Debug, Clone)]
pub struct BoxTransform {
    coords: Vec<Coordinate>,
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl BoxTransform {
    pub fn new(bounds: &AlphaBounds) -> Self {
        let coords = bounds
            .low
            .iter()
            .zip(&bounds.high)
            .map(|(&low, &high)| {
                if low > 0.0 {
                    Coordinate {
                        scale: Scale::Log,
                        lo: low.ln(),
                        hi: high.ln(),
                        low,
                        high,
                    }
                } else {
                    Coordinate {
                        scale: Scale::Linear,
                        lo: low,
                        hi: high,
                        low,
                        high,
                    }
                }
            })
            .collect();
        Self { coords }
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// True when every coordinate has `low == high`.
    pub fn is_pinned(&self) -> bool {
        self.coords.iter().all(|c| c.low == c.high)
    }

    /// Returns `α(z)` and the diagonal Jacobian `dα/dz`.
    pub fn to_alpha(&self, z: ArrayView1<f64>) -> (Array1<f64>, Array1<f64>) {
        let mut alphas = Array1::zeros(self.coords.len());
        let mut jacobian = Array1::zeros(self.coords.len());
        for (i, (c, &zi)) in self.coords.iter().zip(z.iter()).enumerate() {
            if c.low == c.high {
                alphas[i] = c.low;
                continue;
            }
            let s = sigmoid(zi);
            let u = c.lo + (c.hi - c.lo) * s;
            let du_dz = (c.hi - c.lo) * s * (1.0 - s);
            let (alpha, dalpha_du) = match c.scale {
                Scale::Log => {
                    let a = u.exp();
                    (a, a)
                }
                Scale::Linear => (u, 1.0),
            };
            alphas[i] = alpha.clamp(c.low, c.high);
            jacobian[i] = dalpha_du * du_dz;
        }
        (alphas, jacobian)
    }

    /// Inverse map; boundary values are pulled slightly inside so `z` stays finite.
    pub fn to_unconstrained(&self, alphas: ArrayView1<f64>) -> Array1<f64> {
        const EDGE: f64 = 1e-9;
        Array1::from_iter(self.coords.iter().zip(alphas.iter()).map(|(c, &a)| {
            if c.low == c.high {
                return 0.0;
            }
            let u = match c.scale {
                Scale::Log => a.max(c.low).ln(),
                Scale::Linear => a,
            };
            let s = ((u - c.lo) / (c.hi - c.lo)).clamp(EDGE, 1.0 - EDGE);
            (s / (1.0 - s)).ln()
        }))
    }
}

/// Result of the alpha search.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaEstimate {
    pub alphas: Array1<f64>,
    /// `log p(y | α)` at `alphas`, up to an alpha-independent constant.
    pub log_evidence: f64,
    pub converged: bool,
    /// BFGS iterations, when BFGS finished normally.
    pub iterations: Option<usize>,
    pub evaluations: usize,
}

/// Maximizes the evidence over the alpha box starting from `alpha0`.
///
/// Never fails: unusable evaluations are reported to `observer` and the best
/// alpha evaluated so far is returned.
pub fn optimize_alphas(
    system: &PenalizedSystem<'_>,
    bounds: &AlphaBounds,
    alpha0: ArrayView1<f64>,
    options: &OptimizerOptions,
    observer: &mut dyn SolveObserver,
) -> AlphaEstimate {
    let state = EvidenceState::new(system);
    let transform = BoxTransform::new(bounds);

    if transform.is_pinned() {
        let (alphas, _) = transform.to_alpha(transform.to_unconstrained(alpha0).view());
        let log_evidence = state.log_evidence(alphas.view()).unwrap_or(f64::NAN);
        return AlphaEstimate {
            alphas,
            log_evidence,
            converged: true,
            iterations: Some(0),
            evaluations: 1,
        };
    }

    let best: RefCell<Option<(Array1<f64>, f64)>> = RefCell::new(None);
    let evaluations = Cell::new(0_usize);
    let last_failure: RefCell<Option<(Array1<f64>, String)>> = RefCell::new(None);

    let cost_and_grad = |z: &Array1<f64>| -> (f64, Array1<f64>) {
        evaluations.set(evaluations.get() + 1);
        let (alphas, jacobian) = transform.to_alpha(z.view());
        match state.evaluate(alphas.view()) {
            Ok(eval) if eval.cost.is_finite() && eval.gradient.iter().all(|g| g.is_finite()) => {
                let mut slot = best.borrow_mut();
                if slot.as_ref().is_none_or(|(_, c)| eval.cost < *c) {
                    *slot = Some((alphas, eval.cost));
                }
                (eval.cost, eval.gradient * &jacobian)
            }
            Ok(eval) => {
                *last_failure.borrow_mut() =
                    Some((alphas, format!("non-finite cost {}", eval.cost)));
                barrier_sample(z)
            }
            Err(e) => {
                *last_failure.borrow_mut() = Some((alphas, e.to_string()));
                barrier_sample(z)
            }
        }
    };

    log::debug!(
        "Starting evidence maximization over {} alpha(s) from {:?}",
        transform.len(),
        alpha0.to_vec()
    );
    let z0 = transform.to_unconstrained(alpha0);
    let outcome = Bfgs::new(z0, cost_and_grad)
        .with_tolerance(options.tolerance)
        .with_max_iterations(options.max_iterations)
        .run();

    if let Some((alphas, reason)) = last_failure.into_inner() {
        observer.on_warn(&SolveWarning::EvidenceUnavailable { alphas, reason });
    }

    let termination = match outcome {
        Ok(BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        }) => Termination::Finished {
            point: final_point,
            value: final_value,
            iterations,
        },
        Err(e) => Termination::Failed(format!("{e:?}")),
    };
    conclude(
        termination,
        best.into_inner(),
        &transform,
        alpha0,
        evaluations.get(),
        observer,
    )
}

/// How the BFGS run ended, in unconstrained coordinates.
enum Termination {
    Finished {
        point: Array1<f64>,
        value: f64,
        iterations: usize,
    },
    Failed(String),
}

/// Turns a BFGS termination into an estimate.
///
/// A run that finished on a barrier sample, or failed outright, falls back to
/// the best successfully evaluated alphas and is reported as not converged.
fn conclude(
    termination: Termination,
    best: Option<(Array1<f64>, f64)>,
    transform: &BoxTransform,
    alpha0: ArrayView1<f64>,
    evaluations: usize,
    observer: &mut dyn SolveObserver,
) -> AlphaEstimate {
    let (iterations, reason) = match termination {
        Termination::Finished {
            point,
            value,
            iterations,
        } if value < COST_BARRIER => {
            let (alphas, _) = transform.to_alpha(point.view());
            log::debug!(
                "Evidence maximization converged in {} iterations: alphas = {:?}",
                iterations,
                alphas.to_vec()
            );
            return AlphaEstimate {
                alphas,
                log_evidence: -value,
                converged: true,
                iterations: Some(iterations),
                evaluations,
            };
        }
        Termination::Finished {
            value, iterations, ..
        } => (
            Some(iterations),
            format!("stopped on an unusable evaluation with cost {value:e}"),
        ),
        Termination::Failed(reason) => (None, reason),
    };

    let (alphas, log_evidence) = match best {
        Some((alphas, cost)) => (alphas, -cost),
        None => {
            let (alphas, _) = transform.to_alpha(transform.to_unconstrained(alpha0).view());
            (alphas, f64::NAN)
        }
    };
    observer.on_warn(&SolveWarning::OptimizerNotConverged {
        evaluations,
        reason,
    });
    AlphaEstimate {
        alphas,
        log_evidence,
        converged: false,
        iterations,
        evaluations,
    }
}

/// A large finite sample whose gradient pushes `z` back toward the box centre.
fn barrier_sample(z: &Array1<f64>) -> (f64, Array1<f64>) {
    let grad = z.mapv(|v| if v.is_finite() && v.abs() > 1e-6 { v } else { 1.0 });
    (COST_BARRIER + 0.5 * z.dot(z), grad)
}
