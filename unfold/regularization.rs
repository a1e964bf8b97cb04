//! Regularization matrices ("omegas") and the ordered set that defines the
//! hyperparameter vector.

use crate::config::ConfigError;
use crate::linalg::symmetrize;
use ndarray::{Array2, ArrayView1, s};

/// An ordered, non-empty sequence of symmetric `n × n` penalty matrices.
///
/// Inputs are symmetrized once at construction, so every consumer sees exactly
/// symmetric omegas and the weighted sum inherits that symmetry up to rounding.
#[derive(Debug, Clone, PartialEq)]
pub struct RegularizationSet {
    omegas: Vec<Array2<f64>>,
    n: usize,
}

impl RegularizationSet {
    pub fn new(omegas: Vec<Array2<f64>>) -> Result<Self, ConfigError> {
        let Some(first) = omegas.first() else {
            return Err(ConfigError::EmptyRegularizationSet);
        };
        let n = first.nrows();
        if n == 0 {
            return Err(ConfigError::EmptyOmega { index: 0 });
        }

        let mut symmetric = Vec::with_capacity(omegas.len());
        for (index, omega) in omegas.iter().enumerate() {
            if omega.nrows() != omega.ncols() {
                return Err(ConfigError::NonSquareOmega {
                    index,
                    rows: omega.nrows(),
                    cols: omega.ncols(),
                });
            }
            if omega.nrows() != n {
                return Err(ConfigError::OmegaSizeMismatch {
                    index,
                    expected: n,
                    found: omega.nrows(),
                });
            }
            if !omega.iter().all(|v| v.is_finite()) {
                return Err(ConfigError::NonFiniteOmega { index });
            }
            symmetric.push(symmetrize(omega.view()));
        }

        Ok(Self {
            omegas: symmetric,
            n,
        })
    }

    /// Number of hyperparameters.
    pub fn len(&self) -> usize {
        self.omegas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.omegas.is_empty()
    }

    /// Dimension `n` of the coefficient vector.
    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn omegas(&self) -> &[Array2<f64>] {
        &self.omegas
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Array2<f64>> {
        self.omegas.iter()
    }

    /// Overwrites `out` with `Σ αᵢ Ωᵢ`.
    ///
    /// `out` must already be `n × n`; it is reused across optimizer iterations.
    pub fn weighted_sum_into(&self, alphas: ArrayView1<f64>, out: &mut Array2<f64>) {
        debug_assert_eq!(alphas.len(), self.omegas.len());
        debug_assert_eq!(out.dim(), (self.n, self.n));
        out.fill(0.0);
        for (&alpha, omega) in alphas.iter().zip(&self.omegas) {
            if alpha != 0.0 {
                out.scaled_add(alpha, omega);
            }
        }
    }

    /// Allocating variant of [`Self::weighted_sum_into`].
    pub fn weighted_sum(&self, alphas: ArrayView1<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((self.n, self.n));
        self.weighted_sum_into(alphas, &mut out);
        out
    }
}

impl<'a> IntoIterator for &'a RegularizationSet {
    type Item = &'a Array2<f64>;
    type IntoIter = std::slice::Iter<'a, Array2<f64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.omegas.iter()
    }
}

/// Ridge penalty `I_n`.
pub fn identity(n: usize) -> Array2<f64> {
    Array2::eye(n)
}

/// Finite-difference penalty `Dᵀ D` where `D` takes `order`-th differences of
/// adjacent coefficients.
pub fn difference_penalty(n: usize, order: usize) -> Result<Array2<f64>, ConfigError> {
    if order == 0 || order >= n {
        return Err(ConfigError::InvalidPenaltyOrder { order, n });
    }

    let mut d = Array2::<f64>::eye(n);
    // Each pass drops one row.
    for _ in 0..order {
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
    }

    Ok(d.t().dot(&d))
}

/// Second-order difference penalty, the usual smoothness prior for histograms.
pub fn curvature(n: usize) -> Result<Array2<f64>, ConfigError> {
    difference_penalty(n, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn second_order_difference_penalty_has_known_form() {
        let s = difference_penalty(5, 2).unwrap();
        let expected = array![
            [1., -2., 1., 0., 0.],
            [-2., 5., -4., 1., 0.],
            [1., -4., 6., -4., 1.],
            [0., 1., -4., 5., -2.],
            [0., 0., 1., -2., 1.]
        ];
        assert!(s.abs_diff_eq(&expected, 1e-12));
    }

    #[test]
    fn difference_penalty_rejects_bad_order() {
        assert!(matches!(
            difference_penalty(3, 3),
            Err(ConfigError::InvalidPenaltyOrder { order: 3, n: 3 })
        ));
        assert!(difference_penalty(3, 0).is_err());
    }

    #[test]
    fn construction_symmetrizes_inputs() {
        let set = RegularizationSet::new(vec![array![[1.0, 2.0], [0.0, 1.0]]]).unwrap();
        assert_eq!(set.omegas()[0], array![[1.0, 1.0], [1.0, 1.0]]);
        assert_eq!(set.dim(), 2);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn construction_rejects_structural_problems() {
        assert!(matches!(
            RegularizationSet::new(vec![]),
            Err(ConfigError::EmptyRegularizationSet)
        ));
        assert!(matches!(
            RegularizationSet::new(vec![Array2::zeros((2, 3))]),
            Err(ConfigError::NonSquareOmega { index: 0, .. })
        ));
        assert!(matches!(
            RegularizationSet::new(vec![identity(2), identity(3)]),
            Err(ConfigError::OmegaSizeMismatch {
                index: 1,
                expected: 2,
                found: 3
            })
        ));
        let mut bad = identity(2);
        bad[[0, 1]] = f64::NAN;
        assert!(matches!(
            RegularizationSet::new(vec![bad]),
            Err(ConfigError::NonFiniteOmega { index: 0 })
        ));
    }

    #[test]
    fn weighted_sum_reuses_buffer() {
        let set = RegularizationSet::new(vec![identity(2), difference_penalty(2, 1).unwrap()])
            .unwrap();
        let mut out = Array2::from_elem((2, 2), 99.0);
        set.weighted_sum_into(array![2.0, 0.5].view(), &mut out);
        assert_eq!(out, array![[2.5, -0.5], [-0.5, 2.5]]);
    }
}
