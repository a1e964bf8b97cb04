//! Regularized solve of the weighted normal equations.
//!
//! Given `B = Kᵀ Σ⁻¹ K`, `b = Kᵀ Σ⁻¹ y`, a regularization set and alphas, the
//! posterior precision is `Ba = B + Σ αᵢ Ωᵢ`. Its symmetric Moore-Penrose
//! pseudo-inverse is the coefficient covariance and `x = Ba⁺ b` the
//! coefficients. A singular `Ba` is not an error: the pseudo-inverse then
//! yields the least-norm solution.

use crate::linalg::{SymmetricEigen, symmetrize_in_place};
use crate::regularization::RegularizationSet;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::error::LinalgError;

/// Coefficients and their covariance for one alpha vector.
#[derive(Debug, Clone, PartialEq)]
pub struct RegularizedSolution {
    pub coefficients: Array1<f64>,
    pub covariance: Array2<f64>,
    /// Numerical rank of the posterior precision `Ba`.
    pub rank: usize,
}

/// Normal equations `(B, b)` bound to a regularization set.
///
/// Owns `B` and `b` so repeated solves (the Empirical Bayes hot path) reuse
/// them without re-deriving anything from the kernel.
#[derive(Debug, Clone)]
pub struct PenalizedSystem<'a> {
    b_matrix: Array2<f64>,
    b_vector: Array1<f64>,
    regularization: &'a RegularizationSet,
}

impl<'a> PenalizedSystem<'a> {
    pub fn new(
        b_matrix: Array2<f64>,
        b_vector: Array1<f64>,
        regularization: &'a RegularizationSet,
    ) -> Self {
        debug_assert_eq!(b_matrix.dim(), (regularization.dim(), regularization.dim()));
        debug_assert_eq!(b_vector.len(), regularization.dim());
        Self {
            b_matrix,
            b_vector,
            regularization,
        }
    }

    pub fn b_matrix(&self) -> ArrayView2<'_, f64> {
        self.b_matrix.view()
    }

    pub fn b_vector(&self) -> ArrayView1<'_, f64> {
        self.b_vector.view()
    }

    pub fn regularization(&self) -> &'a RegularizationSet {
        self.regularization
    }

    pub fn dim(&self) -> usize {
        self.b_vector.len()
    }

    /// Writes the prior precision `P = Σ αᵢ Ωᵢ` into `penalty` and the
    /// symmetrized posterior precision `B + P` into `posterior`.
    pub fn assemble_into(
        &self,
        alphas: ArrayView1<f64>,
        penalty: &mut Array2<f64>,
        posterior: &mut Array2<f64>,
    ) {
        self.regularization.weighted_sum_into(alphas, penalty);
        posterior.assign(&self.b_matrix);
        *posterior += &*penalty;
        symmetrize_in_place(posterior);
    }

    pub fn solve(&self, alphas: ArrayView1<f64>) -> Result<RegularizedSolution, LinalgError> {
        solve_regularized(
            self.b_matrix.view(),
            self.b_vector.view(),
            self.regularization,
            alphas,
        )
    }
}

/// Computes the regularized coefficients and covariance for fixed alphas.
pub fn solve_regularized(
    b_matrix: ArrayView2<f64>,
    b_vector: ArrayView1<f64>,
    regularization: &RegularizationSet,
    alphas: ArrayView1<f64>,
) -> Result<RegularizedSolution, LinalgError> {
    let mut posterior = regularization.weighted_sum(alphas);
    posterior += &b_matrix;
    symmetrize_in_place(&mut posterior);

    let eigen = SymmetricEigen::new(posterior.view())?;
    let covariance = eigen.pseudo_inverse();
    let coefficients = covariance.dot(&b_vector);

    Ok(RegularizedSolution {
        coefficients,
        covariance,
        rank: eigen.rank(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::asymmetry;
    use crate::regularization::{curvature, identity};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn unit_set() -> RegularizationSet {
        RegularizationSet::new(vec![identity(2)]).unwrap()
    }

    #[test]
    fn zero_alpha_recovers_weighted_least_squares() {
        let b_matrix = array![[4.0, 1.0], [1.0, 2.0]];
        let b_vector = array![1.0, -1.0];
        let set = unit_set();
        let solution =
            solve_regularized(b_matrix.view(), b_vector.view(), &set, array![0.0].view()).unwrap();
        // B⁻¹ = [2 -1; -1 4] / 7
        assert_abs_diff_eq!(solution.coefficients[0], 3.0 / 7.0, epsilon = 1e-12);
        assert_abs_diff_eq!(solution.coefficients[1], -5.0 / 7.0, epsilon = 1e-12);
    }

    #[test]
    fn ridge_shrinks_identity_problem() {
        let set = unit_set();
        let solution = solve_regularized(
            Array2::<f64>::eye(2).view(),
            array![1.0, 2.0].view(),
            &set,
            array![1.0].view(),
        )
        .unwrap();
        assert!(solution.coefficients.abs_diff_eq(&array![0.5, 1.0], 1e-12));
        assert!(solution.covariance.abs_diff_eq(&(Array2::<f64>::eye(2) * 0.5), 1e-12));
    }

    #[test]
    fn singular_posterior_degrades_to_pseudo_inverse() {
        // Rank-deficient B and zero alpha: Ba = B is singular.
        let b_matrix = array![[1.0, 1.0], [1.0, 1.0]];
        let b_vector = array![2.0, 2.0];
        let set = unit_set();
        let solution =
            solve_regularized(b_matrix.view(), b_vector.view(), &set, array![0.0].view()).unwrap();
        // Least-norm solution of x0 + x1 = 2.
        assert!(solution.coefficients.abs_diff_eq(&array![1.0, 1.0], 1e-12));
        assert_eq!(solution.rank, 1);
    }

    #[test]
    fn covariance_is_exactly_symmetric() {
        let b_matrix = array![
            [3.0, 0.3000000001, 0.1],
            [0.3, 2.0, 0.7],
            [0.1, 0.7000000003, 1.5]
        ];
        let set = RegularizationSet::new(vec![identity(3), curvature(3).unwrap()]).unwrap();
        let system = PenalizedSystem::new(b_matrix, array![1.0, 0.0, -1.0], &set);
        let solution = system.solve(array![0.3, 2.0].view()).unwrap();
        assert_eq!(asymmetry(solution.covariance.view()), 0.0);
    }

    #[test]
    fn assemble_into_matches_allocating_path() {
        let set = RegularizationSet::new(vec![identity(3), curvature(3).unwrap()]).unwrap();
        let system = PenalizedSystem::new(Array2::<f64>::eye(3) * 2.0, Array1::ones(3), &set);
        let alphas = array![0.5, 1.5];
        let mut penalty = Array2::zeros((3, 3));
        let mut posterior = Array2::zeros((3, 3));
        system.assemble_into(alphas.view(), &mut penalty, &mut posterior);
        let expected = set.weighted_sum(alphas.view()) + Array2::<f64>::eye(3) * 2.0;
        assert!(posterior.abs_diff_eq(&expected, 1e-12));
        assert!(penalty.abs_diff_eq(&set.weighted_sum(alphas.view()), 1e-15));
    }
}
