//! Dense symmetric linear algebra shared by the solver and the evidence optimizer.
//!
//! Every matrix handled here is (numerically) symmetric, so a single `eigh`
//! call yields both the Moore-Penrose pseudo-inverse and the pseudo-determinant.
//! Eigenvalues whose magnitude falls below `n * eps * max|λ|` are treated as
//! exact zeros, matching the usual LAPACK-style rank cutoff.

use ndarray::{Array1, Array2, ArrayView2, Zip};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, UPLO};

/// Replaces `a` by `(a + aᵀ) / 2` in place.
pub fn symmetrize_in_place(a: &mut Array2<f64>) {
    let n = a.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (a[[i, j]] + a[[j, i]]);
            a[[i, j]] = avg;
            a[[j, i]] = avg;
        }
    }
}

/// Returns `(a + aᵀ) / 2`.
pub fn symmetrize(a: ArrayView2<f64>) -> Array2<f64> {
    let mut out = a.to_owned();
    symmetrize_in_place(&mut out);
    out
}

/// `tr(A·B)` for symmetric `A` and `B`, computed as the Frobenius inner product
/// so the product matrix is never formed.
pub fn trace_product(a: ArrayView2<f64>, b: ArrayView2<f64>) -> f64 {
    Zip::from(a).and(b).fold(0.0, |acc, &x, &y| acc + x * y)
}

/// Relative cutoff below which an eigenvalue is treated as zero.
fn rank_cutoff(eigenvalues: &Array1<f64>) -> f64 {
    let max_abs = eigenvalues.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    max_abs * (eigenvalues.len().max(1) as f64) * f64::EPSILON
}

/// Eigendecomposition of a symmetric matrix with the derived quantities the
/// unfolding core needs.
pub struct SymmetricEigen {
    pub eigenvalues: Array1<f64>,
    pub eigenvectors: Array2<f64>,
    cutoff: f64,
}

impl SymmetricEigen {
    pub fn new(a: ArrayView2<f64>) -> Result<Self, LinalgError> {
        let (eigenvalues, eigenvectors) = a.eigh(UPLO::Lower)?;
        let cutoff = rank_cutoff(&eigenvalues);
        Ok(Self {
            eigenvalues,
            eigenvectors,
            cutoff,
        })
    }

    /// Number of eigenvalues above the rank cutoff.
    pub fn rank(&self) -> usize {
        self.eigenvalues
            .iter()
            .filter(|&&ev| ev.abs() > self.cutoff)
            .count()
    }

    /// Sum of `ln λ` over the strictly positive eigenvalues above the cutoff.
    pub fn log_det_pseudo(&self) -> f64 {
        self.eigenvalues
            .iter()
            .filter(|&&ev| ev > self.cutoff)
            .map(|&ev| ev.ln())
            .sum()
    }

    /// Moore-Penrose pseudo-inverse `V diag(1/λ) Vᵀ`, symmetrized.
    pub fn pseudo_inverse(&self) -> Array2<f64> {
        let inv_vals = self.eigenvalues.mapv(|ev| {
            if ev.abs() > self.cutoff {
                1.0 / ev
            } else {
                0.0
            }
        });
        let scaled = &self.eigenvectors * &inv_vals.view().insert_axis(ndarray::Axis(0));
        let mut pinv = scaled.dot(&self.eigenvectors.t());
        symmetrize_in_place(&mut pinv);
        pinv
    }
}

/// Symmetric Moore-Penrose pseudo-inverse of `a`.
pub fn pseudo_inverse(a: ArrayView2<f64>) -> Result<Array2<f64>, LinalgError> {
    Ok(SymmetricEigen::new(a)?.pseudo_inverse())
}

/// `log |a|₊`, the log pseudo-determinant of a symmetric matrix.
pub fn log_det_pseudo(a: ArrayView2<f64>) -> Result<f64, LinalgError> {
    Ok(SymmetricEigen::new(a)?.log_det_pseudo())
}

/// Largest absolute deviation between `a` and `aᵀ`.
pub fn asymmetry(a: ArrayView2<f64>) -> f64 {
    Zip::from(a)
        .and(a.t())
        .fold(0.0_f64, |m, &x, &y| m.max((x - y).abs()))
}
