//! Dense linear algebra helpers shared by the factorization models

pub mod svd;

pub use self::svd::{truncated_svd, TruncatedSvd};

use crate::core::{Result, ZeroError};
use nalgebra::{DMatrix, DVector};
use rand::Rng;

/// Matrix with independent uniform entries in `[0, 1)`
pub fn random_matrix<R: Rng>(nrows: usize, ncols: usize, rng: &mut R) -> DMatrix<f64> {
    DMatrix::from_fn(nrows, ncols, |_, _| rng.gen::<f64>())
}

/// Vector with independent uniform entries in `[0, 1)`
pub fn random_vector<R: Rng>(len: usize, rng: &mut R) -> Vec<f64> {
    (0..len).map(|_| rng.gen::<f64>()).collect()
}

/// `a[row, :] · b[:, col]` without materialising the product
pub fn row_dot_column(a: &DMatrix<f64>, row: usize, b: &DMatrix<f64>, col: usize) -> f64 {
    (0..a.ncols()).map(|j| a[(row, j)] * b[(j, col)]).sum()
}

/// `factors · b[:, col]` for a loose latent vector
pub fn vector_dot_column(factors: &[f64], b: &DMatrix<f64>, col: usize) -> f64 {
    factors
        .iter()
        .enumerate()
        .map(|(j, &f)| f * b[(j, col)])
        .sum()
}

/// Solve the regularized normal equations `(V Vᵀ + λ n I) x = V r`
///
/// `v` holds one column per observation (`k × n`) and `r` the `n` targets.
/// With `λ > 0` the system is positive definite; with `λ = 0` a rank
/// deficient `v` makes it singular, which is reported as an error.
pub fn regularized_least_squares(v: &DMatrix<f64>, r: &[f64], lambda: f64) -> Result<DVector<f64>> {
    if v.ncols() != r.len() {
        return Err(ZeroError::DimensionMismatch {
            expected: v.ncols(),
            actual: r.len(),
        });
    }
    let k = v.nrows();
    let n = r.len() as f64;
    let targets = DVector::from_column_slice(r);

    let gram = v * v.transpose() + DMatrix::identity(k, k) * (lambda * n);
    let rhs = v * targets;

    gram.cholesky()
        .map(|chol| chol.solve(&rhs))
        .ok_or_else(|| {
            ZeroError::SingularSystem(format!(
                "normal equations of size {k} with {} observations and lambda={lambda}",
                r.len()
            ))
        })
}

/// Indices of the `k` largest scores, in no particular order
///
/// Uses partial selection rather than a full sort. Ties at the cut keep the
/// lowest indices.
pub fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, |&a, &b| {
            scores[b].total_cmp(&scores[a]).then(a.cmp(&b))
        });
        indices.truncate(k);
    }
    indices
}

/// Indices of the `k` largest scores, sorted by descending score
///
/// Equal scores are ordered by ascending index.
pub fn top_k_sorted(scores: &[f64], k: usize) -> Vec<usize> {
    let mut indices = top_k_indices(scores, k);
    indices.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    indices
}
