//! Truncated SVD of a sparse matrix by randomized subspace iteration
//!
//! Only products of the sparse matrix with thin dense blocks are formed, so
//! memory stays at `O(nnz + (m + n) · l)` for `l = k + oversamples`. The small
//! `l × n` projection is decomposed densely.
//!
//! Halko, Martinsson, Tropp. "Finding structure with randomness", 2011.

use crate::core::{Result, SparseMatrix, ZeroError};
use nalgebra::DMatrix;
use rand::Rng;

/// Top singular triplets `U · diag(σ) · Vᵀ`
#[derive(Debug, Clone)]
pub struct TruncatedSvd {
    /// `m × k`
    pub u: DMatrix<f64>,
    /// Descending singular values
    pub sigma: Vec<f64>,
    /// `k × n`
    pub vt: DMatrix<f64>,
}

impl TruncatedSvd {
    pub fn rank(&self) -> usize {
        self.sigma.len()
    }
}

fn orthonormal_basis(m: DMatrix<f64>) -> DMatrix<f64> {
    m.qr().q()
}

/// Compute the top `k` singular triplets of `a`
///
/// `k` is clamped to `min(nrows, ncols)`.
pub fn truncated_svd<R: Rng>(
    a: &SparseMatrix,
    k: usize,
    n_iter: usize,
    oversamples: usize,
    rng: &mut R,
) -> Result<TruncatedSvd> {
    let (m, n) = (a.nrows(), a.ncols());
    let k = k.min(m).min(n);
    if k == 0 {
        return Ok(TruncatedSvd {
            u: DMatrix::zeros(m, 0),
            sigma: Vec::new(),
            vt: DMatrix::zeros(0, n),
        });
    }
    let l = (k + oversamples).min(m).min(n);

    let omega: DMatrix<f64> = DMatrix::from_fn(n, l, |_, _| rng.gen_range(-1.0..1.0));
    let mut q = orthonormal_basis(a.mul_dense(&omega)?);
    for _ in 0..n_iter {
        let z = orthonormal_basis(a.transpose_mul_dense(&q)?);
        q = orthonormal_basis(a.mul_dense(&z)?);
    }

    // B = Qᵀ A, l × n
    let b = a.transpose_mul_dense(&q)?.transpose();
    let svd = b.svd(true, true);
    let u_b = svd
        .u
        .ok_or_else(|| ZeroError::SingularSystem("SVD failed to compute U".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| ZeroError::SingularSystem("SVD failed to compute V^T".to_string()))?;

    let values = svd.singular_values;
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[j].total_cmp(&values[i]));
    order.truncate(k);

    let u_small = DMatrix::from_fn(u_b.nrows(), k, |r, c| u_b[(r, order[c])]);
    let vt = DMatrix::from_fn(k, n, |r, c| v_t[(order[r], c)]);
    let sigma = order.iter().map(|&i| values[i]).collect();

    Ok(TruncatedSvd {
        u: q * u_small,
        sigma,
        vt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn reconstruct(svd: &TruncatedSvd, r: usize, c: usize) -> f64 {
        (0..svd.rank())
            .map(|j| svd.u[(r, j)] * svd.sigma[j] * svd.vt[(j, c)])
            .sum()
    }

    #[test]
    fn test_recovers_low_rank_matrix() {
        // Rank 2: rows are combinations of [1, 0, 2, 0] and [0, 1, 1, 3]
        let rows = [[1.0, 0.0, 2.0, 0.0], [0.0, 1.0, 1.0, 3.0], [2.0, 1.0, 5.0, 3.0]];
        let triplets = rows.iter().enumerate().flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .filter(|&(_, &v)| v != 0.0)
                .map(move |(c, &v)| (r, c, v))
        });
        let a = SparseMatrix::from_triplets(3, 4, triplets).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let svd = truncated_svd(&a, 2, 4, 10, &mut rng).unwrap();

        assert_eq!(svd.rank(), 2);
        assert!(svd.sigma[0] >= svd.sigma[1]);
        for (r, row) in rows.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                assert_relative_eq!(reconstruct(&svd, r, c), v, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_clamps_rank_and_handles_zero_matrix() {
        let a = SparseMatrix::zeros(3, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let svd = truncated_svd(&a, 20, 2, 10, &mut rng).unwrap();
        assert_eq!(svd.rank(), 2);
        assert_eq!(svd.u.shape(), (3, 2));
        assert_eq!(svd.vt.shape(), (2, 2));
        assert!(svd.sigma.iter().all(|s| s.abs() < 1e-12));
        assert!(svd.u.iter().all(|x| x.is_finite()));
    }
}
