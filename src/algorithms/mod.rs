//! Rating prediction models
//!
//! Every model implements [`RecommendationAlgorithm`](crate::core::RecommendationAlgorithm)
//! and is registered by name in
//! [`Registry::with_builtin`](crate::registry::Registry::with_builtin).

pub mod als;
pub mod fma;
pub mod knn;
pub mod knn2;
pub mod sgd;
pub mod sgd2;
pub mod svd;
pub mod svdknn;
pub mod zero;

pub use self::als::{Als, AlsConfig};
pub use self::fma::{Fma, FmaConfig};
pub use self::knn::{Knn, KnnConfig};
pub use self::knn2::{Knn2, Knn2Config};
pub use self::sgd::{Sgd, SgdConfig};
pub use self::sgd2::{Sgd2, Sgd2Config};
pub use self::svd::{Svd, SvdConfig};
pub use self::svdknn::{SvdKnn, SvdKnnConfig};
pub use self::zero::Zero;

/// Seed used by every stochastic model unless overridden
pub const DEFAULT_SEED: u64 = 42;

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::core::{Rating, RatingSet};

    pub const NB_USERS: usize = 5;
    pub const NB_WORKS: usize = 10;

    /// Entry of the rank-2 matrix `U · Vᵀ` with
    /// `U = [[1,0],[0,1],[1,1],[1,2],[2,1]]` and `V[j] = [j % 3, (j + 1) % 2]`
    pub fn rank_two(user: usize, item: usize) -> f64 {
        let u = [[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 2.0], [2.0, 1.0]][user];
        let v = [(item % 3) as f64, ((item + 1) % 2) as f64];
        u[0] * v[0] + u[1] * v[1]
    }

    /// The four training pairs of the recovery scenario
    pub fn scenario() -> RatingSet {
        [(1, 0), (2, 1), (3, 0), (3, 1)]
            .into_iter()
            .map(|(u, i)| Rating::new(u, i, rank_two(u, i)))
            .collect()
    }

    /// A denser rating set where every user rates several items
    pub fn dense() -> RatingSet {
        (0..NB_USERS)
            .flat_map(|u| (0..NB_WORKS).map(move |i| (u, i)))
            .filter(|&(u, i)| (u + 2 * i) % 3 != 0)
            .map(|(u, i)| Rating::new(u, i, 1.0 + rank_two(u, i)))
            .collect()
    }
}
