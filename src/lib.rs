//! Benchmarkable collaborative filtering
//!
//! Interchangeable rating prediction models (ALS, SGD factorizers, sparse
//! SVD, KNN, factorization machines) behind one
//! [`RecommendationAlgorithm`] trait, a name-keyed [`Registry`], ranking
//! metrics and a top-k recommendation combiner.

pub mod algorithms;
pub mod cache;
pub mod core;
pub mod data;
pub mod linalg;
pub mod metrics;
pub mod persistence;
pub mod recommend;
pub mod registry;
pub mod similarity;
pub mod utils;

// Re-export main types for convenience
pub use crate::algorithms::{
    Als, AlsConfig, Fma, FmaConfig, Knn, Knn2, Knn2Config, KnnConfig, Sgd, Sgd2, Sgd2Config,
    SgdConfig, Svd, SvdConfig, SvdKnn, SvdKnnConfig, Zero,
};
pub use crate::cache::{CacheStats, NeighborCache};
pub use crate::core::error::{Result, ZeroError};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::data::{IndexBase, LibSvmDataset, RatingsDataset, SideInformation};
pub use crate::metrics::{Metric, MetricsRecord, Split};
pub use crate::recommend::{CombinationMethod, RecommendRequest};
pub use crate::registry::{Hyperparameters, ParamValue, Registry};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
