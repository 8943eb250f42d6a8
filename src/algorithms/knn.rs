//! User-user cosine similarity neighborhoods used directly as a predictor

use crate::cache::{NeighborCache, Neighbors};
use crate::core::{
    Dimensions, Pair, RatingSet, RecommendationAlgorithm, Result, SparseMatrix, SparseVector,
    UserParameters, ZeroError,
};
use crate::linalg::top_k_sorted;
use crate::metrics::{MetricsRecord, Monitor};
use crate::persistence::{check_len, check_shape, ModelState};
use crate::registry::Hyperparameters;
use crate::similarity::{normalize, normalize_rows, similarities};
use crate::utils::timing::Chrono;
use crate::utils::validation::{check_items, check_pairs, check_single_user};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnConfig {
    pub nb_neighbors: usize,
    /// Below this many neighbors who rated the item, the prediction is 0
    pub rated_by_neighbors_at_least: usize,
    /// Substitute the item mean for neighbors who did not rate the item
    pub missing_is_mean: bool,
    /// Weight neighbor ratings by similarity instead of uniformly
    pub weighted_neighbors: bool,
    /// Users whose neighbor lists are kept between calls to `predict`
    pub cache_capacity: usize,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            nb_neighbors: 20,
            rated_by_neighbors_at_least: 3,
            missing_is_mean: true,
            weighted_neighbors: false,
            cache_capacity: 4096,
        }
    }
}

impl KnnConfig {
    pub fn from_params(params: &Hyperparameters) -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            nb_neighbors: params.usize_or("nb_neighbors", default.nb_neighbors)?,
            rated_by_neighbors_at_least: params
                .usize_or("rated_by_neighbors_at_least", default.rated_by_neighbors_at_least)?,
            missing_is_mean: params.bool_or("missing_is_mean", default.missing_is_mean)?,
            weighted_neighbors: params.bool_or("weighted_neighbors", default.weighted_neighbors)?,
            cache_capacity: params.usize_or("cache_capacity", default.cache_capacity)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnState {
    pub config: KnnConfig,
    pub dimensions: Dimensions,
    pub ratings: SparseMatrix,
    pub item_means: Vec<f64>,
    pub record: MetricsRecord,
}

/// Average rating of the `k` users most similar to the query user
///
/// Similarity is the cosine of the raw rating rows. For each pair the
/// neighbors who rated the item contribute their rating; the others
/// contribute the item mean when `missing_is_mean` is set and are skipped
/// otherwise. When fewer than `rated_by_neighbors_at_least` neighbors rated
/// the item the prediction is 0, as it is when the neighbor weights sum to
/// exactly 0. A negative total (weighted mode with anti-correlated
/// neighbors) still divides, so the signs cancel.
pub struct Knn {
    config: KnnConfig,
    dimensions: Option<Dimensions>,
    ratings: Option<SparseMatrix>,
    normalized: SparseMatrix,
    item_means: Vec<f64>,
    cache: Mutex<NeighborCache>,
    monitor: Monitor,
}

impl Default for Knn {
    fn default() -> Self {
        Self::with_config(KnnConfig::default())
    }
}

impl Knn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: KnnConfig) -> Self {
        let cache = Mutex::new(NeighborCache::new(config.cache_capacity));
        Self {
            config,
            dimensions: None,
            ratings: None,
            normalized: SparseMatrix::zeros(0, 0),
            item_means: Vec::new(),
            cache,
            monitor: Monitor::default(),
        }
    }

    pub fn with_neighbors(mut self, nb_neighbors: usize) -> Self {
        self.config.nb_neighbors = nb_neighbors;
        self
    }

    pub fn with_min_raters(mut self, rated_by_neighbors_at_least: usize) -> Self {
        self.config.rated_by_neighbors_at_least = rated_by_neighbors_at_least;
        self
    }

    pub fn with_missing_is_mean(mut self, missing_is_mean: bool) -> Self {
        self.config.missing_is_mean = missing_is_mean;
        self
    }

    pub fn with_weighted_neighbors(mut self, weighted_neighbors: bool) -> Self {
        self.config.weighted_neighbors = weighted_neighbors;
        self
    }

    pub fn config(&self) -> &KnnConfig {
        &self.config
    }

    pub fn default_params() -> Hyperparameters {
        let c = KnnConfig::default();
        Hyperparameters::new()
            .with("nb_neighbors", c.nb_neighbors)
            .with("rated_by_neighbors_at_least", c.rated_by_neighbors_at_least)
            .with("missing_is_mean", c.missing_is_mean)
            .with("weighted_neighbors", c.weighted_neighbors)
            .with("cache_capacity", c.cache_capacity)
    }

    pub fn from_params(params: &Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>> {
        Ok(Box::new(Self::with_config(KnnConfig::from_params(params)?)))
    }

    /// Mean rating of every item, 0 for items nobody rated
    pub fn item_means(&self) -> &[f64] {
        &self.item_means
    }

    fn trained(&self) -> Result<&SparseMatrix> {
        self.ratings
            .as_ref()
            .ok_or_else(|| ZeroError::ModelNotTrained(self.shortname()))
    }

    fn install(&mut self, ratings: SparseMatrix, item_means: Vec<f64>) {
        self.normalized = normalize_rows(&ratings);
        self.ratings = Some(ratings);
        self.item_means = item_means;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The `k` users most similar to `user`, never `user` itself
    ///
    /// When `k` reaches `nb_users - 1` every other user is a neighbor.
    pub fn neighbors(&self, user: usize) -> Neighbors {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(neighbors) = cache.get(user) {
            return neighbors;
        }

        let nb_users = self.normalized.nrows();
        let mut scores = similarities(self.normalized.row(user), &self.normalized);
        let ids: Vec<usize> = if self.config.nb_neighbors < nb_users.saturating_sub(1) {
            scores[user] = f64::NEG_INFINITY;
            top_k_sorted(&scores, self.config.nb_neighbors)
        } else {
            (0..nb_users).filter(|&other| other != user).collect()
        };
        let neighbors: Neighbors = Arc::new(ids.into_iter().map(|i| (i, scores[i])).collect());
        cache.put(user, Arc::clone(&neighbors));
        neighbors
    }

    fn predict_one(&self, ratings: &SparseMatrix, user: usize, item: usize) -> f64 {
        let mut predicted = 0.0;
        let mut weight = 0.0;
        let mut nb_raters = 0;
        for &(neighbor, similarity) in self.neighbors(user).iter() {
            let rating = match ratings.row(neighbor).find(item) {
                Some(rating) => {
                    nb_raters += 1;
                    rating
                }
                None if self.config.missing_is_mean => self.item_means[item],
                None => continue,
            };
            if self.config.weighted_neighbors {
                predicted += similarity * rating;
                weight += similarity;
            } else {
                predicted += rating;
                weight += 1.0;
            }
        }
        if nb_raters < self.config.rated_by_neighbors_at_least || weight == 0.0 {
            return 0.0;
        }
        predicted / weight
    }
}

impl RecommendationAlgorithm for Knn {
    fn set_parameters(&mut self, nb_users: usize, nb_works: usize) {
        self.dimensions = Some(Dimensions::new(nb_users, nb_works));
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    fn fit(&mut self, ratings: &RatingSet) -> Result<()> {
        let dims = self.require_dimensions()?;
        let mut chrono = Chrono::new();
        let matrix = ratings.to_matrix(dims)?;
        let sums = matrix.column_sums();
        let counts = matrix.column_counts();
        let item_means = sums
            .iter()
            .zip(&counts)
            .map(|(&sum, &count)| if count == 0 { 0.0 } else { sum / count as f64 })
            .collect();
        self.install(matrix, item_means);
        chrono.save("fill and normalize matrix");

        self.monitor.record_mut().clear();
        self.compute_metrics()?;
        info!("Fitted {} on {} ratings", self.shortname(), ratings.len());
        Ok(())
    }

    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        let ratings = self.trained()?;
        check_pairs(dims, pairs)?;
        let predictions = pairs
            .iter()
            .map(|&(user, item)| self.predict_one(ratings, user, item))
            .collect();
        if log::log_enabled!(log::Level::Debug) {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            let stats = cache.stats();
            debug!(
                "Neighbor cache: {} hits, {} misses, {} users, hit rate {:.3}",
                stats.hits,
                stats.misses,
                stats.size,
                cache.hit_rate()
            );
        }
        Ok(predictions)
    }

    fn shortname(&self) -> String {
        format!("knn-{}", self.config.nb_neighbors)
    }

    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    /// Ids of the trained users most similar to the new user
    fn fit_single_user(&self, rated_items: &[usize], ratings: &[f64]) -> Result<UserParameters> {
        let dims = self.require_dimensions()?;
        self.trained()?;
        check_single_user(dims, rated_items, ratings)?;
        let query = normalize(&SparseVector::new(rated_items.to_vec(), ratings.to_vec()));
        let scores = similarities(&query, &self.normalized);
        let k = self.config.nb_neighbors.min(scores.len());
        Ok(UserParameters::Neighbors(top_k_sorted(&scores, k)))
    }

    /// Mean of the neighbors' stored ratings per item, 0 if none rated it
    fn predict_single_user(
        &self,
        item_ids: &[usize],
        parameters: &UserParameters,
    ) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        let ratings = self.trained()?;
        check_items(dims, item_ids)?;
        let UserParameters::Neighbors(neighbor_ids) = parameters else {
            return Err(ZeroError::InvalidParameter(format!(
                "{} expects a neighbor list, got latent parameters",
                self.shortname()
            )));
        };
        neighbor_ids.iter().try_for_each(|&u| dims.check_user(u))?;

        Ok(item_ids
            .iter()
            .map(|&item| {
                let (sum, count) = neighbor_ids
                    .iter()
                    .filter_map(|&u| ratings.row(u).find(item))
                    .fold((0.0, 0usize), |(s, c), r| (s + r, c + 1));
                sum / count.max(1) as f64
            })
            .collect())
    }

    fn supports_single_user(&self) -> bool {
        true
    }

    fn is_serializable(&self) -> bool {
        true
    }

    fn snapshot(&self) -> Result<ModelState> {
        let dimensions = self.require_dimensions()?;
        let ratings = self.trained()?;
        Ok(ModelState::Knn(KnnState {
            config: self.config.clone(),
            dimensions,
            ratings: ratings.clone(),
            item_means: self.item_means.clone(),
            record: self.monitor.record().clone(),
        }))
    }

    fn restore(&mut self, state: ModelState) -> Result<()> {
        let ModelState::Knn(state) = state else {
            return Err(state.mismatch("knn"));
        };
        let d = state.dimensions;
        check_shape(
            "knn ratings",
            (state.ratings.nrows(), state.ratings.ncols()),
            (d.nb_users, d.nb_works),
        )?;
        check_len("knn item means", state.item_means.len(), d.nb_works)?;
        self.cache = Mutex::new(NeighborCache::new(state.config.cache_capacity));
        self.config = state.config;
        self.dimensions = Some(state.dimensions);
        self.install(state.ratings, state.item_means);
        *self.monitor.record_mut() = state.record;
        Ok(())
    }
}
