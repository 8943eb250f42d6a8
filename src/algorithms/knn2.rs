//! KNN restricted, for each pair, to the users who rated the item

use crate::core::{
    Dimensions, Pair, RatingSet, RecommendationAlgorithm, Result, SparseMatrix, ZeroError,
};
use crate::metrics::{MetricsRecord, Monitor};
use crate::persistence::{check_shape, ModelState};
use crate::registry::Hyperparameters;
use crate::similarity::{dot, normalize_rows};
use crate::utils::validation::check_pairs;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Knn2Config {
    pub nb_neighbors: usize,
}

impl Default for Knn2Config {
    fn default() -> Self {
        Self { nb_neighbors: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Knn2State {
    pub config: Knn2Config,
    pub dimensions: Dimensions,
    pub ratings: SparseMatrix,
    pub record: MetricsRecord,
}

/// Mean rating of the `k` raters of an item most similar to the user
///
/// Costs a sort of the item's raters per pair, which is fine for evaluation
/// on small datasets only. Raters with equal similarity keep ascending user
/// order. Items nobody rated are predicted as 0.
#[derive(Debug, Clone)]
pub struct Knn2 {
    config: Knn2Config,
    dimensions: Option<Dimensions>,
    ratings: Option<SparseMatrix>,
    by_item: SparseMatrix,
    normalized: SparseMatrix,
    monitor: Monitor,
}

impl Default for Knn2 {
    fn default() -> Self {
        Self::with_config(Knn2Config::default())
    }
}

impl Knn2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Knn2Config) -> Self {
        Self {
            config,
            dimensions: None,
            ratings: None,
            by_item: SparseMatrix::zeros(0, 0),
            normalized: SparseMatrix::zeros(0, 0),
            monitor: Monitor::default(),
        }
    }

    pub fn with_neighbors(mut self, nb_neighbors: usize) -> Self {
        self.config.nb_neighbors = nb_neighbors;
        self
    }

    pub fn default_params() -> Hyperparameters {
        Hyperparameters::new().with("nb_neighbors", Knn2Config::default().nb_neighbors)
    }

    pub fn from_params(params: &Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>> {
        let config = Knn2Config {
            nb_neighbors: params.usize_or("nb_neighbors", Knn2Config::default().nb_neighbors)?,
        };
        Ok(Box::new(Self::with_config(config)))
    }

    fn trained(&self) -> Result<&SparseMatrix> {
        self.ratings
            .as_ref()
            .ok_or_else(|| ZeroError::ModelNotTrained(self.shortname()))
    }

    fn install(&mut self, ratings: SparseMatrix) {
        self.by_item = ratings.transpose();
        self.normalized = normalize_rows(&ratings);
        self.ratings = Some(ratings);
    }

    fn predict_one(&self, user: usize, item: usize) -> f64 {
        let raters = self.by_item.row(item);
        if raters.is_empty() {
            return 0.0;
        }
        let query = self.normalized.row(user);
        let mut ranked: Vec<(f64, f64)> = raters
            .iter()
            .map(|(rater, rating)| (dot(query, self.normalized.row(rater)), rating))
            .collect();
        // Stable, so equal similarities keep ascending rater order
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked.truncate(self.config.nb_neighbors.max(1));
        ranked.iter().map(|&(_, rating)| rating).sum::<f64>() / ranked.len() as f64
    }
}

impl RecommendationAlgorithm for Knn2 {
    fn set_parameters(&mut self, nb_users: usize, nb_works: usize) {
        self.dimensions = Some(Dimensions::new(nb_users, nb_works));
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    fn fit(&mut self, ratings: &RatingSet) -> Result<()> {
        let dims = self.require_dimensions()?;
        self.install(ratings.to_matrix(dims)?);
        self.monitor.record_mut().clear();
        self.compute_metrics()?;
        info!("Fitted {} on {} ratings", self.shortname(), ratings.len());
        Ok(())
    }

    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        self.trained()?;
        check_pairs(dims, pairs)?;
        Ok(pairs
            .iter()
            .map(|&(user, item)| self.predict_one(user, item))
            .collect())
    }

    fn shortname(&self) -> String {
        format!("knn2-{}", self.config.nb_neighbors)
    }

    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    fn is_serializable(&self) -> bool {
        true
    }

    fn snapshot(&self) -> Result<ModelState> {
        let dimensions = self.require_dimensions()?;
        Ok(ModelState::Knn2(Knn2State {
            config: self.config.clone(),
            dimensions,
            ratings: self.trained()?.clone(),
            record: self.monitor.record().clone(),
        }))
    }

    fn restore(&mut self, state: ModelState) -> Result<()> {
        let ModelState::Knn2(state) = state else {
            return Err(state.mismatch("knn2"));
        };
        let d = state.dimensions;
        check_shape(
            "knn2 ratings",
            (state.ratings.nrows(), state.ratings.ncols()),
            (d.nb_users, d.nb_works),
        )?;
        self.config = state.config;
        self.dimensions = Some(state.dimensions);
        self.install(state.ratings);
        *self.monitor.record_mut() = state.record;
        Ok(())
    }
}
