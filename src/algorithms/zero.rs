//! Baseline that predicts 0 for every pair

use crate::core::{Dimensions, Pair, RatingSet, RecommendationAlgorithm, Result};
use crate::metrics::Monitor;
use crate::registry::Hyperparameters;
use crate::utils::validation::check_pairs;

#[derive(Debug, Clone, Default)]
pub struct Zero {
    dimensions: Option<Dimensions>,
    monitor: Monitor,
}

impl Zero {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params(_params: &Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>> {
        Ok(Box::new(Self::new()))
    }
}

impl RecommendationAlgorithm for Zero {
    fn set_parameters(&mut self, nb_users: usize, nb_works: usize) {
        self.dimensions = Some(Dimensions::new(nb_users, nb_works));
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    fn fit(&mut self, ratings: &RatingSet) -> Result<()> {
        let dims = self.require_dimensions()?;
        ratings.check_bounds(dims)?;
        self.monitor.record_mut().clear();
        self.compute_metrics()
    }

    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>> {
        check_pairs(self.require_dimensions()?, pairs)?;
        Ok(vec![0.0; pairs.len()])
    }

    fn shortname(&self) -> String {
        "zero".to_string()
    }

    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }
}
