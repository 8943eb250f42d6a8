//! The contract every recommendation algorithm implements

use crate::core::{
    Dimensions, Pair, RatingSet, Recommendation, Result, UserParameters, ZeroError,
};
use crate::metrics::{MetricsRecord, Monitor};
use crate::persistence::{self, ModelState};
use crate::recommend::{self, RecommendRequest};
use std::path::{Path, PathBuf};

/// A rating prediction model
///
/// Models are selected through the [`Registry`](crate::registry::Registry)
/// and driven through this trait only, so evaluation code never depends on a
/// concrete algorithm.
///
/// Numeric degeneracies are resolved by policy, not reported: empty rows get a
/// mean of 0, zero-norm vectors normalise to zero, and a prediction with no
/// supporting weight is 0. A 0-valued prediction therefore does not mean
/// "no opinion".
pub trait RecommendationAlgorithm: Send + Sync {
    /// Bind matrix dimensions; must be called before `fit`
    fn set_parameters(&mut self, nb_users: usize, nb_works: usize);

    /// Dimensions bound by `set_parameters`
    fn dimensions(&self) -> Option<Dimensions>;

    /// Learn model parameters from a rating set
    fn fit(&mut self, ratings: &RatingSet) -> Result<()>;

    /// Estimate ratings for `(user, item)` pairs
    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>>;

    /// Stable identifier used in logs and snapshot names
    fn shortname(&self) -> String;

    fn monitor(&self) -> &Monitor;

    fn monitor_mut(&mut self) -> &mut Monitor;

    /// Compute parameters of a user absent from the trained model
    ///
    /// Only item-side parameters are read; the model is left untouched.
    fn fit_single_user(&self, rated_items: &[usize], ratings: &[f64]) -> Result<UserParameters> {
        let _ = (rated_items, ratings);
        Err(ZeroError::UnsupportedOperation(format!(
            "{} has no single-user fit",
            self.shortname()
        )))
    }

    /// Predict ratings of `item_ids` for a user described by `parameters`
    fn predict_single_user(
        &self,
        item_ids: &[usize],
        parameters: &UserParameters,
    ) -> Result<Vec<f64>> {
        let _ = (item_ids, parameters);
        Err(ZeroError::UnsupportedOperation(format!(
            "{} has no single-user prediction",
            self.shortname()
        )))
    }

    /// Whether `fit_single_user`/`predict_single_user` are available
    fn supports_single_user(&self) -> bool {
        false
    }

    fn is_serializable(&self) -> bool {
        false
    }

    /// Capture the state needed to reproduce predictions
    fn snapshot(&self) -> Result<ModelState> {
        Err(ZeroError::NotSerializable(self.shortname()))
    }

    /// Replace the model state with a snapshot
    fn restore(&mut self, state: ModelState) -> Result<()> {
        let _ = state;
        Err(ZeroError::NotSerializable(self.shortname()))
    }

    /// Dimensions, or a configuration error if they were never bound
    fn require_dimensions(&self) -> Result<Dimensions> {
        self.dimensions()
            .ok_or_else(|| ZeroError::DimensionsNotSet(self.shortname()))
    }

    fn metrics(&self) -> &MetricsRecord {
        self.monitor().record()
    }

    /// Attach the splits scored after every training iteration
    fn set_evaluation(&mut self, train: Option<RatingSet>, test: Option<RatingSet>) {
        self.monitor_mut().set_evaluation(train, test);
    }

    /// Score attached splits and append the values to the metrics record
    fn compute_metrics(&mut self) -> Result<()> {
        if !self.monitor().is_active() {
            return Ok(());
        }
        let evaluations = self.monitor().evaluate(|pairs| self.predict(pairs))?;
        self.monitor_mut().append(evaluations);
        Ok(())
    }

    /// Path of this model's snapshot inside `folder`
    fn backup_path(&self, folder: &Path, filename: Option<&str>) -> Result<PathBuf> {
        if !self.is_serializable() {
            return Err(ZeroError::NotSerializable(self.shortname()));
        }
        Ok(persistence::backup_path(folder, filename, &self.shortname()))
    }

    /// Write a snapshot atomically, returning its path
    fn save(&self, folder: &Path, filename: Option<&str>) -> Result<PathBuf> {
        let path = self.backup_path(folder, filename)?;
        persistence::write_snapshot(&path, &self.shortname(), self.snapshot()?)?;
        Ok(path)
    }

    /// Restore a snapshot written by `save`
    fn load(&mut self, folder: &Path, filename: Option<&str>) -> Result<()> {
        let path = self.backup_path(folder, filename)?;
        let snapshot = persistence::read_snapshot(&path)?;
        self.restore(snapshot.model)
    }

    /// Remove a snapshot written by `save`
    fn delete_snapshot(&self, folder: &Path, filename: Option<&str>) -> Result<()> {
        let path = self.backup_path(folder, filename)?;
        persistence::remove_snapshot(&path)
    }

    /// Rank items for a group of known and cold-start users
    fn recommend(&self, request: &RecommendRequest) -> Result<Vec<Recommendation>> {
        recommend::recommend(self, request)
    }
}
