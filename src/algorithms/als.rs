//! Alternating least squares on the mean-centered rating matrix

use crate::algorithms::DEFAULT_SEED;
use crate::core::{
    Dimensions, Pair, RatingSet, RecommendationAlgorithm, Result, SparseMatrix, UserParameters,
    ZeroError,
};
use crate::linalg::{random_matrix, regularized_least_squares, row_dot_column, vector_dot_column};
use crate::metrics::{MetricsRecord, Monitor};
use crate::persistence::{check_len, check_shape, ModelState};
use crate::registry::Hyperparameters;
use crate::utils::stats::mean;
use crate::utils::timing::Chrono;
use crate::utils::validation::{check_items, check_pairs, check_single_user, latent_parameters};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// ALS hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlsConfig {
    pub nb_components: usize,
    pub nb_iterations: usize,
    /// Regularization, scaled by the number of observations of each row
    pub lambda: f64,
    pub seed: u64,
}

impl Default for AlsConfig {
    fn default() -> Self {
        Self {
            nb_components: 20,
            nb_iterations: 40,
            lambda: 0.1,
            seed: DEFAULT_SEED,
        }
    }
}

impl AlsConfig {
    pub fn from_params(params: &Hyperparameters) -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            nb_components: params.usize_or("nb_components", default.nb_components)?,
            nb_iterations: params.usize_or("nb_iterations", default.nb_iterations)?,
            lambda: params.f64_or("lambda", default.lambda)?,
            seed: params.u64_or("seed", default.seed)?,
        })
    }
}

/// Everything needed to reproduce ALS predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlsState {
    pub config: AlsConfig,
    pub dimensions: Dimensions,
    /// `nb_users × k`
    pub u: DMatrix<f64>,
    /// `k × nb_works`
    pub vt: DMatrix<f64>,
    pub means: Vec<f64>,
    pub record: MetricsRecord,
    /// Whether `U · Vᵀ` was precomputed when the snapshot was taken
    #[serde(default)]
    pub unzipped: bool,
}

/// Matrix factorization `R ≈ mean + U · Vᵀ` by alternating ridge regressions
///
/// Each pass solves `(V_r V_rᵀ + λ n_u I) u = V_r r_u` for every user with at
/// least one rating, then the symmetric system for every rated item using the
/// updated user factors.
#[derive(Debug, Clone)]
pub struct Als {
    config: AlsConfig,
    dimensions: Option<Dimensions>,
    u: DMatrix<f64>,
    vt: DMatrix<f64>,
    means: Vec<f64>,
    unzipped: Option<DMatrix<f64>>,
    fitted: bool,
    monitor: Monitor,
}

impl Default for Als {
    fn default() -> Self {
        Self::with_config(AlsConfig::default())
    }
}

impl Als {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AlsConfig) -> Self {
        Self {
            config,
            dimensions: None,
            u: DMatrix::zeros(0, 0),
            vt: DMatrix::zeros(0, 0),
            means: Vec::new(),
            unzipped: None,
            fitted: false,
            monitor: Monitor::default(),
        }
    }

    pub fn with_components(mut self, nb_components: usize) -> Self {
        self.config.nb_components = nb_components;
        self
    }

    pub fn with_iterations(mut self, nb_iterations: usize) -> Self {
        self.config.nb_iterations = nb_iterations;
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.lambda = lambda;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn config(&self) -> &AlsConfig {
        &self.config
    }

    pub fn default_params() -> Hyperparameters {
        let c = AlsConfig::default();
        Hyperparameters::new()
            .with("nb_components", c.nb_components)
            .with("nb_iterations", c.nb_iterations)
            .with("lambda", c.lambda)
            .with("seed", c.seed)
    }

    pub fn from_params(params: &Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>> {
        Ok(Box::new(Self::with_config(AlsConfig::from_params(params)?)))
    }

    /// User factors, `nb_users × k`
    pub fn user_factors(&self) -> &DMatrix<f64> {
        &self.u
    }

    /// Item factors, `k × nb_works`
    pub fn item_factors(&self) -> &DMatrix<f64> {
        &self.vt
    }

    /// Per-user rating means removed before factorization
    pub fn means(&self) -> &[f64] {
        &self.means
    }

    /// Sparse rating matrix with every user's mean removed from its ratings
    pub fn make_matrix(ratings: &RatingSet, dims: Dimensions) -> Result<(SparseMatrix, Vec<f64>)> {
        let mut matrix = ratings.to_matrix(dims)?;
        let means = matrix.center_rows();
        Ok((matrix, means))
    }

    /// Precompute the dense product `U · Vᵀ` used by `predict`
    pub fn unzip(&mut self) -> Result<()> {
        self.check_fitted()?;
        let mut chrono = Chrono::new();
        self.unzipped = Some(&self.u * &self.vt);
        chrono.save("unzip factors");
        Ok(())
    }

    fn check_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(ZeroError::ModelNotTrained(self.shortname()))
        }
    }

    fn solve(&self, observed: &DMatrix<f64>, targets: &[f64]) -> Result<DVector<f64>> {
        regularized_least_squares(observed, targets, self.config.lambda)
    }
}

impl RecommendationAlgorithm for Als {
    fn set_parameters(&mut self, nb_users: usize, nb_works: usize) {
        self.dimensions = Some(Dimensions::new(nb_users, nb_works));
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    fn fit(&mut self, ratings: &RatingSet) -> Result<()> {
        let dims = self.require_dimensions()?;
        let k = self.config.nb_components;
        debug!("Computing M: ({} × {})", dims.nb_users, dims.nb_works);

        let mut chrono = Chrono::new();
        let (matrix, means) = Self::make_matrix(ratings, dims)?;
        let matrix_t = matrix.transpose();
        chrono.save("fill and center matrix");

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.u = random_matrix(dims.nb_users, k, &mut rng);
        self.vt = random_matrix(k, dims.nb_works, &mut rng);
        self.means = means;
        self.unzipped = None;
        self.fitted = true;
        self.monitor.record_mut().clear();

        for iteration in 0..self.config.nb_iterations {
            for (user, row) in matrix.rows().iter().enumerate() {
                if row.is_empty() {
                    continue;
                }
                let observed = self.vt.select_columns(row.indices.iter());
                let x = self.solve(&observed, &row.values)?;
                self.u.set_row(user, &x.transpose());
            }
            for (item, column) in matrix_t.rows().iter().enumerate() {
                if column.is_empty() {
                    continue;
                }
                let observed = self.u.select_rows(column.indices.iter()).transpose();
                let x = self.solve(&observed, &column.values)?;
                self.vt.set_column(item, &x);
            }
            debug!("ALS iteration {}/{}", iteration + 1, self.config.nb_iterations);
            self.compute_metrics()?;
        }
        chrono.save("factor matrix");
        info!(
            "Fitted {} on {} ratings: U {:?}, VT {:?}",
            self.shortname(),
            ratings.len(),
            self.u.shape(),
            self.vt.shape()
        );
        Ok(())
    }

    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        self.check_fitted()?;
        check_pairs(dims, pairs)?;
        let predictions = match &self.unzipped {
            Some(m) => pairs
                .iter()
                .map(|&(user, item)| self.means[user] + m[(user, item)])
                .collect(),
            None => pairs
                .iter()
                .map(|&(user, item)| {
                    self.means[user] + row_dot_column(&self.u, user, &self.vt, item)
                })
                .collect(),
        };
        Ok(predictions)
    }

    fn shortname(&self) -> String {
        format!("als-{}", self.config.nb_components)
    }

    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    fn fit_single_user(&self, rated_items: &[usize], ratings: &[f64]) -> Result<UserParameters> {
        let dims = self.require_dimensions()?;
        self.check_fitted()?;
        check_single_user(dims, rated_items, ratings)?;
        let offset = mean(ratings);
        if rated_items.is_empty() {
            return Ok(UserParameters::Latent {
                offset,
                factors: vec![0.0; self.vt.nrows()],
            });
        }
        let centered: Vec<f64> = ratings.iter().map(|r| r - offset).collect();
        let observed = self.vt.select_columns(rated_items.iter());
        let x = self.solve(&observed, &centered)?;
        Ok(UserParameters::Latent {
            offset,
            factors: x.iter().copied().collect(),
        })
    }

    fn predict_single_user(
        &self,
        item_ids: &[usize],
        parameters: &UserParameters,
    ) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        self.check_fitted()?;
        check_items(dims, item_ids)?;
        let (offset, factors) = latent_parameters(parameters, self.vt.nrows(), &self.shortname())?;
        Ok(item_ids
            .iter()
            .map(|&item| offset + vector_dot_column(factors, &self.vt, item))
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
        self.check_fitted()?;
        Ok(ModelState::Als(AlsState {
            config: self.config.clone(),
            dimensions,
            u: self.u.clone(),
            vt: self.vt.clone(),
            means: self.means.clone(),
            record: self.monitor.record().clone(),
            unzipped: self.unzipped.is_some(),
        }))
    }

    fn restore(&mut self, state: ModelState) -> Result<()> {
        let ModelState::Als(state) = state else {
            return Err(state.mismatch("als"));
        };
        let d = state.dimensions;
        let k = state.config.nb_components;
        check_shape("als U", state.u.shape(), (d.nb_users, k))?;
        check_shape("als Vt", state.vt.shape(), (k, d.nb_works))?;
        check_len("als user means", state.means.len(), d.nb_users)?;
        self.config = state.config;
        self.dimensions = Some(d);
        self.u = state.u;
        self.vt = state.vt;
        self.means = state.means;
        self.unzipped = None;
        self.fitted = true;
        *self.monitor.record_mut() = state.record;
        if state.unzipped {
            self.unzip()?;
        }
        Ok(())
    }
}
