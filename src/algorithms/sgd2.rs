//! Factorization machine over one-hot user/item rows, trained by mini-batches

use crate::algorithms::DEFAULT_SEED;
use crate::core::{
    Dimensions, Pair, RatingSet, RecommendationAlgorithm, Result, SparseVector, UserParameters,
    ZeroError,
};
use crate::linalg::{random_matrix, random_vector};
use crate::metrics::Monitor;
use crate::registry::Hyperparameters;
use crate::utils::stats::mean;
use crate::utils::timing::Chrono;
use crate::utils::validation::{check_items, check_pairs, check_single_user, latent_parameters};
use log::{debug, info};
use nalgebra::DMatrix;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Factorization machine score of a sparse design row
///
/// `Σ x_a w_a + ½ Σ_f ((Σ_a x_a V_af)² − Σ_a x_a² V_af²)`
pub fn fm_score(x: &SparseVector, w: &[f64], v: &DMatrix<f64>) -> f64 {
    let linear: f64 = x.iter().map(|(a, xa)| xa * w[a]).sum();
    let pairwise: f64 = (0..v.ncols())
        .map(|f| {
            let (sum, sum_sq) = x.iter().fold((0.0, 0.0), |(s, sq), (a, xa)| {
                let t = xa * v[(a, f)];
                (s + t, sq + t * t)
            });
            sum * sum - sum_sq
        })
        .sum();
    linear + 0.5 * pairwise
}

/// One-hot design row `[user, nb_users + item]`
pub fn one_hot(dims: Dimensions, (user, item): Pair) -> SparseVector {
    SparseVector::new(vec![user, dims.nb_users + item], vec![1.0, 1.0])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sgd2Config {
    pub nb_components: usize,
    pub nb_iterations: usize,
    pub gamma: f64,
    pub lambda: f64,
    /// Number of mini-batches per epoch
    pub batches: usize,
    pub seed: u64,
}

impl Default for Sgd2Config {
    fn default() -> Self {
        Self {
            nb_components: 20,
            nb_iterations: 10,
            gamma: 0.01,
            lambda: 0.1,
            batches: 400,
            seed: DEFAULT_SEED,
        }
    }
}

impl Sgd2Config {
    pub fn from_params(params: &Hyperparameters) -> Result<Self> {
        let default = Self::default();
        let config = Self {
            nb_components: params.usize_or("nb_components", default.nb_components)?,
            nb_iterations: params.usize_or("nb_iterations", default.nb_iterations)?,
            gamma: params.f64_or("gamma", default.gamma)?,
            lambda: params.f64_or("lambda", default.lambda)?,
            batches: params.usize_or("batches", default.batches)?,
            seed: params.u64_or("seed", default.seed)?,
        };
        if config.batches == 0 {
            return Err(ZeroError::InvalidParameter(
                "batches must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Mini-batch gradient descent on a second-order factorization machine
///
/// Each rating becomes a design row with a one at the user column and a one
/// at `nb_users + item`, so the score reduces to
/// `w[user] + w[item'] + V[user] · V[item']`. There is no global bias.
#[derive(Debug, Clone)]
pub struct Sgd2 {
    config: Sgd2Config,
    dimensions: Option<Dimensions>,
    /// One weight per design column
    w: Vec<f64>,
    /// One latent row per design column
    v: DMatrix<f64>,
    fitted: bool,
    monitor: Monitor,
}

impl Default for Sgd2 {
    fn default() -> Self {
        Self::with_config(Sgd2Config::default())
    }
}

impl Sgd2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Sgd2Config) -> Self {
        Self {
            config,
            dimensions: None,
            w: Vec::new(),
            v: DMatrix::zeros(0, 0),
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

    pub fn with_learning_rate(mut self, gamma: f64) -> Self {
        self.config.gamma = gamma;
        self
    }

    pub fn with_batches(mut self, batches: usize) -> Self {
        self.config.batches = batches.max(1);
        self
    }

    pub fn config(&self) -> &Sgd2Config {
        &self.config
    }

    pub fn default_params() -> Hyperparameters {
        let c = Sgd2Config::default();
        Hyperparameters::new()
            .with("nb_components", c.nb_components)
            .with("nb_iterations", c.nb_iterations)
            .with("gamma", c.gamma)
            .with("lambda", c.lambda)
            .with("batches", c.batches)
            .with("seed", c.seed)
    }

    pub fn from_params(params: &Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>> {
        Ok(Box::new(Self::with_config(Sgd2Config::from_params(params)?)))
    }

    fn check_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(ZeroError::ModelNotTrained(self.shortname()))
        }
    }

    /// Apply the averaged gradient of one mini-batch
    fn batch_step(&mut self, rows: &[SparseVector], targets: &[f64], batch: &[usize]) {
        let (gamma, lambda) = (self.config.gamma, self.config.lambda);
        let k = self.config.nb_components;
        let size = batch.len() as f64;
        let mut w_grad = vec![0.0; self.w.len()];
        let mut v_grad = DMatrix::<f64>::zeros(self.v.nrows(), k);

        for &idx in batch {
            let x = &rows[idx];
            let error = fm_score(x, &self.w, &self.v) - targets[idx];
            let sums: Vec<f64> = (0..k)
                .map(|f| x.iter().map(|(b, xb)| xb * self.v[(b, f)]).sum())
                .collect();
            for (a, xa) in x.iter() {
                w_grad[a] += error * xa;
                for (f, &sum) in sums.iter().enumerate() {
                    v_grad[(a, f)] += error * xa * (sum - xa * self.v[(a, f)]);
                }
            }
        }

        for (w, g) in self.w.iter_mut().zip(&w_grad) {
            *w -= gamma * (g / size + lambda * *w);
        }
        for (v, g) in self.v.iter_mut().zip(v_grad.iter()) {
            *v -= gamma * (g / size + lambda * *v);
        }
    }

    fn item_column(&self, dims: Dimensions, item: usize) -> usize {
        dims.nb_users + item
    }

    fn latent_dot_column(&self, factors: &[f64], column: usize) -> f64 {
        factors
            .iter()
            .enumerate()
            .map(|(f, &x)| x * self.v[(column, f)])
            .sum()
    }
}

impl RecommendationAlgorithm for Sgd2 {
    fn set_parameters(&mut self, nb_users: usize, nb_works: usize) {
        self.dimensions = Some(Dimensions::new(nb_users, nb_works));
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    fn fit(&mut self, ratings: &RatingSet) -> Result<()> {
        let dims = self.require_dimensions()?;
        ratings.check_bounds(dims)?;
        let n_columns = dims.nb_users + dims.nb_works;

        let mut chrono = Chrono::new();
        let rows: Vec<SparseVector> = ratings
            .pairs()
            .into_iter()
            .map(|p| one_hot(dims, p))
            .collect();
        let targets = ratings.values();
        chrono.save("prepare data in sparse FM format");

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.w = random_vector(n_columns, &mut rng);
        self.v = random_matrix(n_columns, self.config.nb_components, &mut rng);
        self.fitted = true;
        self.monitor.record_mut().clear();

        let batch_size = (rows.len() / self.config.batches).max(1);
        let mut order: Vec<usize> = (0..rows.len()).collect();
        for epoch in 0..self.config.nb_iterations {
            order.shuffle(&mut rng);
            for batch in order.chunks(batch_size).take(self.config.batches) {
                self.batch_step(&rows, &targets, batch);
            }
            chrono.save(&format!("epoch {}/{}", epoch + 1, self.config.nb_iterations));
            self.compute_metrics()?;
        }
        info!(
            "Fitted {} on {} ratings with batches of {}",
            self.shortname(),
            rows.len(),
            batch_size
        );
        Ok(())
    }

    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        self.check_fitted()?;
        check_pairs(dims, pairs)?;
        Ok(pairs
            .iter()
            .map(|&pair| fm_score(&one_hot(dims, pair), &self.w, &self.v))
            .collect())
    }

    fn shortname(&self) -> String {
        format!("sgd2-{}", self.config.nb_components)
    }

    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    /// Per-sample gradient descent on the new user's column, items frozen
    fn fit_single_user(&self, rated_items: &[usize], ratings: &[f64]) -> Result<UserParameters> {
        let dims = self.require_dimensions()?;
        self.check_fitted()?;
        check_single_user(dims, rated_items, ratings)?;
        let (gamma, lambda) = (self.config.gamma, self.config.lambda);

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut weight = mean(ratings);
        let mut factors = random_vector(self.config.nb_components, &mut rng);
        for _ in 0..self.config.nb_iterations {
            for (&item, &rating) in rated_items.iter().zip(ratings) {
                let column = self.item_column(dims, item);
                let error =
                    weight + self.w[column] + self.latent_dot_column(&factors, column) - rating;
                weight -= gamma * (error + lambda * weight);
                for (f, x) in factors.iter_mut().enumerate() {
                    *x -= gamma * (error * self.v[(column, f)] + lambda * *x);
                }
            }
        }
        debug!("Fitted a single user on {} ratings", ratings.len());
        Ok(UserParameters::Latent {
            offset: weight,
            factors,
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
        let (weight, factors) =
            latent_parameters(parameters, self.config.nb_components, &self.shortname())?;
        Ok(item_ids
            .iter()
            .map(|&item| {
                let column = self.item_column(dims, item);
                weight + self.w[column] + self.latent_dot_column(factors, column)
            })
            .collect())
    }

    fn supports_single_user(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::fixtures::{dense, NB_USERS, NB_WORKS};
    use crate::metrics::{Metric, Split};
    use approx::assert_relative_eq;

    #[test]
    fn test_fm_score_of_one_hot_row() {
        let w = vec![0.5, 1.0, 2.0];
        let v = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 0.0, 0.0, 3.0, -1.0]);
        let x = SparseVector::new(vec![0, 2], vec![1.0, 1.0]);
        // w0 + w2 + V0 · V2 = 0.5 + 2 + (3 - 2)
        assert_relative_eq!(fm_score(&x, &w, &v), 3.5, epsilon = 1e-12);
        // A single active column has no pairwise term
        let single = SparseVector::new(vec![1], vec![1.0]);
        assert_relative_eq!(fm_score(&single, &w, &v), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_one_hot_layout() {
        let row = one_hot(Dimensions::new(5, 10), (3, 4));
        assert_eq!(row.indices, vec![3, 9]);
        assert_eq!(row.values, vec![1.0, 1.0]);
    }

    #[test]
    fn test_zero_batches_rejected() {
        let params = Sgd2::default_params().with("batches", 0usize);
        assert!(Sgd2::from_params(&params).is_err());
    }

    #[test]
    fn test_mini_batch_training() {
        let train = dense();
        let mut sgd2 = Sgd2::new()
            .with_components(3)
            .with_iterations(15)
            .with_batches(4)
            .with_learning_rate(0.05);
        sgd2.set_parameters(NB_USERS, NB_WORKS);
        sgd2.set_evaluation(Some(train.clone()), None);
        sgd2.fit(&train).unwrap();

        let history = sgd2.metrics().history(Split::Train, Metric::Rmse);
        assert_eq!(history.len(), 15);
        assert!(history.iter().all(|x| x.is_finite()));
        let predictions = sgd2.predict(&train.pairs()).unwrap();
        assert_eq!(predictions.len(), train.len());
    }

    #[test]
    fn test_single_user_pair() {
        let mut sgd2 = Sgd2::new().with_components(2).with_iterations(3);
        sgd2.set_parameters(NB_USERS, NB_WORKS);
        sgd2.fit(&dense()).unwrap();

        let params = sgd2.fit_single_user(&[1], &[2.0]).unwrap();
        let items: Vec<usize> = (0..NB_WORKS).collect();
        let predictions = sgd2.predict_single_user(&items, &params).unwrap();
        assert_eq!(predictions.len(), NB_WORKS);
        assert!(predictions.iter().all(|p| p.is_finite()));
        assert_eq!(sgd2.shortname(), "sgd2-2");
    }
}
