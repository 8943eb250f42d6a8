//! Biased matrix factorization trained by per-sample gradient steps

use crate::algorithms::DEFAULT_SEED;
use crate::core::{
    Dimensions, Pair, RatingSet, RecommendationAlgorithm, Result, UserParameters, ZeroError,
};
use crate::linalg::{random_matrix, random_vector};
use crate::metrics::Monitor;
use crate::registry::Hyperparameters;
use crate::utils::stats::mean;
use crate::utils::timing::Chrono;
use crate::utils::validation::{check_items, check_pairs, check_single_user, latent_parameters};
use log::{debug, info};
use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdConfig {
    pub nb_components: usize,
    pub nb_iterations: usize,
    /// Learning rate
    pub gamma: f64,
    pub lambda: f64,
    pub seed: u64,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            nb_components: 20,
            nb_iterations: 10,
            gamma: 0.01,
            lambda: 0.1,
            seed: DEFAULT_SEED,
        }
    }
}

impl SgdConfig {
    pub fn from_params(params: &Hyperparameters) -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            nb_components: params.usize_or("nb_components", default.nb_components)?,
            nb_iterations: params.usize_or("nb_iterations", default.nb_iterations)?,
            gamma: params.f64_or("gamma", default.gamma)?,
            lambda: params.f64_or("lambda", default.lambda)?,
            seed: params.u64_or("seed", default.seed)?,
        })
    }

    pub fn to_params(&self) -> Hyperparameters {
        Hyperparameters::new()
            .with("nb_components", self.nb_components)
            .with("nb_iterations", self.nb_iterations)
            .with("gamma", self.gamma)
            .with("lambda", self.lambda)
            .with("seed", self.seed)
    }
}

/// `global_bias + user_bias[u] + item_bias[i] + U[u] · V[i]`
///
/// Every training pair is visited once per epoch, in the order given, with an
/// online gradient step on all the terms it touches.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    dimensions: Option<Dimensions>,
    bias: f64,
    bias_u: Vec<f64>,
    bias_v: Vec<f64>,
    /// `nb_users × k`
    u: DMatrix<f64>,
    /// `nb_works × k`
    v: DMatrix<f64>,
    fitted: bool,
    monitor: Monitor,
}

impl Default for Sgd {
    fn default() -> Self {
        Self::with_config(SgdConfig::default())
    }
}

impl Sgd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SgdConfig) -> Self {
        Self {
            config,
            dimensions: None,
            bias: 0.0,
            bias_u: Vec::new(),
            bias_v: Vec::new(),
            u: DMatrix::zeros(0, 0),
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

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.lambda = lambda;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    pub fn default_params() -> Hyperparameters {
        SgdConfig::default().to_params()
    }

    pub fn from_params(params: &Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>> {
        Ok(Box::new(Self::with_config(SgdConfig::from_params(params)?)))
    }

    pub fn global_bias(&self) -> f64 {
        self.bias
    }

    fn check_fitted(&self) -> Result<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(ZeroError::ModelNotTrained(self.shortname()))
        }
    }

    fn predict_one(&self, user: usize, item: usize) -> f64 {
        let interaction: f64 = (0..self.config.nb_components)
            .map(|f| self.u[(user, f)] * self.v[(item, f)])
            .sum();
        self.bias + self.bias_u[user] + self.bias_v[item] + interaction
    }

    fn step(&mut self, user: usize, item: usize, rating: f64) {
        let (gamma, lambda) = (self.config.gamma, self.config.lambda);
        let error = self.predict_one(user, item) - rating;
        self.bias -= gamma * error;
        self.bias_u[user] -= gamma * (error + lambda * self.bias_u[user]);
        self.bias_v[item] -= gamma * (error + lambda * self.bias_v[item]);
        for f in 0..self.config.nb_components {
            let vf = self.v[(item, f)];
            self.u[(user, f)] -= gamma * (error * vf + lambda * self.u[(user, f)]);
            let uf = self.u[(user, f)];
            self.v[(item, f)] -= gamma * (error * uf + lambda * vf);
        }
    }

    fn latent_dot_item(&self, factors: &[f64], item: usize) -> f64 {
        factors
            .iter()
            .enumerate()
            .map(|(f, &x)| x * self.v[(item, f)])
            .sum()
    }
}

impl RecommendationAlgorithm for Sgd {
    fn set_parameters(&mut self, nb_users: usize, nb_works: usize) {
        self.dimensions = Some(Dimensions::new(nb_users, nb_works));
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    fn fit(&mut self, ratings: &RatingSet) -> Result<()> {
        let dims = self.require_dimensions()?;
        ratings.check_bounds(dims)?;
        let k = self.config.nb_components;

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.bias = rng.gen::<f64>();
        self.bias_u = random_vector(dims.nb_users, &mut rng);
        self.bias_v = random_vector(dims.nb_works, &mut rng);
        self.u = random_matrix(dims.nb_users, k, &mut rng);
        self.v = random_matrix(dims.nb_works, k, &mut rng);
        self.fitted = true;
        self.monitor.record_mut().clear();

        for epoch in 0..self.config.nb_iterations {
            let mut chrono = Chrono::new();
            for r in ratings.iter() {
                self.step(r.user, r.item, r.rating);
            }
            chrono.save(&format!("epoch {}/{}", epoch + 1, self.config.nb_iterations));
            self.compute_metrics()?;
        }
        info!("Fitted {} on {} ratings", self.shortname(), ratings.len());
        Ok(())
    }

    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        self.check_fitted()?;
        check_pairs(dims, pairs)?;
        Ok(pairs
            .iter()
            .map(|&(user, item)| self.predict_one(user, item))
            .collect())
    }

    fn shortname(&self) -> String {
        format!("sgd-{}", self.config.nb_components)
    }

    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    /// Gradient descent on the new user's bias and factors, items frozen
    ///
    /// The bias starts at the mean of `ratings` and the factors at seeded
    /// random values, so repeated calls return the same parameters.
    fn fit_single_user(&self, rated_items: &[usize], ratings: &[f64]) -> Result<UserParameters> {
        let dims = self.require_dimensions()?;
        self.check_fitted()?;
        check_single_user(dims, rated_items, ratings)?;
        let (gamma, lambda) = (self.config.gamma, self.config.lambda);

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut bias_user = mean(ratings);
        let mut factors = random_vector(self.config.nb_components, &mut rng);
        for _ in 0..self.config.nb_iterations {
            for (&item, &rating) in rated_items.iter().zip(ratings) {
                let predicted = self.bias
                    + bias_user
                    + self.bias_v[item]
                    + self.latent_dot_item(&factors, item);
                let error = predicted - rating;
                bias_user -= gamma * (error + lambda * bias_user);
                for (f, x) in factors.iter_mut().enumerate() {
                    *x -= gamma * (error * self.v[(item, f)] + lambda * *x);
                }
            }
        }
        debug!("Fitted a single user on {} ratings", ratings.len());
        Ok(UserParameters::Latent {
            offset: bias_user,
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
        let (bias_user, factors) =
            latent_parameters(parameters, self.config.nb_components, &self.shortname())?;
        Ok(item_ids
            .iter()
            .map(|&item| {
                self.bias + bias_user + self.bias_v[item] + self.latent_dot_item(factors, item)
            })
            .collect())
    }

    fn supports_single_user(&self) -> bool {
        true
    }
}
