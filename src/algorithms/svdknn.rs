//! Sparse SVD whose user embeddings are smoothed by their nearest neighbors

use crate::algorithms::svd::{check_factors, embeddings, project};
use crate::algorithms::DEFAULT_SEED;
use crate::core::{
    Dimensions, Pair, RatingSet, RecommendationAlgorithm, Result, SparseMatrix, UserParameters,
    ZeroError,
};
use crate::linalg::{truncated_svd, vector_dot_column, TruncatedSvd};
use crate::metrics::{MetricsRecord, Monitor};
use crate::persistence::{check_len, ModelState};
use crate::registry::Hyperparameters;
use crate::utils::stats::mean;
use crate::utils::timing::Chrono;
use crate::utils::validation::{check_items, check_pairs, check_single_user, latent_parameters};
use log::{debug, info};
use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Brute-force Euclidean nearest neighbors over the rows of a dense matrix
#[derive(Debug, Clone)]
pub struct NearestNeighbors {
    points: DMatrix<f64>,
}

impl NearestNeighbors {
    pub fn new(points: DMatrix<f64>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    pub fn point(&self, i: usize) -> Vec<f64> {
        self.points.row(i).iter().copied().collect()
    }

    /// The `k` closest rows as `(row, distance)`, nearest first
    ///
    /// Equal distances are ordered by row index.
    pub fn kneighbors(&self, query: &[f64], k: usize) -> Vec<(usize, f64)> {
        let mut distances: Vec<(usize, f64)> = (0..self.points.nrows())
            .map(|i| {
                let d2: f64 = query
                    .iter()
                    .enumerate()
                    .map(|(j, &q)| (q - self.points[(i, j)]).powi(2))
                    .sum();
                (i, d2.sqrt())
            })
            .collect();
        let k = k.min(distances.len());
        let by_distance =
            |a: &(usize, f64), b: &(usize, f64)| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0));
        if k < distances.len() && k > 0 {
            distances.select_nth_unstable_by(k - 1, by_distance);
        }
        distances.truncate(k);
        distances.sort_by(by_distance);
        distances
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvdKnnConfig {
    pub nb_components: usize,
    pub nb_neighbors: usize,
    /// Weight neighbors by inverse distance instead of uniformly
    pub is_weighted: bool,
    pub nb_iterations: usize,
    pub oversamples: usize,
    pub seed: u64,
}

impl Default for SvdKnnConfig {
    fn default() -> Self {
        Self {
            nb_components: 20,
            nb_neighbors: 5,
            is_weighted: true,
            nb_iterations: 10,
            oversamples: 10,
            seed: DEFAULT_SEED,
        }
    }
}

impl SvdKnnConfig {
    pub fn from_params(params: &Hyperparameters) -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            nb_components: params.usize_or("nb_components", default.nb_components)?,
            nb_neighbors: params.usize_or("nb_neighbors", default.nb_neighbors)?,
            is_weighted: params.bool_or("is_weighted", default.is_weighted)?,
            nb_iterations: params.usize_or("nb_iterations", default.nb_iterations)?,
            oversamples: params.usize_or("oversamples", default.oversamples)?,
            seed: params.u64_or("seed", default.seed)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvdKnnState {
    pub config: SvdKnnConfig,
    pub dimensions: Dimensions,
    pub u: DMatrix<f64>,
    pub sigma: Vec<f64>,
    pub vt: DMatrix<f64>,
    pub row_means: Vec<f64>,
    pub col_means: Vec<f64>,
    pub record: MetricsRecord,
}

/// `R ≈ row_mean + col_mean + ẽ · Vᵀ` where `ẽ` averages neighbor embeddings
///
/// Ratings are centered by user, then by item (column sum divided by the
/// number of users). After the SVD, every query embedding is replaced by the
/// inverse-distance weighted (or uniform) average of its nearest stored
/// embeddings `U · diag(σ)`. A query that coincides with a stored embedding
/// looks one neighbor further and gives zero-distance matches no weight; when
/// no neighbor carries weight the query embedding is kept as is.
#[derive(Debug, Clone)]
pub struct SvdKnn {
    config: SvdKnnConfig,
    dimensions: Option<Dimensions>,
    svd: Option<TruncatedSvd>,
    index: NearestNeighbors,
    row_means: Vec<f64>,
    col_means: Vec<f64>,
    monitor: Monitor,
}

impl Default for SvdKnn {
    fn default() -> Self {
        Self::with_config(SvdKnnConfig::default())
    }
}

impl SvdKnn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SvdKnnConfig) -> Self {
        Self {
            config,
            dimensions: None,
            svd: None,
            index: NearestNeighbors::new(DMatrix::zeros(0, 0)),
            row_means: Vec::new(),
            col_means: Vec::new(),
            monitor: Monitor::default(),
        }
    }

    pub fn with_components(mut self, nb_components: usize) -> Self {
        self.config.nb_components = nb_components;
        self
    }

    pub fn with_neighbors(mut self, nb_neighbors: usize) -> Self {
        self.config.nb_neighbors = nb_neighbors;
        self
    }

    pub fn with_weighting(mut self, is_weighted: bool) -> Self {
        self.config.is_weighted = is_weighted;
        self
    }

    pub fn config(&self) -> &SvdKnnConfig {
        &self.config
    }

    pub fn default_params() -> Hyperparameters {
        let c = SvdKnnConfig::default();
        Hyperparameters::new()
            .with("nb_components", c.nb_components)
            .with("nb_neighbors", c.nb_neighbors)
            .with("is_weighted", c.is_weighted)
            .with("nb_iterations", c.nb_iterations)
            .with("oversamples", c.oversamples)
            .with("seed", c.seed)
    }

    pub fn from_params(params: &Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>> {
        Ok(Box::new(Self::with_config(SvdKnnConfig::from_params(params)?)))
    }

    /// Rating matrix centered by row then by column
    ///
    /// Returns the matrix, the column means and the row means.
    pub fn make_matrix(
        ratings: &RatingSet,
        dims: Dimensions,
    ) -> Result<(SparseMatrix, Vec<f64>, Vec<f64>)> {
        let mut matrix = ratings.to_matrix(dims)?;
        let row_means = matrix.center_rows();
        let col_means = matrix.center_columns(dims.nb_users);
        Ok((matrix, col_means, row_means))
    }

    pub fn row_means(&self) -> &[f64] {
        &self.row_means
    }

    pub fn col_means(&self) -> &[f64] {
        &self.col_means
    }

    fn trained(&self) -> Result<&TruncatedSvd> {
        self.svd
            .as_ref()
            .ok_or_else(|| ZeroError::ModelNotTrained(self.shortname()))
    }

    fn install(&mut self, svd: TruncatedSvd, row_means: Vec<f64>, col_means: Vec<f64>) {
        self.index = NearestNeighbors::new(embeddings(&svd));
        self.svd = Some(svd);
        self.row_means = row_means;
        self.col_means = col_means;
    }

    /// Neighbor-averaged replacement for `query`
    pub fn average_embedding(&self, query: &[f64]) -> Vec<f64> {
        let k = self.config.nb_neighbors;
        let mut neighbors = self.index.kneighbors(query, k);
        if neighbors.first().is_some_and(|&(_, d)| d == 0.0) {
            neighbors = self.index.kneighbors(query, k + 1);
        }

        let mut average = vec![0.0; query.len()];
        let mut total = 0.0;
        for (i, distance) in neighbors {
            let weight = match (distance > 0.0, self.config.is_weighted) {
                (false, _) => 0.0,
                (true, true) => 1.0 / distance,
                (true, false) => 1.0,
            };
            if weight == 0.0 {
                continue;
            }
            total += weight;
            for (j, a) in average.iter_mut().enumerate() {
                *a += weight * self.index.points[(i, j)];
            }
        }
        if total == 0.0 {
            return query.to_vec();
        }
        average.iter_mut().for_each(|a| *a /= total);
        average
    }
}

impl RecommendationAlgorithm for SvdKnn {
    fn set_parameters(&mut self, nb_users: usize, nb_works: usize) {
        self.dimensions = Some(Dimensions::new(nb_users, nb_works));
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    fn fit(&mut self, ratings: &RatingSet) -> Result<()> {
        let dims = self.require_dimensions()?;
        debug!("Computing M: ({} × {})", dims.nb_users, dims.nb_works);

        let mut chrono = Chrono::new();
        let (matrix, col_means, row_means) = Self::make_matrix(ratings, dims)?;
        chrono.save("fill and center matrix");

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let svd = truncated_svd(
            &matrix,
            self.config.nb_components,
            self.config.nb_iterations,
            self.config.oversamples,
            &mut rng,
        )?;
        debug!("Shapes {:?} {} {:?}", svd.u.shape(), svd.rank(), svd.vt.shape());
        self.install(svd, row_means, col_means);
        chrono.save("factor matrix and index embeddings");

        self.monitor.record_mut().clear();
        self.compute_metrics()?;
        info!("Fitted {} on {} ratings", self.shortname(), ratings.len());
        Ok(())
    }

    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        let svd = self.trained()?;
        check_pairs(dims, pairs)?;

        let mut averaged: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        for &(user, _) in pairs {
            averaged
                .entry(user)
                .or_insert_with(|| self.average_embedding(&self.index.point(user)));
        }
        Ok(pairs
            .iter()
            .map(|&(user, item)| {
                vector_dot_column(&averaged[&user], &svd.vt, item)
                    + self.row_means[user]
                    + self.col_means[item]
            })
            .collect())
    }

    fn shortname(&self) -> String {
        let suffix = if self.config.is_weighted { "-weight" } else { "" };
        format!(
            "svdknn-{}-{}{}",
            self.config.nb_components, self.config.nb_neighbors, suffix
        )
    }

    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    fn fit_single_user(&self, rated_items: &[usize], ratings: &[f64]) -> Result<UserParameters> {
        let dims = self.require_dimensions()?;
        let svd = self.trained()?;
        check_single_user(dims, rated_items, ratings)?;
        let offset = mean(ratings);
        let centered: Vec<f64> = rated_items
            .iter()
            .zip(ratings)
            .map(|(&item, &r)| r - offset - self.col_means[item])
            .collect();
        Ok(UserParameters::Latent {
            offset,
            factors: project(&svd.vt, rated_items, &centered),
        })
    }

    fn predict_single_user(
        &self,
        item_ids: &[usize],
        parameters: &UserParameters,
    ) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        let svd = self.trained()?;
        check_items(dims, item_ids)?;
        let (offset, factors) = latent_parameters(parameters, svd.rank(), &self.shortname())?;
        let average = self.average_embedding(factors);
        Ok(item_ids
            .iter()
            .map(|&item| {
                offset + vector_dot_column(&average, &svd.vt, item) + self.col_means[item]
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
        let svd = self.trained()?;
        Ok(ModelState::SvdKnn(SvdKnnState {
            config: self.config.clone(),
            dimensions,
            u: svd.u.clone(),
            sigma: svd.sigma.clone(),
            vt: svd.vt.clone(),
            row_means: self.row_means.clone(),
            col_means: self.col_means.clone(),
            record: self.monitor.record().clone(),
        }))
    }

    fn restore(&mut self, state: ModelState) -> Result<()> {
        let ModelState::SvdKnn(state) = state else {
            return Err(state.mismatch("svdknn"));
        };
        let d = state.dimensions;
        check_factors("svdknn", d, &state.u, &state.sigma, &state.vt)?;
        check_len("svdknn user means", state.row_means.len(), d.nb_users)?;
        check_len("svdknn item means", state.col_means.len(), d.nb_works)?;
        self.config = state.config;
        self.dimensions = Some(d);
        let svd = TruncatedSvd {
            u: state.u,
            sigma: state.sigma,
            vt: state.vt,
        };
        self.install(svd, state.row_means, state.col_means);
        *self.monitor.record_mut() = state.record;
        Ok(())
    }
}
