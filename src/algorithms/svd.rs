//! Truncated SVD of the mean-centered sparse rating matrix

use crate::algorithms::DEFAULT_SEED;
use crate::core::{
    Dimensions, Pair, RatingSet, RecommendationAlgorithm, Result, SparseMatrix, UserParameters,
    ZeroError,
};
use crate::linalg::{row_dot_column, truncated_svd, vector_dot_column, TruncatedSvd};
use crate::metrics::{MetricsRecord, Monitor};
use crate::persistence::{check_len, check_shape, ModelState};
use crate::registry::Hyperparameters;
use crate::utils::stats::mean;
use crate::utils::timing::Chrono;
use crate::utils::validation::{check_items, check_pairs, check_single_user, latent_parameters};
use log::{debug, info};
use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Stored factors must agree with each other and with `dims`
pub(crate) fn check_factors(
    name: &str,
    dims: Dimensions,
    u: &DMatrix<f64>,
    sigma: &[f64],
    vt: &DMatrix<f64>,
) -> Result<()> {
    let rank = sigma.len();
    check_shape(&format!("{name} U"), u.shape(), (dims.nb_users, rank))?;
    check_shape(&format!("{name} Vt"), vt.shape(), (rank, dims.nb_works))
}

/// User embeddings `U · diag(σ)`
pub(crate) fn embeddings(svd: &TruncatedSvd) -> DMatrix<f64> {
    let mut e = svd.u.clone();
    for (j, &s) in svd.sigma.iter().enumerate() {
        e.column_mut(j).scale_mut(s);
    }
    e
}

/// `Σ_j r_j · VT[:, item_j]`, the projection of centered ratings onto `VT`
pub(crate) fn project(vt: &DMatrix<f64>, rated_items: &[usize], centered: &[f64]) -> Vec<f64> {
    let mut factors = vec![0.0; vt.nrows()];
    for (&item, &r) in rated_items.iter().zip(centered) {
        for (f, x) in factors.iter_mut().enumerate() {
            *x += r * vt[(f, item)];
        }
    }
    factors
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvdConfig {
    pub nb_components: usize,
    /// Power iterations of the randomized range finder
    pub nb_iterations: usize,
    pub oversamples: usize,
    pub seed: u64,
}

impl Default for SvdConfig {
    fn default() -> Self {
        Self {
            nb_components: 20,
            nb_iterations: 10,
            oversamples: 10,
            seed: DEFAULT_SEED,
        }
    }
}

impl SvdConfig {
    pub fn from_params(params: &Hyperparameters) -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            nb_components: params.usize_or("nb_components", default.nb_components)?,
            nb_iterations: params.usize_or("nb_iterations", default.nb_iterations)?,
            oversamples: params.usize_or("oversamples", default.oversamples)?,
            seed: params.u64_or("seed", default.seed)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvdState {
    pub config: SvdConfig,
    pub dimensions: Dimensions,
    pub u: DMatrix<f64>,
    pub sigma: Vec<f64>,
    pub vt: DMatrix<f64>,
    pub means: Vec<f64>,
    pub record: MetricsRecord,
    /// Whether the dense reconstruction was precomputed when saved
    #[serde(default)]
    pub unzipped: bool,
}

/// `R ≈ row_mean + U · diag(σ) · Vᵀ`
///
/// The dense user × item matrix is never formed: fitting only multiplies the
/// sparse matrix with thin blocks and prediction reconstructs single entries.
#[derive(Debug, Clone)]
pub struct Svd {
    config: SvdConfig,
    dimensions: Option<Dimensions>,
    svd: Option<TruncatedSvd>,
    embeddings: DMatrix<f64>,
    means: Vec<f64>,
    unzipped: Option<DMatrix<f64>>,
    monitor: Monitor,
}

impl Default for Svd {
    fn default() -> Self {
        Self::with_config(SvdConfig::default())
    }
}

impl Svd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SvdConfig) -> Self {
        Self {
            config,
            dimensions: None,
            svd: None,
            embeddings: DMatrix::zeros(0, 0),
            means: Vec::new(),
            unzipped: None,
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

    pub fn config(&self) -> &SvdConfig {
        &self.config
    }

    pub fn default_params() -> Hyperparameters {
        let c = SvdConfig::default();
        Hyperparameters::new()
            .with("nb_components", c.nb_components)
            .with("nb_iterations", c.nb_iterations)
            .with("oversamples", c.oversamples)
            .with("seed", c.seed)
    }

    pub fn from_params(params: &Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>> {
        Ok(Box::new(Self::with_config(SvdConfig::from_params(params)?)))
    }

    /// Sparse rating matrix with row means removed from stored entries
    pub fn make_matrix(ratings: &RatingSet, dims: Dimensions) -> Result<(SparseMatrix, Vec<f64>)> {
        let mut matrix = ratings.to_matrix(dims)?;
        let means = matrix.center_rows();
        Ok((matrix, means))
    }

    pub fn decomposition(&self) -> Option<&TruncatedSvd> {
        self.svd.as_ref()
    }

    /// Precompute the dense reconstruction used by `predict`
    pub fn unzip(&mut self) -> Result<()> {
        let svd = self.trained()?;
        let mut chrono = Chrono::new();
        let product = &self.embeddings * &svd.vt;
        chrono.save("unzip factors");
        self.unzipped = Some(product);
        Ok(())
    }

    fn trained(&self) -> Result<&TruncatedSvd> {
        self.svd
            .as_ref()
            .ok_or_else(|| ZeroError::ModelNotTrained(self.shortname()))
    }

    fn install(&mut self, svd: TruncatedSvd, means: Vec<f64>) {
        self.embeddings = embeddings(&svd);
        self.svd = Some(svd);
        self.means = means;
        self.unzipped = None;
    }
}

impl RecommendationAlgorithm for Svd {
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
        let (matrix, means) = Self::make_matrix(ratings, dims)?;
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
        chrono.save("factor matrix");

        self.install(svd, means);
        self.monitor.record_mut().clear();
        self.compute_metrics()?;
        info!("Fitted {} on {} ratings", self.shortname(), ratings.len());
        Ok(())
    }

    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        let svd = self.trained()?;
        check_pairs(dims, pairs)?;
        let predictions = match &self.unzipped {
            Some(m) => pairs
                .iter()
                .map(|&(user, item)| self.means[user] + m[(user, item)])
                .collect(),
            None => pairs
                .iter()
                .map(|&(user, item)| {
                    self.means[user] + row_dot_column(&self.embeddings, user, &svd.vt, item)
                })
                .collect(),
        };
        Ok(predictions)
    }

    fn shortname(&self) -> String {
        format!("svd-{}", self.config.nb_components)
    }

    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    /// Project the new user's centered ratings onto `VT`
    fn fit_single_user(&self, rated_items: &[usize], ratings: &[f64]) -> Result<UserParameters> {
        let dims = self.require_dimensions()?;
        let svd = self.trained()?;
        check_single_user(dims, rated_items, ratings)?;
        let offset = mean(ratings);
        let centered: Vec<f64> = ratings.iter().map(|r| r - offset).collect();
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
        Ok(item_ids
            .iter()
            .map(|&item| offset + vector_dot_column(factors, &svd.vt, item))
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
        Ok(ModelState::Svd(SvdState {
            config: self.config.clone(),
            dimensions,
            u: svd.u.clone(),
            sigma: svd.sigma.clone(),
            vt: svd.vt.clone(),
            means: self.means.clone(),
            record: self.monitor.record().clone(),
            unzipped: self.unzipped.is_some(),
        }))
    }

    fn restore(&mut self, state: ModelState) -> Result<()> {
        let ModelState::Svd(state) = state else {
            return Err(state.mismatch("svd"));
        };
        let d = state.dimensions;
        check_factors("svd", d, &state.u, &state.sigma, &state.vt)?;
        check_len("svd user means", state.means.len(), d.nb_users)?;
        self.config = state.config;
        self.dimensions = Some(d);
        let svd = TruncatedSvd {
            u: state.u,
            sigma: state.sigma,
            vt: state.vt,
        };
        self.install(svd, state.means);
        *self.monitor.record_mut() = state.record;
        if state.unzipped {
            self.unzip()?;
        }
        Ok(())
    }
}
