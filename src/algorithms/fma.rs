//! Factorization machine with tag side information, trained by libFM
//!
//! Design rows are `[user, nb_users + item, nb_users + nb_works + tag...]`
//! with one-hot user and item columns and rounded tag values. Training is
//! delegated to an [`FmSolver`]; the default one runs the external `libFM`
//! binary on LibSVM files written to a temporary directory.
//!
//! A failing solver does not fail `fit`: the model falls back to random
//! parameters, logs a warning and reports [`Fma::is_degraded`].

use crate::algorithms::sgd2::fm_score;
use crate::algorithms::DEFAULT_SEED;
use crate::core::{
    Dimensions, Pair, RatingSet, RecommendationAlgorithm, Result, SparseMatrix, SparseVector,
    ZeroError,
};
use crate::data::libsvm::{write_libsvm_file, IndexBase};
use crate::data::side::{SideInformation, DEFAULT_TAGS_PATH};
use crate::linalg::{random_matrix, random_vector};
use crate::metrics::{Metric, MetricsRecord, Monitor, Split};
use crate::persistence::ModelState;
use crate::registry::Hyperparameters;
use crate::utils::timing::Chrono;
use crate::utils::validation::check_pairs;
use log::{debug, info, warn};
use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variable holding the libFM binary or its folder
pub const LIBFM_PATH_VAR: &str = "LIBFM_PATH";

const LIBFM_BINARY: &str = "libFM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FmaConfig {
    pub rank: usize,
    pub nb_iterations: usize,
    /// Seeds the solver and the fallback parameters
    pub seed: u64,
}

impl Default for FmaConfig {
    fn default() -> Self {
        Self {
            rank: 20,
            nb_iterations: 20,
            seed: DEFAULT_SEED,
        }
    }
}

/// A regression problem handed to a solver
#[derive(Debug, Clone, Copy)]
pub struct SolverJob<'a> {
    pub train: &'a [SparseVector],
    pub train_targets: &'a [f64],
    pub test: &'a [SparseVector],
    pub test_targets: &'a [f64],
    pub rank: usize,
    pub nb_iterations: usize,
    pub seed: u64,
}

/// Parameters learned by a solver
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolvedModel {
    pub global_bias: f64,
    /// One weight per feature seen by the solver
    pub weights: Vec<f64>,
    /// One row of `rank` factors per feature seen by the solver
    pub pairwise: Vec<Vec<f64>>,
    /// Test RMSE after each iteration, empty if the solver does not log it
    pub test_rmse: Vec<f64>,
}

/// Trains a second-order factorization machine
///
/// Failures of the solver itself must be reported as [`ZeroError::Solver`];
/// any other error aborts `fit`.
pub trait FmSolver: Send + Sync {
    fn solve(&self, job: &SolverJob<'_>) -> Result<SolvedModel>;
}

/// The external libFM command line solver
#[derive(Debug, Clone, Default)]
pub struct LibFm {
    binary: Option<PathBuf>,
}

impl LibFm {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(binary.into()),
        }
    }

    /// `$LIBFM_PATH` (the binary or its folder), else `libFM` on `PATH`
    pub fn locate() -> Self {
        let binary = env::var_os(LIBFM_PATH_VAR)
            .map(PathBuf::from)
            .map(|path| {
                if path.is_dir() {
                    path.join(LIBFM_BINARY)
                } else {
                    path
                }
            })
            .or_else(|| {
                env::var_os("PATH").and_then(|paths| {
                    env::split_paths(&paths)
                        .map(|dir| dir.join(LIBFM_BINARY))
                        .find(|candidate| candidate.is_file())
                })
            });
        Self { binary }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

impl FmSolver for LibFm {
    fn solve(&self, job: &SolverJob<'_>) -> Result<SolvedModel> {
        let binary = self.binary.as_ref().ok_or_else(|| {
            ZeroError::Solver(format!(
                "{LIBFM_BINARY} not found, set {LIBFM_PATH_VAR} or add it to PATH"
            ))
        })?;

        let dir = tempfile::tempdir()?;
        let train_path = dir.path().join("train.libfm");
        let test_path = dir.path().join("test.libfm");
        let model_path = dir.path().join("model.libfm");
        let rlog_path = dir.path().join("rlog.tsv");
        write_libsvm_file(&train_path, job.train, job.train_targets, IndexBase::Zero)?;
        write_libsvm_file(&test_path, job.test, job.test_targets, IndexBase::Zero)?;

        debug!("Running {} in {}", binary.display(), dir.path().display());
        let output = Command::new(binary)
            .args(["-task", "r", "-method", "als"])
            .arg("-train")
            .arg(&train_path)
            .arg("-test")
            .arg(&test_path)
            .arg("-dim")
            .arg(format!("1,1,{}", job.rank))
            .arg("-iter")
            .arg(job.nb_iterations.to_string())
            .arg("-seed")
            .arg(job.seed.to_string())
            .arg("-save_model")
            .arg(&model_path)
            .arg("-rlog")
            .arg(&rlog_path)
            .output()
            .map_err(|e| ZeroError::Solver(format!("cannot run {}: {e}", binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ZeroError::Solver(format!(
                "{} exited with {}: {}",
                binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        let text = fs::read_to_string(&model_path)
            .map_err(|e| ZeroError::Solver(format!("cannot read saved model: {e}")))?;
        let mut model = parse_model(&text)?;
        model.test_rmse = match fs::read_to_string(&rlog_path) {
            Ok(log) => parse_rlog(&log)?,
            Err(_) => Vec::new(),
        };
        Ok(model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Start,
    Bias,
    Unary,
    Pairwise,
}

fn solver_number(token: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| ZeroError::Solver(format!("invalid number in solver output: {token}")))
}

/// Parse a model written by `libFM -save_model`
pub fn parse_model(text: &str) -> Result<SolvedModel> {
    let mut section = Section::Start;
    let mut global_bias = None;
    let mut model = SolvedModel::default();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with('#') {
            section = if line.contains("global bias") {
                Section::Bias
            } else if line.contains("unary") {
                Section::Unary
            } else if line.contains("pairwise") {
                Section::Pairwise
            } else {
                return Err(ZeroError::Solver(format!("unknown model section: {line}")));
            };
            continue;
        }
        match section {
            Section::Start => {
                return Err(ZeroError::Solver(format!("value outside any section: {line}")))
            }
            Section::Bias => global_bias = Some(solver_number(line)?),
            Section::Unary => model.weights.push(solver_number(line)?),
            Section::Pairwise => model.pairwise.push(
                line.split_whitespace()
                    .map(solver_number)
                    .collect::<Result<Vec<_>>>()?,
            ),
        }
    }

    model.global_bias =
        global_bias.ok_or_else(|| ZeroError::Solver("model has no global bias".to_string()))?;
    Ok(model)
}

/// Extract the `rmse` column of a libFM `-rlog` file
pub fn parse_rlog(text: &str) -> Result<Vec<f64>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let column = header
        .split_whitespace()
        .position(|name| name == "rmse")
        .ok_or_else(|| ZeroError::Solver("rlog has no rmse column".to_string()))?;
    lines
        .map(|line| {
            let token = line.split_whitespace().nth(column).ok_or_else(|| {
                ZeroError::Solver(format!("rlog line has no rmse value: {line}"))
            })?;
            solver_number(token)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FmaState {
    pub config: FmaConfig,
    pub dimensions: Dimensions,
    pub tags: SparseMatrix,
    pub mu: f64,
    pub w: Vec<f64>,
    /// `nb_agents × rank`
    pub v: DMatrix<f64>,
    pub degraded: bool,
    pub record: MetricsRecord,
}

#[derive(Debug, Clone, PartialEq)]
struct FmParameters {
    mu: f64,
    w: Vec<f64>,
    v: DMatrix<f64>,
}

impl FmParameters {
    fn random(nb_agents: usize, rank: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let w = random_vector(nb_agents, &mut rng);
        let v = random_matrix(nb_agents, rank, &mut rng);
        Self { mu: 0.0, w, v }
    }

    /// Zero-pad the solver's parameters up to `nb_agents` features
    ///
    /// The solver only knows the largest column it saw, so trailing users,
    /// works or tags that never occur are missing from its output.
    fn padded(model: SolvedModel, nb_agents: usize, rank: usize) -> Result<Self> {
        if model.weights.len() > nb_agents || model.pairwise.len() > nb_agents {
            return Err(ZeroError::Solver(format!(
                "solver returned {} features, expected at most {nb_agents}",
                model.weights.len().max(model.pairwise.len())
            )));
        }
        if let Some(row) = model.pairwise.iter().find(|row| row.len() != rank) {
            return Err(ZeroError::Solver(format!(
                "solver returned {} factors per feature, expected {rank}",
                row.len()
            )));
        }

        let mut w = model.weights;
        w.resize(nb_agents, 0.0);
        let mut v = DMatrix::zeros(nb_agents, rank);
        for (a, row) in model.pairwise.iter().enumerate() {
            for (f, &value) in row.iter().enumerate() {
                v[(a, f)] = value;
            }
        }
        Ok(Self {
            mu: model.global_bias,
            w,
            v,
        })
    }
}

/// Factorization machine regression over users, works and tags
pub struct Fma {
    config: FmaConfig,
    dimensions: Option<Dimensions>,
    side: SideInformation,
    solver: Box<dyn FmSolver>,
    params: Option<FmParameters>,
    degraded: bool,
    monitor: Monitor,
}

impl Default for Fma {
    fn default() -> Self {
        Self::with_config(FmaConfig::default())
    }
}

impl Fma {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model without side information using the libFM found on this host
    pub fn with_config(config: FmaConfig) -> Self {
        Self {
            config,
            dimensions: None,
            side: SideInformation::empty(),
            solver: Box::new(LibFm::locate()),
            params: None,
            degraded: false,
            monitor: Monitor::default(),
        }
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.config.rank = rank;
        self
    }

    pub fn with_iterations(mut self, nb_iterations: usize) -> Self {
        self.config.nb_iterations = nb_iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Replace the tag matrix; learned parameters are dropped
    pub fn with_side_information(mut self, side: SideInformation) -> Self {
        self.side = side;
        self.params = None;
        self
    }

    pub fn with_solver(mut self, solver: Box<dyn FmSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn default_params() -> Hyperparameters {
        let c = FmaConfig::default();
        Hyperparameters::new()
            .with("rank", c.rank)
            .with("nb_iterations", c.nb_iterations)
            .with("seed", c.seed)
    }

    /// Build from hyperparameters, reading tags from [`DEFAULT_TAGS_PATH`] if present
    pub fn from_params(params: &Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>> {
        let default = FmaConfig::default();
        let config = FmaConfig {
            rank: params.usize_or("rank", default.rank)?,
            nb_iterations: params.usize_or("nb_iterations", default.nb_iterations)?,
            seed: params.u64_or("seed", default.seed)?,
        };
        let side = SideInformation::from_file(DEFAULT_TAGS_PATH)?;
        Ok(Box::new(Self::with_config(config).with_side_information(side)))
    }

    pub fn config(&self) -> &FmaConfig {
        &self.config
    }

    pub fn side_information(&self) -> &SideInformation {
        &self.side
    }

    /// Whether the last fit fell back to random parameters
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Number of design matrix columns
    pub fn nb_agents(&self, dims: Dimensions) -> usize {
        dims.nb_users + dims.nb_works + self.side.nb_tags()
    }

    /// Design row of one `(user, item)` pair
    ///
    /// Tag values are rounded to the nearest integer; tags rounding to 0
    /// are left out.
    pub fn design_row(&self, dims: Dimensions, (user, item): Pair) -> SparseVector {
        let mut indices = vec![user, dims.nb_users + item];
        let mut values = vec![1.0, 1.0];
        if let Some(tags) = self.side.tags_of(item) {
            let offset = dims.nb_users + dims.nb_works;
            for (tag, value) in tags.iter() {
                let value = value.round();
                if value != 0.0 {
                    indices.push(offset + tag);
                    values.push(value);
                }
            }
        }
        SparseVector::new(indices, values)
    }

    fn design(&self, dims: Dimensions, pairs: &[Pair]) -> Vec<SparseVector> {
        pairs.iter().map(|&pair| self.design_row(dims, pair)).collect()
    }

    fn trained(&self) -> Result<&FmParameters> {
        self.params
            .as_ref()
            .ok_or_else(|| ZeroError::ModelNotTrained(self.shortname()))
    }
}

impl RecommendationAlgorithm for Fma {
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
        let mut chrono = Chrono::new();

        let train = self.design(dims, &ratings.pairs());
        let train_targets = ratings.values();
        let (test, test_targets) = match self.monitor.test_set() {
            Some(set) => {
                set.check_bounds(dims)?;
                (self.design(dims, &set.pairs()), set.values())
            }
            None => (train.clone(), train_targets.clone()),
        };
        chrono.save("prepare data in sparse FM format");

        let nb_agents = self.nb_agents(dims);
        let rank = self.config.rank;
        let job = SolverJob {
            train: &train,
            train_targets: &train_targets,
            test: &test,
            test_targets: &test_targets,
            rank,
            nb_iterations: self.config.nb_iterations,
            seed: self.config.seed,
        };
        let solved = self
            .solver
            .solve(&job)
            .and_then(|model| {
                let test_rmse = model.test_rmse.clone();
                FmParameters::padded(model, nb_agents, rank).map(|params| (params, test_rmse))
            });
        chrono.save("train FM");

        let (params, test_rmse) = match solved {
            Ok(solved) => {
                self.degraded = false;
                solved
            }
            Err(ZeroError::Solver(reason)) => {
                warn!(
                    "{}: {reason}; falling back to random parameters",
                    self.shortname()
                );
                self.degraded = true;
                (
                    FmParameters::random(nb_agents, rank, self.config.seed),
                    Vec::new(),
                )
            }
            Err(e) => return Err(e),
        };
        self.params = Some(params);

        self.compute_metrics()?;
        if !test_rmse.is_empty() {
            self.monitor
                .record_mut()
                .replace(Split::Test, Metric::Rmse, test_rmse);
        }
        info!(
            "Fitted {} on {} ratings with {} features{}",
            self.shortname(),
            ratings.len(),
            nb_agents,
            if self.degraded { " (degraded)" } else { "" }
        );
        Ok(())
    }

    fn predict(&self, pairs: &[Pair]) -> Result<Vec<f64>> {
        let dims = self.require_dimensions()?;
        let params = self.trained()?;
        check_pairs(dims, pairs)?;
        Ok(pairs
            .iter()
            .map(|&pair| params.mu + fm_score(&self.design_row(dims, pair), &params.w, &params.v))
            .collect())
    }

    fn shortname(&self) -> String {
        format!("fma-{}", self.config.rank)
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
        let params = self.trained()?;
        Ok(ModelState::Fma(FmaState {
            config: self.config.clone(),
            dimensions,
            tags: self.side.matrix().clone(),
            mu: params.mu,
            w: params.w.clone(),
            v: params.v.clone(),
            degraded: self.degraded,
            record: self.monitor.record().clone(),
        }))
    }

    fn restore(&mut self, state: ModelState) -> Result<()> {
        let ModelState::Fma(state) = state else {
            return Err(state.mismatch("fma"));
        };
        let side = SideInformation::from_matrix(state.tags);
        let d = state.dimensions;
        let nb_agents = d.nb_users + d.nb_works + side.nb_tags();
        if state.w.len() != nb_agents || state.v.shape() != (nb_agents, state.config.rank) {
            return Err(ZeroError::IncompatibleSnapshot(format!(
                "fma snapshot has {} weights for {nb_agents} features",
                state.w.len()
            )));
        }
        self.config = state.config;
        self.dimensions = Some(d);
        self.side = side;
        self.params = Some(FmParameters {
            mu: state.mu,
            w: state.w,
            v: state.v,
        });
        self.degraded = state.degraded;
        *self.monitor.record_mut() = state.record;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rating;
    use approx::assert_relative_eq;

    struct FailingSolver;

    impl FmSolver for FailingSolver {
        fn solve(&self, _job: &SolverJob<'_>) -> Result<SolvedModel> {
            Err(ZeroError::Solver("no solver here".to_string()))
        }
    }

    struct FixedSolver(SolvedModel);

    impl FmSolver for FixedSolver {
        fn solve(&self, job: &SolverJob<'_>) -> Result<SolvedModel> {
            assert_eq!(job.train.len(), job.train_targets.len());
            assert_eq!(job.test, job.train);
            Ok(self.0.clone())
        }
    }

    fn ratings() -> RatingSet {
        vec![Rating::new(0, 0, 3.0), Rating::new(1, 1, 1.0)]
            .into_iter()
            .collect()
    }

    fn fixed() -> Fma {
        // Two features short of nb_agents = 4, exercising the padding
        let model = SolvedModel {
            global_bias: 1.0,
            weights: vec![0.5, 0.0, 1.0],
            pairwise: vec![vec![1.0], vec![2.0], vec![0.5]],
            test_rmse: vec![0.9, 0.8],
        };
        let mut fma = Fma::new()
            .with_rank(1)
            .with_solver(Box::new(FixedSolver(model)));
        fma.set_parameters(2, 2);
        fma.fit(&ratings()).unwrap();
        fma
    }

    #[test]
    fn test_predict_with_padded_solver_output() {
        let fma = fixed();
        assert!(!fma.is_degraded());
        let predictions = fma.predict(&[(0, 0), (1, 1)]).unwrap();
        // 1 + (0.5 + 1) + ½((1 + 0.5)² − (1 + 0.25))
        assert_relative_eq!(predictions[0], 3.0);
        // Item 1 falls in the padded, all-zero rows
        assert_relative_eq!(predictions[1], 1.0);
        assert_eq!(fma.metrics().history(Split::Test, Metric::Rmse), &[0.9, 0.8]);
    }

    #[test]
    fn test_solver_failure_falls_back_to_random_parameters() {
        let mut fma = Fma::new()
            .with_rank(3)
            .with_solver(Box::new(FailingSolver));
        fma.set_parameters(2, 2);
        fma.fit(&ratings()).unwrap();

        assert!(fma.is_degraded());
        let predictions = fma.predict(&[(0, 0), (0, 1), (1, 0), (1, 1)]).unwrap();
        assert!(predictions.iter().all(|p| p.is_finite() && *p >= 0.0));
    }

    #[test]
    fn test_missing_binary_is_a_solver_error() {
        let job = SolverJob {
            train: &[],
            train_targets: &[],
            test: &[],
            test_targets: &[],
            rank: 2,
            nb_iterations: 1,
            seed: 0,
        };
        assert!(matches!(LibFm::default().solve(&job), Err(ZeroError::Solver(_))));
        assert!(matches!(
            LibFm::new("/non/existent/libFM").solve(&job),
            Err(ZeroError::Solver(_))
        ));
    }

    #[test]
    fn test_oversized_solver_output_degrades() {
        let model = SolvedModel {
            global_bias: 0.0,
            weights: vec![0.0; 10],
            pairwise: Vec::new(),
            test_rmse: Vec::new(),
        };
        let mut fma = Fma::new()
            .with_rank(1)
            .with_solver(Box::new(FixedSolver(model)));
        fma.set_parameters(2, 2);
        fma.fit(&ratings()).unwrap();
        assert!(fma.is_degraded());
    }

    #[test]
    fn test_design_row_rounds_tags() {
        let tags = SparseMatrix::from_rows(
            vec![SparseVector::new(vec![0, 1], vec![0.6, 0.4])],
            2,
        )
        .unwrap();
        let fma = Fma::new().with_side_information(SideInformation::from_matrix(tags));
        let dims = Dimensions::new(2, 2);

        assert_eq!(fma.nb_agents(dims), 6);
        let row = fma.design_row(dims, (1, 0));
        assert_eq!(row.indices, vec![1, 2, 4]);
        assert_eq!(row.values, vec![1.0, 1.0, 1.0]);
        // Work 1 has no row in the tag matrix
        assert_eq!(fma.design_row(dims, (0, 1)).indices, vec![0, 3]);
    }

    #[test]
    fn test_parse_model() {
        let text = "#global bias W0\n3.5\n#unary interactions Wj\n0.1\n-0.2\n\
                    #pairwise interactions Vj,f\n0.1 0.2\n0.3 0.4\n";
        let model = parse_model(text).unwrap();
        assert_eq!(model.global_bias, 3.5);
        assert_eq!(model.weights, vec![0.1, -0.2]);
        assert_eq!(model.pairwise, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);

        assert!(matches!(parse_model("0.1\n"), Err(ZeroError::Solver(_))));
        assert!(matches!(
            parse_model("#unary interactions Wj\n0.1\n"),
            Err(ZeroError::Solver(_))
        ));
    }

    #[test]
    fn test_parse_rlog() {
        let text = "time\trmse\tmae\n0.1\t1.25\t1.0\n0.2\t1.05\t0.9\n";
        assert_eq!(parse_rlog(text).unwrap(), vec![1.25, 1.05]);
        assert!(parse_rlog("").unwrap().is_empty());
        assert!(matches!(parse_rlog("time\tmae\n"), Err(ZeroError::Solver(_))));
    }

    #[test]
    fn test_snapshot_restores_predictions() {
        let fma = fixed();
        let mut restored = Fma::new().with_solver(Box::new(FailingSolver));
        restored.restore(fma.snapshot().unwrap()).unwrap();

        let pairs = [(0, 0), (0, 1), (1, 0), (1, 1)];
        assert_eq!(restored.predict(&pairs).unwrap(), fma.predict(&pairs).unwrap());
        assert_eq!(restored.shortname(), "fma-1");
    }

    #[test]
    fn test_not_trained() {
        let mut fma = Fma::new().with_solver(Box::new(FailingSolver));
        fma.set_parameters(2, 2);
        assert!(matches!(fma.predict(&[(0, 0)]), Err(ZeroError::ModelNotTrained(_))));
    }
}
