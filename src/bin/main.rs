//! zero Command Line Interface
//!
//! Train, evaluate and query the registered recommendation algorithms on
//! `user,item,rating` CSV files.

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process;
use zero::core::{Result, ZeroError};
use zero::utils::stats::rating_stats;
use zero::utils::timing::Chrono;
use zero::{
    Hyperparameters, Metric, RatingsDataset, RecommendRequest, RecommendationAlgorithm, Registry,
    Split,
};

#[derive(Parser)]
#[command(name = "zero")]
#[command(about = "Benchmarkable collaborative filtering")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "zero contributors")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered algorithms and their default hyperparameters
    List,
    /// Fit a model on a rating file and save its snapshot
    Train(TrainArgs),
    /// Fit on a train split and score the test split
    Evaluate(EvaluateArgs),
    /// Recommend items to a group of users
    Recommend(RecommendArgs),
}

#[derive(Args)]
struct ModelArgs {
    /// Rating file (CSV: user,item,rating)
    #[arg(long)]
    data: PathBuf,

    /// Registered algorithm name
    #[arg(short, long)]
    algo: String,

    /// Hyperparameter override, repeatable
    #[arg(short, long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Folder receiving the snapshot
    #[arg(short, long)]
    output_dir: PathBuf,
}

#[derive(Args)]
struct EvaluateArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Share of ratings used for training
    #[arg(short, long, default_value = "0.8")]
    ratio: f64,

    /// Shuffle ratings with this seed before splitting
    #[arg(long)]
    seed: Option<u64>,

    /// Metric to report, repeatable
    #[arg(short, long = "metric", default_value = "rmse")]
    metrics: Vec<String>,
}

#[derive(Args)]
struct RecommendArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Known user to recommend for, repeatable
    #[arg(short, long = "user")]
    users: Vec<usize>,

    /// Rating of a new user as ITEM=RATING, repeatable
    #[arg(long = "rated", value_name = "ITEM=RATING")]
    rated: Vec<String>,

    /// Number of items to recommend
    #[arg(short, default_value = "10")]
    k: usize,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let registry = Registry::with_builtin();
    let result = match cli.command {
        Commands::List => list_command(&registry),
        Commands::Train(args) => train_command(&registry, args),
        Commands::Evaluate(args) => evaluate_command(&registry, args),
        Commands::Recommend(args) => recommend_command(&registry, args),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn list_command(registry: &Registry) -> Result<()> {
    for name in registry.list_available() {
        let defaults = registry
            .defaults(name)
            .map(|params| {
                params
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        println!("{name:<8} {defaults}");
    }
    Ok(())
}

/// Load the rating file and build a model bound to its dimensions
fn load(
    registry: &Registry,
    args: &ModelArgs,
) -> Result<(RatingsDataset, Box<dyn RecommendationAlgorithm>)> {
    let mut overrides = Hyperparameters::new();
    for assignment in &args.params {
        let (name, value) = Hyperparameters::parse_assignment(assignment)?;
        overrides.set(&name, value);
    }

    info!("Loading ratings from: {:?}", args.data);
    let dataset = RatingsDataset::from_file(&args.data)?;
    let dims = dataset.dimensions();
    let stats = rating_stats(dataset.ratings(), dims);
    info!(
        "Loaded {} ratings from {} users on {} works (density {:.4})",
        stats.nb_ratings, stats.nb_users, stats.nb_works, stats.density
    );

    let mut model = registry.instantiate_with(&args.algo, &overrides)?;
    model.set_parameters(dims.nb_users, dims.nb_works);
    Ok((dataset, model))
}

fn train_command(registry: &Registry, args: TrainArgs) -> Result<()> {
    let (dataset, mut model) = load(registry, &args.model)?;
    let mut chrono = Chrono::new();
    model.fit(dataset.ratings())?;
    let elapsed = chrono.save("fit");
    info!("Trained {} in {:.3}s", model.shortname(), elapsed.as_secs_f64());

    if !model.is_serializable() {
        warn!("{} is not serializable, no snapshot written", model.shortname());
        return Ok(());
    }
    let path = model.save(&args.output_dir, None)?;
    println!("{}", path.display());
    Ok(())
}

fn evaluate_command(registry: &Registry, args: EvaluateArgs) -> Result<()> {
    let metrics = args
        .metrics
        .iter()
        .map(|name| name.parse::<Metric>())
        .collect::<Result<Vec<_>>>()?;

    let (dataset, mut model) = load(registry, &args.model)?;
    let (train, test) = dataset.split(args.ratio, args.seed)?;
    if test.is_empty() {
        return Err(ZeroError::InvalidParameter(format!(
            "ratio {} leaves no test ratings",
            args.ratio
        )));
    }
    info!("Split into {} train and {} test ratings", train.len(), test.len());

    model.monitor_mut().set_metrics(metrics.clone());
    model.set_evaluation(None, Some(test.clone()));
    model.fit(&train)?;

    let y_pred = model.predict(&test.pairs())?;
    let y_true = test.values();
    println!("=== {} ===", model.shortname());
    for metric in metrics {
        let history = model.metrics().history(Split::Test, metric);
        if history.len() > 1 {
            info!("test {metric} per iteration: {history:?}");
        }
        println!("{metric}: {:.6}", metric.score(&y_pred, &y_true)?);
    }
    Ok(())
}

fn recommend_command(registry: &Registry, args: RecommendArgs) -> Result<()> {
    let (dataset, mut model) = load(registry, &args.model)?;
    model.fit(dataset.ratings())?;

    let mut request = RecommendRequest::new().with_users(args.users).with_k(args.k);
    if !args.rated.is_empty() {
        let mut items = Vec::with_capacity(args.rated.len());
        let mut ratings = Vec::with_capacity(args.rated.len());
        for assignment in &args.rated {
            let (item, rating) = parse_rated(assignment)?;
            items.push(item);
            ratings.push(rating);
        }
        let parameters = model.fit_single_user(&items, &ratings)?;
        request = request.with_extra_users(vec![parameters]);
    }

    for recommendation in model.recommend(&request)? {
        println!("{} {:.6}", recommendation.item_id, recommendation.score);
    }
    Ok(())
}

fn parse_rated(assignment: &str) -> Result<(usize, f64)> {
    let invalid = || ZeroError::ParseError(format!("Expected ITEM=RATING, got: {assignment}"));
    let (item, rating) = assignment.split_once('=').ok_or_else(invalid)?;
    let item = item.trim().parse::<usize>().map_err(|_| invalid())?;
    let rating = rating.trim().parse::<f64>().map_err(|_| invalid())?;
    Ok((item, rating))
}
