//! accelex Command Line Interface
//!
//! Runs the neighbors estimators on LibSVM or CSV data through the dispatch
//! core and reports which implementation served each call.

use accelex::config::{self, Config, TargetClass, TargetSelector};
use accelex::core::{Error, InputData, Result};
use accelex::data;
use accelex::neighbors::{predicate, Algorithm, Metric, NeighborsParams, Weights};
use accelex::{DispatchReport, KNeighborsClassifier, NearestNeighbors, PatchRegistry};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "accelex")]
#[command(about = "Capability dispatch between accelerated and reference estimators")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "accelex contributors")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Execution target: auto, host, cpu, gpu or gpu:N
    #[arg(long, global = true, default_value = "auto")]
    target: TargetSelector,

    /// Run every operation on the reference implementation
    #[arg(long, global = true)]
    unpatch: bool,

    /// Write a JSON dispatch report to this file
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the nearest neighbors of every sample
    Kneighbors(KneighborsArgs),
    /// Fit a k-neighbors classifier and predict labels
    Classify(ClassifyArgs),
    /// Show which targets would accelerate a fit on the given data
    Check(CheckArgs),
    /// List patchable operations
    Patches,
}

#[derive(Args)]
struct SearchArgs {
    /// Number of neighbors
    #[arg(short = 'k', long, default_value = "5")]
    n_neighbors: usize,

    /// Search algorithm: auto, brute, kd_tree or ball_tree
    #[arg(long, default_value = "auto")]
    algorithm: Algorithm,

    /// Distance metric
    #[arg(long, default_value = "minkowski")]
    metric: Metric,

    /// Minkowski order
    #[arg(short, long, default_value = "2")]
    p: f64,
}

impl SearchArgs {
    fn params(&self) -> NeighborsParams {
        NeighborsParams {
            n_neighbors: self.n_neighbors,
            algorithm: self.algorithm,
            metric: self.metric,
            p: Some(self.p),
            ..NeighborsParams::default()
        }
    }
}

#[derive(Args)]
struct KneighborsArgs {
    /// Training data file (LibSVM or CSV format)
    #[arg(long)]
    data: PathBuf,

    /// Query data file; the training samples are queried when omitted
    #[arg(long)]
    query: Option<PathBuf>,

    /// Treat the last CSV column as a label and drop it
    #[arg(long)]
    labeled: bool,

    /// Print distances next to the indices
    #[arg(long)]
    distances: bool,

    #[command(flatten)]
    search: SearchArgs,
}

#[derive(Args)]
struct ClassifyArgs {
    /// Labelled training data (LibSVM, or CSV with the label last)
    #[arg(long)]
    train: PathBuf,

    /// Data to predict
    #[arg(long)]
    test: PathBuf,

    /// Treat the last CSV column of the test file as a label and report accuracy
    #[arg(long)]
    test_labeled: bool,

    /// Vote weighting: uniform or distance
    #[arg(long, default_value = "uniform")]
    weights: Weights,

    #[command(flatten)]
    search: SearchArgs,
}

#[derive(Args)]
struct CheckArgs {
    /// Data file
    #[arg(long)]
    data: PathBuf,

    /// Treat the last CSV column as a label and drop it
    #[arg(long)]
    labeled: bool,

    #[command(flatten)]
    search: SearchArgs,
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

    config::set_config(Config::default().with_target_offload(cli.target.clone()));

    let registry = if cli.unpatch {
        PatchRegistry::with_defaults()
    } else {
        PatchRegistry::patched()
    };
    let registry = Arc::new(registry);
    let mut report = DispatchReport::new(&registry);

    let result = match cli.command {
        Commands::Kneighbors(args) => kneighbors_command(args, &registry, &mut report),
        Commands::Classify(args) => classify_command(args, &registry, &mut report),
        Commands::Check(args) => check_command(args),
        Commands::Patches => patches_command(&registry),
    }
    .and_then(|()| finish_report(&report, cli.report.as_deref(), cli.verbose));

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn load_input(path: &Path, has_labels: bool) -> Result<(InputData, Option<Vec<f64>>)> {
    info!("Loading dataset from: {path:?}");
    let loaded = data::load(path, has_labels)?;
    info!(
        "Loaded {} samples with {} features",
        loaded.x.n_samples(),
        loaded.x.n_features()
    );
    Ok((loaded.x, loaded.labels))
}

fn kneighbors_command(
    args: KneighborsArgs,
    registry: &Arc<PatchRegistry>,
    report: &mut DispatchReport,
) -> Result<()> {
    let (x, _) = load_input(&args.data, args.labeled)?;
    let query = match &args.query {
        Some(path) => Some(load_input(path, args.labeled)?.0),
        None => None,
    };

    let mut nn = NearestNeighbors::new(Arc::clone(registry)).with_params(args.search.params());
    nn.fit(&x)?;
    report.record_from(nn.last_dispatch());
    if let Some(method) = nn.fit_method() {
        info!("Fitted with {method} on {} samples", x.n_samples());
    }

    let result = nn.kneighbors(query.as_ref(), None, args.distances)?;
    report.record_from(nn.last_dispatch());

    println!("# Neighbors for {} samples", result.n_queries());
    println!(
        "# Format: sample_index neighbor_indices{}",
        if args.distances { " | distances" } else { "" }
    );
    for (i, indices) in result.indices.iter().enumerate() {
        let indices: Vec<String> = indices.iter().map(ToString::to_string).collect();
        match &result.distances {
            Some(distances) => {
                let row: Vec<String> = distances.row(i).iter().map(|d| format!("{d:.6}")).collect();
                println!("{i} {} | {}", indices.join(" "), row.join(" "));
            }
            None => println!("{i} {}", indices.join(" ")),
        }
    }

    Ok(())
}

fn classify_command(
    args: ClassifyArgs,
    registry: &Arc<PatchRegistry>,
    report: &mut DispatchReport,
) -> Result<()> {
    let (x, y) = load_input(&args.train, true)?;
    let y = y.ok_or_else(|| Error::InvalidInput("training data has no labels".to_string()))?;
    let (test, expected) = load_input(&args.test, args.test_labeled)?;

    let params = args.search.params();
    let mut classifier = KNeighborsClassifier::new(Arc::clone(registry))
        .with_n_neighbors(params.n_neighbors)
        .with_algorithm(params.algorithm)
        .with_metric(params.metric)
        .with_p(params.p)
        .with_weights(args.weights);
    classifier.fit(&x, &y)?;
    report.record_from(classifier.last_dispatch());

    let predictions = classifier.predict(&test)?;
    report.record_from(classifier.last_dispatch());

    println!("# Predictions for {} samples", predictions.len());
    println!("# Format: sample_index predicted_label");
    for (i, label) in predictions.iter().enumerate() {
        println!("{i} {label}");
    }

    if let Some(expected) = expected.filter(|_| args.test_labeled) {
        let correct = predictions
            .iter()
            .zip(&expected)
            .filter(|(p, e)| p == e)
            .count();
        println!(
            "# Accuracy: {:.2}%",
            100.0 * correct as f64 / predictions.len().max(1) as f64
        );
    }

    Ok(())
}

fn check_command(args: CheckArgs) -> Result<()> {
    let (x, _) = load_input(&args.data, args.labeled)?;
    let params = args.search.params();

    println!("=== Fit Capability ===");
    for (name, class) in [("cpu", TargetClass::Cpu), ("device", TargetClass::Device)] {
        let verdict = predicate::fit_verdict(class, &params, Some(&x));
        match verdict {
            accelex::Verdict::Supported => println!("{name}: supported"),
            accelex::Verdict::Unsupported(reason) => println!("{name}: unsupported ({reason})"),
        }
    }

    Ok(())
}

fn patches_command(registry: &PatchRegistry) -> Result<()> {
    println!("=== Patchable Operations ===");
    for operation in registry.all_operations() {
        let state = if registry.is_applied(operation)? {
            "applied"
        } else {
            "reverted"
        };
        println!("{operation} {state}");
    }
    Ok(())
}

fn finish_report(report: &DispatchReport, path: Option<&Path>, verbose: bool) -> Result<()> {
    if verbose && !report.records.is_empty() {
        report.print_summary();
    }
    if let Some(path) = path {
        report.save_to_file(path)?;
        info!("Dispatch report saved to: {path:?}");
    }
    Ok(())
}
