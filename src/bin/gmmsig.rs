//! gmmsig CLI - train, split and apply Gaussian-mixture class signatures

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use gmmsig::{
    read_samples, read_signature_set, write_signature_set, ClassificationResult, Classifier,
    ClusterConfig, ClusterEngine, CovarianceStructure, Init, InsufficientData, Order, Priors,
    SplitClasses, SplitConfig, SplitMode, UNCLASSIFIED,
};

#[derive(Parser)]
#[command(name = "gmmsig")]
#[command(author, version, about = "Gaussian mixture class signatures", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train one mixture per class listed in a manifest
    Cluster {
        /// Manifest: class count, dimension, then one `<file> [title]` per class
        manifest: PathBuf,
        /// Parameter file to write
        output: PathBuf,
        /// Initial components per class
        #[arg(short = 'k', long, default_value = "8")]
        components: usize,
        /// Covariance structure: full, diagonal, spherical
        #[arg(short, long, default_value = "full")]
        structure: CovarianceStructure,
        /// Component count: fixed, mdl, or a target count
        #[arg(short, long, default_value = "fixed")]
        order: Order,
        /// Mean seeding: spread, random, kmeans++
        #[arg(long, default_value = "kmeans++")]
        init: Init,
        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,
        /// Maximum EM iterations
        #[arg(long, default_value = "200")]
        max_iter: usize,
        /// Convergence tolerance on mean log-likelihood
        #[arg(long, default_value = "1e-4")]
        tol: f64,
        /// Wall-clock cap per EM run, in seconds
        #[arg(long)]
        max_seconds: Option<f64>,
        /// Fail classes with too few samples instead of simplifying the model
        #[arg(long)]
        strict: bool,
        /// Title stored in the parameter file
        #[arg(long, default_value = "")]
        title: String,
    },
    /// Split bimodal classes of a parameter file
    Split {
        /// Parameter file to read
        input: PathBuf,
        /// Parameter file to write
        output: PathBuf,
        /// Split mode: bimodal, subclasses
        #[arg(short, long, default_value = "bimodal")]
        mode: SplitMode,
        /// Minimum mode separation for a bimodal split
        #[arg(long, default_value = "2.0")]
        min_separation: f64,
    },
    /// Classify a sample file
    Classify {
        /// Parameter file
        params: PathBuf,
        /// Sample file, one point per line
        samples: PathBuf,
        /// Reject samples whose best log-likelihood is below this value
        #[arg(short, long, allow_hyphen_values = true)]
        threshold: Option<f64>,
        /// Class priors: equal, population
        #[arg(short, long, default_value = "equal")]
        priors: Priors,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarise a parameter file
    Inspect {
        /// Parameter file
        params: PathBuf,
    },
}

#[derive(serde::Serialize)]
struct ClassifyOutput<'a> {
    classes: Vec<&'a str>,
    #[serde(flatten)]
    result: &'a ClassificationResult,
}

fn setup_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Cluster {
            manifest,
            output,
            components,
            structure,
            order,
            init,
            seed,
            max_iter,
            tol,
            max_seconds,
            strict,
            title,
        } => {
            let samples = gmmsig::io::read_manifest(&manifest)
                .with_context(|| format!("Failed to read manifest {}", manifest.display()))?;
            let mut config = ClusterConfig {
                n_components: components,
                structure,
                order,
                init,
                seed,
                max_iter,
                tol,
                ..ClusterConfig::default()
            };
            if let Some(secs) = max_seconds {
                if !(secs > 0.0 && secs.is_finite()) {
                    bail!("--max-seconds must be a positive number");
                }
                config = config.with_max_duration(Duration::from_secs_f64(secs));
            }
            if strict {
                config = config.with_insufficient_data(InsufficientData::Fail);
            }

            let start = Instant::now();
            let report = ClusterEngine::new(config)
                .fit_to_file(&samples, title, &output)
                .context("Training failed")?;
            for outcome in &report.outcomes {
                match &outcome.result {
                    Ok(fit) => println!(
                        "class {} '{}': {} samples, {} x {}, {}{}",
                        outcome.class,
                        outcome.title,
                        outcome.samples,
                        fit.plan.structure,
                        report.signatures.classes()[fit.signature_index].n_components(),
                        if fit.status.converged { "converged" } else { "not converged" },
                        if fit.status.timed_out { " (time limit)" } else { "" },
                    ),
                    Err(e) => eprintln!("class {} '{}': FAILED: {e}", outcome.class, outcome.title),
                }
            }
            info!(elapsed = ?start.elapsed(), "training finished");
            println!(
                "Wrote {} of {} classes to {}",
                report.signatures.len(),
                report.outcomes.len(),
                output.display()
            );
        }

        Commands::Split {
            input,
            output,
            mode,
            min_separation,
        } => {
            let config = SplitConfig::default()
                .with_mode(mode)
                .with_min_separation(min_separation);
            let out = SplitClasses::new(config)
                .split_file(&input)
                .with_context(|| format!("Failed to split {}", input.display()))?;
            write_signature_set(&output, &out.signatures)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            for (class, sep) in out.separations.iter().enumerate() {
                if let Some(d) = sep {
                    println!("class {class}: separation {d:.3}");
                }
            }
            println!(
                "{} classes -> {} classes ({} split)",
                out.separations.len(),
                out.signatures.len(),
                out.split_classes().len()
            );
        }

        Commands::Classify {
            params,
            samples,
            threshold,
            priors,
            json,
        } => {
            let set = read_signature_set(&params)
                .with_context(|| format!("Failed to read {}", params.display()))?;
            let file = read_samples(&samples, Some(set.dimension()))
                .with_context(|| format!("Failed to read {}", samples.display()))?;
            if !file.rejected.is_empty() {
                eprintln!("skipped {} malformed rows", file.rejected.len());
            }
            let result = Classifier::new(&set)?
                .with_rejection_threshold(threshold)
                .with_priors(priors)
                .classify(&file.points)?;

            if json {
                let out = ClassifyOutput {
                    classes: set.classes().iter().map(|s| s.title.as_str()).collect(),
                    result: &result,
                };
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for (a, score) in result.assignments.iter().zip(&result.scores) {
                    if *a == UNCLASSIFIED {
                        println!("-\t{score}");
                    } else {
                        println!("{a}\t{score}");
                    }
                }
                for (class, count) in result.class_counts().iter().enumerate() {
                    eprintln!("class {class}: {count}");
                }
                eprintln!("unclassified: {}", result.unclassified().len());
            }
        }

        Commands::Inspect { params } => {
            let set = read_signature_set(&params)
                .with_context(|| format!("Failed to read {}", params.display()))?;
            println!("File: {}", params.display());
            if !set.title.is_empty() {
                println!("Title: {}", set.title);
            }
            println!("Dimension: {}", set.dimension());
            println!("Classes: {}", set.len());
            for (k, sig) in set.classes().iter().enumerate() {
                println!(
                    "\n[{k}] {} ({} samples, {}, {} components, {} parameters)",
                    sig.title,
                    sig.count,
                    sig.structure,
                    sig.n_components(),
                    sig.n_parameters(set.dimension())
                );
                for (i, c) in sig.components.iter().enumerate() {
                    let mean: Vec<String> = c.mean.iter().map(|v| format!("{v:.4}")).collect();
                    println!("  {i}: pi={:.4} mean=[{}]", c.weight, mean.join(", "));
                }
            }
        }
    }

    Ok(())
}
