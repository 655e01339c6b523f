//! # NMM CLI
//!
//! Command-line host for neural mass simulations.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use nmm_core::{ModelConfig, ModelRegistry, TimeSeries};
use nmm_wendling::{ActivityType, WendlingParams};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nmm")]
#[command(author = "Yatrogenesis")]
#[command(version = "0.1.0")]
#[command(about = "Neural mass network simulator", long_about = None)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run {
        /// Registered model name
        #[arg(short, long, default_value = "wendling")]
        model: String,
        /// JSON parameter bundle (missing fields use defaults)
        #[arg(short, long)]
        params: Option<PathBuf>,
        /// Simulated time (ms)
        #[arg(long)]
        duration: Option<f64>,
        /// Integration step (ms)
        #[arg(long)]
        dt: Option<f64>,
        /// Noise seed
        #[arg(long)]
        seed: Option<u64>,
        /// All-to-all network size when no bundle is given
        #[arg(short, long, default_value_t = 1)]
        nodes: usize,
        /// Global coupling gain K_gl
        #[arg(long)]
        coupling: Option<f64>,
        /// Activity regime, type1..type6
        #[arg(long)]
        activity: Option<String>,
        /// Per-node parameter spread in [0, 1)
        #[arg(long)]
        heterogeneity: Option<f64>,
        /// Write time and pyramidal potential per node as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the default parameter bundle as JSON
    Defaults {
        /// Network size
        #[arg(short, long, default_value_t = 1)]
        nodes: usize,
    },

    /// List registered models and activity regimes
    List,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    nmm_wendling::register(&mut registry);
    registry
}

fn base_params(path: Option<&PathBuf>, nodes: usize, seed: Option<u64>) -> anyhow::Result<WendlingParams> {
    if let Some(path) = path {
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading parameter bundle {}", path.display()))?;
        return Ok(WendlingParams::from_json(&json)?);
    }
    match nodes {
        0 => bail!("--nodes must be at least 1"),
        1 => Ok(WendlingParams::default()),
        n => Ok(WendlingParams::network(Array2::ones((n, n)), None, seed)?),
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    model_name: &str,
    params_path: Option<PathBuf>,
    duration: Option<f64>,
    dt: Option<f64>,
    seed: Option<u64>,
    nodes: usize,
    coupling: Option<f64>,
    activity: Option<String>,
    heterogeneity: Option<f64>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let registry = registry();
    if !registry.contains(model_name) {
        bail!("unknown model '{}' (try `nmm list`)", model_name);
    }

    let mut params = base_params(params_path.as_ref(), nodes, seed)?;
    if let Some(k) = coupling {
        params.k_gl = k;
    }
    if let Some(name) = activity {
        let activity: ActivityType = name.parse()?;
        params.apply_activity(activity);
    }
    if let Some(level) = heterogeneity {
        params = params.with_heterogeneity(level, seed)?;
    }

    let config = ModelConfig {
        nodes: params.n_nodes(),
        dt,
        duration,
        seed,
        params: Some(serde_json::to_value(&params)?),
    };
    let mut model = registry.create(model_name, &config)?;

    println!(
        "{} {} ({} nodes)",
        "Running".green().bold(),
        model.name().cyan(),
        model.n_nodes()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")?);
    spinner.set_message("integrating");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let started = Instant::now();
    let result = model.run();
    spinner.finish_and_clear();
    result?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "simulation finished");

    let time = model.time()?;
    let signal = model.output_signal()?;
    let series = signal
        .outer_iter()
        .enumerate()
        .map(|(node, row)| {
            let values: Vec<f64> = row.iter().copied().collect();
            TimeSeries::from_parts(&format!("v_pyr[{}]", node), "mV", time, &values)
        })
        .collect::<Result<Vec<_>, _>>()?;

    println!(
        "  {} samples, t = {:.1} .. {:.1} ms",
        time.len(),
        time.first().copied().unwrap_or(0.0),
        time.last().copied().unwrap_or(0.0)
    );
    for ts in &series {
        match ts.range() {
            Some((lo, hi)) if lo.is_finite() && hi.is_finite() => {
                println!("  {}: {:.3} .. {:.3} mV", ts.name.cyan(), lo, hi)
            }
            _ => println!("  {}: {}", ts.name.cyan(), "non-finite".red()),
        }
    }

    if let Some(path) = output {
        fs::write(&path, serde_json::to_string_pretty(&series)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("{} {}", "Wrote".green().bold(), path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            model,
            params,
            duration,
            dt,
            seed,
            nodes,
            coupling,
            activity,
            heterogeneity,
            output,
        } => run(
            &model,
            params,
            duration,
            dt,
            seed,
            nodes,
            coupling,
            activity,
            heterogeneity,
            output,
        )?,

        Commands::Defaults { nodes } => {
            let params = base_params(None, nodes, None)?;
            println!("{}", params.to_json()?);
        }

        Commands::List => {
            println!("{}", "Registered models:".green().bold());
            for (name, description) in registry().models() {
                println!("  {} - {}", name.cyan(), description);
            }
            println!();
            println!("{}", "Wendling activity regimes:".green().bold());
            for activity in ActivityType::ALL {
                let (a, b, g) = activity.gains();
                println!(
                    "  {:?} - {} (A={}, B={}, G={})",
                    activity,
                    activity.description(),
                    a,
                    b,
                    g
                );
            }
        }
    }

    Ok(())
}
