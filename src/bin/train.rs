//! Train: Fit an Input HNN to Generated Pendulum Trajectories
//!
//! ## Protocol
//!
//! 1. Load the experiment configuration (JSON)
//! 2. Generate ground-truth trajectories and report their energy drift
//! 3. Split into training and held-out loaders
//! 4. Train under the horizon curriculum, growing the net if configured
//! 5. Write the training logs as JSON, also when training aborts

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use hnn_dynamics::nn::Module;
use hnn_dynamics::{energy_drift, ExperimentConfig, Hamiltonian, MechanicalSystem, Trainer};

#[derive(Parser)]
#[command(author, version, about = "Train a Hamiltonian neural network on pendulum trajectories")]
struct Cli {
    /// Experiment configuration (JSON)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Destination of the training logs
    #[arg(long, default_value = "training_logs.json", value_hint = ValueHint::FilePath)]
    logs: PathBuf,

    /// Override the configured number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the configured seed
    #[arg(long)]
    seed: Option<u64>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let text = fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let mut config = ExperimentConfig::from_json(&text)
        .with_context(|| format!("parsing {}", cli.config.display()))?;
    if let Some(epochs) = cli.epochs {
        config.training.epochs = epochs;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
        config.training.seed = seed;
    }

    println!("═══════════════════════════════════════════════════════════════");
    println!("  HNN Training: {}", config.system.name());
    println!("═══════════════════════════════════════════════════════════════\n");

    println!("Data:");
    println!("  coordinates      = {}", config.system.coord_dim());
    println!("  trajectories     = {}", config.generation.num_trajectories);
    println!("  time steps       = {}", config.generation.time_steps);
    println!("  sampling time    = {}", config.system.sampling_time());
    println!("  init policy      = {}", config.generation.init.name());
    println!("  coordinates kind = {:?}", config.generation.coord_type);
    println!();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let data = config.generate_data_with_energy(&mut rng)?;
    let drift = energy_drift(&data.energy);
    println!(
        "Generated data energy drift: mean {:.3e}, max {:.3e}\n",
        drift.mean().unwrap_or(0.0),
        drift.fold(0.0_f64, |acc, d| acc.max(*d))
    );

    let (mut train, mut test) = config.loaders(&data.trajectories)?;
    let model = config.build_model(&mut rng)?;
    println!("Model:");
    println!("  parameters       = {}", model.num_parameters());
    println!("  routing          = {:?}", config.model.routing);
    println!("  learned G        = {}", model.g_net().is_learned());
    println!("  training batches = {}", train.len());
    println!();

    let mut trainer = Trainer::new(config.training.clone(), model)?;
    let outcome = trainer.fit(&mut train, test.as_mut()).map(|_| ());

    let logs = trainer.logs();
    let json = serde_json::to_string_pretty(logs)?;
    fs::write(&cli.logs, json).with_context(|| format!("writing {}", cli.logs.display()))?;
    println!("Logs written to {}", cli.logs.display());

    outcome.context("training aborted")?;

    println!("\nSummary:");
    println!("  epochs           = {}", logs.epochs_completed());
    if let Some(last) = logs.train_loss.last() {
        println!("  final train loss = {last:.6e}");
    }
    if let Some(last) = logs.test_loss.last() {
        println!("  final test loss  = {last:.6e}");
    }
    println!("  blocks           = {}", trainer.model().h_net().num_blocks());
    Ok(())
}
