//! lar run-directory tooling
//!
//! Inspects and maintains training run directories: config validation,
//! schedule derivation, checkpoint status, and retention pruning. Training
//! itself is entered through `lar_train::Orchestrator` by the binary that
//! links the model, optimizer, and dataloader factories.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lar_checkpoint::CheckpointStore;
use lar_config::RunConfig;
use lar_train::TrainSchedule;

#[derive(Parser)]
#[command(name = "lar", about = "Latent autoregressive trainer run tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a run configuration and echo the normalized form
    Check {
        /// Path to the run.yaml config file
        #[arg(short, long, default_value = "run.yaml")]
        config: PathBuf,
    },

    /// Print the derived step/epoch schedule for a configuration
    Schedule {
        /// Path to the run.yaml config file
        #[arg(short, long, default_value = "run.yaml")]
        config: PathBuf,

        /// Number of data-parallel processes to derive for
        #[arg(long, default_value_t = 1)]
        num_processes: usize,
    },

    /// Show checkpoints in a run directory and the resume point
    Status {
        /// Run output directory
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Config file, for computing the resume epoch
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Process count used for the resume-epoch derivation
        #[arg(long, default_value_t = 1)]
        num_processes: usize,
    },

    /// Remove old checkpoints beyond the retention cap
    Prune {
        /// Run output directory
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Number of checkpoints to keep
        #[arg(short, long)]
        keep: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let run = RunConfig::load(&config)?;
            println!("Config OK: {}", config.display());
            println!();
            print!("{}", run.to_yaml()?);
        }

        Commands::Schedule {
            config,
            num_processes,
        } => {
            let run = RunConfig::load(&config)?;
            let schedule = TrainSchedule::derive(&run, num_processes);

            println!("=== Schedule ({num_processes} processes) ===");
            println!("Max train steps: {}", schedule.max_train_steps);
            println!("Effective batch size: {}", schedule.effective_batch_size);
            println!(
                "Total train batch size (w. accumulation): {}",
                schedule.total_batch_size()
            );
            println!("Batches per epoch: {}", schedule.batches_per_epoch);
            println!("Updates per epoch: {}", schedule.updates_per_epoch);
            println!("Epochs: {}", schedule.num_epochs);
        }

        Commands::Status {
            output_dir,
            config,
            num_processes,
        } => {
            let store = CheckpointStore::new(&output_dir, 0);
            let checkpoints = store.list()?;

            if checkpoints.is_empty() {
                println!("No checkpoints under {}", output_dir.display());
            } else {
                println!("=== Checkpoints ===");
                for (step, path) in &checkpoints {
                    match store.manifest(path) {
                        Ok(manifest) => println!(
                            "step {step}: [{}] world_size={} saved {}",
                            manifest.components.join(", "),
                            manifest.world_size,
                            manifest.created_at
                        ),
                        Err(e) => println!("step {step}: UNREADABLE ({e})"),
                    }
                }
            }

            if let Some(config) = config {
                let run = RunConfig::load(&config)?;
                let schedule = TrainSchedule::derive(&run, num_processes);
                println!();
                match store.latest()? {
                    Some((step, _)) => println!(
                        "Auto-resume: global step {step}, epoch {}",
                        schedule.epoch_for_step(step)
                    ),
                    None => println!("Auto-resume: fresh start (global step 0, epoch 0)"),
                }
            }
        }

        Commands::Prune { output_dir, keep } => {
            let store = CheckpointStore::new(&output_dir, keep);
            let removed = store.prune()?;
            if removed.is_empty() {
                println!("Nothing to prune (cap: {keep})");
            } else {
                for step in removed {
                    println!("Removed: checkpoint-{step}");
                }
            }
        }
    }

    Ok(())
}
