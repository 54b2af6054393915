// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and routes to Layer 2.
//
//   1. `train`   — trains the growing fixed-point ViT
//   2. `inspect` — summarises the newest checkpoint

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InspectArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "gradvit",
    version = "0.1.0",
    about = "Train a fixed-point Vision Transformer that grows its encoder stack between epochs."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Inspect(args) => run_inspect(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!(
        "Starting training: checkpoints in '{}'{}",
        args.checkpoint_dir,
        if args.resume { " (resume)" } else { "" }
    );

    TrainUseCase::new(args.into()).execute()?;

    println!("Training complete. Checkpoint saved.");
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let report = InspectUseCase::new(args.checkpoint_dir)?.report()?;
    println!("Epoch:          {}", report.epoch);
    println!("Depth:          {} (initial {})", report.depth, report.initial_depth);
    println!("Growth epochs:  {:?}", report.growth_epochs);
    println!("Growth phase:   {:?}", report.phase);
    Ok(())
}
