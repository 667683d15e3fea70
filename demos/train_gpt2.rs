//! GPT-2 Forward Training Loop
//!
//! Loads a GPT-2 checkpoint, streams batches from a pre-tokenized corpus,
//! and reports training and validation loss.
//!
//! ## Usage
//!
//! ```bash
//! # Reference settings: gpt2_124M.bin, B=4, T=64, 40 steps
//! cargo run --release --example train_gpt2
//!
//! # Settings from a JSON file, with overrides
//! cargo run --release --example train_gpt2 -- --config run.json --steps 100
//!
//! # Quick end-to-end check
//! cargo run --release --example train_gpt2 -- --smoke
//! ```
//!
//! ## Prerequisites
//!
//! The checkpoint and token files come from the PyTorch reference exporter:
//! `gpt2_124M.bin` and `data/tiny_shakespeare_{train,val}.bin` (or
//! `data/TinyStories_{train,val}.bin`).
//!
//! Set `RUST_LOG=gpt2_arena=debug` to see arena sizes and loader wrap-around.

use anyhow::{Context, Result};
use clap::Parser;
use gpt2_arena::{run_training, CpuKernels, TrainingConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "train_gpt2",
    about = "Run GPT-2 forward passes over a token corpus"
)]
struct Args {
    /// Load run settings from a JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start from the small smoke-test settings
    #[arg(long)]
    smoke: bool,

    /// Model checkpoint
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Batch size (B)
    #[arg(long)]
    batch: Option<usize>,

    /// Sequence length (T)
    #[arg(long)]
    seq_len: Option<usize>,

    /// Training steps
    #[arg(long)]
    steps: Option<usize>,

    /// Validate every N steps
    #[arg(long)]
    val_every: Option<usize>,

    /// Validation batches per evaluation
    #[arg(long)]
    val_batches: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gpt2_arena=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match (&args.config, args.smoke) {
        (Some(path), _) => TrainingConfig::from_json_file(path)
            .with_context(|| format!("reading run config {}", path.display()))?,
        (None, true) => TrainingConfig::smoke(),
        (None, false) => TrainingConfig::default(),
    };

    if let Some(checkpoint) = args.checkpoint {
        config.checkpoint = checkpoint;
    }
    config.batch_size = args.batch.unwrap_or(config.batch_size);
    config.seq_len = args.seq_len.unwrap_or(config.seq_len);
    config.train_steps = args.steps.unwrap_or(config.train_steps);
    config.val_every = args.val_every.unwrap_or(config.val_every);
    config.val_batches = args.val_batches.unwrap_or(config.val_batches);

    let summary = run_training(&config, &CpuKernels).context("training run failed")?;

    println!();
    println!("Steps run:  {}", summary.steps);
    if let Some(loss) = summary.train_loss {
        println!("Train loss: {:.4}", loss);
    }
    if let Some(loss) = summary.val_loss {
        println!("Val loss:   {:.4}", loss);
    }
    Ok(())
}
