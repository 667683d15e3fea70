//! Training Run Driver
//!
//! Ties the pieces together: pick a dataset, load the checkpoint, open one
//! streaming loader per split, and step through forward passes with periodic
//! validation.
//!
//! ```text
//! step:   0    1    2  ...  10   11  ...  40
//! val:    ✓                 ✓             ✓     every `val_every` steps
//! train:  ✓    ✓    ✓  ...  ✓    ✓   ...        one batch per step
//! ```
//!
//! The backward pass and optimizer update are not part of this crate; a
//! step here is one forward pass with targets, which is enough to measure
//! a checkpoint's loss on a corpus.
//!
//! ## Dataset Selection
//!
//! [`TrainingConfig::datasets`] lists candidate train/val pairs in order of
//! preference. The first pair whose training file exists is used. By default
//! that is Tiny Shakespeare, falling back to TinyStories.

use crate::dataloader::{Batch, StreamingBatchLoader};
use crate::error::{Gpt2Error, Result};
use crate::kernels::ForwardKernels;
use crate::model::ModelStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Paths of one pre-tokenized dataset
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPaths {
    pub train: PathBuf,
    pub val: PathBuf,
}

impl DatasetPaths {
    pub fn new(train: impl Into<PathBuf>, val: impl Into<PathBuf>) -> Self {
        Self {
            train: train.into(),
            val: val.into(),
        }
    }
}

/// Settings for one run
///
/// Every field has a default, so a JSON config file only needs to name the
/// values it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Model checkpoint to load
    pub checkpoint: PathBuf,
    /// Candidate datasets, most preferred first
    pub datasets: Vec<DatasetPaths>,
    /// Sequences per batch (B)
    pub batch_size: usize,
    /// Tokens per sequence (T)
    pub seq_len: usize,
    /// Number of training steps
    pub train_steps: usize,
    /// Run validation every N steps
    pub val_every: usize,
    /// Validation batches averaged per evaluation
    pub val_batches: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("gpt2_124M.bin"),
            datasets: vec![
                DatasetPaths::new(
                    "data/tiny_shakespeare_train.bin",
                    "data/tiny_shakespeare_val.bin",
                ),
                DatasetPaths::new("data/TinyStories_train.bin", "data/TinyStories_val.bin"),
            ],
            batch_size: 4,
            seq_len: 64,
            train_steps: 40,
            val_every: 10,
            val_batches: 10,
        }
    }
}

impl TrainingConfig {
    /// A handful of small steps for checking a setup end to end
    pub fn smoke() -> Self {
        Self {
            batch_size: 2,
            seq_len: 16,
            train_steps: 4,
            val_every: 2,
            val_batches: 2,
            ..Self::default()
        }
    }

    /// Load settings from a JSON file, filling omitted fields with defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Gpt2Error::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| Gpt2Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("seq_len", self.seq_len),
            ("val_every", self.val_every),
            ("val_batches", self.val_batches),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Gpt2Error::Config(format!("{name} must be positive")));
            }
        }
        if self.datasets.is_empty() {
            return Err(Gpt2Error::Config("no datasets configured".to_string()));
        }
        Ok(())
    }

    /// The first dataset whose training file exists
    ///
    /// If none exist the last candidate is returned anyway, so that opening
    /// it reports which file is missing.
    pub fn select_dataset(&self) -> Result<&DatasetPaths> {
        if let Some(found) = self.datasets.iter().find(|d| d.train.exists()) {
            return Ok(found);
        }
        let last = self
            .datasets
            .last()
            .ok_or_else(|| Gpt2Error::Config("no datasets configured".to_string()))?;
        warn!(
            train = %last.train.display(),
            "no configured training file exists"
        );
        Ok(last)
    }
}

/// Final numbers from [`run_training`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub train_loss: Option<f32>,
    pub val_loss: Option<f32>,
}

/// Average `loss_fn` over the first `num_batches` batches of `loader`
///
/// Rewinds the loader first, so repeated evaluations see the same batches.
///
/// # Errors
///
/// [`Gpt2Error::Config`] if `num_batches` is zero; otherwise whatever the
/// loader or `loss_fn` returns.
pub fn mean_loss_over<F>(
    loader: &mut StreamingBatchLoader,
    num_batches: usize,
    mut loss_fn: F,
) -> Result<f32>
where
    F: FnMut(Batch<'_>) -> Result<f32>,
{
    if num_batches == 0 {
        return Err(Gpt2Error::Config(
            "cannot average over zero batches".to_string(),
        ));
    }

    loader.reset();
    let mut total = 0.0;
    for _ in 0..num_batches {
        total += loss_fn(loader.next_batch()?)?;
    }
    Ok(total / num_batches as f32)
}

/// One forward pass on a loader batch, returning its mean loss
pub fn batch_loss<K: ForwardKernels + ?Sized>(
    model: &mut ModelStore,
    kernels: &K,
    batch: Batch<'_>,
) -> Result<f32> {
    model
        .forward(
            kernels,
            batch.batch_size,
            batch.seq_len,
            batch.inputs,
            Some(batch.targets),
        )?
        .ok_or_else(|| Gpt2Error::Config("forward kernels reported no loss".to_string()))
}

/// Load the model and data, then run the configured step loop
pub fn run_training<K: ForwardKernels + ?Sized>(
    config: &TrainingConfig,
    kernels: &K,
) -> Result<RunSummary> {
    config.validate()?;
    let dataset = config.select_dataset()?;
    let (b, t) = (config.batch_size, config.seq_len);

    let mut model = ModelStore::build(&config.checkpoint)?;
    let mut train_loader = StreamingBatchLoader::open(&dataset.train, b, t)?;
    let mut val_loader = StreamingBatchLoader::open(&dataset.val, b, t)?;
    info!(
        train_batches = train_loader.num_batches(),
        val_batches = val_loader.num_batches(),
        "datasets ready"
    );

    let mut summary = RunSummary::default();
    for step in 0..=config.train_steps {
        if step % config.val_every == 0 {
            let val_loss = mean_loss_over(&mut val_loader, config.val_batches, |batch| {
                batch_loss(&mut model, kernels, batch)
            })?;
            info!(step, val_loss, "validation");
            summary.val_loss = Some(val_loss);
        }

        if step == config.train_steps {
            break;
        }

        let start = Instant::now();
        let batch = train_loader.next_batch()?;
        let train_loss = batch_loss(&mut model, kernels, batch)?;
        info!(
            step,
            train_loss,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "train step"
        );
        summary.train_loss = Some(train_loss);
        summary.steps += 1;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::CpuKernels;
    use crate::shapes::parameter_sizes;
    use crate::test_support::{tiny_config, write_checkpoint, write_tokens};
    use tempfile::tempdir;

    #[test]
    fn test_default_matches_reference_run() {
        let config = TrainingConfig::default();
        assert_eq!((config.batch_size, config.seq_len), (4, 64));
        assert_eq!(config.train_steps, 40);
        assert_eq!(config.val_batches, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{ "batch_size": 2, "checkpoint": "other.bin" }"#).unwrap();

        let config = TrainingConfig::from_json_file(&path).unwrap();
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.checkpoint, PathBuf::from("other.bin"));
        assert_eq!(config.seq_len, 64);
        assert_eq!(config.datasets.len(), 2);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, "{ batch_size: }").unwrap();
        assert!(matches!(
            TrainingConfig::from_json_file(&path),
            Err(Gpt2Error::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_fields() {
        let config = TrainingConfig {
            val_every: 0,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_select_dataset_falls_back() {
        let dir = tempdir().unwrap();
        let fallback = dir.path().join("stories_train.bin");
        write_tokens(&fallback, &[1, 2, 3]);

        let config = TrainingConfig {
            datasets: vec![
                DatasetPaths::new(dir.path().join("missing.bin"), "x"),
                DatasetPaths::new(&fallback, "y"),
            ],
            ..TrainingConfig::default()
        };
        assert_eq!(config.select_dataset().unwrap().train, fallback);

        write_tokens(&dir.path().join("missing.bin"), &[1]);
        assert_eq!(config.select_dataset().unwrap().val, PathBuf::from("x"));
    }

    #[test]
    fn test_mean_loss_over_rewinds_and_averages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("val.bin");
        write_tokens(&path, &(0..20).collect::<Vec<u32>>());
        let mut loader = StreamingBatchLoader::open(&path, 1, 2).unwrap();
        loader.next_batch().unwrap();
        loader.next_batch().unwrap();

        // First inputs of the first three batches: 0, 2, 4
        let mean = mean_loss_over(&mut loader, 3, |batch| Ok(batch.inputs[0] as f32)).unwrap();
        assert_eq!(mean, 2.0);
        let again = mean_loss_over(&mut loader, 3, |batch| Ok(batch.inputs[0] as f32)).unwrap();
        assert_eq!(again, mean);

        assert!(mean_loss_over(&mut loader, 0, |_| Ok(0.0)).is_err());
    }

    #[test]
    fn test_run_training_end_to_end() {
        let dir = tempdir().unwrap();
        let model_config = tiny_config();
        let checkpoint = dir.path().join("model.bin");
        let total = parameter_sizes(&model_config).iter().sum();
        write_checkpoint(&checkpoint, &model_config, &vec![0.0; total]);

        let tokens: Vec<u32> = (0..200).map(|i| i % 11).collect();
        let train = dir.path().join("train.bin");
        let val = dir.path().join("val.bin");
        write_tokens(&train, &tokens);
        write_tokens(&val, &tokens[..60]);

        let config = TrainingConfig {
            checkpoint,
            datasets: vec![DatasetPaths::new(&train, &val)],
            batch_size: 2,
            seq_len: 4,
            train_steps: 5,
            val_every: 2,
            val_batches: 3,
        };
        let summary = run_training(&config, &CpuKernels).unwrap();

        let uniform = 11f32.ln();
        assert_eq!(summary.steps, 5);
        assert!((summary.train_loss.unwrap() - uniform).abs() < 1e-5);
        assert!((summary.val_loss.unwrap() - uniform).abs() < 1e-5);
    }

    #[test]
    fn test_run_training_reports_missing_checkpoint() {
        let dir = tempdir().unwrap();
        let config = TrainingConfig {
            checkpoint: dir.path().join("absent.bin"),
            ..TrainingConfig::smoke()
        };
        assert!(run_training(&config, &CpuKernels).unwrap_err().is_io());
    }
}
