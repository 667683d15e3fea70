//! gpt2-arena: GPT-2 Checkpoints in Flat Tensor Arenas
//!
//! Loads a pretrained GPT-2 checkpoint into a single contiguous parameter
//! buffer, lays out every intermediate activation in a second buffer sized on
//! first use, and streams token batches from flat binary corpora.
//!
//! # Modules
//!
//! - [`checkpoint`] - Binary checkpoint header and parameter stream
//! - [`shapes`] - Tensor shapes derived from hyperparameters
//! - [`arena`] - One allocation, many named regions
//! - [`tensors`] - Named views over the parameter and activation arenas
//! - [`model`] - The model store: parameters, activations, batch cache
//! - [`kernels`] - Forward pass seam and a CPU reference implementation
//! - [`dataloader`] - Streaming input/target batches from a token file
//! - [`train`] - Run configuration and the step loop
//!
//! # Example
//!
//! ```rust,no_run
//! use gpt2_arena::{CpuKernels, ModelStore, StreamingBatchLoader};
//!
//! let mut model = ModelStore::build("gpt2_124M.bin")?;
//! let mut loader = StreamingBatchLoader::open("data/tiny_shakespeare_train.bin", 4, 64)?;
//!
//! let batch = loader.next_batch()?;
//! let loss = model.forward(&CpuKernels, 4, 64, batch.inputs, Some(batch.targets))?;
//! println!("loss = {:?}", loss);
//! # Ok::<(), gpt2_arena::Gpt2Error>(())
//! ```

pub mod arena;
pub mod checkpoint;
pub mod config;
pub mod dataloader;
pub mod error;
pub mod kernels;
pub mod model;
pub mod shapes;
pub mod tensors;
pub mod train;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use arena::{Arena, TensorSlot};
pub use checkpoint::CheckpointReader;
pub use config::Config;
pub use dataloader::{Batch, StreamingBatchLoader};
pub use error::{Gpt2Error, Result};
pub use kernels::{CpuKernels, ForwardContext, ForwardKernels};
pub use model::ModelStore;
pub use shapes::{
    activation_sizes, activation_specs, parameter_sizes, parameter_specs, TensorSpec,
};
pub use tensors::{ActivationTensors, LayerParameters, ParameterTensors};
pub use train::{run_training, DatasetPaths, RunSummary, TrainingConfig};
