//! GPT-2 Model Store
//!
//! Owns everything a GPT-2 forward pass touches:
//!
//! - **Config**: hyperparameters from the checkpoint header
//! - **Parameter arena**: all 16 weight tensors in one allocation, filled
//!   from the checkpoint and never written again
//! - **Activation arena**: all 23 intermediate tensors in one allocation,
//!   created on the first forward pass and sized for that batch
//! - **Batch cache**: copies of the current batch's input and target tokens
//! - **Mean loss**: result of the last forward pass that had targets
//!
//! ## Lifecycle
//!
//! ```text
//! build(path)            → parameters loaded, no activations
//! prepare_for_batch(B,T) → activations allocated, capacity fixed at (B, T)
//! prepare_for_batch(b,t) → no-op if b ≤ B and t ≤ T, Capacity error otherwise
//! ```
//!
//! The activation arena never grows. Run the largest batch you intend to use
//! first.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gpt2_arena::{CpuKernels, ModelStore};
//!
//! let mut model = ModelStore::build("gpt2_124M.bin")?;
//! let inputs = vec![0u32; 4 * 64];
//! let targets = vec![0u32; 4 * 64];
//! let loss = model.forward(&CpuKernels, 4, 64, &inputs, Some(&targets))?;
//! println!("loss: {:?}", loss);
//! # Ok::<(), gpt2_arena::Gpt2Error>(())
//! ```

use crate::arena::Arena;
use crate::checkpoint::CheckpointReader;
use crate::config::Config;
use crate::error::{Gpt2Error, Result};
use crate::kernels::{ForwardContext, ForwardKernels};
use crate::shapes::{activation_specs, parameter_specs};
use crate::tensors::{ActivationTensors, ParameterTensors};
use std::path::Path;
use tracing::{debug, info};

/// A loaded GPT-2 checkpoint plus its run state
#[derive(Debug)]
pub struct ModelStore {
    config: Config,
    params: Arena<f32>,
    acts: Option<Arena<f32>>,
    // (B, T) the activation arena was sized for
    capacity: Option<(usize, usize)>,
    // (B, T) of the most recently recorded batch
    batch_dims: (usize, usize),
    inputs: Vec<u32>,
    targets: Vec<u32>,
    has_targets: bool,
    mean_loss: Option<f32>,
}

impl ModelStore {
    /// Load a model from a checkpoint file
    ///
    /// Reads the header, lays out the parameter arena, and copies exactly
    /// as many floats as the header implies into it.
    ///
    /// # Errors
    ///
    /// - [`Gpt2Error::Io`] if the file cannot be opened or read
    /// - [`Gpt2Error::Format`] for a bad header, unusable hyperparameters, or
    ///   a parameter stream shorter than the header implies
    /// - [`Gpt2Error::Allocation`] if the parameter arena cannot be reserved
    pub fn build(checkpoint_path: impl AsRef<Path>) -> Result<Self> {
        let reader = CheckpointReader::open(checkpoint_path.as_ref())?;
        let config = *reader.config();
        config.validate().map_err(|e| {
            Gpt2Error::Format(format!(
                "unusable hyperparameters in {}: {e}",
                reader.path().display()
            ))
        })?;

        let mut params = Arena::allocate("parameters", &parameter_specs(&config))?;
        info!(num_parameters = params.num_elements(), "parameter arena ready");

        reader.read_parameters(params.as_mut_slice())?;

        Ok(Self {
            config,
            params,
            acts: None,
            capacity: None,
            batch_dims: (0, 0),
            inputs: Vec::new(),
            targets: Vec::new(),
            has_targets: false,
            mean_loss: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn num_parameters(&self) -> usize {
        self.params.num_elements()
    }

    /// Named views of the parameter tensors
    pub fn parameters(&self) -> Result<ParameterTensors<'_>> {
        ParameterTensors::new(&self.params)
    }

    pub fn parameter_arena(&self) -> &Arena<f32> {
        &self.params
    }

    /// The activation arena, once the first batch has been prepared
    pub fn activations(&self) -> Option<&Arena<f32>> {
        self.acts.as_ref()
    }

    /// The `(B, T)` the activation arena was sized for
    pub fn capacity(&self) -> Option<(usize, usize)> {
        self.capacity
    }

    /// `(B, T)` of the most recently recorded batch
    pub fn batch_dims(&self) -> (usize, usize) {
        self.batch_dims
    }

    /// Input tokens of the most recently recorded batch
    pub fn inputs(&self) -> &[u32] {
        &self.inputs[..self.batch_dims.0 * self.batch_dims.1]
    }

    /// Target tokens of the most recently recorded batch, if it had any
    pub fn targets(&self) -> Option<&[u32]> {
        self.has_targets
            .then(|| &self.targets[..self.batch_dims.0 * self.batch_dims.1])
    }

    /// Mean loss of the last forward pass run with targets
    pub fn mean_loss(&self) -> Option<f32> {
        self.mean_loss
    }

    /// Make sure the activation arena can hold a `(B, T)` batch
    ///
    /// The first call allocates the activation arena and the token caches for
    /// exactly `(B, T)` and fixes that as the capacity. Later calls only check
    /// that `B` and `T` fit within it; nothing is reallocated.
    ///
    /// # Errors
    ///
    /// - [`Gpt2Error::Config`] if `B` or `T` is zero, or if `T > max_seq_len`
    ///   on the first call
    /// - [`Gpt2Error::Allocation`] if the first allocation cannot be made
    /// - [`Gpt2Error::Capacity`] if `B` or `T` exceeds the fixed capacity,
    ///   including a `T` past `max_seq_len`
    pub fn prepare_for_batch(&mut self, batch_size: usize, seq_len: usize) -> Result<()> {
        if batch_size == 0 || seq_len == 0 {
            return Err(Gpt2Error::Config(format!(
                "batch dimensions must be positive, got ({batch_size}, {seq_len})"
            )));
        }
        // Capacity T never exceeds max_seq_len, so it subsumes that check
        if let Some(capacity) = self.capacity {
            return check_capacity(capacity, batch_size, seq_len);
        }
        if seq_len > self.config.max_seq_len {
            return Err(Gpt2Error::Config(format!(
                "sequence length {seq_len} exceeds model max_seq_len {}",
                self.config.max_seq_len
            )));
        }

        let specs = activation_specs(&self.config, batch_size, seq_len);
        let acts = Arena::allocate("activations", &specs)?;
        debug!(
            batch_size,
            seq_len,
            num_activations = acts.num_elements(),
            "activation arena ready"
        );

        // Cheaper than any activation tensor, so the arena check covers overflow
        let tokens = batch_size * seq_len;
        self.acts = Some(acts);
        self.capacity = Some((batch_size, seq_len));
        self.inputs = vec![0; tokens];
        self.targets = vec![0; tokens];
        Ok(())
    }

    /// Copy a batch's tokens into the store's cache
    ///
    /// Overwrites whatever batch was recorded before. Passing `None` for
    /// targets marks the cached batch as having none.
    ///
    /// # Errors
    ///
    /// - [`Gpt2Error::Config`] if no batch has been prepared yet
    /// - [`Gpt2Error::Capacity`] if `(B, T)` exceeds the capacity
    /// - [`Gpt2Error::Format`] if a token slice is not `B × T` long
    pub fn record_batch(
        &mut self,
        batch_size: usize,
        seq_len: usize,
        inputs: &[u32],
        targets: Option<&[u32]>,
    ) -> Result<()> {
        let capacity = self.capacity.ok_or_else(|| {
            Gpt2Error::Config("record_batch called before prepare_for_batch".to_string())
        })?;
        check_capacity(capacity, batch_size, seq_len)?;

        let n = batch_size * seq_len;
        check_len("inputs", inputs, n)?;
        if let Some(targets) = targets {
            check_len("targets", targets, n)?;
        }

        self.inputs[..n].copy_from_slice(inputs);
        match targets {
            Some(targets) => {
                self.targets[..n].copy_from_slice(targets);
                self.has_targets = true;
            }
            None => self.has_targets = false,
        }
        self.batch_dims = (batch_size, seq_len);
        Ok(())
    }

    /// Run one forward pass on a `(B, T)` batch
    ///
    /// Checks the tokens, prepares the activation arena, records the batch,
    /// then hands the views to `kernels`. The returned mean loss is also kept
    /// in [`ModelStore::mean_loss`]; without targets it is `None`.
    ///
    /// # Errors
    ///
    /// [`Gpt2Error::Format`] if any token is outside the vocabulary, whatever
    /// [`ForwardKernels::check_config`] rejects, plus everything [`ModelStore::prepare_for_batch`] and
    /// [`ModelStore::record_batch`] can return.
    pub fn forward<K: ForwardKernels + ?Sized>(
        &mut self,
        kernels: &K,
        batch_size: usize,
        seq_len: usize,
        inputs: &[u32],
        targets: Option<&[u32]>,
    ) -> Result<Option<f32>> {
        kernels.check_config(&self.config)?;
        let vocab_size = self.config.vocab_size;
        let mut tokens = inputs.iter().chain(targets.unwrap_or_default());
        if let Some(&bad) = tokens.find(|&&tok| tok as usize >= vocab_size) {
            return Err(Gpt2Error::Format(format!(
                "token id {bad} out of range for vocab_size {vocab_size}"
            )));
        }

        self.prepare_for_batch(batch_size, seq_len)?;
        self.record_batch(batch_size, seq_len, inputs, targets)?;

        let n = batch_size * seq_len;
        let Some(acts) = self.acts.as_mut() else {
            return Err(Gpt2Error::Config("activation arena missing".to_string()));
        };
        let ctx = ForwardContext {
            config: &self.config,
            params: ParameterTensors::new(&self.params)?,
            inputs: &self.inputs[..n],
            targets: self.has_targets.then(|| &self.targets[..n]),
            batch_size,
            seq_len,
        };
        let mut views = ActivationTensors::new(acts)?;
        let loss = kernels.forward(&ctx, &mut views);

        self.mean_loss = if self.has_targets { loss } else { None };
        Ok(self.mean_loss)
    }
}

fn check_capacity(capacity: (usize, usize), batch_size: usize, seq_len: usize) -> Result<()> {
    let (capacity_b, capacity_t) = capacity;
    if batch_size > capacity_b || seq_len > capacity_t {
        return Err(Gpt2Error::Capacity {
            requested_b: batch_size,
            requested_t: seq_len,
            capacity_b,
            capacity_t,
        });
    }
    Ok(())
}

fn check_len(what: &str, tokens: &[u32], expected: usize) -> Result<()> {
    if tokens.len() != expected {
        return Err(Gpt2Error::Format(format!(
            "{what} has {} tokens, batch needs {expected}",
            tokens.len()
        )));
    }
    Ok(())
}
