//! Named Tensor Views
//!
//! The arenas only know regions by position. These structs bind each region
//! to a named field so kernels can write `params.qkvw` instead of
//! `arena.view(4)`. They borrow from the arena and never own storage; copying
//! a `ParameterTensors` copies sixteen slice references, not the weights.
//!
//! Binding follows the declared order in [`crate::shapes`], which is also
//! the order of the struct fields below.

use crate::arena::Arena;
use crate::error::{Gpt2Error, Result};
use crate::shapes::{NUM_ACTIVATION_TENSORS, NUM_PARAMETER_TENSORS};

macro_rules! bind_views {
    ($label:expr, $views:expr, $n:expr, $ty:ident { $($field:ident),* $(,)? }) => {{
        let label = $label;
        let [$($field),*]: [_; $n] = $views.try_into().map_err(|views: Vec<_>| {
            Gpt2Error::Format(format!(
                "arena '{label}' has {} regions, {} needs {}",
                views.len(),
                stringify!($ty),
                $n
            ))
        })?;
        Ok($ty { $($field),* })
    }};
}

/// Read-only views of the 16 parameter tensors
#[derive(Clone, Copy, Debug)]
pub struct ParameterTensors<'a> {
    pub wte: &'a [f32],      // (V, C)
    pub wpe: &'a [f32],      // (maxT, C)
    pub ln1w: &'a [f32],     // (L, C)
    pub ln1b: &'a [f32],     // (L, C)
    pub qkvw: &'a [f32],     // (L, 3C, C)
    pub qkvb: &'a [f32],     // (L, 3C)
    pub attprojw: &'a [f32], // (L, C, C)
    pub attprojb: &'a [f32], // (L, C)
    pub ln2w: &'a [f32],     // (L, C)
    pub ln2b: &'a [f32],     // (L, C)
    pub fcw: &'a [f32],      // (L, 4C, C)
    pub fcb: &'a [f32],      // (L, 4C)
    pub fcprojw: &'a [f32],  // (L, C, 4C)
    pub fcprojb: &'a [f32],  // (L, C)
    pub lnfw: &'a [f32],     // (C)
    pub lnfb: &'a [f32],     // (C)
}

/// One transformer block's slice of every per-layer parameter
#[derive(Clone, Copy, Debug)]
pub struct LayerParameters<'a> {
    pub ln1w: &'a [f32],
    pub ln1b: &'a [f32],
    pub qkvw: &'a [f32],
    pub qkvb: &'a [f32],
    pub attprojw: &'a [f32],
    pub attprojb: &'a [f32],
    pub ln2w: &'a [f32],
    pub ln2b: &'a [f32],
    pub fcw: &'a [f32],
    pub fcb: &'a [f32],
    pub fcprojw: &'a [f32],
    pub fcprojb: &'a [f32],
}

/// The `layer`-th of `num_layers` equal chunks of a stacked tensor
pub(crate) fn layer_slice(tensor: &[f32], layer: usize, num_layers: usize) -> &[f32] {
    let n = tensor.len() / num_layers;
    &tensor[layer * n..(layer + 1) * n]
}

impl<'a> ParameterTensors<'a> {
    /// Bind the regions of a parameter arena to named fields
    ///
    /// # Errors
    ///
    /// [`Gpt2Error::Format`] if the arena does not hold exactly 16 regions
    pub fn new(arena: &'a Arena<f32>) -> Result<Self> {
        bind_views!(
            arena.label(),
            arena.split(),
            NUM_PARAMETER_TENSORS,
            ParameterTensors {
                wte, wpe, ln1w, ln1b, qkvw, qkvb, attprojw, attprojb, ln2w, ln2b, fcw, fcb,
                fcprojw, fcprojb, lnfw, lnfb,
            }
        )
    }

    /// Per-layer sub-views for block `layer` of `num_layers`
    ///
    /// # Panics
    ///
    /// Panics if `layer >= num_layers`
    pub fn layer(&self, layer: usize, num_layers: usize) -> LayerParameters<'a> {
        assert!(
            layer < num_layers,
            "layer {layer} out of range for {num_layers} layers"
        );
        let at = |t: &'a [f32]| layer_slice(t, layer, num_layers);
        LayerParameters {
            ln1w: at(self.ln1w),
            ln1b: at(self.ln1b),
            qkvw: at(self.qkvw),
            qkvb: at(self.qkvb),
            attprojw: at(self.attprojw),
            attprojb: at(self.attprojb),
            ln2w: at(self.ln2w),
            ln2b: at(self.ln2b),
            fcw: at(self.fcw),
            fcb: at(self.fcb),
            fcprojw: at(self.fcprojw),
            fcprojb: at(self.fcprojb),
        }
    }
}

/// Writable views of the 23 activation tensors
#[derive(Debug)]
pub struct ActivationTensors<'a> {
    pub encoded: &'a mut [f32],   // (B, T, C)
    pub ln1: &'a mut [f32],       // (L, B, T, C)
    pub ln1_mean: &'a mut [f32],  // (L, B, T)
    pub ln1_rstd: &'a mut [f32],  // (L, B, T)
    pub qkv: &'a mut [f32],       // (L, B, T, 3C)
    pub atty: &'a mut [f32],      // (L, B, T, C)
    pub preatt: &'a mut [f32],    // (L, B, NH, T, T)
    pub att: &'a mut [f32],       // (L, B, NH, T, T)
    pub attproj: &'a mut [f32],   // (L, B, T, C)
    pub residual2: &'a mut [f32], // (L, B, T, C)
    pub ln2: &'a mut [f32],       // (L, B, T, C)
    pub ln2_mean: &'a mut [f32],  // (L, B, T)
    pub ln2_rstd: &'a mut [f32],  // (L, B, T)
    pub fch: &'a mut [f32],       // (L, B, T, 4C)
    pub fch_gelu: &'a mut [f32],  // (L, B, T, 4C)
    pub fcproj: &'a mut [f32],    // (L, B, T, C)
    pub residual3: &'a mut [f32], // (L, B, T, C)
    pub lnf: &'a mut [f32],       // (B, T, C)
    pub lnf_mean: &'a mut [f32],  // (B, T)
    pub lnf_rstd: &'a mut [f32],  // (B, T)
    pub logits: &'a mut [f32],    // (B, T, V)
    pub probs: &'a mut [f32],     // (B, T, V)
    pub losses: &'a mut [f32],    // (B, T)
}

impl<'a> ActivationTensors<'a> {
    /// Bind the regions of an activation arena to named fields
    ///
    /// # Errors
    ///
    /// [`Gpt2Error::Format`] if the arena does not hold exactly 23 regions
    pub fn new(arena: &'a mut Arena<f32>) -> Result<Self> {
        let label = arena.label();
        bind_views!(
            label,
            arena.split_mut(),
            NUM_ACTIVATION_TENSORS,
            ActivationTensors {
                encoded, ln1, ln1_mean, ln1_rstd, qkv, atty, preatt, att, attproj, residual2,
                ln2, ln2_mean, ln2_rstd, fch, fch_gelu, fcproj, residual3, lnf, lnf_mean,
                lnf_rstd, logits, probs, losses,
            }
        )
    }
}
