//! Forward Pass Kernels
//!
//! The model store owns memory; it does not do arithmetic. Arithmetic is
//! supplied through the [`ForwardKernels`] trait, which receives the parameter
//! views, the activation views and the current batch, and returns the mean
//! loss when targets were supplied.
//!
//! [`CpuKernels`] is a straightforward CPU implementation of the GPT-2 forward
//! pass over the arena views:
//!
//! ```text
//! encoded = wte[token] + wpe[pos]
//! for each layer:
//!     ln1      = layernorm(residual)
//!     qkv      = ln1 @ qkvw^T + qkvb
//!     atty     = causal_attention(qkv)
//!     attproj  = atty @ attprojw^T + attprojb
//!     residual2 = residual + attproj
//!     ln2      = layernorm(residual2)
//!     fch      = ln2 @ fcw^T + fcb
//!     fch_gelu = gelu(fch)
//!     fcproj   = fch_gelu @ fcprojw^T + fcprojb
//!     residual3 = residual2 + fcproj
//! lnf    = layernorm(residual3[last])
//! logits = lnf @ wte^T
//! probs  = softmax(logits)
//! losses = -log(probs[target])
//! ```
//!
//! ## Layer Strides
//!
//! The activation arena is sized for its capacity `(B_cap, T_cap)`, but a
//! batch may be smaller. Per-layer activation slices are taken with the
//! batch's own `B × T` stride, so a smaller batch simply uses a prefix of
//! each layer's region.
//!
//! ## Performance
//!
//! Rows of every kernel are independent, so each one is parallelized across
//! rows (or across batch entries for attention) with Rayon.

use crate::config::Config;
use crate::error::{Gpt2Error, Result};
use crate::tensors::{ActivationTensors, ParameterTensors};
use rayon::prelude::*;
use std::f32::consts::PI;

const LAYERNORM_EPS: f32 = 1e-5;

/// Everything a forward pass reads
#[derive(Clone, Copy, Debug)]
pub struct ForwardContext<'a> {
    pub config: &'a Config,
    pub params: ParameterTensors<'a>,
    pub inputs: &'a [u32],
    pub targets: Option<&'a [u32]>,
    pub batch_size: usize,
    pub seq_len: usize,
}

/// Numeric implementation of a forward pass
///
/// Implementations may assume `inputs.len() == batch_size * seq_len`, every
/// token is below `vocab_size`, `seq_len <= max_seq_len`, and the activation
/// views are at least as large as the batch needs. [`crate::ModelStore`]
/// checks all of this before calling.
pub trait ForwardKernels {
    /// Reject model shapes this implementation cannot run
    ///
    /// Called by [`crate::ModelStore::forward`] before anything is allocated.
    fn check_config(&self, _config: &Config) -> Result<()> {
        Ok(())
    }

    /// Run the forward pass, returning the mean loss if targets were given
    fn forward(&self, ctx: &ForwardContext<'_>, acts: &mut ActivationTensors<'_>) -> Option<f32>;
}

/// Reference CPU forward pass
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuKernels;

impl ForwardKernels for CpuKernels {
    fn check_config(&self, config: &Config) -> Result<()> {
        if config.channels % config.num_heads != 0 {
            return Err(Gpt2Error::Config(format!(
                "channels ({}) must be divisible by num_heads ({})",
                config.channels, config.num_heads
            )));
        }
        Ok(())
    }

    fn forward(&self, ctx: &ForwardContext<'_>, acts: &mut ActivationTensors<'_>) -> Option<f32> {
        let (b, t) = (ctx.batch_size, ctx.seq_len);
        let c = ctx.config.channels;
        let nh = ctx.config.num_heads;
        let v = ctx.config.vocab_size;
        let num_layers = ctx.config.num_layers;
        let p = ctx.params;

        let bt = b * t;
        let btc = bt * c;
        let att_len = b * nh * t * t;

        encoder_forward(&mut acts.encoded[..btc], ctx.inputs, p.wte, p.wpe, t, c);

        for l in 0..num_layers {
            let lp = p.layer(l, num_layers);

            let (done, rest) = acts.residual3.split_at_mut(l * btc);
            let residual: &[f32] = if l == 0 {
                &acts.encoded[..btc]
            } else {
                &done[(l - 1) * btc..]
            };

            let ln1 = &mut acts.ln1[l * btc..(l + 1) * btc];
            let ln1_mean = &mut acts.ln1_mean[l * bt..(l + 1) * bt];
            let ln1_rstd = &mut acts.ln1_rstd[l * bt..(l + 1) * bt];
            layernorm_forward(ln1, ln1_mean, ln1_rstd, residual, lp.ln1w, lp.ln1b, c);

            let qkv = &mut acts.qkv[l * bt * 3 * c..(l + 1) * bt * 3 * c];
            matmul_forward(qkv, ln1, lp.qkvw, Some(lp.qkvb), c, 3 * c);

            let atty = &mut acts.atty[l * btc..(l + 1) * btc];
            let preatt = &mut acts.preatt[l * att_len..(l + 1) * att_len];
            let att = &mut acts.att[l * att_len..(l + 1) * att_len];
            attention_forward(atty, preatt, att, qkv, t, c, nh);

            let attproj = &mut acts.attproj[l * btc..(l + 1) * btc];
            matmul_forward(attproj, atty, lp.attprojw, Some(lp.attprojb), c, c);

            let residual2 = &mut acts.residual2[l * btc..(l + 1) * btc];
            residual_forward(residual2, residual, attproj);

            let ln2 = &mut acts.ln2[l * btc..(l + 1) * btc];
            let ln2_mean = &mut acts.ln2_mean[l * bt..(l + 1) * bt];
            let ln2_rstd = &mut acts.ln2_rstd[l * bt..(l + 1) * bt];
            layernorm_forward(ln2, ln2_mean, ln2_rstd, residual2, lp.ln2w, lp.ln2b, c);

            let fch = &mut acts.fch[l * bt * 4 * c..(l + 1) * bt * 4 * c];
            matmul_forward(fch, ln2, lp.fcw, Some(lp.fcb), c, 4 * c);

            let fch_gelu = &mut acts.fch_gelu[l * bt * 4 * c..(l + 1) * bt * 4 * c];
            gelu_forward(fch_gelu, fch);

            let fcproj = &mut acts.fcproj[l * btc..(l + 1) * btc];
            matmul_forward(fcproj, fch_gelu, lp.fcprojw, Some(lp.fcprojb), 4 * c, c);

            residual_forward(&mut rest[..btc], residual2, fcproj);
        }

        let last = &acts.residual3[(num_layers - 1) * btc..num_layers * btc];
        layernorm_forward(
            &mut acts.lnf[..btc],
            &mut acts.lnf_mean[..bt],
            &mut acts.lnf_rstd[..bt],
            last,
            p.lnfw,
            p.lnfb,
            c,
        );

        // Output projection reuses the token embedding table
        matmul_forward(&mut acts.logits[..bt * v], &acts.lnf[..btc], p.wte, None, c, v);
        softmax_forward(&mut acts.probs[..bt * v], &acts.logits[..bt * v], v);

        let targets = ctx.targets?;
        crossentropy_forward(&mut acts.losses[..bt], &acts.probs[..bt * v], targets, v);
        Some(acts.losses[..bt].iter().sum::<f32>() / bt as f32)
    }
}

/// Token embedding plus position embedding, one row per token
pub fn encoder_forward(
    out: &mut [f32],
    inputs: &[u32],
    wte: &[f32],
    wpe: &[f32],
    seq_len: usize,
    c: usize,
) {
    out.par_chunks_mut(c)
        .zip(inputs.par_iter())
        .enumerate()
        .for_each(|(row, (out_row, &token))| {
            let pos = row % seq_len;
            let tok = &wte[token as usize * c..(token as usize + 1) * c];
            let pe = &wpe[pos * c..(pos + 1) * c];
            for ((o, &a), &b) in out_row.iter_mut().zip(tok).zip(pe) {
                *o = a + b;
            }
        });
}

/// Normalize each row of `c` values, then scale and shift
///
/// Also records the per-row mean and reciprocal standard deviation.
pub fn layernorm_forward(
    out: &mut [f32],
    mean: &mut [f32],
    rstd: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: &[f32],
    c: usize,
) {
    out.par_chunks_mut(c)
        .zip(inp.par_chunks(c))
        .zip(mean.par_iter_mut().zip(rstd.par_iter_mut()))
        .for_each(|((out_row, x), (m, r))| {
            let mu = x.iter().sum::<f32>() / c as f32;
            let var = x.iter().map(|&xi| (xi - mu) * (xi - mu)).sum::<f32>() / c as f32;
            let s = 1.0 / (var + LAYERNORM_EPS).sqrt();
            for i in 0..c {
                out_row[i] = (x[i] - mu) * s * weight[i] + bias[i];
            }
            *m = mu;
            *r = s;
        });
}

/// `out[row, o] = bias[o] + Σ_i inp[row, i] × weight[o, i]`
///
/// `weight` is stored `(oc, c_in)`, i.e. already transposed.
pub fn matmul_forward(
    out: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: Option<&[f32]>,
    c_in: usize,
    oc: usize,
) {
    out.par_chunks_mut(oc)
        .zip(inp.par_chunks(c_in))
        .for_each(|(out_row, in_row)| {
            for (o, slot) in out_row.iter_mut().enumerate() {
                let w = &weight[o * c_in..(o + 1) * c_in];
                let dot: f32 = in_row.iter().zip(w).map(|(a, b)| a * b).sum();
                *slot = bias.map_or(0.0, |bias| bias[o]) + dot;
            }
        });
}

/// Causal multi-head self-attention over a fused `(B, T, 3C)` qkv buffer
///
/// `preatt` receives the scaled scores and `att` the softmaxed weights, both
/// laid out `(B, NH, T, T)`; positions after the query are left at zero.
pub fn attention_forward(
    out: &mut [f32],
    preatt: &mut [f32],
    att: &mut [f32],
    qkv: &[f32],
    seq_len: usize,
    c: usize,
    nh: usize,
) {
    let t_len = seq_len;
    let hs = c / nh;
    let scale = 1.0 / (hs as f32).sqrt();
    let c3 = 3 * c;

    out.par_chunks_mut(t_len * c)
        .zip(preatt.par_chunks_mut(nh * t_len * t_len))
        .zip(att.par_chunks_mut(nh * t_len * t_len))
        .enumerate()
        .for_each(|(b, ((out_b, preatt_b), att_b))| {
            let qkv_b = &qkv[b * t_len * c3..(b + 1) * t_len * c3];

            for t in 0..t_len {
                for h in 0..nh {
                    let query = &qkv_b[t * c3 + h * hs..t * c3 + (h + 1) * hs];
                    let row = h * t_len * t_len + t * t_len;
                    let preatt_row = &mut preatt_b[row..row + t_len];
                    let att_row = &mut att_b[row..row + t_len];

                    let mut maxval = f32::NEG_INFINITY;
                    for t2 in 0..=t {
                        let key = &qkv_b[t2 * c3 + c + h * hs..t2 * c3 + c + (h + 1) * hs];
                        let score: f32 = query.iter().zip(key).map(|(q, k)| q * k).sum();
                        let score = score * scale;
                        maxval = maxval.max(score);
                        preatt_row[t2] = score;
                    }

                    let mut expsum = 0.0;
                    for t2 in 0..=t {
                        let e = (preatt_row[t2] - maxval).exp();
                        expsum += e;
                        att_row[t2] = e;
                    }
                    let norm = if expsum == 0.0 { 0.0 } else { 1.0 / expsum };
                    for (t2, a) in att_row.iter_mut().enumerate() {
                        if t2 <= t {
                            *a *= norm;
                        } else {
                            *a = 0.0;
                        }
                    }

                    let out_bth = &mut out_b[t * c + h * hs..t * c + (h + 1) * hs];
                    out_bth.fill(0.0);
                    for t2 in 0..=t {
                        let value =
                            &qkv_b[t2 * c3 + 2 * c + h * hs..t2 * c3 + 2 * c + (h + 1) * hs];
                        let weight = att_row[t2];
                        for (o, &val) in out_bth.iter_mut().zip(value) {
                            *o += weight * val;
                        }
                    }
                }
            }
        });
}

/// GELU, tanh approximation
pub fn gelu_forward(out: &mut [f32], inp: &[f32]) {
    let scaling = (2.0 / PI).sqrt();
    out.par_iter_mut().zip(inp.par_iter()).for_each(|(o, &x)| {
        let cube = 0.044715 * x * x * x;
        *o = 0.5 * x * (1.0 + (scaling * (x + cube)).tanh());
    });
}

pub fn residual_forward(out: &mut [f32], inp1: &[f32], inp2: &[f32]) {
    out.par_iter_mut()
        .zip(inp1.par_iter().zip(inp2.par_iter()))
        .for_each(|(o, (&a, &b))| *o = a + b);
}

/// Row-wise softmax over rows of `v` logits
pub fn softmax_forward(probs: &mut [f32], logits: &[f32], v: usize) {
    probs
        .par_chunks_mut(v)
        .zip(logits.par_chunks(v))
        .for_each(|(p, l)| {
            let maxval = l.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for (pi, &li) in p.iter_mut().zip(l) {
                *pi = (li - maxval).exp();
                sum += *pi;
            }
            for pi in p.iter_mut() {
                *pi /= sum;
            }
        });
}

/// Per-position negative log-likelihood of the target token
pub fn crossentropy_forward(losses: &mut [f32], probs: &[f32], targets: &[u32], v: usize) {
    losses
        .par_iter_mut()
        .zip(probs.par_chunks(v).zip(targets.par_iter()))
        .for_each(|(loss, (p, &target))| *loss = -p[target as usize].ln());
}
