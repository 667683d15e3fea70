//! Tensor Shape Calculator
//!
//! Derives the shape of every parameter and activation tensor from the model
//! hyperparameters. The order of the returned tables is part of the checkpoint
//! format: parameters are stored in the file in exactly this order, and both
//! arenas lay their regions out in exactly this order.
//!
//! ## Parameter Tensors
//!
//! ```text
//! wte       (V, C)        token embedding
//! wpe       (maxT, C)     position embedding
//! ln1w      (L, C)        ┐
//! ln1b      (L, C)        ┘ pre-attention layernorm
//! qkvw      (L, 3C, C)    ┐
//! qkvb      (L, 3C)       ┘ fused query/key/value projection
//! attprojw  (L, C, C)     ┐
//! attprojb  (L, C)        ┘ attention output projection
//! ln2w      (L, C)        ┐
//! ln2b      (L, C)        ┘ pre-MLP layernorm
//! fcw       (L, 4C, C)    ┐
//! fcb       (L, 4C)       ┘ MLP expansion
//! fcprojw   (L, C, 4C)    ┐
//! fcprojb   (L, C)        ┘ MLP contraction
//! lnfw      (C)           ┐
//! lnfb      (C)           ┘ final layernorm
//! ```
//!
//! ## Activation Tensors
//!
//! Activations additionally depend on the batch size `B` and sequence length
//! `T`. Attention scores are the only quadratic term (`T × T` per head), and
//! logits/probs (`B × T × V`) usually dominate the total.

use crate::config::Config;

/// Number of parameter tensors in a GPT-2 checkpoint
pub const NUM_PARAMETER_TENSORS: usize = 16;

/// Number of activation tensors produced by one forward pass
pub const NUM_ACTIVATION_TENSORS: usize = 23;

/// Parameter tensor names in checkpoint order
pub const PARAMETER_NAMES: [&str; NUM_PARAMETER_TENSORS] = [
    "wte", "wpe", "ln1w", "ln1b", "qkvw", "qkvb", "attprojw", "attprojb", "ln2w", "ln2b", "fcw",
    "fcb", "fcprojw", "fcprojb", "lnfw", "lnfb",
];

/// Activation tensor names in arena order
pub const ACTIVATION_NAMES: [&str; NUM_ACTIVATION_TENSORS] = [
    "encoded",
    "ln1",
    "ln1_mean",
    "ln1_rstd",
    "qkv",
    "atty",
    "preatt",
    "att",
    "attproj",
    "residual2",
    "ln2",
    "ln2_mean",
    "ln2_rstd",
    "fch",
    "fch_gelu",
    "fcproj",
    "residual3",
    "lnf",
    "lnf_mean",
    "lnf_rstd",
    "logits",
    "probs",
    "losses",
];

/// Name and dimensions of one tensor region
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: &'static str,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(name: &'static str, shape: Vec<usize>) -> Self {
        Self { name, shape }
    }

    /// Element count, or `None` if the product overflows
    pub fn numel(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

/// Shapes of the 16 parameter tensors, in checkpoint order
pub fn parameter_specs(config: &Config) -> [TensorSpec; NUM_PARAMETER_TENSORS] {
    let v = config.vocab_size;
    let max_t = config.max_seq_len;
    let l = config.num_layers;
    let c = config.channels;
    let c3 = c.saturating_mul(3);
    let c4 = c.saturating_mul(4);

    let shapes: [Vec<usize>; NUM_PARAMETER_TENSORS] = [
        vec![v, c],
        vec![max_t, c],
        vec![l, c],
        vec![l, c],
        vec![l, c3, c],
        vec![l, c3],
        vec![l, c, c],
        vec![l, c],
        vec![l, c],
        vec![l, c],
        vec![l, c4, c],
        vec![l, c4],
        vec![l, c, c4],
        vec![l, c],
        vec![c],
        vec![c],
    ];

    let mut i = 0;
    shapes.map(|shape| {
        let spec = TensorSpec::new(PARAMETER_NAMES[i], shape);
        i += 1;
        spec
    })
}

/// Shapes of the 23 activation tensors for a `(B, T)` batch, in arena order
pub fn activation_specs(
    config: &Config,
    batch_size: usize,
    seq_len: usize,
) -> [TensorSpec; NUM_ACTIVATION_TENSORS] {
    let (b, t) = (batch_size, seq_len);
    let v = config.vocab_size;
    let l = config.num_layers;
    let nh = config.num_heads;
    let c = config.channels;
    let c3 = c.saturating_mul(3);
    let c4 = c.saturating_mul(4);

    let shapes: [Vec<usize>; NUM_ACTIVATION_TENSORS] = [
        vec![b, t, c],
        vec![l, b, t, c],
        vec![l, b, t],
        vec![l, b, t],
        vec![l, b, t, c3],
        vec![l, b, t, c],
        vec![l, b, nh, t, t],
        vec![l, b, nh, t, t],
        vec![l, b, t, c],
        vec![l, b, t, c],
        vec![l, b, t, c],
        vec![l, b, t],
        vec![l, b, t],
        vec![l, b, t, c4],
        vec![l, b, t, c4],
        vec![l, b, t, c],
        vec![l, b, t, c],
        vec![b, t, c],
        vec![b, t],
        vec![b, t],
        vec![b, t, v],
        vec![b, t, v],
        vec![b, t],
    ];

    let mut i = 0;
    shapes.map(|shape| {
        let spec = TensorSpec::new(ACTIVATION_NAMES[i], shape);
        i += 1;
        spec
    })
}

/// Element counts of the 16 parameter tensors
///
/// The config must have passed [`Config::validate`].
pub fn parameter_sizes(config: &Config) -> [usize; NUM_PARAMETER_TENSORS] {
    parameter_specs(config).map(|spec| spec.shape.iter().product())
}

/// Element counts of the 23 activation tensors for a `(B, T)` batch
///
/// The config must have passed [`Config::validate`] and `B × T` must be small
/// enough that no activation overflows; [`crate::ModelStore`] checks this
/// through [`TensorSpec::numel`] before allocating.
pub fn activation_sizes(
    config: &Config,
    batch_size: usize,
    seq_len: usize,
) -> [usize; NUM_ACTIVATION_TENSORS] {
    activation_specs(config, batch_size, seq_len).map(|spec| spec.shape.iter().product())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn tiny() -> Config {
        Config {
            max_seq_len: 8,
            vocab_size: 11,
            num_layers: 2,
            num_heads: 2,
            channels: 4,
        }
    }

    #[test]
    fn test_gpt2_small_parameter_count() {
        let total: usize = parameter_sizes(&Config::gpt2_small()).iter().sum();
        assert_eq!(total, 124_439_808);
    }

    #[test]
    fn test_parameter_sizes_match_formulas() {
        let sizes = parameter_sizes(&tiny());
        // V=11, maxT=8, L=2, C=4
        assert_eq!(
            sizes,
            [44, 32, 8, 8, 96, 24, 32, 8, 8, 8, 128, 32, 128, 8, 4, 4]
        );
    }

    #[test]
    fn test_activation_sizes_match_formulas() {
        let sizes = activation_sizes(&tiny(), 3, 5);
        // B=3, T=5, L=2, NH=2, C=4, V=11
        let bt = 15;
        assert_eq!(sizes[0], bt * 4);
        assert_eq!(sizes[1], 2 * bt * 4);
        assert_eq!(sizes[2], 2 * bt);
        assert_eq!(sizes[4], 2 * bt * 12);
        assert_eq!(sizes[6], 2 * 3 * 2 * 5 * 5);
        assert_eq!(sizes[7], sizes[6]);
        assert_eq!(sizes[13], 2 * bt * 16);
        assert_eq!(sizes[18], bt);
        assert_eq!(sizes[20], bt * 11);
        assert_eq!(sizes[21], bt * 11);
        assert_eq!(sizes[22], bt);
    }

    #[test]
    fn test_names_follow_declared_order() {
        let specs = activation_specs(&tiny(), 1, 1);
        let names: Vec<_> = specs.iter().map(|s| s.name).collect();
        assert_eq!(names, ACTIVATION_NAMES);
        assert_eq!(parameter_specs(&tiny())[4].name, "qkvw");
        assert_eq!(parameter_specs(&tiny())[4].shape, vec![2, 12, 4]);
    }

    #[test]
    fn test_specs_agree_with_sizes_for_random_configs() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let heads = rng.random_range(1..=4);
            let config = Config {
                max_seq_len: rng.random_range(1..64),
                vocab_size: rng.random_range(1..500),
                num_layers: rng.random_range(1..6),
                num_heads: heads,
                channels: heads * rng.random_range(1..16),
            };
            let (b, t) = (rng.random_range(1..5), rng.random_range(1..9));

            let from_specs: Vec<usize> = activation_specs(&config, b, t)
                .iter()
                .map(|s| s.numel().unwrap())
                .collect();
            assert_eq!(from_specs, activation_sizes(&config, b, t));

            let from_specs: Vec<usize> = parameter_specs(&config)
                .iter()
                .map(|s| s.numel().unwrap())
                .collect();
            assert_eq!(from_specs, parameter_sizes(&config));
        }
    }

    #[test]
    fn test_numel_overflow_is_none() {
        let spec = TensorSpec::new("big", vec![usize::MAX, 2]);
        assert_eq!(spec.numel(), None);
    }
}
