//! Model Hyperparameters
//!
//! The five integers that determine every tensor shape in the model. They are
//! read once from the checkpoint header and never change afterwards.
//!
//! ```text
//! max_seq_len  maxT   longest context the position table covers
//! vocab_size   V      rows in the token embedding table
//! num_layers   L      transformer blocks
//! num_heads    NH     attention heads per block
//! channels     C      width of the residual stream
//! ```
//!
//! ## Parameter Count
//!
//! ```text
//! embeddings = (V + maxT) × C
//! per_layer  = 12 × C² + 13 × C
//! total      = embeddings + L × per_layer + 2 × C
//! ```
//!
//! For GPT-2 small (`maxT=1024, V=50257, L=12, NH=12, C=768`) this comes to
//! 124,439,808 parameters.

use crate::error::{Gpt2Error, Result};
use crate::shapes::parameter_specs;
use serde::{Deserialize, Serialize};

/// GPT-2 architecture hyperparameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub max_seq_len: usize,
    pub vocab_size: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub channels: usize,
}

impl Config {
    /// The 124M-parameter GPT-2 release
    pub fn gpt2_small() -> Self {
        Self {
            max_seq_len: 1024,
            vocab_size: 50257,
            num_layers: 12,
            num_heads: 12,
            channels: 768,
        }
    }

    /// Check that every derived shape is representable
    ///
    /// Rejects zero-sized dimensions and any parameter tensor whose element
    /// count (or the running total) would overflow `usize`. How heads split
    /// the channels is left to the kernels.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("max_seq_len", self.max_seq_len),
            ("vocab_size", self.vocab_size),
            ("num_layers", self.num_layers),
            ("num_heads", self.num_heads),
            ("channels", self.channels),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(Gpt2Error::Config(format!("{name} must be positive")));
            }
        }

        let mut total: usize = 0;
        for spec in parameter_specs(self) {
            total = spec
                .numel()
                .and_then(|n| total.checked_add(n))
                .ok_or_else(|| {
                    Gpt2Error::Config(format!("parameter tensor {} overflows usize", spec.name))
                })?;
        }

        Ok(())
    }

    /// Channels per attention head
    pub fn head_size(&self) -> usize {
        self.channels / self.num_heads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpt2_small_is_valid() {
        assert!(Config::gpt2_small().validate().is_ok());
        assert_eq!(Config::gpt2_small().head_size(), 64);
    }

    #[test]
    fn test_zero_field_rejected() {
        let config = Config {
            num_layers: 0,
            ..Config::gpt2_small()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("num_layers"));
    }

    #[test]
    fn test_uneven_heads_still_describe_a_layout() {
        let config = Config {
            num_heads: 5,
            ..Config::gpt2_small()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let config = Config {
            max_seq_len: 8,
            vocab_size: 8,
            num_layers: usize::MAX / 2,
            num_heads: 1,
            channels: 4,
        };
        assert!(matches!(config.validate(), Err(Gpt2Error::Config(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config::gpt2_small();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
