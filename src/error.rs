//! Error Types
//!
//! Every fallible operation in the crate returns [`Result`]. The variants map
//! one-to-one onto the places a load or a batch can go wrong:
//!
//! - **Io**: a file could not be opened, measured, or read to the end
//! - **Format**: a file opened fine but its contents are not what we expect
//!   (bad magic, bad version, truncated parameter stream, corpus too small)
//! - **Allocation**: an arena could not be sized or reserved
//! - **Capacity**: a batch is larger than the activation arena was built for
//! - **Config**: hyperparameters or run settings that can never work
//!
//! None of these terminate the process. The caller decides whether to retry,
//! skip a batch, or give up.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Gpt2Error>;

#[derive(Debug, Error)]
pub enum Gpt2Error {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Allocation of {elements} elements failed for {what}")]
    Allocation { what: &'static str, elements: usize },

    #[error(
        "Batch ({requested_b}, {requested_t}) exceeds activation capacity ({capacity_b}, {capacity_t})"
    )]
    Capacity {
        requested_b: usize,
        requested_t: usize,
        capacity_b: usize,
        capacity_t: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Gpt2Error {
    /// Attach the offending path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Gpt2Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Gpt2Error::Io { .. })
    }

    pub fn is_format(&self) -> bool {
        matches!(self, Gpt2Error::Format(_))
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, Gpt2Error::Capacity { .. })
    }
}
