//! Streaming Token Batch Loader
//!
//! Reads fixed-size training batches straight from a flat binary file of
//! `u32` token ids (little-endian, no header). Only one batch is ever held in
//! memory, so corpora far larger than RAM work fine.
//!
//! ## How Batches Are Framed
//!
//! Each read pulls `B × T + 1` consecutive tokens into one buffer. The first
//! `B × T` are the inputs; the same buffer shifted by one is the targets:
//!
//! ```text
//! file:     t0 t1 t2 t3 t4 t5 t6 t7 t8 t9 ...
//! B=2 T=3
//! buffer:   t0 t1 t2 t3 t4 t5 t6
//! inputs:   t0 t1 t2 t3 t4 t5          (rows: [t0 t1 t2] [t3 t4 t5])
//! targets:     t1 t2 t3 t4 t5 t6       (rows: [t1 t2 t3] [t4 t5 t6])
//! ```
//!
//! The cursor then advances by `B × T` tokens, so consecutive batches share
//! exactly one token: the extra target of one batch is the first input of
//! the next.
//!
//! ## Wrap-Around
//!
//! When the next window would run past the end of the file the cursor jumps
//! back to zero. The loader never reports an end of data; callers bound their
//! own loops (a step count for training, a batch count for evaluation) and
//! call [`StreamingBatchLoader::reset`] to replay from the start.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gpt2_arena::StreamingBatchLoader;
//!
//! let mut loader = StreamingBatchLoader::open("data/tiny_shakespeare_val.bin", 4, 64)?;
//! for _ in 0..10 {
//!     let batch = loader.next_batch()?;
//!     assert_eq!(batch.inputs.len(), 4 * 64);
//!     assert_eq!(batch.targets[0], batch.inputs[1]);
//! }
//! loader.reset();
//! # Ok::<(), gpt2_arena::Gpt2Error>(())
//! ```

use crate::error::{Gpt2Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bytes per token id in the corpus file
pub const TOKEN_BYTES: usize = std::mem::size_of::<u32>();

/// One batch of input/target windows borrowed from the loader's buffer
///
/// Both slices are `B × T` long, row-major `(B, T)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Batch<'a> {
    pub inputs: &'a [u32],
    pub targets: &'a [u32],
    pub batch_size: usize,
    pub seq_len: usize,
}

/// Ring-buffer reader over a flat token file
#[derive(Debug)]
pub struct StreamingBatchLoader {
    path: PathBuf,
    batch_size: usize,
    seq_len: usize,
    file: File,
    file_size: u64,
    position: u64,
    // B*T + 1 tokens; inputs and targets are overlapping views of it
    tokens: Vec<u32>,
    bytes: Vec<u8>,
    num_batches: u64,
}

impl StreamingBatchLoader {
    /// Open a token file for `(B, T)` batches
    ///
    /// # Errors
    ///
    /// - [`Gpt2Error::Config`] if `B` or `T` is zero
    /// - [`Gpt2Error::Io`] if the file cannot be opened or measured
    /// - [`Gpt2Error::Format`] if the file holds fewer than `B × T + 1`
    ///   tokens or its length is not a multiple of the token size (no buffer
    ///   is allocated in either case)
    pub fn open(path: impl AsRef<Path>, batch_size: usize, seq_len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if batch_size == 0 || seq_len == 0 {
            return Err(Gpt2Error::Config(format!(
                "batch dimensions must be positive, got ({batch_size}, {seq_len})"
            )));
        }
        let window = batch_size
            .checked_mul(seq_len)
            .and_then(|bt| bt.checked_add(1))
            .and_then(|n| n.checked_mul(TOKEN_BYTES))
            .ok_or_else(|| {
                Gpt2Error::Config(format!("batch ({batch_size}, {seq_len}) is too large"))
            })?;

        let mut file = File::open(&path).map_err(|e| Gpt2Error::io(&path, e))?;
        let file_size = file
            .seek(SeekFrom::End(0))
            .map_err(|e| Gpt2Error::io(&path, e))?;

        if file_size < window as u64 {
            return Err(Gpt2Error::Format(format!(
                "{} holds {file_size} bytes, a ({batch_size}, {seq_len}) batch needs {window}",
                path.display()
            )));
        }

        if file_size % TOKEN_BYTES as u64 != 0 {
            return Err(Gpt2Error::Format(format!(
                "{} holds {file_size} bytes, not a whole number of {TOKEN_BYTES}-byte tokens",
                path.display()
            )));
        }

        let stride = (batch_size * seq_len * TOKEN_BYTES) as u64;
        let num_batches = file_size / stride;
        debug!(
            path = %path.display(),
            file_size,
            num_batches,
            "opened token file"
        );

        Ok(Self {
            path,
            batch_size,
            seq_len,
            file,
            file_size,
            position: 0,
            tokens: vec![0; batch_size * seq_len + 1],
            bytes: vec![0; window],
            num_batches,
        })
    }

    /// Rewind to the start of the file
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Read the next window, wrapping to the start of the file if needed
    ///
    /// # Errors
    ///
    /// [`Gpt2Error::Io`] if seeking fails or the read comes up short (the
    /// file shrank after it was opened).
    pub fn next_batch(&mut self) -> Result<Batch<'_>> {
        let window = self.bytes.len() as u64;
        if self.position + window > self.file_size {
            debug!(path = %self.path.display(), "token file exhausted, wrapping to start");
            self.position = 0;
        }

        self.file
            .seek(SeekFrom::Start(self.position))
            .map_err(|e| Gpt2Error::io(&self.path, e))?;
        self.file
            .read_exact(&mut self.bytes)
            .map_err(|e| Gpt2Error::io(&self.path, e))?;

        for (token, raw) in self.tokens.iter_mut().zip(self.bytes.chunks_exact(TOKEN_BYTES)) {
            *token = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }

        self.position += (self.batch_size * self.seq_len * TOKEN_BYTES) as u64;
        Ok(self.current())
    }

    /// The most recently read batch
    pub fn current(&self) -> Batch<'_> {
        let n = self.batch_size * self.seq_len;
        Batch {
            inputs: &self.tokens[..n],
            targets: &self.tokens[1..n + 1],
            batch_size: self.batch_size,
            seq_len: self.seq_len,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Whole batches in the file (a trailing partial batch is not counted)
    pub fn num_batches(&self) -> u64 {
        self.num_batches
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Byte offset the next read starts from (before any wrap)
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_tokens;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    fn counting_file(dir: &Path, count: u32) -> PathBuf {
        let path = dir.join("tokens.bin");
        let tokens: Vec<u32> = (0..count).map(|i| i * 10).collect();
        write_tokens(&path, &tokens);
        path
    }

    #[test]
    fn test_three_batches_then_wrap() {
        let dir = tempdir().unwrap();
        // B=2, T=3: three whole batches plus the one extra target token
        let path = counting_file(dir.path(), 2 * 3 * 3 + 1);
        let mut loader = StreamingBatchLoader::open(&path, 2, 3).unwrap();
        assert_eq!(loader.num_batches(), 3);

        let batch = loader.next_batch().unwrap();
        assert_eq!((batch.batch_size, batch.seq_len), (2, 3));
        let first = batch.inputs.to_vec();
        assert_eq!(first, vec![0, 10, 20, 30, 40, 50]);

        let second = loader.next_batch().unwrap().inputs.to_vec();
        assert_eq!(second[0], 60);
        let third = loader.next_batch().unwrap();
        assert_eq!(third.inputs[0], 120);
        assert_eq!(*third.targets.last().unwrap(), 180);

        let fourth = loader.next_batch().unwrap();
        assert_eq!(fourth.inputs, &first[..]);
        assert_eq!(loader.position(), 6 * TOKEN_BYTES as u64);
    }

    #[test]
    fn test_targets_are_inputs_shifted_by_one() {
        let dir = tempdir().unwrap();
        let path = counting_file(dir.path(), 50);
        let mut loader = StreamingBatchLoader::open(&path, 3, 4).unwrap();

        for _ in 0..6 {
            let batch = loader.next_batch().unwrap();
            let n = batch.inputs.len();
            assert_eq!(n, 12);
            assert_eq!(batch.targets.len(), n);
            for i in 0..n - 1 {
                assert_eq!(batch.targets[i], batch.inputs[i + 1]);
            }
            assert_eq!(batch.targets[n - 1], batch.inputs[n - 1] + 10);
        }
    }

    #[test]
    fn test_consecutive_batches_share_one_token() {
        let dir = tempdir().unwrap();
        let path = counting_file(dir.path(), 40);
        let mut loader = StreamingBatchLoader::open(&path, 2, 2).unwrap();

        let first = loader.next_batch().unwrap();
        let last_target = *first.targets.last().unwrap();
        let second = loader.next_batch().unwrap();
        assert_eq!(second.inputs[0], last_target);
    }

    #[test]
    fn test_reset_replays_first_window() {
        let dir = tempdir().unwrap();
        let path = counting_file(dir.path(), 100);
        let mut loader = StreamingBatchLoader::open(&path, 2, 4).unwrap();
        let first = loader.next_batch().unwrap().inputs.to_vec();

        for _ in 0..17 {
            loader.next_batch().unwrap();
        }
        loader.reset();
        assert_eq!(loader.position(), 0);
        assert_eq!(loader.next_batch().unwrap().inputs, &first[..]);
    }

    #[test]
    fn test_partial_trailing_batch_is_not_counted() {
        let dir = tempdir().unwrap();
        let path = counting_file(dir.path(), 2 * 3 * 2 + 5);
        let loader = StreamingBatchLoader::open(&path, 2, 3).unwrap();
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.file_size(), 17 * TOKEN_BYTES as u64);
    }

    #[test]
    fn test_file_too_small_is_format_error() {
        let dir = tempdir().unwrap();
        let path = counting_file(dir.path(), 2 * 3);
        let err = StreamingBatchLoader::open(&path, 2, 3).unwrap_err();
        assert!(err.is_format());

        // Exactly B*T + 1 tokens is enough
        let path = counting_file(dir.path(), 2 * 3 + 1);
        assert!(StreamingBatchLoader::open(&path, 2, 3).is_ok());
    }

    #[test]
    fn test_ragged_file_is_format_error() {
        let dir = tempdir().unwrap();
        let path = counting_file(dir.path(), 8);
        // Drop the last byte of the final token
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(8 * TOKEN_BYTES as u64 - 1)
            .unwrap();

        let err = StreamingBatchLoader::open(&path, 1, 2).unwrap_err();
        assert!(err.is_format());
        assert!(err.to_string().contains("31 bytes"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = StreamingBatchLoader::open(dir.path().join("none.bin"), 1, 1).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let dir = tempdir().unwrap();
        let path = counting_file(dir.path(), 10);
        assert!(matches!(
            StreamingBatchLoader::open(&path, 0, 3),
            Err(Gpt2Error::Config(_))
        ));
    }

    #[test]
    fn test_truncation_after_open_is_io_error() {
        let dir = tempdir().unwrap();
        let path = counting_file(dir.path(), 30);
        let mut loader = StreamingBatchLoader::open(&path, 2, 2).unwrap();

        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(3 * TOKEN_BYTES as u64)
            .unwrap();

        let err = loader.next_batch().unwrap_err();
        assert!(err.is_io());
    }
}
