//! Checkpoint Reader
//!
//! Reads GPT-2 checkpoints in the flat binary layout produced by the reference
//! PyTorch exporter.
//!
//! ## File Format
//!
//! ```text
//! offset 0      header: 256 × i32 (little-endian)
//!                 [0] magic    20240326
//!                 [1] version  1
//!                 [2] max_seq_len
//!                 [3] vocab_size
//!                 [4] num_layers
//!                 [5] num_heads
//!                 [6] channels
//!                 [7..256] reserved
//! offset 1024   parameters: Σ sizes × f32 (little-endian)
//!                 wte, wpe, ln1w, ... lnfb  (see `shapes`)
//! ```
//!
//! There are no length prefixes or separators between tensors. The only way
//! to find where one tensor ends is to derive its shape from the header.

use crate::config::Config;
use crate::error::{Gpt2Error, Result};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::info;

/// First header word of every supported checkpoint
pub const CHECKPOINT_MAGIC: i32 = 20240326;

/// Header format version this reader understands
pub const CHECKPOINT_VERSION: i32 = 1;

/// Header length in 32-bit words
pub const HEADER_WORDS: usize = 256;

/// Header length in bytes
pub const HEADER_BYTES: usize = HEADER_WORDS * 4;

const MAX_SEQ_LEN_INDEX: usize = 2;
const VOCAB_SIZE_INDEX: usize = 3;
const NUM_LAYERS_INDEX: usize = 4;
const NUM_HEADS_INDEX: usize = 5;
const CHANNELS_INDEX: usize = 6;

// Floats converted per read call while streaming parameters
const READ_CHUNK: usize = 1 << 16;

/// Decode and check a raw header
///
/// # Errors
///
/// [`Gpt2Error::Format`] on a wrong magic number, an unsupported version, or
/// a negative hyperparameter.
pub fn parse_header(header: &[i32; HEADER_WORDS]) -> Result<Config> {
    if header[0] != CHECKPOINT_MAGIC {
        return Err(Gpt2Error::Format(format!(
            "bad magic in model file: expected {CHECKPOINT_MAGIC}, found {}",
            header[0]
        )));
    }
    if header[1] != CHECKPOINT_VERSION {
        return Err(Gpt2Error::Format(format!(
            "bad version in model file: expected {CHECKPOINT_VERSION}, found {}",
            header[1]
        )));
    }

    let field = |index: usize, name: &str| -> Result<usize> {
        usize::try_from(header[index]).map_err(|_| {
            Gpt2Error::Format(format!("negative {name} in header: {}", header[index]))
        })
    };

    Ok(Config {
        max_seq_len: field(MAX_SEQ_LEN_INDEX, "max_seq_len")?,
        vocab_size: field(VOCAB_SIZE_INDEX, "vocab_size")?,
        num_layers: field(NUM_LAYERS_INDEX, "num_layers")?,
        num_heads: field(NUM_HEADS_INDEX, "num_heads")?,
        channels: field(CHANNELS_INDEX, "channels")?,
    })
}

/// An open checkpoint positioned just past its header
pub struct CheckpointReader {
    path: PathBuf,
    reader: BufReader<File>,
    config: Config,
}

impl CheckpointReader {
    /// Open a checkpoint and read its header
    ///
    /// The loaded hyperparameters are reported at `info` level.
    ///
    /// # Errors
    ///
    /// - [`Gpt2Error::Io`] if the file cannot be opened or read
    /// - [`Gpt2Error::Format`] if the header is short or fails [`parse_header`]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Gpt2Error::io(&path, e))?;
        let mut reader = BufReader::new(file);

        let mut bytes = [0u8; HEADER_BYTES];
        reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => Gpt2Error::Format(format!(
                "model file {} is shorter than its {HEADER_BYTES}-byte header",
                path.display()
            )),
            _ => Gpt2Error::io(&path, e),
        })?;

        let mut header = [0i32; HEADER_WORDS];
        for (word, chunk) in header.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let config = parse_header(&header)?;

        info!(
            max_seq_len = config.max_seq_len,
            vocab_size = config.vocab_size,
            num_layers = config.num_layers,
            num_heads = config.num_heads,
            channels = config.channels,
            "[GPT-2] loaded hyperparameters from {}",
            path.display()
        );

        Ok(Self {
            path,
            reader,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fill `dst` with the next `dst.len()` floats of the parameter stream
    ///
    /// Values are copied bit for bit. Consumes the reader; the file is closed
    /// when this returns.
    ///
    /// # Errors
    ///
    /// [`Gpt2Error::Format`] if the file ends before `dst` is full,
    /// [`Gpt2Error::Io`] for any other read failure.
    pub fn read_parameters(mut self, dst: &mut [f32]) -> Result<()> {
        let expected = dst.len();
        let mut bytes = vec![0u8; READ_CHUNK.min(expected) * 4];
        let mut filled = 0;

        for chunk in dst.chunks_mut(READ_CHUNK) {
            let buf = &mut bytes[..chunk.len() * 4];
            self.reader.read_exact(buf).map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => Gpt2Error::Format(format!(
                    "parameter stream in {} is truncated: expected {expected} floats, \
                     ran out before {}",
                    self.path.display(),
                    filled + chunk.len()
                )),
                _ => Gpt2Error::io(&self.path, e),
            })?;

            for (value, raw) in chunk.iter_mut().zip(buf.chunks_exact(4)) {
                *value = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            }
            filled += chunk.len();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{header_for, tiny_config, write_checkpoint, write_raw_checkpoint};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_open_reads_hyperparameters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        write_checkpoint(&path, &tiny_config(), &[]);

        let reader = CheckpointReader::open(&path).unwrap();
        assert_eq!(*reader.config(), tiny_config());
        assert_eq!(reader.path(), path.as_path());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = CheckpointReader::open(dir.path().join("absent.bin"))
            .err()
            .unwrap();
        assert!(err.is_io());
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut header = header_for(&tiny_config());
        header[0] = 20240327;
        let err = parse_header(&header).unwrap_err();
        assert!(err.is_format());
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_bad_version_is_format_error() {
        let mut header = header_for(&tiny_config());
        header[1] = 3;
        let err = parse_header(&header).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_negative_field_is_format_error() {
        let mut header = header_for(&tiny_config());
        header[4] = -2;
        assert!(parse_header(&header).unwrap_err().is_format());
    }

    #[test]
    fn test_reserved_words_are_ignored() {
        let mut header = header_for(&tiny_config());
        header[7] = 99;
        header[255] = -1;
        assert_eq!(parse_header(&header).unwrap(), tiny_config());
    }

    #[test]
    fn test_short_header_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(&CHECKPOINT_MAGIC.to_le_bytes()).unwrap();
        drop(file);

        let err = CheckpointReader::open(&path).err().unwrap();
        assert!(err.is_format());
    }

    #[test]
    fn test_read_parameters_copies_bits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let values = [1.5f32, -0.0, f32::MIN_POSITIVE, 3.25e7];
        write_raw_checkpoint(&path, &header_for(&tiny_config()), &values);

        let mut dst = [0.0f32; 4];
        CheckpointReader::open(&path)
            .unwrap()
            .read_parameters(&mut dst)
            .unwrap();
        for (a, b) in dst.iter().zip(&values) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_truncated_parameters_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        write_raw_checkpoint(&path, &header_for(&tiny_config()), &[1.0, 2.0, 3.0]);

        let mut dst = [0.0f32; 4];
        let err = CheckpointReader::open(&path)
            .unwrap()
            .read_parameters(&mut dst)
            .unwrap_err();
        assert!(err.is_format());
    }
}
