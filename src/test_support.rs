//! Fixture writers shared by the unit tests

use crate::checkpoint::{CHECKPOINT_MAGIC, CHECKPOINT_VERSION, HEADER_WORDS};
use crate::config::Config;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub fn tiny_config() -> Config {
    Config {
        max_seq_len: 8,
        vocab_size: 11,
        num_layers: 2,
        num_heads: 2,
        channels: 4,
    }
}

pub fn header_for(config: &Config) -> [i32; HEADER_WORDS] {
    let mut header = [0i32; HEADER_WORDS];
    header[0] = CHECKPOINT_MAGIC;
    header[1] = CHECKPOINT_VERSION;
    header[2] = config.max_seq_len as i32;
    header[3] = config.vocab_size as i32;
    header[4] = config.num_layers as i32;
    header[5] = config.num_heads as i32;
    header[6] = config.channels as i32;
    header
}

pub fn write_raw_checkpoint(path: &Path, header: &[i32; HEADER_WORDS], params: &[f32]) {
    let mut file = File::create(path).unwrap();
    for word in header {
        file.write_all(&word.to_le_bytes()).unwrap();
    }
    for value in params {
        file.write_all(&value.to_le_bytes()).unwrap();
    }
}

pub fn write_checkpoint(path: &Path, config: &Config, params: &[f32]) {
    write_raw_checkpoint(path, &header_for(config), params);
}

/// Parameters whose value is their own index, so every offset is checkable
pub fn indexed_params(count: usize) -> Vec<f32> {
    (0..count).map(|i| i as f32).collect()
}

pub fn write_tokens(path: &Path, tokens: &[u32]) {
    let mut file = File::create(path).unwrap();
    for token in tokens {
        file.write_all(&token.to_le_bytes()).unwrap();
    }
}
