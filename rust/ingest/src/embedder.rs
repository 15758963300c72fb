use std::io::Cursor;

use docsim_error::{DocsimError, ErrorCodes};
use murmur3::murmur3_x64_128;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Failed to hash token: {0}")]
    Hash(#[from] std::io::Error),
}

impl DocsimError for EmbedError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Internal
    }
}

/// Maps document text to a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn dimensionality(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Signed feature hashing over lower-cased alphanumeric tokens.
///
/// Each token adds ±1 to one of `dimension` buckets, both picked from the
/// token's murmur3 hash. The result is L2-normalized; text without tokens maps
/// to the zero vector. Texts sharing vocabulary land close together under
/// squared Euclidean distance.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dimension: usize,
    seed: u32,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        HashingEmbedder { dimension, seed: 0 }
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }
}

pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

impl Embedder for HashingEmbedder {
    fn dimensionality(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return Ok(vector);
        }
        for token in tokenize(text) {
            let hash = murmur3_x64_128(&mut Cursor::new(token.as_bytes()), self.seed)?;
            let bucket = (hash as u64 % self.dimension as u64) as usize;
            let sign = if (hash >> 64) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        Ok(docsim_distance::normalize(&vector))
    }
}
