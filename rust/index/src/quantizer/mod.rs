mod coarse;
mod product;

pub use coarse::CoarseQuantizer;
pub use product::{DistanceTable, ResidualProductQuantizer};

use docsim_error::{DocsimError, ErrorCodes};
use thiserror::Error;

use crate::kmeans::KMeansError;

#[derive(Error, Debug, PartialEq)]
pub enum QuantizerError {
    #[error("Insufficient training data: {samples} samples for {clusters} clusters")]
    InsufficientTrainingData { samples: usize, clusters: usize },
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Invalid quantizer parameters: {0}")]
    InvalidParameters(String),
    #[error("Invalid code: {0}")]
    InvalidCode(String),
    #[error("Training cancelled")]
    Cancelled,
}

impl DocsimError for QuantizerError {
    fn code(&self) -> ErrorCodes {
        match self {
            Self::InsufficientTrainingData { .. } => ErrorCodes::InvalidArgument,
            Self::DimensionMismatch { .. } => ErrorCodes::InvalidArgument,
            Self::InvalidParameters(_) => ErrorCodes::InvalidArgument,
            Self::InvalidCode(_) => ErrorCodes::InvalidArgument,
            Self::Cancelled => ErrorCodes::Cancelled,
        }
    }
}

impl From<KMeansError> for QuantizerError {
    fn from(value: KMeansError) -> Self {
        match value {
            KMeansError::InsufficientTrainingData { samples, clusters } => {
                QuantizerError::InsufficientTrainingData { samples, clusters }
            }
            KMeansError::InvalidInput(message) => QuantizerError::InvalidParameters(message),
            KMeansError::Cancelled(_) => QuantizerError::Cancelled,
        }
    }
}

// Copies equally sized vectors into one contiguous buffer.
pub(crate) fn flatten<V: AsRef<[f32]>>(
    vectors: &[V],
    dimension: usize,
) -> Result<Vec<f32>, QuantizerError> {
    let mut flat = Vec::with_capacity(vectors.len() * dimension);
    for vector in vectors {
        let vector = vector.as_ref();
        if vector.len() != dimension {
            return Err(QuantizerError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
        flat.extend_from_slice(vector);
    }
    Ok(flat)
}
