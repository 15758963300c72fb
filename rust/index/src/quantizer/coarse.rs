use docsim_distance::squared_euclidean;
use tokio_util::sync::CancellationToken;

use super::{flatten, QuantizerError};
use crate::kmeans::{cluster, nearest_center, KMeansAlgorithmInput, KMeansParams};

/// Partitions the vector space into `nlist` regions, each represented by the
/// mean of the training samples that fell into it. Centroid `i` is partition `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct CoarseQuantizer {
    dimension: usize,
    // nlist * dimension, flattened.
    centroids: Vec<f32>,
}

impl CoarseQuantizer {
    pub fn train<V: AsRef<[f32]>>(
        samples: &[V],
        dimension: usize,
        nlist: usize,
        params: &KMeansParams,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Self, QuantizerError> {
        if samples.len() < nlist {
            return Err(QuantizerError::InsufficientTrainingData {
                samples: samples.len(),
                clusters: nlist,
            });
        }
        let data = flatten(samples, dimension)?;
        let input = KMeansAlgorithmInput::new(&data, dimension, nlist, params)
            .with_cancellation(cancellation);
        let output = cluster(&input)?;
        tracing::info!(
            nlist,
            samples = samples.len(),
            iterations = output.iterations,
            "Trained coarse quantizer"
        );
        Ok(CoarseQuantizer {
            dimension,
            centroids: output.centroids,
        })
    }

    pub fn from_centroids(dimension: usize, centroids: Vec<f32>) -> Result<Self, QuantizerError> {
        if dimension == 0 || centroids.is_empty() || centroids.len() % dimension != 0 {
            return Err(QuantizerError::InvalidParameters(format!(
                "{} centroid components do not form vectors of dimension {}",
                centroids.len(),
                dimension
            )));
        }
        Ok(CoarseQuantizer {
            dimension,
            centroids,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn nlist(&self) -> usize {
        self.centroids.len() / self.dimension
    }

    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    pub fn centroid(&self, partition: usize) -> &[f32] {
        &self.centroids[partition * self.dimension..(partition + 1) * self.dimension]
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), QuantizerError> {
        if vector.len() != self.dimension {
            return Err(QuantizerError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Nearest centroid and the squared distance to it.
    pub fn assign(&self, vector: &[f32]) -> Result<(usize, f32), QuantizerError> {
        self.check_dimension(vector)?;
        Ok(nearest_center(vector, &self.centroids, self.dimension))
    }

    /// The `n` nearest centroids with their squared distances, nearest first.
    /// `n` is clamped to `nlist`; equal distances keep centroid order.
    pub fn nearest(&self, vector: &[f32], n: usize) -> Result<Vec<(usize, f32)>, QuantizerError> {
        self.check_dimension(vector)?;
        let mut scored: Vec<(usize, f32)> = self
            .centroids
            .chunks_exact(self.dimension)
            .map(|centroid| squared_euclidean(vector, centroid))
            .enumerate()
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(n.min(self.nlist()));
        Ok(scored)
    }

    pub fn assign_nearest_k(&self, vector: &[f32], nprobe: usize) -> Result<Vec<usize>, QuantizerError> {
        Ok(self
            .nearest(vector, nprobe)?
            .into_iter()
            .map(|(partition, _)| partition)
            .collect())
    }
}
