//! Product quantization of residual vectors.
//!
//! ## Layout
//!
//! A residual of dimension `d` is cut into `m` contiguous sub-vectors of
//! dimension `dsub = d / m`. Sub-vector `j` is quantized against its own
//! codebook of `ksub = 2^nbits` sub-centroids, trained with k-means on the
//! `j`-th sub-vectors of the training residuals.
//!
//! | Field | Shape | Description |
//! |-------|-------|-------------|
//! | `codebooks` | `m * ksub * dsub` | sub-centroid `c` of sub-space `j` starts at `(j * ksub + c) * dsub` |
//! | code | `m` bytes | byte `j` is the index of the nearest sub-centroid in sub-space `j` |
//!
//! ## Distance
//!
//! For a query residual `r_q` and a code `x`:
//!
//! ```text
//! ‖r_q - decode(x)‖² = Σ_j ‖r_q[j] - codebook_j[x_j]‖²
//! ```
//!
//! so the distance is computed per sub-space without reconstructing the vector.
//! [`DistanceTable`] precomputes all `m * ksub` terms of the sum for one query
//! residual, after which scoring a code costs `m` lookups.

use docsim_distance::squared_euclidean;
use tokio_util::sync::CancellationToken;

use super::{flatten, QuantizerError};
use crate::config::MAX_NBITS;
use crate::kmeans::{cluster, nearest_center, KMeansAlgorithmInput, KMeansParams};

#[derive(Clone, Debug, PartialEq)]
pub struct ResidualProductQuantizer {
    dimension: usize,
    m: usize,
    nbits: u8,
    codebooks: Vec<f32>,
}

/// Per-query table of squared distances from each query sub-vector to every
/// sub-centroid of the matching codebook.
#[derive(Clone, Debug)]
pub struct DistanceTable {
    ksub: usize,
    values: Vec<f32>,
}

impl DistanceTable {
    /// Sum of `m` table lookups. `code` must come from the quantizer that built
    /// this table.
    pub fn distance(&self, code: &[u8]) -> f32 {
        code.iter()
            .enumerate()
            .map(|(sub, c)| self.values[sub * self.ksub + *c as usize])
            .sum()
    }
}

fn validate(dimension: usize, m: usize, nbits: u8) -> Result<(), QuantizerError> {
    if dimension == 0 || m == 0 || dimension % m != 0 {
        return Err(QuantizerError::InvalidParameters(format!(
            "dimension {} must be a positive multiple of m {}",
            dimension, m
        )));
    }
    if nbits == 0 || nbits > MAX_NBITS {
        return Err(QuantizerError::InvalidParameters(format!(
            "nbits must be in 1..={}, got {}",
            MAX_NBITS, nbits
        )));
    }
    Ok(())
}

impl ResidualProductQuantizer {
    pub fn train<V: AsRef<[f32]>>(
        residuals: &[V],
        dimension: usize,
        m: usize,
        nbits: u8,
        params: &KMeansParams,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Self, QuantizerError> {
        validate(dimension, m, nbits)?;
        let ksub = 1usize << nbits;
        if residuals.len() < ksub {
            return Err(QuantizerError::InsufficientTrainingData {
                samples: residuals.len(),
                clusters: ksub,
            });
        }
        let data = flatten(residuals, dimension)?;
        let dsub = dimension / m;
        let mut codebooks = Vec::with_capacity(m * ksub * dsub);
        for sub in 0..m {
            let sub_vectors: Vec<f32> = data
                .chunks_exact(dimension)
                .flat_map(|residual| residual[sub * dsub..(sub + 1) * dsub].iter().copied())
                .collect();
            let sub_params = params
                .clone()
                .with_seed(params.seed.wrapping_add(sub as u64 + 1));
            let input = KMeansAlgorithmInput::new(&sub_vectors, dsub, ksub, &sub_params)
                .with_cancellation(cancellation);
            let output = cluster(&input)?;
            tracing::debug!(
                sub_space = sub,
                iterations = output.iterations,
                "Trained sub-codebook"
            );
            codebooks.extend(output.centroids);
        }
        tracing::info!(m, nbits, samples = residuals.len(), "Trained residual quantizer");
        Ok(ResidualProductQuantizer {
            dimension,
            m,
            nbits,
            codebooks,
        })
    }

    pub fn from_codebooks(
        dimension: usize,
        m: usize,
        nbits: u8,
        codebooks: Vec<f32>,
    ) -> Result<Self, QuantizerError> {
        validate(dimension, m, nbits)?;
        let expected = (1usize << nbits) * dimension;
        if codebooks.len() != expected {
            return Err(QuantizerError::InvalidParameters(format!(
                "expected {} codebook components, got {}",
                expected,
                codebooks.len()
            )));
        }
        Ok(ResidualProductQuantizer {
            dimension,
            m,
            nbits,
            codebooks,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn nbits(&self) -> u8 {
        self.nbits
    }

    pub fn ksub(&self) -> usize {
        1 << self.nbits
    }

    pub fn sub_dimension(&self) -> usize {
        self.dimension / self.m
    }

    /// Bytes per code.
    pub fn code_size(&self) -> usize {
        self.m
    }

    pub fn codebooks(&self) -> &[f32] {
        &self.codebooks
    }

    fn codebook(&self, sub: usize) -> &[f32] {
        let size = self.ksub() * self.sub_dimension();
        &self.codebooks[sub * size..(sub + 1) * size]
    }

    pub fn sub_centroid(&self, sub: usize, code: u8) -> &[f32] {
        let dsub = self.sub_dimension();
        let start = code as usize * dsub;
        &self.codebook(sub)[start..start + dsub]
    }

    fn check_residual(&self, residual: &[f32]) -> Result<(), QuantizerError> {
        if residual.len() != self.dimension {
            return Err(QuantizerError::DimensionMismatch {
                expected: self.dimension,
                actual: residual.len(),
            });
        }
        Ok(())
    }

    /// Checks that `code` could have been produced by this quantizer.
    pub fn check_code(&self, code: &[u8]) -> Result<(), QuantizerError> {
        if code.len() != self.m {
            return Err(QuantizerError::InvalidCode(format!(
                "expected {} bytes, got {}",
                self.m,
                code.len()
            )));
        }
        let ksub = self.ksub();
        if let Some(value) = code.iter().find(|c| **c as usize >= ksub) {
            return Err(QuantizerError::InvalidCode(format!(
                "sub-code {} out of range for {} bits",
                value, self.nbits
            )));
        }
        Ok(())
    }

    pub fn encode(&self, residual: &[f32]) -> Result<Vec<u8>, QuantizerError> {
        self.check_residual(residual)?;
        let dsub = self.sub_dimension();
        Ok(residual
            .chunks_exact(dsub)
            .enumerate()
            .map(|(sub, sub_vector)| nearest_center(sub_vector, self.codebook(sub), dsub).0 as u8)
            .collect())
    }

    /// Concatenation of the selected sub-centroids. Lossy: this is the
    /// approximation of the residual, not the residual itself.
    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>, QuantizerError> {
        self.check_code(code)?;
        Ok(code
            .iter()
            .enumerate()
            .flat_map(|(sub, c)| self.sub_centroid(sub, *c).iter().copied())
            .collect())
    }

    /// Equal to `squared_euclidean(query_residual, decode(code))` up to
    /// floating point rounding, without materializing the decoded vector.
    pub fn approximate_distance(
        &self,
        query_residual: &[f32],
        code: &[u8],
    ) -> Result<f32, QuantizerError> {
        self.check_residual(query_residual)?;
        self.check_code(code)?;
        let dsub = self.sub_dimension();
        Ok(query_residual
            .chunks_exact(dsub)
            .zip(code)
            .enumerate()
            .map(|(sub, (sub_vector, c))| squared_euclidean(sub_vector, self.sub_centroid(sub, *c)))
            .sum())
    }

    pub fn distance_table(&self, query_residual: &[f32]) -> Result<DistanceTable, QuantizerError> {
        self.check_residual(query_residual)?;
        let dsub = self.sub_dimension();
        let mut values = Vec::with_capacity(self.m * self.ksub());
        for (sub, sub_vector) in query_residual.chunks_exact(dsub).enumerate() {
            values.extend(
                self.codebook(sub)
                    .chunks_exact(dsub)
                    .map(|centroid| squared_euclidean(sub_vector, centroid)),
            );
        }
        Ok(DistanceTable {
            ksub: self.ksub(),
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_residuals(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    fn trained(dimension: usize, m: usize, nbits: u8) -> ResidualProductQuantizer {
        let residuals = random_residuals(512, dimension, 3);
        ResidualProductQuantizer::train(&residuals, dimension, m, nbits, &KMeansParams::default(), None)
            .expect("Failed to train")
    }

    #[test]
    fn test_codebook_shape() {
        let pq = trained(8, 4, 3);
        assert_eq!(pq.ksub(), 8);
        assert_eq!(pq.sub_dimension(), 2);
        assert_eq!(pq.codebooks().len(), 4 * 8 * 2);
        let code = pq.encode(&[0.1; 8]).unwrap();
        assert_eq!(code.len(), 4);
        assert!(code.iter().all(|c| *c < 8));
        assert_eq!(pq.decode(&code).unwrap().len(), 8);
    }

    #[test]
    fn test_exact_codebook_is_lossless() {
        // Sub-space 0 holds {(1, 0), (-1, 0)}, sub-space 1 holds {(0, 1), (0, -1)}.
        let residuals: Vec<Vec<f32>> = vec![
            vec![1.0, 0.0, 0.0, 1.0],
            vec![1.0, 0.0, 0.0, -1.0],
            vec![-1.0, 0.0, 0.0, 1.0],
            vec![-1.0, 0.0, 0.0, -1.0],
        ];
        let pq = ResidualProductQuantizer::train(&residuals, 4, 2, 1, &KMeansParams::default(), None)
            .unwrap();
        let mut codes = Vec::new();
        for residual in &residuals {
            let code = pq.encode(residual).unwrap();
            assert_eq!(&pq.decode(&code).unwrap(), residual);
            assert_eq!(pq.approximate_distance(residual, &code).unwrap(), 0.0);
            codes.push(code);
        }
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 4);
    }

    #[test]
    fn test_invalid_parameters() {
        let residuals = random_residuals(16, 6, 1);
        let params = KMeansParams::default();
        assert!(matches!(
            ResidualProductQuantizer::train(&residuals, 6, 4, 2, &params, None),
            Err(QuantizerError::InvalidParameters(_))
        ));
        assert!(matches!(
            ResidualProductQuantizer::train(&residuals, 6, 3, 0, &params, None),
            Err(QuantizerError::InvalidParameters(_))
        ));
        assert_eq!(
            ResidualProductQuantizer::train(&residuals, 6, 3, 5, &params, None).unwrap_err(),
            QuantizerError::InsufficientTrainingData {
                samples: 16,
                clusters: 32
            }
        );
    }

    #[test]
    fn test_rejects_foreign_codes() {
        let pq = trained(4, 2, 2);
        assert!(matches!(pq.decode(&[0, 1, 2]), Err(QuantizerError::InvalidCode(_))));
        assert!(matches!(pq.decode(&[0, 4]), Err(QuantizerError::InvalidCode(_))));
        assert!(matches!(
            pq.approximate_distance(&[0.0; 3], &[0, 0]),
            Err(QuantizerError::DimensionMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn test_approximate_distance_matches_decoded_distance(
            residual in proptest::collection::vec(-2.0f32..2.0, 8),
            query in proptest::collection::vec(-2.0f32..2.0, 8),
        ) {
            let pq = trained(8, 4, 4);
            let code = pq.encode(&residual).unwrap();
            let decoded = pq.decode(&code).unwrap();

            let own = pq.approximate_distance(&residual, &code).unwrap();
            let expected = squared_euclidean(&residual, &decoded);
            prop_assert!((own - expected).abs() <= 1e-5 * expected.max(1.0));

            let cross = pq.approximate_distance(&query, &code).unwrap();
            let expected = squared_euclidean(&query, &decoded);
            prop_assert!((cross - expected).abs() <= 1e-5 * expected.max(1.0));

            let table = pq.distance_table(&query).unwrap();
            prop_assert!((table.distance(&code) - cross).abs() <= 1e-5 * cross.max(1.0));
        }
    }
}
