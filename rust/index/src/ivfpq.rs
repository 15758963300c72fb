use std::cmp::Ordering;
use std::collections::BinaryHeap;

use docsim_distance::{add, subtract};
use docsim_error::{DocsimError, ErrorCodes};
use rayon::prelude::*;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::IvfPqParams;
use crate::inverted::{InvertedLists, InvertedListsError};
use crate::quantizer::{CoarseQuantizer, QuantizerError, ResidualProductQuantizer};
use crate::types::{DocumentId, EntryLocation, IndexState, Neighbor};

#[derive(Error, Debug, PartialEq)]
pub enum IvfPqError {
    #[error("Insufficient training data: {samples} samples for {clusters} clusters")]
    InsufficientTrainingData { samples: usize, clusters: usize },
    #[error("Index is not trained")]
    NotTrained,
    #[error("Index is already trained; build a new index to retrain")]
    AlreadyTrained,
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Invalid index parameters: {0}")]
    InvalidParameters(String),
    #[error("Training cancelled")]
    Cancelled,
    #[error("Corrupt index data: {0}")]
    CorruptData(String),
    #[error("Inverted lists error: {0}")]
    InvertedLists(#[from] InvertedListsError),
}

impl DocsimError for IvfPqError {
    fn code(&self) -> ErrorCodes {
        match self {
            IvfPqError::InsufficientTrainingData { .. } => ErrorCodes::InvalidArgument,
            IvfPqError::NotTrained => ErrorCodes::FailedPrecondition,
            IvfPqError::AlreadyTrained => ErrorCodes::FailedPrecondition,
            IvfPqError::DimensionMismatch { .. } => ErrorCodes::InvalidArgument,
            IvfPqError::InvalidParameters(_) => ErrorCodes::InvalidArgument,
            IvfPqError::Cancelled => ErrorCodes::Cancelled,
            IvfPqError::CorruptData(_) => ErrorCodes::DataLoss,
            IvfPqError::InvertedLists(e) => e.code(),
        }
    }
}

impl From<QuantizerError> for IvfPqError {
    fn from(value: QuantizerError) -> Self {
        match value {
            QuantizerError::InsufficientTrainingData { samples, clusters } => {
                IvfPqError::InsufficientTrainingData { samples, clusters }
            }
            QuantizerError::DimensionMismatch { expected, actual } => {
                IvfPqError::DimensionMismatch { expected, actual }
            }
            QuantizerError::InvalidParameters(message) => IvfPqError::InvalidParameters(message),
            QuantizerError::InvalidCode(message) => IvfPqError::CorruptData(message),
            QuantizerError::Cancelled => IvfPqError::Cancelled,
        }
    }
}

/// Everything that exists only once training has completed.
#[derive(Debug)]
pub(crate) struct TrainedIndex {
    pub(crate) coarse: CoarseQuantizer,
    pub(crate) pq: ResidualProductQuantizer,
    pub(crate) lists: InvertedLists,
}

/// Result of [`IvfPqIndex::add_batch`]. Vectors rejected individually are
/// reported here; the rest of the batch is still added.
#[derive(Debug, Default)]
pub struct AddBatchOutcome {
    pub added: usize,
    pub rejected: Vec<(DocumentId, IvfPqError)>,
}

/// Inverted file index with residual product quantization (IVF-PQ).
///
/// Lifecycle: [`IvfPqIndex::new`] creates an untrained index,
/// [`IvfPqIndex::train_index`] fixes the centroids and codebooks exactly once,
/// after which [`IvfPqIndex::add`] appends entries and
/// [`IvfPqIndex::search`] answers queries. `add` and `search` take `&self` and
/// may run concurrently from many threads.
///
/// Search results are approximate. Vectors are stored as lossy codes, so the
/// reported distance of a vector to itself is usually not 0, and the true
/// nearest neighbor can be missed when it lives in a partition that was not
/// probed or when quantization error reorders close candidates. Raising
/// `nprobe` trades speed for recall.
#[derive(Debug)]
pub struct IvfPqIndex {
    params: IvfPqParams,
    trained: Option<TrainedIndex>,
}

// Ordered by (distance, sequence) so that the max-heap evicts the worst
// candidate and ties keep the earlier insertion.
#[derive(Debug)]
struct Candidate {
    distance: f32,
    sequence: u64,
    doc_id: DocumentId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl IvfPqIndex {
    pub fn new(params: IvfPqParams) -> Result<Self, IvfPqError> {
        params.validate().map_err(IvfPqError::InvalidParameters)?;
        Ok(IvfPqIndex {
            params,
            trained: None,
        })
    }

    pub(crate) fn from_trained(params: IvfPqParams, trained: TrainedIndex) -> Self {
        IvfPqIndex {
            params,
            trained: Some(trained),
        }
    }

    pub fn params(&self) -> &IvfPqParams {
        &self.params
    }

    pub fn dimensionality(&self) -> usize {
        self.params.dimension
    }

    pub fn state(&self) -> IndexState {
        match self.trained {
            Some(_) => IndexState::Trained,
            None => IndexState::Untrained,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    pub(crate) fn trained(&self) -> Result<&TrainedIndex, IvfPqError> {
        self.trained.as_ref().ok_or(IvfPqError::NotTrained)
    }

    pub fn coarse_quantizer(&self) -> Result<&CoarseQuantizer, IvfPqError> {
        Ok(&self.trained()?.coarse)
    }

    pub fn residual_quantizer(&self) -> Result<&ResidualProductQuantizer, IvfPqError> {
        Ok(&self.trained()?.pq)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IvfPqError> {
        if vector.len() != self.params.dimension {
            return Err(IvfPqError::DimensionMismatch {
                expected: self.params.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Trains the coarse quantizer on `samples`, then the residual quantizer on
    /// the residuals of the same samples against their assigned centroids.
    ///
    /// On any error, including cancellation, the index stays untrained.
    pub fn train_index<V: AsRef<[f32]> + Sync>(
        &mut self,
        samples: &[V],
        cancellation: Option<&CancellationToken>,
    ) -> Result<(), IvfPqError> {
        if self.trained.is_some() {
            return Err(IvfPqError::AlreadyTrained);
        }
        for sample in samples {
            self.check_dimension(sample.as_ref())?;
        }
        let params = &self.params;
        let coarse = CoarseQuantizer::train(
            samples,
            params.dimension,
            params.nlist,
            &params.kmeans,
            cancellation,
        )?;
        let residuals = samples
            .par_iter()
            .map(|sample| {
                let sample = sample.as_ref();
                let (partition, _) = coarse.assign(sample)?;
                Ok(subtract(sample, coarse.centroid(partition)))
            })
            .collect::<Result<Vec<Vec<f32>>, QuantizerError>>()?;
        let pq = ResidualProductQuantizer::train(
            &residuals,
            params.dimension,
            params.m,
            params.nbits,
            &params.kmeans,
            cancellation,
        )?;
        if cancellation.is_some_and(|token| token.is_cancelled()) {
            return Err(IvfPqError::Cancelled);
        }
        let lists = InvertedLists::new(coarse.nlist(), pq.code_size());
        tracing::info!(
            dimension = params.dimension,
            nlist = params.nlist,
            m = params.m,
            nbits = params.nbits,
            samples = samples.len(),
            "Trained IVF-PQ index"
        );
        self.trained = Some(TrainedIndex { coarse, pq, lists });
        Ok(())
    }

    // Routes and compresses a vector without touching the inverted lists.
    fn encode(trained: &TrainedIndex, vector: &[f32]) -> Result<(usize, Vec<u8>), IvfPqError> {
        let (partition, _) = trained.coarse.assign(vector)?;
        let residual = subtract(vector, trained.coarse.centroid(partition));
        let code = trained.pq.encode(&residual)?;
        Ok((partition, code))
    }

    pub fn add(&self, doc_id: DocumentId, vector: &[f32]) -> Result<EntryLocation, IvfPqError> {
        let trained = self.trained()?;
        self.check_dimension(vector)?;
        let (partition, code) = Self::encode(trained, vector)?;
        Ok(trained.lists.insert(partition, doc_id, &code)?)
    }

    /// Adds many vectors. Routing and encoding run in parallel; entries are
    /// appended in input order, so the resulting index does not depend on
    /// thread scheduling. A vector with the wrong dimension is rejected on its
    /// own without aborting the batch.
    pub fn add_batch<V: AsRef<[f32]> + Sync>(
        &self,
        items: &[(DocumentId, V)],
    ) -> Result<AddBatchOutcome, IvfPqError> {
        let trained = self.trained()?;
        let encoded: Vec<Result<(usize, Vec<u8>), IvfPqError>> = items
            .par_iter()
            .map(|(_, vector)| {
                let vector = vector.as_ref();
                self.check_dimension(vector)?;
                Self::encode(trained, vector)
            })
            .collect();
        let mut outcome = AddBatchOutcome::default();
        for ((doc_id, _), result) in items.iter().zip(encoded) {
            match result {
                Ok((partition, code)) => {
                    trained.lists.insert(partition, doc_id.clone(), &code)?;
                    outcome.added += 1;
                }
                Err(e) => {
                    tracing::warn!(doc_id = %doc_id, error = %e, "Rejected vector");
                    outcome.rejected.push((doc_id.clone(), e));
                }
            }
        }
        tracing::info!(
            added = outcome.added,
            rejected = outcome.rejected.len(),
            imbalance_factor = trained.lists.imbalance_factor(),
            "Added batch"
        );
        Ok(outcome)
    }

    /// Up to `k` approximate nearest neighbors of `query`, nearest first.
    ///
    /// The `nprobe` partitions whose centroids are nearest to the query are
    /// scanned; `nprobe` is clamped to `1..=nlist`. Equal distances are ordered
    /// by insertion.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> Result<Vec<Neighbor>, IvfPqError> {
        let trained = self.trained()?;
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let nprobe = nprobe.clamp(1, trained.coarse.nlist());
        // `k` is caller supplied and may exceed the index size by any amount.
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k.min(self.len()));
        for partition in trained.coarse.assign_nearest_k(query, nprobe)? {
            let residual = subtract(query, trained.coarse.centroid(partition));
            let table = trained.pq.distance_table(&residual)?;
            let reader = trained.lists.entries(partition)?;
            for entry in reader.iter() {
                let distance = table.distance(entry.code);
                if heap.len() == k {
                    if let Some(worst) = heap.peek() {
                        if distance.is_nan()
                            || (distance, entry.sequence) >= (worst.distance, worst.sequence)
                        {
                            continue;
                        }
                    }
                    heap.pop();
                }
                heap.push(Candidate {
                    distance,
                    sequence: entry.sequence,
                    doc_id: entry.doc_id.clone(),
                });
            }
        }
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|candidate| Neighbor {
                doc_id: candidate.doc_id,
                distance: candidate.distance,
            })
            .collect())
    }

    /// Approximate vector stored at `location`: its centroid plus the decoded
    /// residual.
    pub fn reconstruct(&self, location: EntryLocation) -> Result<Vec<f32>, IvfPqError> {
        let trained = self.trained()?;
        let reader = trained.lists.entries(location.partition)?;
        let entry = reader
            .get(location.offset)
            .ok_or(InvertedListsError::PartitionOutOfRange {
                partition: location.partition,
                nlist: trained.lists.nlist(),
            })?;
        let residual = trained.pq.decode(entry.code)?;
        Ok(add(trained.coarse.centroid(location.partition), &residual))
    }

    /// Number of indexed vectors. 0 when untrained.
    pub fn len(&self) -> usize {
        self.trained
            .as_ref()
            .map(|trained| trained.lists.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partition_sizes(&self) -> Result<Vec<usize>, IvfPqError> {
        Ok(self.trained()?.lists.partition_sizes())
    }

    pub fn imbalance_factor(&self) -> Result<f64, IvfPqError> {
        Ok(self.trained()?.lists.imbalance_factor())
    }
}
