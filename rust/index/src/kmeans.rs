use docsim_distance::squared_euclidean;
use docsim_error::{DocsimError, ErrorCodes};
use rand::{rngs::StdRng, seq::index::sample, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// Samples handled by one rayon task during assignment. Partial sums are merged
// in chunk order, so the result is the same for any number of threads.
const ASSIGN_CHUNK_SIZE: usize = 256;

pub fn default_max_iterations() -> usize {
    25
}

pub fn default_convergence_threshold() -> f32 {
    1e-3
}

pub fn default_init_attempts() -> usize {
    10
}

pub fn default_seed() -> u64 {
    1234
}

/// Knobs for Lloyd's k-means.
/// - max_iterations: Hard cap on assign/update rounds.
/// - convergence_threshold: Stop once the fraction of samples that changed
///   cluster in a round is at or below this value.
/// - init_attempts: Number of random draws of initial centers. The draw with the
///   smallest total assignment distance seeds the main loop.
/// - seed: Seed for every random choice. Same seed, same data, same centers.
#[derive(Clone, Debug, PartialEq)]
pub struct KMeansParams {
    pub max_iterations: usize,
    pub convergence_threshold: f32,
    pub init_attempts: usize,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        KMeansParams {
            max_iterations: default_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
            init_attempts: default_init_attempts(),
            seed: default_seed(),
        }
    }
}

impl KMeansParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// The input for kmeans algorithm.
/// - data: The samples, flattened. The first sample is stored at
///   0..dimension, the second at dimension..2*dimension and so on.
/// - dimension: The dimension of the samples.
/// - k: The number of clusters.
/// - cancellation: Checked before every iteration.
pub struct KMeansAlgorithmInput<'referred_data> {
    data: &'referred_data [f32],
    dimension: usize,
    k: usize,
    params: &'referred_data KMeansParams,
    cancellation: Option<&'referred_data CancellationToken>,
}

impl<'referred_data> KMeansAlgorithmInput<'referred_data> {
    pub fn new(
        data: &'referred_data [f32],
        dimension: usize,
        k: usize,
        params: &'referred_data KMeansParams,
    ) -> Self {
        KMeansAlgorithmInput {
            data,
            dimension,
            k,
            params,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: Option<&'referred_data CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    fn num_samples(&self) -> usize {
        self.data.len() / self.dimension
    }

    fn sample(&self, idx: usize) -> &[f32] {
        &self.data[idx * self.dimension..(idx + 1) * self.dimension]
    }
}

/// The output from kmeans.
/// - centroids: k centers, flattened like the input data.
/// - labels: Index of the nearest center of every sample.
/// - distances: Squared distance of every sample to its nearest center.
/// - counts: Number of samples assigned to each center.
/// - iterations: Number of assign/update rounds that ran.
#[derive(Debug)]
pub struct KMeansAlgorithmOutput {
    pub centroids: Vec<f32>,
    pub labels: Vec<usize>,
    pub distances: Vec<f32>,
    pub counts: Vec<usize>,
    pub iterations: usize,
}

#[derive(Error, Debug, PartialEq)]
pub enum KMeansError {
    #[error("Insufficient training data: {samples} samples for {clusters} clusters")]
    InsufficientTrainingData { samples: usize, clusters: usize },
    #[error("Invalid clustering input: {0}")]
    InvalidInput(String),
    #[error("Clustering cancelled after {0} iterations")]
    Cancelled(usize),
}

impl DocsimError for KMeansError {
    fn code(&self) -> ErrorCodes {
        match self {
            Self::InsufficientTrainingData { .. } => ErrorCodes::InvalidArgument,
            Self::InvalidInput(_) => ErrorCodes::InvalidArgument,
            Self::Cancelled(_) => ErrorCodes::Cancelled,
        }
    }
}

// Per-worker accumulator for one assignment pass. Never shared between threads.
#[derive(Debug)]
struct KMeansAssignOutput {
    labels: Vec<usize>,
    distances: Vec<f32>,
    // Running sum of the samples assigned to each center, k * dimension.
    sums: Vec<f64>,
    counts: Vec<usize>,
    changed: usize,
    total_distance: f64,
}

impl KMeansAssignOutput {
    fn empty(k: usize, dimension: usize, capacity: usize) -> Self {
        KMeansAssignOutput {
            labels: Vec::with_capacity(capacity),
            distances: Vec::with_capacity(capacity),
            sums: vec![0.0; k * dimension],
            counts: vec![0; k],
            changed: 0,
            total_distance: 0.0,
        }
    }

    fn merge(&mut self, other: KMeansAssignOutput) {
        self.labels.extend(other.labels);
        self.distances.extend(other.distances);
        self.sums
            .iter_mut()
            .zip(other.sums)
            .for_each(|(acc, value)| *acc += value);
        self.counts
            .iter_mut()
            .zip(other.counts)
            .for_each(|(acc, value)| *acc += value);
        self.changed += other.changed;
        self.total_distance += other.total_distance;
    }
}

/// Nearest center of `point` and the squared distance to it. Ties go to the
/// lower center index.
pub fn nearest_center(point: &[f32], centers: &[f32], dimension: usize) -> (usize, f32) {
    let mut min_center = 0;
    let mut min_distance = f32::INFINITY;
    for (center_idx, center) in centers.chunks_exact(dimension).enumerate() {
        let distance = squared_euclidean(point, center);
        if distance < min_distance {
            min_distance = distance;
            min_center = center_idx;
        }
    }
    (min_center, min_distance)
}

// Assigns every sample to its nearest center. `previous_labels` is only used
// to count how many samples moved.
fn kmeansassign(
    input: &KMeansAlgorithmInput,
    centers: &[f32],
    previous_labels: &[usize],
) -> KMeansAssignOutput {
    let dimension = input.dimension;
    let k = input.k;
    let partials: Vec<KMeansAssignOutput> = input
        .data
        .par_chunks(ASSIGN_CHUNK_SIZE * dimension)
        .zip(previous_labels.par_chunks(ASSIGN_CHUNK_SIZE))
        .map(|(points, previous)| {
            let mut output = KMeansAssignOutput::empty(k, dimension, previous.len());
            for (point, previous_label) in points.chunks_exact(dimension).zip(previous) {
                let (label, distance) = nearest_center(point, centers, dimension);
                if label != *previous_label {
                    output.changed += 1;
                }
                output.counts[label] += 1;
                output.total_distance += distance as f64;
                output.sums[label * dimension..(label + 1) * dimension]
                    .iter_mut()
                    .zip(point)
                    .for_each(|(sum, value)| *sum += *value as f64);
                output.labels.push(label);
                output.distances.push(distance);
            }
            output
        })
        .collect();
    // Merge in chunk order.
    let mut merged = KMeansAssignOutput::empty(k, dimension, input.num_samples());
    for partial in partials {
        merged.merge(partial);
    }
    merged
}

// Draws `init_attempts` random sets of k distinct samples and keeps the set with
// the smallest total assignment distance.
fn init_centers(input: &KMeansAlgorithmInput, rng: &mut StdRng) -> Vec<f32> {
    let n = input.num_samples();
    let unassigned = vec![usize::MAX; n];
    let mut best_centers = Vec::new();
    let mut best_distance = f64::INFINITY;
    for _ in 0..input.params.init_attempts.max(1) {
        let mut centers = Vec::with_capacity(input.k * input.dimension);
        for sample_idx in sample(rng, n, input.k).into_iter() {
            centers.extend_from_slice(input.sample(sample_idx));
        }
        let assign = kmeansassign(input, &centers, &unassigned);
        if best_centers.is_empty() || assign.total_distance < best_distance {
            best_distance = assign.total_distance;
            best_centers = centers;
        }
    }
    best_centers
}

// Moves every non-empty center to the mean of its samples.
fn refine_centers(dimension: usize, assign: &KMeansAssignOutput, centers: &mut [f32]) {
    for (cluster_idx, count) in assign.counts.iter().enumerate() {
        if *count == 0 {
            continue;
        }
        let range = cluster_idx * dimension..(cluster_idx + 1) * dimension;
        centers[range.clone()]
            .iter_mut()
            .zip(&assign.sums[range])
            .for_each(|(center, sum)| *center = (*sum / *count as f64) as f32);
    }
}

// Every empty center is moved onto a sample, taking samples in decreasing order
// of their current assignment distance. Returns the number of reseeded centers.
fn reseed_empty_clusters(
    input: &KMeansAlgorithmInput,
    assign: &KMeansAssignOutput,
    centers: &mut [f32],
) -> usize {
    let empty: Vec<usize> = assign
        .counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(cluster_idx, _)| cluster_idx)
        .collect();
    if empty.is_empty() {
        return 0;
    }
    let mut farthest: Vec<usize> = (0..assign.distances.len()).collect();
    farthest.sort_by(|a, b| {
        assign.distances[*b]
            .total_cmp(&assign.distances[*a])
            .then(a.cmp(b))
    });
    let dimension = input.dimension;
    for (cluster_idx, sample_idx) in empty.iter().zip(farthest) {
        centers[cluster_idx * dimension..(cluster_idx + 1) * dimension]
            .copy_from_slice(input.sample(sample_idx));
    }
    empty.len()
}

pub fn cluster(input: &KMeansAlgorithmInput) -> Result<KMeansAlgorithmOutput, KMeansError> {
    if input.dimension == 0 || input.k == 0 {
        return Err(KMeansError::InvalidInput(format!(
            "dimension ({}) and k ({}) must be positive",
            input.dimension, input.k
        )));
    }
    if input.data.len() % input.dimension != 0 {
        return Err(KMeansError::InvalidInput(format!(
            "data length {} is not a multiple of dimension {}",
            input.data.len(),
            input.dimension
        )));
    }
    let n = input.num_samples();
    if n < input.k {
        return Err(KMeansError::InsufficientTrainingData {
            samples: n,
            clusters: input.k,
        });
    }

    let mut rng = StdRng::seed_from_u64(input.params.seed);
    let mut centers = init_centers(input, &mut rng);
    let mut labels = vec![usize::MAX; n];
    let mut iterations = 0;
    while iterations < input.params.max_iterations {
        if input.cancellation.is_some_and(|token| token.is_cancelled()) {
            return Err(KMeansError::Cancelled(iterations));
        }
        let assign = kmeansassign(input, &centers, &labels);
        iterations += 1;
        refine_centers(input.dimension, &assign, &mut centers);
        let reseeded = reseed_empty_clusters(input, &assign, &mut centers);
        let changed_fraction = assign.changed as f32 / n as f32;
        tracing::debug!(
            iteration = iterations,
            k = input.k,
            changed = assign.changed,
            reseeded,
            total_distance = assign.total_distance,
            "k-means iteration"
        );
        labels = assign.labels;
        if reseeded == 0 && changed_fraction <= input.params.convergence_threshold {
            break;
        }
    }

    // Assign all points to the final centers one last time.
    let finish = kmeansassign(input, &centers, &labels);
    Ok(KMeansAlgorithmOutput {
        centroids: centers,
        labels: finish.labels,
        distances: finish.distances,
        counts: finish.counts,
        iterations,
    })
}
