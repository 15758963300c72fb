use std::sync::atomic::{AtomicU64, Ordering};

use docsim_error::{DocsimError, ErrorCodes};
use parking_lot::{RwLock, RwLockReadGuard};
use thiserror::Error;

use crate::types::{DocumentId, EntryLocation};

/// Entries of one partition, stored column-wise. Entry `i` is
/// `(ids[i], sequences[i], codes[i * code_size..(i + 1) * code_size])`.
/// `sequences` records global insertion order and breaks distance ties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    pub ids: Vec<DocumentId>,
    pub sequences: Vec<u64>,
    pub codes: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PartitionEntry<'data> {
    pub doc_id: &'data DocumentId,
    pub sequence: u64,
    pub code: &'data [u8],
}

impl Partition {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn append(&mut self, doc_id: DocumentId, sequence: u64, code: &[u8]) -> usize {
        self.ids.push(doc_id);
        self.sequences.push(sequence);
        self.codes.extend_from_slice(code);
        self.ids.len() - 1
    }

    fn entry(&self, offset: usize, code_size: usize) -> Option<PartitionEntry<'_>> {
        let doc_id = self.ids.get(offset)?;
        Some(PartitionEntry {
            doc_id,
            sequence: self.sequences[offset],
            code: &self.codes[offset * code_size..(offset + 1) * code_size],
        })
    }
}

/// Read access to one partition. Holds the partition's read lock, so appends to
/// this partition wait until the reader is dropped; other partitions are unaffected.
pub struct PartitionReader<'lists> {
    guard: RwLockReadGuard<'lists, Partition>,
    code_size: usize,
}

impl PartitionReader<'_> {
    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    pub fn get(&self, offset: usize) -> Option<PartitionEntry<'_>> {
        self.guard.entry(offset, self.code_size)
    }

    /// Entries in insertion order. Can be called any number of times.
    pub fn iter(&self) -> impl Iterator<Item = PartitionEntry<'_>> + '_ {
        self.guard
            .ids
            .iter()
            .zip(self.guard.sequences.iter())
            .zip(self.guard.codes.chunks_exact(self.code_size))
            .map(|((doc_id, sequence), code)| PartitionEntry {
                doc_id,
                sequence: *sequence,
                code,
            })
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum InvertedListsError {
    #[error("Partition {partition} out of range for {nlist} partitions")]
    PartitionOutOfRange { partition: usize, nlist: usize },
    #[error("Code size mismatch: expected {expected}, got {actual}")]
    CodeSizeMismatch { expected: usize, actual: usize },
    #[error("Inconsistent partition: {0}")]
    Inconsistent(String),
}

impl DocsimError for InvertedListsError {
    fn code(&self) -> ErrorCodes {
        match self {
            Self::PartitionOutOfRange { .. } => ErrorCodes::OutOfRange,
            Self::CodeSizeMismatch { .. } => ErrorCodes::InvalidArgument,
            Self::Inconsistent(_) => ErrorCodes::DataLoss,
        }
    }
}

/// Append-only inverted lists, one per coarse centroid. Each partition has its
/// own lock: appends to one partition never contend with another.
pub struct InvertedLists {
    code_size: usize,
    partitions: Box<[RwLock<Partition>]>,
    next_sequence: AtomicU64,
}

impl std::fmt::Debug for InvertedLists {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvertedLists")
            .field("code_size", &self.code_size)
            .field("partition_sizes", &self.partition_sizes())
            .finish()
    }
}

impl InvertedLists {
    pub fn new(nlist: usize, code_size: usize) -> Self {
        InvertedLists {
            code_size,
            partitions: (0..nlist).map(|_| RwLock::new(Partition::default())).collect(),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Rebuilds lists from previously stored partitions.
    pub fn from_partitions(
        code_size: usize,
        partitions: Vec<Partition>,
    ) -> Result<Self, InvertedListsError> {
        let mut next_sequence = 0;
        for (idx, partition) in partitions.iter().enumerate() {
            if partition.sequences.len() != partition.ids.len()
                || partition.codes.len() != partition.ids.len() * code_size
            {
                return Err(InvertedListsError::Inconsistent(format!(
                    "partition {} has {} ids, {} sequences and {} code bytes",
                    idx,
                    partition.ids.len(),
                    partition.sequences.len(),
                    partition.codes.len()
                )));
            }
            if let Some(max) = partition.sequences.iter().max() {
                next_sequence = next_sequence.max(max + 1);
            }
        }
        Ok(InvertedLists {
            code_size,
            partitions: partitions.into_iter().map(RwLock::new).collect(),
            next_sequence: AtomicU64::new(next_sequence),
        })
    }

    pub fn nlist(&self) -> usize {
        self.partitions.len()
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    fn partition(&self, partition: usize) -> Result<&RwLock<Partition>, InvertedListsError> {
        self.partitions
            .get(partition)
            .ok_or(InvertedListsError::PartitionOutOfRange {
                partition,
                nlist: self.partitions.len(),
            })
    }

    /// Appends an entry. The entry becomes visible to readers as a whole.
    pub fn insert(
        &self,
        partition: usize,
        doc_id: DocumentId,
        code: &[u8],
    ) -> Result<EntryLocation, InvertedListsError> {
        if code.len() != self.code_size {
            return Err(InvertedListsError::CodeSizeMismatch {
                expected: self.code_size,
                actual: code.len(),
            });
        }
        let mut guard = self.partition(partition)?.write();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let offset = guard.append(doc_id, sequence, code);
        Ok(EntryLocation { partition, offset })
    }

    pub fn entries(&self, partition: usize) -> Result<PartitionReader<'_>, InvertedListsError> {
        Ok(PartitionReader {
            guard: self.partition(partition)?.read(),
            code_size: self.code_size,
        })
    }

    /// Copy of one partition's entries.
    pub fn snapshot(&self, partition: usize) -> Result<Partition, InvertedListsError> {
        Ok(self.partition(partition)?.read().clone())
    }

    pub fn partition_sizes(&self) -> Vec<usize> {
        self.partitions.iter().map(|p| p.read().len()).collect()
    }

    pub fn len(&self) -> usize {
        self.partition_sizes().iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `nlist * Σ size² / (Σ size)²`. 1.0 means perfectly balanced; an empty
    /// index also reports 1.0.
    pub fn imbalance_factor(&self) -> f64 {
        imbalance_factor(&self.partition_sizes())
    }
}

pub fn imbalance_factor(sizes: &[usize]) -> f64 {
    let total: usize = sizes.iter().sum();
    if total == 0 {
        return 1.0;
    }
    let sum_of_squares: f64 = sizes.iter().map(|size| (*size as f64).powi(2)).sum();
    sizes.len() as f64 * sum_of_squares / (total as f64).powi(2)
}
