pub mod config;
pub mod exact;
pub mod inverted;
mod ivfpq;
pub mod kmeans;
mod persistence;
pub mod quantizer;
mod types;

pub use config::IvfPqParams;
pub use exact::{exact_search, recall_at_k};
pub use inverted::{imbalance_factor, InvertedLists, InvertedListsError, Partition, PartitionEntry};
pub use ivfpq::{AddBatchOutcome, IvfPqError, IvfPqIndex};
pub use kmeans::KMeansParams;
pub use persistence::PersistenceError;
pub use quantizer::{CoarseQuantizer, DistanceTable, QuantizerError, ResidualProductQuantizer};
pub use types::*;
