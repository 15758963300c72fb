pub mod decoder;
pub mod embedder;
pub mod pipeline;
pub mod source;

pub use decoder::{default_field, DecodeError, FieldPath, PayloadDecoder, TextEncoding};
pub use embedder::{EmbedError, Embedder, HashingEmbedder};
pub use pipeline::{ingest, IngestOutcome, IngestReport};
pub use source::{
    DocumentSource, DocumentStream, JsonLinesSource, MalformedRecord, MemorySource, RawDocument,
    ScanPage, SourceError, SCAN_START,
};
