//! Self-contained binary image of a trained index.
//!
//! | Field            | Encoding                                         |
//! |------------------|--------------------------------------------------|
//! | magic            | `DSIX`                                           |
//! | version          | u32                                              |
//! | d, nlist, m      | u32 each                                         |
//! | nbits            | u32                                              |
//! | centroids        | nlist * d f32                                    |
//! | codebooks        | m * 2^nbits * (d / m) f32                        |
//! | partition count  | u32, equal to nlist                              |
//! | per partition    | u32 length, then per entry:                      |
//! |                  | u32 id length, id bytes (UTF-8), u64 sequence,   |
//! |                  | m code bytes                                     |
//!
//! All integers and floats are little-endian. The k-means knobs used for
//! training are not stored; a loaded index carries the defaults.

use std::path::Path;

use bytes::{Buf, BufMut};
use docsim_error::{DocsimError, ErrorCodes};
use thiserror::Error;

use crate::config::IvfPqParams;
use crate::inverted::{InvertedLists, Partition};
use crate::ivfpq::{IvfPqError, IvfPqIndex, TrainedIndex};
use crate::quantizer::{CoarseQuantizer, ResidualProductQuantizer};
use crate::types::DocumentId;

const MAGIC: &[u8; 4] = b"DSIX";
const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to access index file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Index(#[from] IvfPqError),
}

impl DocsimError for PersistenceError {
    fn code(&self) -> ErrorCodes {
        match self {
            PersistenceError::Io(e) => e.code(),
            PersistenceError::Index(e) => e.code(),
        }
    }
}

fn corrupt(message: impl Into<String>) -> IvfPqError {
    IvfPqError::CorruptData(message.into())
}

// Bounds-checked reads over the serialized image. `Buf` getters panic on
// short input, so every read checks `remaining` first.
struct Reader<'data> {
    buf: &'data [u8],
}

impl<'data> Reader<'data> {
    fn ensure(&self, len: usize, what: &str) -> Result<(), IvfPqError> {
        if self.buf.remaining() < len {
            return Err(corrupt(format!(
                "truncated while reading {}: need {} bytes, {} left",
                what,
                len,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u32(&mut self, what: &str) -> Result<u32, IvfPqError> {
        self.ensure(4, what)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self, what: &str) -> Result<u64, IvfPqError> {
        self.ensure(8, what)?;
        Ok(self.buf.get_u64_le())
    }

    fn bytes(&mut self, len: usize, what: &str) -> Result<&'data [u8], IvfPqError> {
        self.ensure(len, what)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn f32s(&mut self, count: usize, what: &str) -> Result<Vec<f32>, IvfPqError> {
        let len = count
            .checked_mul(4)
            .ok_or_else(|| corrupt(format!("{} length overflows", what)))?;
        self.ensure(len, what)?;
        Ok((0..count).map(|_| self.buf.get_f32_le()).collect())
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32, IvfPqError> {
    u32::try_from(value)
        .map_err(|_| IvfPqError::InvalidParameters(format!("{} {} does not fit in u32", what, value)))
}

impl IvfPqIndex {
    /// Encodes the trained index, entries included, into a byte image that
    /// [`IvfPqIndex::deserialize`] restores exactly.
    pub fn serialize(&self) -> Result<Vec<u8>, IvfPqError> {
        let trained = self.trained()?;
        let params = self.params();
        let mut out = Vec::new();
        out.put_slice(MAGIC);
        out.put_u32_le(FORMAT_VERSION);
        out.put_u32_le(to_u32(params.dimension, "dimension")?);
        out.put_u32_le(to_u32(params.nlist, "nlist")?);
        out.put_u32_le(to_u32(params.m, "m")?);
        out.put_u32_le(params.nbits as u32);
        for value in trained.coarse.centroids() {
            out.put_f32_le(*value);
        }
        for value in trained.pq.codebooks() {
            out.put_f32_le(*value);
        }
        out.put_u32_le(to_u32(trained.lists.nlist(), "partition count")?);
        for partition in 0..trained.lists.nlist() {
            let reader = trained.lists.entries(partition)?;
            out.put_u32_le(to_u32(reader.len(), "partition length")?);
            for entry in reader.iter() {
                let id = entry.doc_id.as_str().as_bytes();
                out.put_u32_le(to_u32(id.len(), "document id length")?);
                out.put_slice(id);
                out.put_u64_le(entry.sequence);
                out.put_slice(entry.code);
            }
        }
        tracing::debug!(bytes = out.len(), "Serialized index");
        Ok(out)
    }

    /// Restores an index written by [`IvfPqIndex::serialize`]. Any malformed,
    /// truncated or inconsistent input is reported as `CorruptData`.
    pub fn deserialize(data: &[u8]) -> Result<Self, IvfPqError> {
        let mut reader = Reader { buf: data };
        if reader.bytes(MAGIC.len(), "magic")? != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = reader.u32("version")?;
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", version)));
        }
        let dimension = reader.u32("dimension")? as usize;
        let nlist = reader.u32("nlist")? as usize;
        let m = reader.u32("m")? as usize;
        let nbits = u8::try_from(reader.u32("nbits")?).map_err(|_| corrupt("nbits out of range"))?;
        let params = IvfPqParams::new(dimension, nlist, m, nbits);
        params.validate().map_err(corrupt)?;

        let centroid_count = nlist
            .checked_mul(dimension)
            .ok_or_else(|| corrupt("centroid size overflows"))?;
        let centroids = reader.f32s(centroid_count, "centroids")?;
        let codebook_count = params
            .ksub()
            .checked_mul(dimension)
            .ok_or_else(|| corrupt("codebook size overflows"))?;
        let codebooks = reader.f32s(codebook_count, "codebooks")?;
        let coarse =
            CoarseQuantizer::from_centroids(dimension, centroids).map_err(|e| corrupt(e.to_string()))?;
        let pq = ResidualProductQuantizer::from_codebooks(dimension, m, nbits, codebooks)
            .map_err(|e| corrupt(e.to_string()))?;

        let partition_count = reader.u32("partition count")? as usize;
        if partition_count != nlist {
            return Err(corrupt(format!(
                "{} partitions stored for nlist {}",
                partition_count, nlist
            )));
        }
        let mut partitions = Vec::with_capacity(nlist);
        for _ in 0..partition_count {
            let len = reader.u32("partition length")? as usize;
            let mut partition = Partition::default();
            for _ in 0..len {
                let id_len = reader.u32("document id length")? as usize;
                let id = std::str::from_utf8(reader.bytes(id_len, "document id")?)
                    .map_err(|e| corrupt(format!("document id is not UTF-8: {}", e)))?;
                partition.ids.push(DocumentId::from(id));
                partition.sequences.push(reader.u64("sequence")?);
                let code = reader.bytes(m, "code")?;
                pq.check_code(code).map_err(|e| corrupt(e.to_string()))?;
                partition.codes.extend_from_slice(code);
            }
            partitions.push(partition);
        }
        if reader.buf.has_remaining() {
            return Err(corrupt(format!(
                "{} trailing bytes",
                reader.buf.remaining()
            )));
        }
        let lists = InvertedLists::from_partitions(pq.code_size(), partitions)
            .map_err(|e| corrupt(e.to_string()))?;
        tracing::debug!(nlist, entries = lists.len(), "Deserialized index");
        Ok(IvfPqIndex::from_trained(
            params,
            TrainedIndex { coarse, pq, lists },
        ))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let bytes = self.serialize()?;
        std::fs::write(path.as_ref(), bytes)?;
        tracing::info!(path = %path.as_ref().display(), entries = self.len(), "Saved index");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let bytes = std::fs::read(path.as_ref())?;
        let index = IvfPqIndex::deserialize(&bytes)?;
        tracing::info!(path = %path.as_ref().display(), entries = index.len(), "Loaded index");
        Ok(index)
    }
}
