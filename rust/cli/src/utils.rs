use std::io::Write;
use std::path::Path;

use clap::Parser;
use docsim_config::{ConfigError, DocsimConfig, RootConfig};
use docsim_error::{DocsimError, ErrorCodes};
use docsim_index::{DocumentId, IvfPqError, IvfPqIndex, Neighbor, PersistenceError};
use docsim_ingest::{
    ingest, DecodeError, DocumentStream, EmbedError, Embedder, HashingEmbedder, IngestReport,
    JsonLinesSource, SourceError,
};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Invalid ingest settings: {0}")]
    Decoder(#[from] DecodeError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Index(#[from] IvfPqError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("No document in {0} produced a vector")]
    NoDocuments(String),
    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocsimError for CliError {
    fn code(&self) -> ErrorCodes {
        match self {
            CliError::Config(e) => e.code(),
            CliError::Source(e) => e.code(),
            CliError::Decoder(e) => e.code(),
            CliError::Embed(e) => e.code(),
            CliError::Index(e) => e.code(),
            CliError::Persistence(e) => e.code(),
            CliError::NoDocuments(_) => ErrorCodes::FailedPrecondition,
            CliError::Output(_) => ErrorCodes::Internal,
            CliError::Json(_) => ErrorCodes::Internal,
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
pub struct ConfigArgs {
    #[arg(long = "config", help = "Path to a docsim YAML config file")]
    pub config_path: Option<String>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<RootConfig, CliError> {
        Ok(match &self.config_path {
            Some(path) => RootConfig::load_from_path(path)?,
            None => RootConfig::load()?,
        })
    }
}

/// Index shape overrides. Unset flags keep the config value.
#[derive(Parser, Debug, Default, Clone)]
pub struct IndexArgs {
    #[arg(long, help = "Number of partitions. Default: 4 * sqrt(documents)")]
    pub nlist: Option<usize>,
    #[arg(long, help = "Number of sub-vectors per code")]
    pub m: Option<usize>,
    #[arg(long, help = "Bits per sub-code, 1 to 8")]
    pub nbits: Option<u8>,
    #[arg(long, help = "Seed for training")]
    pub seed: Option<u64>,
    #[arg(long, help = "Embedding dimensionality")]
    pub dimension: Option<usize>,
}

impl IndexArgs {
    pub fn apply(&self, config: &mut DocsimConfig) {
        if let Some(nlist) = self.nlist {
            config.index.nlist = Some(nlist);
        }
        if let Some(m) = self.m {
            config.index.m = m;
        }
        if let Some(nbits) = self.nbits {
            config.index.nbits = nbits;
        }
        if let Some(seed) = self.seed {
            config.index.seed = seed;
        }
        if let Some(dimension) = self.dimension {
            config.index.dimensionality = dimension;
            config.ingest.embedding_dimension = None;
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
pub struct SearchOptions {
    #[arg(long, help = "Number of results per query")]
    pub k: Option<usize>,
    #[arg(long, help = "Number of partitions scanned per query")]
    pub nprobe: Option<usize>,
}

impl SearchOptions {
    pub fn apply(&self, config: &mut DocsimConfig) {
        if let Some(k) = self.k {
            config.index.k = k;
        }
        if let Some(nprobe) = self.nprobe {
            config.index.nprobe = nprobe;
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueryResults<'a> {
    pub query: &'a str,
    pub results: Vec<Neighbor>,
}

#[derive(Debug, Serialize)]
pub struct BuildSummary {
    pub documents: usize,
    pub skipped: usize,
    pub nlist: usize,
    pub imbalance_factor: f64,
    pub report: IngestReport,
}

/// Writes `value` as one line of JSON.
pub fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), CliError> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

// Deterministic subset used to train the quantizers.
fn training_sample<'a>(
    documents: &'a [(DocumentId, Vec<f32>)],
    size: Option<usize>,
    seed: u64,
) -> Vec<&'a [f32]> {
    match size {
        Some(size) if size < documents.len() => {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut picked = sample(&mut rng, documents.len(), size).into_vec();
            picked.sort_unstable();
            picked
                .into_iter()
                .map(|idx| documents[idx].1.as_slice())
                .collect()
        }
        _ => documents.iter().map(|(_, v)| v.as_slice()).collect(),
    }
}

/// Reads every document from the JSON lines file at `source`, then trains and
/// populates an index as configured.
pub fn build_index(
    config: &DocsimConfig,
    source: &Path,
) -> Result<(IvfPqIndex, BuildSummary), CliError> {
    let decoder = config.ingest.decoder()?;
    let embedder = HashingEmbedder::new(config.embedding_dimension());
    let stream = DocumentStream::new(JsonLinesSource::open(source)?, config.ingest.page_size);
    let outcome = ingest(stream, &decoder, &embedder)?;
    if outcome.documents.is_empty() {
        return Err(CliError::NoDocuments(source.display().to_string()));
    }

    let samples = training_sample(
        &outcome.documents,
        config.index.training_sample_size,
        config.index.seed,
    );
    // A derived nlist follows the vectors that actually train the index.
    let mut index = IvfPqIndex::new(config.index.params(samples.len()))?;
    index.train_index(&samples, None)?;
    index.add_batch(&outcome.documents)?;

    let summary = BuildSummary {
        documents: index.len(),
        skipped: outcome.report.skipped(),
        nlist: index.params().nlist,
        imbalance_factor: index.imbalance_factor()?,
        report: outcome.report,
    };
    tracing::info!(
        documents = summary.documents,
        nlist = summary.nlist,
        imbalance_factor = summary.imbalance_factor,
        "Built index"
    );
    Ok((index, summary))
}

/// Embeds each query with the index's dimensionality and writes one JSON line
/// of ranked results per query.
pub fn search_queries<W: Write>(
    out: &mut W,
    index: &IvfPqIndex,
    queries: &[String],
    k: usize,
    nprobe: usize,
) -> Result<(), CliError> {
    let embedder = HashingEmbedder::new(index.dimensionality());
    for query in queries {
        let vector = embedder.embed(query)?;
        let results = index.search(&vector, k, nprobe)?;
        tracing::debug!(query = %query, results = results.len(), "Answered query");
        write_json_line(out, &QueryResults { query, results })?;
    }
    Ok(())
}
