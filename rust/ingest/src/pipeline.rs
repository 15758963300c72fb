use docsim_index::DocumentId;
use serde::Serialize;

use crate::decoder::PayloadDecoder;
use crate::embedder::Embedder;
use crate::source::{DocumentSource, DocumentStream, SourceError};

/// Per-run counters. Every scanned record ends up in exactly one of
/// `embedded`, `malformed`, `missing_field` or `decode_failures`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub scanned: usize,
    pub embedded: usize,
    pub malformed: usize,
    pub missing_field: usize,
    pub decode_failures: usize,
}

impl IngestReport {
    pub fn skipped(&self) -> usize {
        self.malformed + self.missing_field + self.decode_failures
    }
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub documents: Vec<(DocumentId, Vec<f32>)>,
    pub report: IngestReport,
}

/// Scans the whole stream and embeds every document whose payload decodes.
///
/// Records the source could not read, and documents that cannot be decoded or
/// embedded, are logged and counted, and the scan continues. A failure of the
/// source itself aborts the run.
pub fn ingest<S: DocumentSource>(
    stream: DocumentStream<S>,
    decoder: &PayloadDecoder,
    embedder: &dyn Embedder,
) -> Result<IngestOutcome, SourceError> {
    let mut outcome = IngestOutcome::default();
    for page in stream {
        let page = page?;
        for record in page.malformed {
            tracing::warn!(line = record.line, error = %record.message, "Skipping malformed record");
            outcome.report.scanned += 1;
            outcome.report.malformed += 1;
        }
        for document in page.entries {
            outcome.report.scanned += 1;
            let text = match decoder.decode(&document.payload) {
                Ok(Some(text)) => text,
                Ok(None) => {
                    tracing::warn!(
                        doc_id = %document.doc_id,
                        field = %decoder.field(),
                        "Skipping document without field"
                    );
                    outcome.report.missing_field += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(doc_id = %document.doc_id, error = %e, "Skipping undecodable document");
                    outcome.report.decode_failures += 1;
                    continue;
                }
            };
            match embedder.embed(&text) {
                Ok(vector) => {
                    outcome.report.embedded += 1;
                    outcome.documents.push((document.doc_id, vector));
                }
                Err(e) => {
                    tracing::warn!(doc_id = %document.doc_id, error = %e, "Skipping unembeddable document");
                    outcome.report.decode_failures += 1;
                }
            }
        }
    }
    tracing::info!(
        scanned = outcome.report.scanned,
        embedded = outcome.report.embedded,
        malformed = outcome.report.malformed,
        missing_field = outcome.report.missing_field,
        decode_failures = outcome.report.decode_failures,
        "Ingestion finished"
    );
    Ok(outcome)
}
