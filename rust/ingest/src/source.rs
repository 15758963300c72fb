use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use docsim_error::{DocsimError, ErrorCodes};
use docsim_index::DocumentId;
use serde::Deserialize;
use thiserror::Error;

/// Cursor value that starts a scan and, when returned, ends it.
pub const SCAN_START: u64 = 0;

/// A document as stored in the source: its id and the undecoded payload.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDocument {
    pub doc_id: DocumentId,
    pub payload: Vec<u8>,
}

/// A stored record that could not be read as a document.
#[derive(Clone, Debug, PartialEq)]
pub struct MalformedRecord {
    pub line: u64,
    pub message: String,
}

/// One page of a cursor scan. A `cursor` of [`SCAN_START`] means the scan is
/// complete; `entries` of the final page are still valid. `malformed` lists
/// records of this page that were skipped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanPage {
    pub cursor: u64,
    pub entries: Vec<RawDocument>,
    pub malformed: Vec<MalformedRecord>,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read document source: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid cursor {0}")]
    InvalidCursor(u64),
    #[error("Document source unavailable: {0}")]
    Unavailable(String),
}

impl DocsimError for SourceError {
    fn code(&self) -> ErrorCodes {
        match self {
            SourceError::Io(_) => ErrorCodes::Unavailable,
            SourceError::InvalidCursor(_) => ErrorCodes::Internal,
            SourceError::Unavailable(_) => ErrorCodes::Unavailable,
        }
    }
}

/// A keyed document store scanned in pages with an opaque cursor.
///
/// `scan(SCAN_START, count)` returns the first page. Every later call passes
/// the cursor returned by the previous one. `count` is a hint; a page may hold
/// more or fewer entries, including none, without the scan being over. Only a
/// returned cursor of `SCAN_START` ends the scan.
pub trait DocumentSource {
    fn scan(&mut self, cursor: u64, count: usize) -> Result<ScanPage, SourceError>;
}

impl<S: DocumentSource + ?Sized> DocumentSource for Box<S> {
    fn scan(&mut self, cursor: u64, count: usize) -> Result<ScanPage, SourceError> {
        (**self).scan(cursor, count)
    }
}

/// Drives a [`DocumentSource`] to completion, yielding one page per item.
/// After the final page or the first error the stream is fused.
pub struct DocumentStream<S> {
    source: S,
    cursor: u64,
    page_size: usize,
    finished: bool,
}

impl<S: DocumentSource> DocumentStream<S> {
    pub fn new(source: S, page_size: usize) -> Self {
        DocumentStream {
            source,
            cursor: SCAN_START,
            page_size: page_size.max(1),
            finished: false,
        }
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

impl<S: DocumentSource> Iterator for DocumentStream<S> {
    type Item = Result<ScanPage, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.source.scan(self.cursor, self.page_size) {
            Ok(page) => {
                tracing::debug!(
                    cursor = self.cursor,
                    next_cursor = page.cursor,
                    entries = page.entries.len(),
                    malformed = page.malformed.len(),
                    "Scanned page"
                );
                self.cursor = page.cursor;
                self.finished = page.cursor == SCAN_START;
                Some(Ok(page))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

// Pages over an in-memory list. The cursor is the offset of the next entry,
// shifted by one so that offset 0 never collides with SCAN_START.
fn page_of(entries: &[RawDocument], cursor: u64, count: usize) -> Result<ScanPage, SourceError> {
    let start = match cursor {
        SCAN_START => 0,
        cursor => usize::try_from(cursor - 1).map_err(|_| SourceError::InvalidCursor(cursor))?,
    };
    if start > entries.len() {
        return Err(SourceError::InvalidCursor(cursor));
    }
    let end = start.saturating_add(count.max(1)).min(entries.len());
    let cursor = if end == entries.len() {
        SCAN_START
    } else {
        end as u64 + 1
    };
    Ok(ScanPage {
        cursor,
        entries: entries[start..end].to_vec(),
        malformed: Vec::new(),
    })
}

/// In-memory source.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    entries: Vec<RawDocument>,
}

impl MemorySource {
    pub fn new(entries: Vec<RawDocument>) -> Self {
        MemorySource { entries }
    }

    pub fn push(&mut self, doc_id: impl Into<DocumentId>, payload: impl Into<Vec<u8>>) {
        self.entries.push(RawDocument {
            doc_id: doc_id.into(),
            payload: payload.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DocumentSource for MemorySource {
    fn scan(&mut self, cursor: u64, count: usize) -> Result<ScanPage, SourceError> {
        page_of(&self.entries, cursor, count)
    }
}

#[derive(Deserialize)]
struct JsonLineRecord {
    id: String,
    payload: serde_json::Value,
}

/// Source over JSON lines of the form `{"id": "...", "payload": ...}`.
///
/// Lines are read lazily, `count` records per scan, so the file is never held
/// in memory. The cursor is the number of lines consumed so far and the scan
/// is forward-only: each call must pass the cursor returned by the previous
/// one.
///
/// A string `payload` is taken verbatim as the raw payload; any other JSON
/// value is re-encoded to its compact text. Blank lines are skipped. A line
/// that is not a valid record is reported in [`ScanPage::malformed`] and the
/// scan goes on.
pub struct JsonLinesSource<R> {
    reader: R,
    consumed: u64,
    exhausted: bool,
}

impl JsonLinesSource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = File::open(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Opened JSON lines source");
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn from_reader(reader: R) -> Self {
        JsonLinesSource {
            reader,
            consumed: 0,
            exhausted: false,
        }
    }

    fn parse(line: &[u8]) -> Result<(DocumentId, Vec<u8>), String> {
        let record: JsonLineRecord = serde_json::from_slice(line).map_err(|e| e.to_string())?;
        let payload = match record.payload {
            serde_json::Value::String(raw) => raw.into_bytes(),
            other => other.to_string().into_bytes(),
        };
        Ok((record.id.into(), payload))
    }
}

impl<R: BufRead> DocumentSource for JsonLinesSource<R> {
    fn scan(&mut self, cursor: u64, count: usize) -> Result<ScanPage, SourceError> {
        if self.exhausted || cursor != self.consumed {
            return Err(SourceError::InvalidCursor(cursor));
        }
        let mut page = ScanPage::default();
        let mut line = Vec::new();
        while page.entries.len() + page.malformed.len() < count.max(1) {
            line.clear();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            self.consumed += 1;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match Self::parse(&line) {
                Ok((doc_id, payload)) => page.entries.push(RawDocument { doc_id, payload }),
                Err(message) => page.malformed.push(MalformedRecord {
                    line: self.consumed,
                    message,
                }),
            }
        }
        if self.reader.fill_buf()?.is_empty() {
            self.exhausted = true;
            page.cursor = SCAN_START;
        } else {
            page.cursor = self.consumed;
        }
        Ok(page)
    }
}
