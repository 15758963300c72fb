use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use docsim_index::{IvfPqIndex, IvfPqParams};
use docsim_ingest::{
    ingest, DocumentStream, Embedder, HashingEmbedder, JsonLinesSource, PayloadDecoder,
};
use flate2::write::ZlibEncoder;
use flate2::Compression;

fn encoded_payload(text: &str) -> String {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    let field = STANDARD.encode(encoder.finish().unwrap());
    serde_json::json!({ "_values": { "case_judgement": field } }).to_string()
}

fn document_text(i: usize) -> String {
    format!("judgement{} court{} appeal{} remedy", i, i % 7, i % 11)
}

#[test]
fn test_json_lines_to_searchable_index_despite_bad_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("documents.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    for i in 0..256 {
        let line = serde_json::json!({ "id": format!("case-{}", i), "payload": encoded_payload(&document_text(i)) });
        writeln!(file, "{}", line).unwrap();
        if i == 100 {
            // Cut off mid-record, as a partially copied export would be.
            writeln!(file, "{{\"id\": \"case-cut\", \"payload\": \"eJz").unwrap();
        }
    }
    writeln!(file, "{}", serde_json::json!({ "id": "no-text", "payload": "{\"_values\": {}}" })).unwrap();
    drop(file);

    let source = JsonLinesSource::open(&path).unwrap();
    let embedder = HashingEmbedder::new(8);
    let outcome = ingest(
        DocumentStream::new(source, 10),
        &PayloadDecoder::default(),
        &embedder,
    )
    .unwrap();
    assert_eq!(outcome.report.scanned, 258);
    assert_eq!(outcome.report.embedded, 256);
    assert_eq!(outcome.report.malformed, 1);
    assert_eq!(outcome.report.missing_field, 1);
    assert_eq!(outcome.report.skipped(), 2);

    // One byte per dimension and 256 training vectors: every stored code is
    // exact, so each document finds a vector at distance ~0.
    let vectors: Vec<&[f32]> = outcome.documents.iter().map(|(_, v)| v.as_slice()).collect();
    let mut index = IvfPqIndex::new(IvfPqParams::new(8, 4, 8, 8)).unwrap();
    index.train_index(&vectors, None).unwrap();
    index.add_batch(&outcome.documents).unwrap();
    assert_eq!(index.len(), 256);

    for i in [0, 17, 128, 255] {
        let query = embedder.embed(&document_text(i)).unwrap();
        let results = index.search(&query, 3, 4).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].distance < 1e-4, "distance {}", results[0].distance);
    }
}
