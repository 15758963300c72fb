use std::io::{BufReader, Read};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use docsim_error::{DocsimError, ErrorCodes};
use flate2::bufread::ZlibDecoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const INFLATE_CHUNK_SIZE: usize = 1024;

pub fn default_field() -> String {
    "_values.case_judgement".to_string()
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Field `{0}` is not a string")]
    FieldNotString(String),
    #[error("Field is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Failed to inflate field: {0}")]
    Decompression(std::io::Error),
    #[error("Decoded text is not valid {encoding}: {message}")]
    Encoding {
        encoding: TextEncoding,
        message: String,
    },
    #[error("Invalid field path `{0}`")]
    InvalidFieldPath(String),
}

impl DocsimError for DecodeError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// Dotted path to a value inside a JSON object, e.g. `_values.case_judgement`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    fn lookup<'v>(&self, root: &'v serde_json::Value) -> Option<&'v serde_json::Value> {
        self.segments
            .iter()
            .try_fold(root, |value, segment| value.as_object()?.get(segment))
    }
}

impl FromStr for FieldPath {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(DecodeError::InvalidFieldPath(s.to_string()));
        }
        Ok(FieldPath { segments })
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Character set of the inflated text.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "ascii")]
    Ascii,
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextEncoding::Ascii => f.write_str("ascii"),
            TextEncoding::Utf8 => f.write_str("utf-8"),
        }
    }
}

impl TextEncoding {
    pub fn to_utf8(self, bytes: Vec<u8>) -> Result<String, DecodeError> {
        match self {
            TextEncoding::Ascii => {
                if let Some(position) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(DecodeError::Encoding {
                        encoding: self,
                        message: format!(
                            "byte 0x{:02x} at offset {} is outside ASCII",
                            bytes[position], position
                        ),
                    });
                }
                // ASCII is a subset of UTF-8.
                String::from_utf8(bytes).map_err(|e| DecodeError::Encoding {
                    encoding: self,
                    message: e.to_string(),
                })
            }
            TextEncoding::Utf8 => String::from_utf8(bytes).map_err(|e| DecodeError::Encoding {
                encoding: self,
                message: e.to_string(),
            }),
        }
    }
}

/// Turns a raw payload into document text: JSON field lookup, base64, zlib,
/// then text normalization to UTF-8.
#[derive(Clone, Debug)]
pub struct PayloadDecoder {
    field: FieldPath,
    encoding: TextEncoding,
}

impl PayloadDecoder {
    pub fn new(field: FieldPath, encoding: TextEncoding) -> Self {
        PayloadDecoder { field, encoding }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// `Ok(None)` when the payload has no value at the field path: such a
    /// document has no text and gets no vector.
    pub fn decode(&self, raw_payload: &[u8]) -> Result<Option<String>, DecodeError> {
        let root: serde_json::Value = serde_json::from_slice(raw_payload)?;
        let encoded = match self.field.lookup(&root) {
            None | Some(serde_json::Value::Null) => return Ok(None),
            Some(serde_json::Value::String(encoded)) => encoded,
            Some(_) => return Err(DecodeError::FieldNotString(self.field.to_string())),
        };
        let compressed = STANDARD.decode(encoded.trim())?;
        let inflated = inflate(&compressed)?;
        self.encoding.to_utf8(inflated).map(Some)
    }
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        PayloadDecoder {
            field: FieldPath {
                segments: default_field().split('.').map(str::to_string).collect(),
            },
            encoding: TextEncoding::default(),
        }
    }
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = ZlibDecoder::new(BufReader::new(compressed));
    let mut inflated = Vec::with_capacity(compressed.len() * 4);
    let mut chunk = [0u8; INFLATE_CHUNK_SIZE];
    loop {
        let read = decoder
            .read(&mut chunk)
            .map_err(DecodeError::Decompression)?;
        if read == 0 {
            break;
        }
        inflated.extend_from_slice(&chunk[..read]);
    }
    Ok(inflated)
}
