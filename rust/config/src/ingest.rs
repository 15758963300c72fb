use docsim_ingest::{default_field, DecodeError, FieldPath, PayloadDecoder, TextEncoding};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub fn default_page_size() -> usize {
    10
}

/// Where document text lives in a payload and how the source is paged.
///
/// `embedding_dimension` defaults to the index dimensionality; when set it
/// must agree with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct IngestConfig {
    #[serde(default = "default_field")]
    #[validate(custom(function = "validate_field_path"))]
    pub field: String,
    #[serde(default)]
    pub encoding: TextEncoding,
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1))]
    pub page_size: usize,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub embedding_dimension: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            field: default_field(),
            encoding: TextEncoding::default(),
            page_size: default_page_size(),
            embedding_dimension: None,
        }
    }
}

fn validate_field_path(field: &str) -> Result<(), ValidationError> {
    field.parse::<FieldPath>().map(|_| ()).map_err(|e| {
        ValidationError::new("field").with_message(e.to_string().into())
    })
}

impl IngestConfig {
    pub fn decoder(&self) -> Result<PayloadDecoder, DecodeError> {
        Ok(PayloadDecoder::new(self.field.parse()?, self.encoding))
    }
}
