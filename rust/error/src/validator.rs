use crate::{DocsimError, ErrorCodes};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Validation error: {0}")]
pub struct DocsimValidationError(#[from] validator::ValidationErrors);

impl DocsimError for DocsimValidationError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}
