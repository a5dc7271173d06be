use thiserror::Error;

use crate::trial::Source;

/// Per-record mapping failure. Fatal for that record only; callers collect
/// these and keep going with the rest of the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("{registry} record has no primary identifier (`{field}`)")]
    MissingIdentifier { registry: Source, field: &'static str },

    #[error("{registry} record could not be decoded: {message}")]
    Malformed { registry: Source, message: String },

    #[error("record from {found} passed to the {expected} mapper")]
    SourceMismatch { expected: Source, found: Source },
}
