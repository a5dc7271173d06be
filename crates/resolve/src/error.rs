use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Non-fatal identity-resolution problem. The offending link is ignored and
/// the records involved stand alone.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionWarning {
    #[error("{record} cross-references {target}, which is not in the batch")]
    BrokenCrossReference { record: String, target: String },

    #[error("{record} would join distinct canonical trials {left} and {right}; link ignored")]
    AmbiguousLink {
        record: String,
        left: String,
        right: String,
    },
}

impl ResolutionWarning {
    pub fn record(&self) -> &str {
        match self {
            Self::BrokenCrossReference { record, .. } | Self::AmbiguousLink { record, .. } => record,
        }
    }
}
