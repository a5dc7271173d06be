use ingest::{EntityKind, Source};
use resolve::ResolutionWarning;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recoverable inconsistency found while assembling the tables.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyError {
    #[error("node {id} redefined with conflicting content; kept {kept:?}, dropped {dropped:?}")]
    ConflictingNode {
        id: String,
        kept: String,
        dropped: String,
    },

    #[error("edge {subject} -[{predicate}]-> {object} references a missing node; dropped")]
    DanglingEdge {
        subject: String,
        predicate: String,
        object: String,
    },
}

/// Violations of the pipeline's own preconditions. These abort a run before
/// any record is read.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("no input batches supplied")]
    NoInput,
}

/// Per-record problem collected during a run and returned with the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    Mapping {
        source: Source,
        position: usize,
        message: String,
    },
    Resolution {
        warning: ResolutionWarning,
    },
    Consistency {
        error: ConsistencyError,
    },
    Ungrounded {
        trial: String,
        mention: String,
        hint: EntityKind,
    },
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mapping { .. } => "mapping",
            Self::Resolution { .. } => "resolution",
            Self::Consistency { .. } => "consistency",
            Self::Ungrounded { .. } => "ungrounded",
        }
    }
}

impl From<ResolutionWarning> for Diagnostic {
    fn from(warning: ResolutionWarning) -> Self {
        Self::Resolution { warning }
    }
}

impl From<ConsistencyError> for Diagnostic {
    fn from(error: ConsistencyError) -> Self {
        Self::Consistency { error }
    }
}
