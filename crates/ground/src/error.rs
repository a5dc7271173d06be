use thiserror::Error;

/// Failure talking to the grounding service. The grounder never surfaces
/// these to callers; a failed lookup degrades to "ungrounded".
#[derive(Debug, Error)]
pub enum GroundingError {
    #[error("grounding request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("grounding service returned status {0}")]
    Status(u16),

    #[error("grounding service unavailable: {0}")]
    Unavailable(String),
}
