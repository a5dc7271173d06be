pub mod error;
pub mod gilda;
pub mod grounder;
pub mod normalizer;
pub mod retry;
pub mod schema;
pub mod service;

pub use error::GroundingError;
pub use gilda::GildaClient;
pub use grounder::{CacheKey, Grounder, GroundingConfig, GroundingStats};
pub use normalizer::MentionNormalizer;
pub use retry::RetryPolicy;
pub use schema::{BioEntityNode, Candidate, Edge, Predicate};
pub use service::{GroundingService, LexiconEntry, LexiconService, namespaces_for};
