pub mod error;
pub mod resolver;
pub mod trial_node;

pub use error::ResolutionWarning;
pub use resolver::{MatchBasis, Resolution, resolve};
pub use trial_node::{MemberRecord, TrialNode};
