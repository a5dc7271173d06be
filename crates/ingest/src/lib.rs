pub mod error;
pub mod mapper;
pub mod raw;
pub mod reader;
pub mod registry;
pub mod trial;

pub use error::MappingError;
pub use mapper::map;
pub use raw::{CtStudy, RawRecord, WhoRecord};
pub use reader::{RawBatch, RawRecordReader, RejectedRecord};
pub use trial::{DesignInfo, EntityKind, Mention, Outcome, PresetGrounding, Source, TrialRecord};
