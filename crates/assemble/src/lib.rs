pub mod assembler;
pub mod error;
pub mod export;
pub mod neo4j_sink;
pub mod pipeline;

pub use assembler::{
    Assembly, EdgeRow, GraphAssembler, GraphTables, NodeLabel, NodeRow, TrialRow, assemble,
};
pub use error::{ConsistencyError, Diagnostic, PipelineError};
pub use export::write_tables;
pub use neo4j_sink::{Neo4jConfig, Neo4jSink};
pub use pipeline::{CancelHandle, Pipeline, PipelineConfig, PipelineOutput, PipelineStats};
