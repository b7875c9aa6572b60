//! Record transformation.
//!
//! - Operations: single record-in, record-out steps
//! - Pipeline: ordered composition with a failure policy
//! - Config: JSON description of a pipeline
//! - Runner: decode → pipeline → encode over files or readers

pub mod config;
pub mod operations;
pub mod pipeline;
pub mod runner;

pub use config::{operations_description, BuiltPipeline, OperationSpec, PipelineConfig};
pub use operations::{
    fix_amps, CollectManufacturers, CopyNameToAttrs, ExtractAttribute, FixAmpersands, FnOperation,
    Operation, Tally, NAME_ATTRIBUTE, PIECES_ATTRIBUTE, PIECES_PATTERNS,
};
pub use pipeline::{FailurePolicy, Pipeline, PipelineRun, PipelineStats};
pub use runner::{
    process_catalog, process_catalog_async, process_reader, RunSummary, TransformOptions,
    ENV_CHANNEL_CAPACITY, ENV_FAILURE_POLICY, ENV_INDENT,
};
