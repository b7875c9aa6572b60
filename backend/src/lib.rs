//! # Catalogflow - streaming XML product catalog processing
//!
//! Catalogflow reads product catalogs of unbounded size record by record,
//! runs each record through an ordered pipeline of operations and writes the
//! result back out, holding only one record in memory at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Catalog XML │────▶│   Decoder   │────▶│  Pipeline   │────▶│   Encoder   │
//! │  (any size) │     │ (per record)│     │ (operations)│     │ (per record)│
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                            ▲                                       ▲
//!                            └────────── SchemaDescriptor ───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use catalogflow::{process_catalog, CopyNameToAttrs, FixAmpersands, LogSink, Pipeline, Product, TransformOptions};
//!
//! let mut pipeline: Pipeline<Product> = Pipeline::new()
//!     .add(FixAmpersands)
//!     .add(CopyNameToAttrs::default());
//! let summary = process_catalog(input, output, LogSink, &mut pipeline, &TransformOptions::default())?;
//! println!("{}", summary.summary());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`models`] - Catalog records and attributes
//! - [`schema`] - Field-mapping tables
//! - [`codec`] - Streaming decoder, encoder and background worker
//! - [`transform`] - Operations, pipeline, configuration and runner
//! - [`logs`] - Run logging

// Core modules
pub mod error;
pub mod models;
pub mod schema;

// Streaming
pub mod codec;

// Transformation
pub mod transform;

// Logging
pub mod logs;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    EncodeError,
    OperationError,
    PipelineError,
    PipelineResult,
    RecordDecodeError,
    SchemaError,
    StreamDecodeError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    Attribute,
    AttributeList,
    CatalogRecord,
    Product,
    ProductWithName,
};

// =============================================================================
// Re-exports - Schema
// =============================================================================

pub use schema::{
    FieldDescriptor,
    FieldKind,
    Record,
    SchemaBuilder,
    SchemaDescriptor,
};

// =============================================================================
// Re-exports - Codec
// =============================================================================

pub use codec::{
    decode,
    spawn_decoder,
    DecodeStats,
    DecodeWorker,
    ErrorSink,
    LogSink,
    RecordDecoder,
    RecordEncoder,
};

// =============================================================================
// Re-exports - Operations
// =============================================================================

pub use transform::operations::{
    CollectManufacturers,
    CopyNameToAttrs,
    ExtractAttribute,
    FixAmpersands,
    FnOperation,
    Operation,
    Tally,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::{
    operations_description,
    process_catalog,
    process_catalog_async,
    process_reader,
    BuiltPipeline,
    FailurePolicy,
    OperationSpec,
    Pipeline,
    PipelineConfig,
    PipelineStats,
    RunSummary,
    TransformOptions,
};

// =============================================================================
// Re-exports - Logging
// =============================================================================

pub use logs::{LogEntry, LogLevel, LOG_BROADCASTER};
