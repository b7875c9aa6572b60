//! Error types for the catalog streaming pipeline.
//!
//! Each layer owns its error type:
//!
//! - [`SchemaError`] - a record type cannot be described (construction time)
//! - [`RecordDecodeError`] - one record is malformed; recovered, reported to a sink
//! - [`StreamDecodeError`] - the document itself is unreadable; fatal
//! - [`OperationError`] - a pipeline step rejected a record
//! - [`EncodeError`] - the output sink failed
//! - [`ConfigError`] - options or pipeline configuration are invalid
//! - [`PipelineError`] - top-level error of a run
//!
//! Conversion into [`PipelineError`] is automatic via `From`,
//! so `?` works across layer boundaries.

use thiserror::Error;

use crate::schema::FieldKind;

// =============================================================================
// Schema Errors
// =============================================================================

/// Errors raised while building a [`crate::schema::SchemaDescriptor`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// The record type declares no fields.
    #[error("Schema declares no fields")]
    Empty,

    /// Two fields share one element name.
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    /// A field, entry or container tag is not a usable element name.
    #[error("Invalid element name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Root container and record element would be indistinguishable.
    #[error("Root tag and record tag are both '{0}'")]
    TagConflict(String),
}

// =============================================================================
// Decode Errors
// =============================================================================

/// A single record could not be assembled.
///
/// The record is dropped, the error goes to the decoder's error sink and
/// decoding continues with the next record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordDecodeError {
    /// Field text does not coerce to the declared kind.
    #[error("Record {record}, field '{field}': expected {expected}, got '{value}'")]
    InvalidValue {
        record: usize,
        field: String,
        expected: FieldKind,
        value: String,
    },

    /// Field text contains an escape sequence that cannot be resolved.
    #[error("Record {record}, element '{element}': malformed text: {message}")]
    MalformedText {
        record: usize,
        element: String,
        message: String,
    },
}

impl RecordDecodeError {
    /// 1-based position of the offending record in the document.
    pub fn record(&self) -> usize {
        match self {
            Self::InvalidValue { record, .. } | Self::MalformedText { record, .. } => *record,
        }
    }
}

/// The input document cannot be read any further.
#[derive(Debug, Error)]
pub enum StreamDecodeError {
    /// Failed to read the source.
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally malformed markup.
    #[error("Malformed document at byte {position}: {message}")]
    Syntax { position: u64, message: String },

    /// Input ended while elements were still open.
    #[error("Document ended with {open} unclosed element(s)")]
    UnexpectedEof { open: usize },

    /// Input ended without ever opening a root element.
    #[error("Document has no root element")]
    MissingRoot,
}

// =============================================================================
// Operation Errors
// =============================================================================

/// A pipeline operation could not process a record.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Operation '{operation}' failed: {message}")]
pub struct OperationError {
    pub operation: String,
    pub message: String,
}

impl OperationError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Encode Errors
// =============================================================================

/// The encoder could not emit output.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The sink refused the write.
    #[error("Failed to write catalog: {0}")]
    Io(#[from] std::io::Error),

    /// Markup serialization failed.
    #[error("Failed to serialize record: {0}")]
    Xml(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Invalid options or pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration.
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A pattern does not compile.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A setting has an unusable value.
    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level errors of a decode → transform → encode run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The record type could not be described.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The input stream is unreadable.
    #[error("Decode error: {0}")]
    Decode(#[from] StreamDecodeError),

    /// An operation aborted the run.
    #[error("Transform error: {0}")]
    Operation(#[from] OperationError),

    /// The output could not be written.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Opening input or output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The background decode worker died.
    #[error("Decode worker failed: {0}")]
    Worker(String),
}

impl From<std::convert::Infallible> for PipelineError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for schema construction.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type for operations.
pub type OperationResult<T> = Result<T, OperationError>;

/// Result type for encoding.
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for whole runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let schema_err = SchemaError::DuplicateField("sku".into());
        let pipeline_err: PipelineError = schema_err.into();
        assert!(pipeline_err.to_string().contains("sku"));

        let op_err = OperationError::new("fix_ampersands", "boom");
        let pipeline_err: PipelineError = op_err.into();
        assert!(pipeline_err.to_string().contains("fix_ampersands"));
    }

    #[test]
    fn test_record_decode_error_format() {
        let err = RecordDecodeError::InvalidValue {
            record: 3,
            field: "price".into(),
            expected: FieldKind::Float,
            value: "12,50".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Record 3"));
        assert!(msg.contains("price"));
        assert!(msg.contains("12,50"));
        assert_eq!(err.record(), 3);
    }

    #[test]
    fn test_stream_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated");
        let err: StreamDecodeError = io.into();
        assert!(err.to_string().contains("truncated"));
    }
}
