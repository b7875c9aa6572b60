//! Streaming codec for catalog documents.
//!
//! - [`decoder`] - pull-based record decoder with bounded memory
//! - [`encoder`] - record-at-a-time document writer
//! - [`worker`] - decoder on a blocking worker behind a bounded channel

pub mod decoder;
pub mod encoder;
pub mod worker;

pub use decoder::{decode, DecodeStats, ErrorSink, LogSink, RecordDecoder};
pub use encoder::{RecordEncoder, DEFAULT_INDENT};
pub use worker::{spawn_decoder, DecodeWorker};
