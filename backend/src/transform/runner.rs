//! End-to-end runs: decode → pipeline → encode.
//!
//! # Example
//!
//! ```rust,ignore
//! use catalogflow::{process_catalog, FixAmpersands, LogSink, Pipeline, Product, TransformOptions};
//!
//! let mut pipeline: Pipeline<Product> = Pipeline::new().add(FixAmpersands);
//! let summary = process_catalog(
//!     Path::new("in.xml"),
//!     Path::new("out.xml"),
//!     LogSink,
//!     &mut pipeline,
//!     &TransformOptions::default(),
//! )?;
//! println!("{}", summary.summary());
//! ```

use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pipeline::{FailurePolicy, Pipeline};
use crate::codec::{spawn_decoder, DecodeStats, ErrorSink, RecordDecoder, RecordEncoder, DEFAULT_INDENT};
use crate::error::{ConfigError, ConfigResult, PipelineError, PipelineResult};
use crate::logs::{log_error, log_info, log_info_indent, log_success, log_warning};
use crate::schema::Record;

/// Environment variable overriding [`TransformOptions::channel_capacity`].
pub const ENV_CHANNEL_CAPACITY: &str = "CATALOGFLOW_CHANNEL_CAPACITY";
/// Environment variable overriding [`TransformOptions::failure_policy`].
pub const ENV_FAILURE_POLICY: &str = "CATALOGFLOW_FAILURE_POLICY";
/// Environment variable overriding [`TransformOptions::indent`].
pub const ENV_INDENT: &str = "CATALOGFLOW_INDENT";

/// Options for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Records buffered between the decode worker and the pipeline
    pub channel_capacity: usize,

    /// Overrides the pipeline's own failure policy when set
    pub failure_policy: Option<FailurePolicy>,

    /// Output indentation width
    pub indent: usize,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            failure_policy: None,
            indent: DEFAULT_INDENT,
        }
    }
}

impl TransformOptions {
    /// Defaults overridden by `CATALOGFLOW_*` environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut options = Self::default();

        if let Some(value) = lookup(ENV_CHANNEL_CAPACITY) {
            options.channel_capacity = match value.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => return Err(invalid(ENV_CHANNEL_CAPACITY, value)),
            };
        }
        if let Some(value) = lookup(ENV_FAILURE_POLICY) {
            options.failure_policy = Some(value.parse()?);
        }
        if let Some(value) = lookup(ENV_INDENT) {
            options.indent = value
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(ENV_INDENT, value))?;
        }

        Ok(options)
    }
}

fn invalid(key: &str, value: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records yielded by the decoder
    pub records_decoded: usize,
    /// Records dropped by the decoder
    pub decode_errors: usize,
    /// Records dropped by the pipeline
    pub records_skipped: usize,
    pub records_written: usize,
    /// Largest node count held for one record while decoding
    pub peak_record_nodes: usize,
}

impl RunSummary {
    fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        decode: DecodeStats,
        skipped: usize,
        written: usize,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            records_decoded: decode.records,
            decode_errors: decode.errors,
            records_skipped: skipped,
            records_written: written,
            peak_record_nodes: decode.peak_record_nodes,
        }
    }

    /// One-line human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Decoded: {} records, {} decode errors, {} skipped, {} written",
            self.records_decoded, self.decode_errors, self.records_skipped, self.records_written
        )
    }

    fn log(&self) {
        if self.decode_errors > 0 {
            log_warning(format!("{} malformed record(s) dropped while decoding", self.decode_errors));
        }
        if self.records_skipped > 0 {
            log_warning(format!("{} record(s) skipped by the pipeline", self.records_skipped));
        }
        log_success(self.summary());
    }
}

fn prepare<R: 'static>(pipeline: &mut Pipeline<R>, options: &TransformOptions) -> Uuid {
    if let Some(policy) = options.failure_policy {
        pipeline.set_policy(policy);
    }
    let run_id = Uuid::new_v4();
    log_info(format!("Run {} started", run_id));
    log_info(format!(
        "Pipeline: {} operation(s), on failure: {}",
        pipeline.len(),
        pipeline.policy()
    ));
    for (i, name) in pipeline.step_names().iter().enumerate() {
        log_info_indent(format!("{}. {}", i + 1, name), 1);
    }
    run_id
}

fn aborted(run_id: Uuid) -> impl FnOnce(PipelineError) -> PipelineError {
    move |err| {
        log_error(format!("Run {} aborted: {}", run_id, err));
        err
    }
}

/// Transform a catalog read from `source` into `sink`, synchronously.
///
/// Malformed records are reported to `errors`. Returns the sink once the
/// root container is closed.
pub fn process_reader<R, S, W>(
    source: S,
    sink: W,
    errors: impl ErrorSink + 'static,
    pipeline: &mut Pipeline<R>,
    options: &TransformOptions,
) -> PipelineResult<(W, RunSummary)>
where
    R: Record,
    S: BufRead,
    W: Write,
{
    let started_at = Utc::now();
    let run_id = prepare(pipeline, options);

    let schema = Arc::new(R::describe()?);
    let mut decoder = RecordDecoder::new(source, schema.clone(), errors);
    let mut encoder = RecordEncoder::new(sink, schema).with_indent(options.indent);

    encoder.begin()?;
    for record in pipeline.run(decoder.by_ref()) {
        let record = record.map_err(aborted(run_id))?;
        encoder.write_record(&record)?;
    }
    let written = encoder.records_written();
    let sink = encoder.finish()?;

    let summary = RunSummary::new(run_id, started_at, decoder.stats(), pipeline.stats().skipped, written);
    summary.log();
    Ok((sink, summary))
}

/// Transform the catalog file at `input` into `output`, synchronously.
pub fn process_catalog<R: Record>(
    input: &Path,
    output: &Path,
    errors: impl ErrorSink + 'static,
    pipeline: &mut Pipeline<R>,
    options: &TransformOptions,
) -> PipelineResult<RunSummary> {
    log_info(format!("Reading {}", input.display()));
    let source = BufReader::new(File::open(input)?);
    let sink = BufWriter::new(File::create(output)?);

    let (sink, summary) = process_reader(source, sink, errors, pipeline, options)?;
    sink.into_inner().map_err(|e| e.into_error())?;
    log_success(format!("Wrote {}", output.display()));
    Ok(summary)
}

/// Transform the catalog file at `input` into `output`, decoding on a
/// background worker.
pub async fn process_catalog_async<R: Record>(
    input: &Path,
    output: &Path,
    errors: impl ErrorSink + 'static,
    pipeline: &mut Pipeline<R>,
    options: &TransformOptions,
) -> PipelineResult<RunSummary> {
    let started_at = Utc::now();
    let run_id = prepare(pipeline, options);

    log_info(format!("Reading {}", input.display()));
    let schema = Arc::new(R::describe()?);
    let source = BufReader::new(File::open(input)?);
    let decoder = RecordDecoder::new(source, schema.clone(), errors);
    let mut worker = spawn_decoder(decoder, options.channel_capacity);

    let sink = BufWriter::new(File::create(output)?);
    let mut encoder = RecordEncoder::new(sink, schema).with_indent(options.indent);
    encoder.begin()?;

    let outcome = write_stream(pipeline.run_stream(&mut worker), &mut encoder).await;
    let decode = worker.finish().await?;
    outcome.map_err(aborted(run_id))?;

    let written = encoder.records_written();
    let sink = encoder.finish()?;
    sink.into_inner().map_err(|e| e.into_error())?;

    let summary = RunSummary::new(run_id, started_at, decode, pipeline.stats().skipped, written);
    summary.log();
    log_success(format!("Wrote {}", output.display()));
    Ok(summary)
}

async fn write_stream<R, S, W>(records: S, encoder: &mut RecordEncoder<R, W>) -> PipelineResult<()>
where
    R: Record,
    S: Stream<Item = PipelineResult<R>>,
    W: Write,
{
    futures::pin_mut!(records);
    while let Some(record) = records.next().await {
        encoder.write_record(&record?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, LogSink};
    use crate::error::{RecordDecodeError, StreamDecodeError};
    use crate::error::OperationError;
    use crate::models::{Product, ProductWithName};
    use crate::transform::operations::{CopyNameToAttrs, FixAmpersands, FnOperation};
    use std::collections::HashMap;
    use std::fs;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<products>
  <product>
    <product_id>1</product_id>
    <name>Klocki &amp;amp; figurki</name>
    <manufacturer_name>Lego</manufacturer_name>
    <price>10.5</price>
  </product>
  <product>
    <product_id>2</product_id>
    <name>Zepsuty</name>
    <quantity>dużo</quantity>
  </product>
  <product>
    <product_id>3</product_id>
    <name>Puzzle</name>
    <man_name>Jigsaw</man_name>
    <images><image>p.jpg</image></images>
  </product>
</products>
"#;

    fn names(xml: &[u8]) -> Vec<String> {
        decode::<Product, _>(xml, LogSink)
            .unwrap()
            .map(|r| r.unwrap().name)
            .collect()
    }

    #[test]
    fn test_process_reader_end_to_end() {
        let mut pipeline: Pipeline<Product> = Pipeline::new()
            .add(FixAmpersands)
            .add(CopyNameToAttrs::default());

        let (out, summary) = process_reader(
            Cursor::new(CATALOG),
            Vec::new(),
            LogSink,
            &mut pipeline,
            &TransformOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.records_decoded, 2);
        assert_eq!(summary.decode_errors, 1);
        assert_eq!(summary.records_written, 2);
        assert_eq!(summary.records_skipped, 0);
        assert!(summary.finished_at >= summary.started_at);
        assert_eq!(names(&out), vec!["Klocki & figurki", "Puzzle"]);

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<products>\n"));
        assert!(text.contains("<value>Klocki &amp; figurki</value>"));
        assert!(!text.contains("man_name"));
    }

    #[test]
    fn test_extended_records_keep_secondary_name() {
        let mut pipeline: Pipeline<ProductWithName> = Pipeline::new().add(CopyNameToAttrs::default());
        let (out, _) = process_reader(
            Cursor::new(CATALOG),
            Vec::new(),
            LogSink,
            &mut pipeline,
            &TransformOptions::default(),
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("<man_name>Jigsaw</man_name>"));
        assert!(text.contains("<value>Jigsaw</value>"));
    }

    #[test]
    fn test_options_override_policy() {
        let mut pipeline: Pipeline<Product> = Pipeline::new().add(FnOperation::new(
            "reject_puzzle",
            |p: Product| {
                if p.name == "Puzzle" {
                    Err(OperationError::new("reject_puzzle", "no puzzles"))
                } else {
                    Ok(p)
                }
            },
        ));

        let result = process_reader(
            Cursor::new(CATALOG),
            Vec::new(),
            LogSink,
            &mut pipeline,
            &TransformOptions::default(),
        );
        assert!(matches!(result, Err(PipelineError::Operation(_))));

        let options = TransformOptions {
            failure_policy: Some(FailurePolicy::SkipRecord),
            ..Default::default()
        };
        let (out, summary) = process_reader(Cursor::new(CATALOG), Vec::new(), LogSink, &mut pipeline, &options).unwrap();
        assert_eq!(summary.records_skipped, 1);
        assert_eq!(summary.records_written, 1);
        assert_eq!(names(&out), vec!["Klocki &amp; figurki"]);
    }

    #[test]
    fn test_empty_catalog_yields_empty_root() {
        let mut pipeline: Pipeline<Product> = Pipeline::new();
        let (out, summary) = process_reader(
            Cursor::new("<products></products>"),
            Vec::new(),
            LogSink,
            &mut pipeline,
            &TransformOptions {
                indent: 0,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(summary.records_written, 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<products>\n</products>\n"
        );
    }

    #[test]
    fn test_decode_errors_reach_caller_sink() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let errors = {
            let reported = reported.clone();
            move |err: RecordDecodeError| reported.lock().unwrap().push(err)
        };

        let mut pipeline: Pipeline<Product> = Pipeline::new();
        let (_, summary) = process_reader(
            Cursor::new(CATALOG),
            Vec::new(),
            errors,
            &mut pipeline,
            &TransformOptions::default(),
        )
        .unwrap();

        let reported = reported.lock().unwrap();
        assert_eq!(summary.decode_errors, 1);
        assert_eq!(reported.len(), 1);
        assert!(matches!(
            &reported[0],
            RecordDecodeError::InvalidValue { record: 2, field, .. } if field == "quantity"
        ));
    }

    #[test]
    fn test_input_without_catalog_fails_run() {
        for input in ["", "{\"products\": []}", "this is not a catalog"] {
            let mut pipeline: Pipeline<Product> = Pipeline::new();
            let result = process_reader(
                Cursor::new(input),
                Vec::new(),
                LogSink,
                &mut pipeline,
                &TransformOptions::default(),
            );
            assert!(
                matches!(result, Err(PipelineError::Decode(StreamDecodeError::MissingRoot))),
                "input {:?}",
                input
            );
        }
    }

    #[test]
    fn test_process_catalog_files() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.xml");
        let output = dir.path().join("out.xml");
        fs::write(&input, CATALOG).unwrap();

        let mut pipeline: Pipeline<Product> = Pipeline::new().add(FixAmpersands);
        let summary = process_catalog(&input, &output, LogSink, &mut pipeline, &TransformOptions::default()).unwrap();

        assert_eq!(summary.records_written, 2);
        assert_eq!(names(&fs::read(&output).unwrap()), vec!["Klocki & figurki", "Puzzle"]);
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let dir = TempDir::new().unwrap();
        let mut pipeline: Pipeline<Product> = Pipeline::new();
        let result = process_catalog(
            &dir.path().join("missing.xml"),
            &dir.path().join("out.xml"),
            LogSink,
            &mut pipeline,
            &TransformOptions::default(),
        );
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }

    #[tokio::test]
    async fn test_process_catalog_async_matches_sync() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.xml");
        let sync_out = dir.path().join("sync.xml");
        let async_out = dir.path().join("async.xml");
        fs::write(&input, CATALOG).unwrap();

        let options = TransformOptions {
            channel_capacity: 1,
            ..Default::default()
        };
        let mut pipeline: Pipeline<Product> = Pipeline::new().add(FixAmpersands);
        process_catalog(&input, &sync_out, LogSink, &mut pipeline, &options).unwrap();
        let summary = process_catalog_async(&input, &async_out, LogSink, &mut pipeline, &options)
            .await
            .unwrap();

        assert_eq!(summary.records_decoded, 2);
        assert_eq!(summary.decode_errors, 1);
        assert_eq!(fs::read(&sync_out).unwrap(), fs::read(&async_out).unwrap());
    }

    #[tokio::test]
    async fn test_async_stream_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.xml");
        fs::write(&input, "<products><product><name>a</name></product><product>").unwrap();

        let mut pipeline: Pipeline<Product> = Pipeline::new();
        let result = process_catalog_async(
            &input,
            &dir.path().join("out.xml"),
            LogSink,
            &mut pipeline,
            &TransformOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }

    #[test]
    fn test_options_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_CHANNEL_CAPACITY, "8"),
            (ENV_FAILURE_POLICY, "skip"),
            (ENV_INDENT, "4"),
        ]
        .into_iter()
        .collect();

        let options = TransformOptions::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(options.channel_capacity, 8);
        assert_eq!(options.failure_policy, Some(FailurePolicy::SkipRecord));
        assert_eq!(options.indent, 4);

        let defaults = TransformOptions::from_lookup(|_| None).unwrap();
        assert_eq!(defaults, TransformOptions::default());

        let zero = TransformOptions::from_lookup(|k| (k == ENV_CHANNEL_CAPACITY).then(|| "0".to_string()));
        assert!(matches!(zero, Err(ConfigError::InvalidValue { .. })));
    }
}
