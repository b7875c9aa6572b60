//! Ordered composition of operations.
//!
//! A [`Pipeline`] applies every operation to one record, in the order they
//! were added, before the next record is pulled. Both [`Pipeline::run`] and
//! [`Pipeline::run_stream`] are lazy: nothing is read from upstream until the
//! caller asks for the next record.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut pipeline: Pipeline<Product> = Pipeline::new()
//!     .add(FixAmpersands)
//!     .add(CopyNameToAttrs::default());
//!
//! for record in pipeline.run(decoder) {
//!     encoder.write_record(&record?)?;
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use futures::future;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::operations::Operation;
use crate::error::{ConfigError, OperationResult, PipelineError, PipelineResult};
use crate::logs::log_warning;

/// What to do when an operation rejects a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run with the operation's error.
    #[default]
    Abort,
    /// Drop the record, log the failure and continue.
    SkipRecord,
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" | "skip_record" | "skip-record" => Ok(Self::SkipRecord),
            _ => Err(ConfigError::InvalidValue {
                key: "failure_policy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => f.write_str("abort"),
            Self::SkipRecord => f.write_str("skip_record"),
        }
    }
}

/// Counters of the latest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Records that passed every operation.
    pub processed: usize,
    /// Records dropped under [`FailurePolicy::SkipRecord`].
    pub skipped: usize,
}

/// Ordered list of operations applied per record.
pub struct Pipeline<R> {
    steps: Vec<Box<dyn Operation<R>>>,
    policy: FailurePolicy,
    stats: PipelineStats,
}

impl<R: 'static> Pipeline<R> {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            policy: FailurePolicy::default(),
            stats: PipelineStats::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Append an operation.
    pub fn add(mut self, operation: impl Operation<R> + 'static) -> Self {
        self.steps.push(Box::new(operation));
        self
    }

    pub fn push(&mut self, operation: Box<dyn Operation<R>>) {
        self.steps.push(operation);
    }

    pub fn set_policy(&mut self, policy: FailurePolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Run one record through every operation, in order.
    pub fn apply(&mut self, mut record: R) -> OperationResult<R> {
        for step in &mut self.steps {
            record = step.apply(record)?;
        }
        Ok(record)
    }

    /// Apply and account for one record; `None` means it was skipped.
    fn admit(&mut self, record: R) -> Option<PipelineResult<R>> {
        match self.apply(record) {
            Ok(record) => {
                self.stats.processed += 1;
                Some(Ok(record))
            }
            Err(err) => match self.policy {
                FailurePolicy::Abort => Some(Err(err.into())),
                FailurePolicy::SkipRecord => {
                    self.stats.skipped += 1;
                    log_warning(format!("Skipped record: {}", err));
                    None
                }
            },
        }
    }

    /// Lazily transform a sequence of records.
    ///
    /// An upstream error, or an operation error under [`FailurePolicy::Abort`],
    /// is yielded once and ends the run.
    pub fn run<I, E>(&mut self, records: I) -> PipelineRun<'_, R, I::IntoIter>
    where
        I: IntoIterator<Item = Result<R, E>>,
        E: Into<PipelineError>,
    {
        self.stats = PipelineStats::default();
        PipelineRun {
            pipeline: self,
            records: records.into_iter(),
            done: false,
        }
    }

    /// Lazily transform a stream of records, with the same semantics as [`Pipeline::run`].
    pub fn run_stream<'a, S, E>(&'a mut self, records: S) -> impl Stream<Item = PipelineResult<R>> + 'a
    where
        S: Stream<Item = Result<R, E>> + 'a,
        E: Into<PipelineError>,
    {
        self.stats = PipelineStats::default();
        let pipeline = self;
        records
            .scan(false, move |halted, item| {
                if *halted {
                    return future::ready(None);
                }
                let outcome = match item {
                    Ok(record) => pipeline.admit(record),
                    Err(err) => Some(Err(err.into())),
                };
                if matches!(outcome, Some(Err(_))) {
                    *halted = true;
                }
                future::ready(Some(outcome))
            })
            .filter_map(future::ready)
    }
}

impl<R: 'static> Default for Pipeline<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for Pipeline<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline")
            .field("steps", &steps)
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Iterator returned by [`Pipeline::run`].
pub struct PipelineRun<'a, R, I> {
    pipeline: &'a mut Pipeline<R>,
    records: I,
    done: bool,
}

impl<'a, R, I, E> Iterator for PipelineRun<'a, R, I>
where
    R: 'static,
    I: Iterator<Item = Result<R, E>>,
    E: Into<PipelineError>,
{
    type Item = PipelineResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        for item in self.records.by_ref() {
            let outcome = match item {
                Ok(record) => self.pipeline.admit(record),
                Err(err) => Some(Err(err.into())),
            };
            match outcome {
                Some(Ok(record)) => return Some(Ok(record)),
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => continue,
            }
        }
        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OperationError, StreamDecodeError};
    use crate::models::Product;
    use crate::transform::operations::{CollectManufacturers, FnOperation, Tally};
    use std::convert::Infallible;

    fn named(id: i64, name: &str) -> Product {
        Product {
            product_id: id,
            name: name.into(),
            ..Default::default()
        }
    }

    fn append(tag: &'static str) -> FnOperation<impl FnMut(Product) -> OperationResult<Product> + Send> {
        FnOperation::new(tag, move |mut p: Product| {
            p.name.push_str(tag);
            Ok(p)
        })
    }

    fn fail_on(id: i64) -> FnOperation<impl FnMut(Product) -> OperationResult<Product> + Send> {
        FnOperation::new("fail_on", move |p: Product| {
            if p.product_id == id {
                Err(OperationError::new("fail_on", format!("record {}", id)))
            } else {
                Ok(p)
            }
        })
    }

    fn ok_records(ids: std::ops::RangeInclusive<i64>) -> Vec<Result<Product, Infallible>> {
        ids.map(|id| Ok(named(id, ""))).collect()
    }

    #[test]
    fn test_declared_order_is_honoured() {
        let mut ab: Pipeline<Product> = Pipeline::new().add(append("A")).add(append("B"));
        let mut ba: Pipeline<Product> = Pipeline::new().add(append("B")).add(append("A"));

        assert_eq!(ab.apply(named(1, "x")).unwrap().name, "xAB");
        assert_eq!(ba.apply(named(1, "x")).unwrap().name, "xBA");
        assert_eq!(ab.step_names(), vec!["A", "B"]);
    }

    #[test]
    fn test_run_is_lazy_and_sequential() {
        let tally = Tally::new();
        let mut pipeline: Pipeline<Product> = Pipeline::new().add(CollectManufacturers::new(tally.clone()));
        let records = (1..=3).map(|id| {
            Ok::<_, Infallible>(Product {
                product_id: id,
                manufacturer_name: "Lego".into(),
                ..Default::default()
            })
        });

        let mut run = pipeline.run(records);
        assert!(tally.snapshot().is_empty());

        run.next().unwrap().unwrap();
        assert_eq!(tally.snapshot().get("Lego"), Some(&1));

        assert_eq!(run.count(), 2);
        assert_eq!(pipeline.stats().processed, 3);
    }

    #[test]
    fn test_abort_policy_stops_run() {
        let mut pipeline: Pipeline<Product> = Pipeline::new().add(fail_on(2));
        let results: Vec<_> = pipeline.run(ok_records(1..=4)).collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(PipelineError::Operation(_))));
        assert_eq!(pipeline.stats().processed, 1);
    }

    #[test]
    fn test_skip_policy_drops_failing_record() {
        let mut pipeline: Pipeline<Product> = Pipeline::new()
            .with_policy(FailurePolicy::SkipRecord)
            .add(fail_on(2));
        let ids: Vec<i64> = pipeline
            .run(ok_records(1..=4))
            .map(|r| r.unwrap().product_id)
            .collect();

        assert_eq!(ids, vec![1, 3, 4]);
        assert_eq!(
            pipeline.stats(),
            PipelineStats {
                processed: 3,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_upstream_error_ends_run() {
        let mut pipeline: Pipeline<Product> = Pipeline::new();
        let records = vec![
            Ok(named(1, "a")),
            Err(StreamDecodeError::UnexpectedEof { open: 1 }),
            Ok(named(2, "b")),
        ];

        let results: Vec<_> = pipeline.run(records).collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(PipelineError::Decode(_))));
    }

    #[tokio::test]
    async fn test_run_stream_matches_run() {
        let mut pipeline: Pipeline<Product> = Pipeline::new()
            .with_policy(FailurePolicy::SkipRecord)
            .add(fail_on(3))
            .add(append("!"));

        let records = futures::stream::iter(ok_records(1..=5));
        let names: Vec<String> = pipeline
            .run_stream(records)
            .map(|r| r.unwrap().name)
            .collect()
            .await;

        assert_eq!(names, vec!["!"; 4]);
        assert_eq!(pipeline.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_run_stream_halts_on_abort() {
        let mut pipeline: Pipeline<Product> = Pipeline::new().add(fail_on(2));
        let records = futures::stream::iter(ok_records(1..=5));

        let results: Vec<_> = pipeline.run_stream(records).collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!("Skip".parse::<FailurePolicy>().unwrap(), FailurePolicy::SkipRecord);
        assert!("retry".parse::<FailurePolicy>().is_err());
    }
}
