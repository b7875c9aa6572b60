//! Background decoding.
//!
//! The decoder runs on a tokio blocking thread and hands records over a
//! bounded channel. When the channel is full the worker blocks on send, so
//! the consumer's pull rate drives decoding.

use std::io::BufRead;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use super::decoder::{DecodeStats, RecordDecoder};
use crate::error::{PipelineError, PipelineResult, StreamDecodeError};
use crate::logs::log_info;
use crate::schema::Record;

/// Records decoded by a background worker, in document order.
pub struct DecodeWorker<R> {
    records: ReceiverStream<Result<R, StreamDecodeError>>,
    handle: JoinHandle<DecodeStats>,
}

/// Move `decoder` onto a blocking worker feeding a channel of `capacity` records.
///
/// Dropping the returned stream stops the worker after its pending send; the
/// decoder and its source are dropped with it.
pub fn spawn_decoder<R, S>(mut decoder: RecordDecoder<R, S>, capacity: usize) -> DecodeWorker<R>
where
    R: Record,
    S: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::task::spawn_blocking(move || {
        for item in decoder.by_ref() {
            if tx.blocking_send(item).is_err() {
                log_info("Decode worker stopped: consumer went away");
                break;
            }
        }
        decoder.stats()
    });

    DecodeWorker {
        records: ReceiverStream::new(rx),
        handle,
    }
}

impl<R> DecodeWorker<R> {
    /// Stop receiving and wait for the worker's final counters.
    pub async fn finish(self) -> PipelineResult<DecodeStats> {
        drop(self.records);
        self.handle
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))
    }
}

// Fields are never pinned structurally.
impl<R> Unpin for DecodeWorker<R> {}

impl<R> Stream for DecodeWorker<R> {
    type Item = Result<R, StreamDecodeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().records).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}
