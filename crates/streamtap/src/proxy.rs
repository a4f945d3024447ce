//! Transparent stream proxy
//!
//! [`StreamProxy`] wraps a vendor stream and behaves exactly like it:
//! - Every chunk is forwarded unchanged, in order, with no added latency
//! - A copy of each chunk is parsed and merged into a [`DeltaAccumulator`]
//! - Exhaustion or an error finalizes the span once, then is passed through
//!
//! The proxy implements `Iterator` when the wrapped value is an iterator and
//! `futures::Stream` when it is a stream. Items must be `Result`s; wrap an
//! infallible source with `Ok::<_, Infallible>`.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::accumulator::{DeltaAccumulator, MapSchema};
use crate::attributes::AttributeExtractor;
use crate::config::Config;
use crate::error::Result;
use crate::lifecycle::{SpanLifecycleController, StreamOutcome};
use crate::span::{ExceptionRecord, SpanSink};

/// Turns one vendor chunk into the value tree the accumulator merges.
pub trait ChunkParser<T> {
    fn parse(&self, chunk: &T) -> Result<Value>;
}

/// Parser for any chunk type that implements `Serialize`
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeParser;

impl<T: Serialize> ChunkParser<T> for SerdeParser {
    fn parse(&self, chunk: &T) -> Result<Value> {
        Ok(serde_json::to_value(chunk)?)
    }
}

/// Lifecycle of a proxy: `Created -> Streaming -> Finished`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    /// Nothing pulled yet
    Created,
    /// At least one chunk forwarded
    Streaming,
    /// Exhausted or failed; absorbing
    Finished,
}

/// Drop-in replacement for the wrapped stream that observes it exactly once.
#[derive(Debug)]
pub struct StreamProxy<S, P = SerdeParser> {
    inner: S,
    parser: P,
    accumulator: DeltaAccumulator,
    controller: SpanLifecycleController,
    state: ProxyState,
    suppressed: bool,
}

impl<S> StreamProxy<S> {
    pub fn new(
        inner: S,
        accumulator: DeltaAccumulator,
        controller: SpanLifecycleController,
    ) -> Self {
        Self {
            inner,
            parser: SerdeParser,
            accumulator,
            controller,
            state: ProxyState::Created,
            suppressed: false,
        }
    }
}

impl<S, P> StreamProxy<S, P> {
    /// Replace the chunk parser
    pub fn with_parser<Q>(self, parser: Q) -> StreamProxy<S, Q> {
        StreamProxy {
            inner: self.inner,
            parser,
            accumulator: self.accumulator,
            controller: self.controller,
            state: self.state,
            suppressed: self.suppressed,
        }
    }

    /// Forward everything untouched: no accumulation, no span activity
    pub fn suppress_instrumentation(mut self, suppress: bool) -> Self {
        self.suppressed = suppress;
        self.accumulator = self.accumulator.suppressed(suppress);
        self
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ProxyState::Finished
    }

    /// Reconstruction of the chunks seen so far
    pub fn snapshot(&self) -> Option<Value> {
        self.accumulator.materialize()
    }

    fn observe<T, E>(
        &mut self,
        item: Option<std::result::Result<T, E>>,
    ) -> Option<std::result::Result<T, E>>
    where
        P: ChunkParser<T>,
        E: fmt::Display,
    {
        if self.suppressed || self.state == ProxyState::Finished {
            return item;
        }

        match item {
            Some(Ok(chunk)) => {
                self.accept(&chunk);
                Some(Ok(chunk))
            }
            Some(Err(error)) => {
                self.terminate(StreamOutcome::Failed(ExceptionRecord::from_error(&error)));
                Some(Err(error))
            }
            None => {
                self.terminate(StreamOutcome::Completed);
                None
            }
        }
    }

    fn accept<T>(&mut self, chunk: &T)
    where
        P: ChunkParser<T>,
    {
        if self.state == ProxyState::Created {
            self.state = ProxyState::Streaming;
            self.controller.record_first_chunk();
        }

        match self.parser.parse(chunk) {
            Ok(fragment) => self.accumulator.process_chunk(&fragment),
            Err(e) => warn!(
                error_type = "parse",
                error_message = %e,
                "Failed to parse stream chunk, continuing"
            ),
        }
    }

    fn terminate(&mut self, outcome: StreamOutcome) {
        self.state = ProxyState::Finished;
        debug!(
            chunks = self.accumulator.chunk_count(),
            failed = matches!(outcome, StreamOutcome::Failed(_)),
            "Stream terminated"
        );
        let response = self.accumulator.materialize();
        self.controller.finish(response.as_ref(), outcome);
    }
}

impl<S, P, T, E> Iterator for StreamProxy<S, P>
where
    S: Iterator<Item = std::result::Result<T, E>>,
    P: ChunkParser<T>,
    E: fmt::Display,
{
    type Item = std::result::Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next();
        self.observe(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S, P, T, E> Stream for StreamProxy<S, P>
where
    S: Stream<Item = std::result::Result<T, E>> + Unpin,
    P: ChunkParser<T> + Unpin,
    E: fmt::Display,
{
    type Item = std::result::Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(item) => Poll::Ready(this.observe(item)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Wrap `stream` with an accumulator and span controller built from `config`
pub fn instrument<S>(
    stream: S,
    schema: MapSchema,
    sink: Box<dyn SpanSink>,
    extractor: Box<dyn AttributeExtractor>,
    config: &Config,
) -> StreamProxy<S> {
    StreamProxy::new(
        stream,
        DeltaAccumulator::new(schema),
        SpanLifecycleController::from_config(sink, extractor, config),
    )
    .suppress_instrumentation(config.stream.suppress_instrumentation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::FlattenExtractor;
    use crate::error::TapError;
    use crate::span::SpanStatus;
    use crate::testing::RecordingSpan;
    use serde_json::json;
    use std::convert::Infallible;

    fn controller() -> (SpanLifecycleController, crate::testing::SpanHandle) {
        let (span, handle) = RecordingSpan::new();
        (
            SpanLifecycleController::new(span, FlattenExtractor::default()),
            handle,
        )
    }

    struct RejectingParser;

    impl ChunkParser<Value> for RejectingParser {
        fn parse(&self, _chunk: &Value) -> Result<Value> {
            Err(TapError::Parse("unreadable chunk".to_string()))
        }
    }

    #[test]
    fn state_moves_created_streaming_finished() {
        let (controller, _handle) = controller();
        let chunks = vec![Ok::<_, Infallible>(json!({"a": 1}))];
        let mut proxy =
            StreamProxy::new(chunks.into_iter(), DeltaAccumulator::dynamic(), controller);

        assert_eq!(proxy.state(), ProxyState::Created);
        assert!(proxy.next().is_some());
        assert_eq!(proxy.state(), ProxyState::Streaming);
        assert!(proxy.next().is_none());
        assert_eq!(proxy.state(), ProxyState::Finished);
    }

    #[test]
    fn parse_failure_does_not_interrupt_stream() {
        let (controller, handle) = controller();
        let chunks = vec![Ok::<_, Infallible>(json!({"a": 1})), Ok(json!({"b": 2}))];
        let proxy =
            StreamProxy::new(chunks.into_iter(), DeltaAccumulator::dynamic(), controller)
                .with_parser(RejectingParser);

        let forwarded: Vec<_> = proxy.map(|item| item.unwrap()).collect();

        assert_eq!(forwarded, vec![json!({"a": 1}), json!({"b": 2})]);
        assert_eq!(handle.end_count(), 1);
        assert_eq!(handle.status(), SpanStatus::Ok);
    }

    #[test]
    fn snapshot_tracks_progress() {
        let (controller, _handle) = controller();
        let chunks = vec![Ok::<_, Infallible>(json!({"id": "x"})), Ok(json!({"model": "m"}))];
        let mut proxy =
            StreamProxy::new(chunks.into_iter(), DeltaAccumulator::dynamic(), controller);

        assert_eq!(proxy.snapshot(), None);
        proxy.next();
        assert_eq!(proxy.snapshot(), Some(json!({"id": "x"})));
        proxy.next();
        assert_eq!(proxy.snapshot(), Some(json!({"id": "x", "model": "m"})));
    }

    #[test]
    fn suppressed_proxy_is_pure_passthrough() {
        let (controller, handle) = controller();
        let chunks = vec![Ok::<_, Infallible>(json!({"a": 1}))];
        let mut proxy =
            StreamProxy::new(chunks.into_iter(), DeltaAccumulator::dynamic(), controller)
                .suppress_instrumentation(true);

        assert_eq!(proxy.next().unwrap().unwrap(), json!({"a": 1}));
        assert!(proxy.next().is_none());

        let record = handle.snapshot();
        assert_eq!(record.end_count, 0);
        assert!(record.events.is_empty());
        assert_eq!(proxy.snapshot(), None);
        assert_eq!(proxy.state(), ProxyState::Created);
    }
}
