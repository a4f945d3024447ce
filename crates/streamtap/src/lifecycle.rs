//! Exactly-once span finalization
//!
//! The controller owns the span sink for one streaming call. It records the
//! first-chunk latency event and, when the stream terminates, attaches the
//! reconstructed response, sets the status and ends the span. `finish` is
//! guarded so the span is ended at most once no matter how often the
//! terminal condition is reached.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::attributes::{AttributeExtractor, AttributeTiers};
use crate::config::Config;
use crate::span::{ExceptionRecord, SpanSink, SpanStatus};

/// How the wrapped stream terminated
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// The stream signalled exhaustion
    Completed,
    /// The stream yielded an error
    Failed(ExceptionRecord),
}

pub struct SpanLifecycleController {
    sink: Box<dyn SpanSink>,
    extractor: Box<dyn AttributeExtractor>,
    max_attributes: usize,
    first_chunk_event: String,
    first_chunk_seen: bool,
    finished: bool,
}

impl SpanLifecycleController {
    pub fn new(
        sink: impl SpanSink + 'static,
        extractor: impl AttributeExtractor + 'static,
    ) -> Self {
        Self::from_config(Box::new(sink), Box::new(extractor), &Config::default())
    }

    /// Build a controller using the `[span]` and `[stream]` settings
    pub fn from_config(
        sink: Box<dyn SpanSink>,
        extractor: Box<dyn AttributeExtractor>,
        config: &Config,
    ) -> Self {
        Self {
            sink,
            extractor,
            max_attributes: config.span.max_attributes,
            first_chunk_event: config.stream.first_chunk_event.clone(),
            first_chunk_seen: false,
            finished: false,
        }
    }

    /// Override the attribute-count ceiling
    pub fn max_attributes(mut self, max_attributes: usize) -> Self {
        self.max_attributes = max_attributes;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Emit the first-chunk event. Only the first call has any effect.
    pub fn record_first_chunk(&mut self) {
        if self.first_chunk_seen || self.finished {
            return;
        }
        self.first_chunk_seen = true;
        self.sink.add_event(&self.first_chunk_event, Utc::now());
    }

    /// Attach the response, set the status and end the span.
    ///
    /// A second call is a no-op. Extraction and attribute failures are logged
    /// and never prevent the span from being ended.
    pub fn finish(&mut self, response: Option<&Value>, outcome: StreamOutcome) {
        if self.finished {
            debug!("Span already finished, ignoring repeated finish");
            return;
        }
        self.finished = true;

        match self.extractor.extract(response) {
            Ok(tiers) => self.attach(tiers),
            Err(e) => warn!(
                error_type = "extraction",
                error_message = %e,
                "Attribute extraction failed, ending span without response attributes"
            ),
        }

        let status = match outcome {
            StreamOutcome::Completed => SpanStatus::Ok,
            StreamOutcome::Failed(exception) => {
                self.sink.record_exception(&exception, Utc::now());
                SpanStatus::Error(exception.description())
            }
        };
        debug!(status = ?status, "Finishing stream span");

        self.sink.set_status(status);
        self.sink.end(Utc::now());
    }

    /// Core tier first, unconditionally; extras only while under the ceiling.
    fn attach(&mut self, tiers: AttributeTiers) {
        let mut attached = 0usize;

        for (key, value) in tiers.core {
            match self.sink.set_attribute(&key, value) {
                Ok(()) => attached += 1,
                Err(e) => warn!(
                    error_type = "sink",
                    error_message = %e,
                    attribute = %key,
                    "Failed to attach core attribute"
                ),
            }
        }

        let budget = self.max_attributes.saturating_sub(attached);
        let total_extra = tiers.extra.len();

        for (key, value) in tiers.extra.into_iter().take(budget) {
            if let Err(e) = self.sink.set_attribute(&key, value) {
                warn!(
                    error_type = "sink",
                    error_message = %e,
                    attribute = %key,
                    "Failed to attach attribute"
                );
            }
        }

        if total_extra > budget {
            debug!(
                dropped = total_extra - budget,
                max_attributes = self.max_attributes,
                "Attribute ceiling reached, dropping extra attributes"
            );
        }
    }
}

impl std::fmt::Debug for SpanLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanLifecycleController")
            .field("max_attributes", &self.max_attributes)
            .field("first_chunk_seen", &self.first_chunk_seen)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
