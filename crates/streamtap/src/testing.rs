//! Test utilities for streamtap - an in-memory span sink
//!
//! [`RecordingSpan`] keeps everything written to it behind a shared handle so
//! tests can hand the sink to a proxy and still inspect the span afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::{Result, TapError};
use crate::span::{AttributeValue, ExceptionRecord, SpanSink, SpanStatus};

/// Everything a [`RecordingSpan`] has observed
#[derive(Debug, Clone, Default)]
pub struct SpanRecord {
    /// Attributes in the order they were accepted
    pub attributes: Vec<(String, AttributeValue)>,
    /// Event names with their timestamps
    pub events: Vec<(String, DateTime<Utc>)>,
    pub exceptions: Vec<ExceptionRecord>,
    pub status: SpanStatus,
    /// How many times `end` was called
    pub end_count: usize,
    pub ended_at: Option<DateTime<Utc>>,
    /// Attributes refused because of the sink-side limit
    pub dropped_attributes: usize,
}

impl SpanRecord {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.iter().any(|(event, _)| event == name)
    }
}

/// Cloneable read handle onto a [`RecordingSpan`]
#[derive(Debug, Clone)]
pub struct SpanHandle {
    record: Arc<Mutex<SpanRecord>>,
}

impl SpanHandle {
    pub fn snapshot(&self) -> SpanRecord {
        lock(&self.record).clone()
    }

    pub fn end_count(&self) -> usize {
        lock(&self.record).end_count
    }

    pub fn status(&self) -> SpanStatus {
        lock(&self.record).status.clone()
    }
}

/// In-memory [`SpanSink`] for tests and dry runs.
#[derive(Debug)]
pub struct RecordingSpan {
    record: Arc<Mutex<SpanRecord>>,
    attribute_limit: Option<usize>,
    reject_attributes: bool,
}

impl RecordingSpan {
    /// Create a sink together with the handle used to inspect it
    pub fn new() -> (Self, SpanHandle) {
        let record = Arc::new(Mutex::new(SpanRecord::default()));
        let span = Self {
            record: Arc::clone(&record),
            attribute_limit: None,
            reject_attributes: false,
        };
        (span, SpanHandle { record })
    }

    /// Silently drop attributes past `limit`, like an exporter with a cap
    pub fn with_attribute_limit(mut self, limit: usize) -> Self {
        self.attribute_limit = Some(limit);
        self
    }

    /// Fail every `set_attribute` call
    pub fn rejecting_attributes(mut self) -> Self {
        self.reject_attributes = true;
        self
    }
}

impl SpanSink for RecordingSpan {
    fn set_attribute(&mut self, key: &str, value: AttributeValue) -> Result<()> {
        if self.reject_attributes {
            return Err(TapError::Sink(format!("attribute `{key}` rejected")));
        }

        let mut record = lock(&self.record);
        if self
            .attribute_limit
            .is_some_and(|limit| record.attributes.len() >= limit)
        {
            record.dropped_attributes += 1;
            return Ok(());
        }
        record.attributes.push((key.to_string(), value));
        Ok(())
    }

    fn add_event(&mut self, name: &str, at: DateTime<Utc>) {
        lock(&self.record).events.push((name.to_string(), at));
    }

    fn record_exception(&mut self, exception: &ExceptionRecord, _at: DateTime<Utc>) {
        lock(&self.record).exceptions.push(exception.clone());
    }

    fn set_status(&mut self, status: SpanStatus) {
        lock(&self.record).status = status;
    }

    fn end(&mut self, at: DateTime<Utc>) {
        let mut record = lock(&self.record);
        record.end_count += 1;
        record.ended_at = Some(at);
    }
}

fn lock(record: &Mutex<SpanRecord>) -> MutexGuard<'_, SpanRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}
