//! Span sink interface
//!
//! The span itself (export, batching, transport) lives outside this crate.
//! [`SpanSink`] is the narrow surface the lifecycle controller writes to.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Attribute value accepted by a span
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// Convert a JSON primitive. Null, arrays and objects have no attribute form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(AttributeValue::Int)
                .or_else(|| n.as_f64().map(AttributeValue::Float)),
            Value::String(s) => Some(AttributeValue::String(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Float(x) => write!(f, "{x}"),
            AttributeValue::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

/// Final status of a span
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    /// Failed, with a `"{Type}: {message}"` description
    Error(String),
}

impl SpanStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error(_))
    }
}

/// An error observed on the wrapped stream, as recorded on the span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    /// Short type name of the error, without module path or generics
    pub type_name: String,
    /// The error's `Display` output
    pub message: String,
}

impl ExceptionRecord {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Capture an error using its static type for the type name
    /// (see [`short_type_name`] for how wrappers are reported).
    pub fn from_error<E: fmt::Display + ?Sized>(error: &E) -> Self {
        Self::new(short_type_name::<E>(), error.to_string())
    }

    /// `"{type_name}: {message}"`
    pub fn description(&self) -> String {
        format!("{}: {}", self.type_name, self.message)
    }
}

const POINTER_WRAPPERS: [&str; 3] = ["alloc::boxed::Box<", "alloc::sync::Arc<", "alloc::rc::Rc<"];

/// `my_crate::errors::DomainError<T>` becomes `DomainError`.
///
/// Smart-pointer and reference wrappers are peeled first, so
/// `Box<DomainError>` is also `DomainError`. The name is static: a
/// `Box<dyn Error>` can only be reported as `Error`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let mut name = std::any::type_name::<T>();
    loop {
        name = name.trim_start_matches('&').trim_start_matches("mut ");
        let unwrapped = POINTER_WRAPPERS.iter().find_map(|wrapper| {
            name.strip_prefix(wrapper)
                .and_then(|rest| rest.strip_suffix('>'))
        });
        match unwrapped {
            Some(inner) => name = inner,
            None => break,
        }
    }

    let name = name.strip_prefix("dyn ").unwrap_or(name);
    let base = &name[..name.find(['<', ' ']).unwrap_or(name.len())];
    base.rsplit("::").next().unwrap_or(base)
}

/// Write side of an observability span.
pub trait SpanSink: Send {
    /// Attach one attribute. Sinks with an attribute ceiling may refuse.
    fn set_attribute(&mut self, key: &str, value: AttributeValue) -> Result<()>;

    fn add_event(&mut self, name: &str, at: DateTime<Utc>);

    fn record_exception(&mut self, exception: &ExceptionRecord, at: DateTime<Utc>);

    fn set_status(&mut self, status: SpanStatus);

    /// Close the span. Called exactly once by the lifecycle controller.
    fn end(&mut self, at: DateTime<Utc>);
}

/// Sink that reports span activity as `tracing` events under one span.
#[derive(Debug)]
pub struct TracingSpan {
    span: tracing::Span,
    started_at: DateTime<Utc>,
}

impl TracingSpan {
    pub fn new(name: &str) -> Self {
        Self {
            span: tracing::info_span!("stream_span", otel.name = name),
            started_at: Utc::now(),
        }
    }
}

impl SpanSink for TracingSpan {
    fn set_attribute(&mut self, key: &str, value: AttributeValue) -> Result<()> {
        tracing::debug!(parent: &self.span, attribute = key, value = %value, "span attribute");
        Ok(())
    }

    fn add_event(&mut self, name: &str, at: DateTime<Utc>) {
        let elapsed_ms = (at - self.started_at).num_milliseconds();
        tracing::info!(parent: &self.span, event = name, elapsed_ms, "span event");
    }

    fn record_exception(&mut self, exception: &ExceptionRecord, _at: DateTime<Utc>) {
        tracing::warn!(
            parent: &self.span,
            exception_type = %exception.type_name,
            exception_message = %exception.message,
            "stream raised"
        );
    }

    fn set_status(&mut self, status: SpanStatus) {
        match status {
            SpanStatus::Error(description) => {
                tracing::warn!(parent: &self.span, status = "error", %description, "span status")
            }
            other => tracing::debug!(parent: &self.span, status = ?other, "span status"),
        }
    }

    fn end(&mut self, at: DateTime<Utc>) {
        let duration_ms = (at - self.started_at).num_milliseconds();
        tracing::info!(parent: &self.span, duration_ms, "span ended");
    }
}
