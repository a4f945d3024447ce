//! Error types for streamtap
//!
//! None of these errors ever reach the caller iterating a proxied stream.
//! They are produced at the telemetry boundaries, logged, and dropped.

use thiserror::Error;

/// Main error type for streamtap operations
#[derive(Error, Debug)]
pub enum TapError {
    /// A fragment could not be merged into the accumulator tree
    #[error("Malformed chunk: {0}")]
    MalformedChunk(#[from] MergeError),

    /// The chunk parser could not turn a vendor chunk into a value tree
    #[error("Parse error: {0}")]
    Parse(String),

    /// Attribute extraction from the materialized response failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The span sink rejected an operation
    #[error("Sink error: {0}")]
    Sink(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TapError {
    fn from(err: serde_json::Error) -> Self {
        TapError::Serialization(err.to_string())
    }
}

/// Result type alias for streamtap operations
pub type Result<T> = std::result::Result<T, TapError>;

/// A fragment value did not fit the node it was routed to.
///
/// The path is collected leaf-first while the error bubbles up through the
/// tree and rendered root-first.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("expected {} at `{}`, found {}", .expected, render_path(.segments), .found)]
pub struct MergeError {
    segments: Vec<String>,
    /// What the node expected to receive
    pub expected: &'static str,
    /// What the fragment actually carried
    pub found: &'static str,
}

impl MergeError {
    pub fn mismatch(expected: &'static str, found: &'static str) -> Self {
        Self {
            segments: Vec::new(),
            expected,
            found,
        }
    }

    /// Prefix the error path with the key of the enclosing node.
    pub fn within(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Dotted path from the root to the offending field, `<root>` when empty.
    pub fn path(&self) -> String {
        render_path(&self.segments)
    }
}

fn render_path(segments: &[String]) -> String {
    if segments.is_empty() {
        return "<root>".to_string();
    }
    segments
        .iter()
        .rev()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(".")
}
