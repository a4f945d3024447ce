//! Streamtap - transparent instrumentation for streamed LLM responses
//!
//! This crate wraps a streaming response, forwards every chunk to the caller
//! unchanged, reconstructs the full structured response from the partial
//! chunks as they pass, and finalizes an observability span exactly once
//! when the stream ends or fails.

pub mod accumulator;
pub mod attributes;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod span;
pub mod testing;

pub use accumulator::{DeltaAccumulator, MapSchema, Schema};
pub use error::{MergeError, TapError};
pub use lifecycle::{SpanLifecycleController, StreamOutcome};
pub use proxy::{ChunkParser, ProxyState, SerdeParser, StreamProxy, instrument};
